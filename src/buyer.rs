//! Buyer-side loop: keep issuing `trading_lookup` against a random trader
//! and report the outcome (spec §4.4 "Buyer role", §2 Flow).

use std::sync::Arc;
use std::time::Duration;

use rand::{thread_rng, Rng};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::model::{PeerId, Role};
use crate::peer::Peer;
use crate::rpc::{Request, Rpc};
use crate::trader;

/// The terminal result of one `trading_lookup`, delivered asynchronously by
/// the trader's own `transaction` notification (spec §6: there is no
/// synchronous reply carrying this — see [`crate::rpc::Request::Transaction`]).
#[derive(Debug, Clone)]
pub struct TransactionOutcome {
    pub product: String,
    pub count: u32,
    pub seller_id: PeerId,
    pub success: bool,
    pub insufficient: bool,
}

const LOOKUP_WAIT: Duration = Duration::from_secs(3);

/// Drives one buyer's lifetime: repeatedly pick an item from the
/// catalogue, issue a lookup against a randomly chosen trader, and wait for
/// the outcome before trying again.
pub async fn run_buyer_loop(peer: Arc<Peer>) {
    loop {
        if peer.role() != Role::Buyer {
            break;
        }
        let Some(trader_id) = trader::random_trader(&peer) else {
            tokio::time::sleep(Duration::from_millis(200)).await;
            continue;
        };
        let (item, count) = {
            let mut rng = thread_rng();
            (peer.catalogue.choose(&mut rng), rng.gen_range(1..=3))
        };

        let (tx, rx) = oneshot::channel();
        *peer.pending_outcome.lock() = Some(tx);

        debug!(buyer = %peer.id, trader = %trader_id, item = %item, count, "issuing trading lookup");
        Rpc::call(
            peer.directory.as_ref(),
            &peer.id,
            &peer.clock,
            &trader_id,
            Request::TradingLookup { item: item.clone(), count },
        )
        .await;

        match tokio::time::timeout(LOOKUP_WAIT, rx).await {
            Ok(Ok(outcome)) => log_outcome(&peer, &outcome),
            Ok(Err(_)) => warn!(buyer = %peer.id, "trading lookup outcome channel dropped"),
            Err(_) => {
                *peer.pending_outcome.lock() = None;
                debug!(buyer = %peer.id, trader = %trader_id, "trading lookup timed out waiting for outcome");
            }
        }

        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

fn log_outcome(peer: &Arc<Peer>, outcome: &TransactionOutcome) {
    if outcome.success {
        info!(buyer = %peer.id, seller = %outcome.seller_id, product = %outcome.product, count = outcome.count, "purchase succeeded");
    } else if outcome.insufficient {
        info!(buyer = %peer.id, product = %outcome.product, "purchase failed: insufficient stock");
    } else {
        info!(buyer = %peer.id, product = %outcome.product, "purchase failed: no such product");
    }
}

/// Inbound `transaction(...)` addressed to this peer as a buyer: fulfils
/// whatever `trading_lookup` is currently waiting on `pending_outcome`.
pub fn handle_transaction_outcome(
    peer: &Arc<Peer>,
    product: String,
    count: u32,
    seller_id: PeerId,
    success: bool,
    insufficient: bool,
) {
    let Some(tx) = peer.pending_outcome.lock().take() else {
        debug!(buyer = %peer.id, "transaction notification with no pending lookup");
        return;
    };
    let _ = tx.send(TransactionOutcome { product, count, seller_id, success, insufficient });
}
