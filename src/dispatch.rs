//! Per-peer inbox loop: pulls `Envelope`s off the directory-registered
//! channel and routes each `Request` to the handler appropriate for the
//! peer's *current* role, since role changes dynamically (promotion,
//! retirement, failover) over the peer's lifetime (spec §3, §4).

use std::sync::Arc;

use tracing::debug;

use crate::buyer;
use crate::election;
use crate::model::Role;
use crate::peer::Peer;
use crate::rpc::{Envelope, Request, Response};
use crate::seller;
use crate::trader;

pub async fn run_inbox(peer: Arc<Peer>, mut rx: tokio::sync::mpsc::Receiver<Envelope>) {
    while let Some(envelope) = rx.recv().await {
        let observed = peer.clock.observe(envelope.clock);
        let from = envelope.from.clone();
        let response = handle(&peer, from, observed, envelope.request).await;
        let _ = envelope.reply.send(response);
    }
}

async fn handle(peer: &Arc<Peer>, from: crate::model::PeerId, observed_clock: f64, request: Request) -> Response {
    match request {
        Request::Election(msg) => election::handle_election_message(peer, from, msg).await,
        Request::SetDefaultFlags => election::set_default_flags(peer).await,
        Request::SetTrader(traders) => election::handle_set_trader(peer, traders).await,
        Request::RemoveTrader(dead) => election::handle_remove_trader(peer, dead).await,
        Request::IsTrader => Response::Bool(peer.role().is_trader()),
        Request::IsRetire => Response::Bool(peer.role().is_retired()),
        Request::IsServer => Response::Bool(false),
        Request::PingReply => Response::Bool(!peer.role().is_retired()),

        Request::RegisterProducts { product_name, product_count } => {
            trader::handle_register_products(peer, from, product_name, product_count).await
        }
        Request::TradingLookup { item, count } => {
            let peer = peer.clone();
            tokio::spawn(async move {
                trader::trading_lookup(&peer, from, observed_clock, item, count).await;
            });
            Response::Ack
        }

        Request::AddBuyer { buyer_id, buyer_clock } => {
            if let Some(seller) = peer.seller.lock().as_ref() {
                seller.add_buyer(buyer_id, buyer_clock);
            }
            Response::Ack
        }
        Request::Transaction { product, buyer_id, seller_id, trader_id: _, buyer_success, insufficient, count } => {
            match peer.role() {
                Role::Seller => seller::handle_transaction(peer, &product, &buyer_id, count).await,
                Role::Buyer => {
                    buyer::handle_transaction_outcome(peer, product, count, seller_id, buyer_success, insufficient);
                    Response::Ack
                }
                _ => {
                    debug!(peer = %peer.id, role = ?peer.role(), "transaction notification for an unexpected role");
                    Response::Ack
                }
            }
        }

        // Warehouse-only requests reaching a non-warehouse peer: the
        // directory never resolves these to anyone else, so this branch is
        // unreachable in practice but kept exhaustive rather than panicking.
        Request::UpdateWarehouse { .. }
        | Request::RegisterProductsWithWarehouse { .. }
        | Request::Restock { .. }
        | Request::LoadState => Response::Ack,
    }
}
