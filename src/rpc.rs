//! The RPC surface from spec §6, realised as an envelope carrying the
//! caller's Lamport clock plus a `Request`/`Response` pair, dispatched over
//! the in-process [`crate::directory::Directory`].

use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use crate::clock::LamportClock;
use crate::directory::Directory;
use crate::model::{PeerId, TransactionLogEntry};
use warehouse::SellerRecord;

/// A winner descriptor broadcast by `I Won` and carried in `SetTrader`.
#[derive(Debug, Clone)]
pub struct WinnerDescriptor {
    pub bully_id: i32,
    pub id: PeerId,
    pub clock: f64,
}

#[derive(Debug, Clone)]
pub enum ElectionMessage {
    Election { bully_id: i32 },
    Ok,
    IWon(WinnerDescriptor),
}

#[derive(Debug, Clone)]
pub enum Request {
    RegisterProducts { product_name: String, product_count: u32 },
    TradingLookup { item: String, count: u32 },
    Transaction {
        product: String,
        buyer_id: PeerId,
        seller_id: PeerId,
        trader_id: PeerId,
        buyer_success: bool,
        insufficient: bool,
        count: u32,
    },
    AddBuyer { buyer_id: PeerId, buyer_clock: f64 },
    Election(ElectionMessage),
    SetDefaultFlags,
    SetTrader(Vec<PeerId>),
    RemoveTrader(PeerId),
    IsTrader,
    IsRetire,
    IsServer,
    PingReply,
    UpdateWarehouse { seller_id: PeerId, item_count: u32, buyer_id: PeerId },
    RegisterProductsWithWarehouse { record: SellerRecord },
    /// Resets a seller's warehouse-of-record entry after restock-on-depletion
    /// (spec §4.4 last paragraph).
    Restock { seller_id: PeerId, product_name: String, product_count: u32 },
    /// Not in spec §6's RPC table verbatim, but named directly by §4.4 step
    /// 3 ("reload cache from warehouse file (`load_state`)"): a trader's
    /// read path into the warehouse it doesn't itself own.
    LoadState,
}

#[derive(Debug, Clone)]
pub enum Response {
    Ack,
    Bool(bool),
    Seller(Option<SellerRecord>),
    LogEntry(Option<TransactionLogEntry>),
    Snapshot(Vec<SellerRecord>),
}

pub struct Envelope {
    pub from: PeerId,
    pub clock: f64,
    pub request: Request,
    pub reply: oneshot::Sender<Response>,
}

/// Per spec §5 Cancellation: "a dropped RPC ... is treated as a NACK: the
/// caller proceeds as if the callee had not answered." A timeout or a
/// missing directory entry both collapse to `None` here — never an `Err` —
/// so callers can't accidentally treat a routine drop as a hard failure.
const RPC_TIMEOUT: Duration = Duration::from_millis(800);

pub struct Rpc;

impl Rpc {
    pub async fn call(
        directory: &dyn Directory,
        from: &PeerId,
        clock: &LamportClock,
        target: &PeerId,
        request: Request,
    ) -> Option<Response> {
        let endpoint = directory.lookup(target)?;
        let stamp = clock.send();
        let (tx, rx) = oneshot::channel();
        let envelope = Envelope { from: from.clone(), clock: stamp, request, reply: tx };
        if endpoint.send(envelope).await.is_err() {
            debug!(%target, "rpc dropped: peer inbox closed");
            return None;
        }
        match tokio::time::timeout(RPC_TIMEOUT, rx).await {
            Ok(Ok(response)) => Some(response),
            Ok(Err(_)) => {
                debug!(%target, "rpc dropped: reply channel closed without answering");
                None
            }
            Err(_) => {
                debug!(%target, "rpc dropped: timed out");
                None
            }
        }
    }

    /// Fire to every directory-registered peer, ignoring replies: used for
    /// broadcasts (`setDefaultFlags`, `I Won`, `setTrader`, `removeTrader`).
    pub async fn broadcast(
        directory: &dyn Directory,
        from: &PeerId,
        clock: &LamportClock,
        request: Request,
    ) where
        Request: Clone,
    {
        for target in directory.list() {
            if &target == from {
                continue;
            }
            Self::call(directory, from, clock, &target, request.clone()).await;
        }
    }
}
