//! The peer shell: role state, neighbor directory handle, and the mutable
//! state each coordination module (election, heartbeat, trader, seller)
//! reaches into. Mirrors spec §3's `Peer` data model directly: identity,
//! `bully_id`, `role`, product fields, and a neighbor directory all live on
//! one struct.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tracing::{info, warn};
use warehouse::SellerRecord;

use crate::clock::LamportClock;
use crate::config::Config;
use crate::directory::Directory;
use crate::model::{Catalogue, ElectionFlags, PeerId, Role, TraderSet};
use crate::rpc::{Request, Rpc};
use crate::seller::SellerState;
use crate::txlog::TransactionLog;
use crate::buyer::TransactionOutcome;

pub struct Peer {
    pub id: PeerId,
    pub bully_id: AtomicI32,
    pub role: RwLock<Role>,
    pub prev_role: Mutex<Option<Role>>,
    pub clock: LamportClock,
    pub directory: Arc<dyn Directory>,
    pub trader_set: Mutex<TraderSet>,
    pub election: Mutex<ElectionFlags>,
    /// Peers this one has heard an `Election` message from this round,
    /// with their announced `bully_id` — the side-channel that lets a
    /// peer compute its `higher` set (spec §4.2 step 2).
    pub known_bully_ids: Mutex<HashMap<PeerId, i32>>,
    /// Trader-only in-memory mirror of the warehouse. Empty and unused
    /// while this peer is not a trader.
    pub cache: Mutex<HashMap<String, SellerRecord>>,
    /// Guards `trading_lookup`'s critical section; only meaningful once
    /// this peer has been promoted to trader (spec §4.4).
    pub fail_sem: AsyncMutex<()>,
    pub log: Mutex<Option<TransactionLog>>,
    pub seller: Mutex<Option<SellerState>>,
    /// The other trader this one pings, once elected (spec §4.3's
    /// two-trader assumption).
    pub heartbeat_partner: Mutex<Option<PeerId>>,
    pub config: Config,
    pub catalogue: Catalogue,
    pub warehouse_id: PeerId,
    /// Fulfilled by this peer's inbox when, as a buyer, it receives the
    /// trader's terminal `transaction` notification for its own in-flight
    /// `trading_lookup` (spec §6: the RPC surface delivers the outcome as a
    /// separate, asynchronous call, not as `trading_lookup`'s own reply).
    pub pending_outcome: Mutex<Option<oneshot::Sender<TransactionOutcome>>>,
}

impl Peer {
    pub fn new(
        id: PeerId,
        role: Role,
        directory: Arc<dyn Directory>,
        config: Config,
        catalogue: Catalogue,
        warehouse_id: PeerId,
    ) -> Arc<Peer> {
        let suffix = id.suffix();
        Arc::new(Peer {
            id,
            bully_id: AtomicI32::new(0),
            role: RwLock::new(role),
            prev_role: Mutex::new(None),
            clock: LamportClock::new(suffix),
            directory,
            trader_set: Mutex::new(TraderSet::default()),
            election: Mutex::new(ElectionFlags::default()),
            known_bully_ids: Mutex::new(HashMap::new()),
            cache: Mutex::new(HashMap::new()),
            fail_sem: AsyncMutex::new(()),
            log: Mutex::new(None),
            seller: Mutex::new(None),
            heartbeat_partner: Mutex::new(None),
            config,
            catalogue,
            warehouse_id,
            pending_outcome: Mutex::new(None),
        })
    }

    pub fn role(&self) -> Role {
        *self.role.read()
    }

    pub fn bully_id(&self) -> i32 {
        self.bully_id.load(Ordering::SeqCst)
    }

    pub fn set_bully_id(&self, value: i32) {
        self.bully_id.store(value, Ordering::SeqCst);
    }

    /// `buyer|seller -> trader`: promotion on winning an election (spec §3).
    /// Loads the trader's own transaction log (fresh, or recovered if this
    /// peer was previously demoted and re-promoted) and starts with an
    /// empty cache — cache is populated lazily on the first warehouse
    /// reload, never copied from a predecessor (spec §9: no cross-trader
    /// cache invalidation, each trader reloads from the warehouse on miss).
    pub fn become_trader(&self) {
        let previous = *self.role.read();
        *self.prev_role.lock() = Some(previous);
        *self.role.write() = Role::Trader;
        self.cache.lock().clear();
        match TransactionLog::open(self.id.as_str()) {
            Ok(log) => *self.log.lock() = Some(log),
            Err(err) => warn!(peer = %self.id, %err, "failed to open transaction log on promotion"),
        }
        info!(peer = %self.id, bully_id = self.bully_id(), "promoted to trader");
    }

    /// Voluntary, permanent exit from trading (spec §4.3). The retired
    /// trader's in-flight log becomes its heartbeat partner's
    /// responsibility; nothing here deletes the log file, since the
    /// survivor still needs to open it for replay.
    pub fn retire(&self) {
        *self.role.write() = Role::Retired;
        info!(peer = %self.id, "retired");
    }

    pub async fn retire_with_time(self: &Arc<Self>, delay: std::time::Duration) {
        let peer = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            peer.retire();
        });
    }

    pub async fn ping(&self, target: &PeerId) -> bool {
        matches!(
            Rpc::call(self.directory.as_ref(), &self.id, &self.clock, target, Request::PingReply).await,
            Some(crate::rpc::Response::Bool(true))
        )
    }
}
