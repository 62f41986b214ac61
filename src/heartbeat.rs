//! Trader heartbeat and failover (spec §4.3).

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::election;
use crate::model::PeerId;
use crate::peer::Peer;
use crate::rpc::{Request, Rpc};
use crate::trader;
use crate::txlog::TransactionLog;

/// Fixed poll interval between heartbeat pings, distinct from the
/// configurable `heartbeat_timeout` after which a missed ping is treated as
/// death (spec §3's two separate timing knobs).
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Starts this trader's monitor loop once it has a partner assigned.
/// Re-entrant: called again whenever `set_trader`/partner assignment
/// changes, but only one loop per peer should actually run — callers rely
/// on `heartbeat_partner` being cleared to make a stale loop exit quietly.
pub async fn on_became_trader(peer: &Arc<Peer>) {
    if !peer.config.heartbeat_enabled {
        return;
    }
    maybe_assign_partner(peer);
    spawn_monitor(peer);
}

pub async fn on_set_trader(peer: &Arc<Peer>) {
    if !peer.config.heartbeat_enabled || !peer.role().is_trader() {
        return;
    }
    maybe_assign_partner(peer);
}

fn maybe_assign_partner(peer: &Arc<Peer>) {
    let assigned = {
        let traders = peer.trader_set.lock();
        traders.other_than(&peer.id)
    };
    if let Some(partner) = assigned {
        *peer.heartbeat_partner.lock() = Some(partner);
    }
}

fn spawn_monitor(peer: &Arc<Peer>) {
    let peer = peer.clone();
    tokio::spawn(async move {
        run_heartbeat_monitor(peer).await;
    });
}

/// Pings `heartbeat_partner` every [`HEARTBEAT_INTERVAL`]; a reply that
/// doesn't arrive within `config.heartbeat_timeout` declares the partner
/// dead on the spot and hands off its unresolved log (spec §4.3).
pub async fn run_heartbeat_monitor(peer: Arc<Peer>) {
    loop {
        tokio::time::sleep(HEARTBEAT_INTERVAL).await;
        if !peer.role().is_trader() {
            return;
        }
        let Some(partner) = peer.heartbeat_partner.lock().clone() else {
            continue;
        };

        let alive = tokio::time::timeout(peer.config.heartbeat_timeout, peer.ping(&partner))
            .await
            .unwrap_or(false);

        if alive {
            continue;
        }

        warn!(peer = %peer.id, %partner, "missed heartbeat");
        handle_peer_death(&peer, partner).await;
    }
}

/// Spec §4.3 steps 3–5: broadcast the loss, take over the dead trader's log,
/// and replay every unresolved entry through the normal pipeline.
pub async fn handle_peer_death(peer: &Arc<Peer>, dead: PeerId) {
    info!(peer = %peer.id, %dead, "trader partner presumed dead, taking over");

    Rpc::broadcast(
        peer.directory.as_ref(),
        &peer.id,
        &peer.clock,
        Request::RemoveTrader(dead.clone()),
    )
    .await;
    election::handle_remove_trader(peer, dead.clone()).await;

    let log = match TransactionLog::open(dead.as_str()) {
        Ok(log) => log,
        Err(err) => {
            warn!(peer = %peer.id, %dead, %err, "failed to open dead trader's transaction log");
            return;
        }
    };
    let unresolved = log.unresolved();
    info!(peer = %peer.id, %dead, count = unresolved.len(), "replaying unresolved transactions");
    for entry in unresolved {
        trader::trading_unresolved_lookup(peer, entry).await;
    }
    log.remove_file();
}
