//! Bully-variant leader election (spec §4.2).

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info};

use crate::heartbeat;
use crate::peer::Peer;
use crate::rpc::{ElectionMessage, Request, Response, Rpc, WinnerDescriptor};

/// Grace period an initiator waits for `OK`/`I Won` before declaring
/// itself the winner. Must exceed worst-case one-hop RPC round-trip time
/// (spec §5); the protocol self-heals via a later, higher-priority `I Won`
/// if this fires spuriously.
const ELECTION_GRACE: Duration = Duration::from_secs(2);

pub async fn set_default_flags(peer: &Arc<Peer>) -> Response {
    if peer.role().excluded_from_election() {
        return Response::Ack;
    }
    let mut flags = peer.election.lock();
    *flags = crate::model::ElectionFlags::default();
    Response::Ack
}

/// One election round. Runs to completion: either this peer declares
/// itself the winner, or it times out having heard `OK`/`I Won` from
/// someone else and simply stops (the bootstrap loop will try again).
pub async fn start_election(peer: &Arc<Peer>) {
    if peer.role().excluded_from_election() {
        return;
    }

    broadcast_set_default_flags(peer).await;

    let new_bully_id = rand::thread_rng().gen_range(0..=200);
    peer.set_bully_id(new_bully_id);
    {
        let mut flags = peer.election.lock();
        *flags = crate::model::ElectionFlags::default();
    }
    peer.known_bully_ids.lock().insert(peer.id.clone(), new_bully_id);

    debug!(peer = %peer.id, bully_id = new_bully_id, "starting election round");

    // Every eligible neighbor is asked, both to discover who is currently
    // higher-priority and to let them discover us (spec §4.2 step 2's
    // "collect bully_id of every neighbor" has no separate poll operation
    // in the RPC surface; the Election broadcast itself is the mechanism —
    // see DESIGN.md).
    for target in peer.directory.list() {
        if target == peer.id {
            continue;
        }
        Rpc::call(
            peer.directory.as_ref(),
            &peer.id,
            &peer.clock,
            &target,
            Request::Election(ElectionMessage::Election { bully_id: new_bully_id }),
        )
        .await;
    }

    tokio::time::sleep(ELECTION_GRACE).await;

    let (recv_ok, recv_won) = {
        let flags = peer.election.lock();
        (flags.recv_ok, flags.recv_won)
    };
    if !recv_ok && !recv_won {
        declare_winner(peer).await;
    }
}

async fn declare_winner(peer: &Arc<Peer>) {
    {
        let mut flags = peer.election.lock();
        flags.send_won = true;
    }
    peer.become_trader();
    peer.trader_set.lock().insert(peer.id.clone());

    let descriptor = WinnerDescriptor {
        bully_id: peer.bully_id(),
        id: peer.id.clone(),
        clock: peer.clock.read(),
    };
    info!(peer = %peer.id, bully_id = descriptor.bully_id, "declaring election victory");
    for target in peer.directory.list() {
        if target == peer.id {
            continue;
        }
        Rpc::call(
            peer.directory.as_ref(),
            &peer.id,
            &peer.clock,
            &target,
            Request::Election(ElectionMessage::IWon(descriptor.clone())),
        )
        .await;
    }
    heartbeat::on_became_trader(peer).await;
}

/// Inbound handler for `election_message` (spec §4.2's receive-side rules).
pub async fn handle_election_message(peer: &Arc<Peer>, from: crate::model::PeerId, msg: ElectionMessage) -> Response {
    match msg {
        ElectionMessage::Election { bully_id } => {
            peer.known_bully_ids.lock().insert(from.clone(), bully_id);
            // Always reply OK to the sender (spec §4.2).
            Rpc::call(
                peer.directory.as_ref(),
                &peer.id,
                &peer.clock,
                &from,
                Request::Election(ElectionMessage::Ok),
            )
            .await;

            let already_decided = {
                let flags = peer.election.lock();
                flags.recv_ok || flags.recv_won
            };
            if !already_decided && !peer.role().excluded_from_election() {
                let peer = peer.clone();
                tokio::spawn(async move {
                    start_election(&peer).await;
                });
            }
            Response::Ack
        }
        ElectionMessage::Ok => {
            peer.election.lock().recv_ok = true;
            Response::Ack
        }
        ElectionMessage::IWon(descriptor) => {
            peer.election.lock().recv_won = true;
            peer.trader_set.lock().insert(descriptor.id);
            Response::Ack
        }
    }
}

pub async fn handle_set_trader(peer: &Arc<Peer>, traders: Vec<crate::model::PeerId>) -> Response {
    peer.trader_set.lock().set(traders);
    heartbeat::on_set_trader(peer).await;
    Response::Ack
}

pub async fn handle_remove_trader(peer: &Arc<Peer>, dead: crate::model::PeerId) -> Response {
    peer.trader_set.lock().remove(&dead);
    {
        let mut partner = peer.heartbeat_partner.lock();
        if partner.as_ref() == Some(&dead) {
            *partner = None;
        }
    }
    Response::Ack
}

async fn broadcast_set_default_flags(peer: &Arc<Peer>) {
    for target in peer.directory.list() {
        if target == peer.id {
            continue;
        }
        Rpc::call(
            peer.directory.as_ref(),
            &peer.id,
            &peer.clock,
            &target,
            Request::SetDefaultFlags,
        )
        .await;
    }
}

/// The bootstrap peer's driver loop (spec §4.2 last paragraph): runs
/// elections until `|TraderSet| == n_traders`, then broadcasts the final
/// trader set.
pub async fn run_until_converged(peer: &Arc<Peer>) {
    loop {
        let converged = peer.trader_set.lock().len() >= peer.config.n_traders;
        if converged {
            break;
        }
        start_election(peer).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let traders = peer.trader_set.lock().as_slice().to_vec();
    info!(traders = ?traders.iter().map(|t| t.to_string()).collect::<Vec<_>>(), "election converged");
    for target in peer.directory.list() {
        Rpc::call(
            peer.directory.as_ref(),
            &peer.id,
            &peer.clock,
            &target,
            Request::SetTrader(traders.clone()),
        )
        .await;
    }
}
