//! Process entry point: wires up the in-process directory, spawns one task
//! per simulated peer plus the dedicated warehouse server, drives the
//! bootstrap election to convergence, and tears down cleanly on Ctrl-C
//! (spec §2 Flow, §6 "Process lifecycle").

use std::sync::Arc;

use agora::buyer::run_buyer_loop;
use agora::config::Config;
use agora::directory::{Directory, InMemoryDirectory};
use agora::dispatch::run_inbox;
use agora::election;
use agora::heartbeat::run_heartbeat_monitor;
use agora::model::{Catalogue, PeerId, Role};
use agora::peer::Peer;
use agora::seller::{register_with_trader, SellerState};
use agora::warehouse_peer::{self, WarehousePeer};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const INBOX_CAPACITY: usize = 256;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = match Config::from_args(&args) {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "invalid configuration");
            std::process::exit(2);
        }
    };

    let directory: Arc<dyn Directory> = Arc::new(InMemoryDirectory::default());
    let catalogue = Catalogue::default_catalogue();
    let warehouse_id = PeerId::new("warehouse0").expect("literal id always parses");

    let warehouse_peer = Arc::new(WarehousePeer::open(warehouse_id.clone()).expect("failed to open warehouse"));
    let (warehouse_tx, warehouse_rx) = mpsc::channel(INBOX_CAPACITY);
    directory.register(warehouse_id.clone(), warehouse_tx);
    tokio::spawn(warehouse_peer::run(warehouse_peer.clone(), warehouse_rx));

    let mut peers = Vec::with_capacity(config.n_peers);
    for i in 0..config.n_peers {
        let role = if i % 2 == 0 { Role::Seller } else { Role::Buyer };
        let id = PeerId::new(format!("{}{}", role_prefix(role), i)).expect("generated id always parses");

        let peer = Peer::new(id.clone(), role, directory.clone(), config.clone(), catalogue.clone(), warehouse_id.clone());
        if role == Role::Seller {
            let mut rng = rand::thread_rng();
            let product = catalogue.choose(&mut rng);
            *peer.seller.lock() = Some(SellerState::new(product, 10));
        }

        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        directory.register(id.clone(), tx);
        tokio::spawn(run_inbox(peer.clone(), rx));
        peers.push(peer);
    }

    let bootstrap = peers.iter().find(|p| p.id == config.bootstrap_host).cloned();
    if let Some(bootstrap) = bootstrap {
        election::run_until_converged(&bootstrap).await;
    } else {
        error!(bootstrap = %config.bootstrap_host, "bootstrap_host is not among the spawned peers");
    }

    for peer in &peers {
        if peer.role() == Role::Seller {
            register_with_trader(peer).await;
        }
    }

    if config.heartbeat_enabled {
        for peer in peers.iter().filter(|p| p.role().is_trader()) {
            tokio::spawn(run_heartbeat_monitor(peer.clone()));
        }
    }

    for peer in peers.iter().filter(|p| p.role() == Role::Buyer) {
        tokio::spawn(run_buyer_loop(peer.clone()));
    }

    info!(n_peers = config.n_peers, "marketplace simulation running; Ctrl-C to stop");
    tokio::signal::ctrl_c().await.expect("failed to listen for ctrl-c");
    info!("shutting down, cleaning up durable state");

    warehouse_peer.remove_file();
    for peer in &peers {
        if let Some(log) = peer.log.lock().as_ref() {
            log.remove_file();
        }
    }
}

fn role_prefix(role: Role) -> &'static str {
    match role {
        Role::Buyer => "buyer",
        Role::Seller => "seller",
        Role::Trader => "trader",
        Role::Retired => "retired",
        Role::Server => "server",
    }
}
