//! End-to-end scenarios against the real coordination pipeline, driven over
//! in-process channels exactly as `main.rs` wires peers together.

use std::sync::Arc;
use std::time::Duration;

use agora::config::Config;
use agora::directory::{Directory, InMemoryDirectory};
use agora::dispatch::run_inbox;
use agora::heartbeat;
use agora::model::{Catalogue, PeerId, Role, TransactionLogEntry};
use agora::peer::Peer;
use agora::rpc::{Request, Rpc};
use agora::seller::SellerState;
use agora::trader;
use agora::warehouse_peer::{self, WarehousePeer};
use tokio::sync::mpsc;

fn test_config() -> Config {
    Config::from_args(&["trader0".into(), "4".into(), "false".into(), "5".into()]).unwrap()
}

fn spawn_inbox(peer: &Arc<Peer>) {
    let (tx, rx) = mpsc::channel(64);
    peer.directory.register(peer.id.clone(), tx);
    tokio::spawn(run_inbox(peer.clone(), rx));
}

async fn spawn_warehouse(directory: &Arc<dyn Directory>, warehouse_id: &PeerId, path: &str) -> Arc<WarehousePeer> {
    let _ = std::fs::remove_file(path);
    let wh = Arc::new(WarehousePeer::open_at(warehouse_id.clone(), path).unwrap());
    let (tx, rx) = mpsc::channel(64);
    directory.register(warehouse_id.clone(), tx);
    tokio::spawn(warehouse_peer::run(wh.clone(), rx));
    wh
}

fn seller_peer(directory: Arc<dyn Directory>, id: &str, config: Config, catalogue: Catalogue, warehouse_id: PeerId, product: &str, count: u32) -> Arc<Peer> {
    let peer = Peer::new(PeerId::new(id).unwrap(), Role::Seller, directory, config, catalogue, warehouse_id);
    *peer.seller.lock() = Some(SellerState::new(product.to_string(), count));
    peer
}

fn trader_peer(directory: Arc<dyn Directory>, id: &str, config: Config, catalogue: Catalogue, warehouse_id: PeerId) -> Arc<Peer> {
    let peer = Peer::new(PeerId::new(id).unwrap(), Role::Buyer, directory, config, catalogue, warehouse_id);
    peer.become_trader();
    peer
}

/// Registers a seller's stock with the trader's cache and the warehouse, as
/// `main.rs` does at startup via `seller::register_with_trader`.
async fn register_seller(trader: &Arc<Peer>, seller: &Arc<Peer>) {
    let (product, count) = {
        let s_guard = seller.seller.lock();
        let s = s_guard.as_ref().unwrap();
        let result = (s.product_name.lock().clone(), *s.product_count.lock());
        result
    };
    trader::handle_register_products(trader, seller.id.clone(), product, count).await;
}

#[tokio::test]
async fn happy_path_sale() {
    let directory: Arc<dyn Directory> = Arc::new(InMemoryDirectory::default());
    let catalogue = Catalogue::default_catalogue();
    let warehouse_id = PeerId::new("warehouse1").unwrap();
    let wh_path = "test_warehouse_happy_path.json";
    spawn_warehouse(&directory, &warehouse_id, wh_path).await;

    let seller = seller_peer(directory.clone(), "seller1", test_config(), catalogue.clone(), warehouse_id.clone(), "fish", 5);
    spawn_inbox(&seller);

    let trader = trader_peer(directory.clone(), "trader3", test_config(), catalogue.clone(), warehouse_id.clone());
    register_seller(&trader, &seller).await;

    let buyer = Peer::new(PeerId::new("buyer0").unwrap(), Role::Buyer, directory.clone(), test_config(), catalogue, warehouse_id);
    spawn_inbox(&buyer);

    trader::trading_lookup(&trader, buyer.id.clone(), buyer.clock.tick(), "fish".into(), 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(trader.log.lock().as_ref().unwrap().open_count(), 0);
    let warehouse = spawn_warehouse(&directory, &PeerId::new("unused9").unwrap(), wh_path).await;
    assert_eq!(warehouse.get("seller1").unwrap().product_count, 4);

    trader.log.lock().as_ref().unwrap().remove_file();
    std::fs::remove_file(wh_path).ok();
}

#[tokio::test]
async fn out_of_stock_is_reported_as_insufficient() {
    let directory: Arc<dyn Directory> = Arc::new(InMemoryDirectory::default());
    let catalogue = Catalogue::default_catalogue();
    let warehouse_id = PeerId::new("warehouse2").unwrap();
    let wh_path = "test_warehouse_out_of_stock.json";
    spawn_warehouse(&directory, &warehouse_id, wh_path).await;

    let seller = seller_peer(directory.clone(), "seller2", test_config(), catalogue.clone(), warehouse_id.clone(), "fish", 1);
    spawn_inbox(&seller);
    let trader = trader_peer(directory.clone(), "trader4", test_config(), catalogue.clone(), warehouse_id.clone());
    register_seller(&trader, &seller).await;

    let buyer = Peer::new(PeerId::new("buyer1").unwrap(), Role::Buyer, directory.clone(), test_config(), catalogue, warehouse_id);
    trader::trading_lookup(&trader, buyer.id.clone(), buyer.clock.tick(), "fish".into(), 3).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Stock untouched: the cache never found a seller with >= 3 units.
    let warehouse = spawn_warehouse(&directory, &PeerId::new("unused8").unwrap(), wh_path).await;
    assert_eq!(warehouse.get("seller2").unwrap().product_count, 1);

    trader.log.lock().as_ref().unwrap().remove_file();
    std::fs::remove_file(wh_path).ok();
}

#[tokio::test]
async fn unknown_product_reports_no_such_product() {
    let directory: Arc<dyn Directory> = Arc::new(InMemoryDirectory::default());
    let catalogue = Catalogue::default_catalogue();
    let warehouse_id = PeerId::new("warehouse3").unwrap();
    let wh_path = "test_warehouse_no_product.json";
    spawn_warehouse(&directory, &warehouse_id, wh_path).await;

    let trader = trader_peer(directory.clone(), "trader5", test_config(), catalogue.clone(), warehouse_id.clone());
    let buyer = Peer::new(PeerId::new("buyer2").unwrap(), Role::Buyer, directory.clone(), test_config(), catalogue, warehouse_id);

    trader::trading_lookup(&trader, buyer.id.clone(), buyer.clock.tick(), "boar".into(), 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(trader.log.lock().as_ref().unwrap().open_count(), 0);
    trader.log.lock().as_ref().unwrap().remove_file();
    std::fs::remove_file(wh_path).ok();
}

#[tokio::test]
async fn concurrent_buyers_resolve_by_highest_clock() {
    let directory: Arc<dyn Directory> = Arc::new(InMemoryDirectory::default());
    let catalogue = Catalogue::default_catalogue();
    let warehouse_id = PeerId::new("warehouse4").unwrap();
    let seller = seller_peer(directory.clone(), "seller3", test_config(), catalogue, warehouse_id, "salt", 10);

    let b0 = PeerId::new("buyer3").unwrap();
    let b1 = PeerId::new("buyer4").unwrap();
    {
        let s = seller.seller.lock();
        let s = s.as_ref().unwrap();
        s.add_buyer(b0.clone(), 3.0);
        s.add_buyer(b1.clone(), 5.1);
    }

    agora::seller::handle_transaction(&seller, "salt", &b1, 1).await;
    // buyer_list is cleared for the next round regardless of outcome, and
    // stock is decremented by the committed quantity.
    assert!(seller.seller.lock().as_ref().unwrap().buyer_ids().is_empty());
    assert_eq!(*seller.seller.lock().as_ref().unwrap().product_count.lock(), 9);
}

#[tokio::test]
async fn trader_failover_replays_unresolved_entry() {
    let directory: Arc<dyn Directory> = Arc::new(InMemoryDirectory::default());
    let catalogue = Catalogue::default_catalogue();
    let warehouse_id = PeerId::new("warehouse6").unwrap();
    let wh_path = "test_warehouse_failover.json";
    spawn_warehouse(&directory, &warehouse_id, wh_path).await;

    let config = Config::from_args(&["trader_a6".into(), "4".into(), "true".into(), "1".into(), "2".into()]).unwrap();

    let seller = seller_peer(directory.clone(), "seller4", config.clone(), catalogue.clone(), warehouse_id.clone(), "fish", 5);
    spawn_inbox(&seller);
    let record = agora::seller::record(&seller.id, seller.id.suffix() as i32, "fish".into(), 5);
    Rpc::call(directory.as_ref(), &seller.id, &seller.clock, &warehouse_id, Request::RegisterProductsWithWarehouse { record }).await;

    let trader_a = trader_peer(directory.clone(), "trader_a6", config.clone(), catalogue.clone(), warehouse_id.clone());
    spawn_inbox(&trader_a);
    let trader_b = trader_peer(directory.clone(), "trader_b7", config.clone(), catalogue, warehouse_id);
    spawn_inbox(&trader_b);
    trader_a.trader_set.lock().set(vec![trader_a.id.clone(), trader_b.id.clone()]);
    trader_b.trader_set.lock().set(vec![trader_a.id.clone(), trader_b.id.clone()]);

    // trader_a had already committed the warehouse side of a sale but
    // crashed before notifying the buyer — an open log entry with a seller
    // already chosen, per spec §4.3 scenario 5.
    let buyer = PeerId::new("buyer5").unwrap();
    trader_a
        .log
        .lock()
        .as_ref()
        .unwrap()
        .put_log(
            TransactionLogEntry { buyer: buyer.to_string(), seller: Some(seller.id.to_string()), product: "fish".into(), product_count: 2, completed: false },
            false,
            true,
        )
        .unwrap();

    trader_a.retire();
    assert!(!trader_b.ping(&trader_a.id).await, "a retired trader must answer ping_reply with false");

    heartbeat::handle_peer_death(&trader_b, trader_a.id.clone()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!trader_b.trader_set.lock().as_slice().contains(&trader_a.id));
    let warehouse = spawn_warehouse(&directory, &PeerId::new("unused6").unwrap(), wh_path).await;
    assert_eq!(warehouse.get("seller4").unwrap().product_count, 3);

    if let Some(log) = trader_b.log.lock().as_ref() {
        log.remove_file();
    }
    std::fs::remove_file("transactions_trader_trader_a6.json").ok();
    std::fs::remove_file(wh_path).ok();
}

#[tokio::test]
async fn election_converges_to_a_single_trader_set() {
    let directory: Arc<dyn Directory> = Arc::new(InMemoryDirectory::default());
    let catalogue = Catalogue::default_catalogue();
    let warehouse_id = PeerId::new("warehouse5").unwrap();
    let config = Config::from_args(&["peer0".into(), "6".into(), "false".into(), "5".into(), "1".into()]).unwrap();

    let mut peers = Vec::new();
    for i in 0..6 {
        let peer = Peer::new(PeerId::new(format!("peer{i}")).unwrap(), Role::Buyer, directory.clone(), config.clone(), catalogue.clone(), warehouse_id.clone());
        spawn_inbox(&peer);
        peers.push(peer);
    }

    agora::election::run_until_converged(&peers[0]).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let trader_sets: Vec<_> = peers.iter().map(|p| p.trader_set.lock().as_slice().to_vec()).collect();
    assert_eq!(trader_sets[0].len(), 1);
    for set in &trader_sets[1..] {
        assert_eq!(set.as_slice(), trader_sets[0].as_slice());
    }

    for peer in &peers {
        if let Some(log) = peer.log.lock().as_ref() {
            log.remove_file();
        }
    }
}
