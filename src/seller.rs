//! Seller-side state: the shadow `buyer_list` used for Lamport ordering,
//! and restock-on-depletion (spec §4.4 last paragraph, §3 ownership note:
//! "the authoritative buyer_list for ordering decisions lives at the
//! seller, not the trader").

use std::sync::Arc;

use parking_lot::Mutex;
use rand::thread_rng;
use tracing::info;

use crate::model::PeerId;
use crate::peer::Peer;
use crate::rpc::{Request, Response, Rpc};
use warehouse::SellerRecord;

pub struct SellerState {
    pub product_name: Mutex<String>,
    pub product_count: Mutex<u32>,
    pub seed_count: u32,
    /// `(buyer_id, lamport clock as observed when added)`. The ordering
    /// check in `transaction()` picks the maximum by clock, which the
    /// fractional suffix tie-break guarantees is unique (spec §4.4).
    buyer_list: Mutex<Vec<(PeerId, f64)>>,
}

impl SellerState {
    pub fn new(product_name: String, product_count: u32) -> Self {
        SellerState {
            product_name: Mutex::new(product_name),
            product_count: Mutex::new(product_count),
            seed_count: product_count,
            buyer_list: Mutex::new(Vec::new()),
        }
    }

    pub fn add_buyer(&self, buyer_id: PeerId, clock: f64) {
        self.buyer_list.lock().push((buyer_id, clock));
    }

    pub fn buyer_ids(&self) -> Vec<String> {
        self.buyer_list.lock().iter().map(|(id, _)| id.to_string()).collect()
    }
}

/// Registers this seller's current product with a randomly chosen live
/// trader (spec §2 Flow, §4.4 restock). Used both at startup and whenever
/// a seller restocks after depletion.
pub async fn register_with_trader(peer: &Arc<Peer>) {
    let trader = {
        let mut rng = thread_rng();
        peer.trader_set.lock().choose(&mut rng)
    };
    let Some(trader) = trader else {
        return;
    };
    let (product_name, product_count) = {
        let seller_guard = peer.seller.lock();
        let seller = seller_guard.as_ref().expect("register_with_trader called on a non-seller peer");
        let result = (seller.product_name.lock().clone(), *seller.product_count.lock());
        result
    };
    info!(peer = %peer.id, %trader, product = %product_name, count = product_count, "registering products with trader");
    Rpc::call(
        peer.directory.as_ref(),
        &peer.id,
        &peer.clock,
        &trader,
        Request::RegisterProducts { product_name, product_count },
    )
    .await;
}

/// Inbound `transaction(...)` from the trader: run the ordering check over
/// this round's shadow `buyer_list`, decrement local stock by the committed
/// quantity, and log the winner. Every other concurrent entrant for this
/// round silently loses — the spec describes no further RPC for them, only
/// the trader's own per-party notifications to the buyer it actually
/// committed against and to this seller.
pub async fn handle_transaction(
    peer: &Arc<Peer>,
    product: &str,
    committed_buyer: &PeerId,
    count: u32,
) -> Response {
    let winner = {
        let seller_guard = peer.seller.lock();
        let seller = seller_guard.as_ref().unwrap();
        let mut buyer_list = seller.buyer_list.lock();
        let winner = buyer_list
            .iter()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
            .map(|(id, _)| id.clone());
        buyer_list.clear();
        let mut stock = seller.product_count.lock();
        *stock = stock.saturating_sub(count);
        drop(stock);
        winner
    };
    match &winner {
        Some(id) if id == committed_buyer => {
            info!(peer = %peer.id, buyer = %id, product, "sold to buyer (ordering check confirms committed buyer)");
        }
        Some(id) => {
            info!(peer = %peer.id, buyer = %id, committed = %committed_buyer, product, "ordering check picked a different buyer than the trader's commit; trader's commit still stands");
        }
        None => {
            info!(peer = %peer.id, buyer = %committed_buyer, product, "sold to buyer");
        }
    }
    maybe_restock(peer).await;
    Response::Ack
}

/// When `product_count` reaches zero, pick a new random product from the
/// catalogue, reset the count to its seed value, clear `buyer_list`, push
/// the reset to the warehouse of record, and re-register with a randomly
/// chosen live trader (spec §4.4).
async fn maybe_restock(peer: &Arc<Peer>) {
    let depleted = {
        let seller_guard = peer.seller.lock();
        let seller = seller_guard.as_ref().unwrap();
        let result = *seller.product_count.lock() == 0;
        result
    };
    if !depleted {
        return;
    }
    let new_product = {
        let mut rng = thread_rng();
        peer.catalogue.choose(&mut rng)
    };
    let seed_count = {
        let seller = peer.seller.lock();
        let seller = seller.as_ref().unwrap();
        *seller.product_name.lock() = new_product.clone();
        *seller.product_count.lock() = seller.seed_count;
        seller.buyer_list.lock().clear();
        seller.seed_count
    };
    info!(peer = %peer.id, product = %new_product, "restocked after depletion");
    Rpc::call(
        peer.directory.as_ref(),
        &peer.id,
        &peer.clock,
        &peer.warehouse_id,
        Request::Restock { seller_id: peer.id.clone(), product_name: new_product, product_count: seed_count },
    )
    .await;
    register_with_trader(peer).await;
}

/// Builds the cache-facing record a trader stores for this seller, used
/// when the trader handles `register_products` (spec §4.5 shape).
pub fn record(seller_id: &PeerId, bully_id: i32, product_name: String, product_count: u32) -> SellerRecord {
    SellerRecord::new(seller_id.as_str(), bully_id, product_name, product_count)
}
