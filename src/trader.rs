//! `TraderCore`: the transaction pipeline (spec §4.4).

use std::sync::Arc;

use rand::thread_rng;
use tracing::{debug, warn};
use warehouse::SellerRecord;

use crate::model::{PeerId, Role, TransactionLogEntry};
use crate::peer::Peer;
use crate::rpc::{Request, Response, Rpc};
use crate::seller;

/// Inbound `register_products(seller_info)`: update the trader's cache and
/// forward to the warehouse (spec §4.5, §6 table row 1).
pub async fn handle_register_products(
    peer: &Arc<Peer>,
    seller_id: PeerId,
    product_name: String,
    product_count: u32,
) -> Response {
    if peer.role() != Role::Trader {
        return Response::Ack;
    }
    let record = seller::record(&seller_id, seller_id.suffix() as i32, product_name, product_count);
    {
        let mut cache = peer.cache.lock();
        cache
            .entry(seller_id.to_string())
            .and_modify(|existing| {
                existing.product_count += record.product_count;
                existing.product_name = record.product_name.clone();
            })
            .or_insert_with(|| record.clone());
    }
    let reply = Rpc::call(
        peer.directory.as_ref(),
        &peer.id,
        &peer.clock,
        &peer.warehouse_id,
        Request::RegisterProductsWithWarehouse { record },
    )
    .await;
    match reply {
        Some(Response::Seller(Some(stored))) => Response::Seller(Some(stored)),
        _ => {
            warn!(trader = %peer.id, seller = %seller_id, "warehouse did not acknowledge registration");
            Response::Ack
        }
    }
}

/// `trading_lookup(buyer_info, item, item_count)` — the full pipeline from
/// spec §4.4, steps 1–4. Single-threaded per trader via `fail_sem`.
pub async fn trading_lookup(peer: &Arc<Peer>, buyer_id: PeerId, buyer_clock: f64, item: String, count: u32) {
    if peer.role() != Role::Trader {
        // Late-arriving request to a demoted trader: dropped silently.
        return;
    }
    let _guard = peer.fail_sem.lock().await;

    if peer.log.lock().is_none() {
        warn!(trader = %peer.id, "trading_lookup with no open transaction log");
        return;
    }
    write_log(peer, &TransactionLogEntry::pending(&buyer_id, &item, count));

    let chosen = find_seller(peer, &item, count).await;
    complete_lookup(peer, buyer_id, buyer_clock, item, count, chosen).await;
}

/// Step 2/3: cache probe, falling back to a warehouse reload on miss or
/// when caching is disabled (spec §4.4, §9 resolved: no cross-trader cache
/// invalidation — always reload from the warehouse, never from a peer).
async fn find_seller(peer: &Arc<Peer>, item: &str, count: u32) -> Option<SellerRecord> {
    if peer.config.with_cache {
        if let Some(record) = probe_cache(peer, item, count) {
            return Some(record);
        }
    }
    reload_cache(peer).await;
    probe_cache(peer, item, count)
}

fn probe_cache(peer: &Arc<Peer>, item: &str, count: u32) -> Option<SellerRecord> {
    let cache = peer.cache.lock();
    cache
        .values()
        .find(|record| {
            record.product_name == item
                && record.product_count >= count
                && record.seller.id != peer.id.as_str()
        })
        .cloned()
}

async fn reload_cache(peer: &Arc<Peer>) {
    let reply = Rpc::call(
        peer.directory.as_ref(),
        &peer.id,
        &peer.clock,
        &peer.warehouse_id,
        Request::LoadState,
    )
    .await;
    if let Some(Response::Snapshot(records)) = reply {
        let mut cache = peer.cache.lock();
        cache.clear();
        for record in records {
            cache.insert(record.seller.id.clone(), record);
        }
    }
}

/// Whether any seller at all carries `item`, regardless of quantity — used
/// to distinguish "no such product" from "insufficient supply" (spec §4.4
/// outcomes, §8 scenarios 2 and 3).
fn product_exists(peer: &Arc<Peer>, item: &str) -> bool {
    peer.cache.lock().values().any(|r| r.product_name == item)
}

/// Steps 4(a-g): commit against the chosen seller, or notify the buyer of
/// the two failure outcomes.
async fn complete_lookup(
    peer: &Arc<Peer>,
    buyer_id: PeerId,
    buyer_clock: f64,
    item: String,
    count: u32,
    chosen: Option<SellerRecord>,
) {
    let Some(record) = chosen else {
        let insufficient = product_exists(peer, &item);
        notify_buyer(peer, &buyer_id, &item, count, false, insufficient).await;
        clear_log(peer, &buyer_id);
        return;
    };

    let Ok(seller_id) = crate::model::PeerId::new(record.seller.id.clone()) else {
        warn!(trader = %peer.id, seller = %record.seller.id, "cache held a malformed seller id");
        clear_log(peer, &buyer_id);
        return;
    };

    // 4a: decrement cache, append to cache buyer list.
    {
        let mut cache = peer.cache.lock();
        if let Some(cached) = cache.get_mut(seller_id.as_str()) {
            cached.product_count = cached.product_count.saturating_sub(count);
            cached.buyer_list.push(buyer_id.to_string());
        }
    }

    // 4b: addBuyer on the seller (shadow list for ordering).
    Rpc::call(
        peer.directory.as_ref(),
        &peer.id,
        &peer.clock,
        &seller_id,
        Request::AddBuyer { buyer_id: buyer_id.clone(), buyer_clock },
    )
    .await;

    // 4c: authoritative warehouse commit.
    let committed = Rpc::call(
        peer.directory.as_ref(),
        &peer.id,
        &peer.clock,
        &peer.warehouse_id,
        Request::UpdateWarehouse { seller_id: seller_id.clone(), item_count: count, buyer_id: buyer_id.clone() },
    )
    .await;
    let Some(Response::Seller(Some(_))) = committed else {
        warn!(trader = %peer.id, seller = %seller_id, "warehouse rejected commit after cache said stock was available");
        notify_buyer(peer, &buyer_id, &item, count, false, true).await;
        clear_log(peer, &buyer_id);
        return;
    };

    // 4d: log updated with the chosen seller, still open.
    write_log(peer, &TransactionLogEntry { buyer: buyer_id.to_string(), seller: Some(seller_id.to_string()), product: item.clone(), product_count: count, completed: false });

    // 4e: seller runs its ordering check.
    Rpc::call(
        peer.directory.as_ref(),
        &peer.id,
        &peer.clock,
        &seller_id,
        Request::Transaction {
            product: item.clone(),
            buyer_id: buyer_id.clone(),
            seller_id: seller_id.clone(),
            trader_id: peer.id.clone(),
            buyer_success: false,
            insufficient: false,
            count,
        },
    )
    .await;

    // 4f: log closed.
    clear_log(peer, &buyer_id);

    // 4g: terminal notification to the buyer.
    notify_buyer_with_seller(peer, &buyer_id, &item, count, Some(seller_id)).await;
}

async fn notify_buyer(peer: &Arc<Peer>, buyer_id: &PeerId, item: &str, count: u32, success: bool, insufficient: bool) {
    Rpc::call(
        peer.directory.as_ref(),
        &peer.id,
        &peer.clock,
        buyer_id,
        Request::Transaction {
            product: item.to_string(),
            buyer_id: buyer_id.clone(),
            seller_id: peer.id.clone(),
            trader_id: peer.id.clone(),
            buyer_success: success,
            insufficient,
            count,
        },
    )
    .await;
}

async fn notify_buyer_with_seller(peer: &Arc<Peer>, buyer_id: &PeerId, item: &str, count: u32, seller_id: Option<PeerId>) {
    let seller_id = seller_id.unwrap_or_else(|| peer.id.clone());
    Rpc::call(
        peer.directory.as_ref(),
        &peer.id,
        &peer.clock,
        buyer_id,
        Request::Transaction {
            product: item.to_string(),
            buyer_id: buyer_id.clone(),
            seller_id,
            trader_id: peer.id.clone(),
            buyer_success: true,
            insufficient: false,
            count,
        },
    )
    .await;
    debug!(trader = %peer.id, buyer = %buyer_id, "notified buyer of purchase");
}

fn write_log(peer: &Arc<Peer>, entry: &TransactionLogEntry) {
    if let Some(log) = peer.log.lock().as_ref() {
        if let Err(err) = log.put_log(entry.clone(), entry.completed, true) {
            warn!(trader = %peer.id, %err, "failed to persist transaction log entry");
        }
    }
}

fn clear_log(peer: &Arc<Peer>, buyer_id: &PeerId) {
    if let Some(log) = peer.log.lock().as_ref() {
        let entry = TransactionLogEntry::pending(buyer_id, "", 0);
        if let Err(err) = log.put_log(entry, true, true) {
            warn!(trader = %peer.id, %err, "failed to clear transaction log entry");
        }
    }
}

/// Replay of a dead trader's unfinished entry (spec §4.3 step 3–4): `"_"`
/// (here `None`) re-enters the pipeline from scratch; a concrete seller id
/// means a seller had already been chosen, so the survivor resumes
/// straight at the commit sub-steps against that seller.
pub async fn trading_unresolved_lookup(peer: &Arc<Peer>, entry: TransactionLogEntry) {
    let Ok(buyer_id) = PeerId::new(entry.buyer.clone()) else {
        return;
    };
    let _guard = peer.fail_sem.lock().await;
    // The replaying trader did not itself observe the buyer's arrival
    // clock; it derives one locally so ordering still advances correctly.
    let buyer_clock = peer.clock.observe(peer.clock.read());

    match entry.seller {
        None => {
            write_log(peer, &entry);
            let chosen = find_seller(peer, &entry.product, entry.product_count).await;
            complete_lookup(peer, buyer_id, buyer_clock, entry.product, entry.product_count, chosen).await;
        }
        Some(seller_id) => {
            let Ok(seller_id) = PeerId::new(seller_id) else { return };
            let record = {
                let cache = peer.cache.lock();
                cache.get(seller_id.as_str()).cloned()
            };
            let record = match record {
                Some(r) => Some(r),
                None => {
                    reload_cache(peer).await;
                    peer.cache.lock().get(seller_id.as_str()).cloned()
                }
            };
            complete_lookup(peer, buyer_id, buyer_clock, entry.product, entry.product_count, record).await;
        }
    }
}

pub fn random_trader(peer: &Arc<Peer>) -> Option<PeerId> {
    let mut rng = thread_rng();
    peer.trader_set.lock().choose(&mut rng)
}
