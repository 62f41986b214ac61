//! Durable, single-writer store of seller inventories.
//!
//! The warehouse is the authoritative copy of every [`SellerRecord`]. Trader
//! processes hold a cache that may lag behind it, but must never let a
//! commit exceed what the warehouse actually has on hand. The file is
//! rewritten whole on every mutation: read, mutate in memory, write to a
//! sibling `.tmp` path, then `rename` it over the target so a reader never
//! observes a half-written file.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("warehouse I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("warehouse file corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WarehouseError>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SellerHandle {
    pub bully_id: i32,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SellerRecord {
    pub seller: SellerHandle,
    pub product_name: String,
    pub product_count: u32,
    pub buyer_list: Vec<String>,
}

impl SellerRecord {
    pub fn new(seller_id: impl Into<String>, bully_id: i32, product_name: impl Into<String>, product_count: u32) -> Self {
        SellerRecord {
            seller: SellerHandle { bully_id, id: seller_id.into() },
            product_name: product_name.into(),
            product_count,
            buyer_list: Vec::new(),
        }
    }
}

type Records = HashMap<String, SellerRecord>;

/// Persistent key-value store over `seller_id -> SellerRecord`.
///
/// A single [`parking_lot::Mutex`] serialises every read-modify-write so two
/// writers can never interleave; the lock is held for the full
/// load-mutate-save cycle of each operation.
pub struct Warehouse {
    path: PathBuf,
    records: Mutex<Records>,
}

impl Warehouse {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = load(&path)?;
        Ok(Warehouse { path, records: Mutex::new(records) })
    }

    /// Additive registration: a fresh seller is inserted as-is; a seller
    /// already on file has `product_count` increased by the new amount.
    /// Per the resolved "additive vs. replacing" open question, repeat
    /// registrations accumulate rather than overwrite.
    pub fn register_products_with_warehouse(&self, seller: SellerRecord) -> Result<SellerRecord> {
        let mut records = self.records.lock();
        let entry = records
            .entry(seller.seller.id.clone())
            .and_modify(|existing| {
                existing.product_count += seller.product_count;
                existing.product_name = seller.product_name.clone();
            })
            .or_insert_with(|| seller.clone());
        let snapshot = entry.clone();
        save(&self.path, &records)?;
        debug!(seller = %snapshot.seller.id, count = snapshot.product_count, "registered products with warehouse");
        Ok(snapshot)
    }

    /// Authoritative decrement on commit: removes `item_count` units from
    /// `seller_id` and appends `buyer_id` to the persistent buyer list.
    /// Returns the post-commit record, or `None` if the seller is unknown
    /// or supply is insufficient (callers must not have reached here in
    /// that case; this is a defensive check, not the primary guard).
    pub fn update_warehouse(
        &self,
        seller_id: &str,
        item_count: u32,
        buyer_id: &str,
    ) -> Result<Option<SellerRecord>> {
        let mut records = self.records.lock();
        let updated = match records.get_mut(seller_id) {
            Some(record) if record.product_count >= item_count => {
                record.product_count -= item_count;
                record.buyer_list.push(buyer_id.to_string());
                Some(record.clone())
            }
            Some(_) => {
                warn!(seller = seller_id, "warehouse commit rejected: insufficient stock");
                None
            }
            None => {
                warn!(seller = seller_id, "warehouse commit rejected: unknown seller");
                None
            }
        };
        if updated.is_some() {
            save(&self.path, &records)?;
        }
        Ok(updated)
    }

    /// Resets a seller's persisted record after it restocks with a new
    /// product (buyer list cleared, count reset to the seed value).
    pub fn restock(&self, seller_id: &str, product_name: impl Into<String>, product_count: u32) -> Result<()> {
        let mut records = self.records.lock();
        if let Some(record) = records.get_mut(seller_id) {
            record.product_name = product_name.into();
            record.product_count = product_count;
            record.buyer_list.clear();
        }
        save(&self.path, &records)
    }

    pub fn get(&self, seller_id: &str) -> Option<SellerRecord> {
        self.records.lock().get(seller_id).cloned()
    }

    pub fn snapshot(&self) -> Vec<SellerRecord> {
        self.records.lock().values().cloned().collect()
    }

    pub fn remove_file(&self) {
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), %err, "failed to remove warehouse file on shutdown");
            }
        }
    }
}

fn load(path: &Path) -> Result<Records> {
    match fs::read(path) {
        Ok(bytes) if bytes.is_empty() => Ok(HashMap::new()),
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(source) => Err(WarehouseError::Io { path: path.to_path_buf(), source }),
    }
}

fn save(path: &Path, records: &Records) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let bytes = serde_json::to_vec_pretty(records)?;
    fs::write(&tmp, bytes).map_err(|source| WarehouseError::Io { path: tmp.clone(), source })?;
    fs::rename(&tmp, path).map_err(|source| WarehouseError::Io { path: path.to_path_buf(), source })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("agora-warehouse-test-{}-{}.json", name, std::process::id()))
    }

    #[test]
    fn register_is_additive() {
        let path = temp_path("additive");
        let _ = fs::remove_file(&path);
        let wh = Warehouse::open(&path).unwrap();
        wh.register_products_with_warehouse(SellerRecord::new("s1", 10, "fish", 5)).unwrap();
        wh.register_products_with_warehouse(SellerRecord::new("s1", 10, "fish", 3)).unwrap();
        assert_eq!(wh.get("s1").unwrap().product_count, 8);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn update_never_oversells() {
        let path = temp_path("oversell");
        let _ = fs::remove_file(&path);
        let wh = Warehouse::open(&path).unwrap();
        wh.register_products_with_warehouse(SellerRecord::new("s1", 10, "fish", 1)).unwrap();
        assert!(wh.update_warehouse("s1", 3, "b0").unwrap().is_none());
        assert_eq!(wh.get("s1").unwrap().product_count, 1);
        let committed = wh.update_warehouse("s1", 1, "b0").unwrap().unwrap();
        assert_eq!(committed.product_count, 0);
        assert_eq!(committed.buyer_list, vec!["b0".to_string()]);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn reopen_reloads_state() {
        let path = temp_path("reload");
        let _ = fs::remove_file(&path);
        {
            let wh = Warehouse::open(&path).unwrap();
            wh.register_products_with_warehouse(SellerRecord::new("s1", 10, "fish", 5)).unwrap();
        }
        let wh = Warehouse::open(&path).unwrap();
        assert_eq!(wh.get("s1").unwrap().product_count, 5);
        fs::remove_file(&path).ok();
    }
}
