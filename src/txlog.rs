//! Per-trader write-ahead transaction log, used for failover replay.
//!
//! Each trader owns exactly one log file, `transactions_trader_<id>.json`
//! (spec §3 ownership, §4.6). Same atomic-rename discipline as
//! [`warehouse::Warehouse`]: load the whole file, mutate, write to a `.tmp`
//! sibling, rename over the target.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{MarketError, Result};
use crate::model::TransactionLogEntry;

pub struct TransactionLog {
    path: PathBuf,
    entries: Mutex<HashMap<String, TransactionLogEntry>>,
}

impl TransactionLog {
    pub fn open(trader_id: &str) -> Result<Self> {
        let path = PathBuf::from(format!("transactions_trader_{}.json", trader_id));
        let entries = load(&path)?;
        Ok(TransactionLog { path, entries: Mutex::new(entries) })
    }

    /// `put_log(entry, completed, available)`: if the transaction is still
    /// open and the product is available, insert/update; otherwise the
    /// entry is removed (spec §4.6). A completed entry therefore simply
    /// vanishes from the log rather than being marked done in place.
    pub fn put_log(&self, entry: TransactionLogEntry, completed: bool, available: bool) -> Result<()> {
        let mut entries = self.entries.lock();
        if !completed && available {
            entries.insert(entry.buyer.clone(), entry);
        } else {
            entries.remove(&entry.buyer);
        }
        save(&self.path, &entries)
    }

    pub fn get(&self, buyer_id: &str) -> Option<TransactionLogEntry> {
        self.entries.lock().get(buyer_id).cloned()
    }

    /// All entries with `completed == false`: the unresolved work a dead
    /// trader leaves behind for its survivor to replay (spec §4.3).
    pub fn unresolved(&self) -> Vec<TransactionLogEntry> {
        self.entries.lock().values().filter(|e| !e.completed).cloned().collect()
    }

    pub fn open_count(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn remove_file(&self) {
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                debug!(path = %self.path.display(), %err, "failed to remove transaction log on shutdown");
            }
        }
    }
}

fn load(path: &PathBuf) -> Result<HashMap<String, TransactionLogEntry>> {
    match fs::read(path) {
        Ok(bytes) if bytes.is_empty() => Ok(HashMap::new()),
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map_err(|source| MarketError::Serialize { path: path.clone(), source }),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(source) => Err(MarketError::Io { path: path.clone(), source }),
    }
}

fn save(path: &PathBuf, entries: &HashMap<String, TransactionLogEntry>) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let bytes = serde_json::to_vec_pretty(entries)
        .map_err(|source| MarketError::Serialize { path: tmp.clone(), source })?;
    fs::write(&tmp, bytes).map_err(|source| MarketError::Io { path: tmp.clone(), source })?;
    fs::rename(&tmp, path).map_err(|source| MarketError::Io { path: path.clone(), source })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_log<F: FnOnce(&TransactionLog)>(name: &str, f: F) {
        let path = PathBuf::from(format!("transactions_trader_{}.json", name));
        let _ = fs::remove_file(&path);
        let log = TransactionLog::open(name).unwrap();
        f(&log);
        log.remove_file();
    }

    #[test]
    fn open_entry_is_persisted_and_closed_on_completion() {
        with_log("test-open-close", |log| {
            let entry = TransactionLogEntry::pending(
                &crate::model::PeerId::new("buyer0").unwrap(),
                "fish",
                1,
            );
            log.put_log(entry.clone(), false, true).unwrap();
            assert_eq!(log.open_count(), 1);
            log.put_log(entry, true, true).unwrap();
            assert_eq!(log.open_count(), 0);
        });
    }

    #[test]
    fn unresolved_excludes_completed() {
        with_log("test-unresolved", |log| {
            let a = TransactionLogEntry::pending(&crate::model::PeerId::new("buyer1").unwrap(), "salt", 1);
            let mut b = TransactionLogEntry::pending(&crate::model::PeerId::new("buyer2").unwrap(), "wool", 1);
            b.completed = true;
            log.put_log(a, false, true).unwrap();
            log.put_log(b.clone(), false, true).unwrap();
            // b was inserted as open then immediately marked complete below.
            log.put_log(b, true, true).unwrap();
            let unresolved = log.unresolved();
            assert_eq!(unresolved.len(), 1);
            assert_eq!(unresolved[0].buyer, "buyer1");
        });
    }
}
