//! Core data types shared across the coordination engine.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::suffix_digit;
use crate::error::{MarketError, Result};

/// A peer identity. Cheaply cloneable; caches the numeric suffix digit used
/// for Lamport tie-breaking so it's never re-parsed per operation (spec §9).
#[derive(Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PeerId(Arc<str>);

impl PeerId {
    pub fn new(id: impl Into<Arc<str>>) -> Result<Self> {
        let id = id.into();
        if suffix_digit(&id).is_none() {
            return Err(MarketError::InvalidPeerId(id.to_string()));
        }
        Ok(PeerId(id))
    }

    pub fn suffix(&self) -> u8 {
        suffix_digit(&self.0).expect("validated at construction")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.0)
    }
}

/// Role state machine. Transitions are expressed as methods on [`crate::peer::Peer`]
/// rather than string comparisons (spec §9 design note).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Buyer,
    Seller,
    Trader,
    Retired,
    Server,
}

impl Role {
    pub fn is_trader(self) -> bool {
        matches!(self, Role::Trader)
    }

    pub fn is_retired(self) -> bool {
        matches!(self, Role::Retired)
    }

    /// Peers excluded from election participation: already a trader, or the
    /// dedicated warehouse server. Resolves spec §9's open question on
    /// `setDefaultFlags` against an already-elected peer: exclude.
    pub fn excluded_from_election(self) -> bool {
        matches!(self, Role::Trader | Role::Server)
    }
}

/// A single in-flight match, keyed by buyer id within one trader's log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionLogEntry {
    pub buyer: String,
    /// `None` stands in for the spec's `"_"` sentinel: no seller chosen yet.
    pub seller: Option<String>,
    pub product: String,
    pub product_count: u32,
    pub completed: bool,
}

impl TransactionLogEntry {
    pub fn pending(buyer: &PeerId, product: &str, product_count: u32) -> Self {
        TransactionLogEntry {
            buyer: buyer.to_string(),
            seller: None,
            product: product.to_string(),
            product_count,
            completed: false,
        }
    }
}

/// The configured product catalogue sellers draw from on registration and
/// restock (spec §4.4, supplemented from `original_source/`'s `peer.py`,
/// which hard-codes a product name list the distilled spec dropped).
#[derive(Debug, Clone)]
pub struct Catalogue(Vec<String>);

impl Catalogue {
    pub fn new(products: Vec<String>) -> Self {
        assert!(!products.is_empty(), "catalogue must not be empty");
        Catalogue(products)
    }

    pub fn default_catalogue() -> Self {
        Catalogue(
            ["fish", "salt", "boar", "wheat", "wine", "wool"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }

    pub fn choose(&self, rng: &mut impl rand::Rng) -> String {
        use rand::seq::SliceRandom;
        self.0.choose(rng).expect("non-empty catalogue").clone()
    }
}

/// Ordered set of currently-live trader ids. Buyers sample it uniformly at
/// random; it is mutated only by `set_trader`/`remove_trader` during
/// election convergence and failover.
#[derive(Debug, Default, Clone)]
pub struct TraderSet(Vec<PeerId>);

impl TraderSet {
    pub fn insert(&mut self, id: PeerId) {
        if !self.0.contains(&id) {
            self.0.push(id);
        }
    }

    pub fn remove(&mut self, id: &PeerId) {
        self.0.retain(|t| t != id);
    }

    pub fn set(&mut self, ids: Vec<PeerId>) {
        self.0 = ids;
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn choose(&self, rng: &mut impl rand::Rng) -> Option<PeerId> {
        use rand::seq::SliceRandom;
        self.0.choose(rng).cloned()
    }

    pub fn other_than(&self, id: &PeerId) -> Option<PeerId> {
        self.0.iter().find(|t| *t != id).cloned()
    }

    pub fn as_slice(&self) -> &[PeerId] {
        &self.0
    }
}

/// The three flags the Bully algorithm resets on every election round.
#[derive(Debug, Default, Clone, Copy)]
pub struct ElectionFlags {
    pub recv_ok: bool,
    pub recv_won: bool,
    pub send_won: bool,
}
