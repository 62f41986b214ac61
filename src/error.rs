use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced across the crate's internal boundaries.
///
/// Routine RPC failures (unreachable peer, dropped reply) are *not*
/// represented here — per the spec's cancellation model those are silent
/// NACKs handled by [`crate::rpc::Rpc::call`] returning `None`, not an
/// `Err`. This enum is reserved for failures that abort the operation that
/// hit them: log/warehouse I/O, bad configuration, malformed persisted
/// state.
#[derive(Debug, Error)]
pub enum MarketError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON in {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("warehouse error: {0}")]
    Warehouse(#[from] warehouse::WarehouseError),

    #[error("invalid peer id {0:?}: must be non-empty and end in a digit")]
    InvalidPeerId(String),

    #[error("bad configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, MarketError>;
