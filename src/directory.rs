//! The naming substrate peers register themselves with.
//!
//! Out of scope per spec §1 ("name-server bootstrap ... external
//! collaborators; the core consumes from them only a directory service").
//! This is the minimal in-process stand-in: an endpoint is an `mpsc`
//! channel into a peer's inbox task, so "looking up an endpoint" and
//! "opening a connection" are the same cheap clone.

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::model::PeerId;
use crate::rpc::Envelope;

pub type Endpoint = mpsc::Sender<Envelope>;

/// `list`, `lookup`, `register` — the three operations spec §6 requires of
/// the directory.
pub trait Directory: Send + Sync {
    fn list(&self) -> Vec<PeerId>;
    fn lookup(&self, id: &PeerId) -> Option<Endpoint>;
    fn register(&self, id: PeerId, endpoint: Endpoint);
}

#[derive(Default)]
pub struct InMemoryDirectory {
    peers: DashMap<PeerId, Endpoint>,
}

impl Directory for InMemoryDirectory {
    fn list(&self) -> Vec<PeerId> {
        self.peers.iter().map(|e| e.key().clone()).collect()
    }

    fn lookup(&self, id: &PeerId) -> Option<Endpoint> {
        self.peers.get(id).map(|e| e.value().clone())
    }

    fn register(&self, id: PeerId, endpoint: Endpoint) {
        self.peers.insert(id, endpoint);
    }
}
