// Store module — message, peer and dedup persistence

pub mod backend;
pub mod dedup;
pub mod messages;
pub mod peers;

pub use backend::{MemoryStorage, SledStorage, StorageBackend, StoreError};
pub use dedup::DedupCache;
pub use messages::MessageStore;
pub use peers::{default_name, PeerRecord, PeerStatus, PeerStore};

use std::path::Path;
use std::sync::Arc;

const MESSAGES_TREE: &str = "messages";
const PEERS_TREE: &str = "peers";
const DEDUP_TREE: &str = "dedup";
const IDENTITY_TREE: &str = "identity";

/// One backend per concern. Persistent backends share a single sled database.
#[derive(Clone)]
pub struct Storage {
    pub messages: Arc<dyn StorageBackend>,
    pub peers: Arc<dyn StorageBackend>,
    pub dedup: Arc<dyn StorageBackend>,
    pub identity: Arc<dyn StorageBackend>,
}

impl Storage {
    /// Volatile storage, lost on drop
    pub fn memory() -> Self {
        Self {
            messages: Arc::new(MemoryStorage::new()),
            peers: Arc::new(MemoryStorage::new()),
            dedup: Arc::new(MemoryStorage::new()),
            identity: Arc::new(MemoryStorage::new()),
        }
    }

    /// Sled-backed storage rooted at `path`
    pub fn persistent(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = SledStorage::open_db(path)?;
        Ok(Self {
            messages: Arc::new(SledStorage::tree(&db, MESSAGES_TREE)?),
            peers: Arc::new(SledStorage::tree(&db, PEERS_TREE)?),
            dedup: Arc::new(SledStorage::tree(&db, DEDUP_TREE)?),
            identity: Arc::new(SledStorage::tree(&db, IDENTITY_TREE)?),
        })
    }

    pub fn message_store(&self) -> MessageStore {
        MessageStore::new(self.messages.clone())
    }

    pub fn peer_store(&self) -> PeerStore {
        PeerStore::new(self.peers.clone())
    }
}
