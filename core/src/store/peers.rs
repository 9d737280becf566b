// Peer storage
//
// Peer records are created on first sighting and updated in place after
// that. Nothing in the core deletes them.

use crate::store::backend::{StorageBackend, StoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Characters of the device id used as the default display name
pub const DEFAULT_NAME_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub id: String,
    /// Unix millis of the most recent durable observation
    pub last_seen: u64,
    pub status: PeerStatus,
    /// Display label. Survives updates unless explicitly renamed.
    pub name: String,
    #[serde(default)]
    pub rssi: Option<i16>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
}

impl PeerRecord {
    /// Record for a peer seen for the first time
    pub fn first_sighting(id: &str, now_ms: u64) -> Self {
        Self {
            id: id.to_string(),
            last_seen: now_ms,
            status: PeerStatus::Connected,
            name: default_name(id),
            rssi: None,
            avatar: None,
            bio: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == PeerStatus::Connected
    }
}

/// Default display label: first six characters of the id
pub fn default_name(id: &str) -> String {
    id.chars().take(DEFAULT_NAME_LEN).collect()
}

#[derive(Clone)]
pub struct PeerStore {
    backend: Arc<dyn StorageBackend>,
}

impl PeerStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Insert or overwrite a peer record
    pub fn save(&self, peer: &PeerRecord) -> Result<(), StoreError> {
        let value = serde_json::to_vec(peer)?;
        self.backend.put(peer.id.as_bytes(), &value)?;
        self.backend.flush()?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<PeerRecord>, StoreError> {
        match self.backend.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All peers, ordered by id
    pub fn all(&self) -> Result<Vec<PeerRecord>, StoreError> {
        self.backend
            .scan_prefix(b"")?
            .into_iter()
            .map(|(_, value)| serde_json::from_slice(&value).map_err(StoreError::from))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.backend.count_prefix(b"").unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::backend::MemoryStorage;

    #[test]
    fn test_first_sighting_defaults() {
        let peer = PeerRecord::first_sighting("ABCDEF123456", 42);
        assert_eq!(peer.name, "ABCDEF");
        assert_eq!(peer.last_seen, 42);
        assert!(peer.is_connected());
    }

    #[test]
    fn test_save_overwrites() {
        let store = PeerStore::new(Arc::new(MemoryStorage::new()));
        let mut peer = PeerRecord::first_sighting("ABCDEF123456", 1);
        store.save(&peer).unwrap();

        peer.last_seen = 2;
        store.save(&peer).unwrap();

        assert_eq!(store.count(), 1);
        assert_eq!(store.get("ABCDEF123456").unwrap().unwrap().last_seen, 2);
    }

    #[test]
    fn test_missing_optional_fields_deserialize() {
        let json = r#"{"id":"ABCDEF123456","last_seen":5,"status":"connected","name":"Al"}"#;
        let peer: PeerRecord = serde_json::from_str(json).unwrap();
        assert_eq!(peer.rssi, None);
        assert_eq!(peer.name, "Al");
    }
}
