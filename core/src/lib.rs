// BLE Mesh Core — flood routing over advertisement broadcasts
//
// Devices announce themselves with 12-char presence advertisements and
// carry short text messages as `ID:content` payloads of at most 31 bytes.
// Every receiver stores a message once, refreshes the sender's presence
// and re-broadcasts while the hop budget lasts.

pub mod config;
pub mod identity;
pub mod message;
pub mod routing;
pub mod service;
pub mod store;
pub mod transport;

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub use config::{ConfigError, MeshConfig};
pub use identity::{
    IdentityError, IdentityManager, IdentityProvider, IdentityStore, UnkeyedIdentity,
};
pub use message::{
    decode, encode_message, encode_presence, Advertisement, MessageEnvelope, MessageType,
    Recipient, WireError,
};
pub use routing::{
    EventSink, FloodRouter, PresenceUpdate, RelayDecision, RouteOutcome, RouterEvent,
};
pub use service::{MeshHandle, MeshService};
pub use store::{PeerRecord, PeerStatus, Storage, StoreError};
pub use transport::{LoopbackAir, LoopbackRadio, RadioTransport, ScanObservation, TransportError};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error)]
pub enum FloodError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Mesh service is not running")]
    NotRunning,
}

/// Milliseconds since the Unix epoch
pub fn current_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ============================================================================
// MESH NODE
// ============================================================================

/// Storage plus a signing identity: everything a router needs to start
pub struct MeshNode {
    storage: Storage,
    identity: Arc<IdentityManager>,
}

impl MeshNode {
    /// Volatile node with a throwaway identity
    pub fn in_memory() -> Self {
        Self {
            storage: Storage::memory(),
            identity: Arc::new(IdentityManager::ephemeral()),
        }
    }

    /// Open (or create) a node rooted at `path`. Keys are generated on
    /// first open and reused afterwards.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FloodError> {
        let path = path.as_ref();
        tracing::info!("Opening mesh storage at {}", path.display());

        let storage = Storage::persistent(path)?;
        let identity = IdentityManager::open(IdentityStore::persistent(storage.identity.clone()))
            .map_err(|e| IdentityError::KeyStore(e.to_string()))?;

        Ok(Self {
            storage,
            identity: Arc::new(identity),
        })
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn identity(&self) -> &IdentityManager {
        &self.identity
    }

    pub fn device_id(&self) -> &str {
        self.identity.device_id()
    }

    /// Replace the stored key pair, and with it the device id. Fails while
    /// a router built from this node still holds the identity.
    pub fn regenerate_identity(&mut self) -> Result<(), FloodError> {
        let Some(identity) = Arc::get_mut(&mut self.identity) else {
            return Err(FloodError::InvalidInput(
                "identity is in use by a router".into(),
            ));
        };
        identity
            .regenerate()
            .map_err(|e| IdentityError::KeyStore(e.to_string()))?;
        tracing::info!("New device id {}", identity.device_id());
        Ok(())
    }

    /// Build a router publishing to `events`
    pub fn router(&self, config: MeshConfig, events: EventSink) -> Result<FloodRouter, FloodError> {
        FloodRouter::new(
            self.identity.clone(),
            &self.storage,
            config,
            events,
            current_timestamp_ms(),
        )
    }
}
