// Identity — device id, signing and verification

mod keys;
mod store;

pub use keys::IdentityKeys;
pub use store::IdentityStore;

use crate::message::is_device_id;
use anyhow::Result;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("No key material available")]
    NoKeyMaterial,
    #[error("Signing failed: {0}")]
    SigningFailed(String),
    #[error("Key store error: {0}")]
    KeyStore(String),
}

/// What the router needs from identity: who we are and how to sign.
pub trait IdentityProvider: Send + Sync {
    /// 12-char uppercase hex short id
    fn device_id(&self) -> &str;
    /// Hex public key, empty if there is none
    fn public_key_hex(&self) -> String;
    /// Sign `content`, returning an opaque signature string
    fn sign(&self, content: &str) -> Result<String, IdentityError>;
    /// Check a signature produced by `sign` on some device
    fn verify(&self, content: &str, signature: &str, public_key_hex: &str) -> bool;
}

/// Ed25519-backed identity, loaded from or generated into an `IdentityStore`
pub struct IdentityManager {
    store: IdentityStore,
    keys: IdentityKeys,
    device_id: String,
}

impl IdentityManager {
    /// Load existing keys or generate and persist new ones
    pub fn open(store: IdentityStore) -> Result<Self> {
        let keys = match store.load_keys()? {
            Some(keys) => {
                info!("🔑 Loaded existing identity");
                keys
            }
            None => {
                info!("🔑 Generating new identity");
                let keys = IdentityKeys::generate();
                store.save_keys(&keys)?;
                keys
            }
        };
        let device_id = keys.device_id();
        debug!("Device id {}", device_id);

        Ok(Self {
            store,
            keys,
            device_id,
        })
    }

    /// Throwaway identity that is never persisted
    pub fn ephemeral() -> Self {
        let keys = IdentityKeys::generate();
        let device_id = keys.device_id();
        Self {
            store: IdentityStore::memory(),
            keys,
            device_id,
        }
    }

    /// Replace the identity with a fresh key pair
    pub fn regenerate(&mut self) -> Result<()> {
        self.store.clear()?;
        let keys = IdentityKeys::generate();
        self.store.save_keys(&keys)?;
        self.device_id = keys.device_id();
        self.keys = keys;
        Ok(())
    }
}

impl IdentityProvider for IdentityManager {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn public_key_hex(&self) -> String {
        self.keys.public_key_hex()
    }

    fn sign(&self, content: &str) -> Result<String, IdentityError> {
        Ok(hex::encode(self.keys.sign(content.as_bytes())))
    }

    fn verify(&self, content: &str, signature: &str, public_key_hex: &str) -> bool {
        let (Ok(signature), Ok(public_key)) = (hex::decode(signature), hex::decode(public_key_hex))
        else {
            return false;
        };
        IdentityKeys::verify(content.as_bytes(), &signature, &public_key).unwrap_or(false)
    }
}

/// A device id with no key material behind it.
///
/// Signing always fails, so everything it sends carries the unsigned
/// sentinel. Used for simulated nodes and devices whose keys are unavailable.
pub struct UnkeyedIdentity {
    device_id: String,
}

impl UnkeyedIdentity {
    pub fn new(device_id: &str) -> Result<Self> {
        if !is_device_id(device_id) {
            anyhow::bail!("Invalid device id: {}", device_id);
        }
        Ok(Self {
            device_id: device_id.to_ascii_uppercase(),
        })
    }
}

impl IdentityProvider for UnkeyedIdentity {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn public_key_hex(&self) -> String {
        String::new()
    }

    fn sign(&self, _content: &str) -> Result<String, IdentityError> {
        Err(IdentityError::NoKeyMaterial)
    }

    fn verify(&self, _content: &str, _signature: &str, _public_key_hex: &str) -> bool {
        false
    }
}
