// Identity key persistence

use super::IdentityKeys;
use crate::store::StorageBackend;
use anyhow::Result;
use std::sync::Arc;

const IDENTITY_KEY: &[u8] = b"identity_keys";

/// Where identity keys live
pub enum IdentityStore {
    /// Keys vanish with the process
    Memory,
    Persistent(Arc<dyn StorageBackend>),
}

impl IdentityStore {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn persistent(backend: Arc<dyn StorageBackend>) -> Self {
        Self::Persistent(backend)
    }

    pub fn save_keys(&self, keys: &IdentityKeys) -> Result<()> {
        match self {
            Self::Memory => Ok(()),
            Self::Persistent(db) => {
                let bytes = keys.to_bytes();
                db.put(IDENTITY_KEY, &bytes)?;
                db.flush()?;
                Ok(())
            }
        }
    }

    pub fn load_keys(&self) -> Result<Option<IdentityKeys>> {
        match self {
            Self::Memory => Ok(None),
            Self::Persistent(db) => match db.get(IDENTITY_KEY)? {
                Some(bytes) => Ok(Some(IdentityKeys::from_bytes(&bytes)?)),
                None => Ok(None),
            },
        }
    }

    pub fn clear(&self) -> Result<()> {
        match self {
            Self::Memory => Ok(()),
            Self::Persistent(db) => {
                db.remove(IDENTITY_KEY)?;
                db.flush()?;
                Ok(())
            }
        }
    }
}
