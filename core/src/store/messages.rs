// Message store — durable record of accepted envelopes

use crate::message::{MessageEnvelope, BROADCAST_MARKER};
use crate::store::backend::{StorageBackend, StoreError};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct MessageStore {
    backend: Arc<dyn StorageBackend>,
}

impl MessageStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Whether an envelope with this id has been stored
    pub fn has_processed(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.backend.get(id.as_bytes())?.is_some())
    }

    /// Persist an envelope. An existing record with the same id is kept
    /// untouched and `Ok(false)` is returned.
    pub fn save(&self, envelope: &MessageEnvelope) -> Result<bool, StoreError> {
        if self.has_processed(&envelope.id)? {
            debug!("Message already stored: {}", envelope.id);
            return Ok(false);
        }

        let value = serde_json::to_vec(envelope)?;
        self.backend.put(envelope.id.as_bytes(), &value)?;
        self.backend.flush()?;
        Ok(true)
    }

    pub fn get(&self, id: &str) -> Result<Option<MessageEnvelope>, StoreError> {
        match self.backend.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All stored envelopes, newest first
    pub fn all(&self) -> Result<Vec<MessageEnvelope>, StoreError> {
        let mut messages = self
            .backend
            .scan_prefix(b"")?
            .into_iter()
            .map(|(_, value)| serde_json::from_slice::<MessageEnvelope>(&value))
            .collect::<Result<Vec<_>, _>>()?;

        messages.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(messages)
    }

    pub fn count(&self) -> usize {
        self.backend.count_prefix(b"").unwrap_or(0)
    }

    /// Group messages into chat threads as seen from `own_id`.
    ///
    /// Broadcasts go to the `BROADCAST` thread; a broadcast from someone else
    /// also shows up in that sender's thread. Direct messages go to the
    /// counterpart's thread. Threads are newest first.
    pub fn conversations(
        &self,
        own_id: &str,
    ) -> Result<BTreeMap<String, Vec<MessageEnvelope>>, StoreError> {
        let mut threads: BTreeMap<String, Vec<MessageEnvelope>> = BTreeMap::new();

        for msg in self.all()? {
            let from_me = msg.sender_id == own_id;
            if msg.receiver.is_broadcast() {
                if !from_me {
                    threads
                        .entry(msg.sender_id.clone())
                        .or_default()
                        .push(msg.clone());
                }
                threads
                    .entry(BROADCAST_MARKER.to_string())
                    .or_default()
                    .push(msg);
            } else {
                let other = if from_me {
                    msg.receiver.as_str().to_string()
                } else {
                    msg.sender_id.clone()
                };
                threads.entry(other).or_default().push(msg);
            }
        }

        Ok(threads)
    }
}
