// Message types — the unit the flood router moves around

use serde::{Deserialize, Serialize};
use std::fmt;

/// Hops a self-originated message may travel
pub const DEFAULT_TTL: u8 = 3;

/// Wire marker for a message addressed to everyone in range
pub const BROADCAST_MARKER: &str = "BROADCAST";

/// Legacy alias some clients use for broadcast
const BROADCAST_ALIAS: &str = "ALL";

/// What kind of message this is.
///
/// Only `Text` is carried by the compact advertisement form; the others are
/// reserved so stored records stay forward compatible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    Ack,
    Handshake,
}

/// Who a message is addressed to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Recipient {
    /// Everyone in radio range
    Broadcast,
    /// A single peer, by short device id
    Peer(String),
}

impl Recipient {
    /// Parse a recipient string. `BROADCAST` and `ALL` both mean broadcast.
    pub fn parse(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case(BROADCAST_MARKER)
            || trimmed.eq_ignore_ascii_case(BROADCAST_ALIAS)
        {
            Self::Broadcast
        } else {
            Self::Peer(trimmed.to_ascii_uppercase())
        }
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self, Self::Broadcast)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Broadcast => BROADCAST_MARKER,
            Self::Peer(id) => id,
        }
    }
}

impl Default for Recipient {
    fn default() -> Self {
        Self::Broadcast
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Recipient {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<Recipient> for String {
    fn from(value: Recipient) -> Self {
        value.as_str().to_string()
    }
}

/// A routed message.
///
/// `ttl` and `hops` are adjusted at most once per receiving router; the
/// router enforces that by only touching them after the dedup check passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Dedup and storage key
    pub id: String,
    /// Origin device's 12-char uppercase hex id
    pub sender_id: String,
    pub receiver: Recipient,
    /// UTF-8 text payload
    pub content: String,
    /// Local creation / receive time (unix millis). Not on the wire.
    pub timestamp: u64,
    pub message_type: MessageType,
    /// Remaining relay hops
    pub ttl: u8,
    /// Hops already traversed
    pub hops: u8,
    /// Origin signature over `content`; empty when synthesized from a radio observation
    pub signature: String,
}

impl MessageEnvelope {
    /// Build a fresh self-originated envelope with a globally unique id
    pub fn outgoing(
        sender_id: &str,
        receiver: Recipient,
        content: &str,
        message_type: MessageType,
        ttl: u8,
        signature: String,
        now_ms: u64,
    ) -> Self {
        Self {
            id: format!("{}-{}", now_ms, uuid::Uuid::new_v4().simple()),
            sender_id: sender_id.to_string(),
            receiver,
            content: content.to_string(),
            timestamp: now_ms,
            message_type,
            ttl,
            hops: 0,
            signature,
        }
    }

    /// Synthesize an envelope from a short-form radio observation.
    ///
    /// The id is derived from `(sender, content, bucket)` so every sighting of
    /// the same advertisement inside one bucket collapses to one envelope.
    /// Radio-observed envelopes start with `ttl = 0`: the compact form carries
    /// no hop budget, so they terminate at the first receiver.
    pub fn observed(sender_id: &str, content: &str, now_ms: u64, bucket_ms: u64) -> Self {
        Self {
            id: derive_observed_id(sender_id, content, now_ms, bucket_ms),
            sender_id: sender_id.to_string(),
            receiver: Recipient::Broadcast,
            content: content.to_string(),
            timestamp: now_ms,
            message_type: MessageType::Text,
            ttl: 0,
            hops: 0,
            signature: String::new(),
        }
    }

    /// Apply one hop of travel. Saturates at zero.
    pub fn record_hop(&mut self) {
        self.ttl = self.ttl.saturating_sub(1);
        self.hops = self.hops.saturating_add(1);
    }
}

/// Time bucket index for `now_ms`
pub fn time_bucket(now_ms: u64, bucket_ms: u64) -> u64 {
    now_ms / bucket_ms.max(1)
}

/// Deterministic id for a short-form observation: `msg_<sender>_<content>_<bucket>`
pub fn derive_observed_id(sender_id: &str, content: &str, now_ms: u64, bucket_ms: u64) -> String {
    format!(
        "msg_{}_{}_{}",
        sender_id,
        content,
        time_bucket(now_ms, bucket_ms)
    )
}
