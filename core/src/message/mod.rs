// Message module — routed envelope types and the compact advertisement codec

pub mod codec;
pub mod types;

pub use codec::{
    decode, encode_message, encode_presence, is_device_id, Advertisement, WireError, DEVICE_ID_LEN,
    MAX_ADVERTISEMENT_LEN, MAX_CONTENT_LEN,
};
pub use types::{
    derive_observed_id, time_bucket, MessageEnvelope, MessageType, Recipient, BROADCAST_MARKER,
    DEFAULT_TTL,
};
