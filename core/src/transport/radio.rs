//! Radio transport abstraction
//!
//! The router never touches the radio directly. It hands compact payloads
//! to a `RadioTransport` and receives sightings as `ScanObservation`s.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::message::MAX_ADVERTISEMENT_LEN;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Payload of {len} bytes exceeds the {max}-byte advertisement limit")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Radio unavailable: {0}")]
    Unavailable(String),

    #[error("Scan failed: {0}")]
    ScanFailed(String),

    #[error("Broadcast failed: {0}")]
    BroadcastFailed(String),
}

/// One advertisement as seen by the scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanObservation {
    /// Raw advertisement bytes
    pub payload: Vec<u8>,
    /// Signal strength in dBm
    pub rssi: i16,
    /// Radio-level address of the advertiser
    pub source_address: String,
}

/// Broadcast radio: best-effort, no acknowledgement, tiny payloads.
///
/// Every sighting is pushed into the sink passed to `start_scan`. The same
/// advertisement may be reported many times.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RadioTransport: Send + Sync {
    /// Begin reporting sightings into `sink`
    async fn start_scan(&self, sink: mpsc::Sender<ScanObservation>) -> Result<(), TransportError>;

    /// Stop reporting sightings
    async fn stop_scan(&self) -> Result<(), TransportError>;

    /// Advertise a message payload
    async fn broadcast(&self, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Advertise our presence payload
    async fn advertise_presence(&self, payload: Vec<u8>) -> Result<(), TransportError>;
}

/// Reject payloads that cannot fit in one advertisement
pub fn check_payload(payload: &[u8]) -> Result<(), TransportError> {
    if payload.len() > MAX_ADVERTISEMENT_LEN {
        return Err(TransportError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_ADVERTISEMENT_LEN,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_payload() {
        assert!(check_payload(&[b'A'; 31]).is_ok());
        assert_eq!(
            check_payload(&[b'A'; 32]),
            Err(TransportError::PayloadTooLarge { len: 32, max: 31 })
        );
    }
}
