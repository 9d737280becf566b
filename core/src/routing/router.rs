// Flood router — the protocol state machine
//
// Every advertisement and every locally authored message passes through
// here, one at a time. The order inside `process_incoming` is the whole
// protocol:
//
//   1. dedup check          (repeated sightings stop here)
//   2. ttl/hops adjustment  (only for other devices' messages, once)
//   3. persist + mark seen
//   4. refresh sender's peer record
//   5. notify the application
//   6. relay if ttl > 0 and the compact form fits
//
// Short-form radio messages carry no hop budget on the wire, so they are
// synthesized with ttl = 0 and stop at the first receiver. Only messages
// authored here propagate outward.

use super::events::{EventSink, RouterEvent};
use super::presence::{PeerPresenceTracker, PresenceUpdate};
use crate::config::MeshConfig;
use crate::identity::IdentityProvider;
use crate::message::{
    decode, encode_message, Advertisement, MessageEnvelope, MessageType, Recipient, WireError,
};
use crate::store::{DedupCache, MessageStore, PeerRecord, Storage, StoreError};
use crate::FloodError;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Signature recorded when the identity provider cannot sign
pub const UNSIGNED_SIGNATURE: &str = "DUMMY_SIG";

/// Where an envelope entered the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Authored on this device
    Local,
    /// Synthesized from a radio observation
    Radio,
}

/// What to do with an accepted envelope on the air
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayDecision {
    /// Hand these bytes to the radio
    Broadcast(Vec<u8>),
    /// No hops left
    TtlExhausted,
    /// Compact form would exceed one advertisement; stored locally only
    TooLarge { len: usize },
    /// Sender id cannot be put on the wire
    Unencodable,
}

/// Outcome of routing one input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Stored, announced, and possibly relayed
    Accepted {
        envelope: MessageEnvelope,
        relay: RelayDecision,
    },
    /// Already processed; nothing changed
    Duplicate { message_id: String },
    /// Presence-only advertisement
    Presence {
        peer_id: String,
        update: PresenceUpdate,
    },
    /// Undecodable advertisement, dropped
    Invalid,
}

impl RouteOutcome {
    /// Bytes to broadcast, if the router decided to relay
    pub fn relay_payload(&self) -> Option<&[u8]> {
        match self {
            Self::Accepted {
                relay: RelayDecision::Broadcast(bytes),
                ..
            } => Some(bytes),
            _ => None,
        }
    }
}

pub struct FloodRouter {
    identity: Arc<dyn IdentityProvider>,
    config: MeshConfig,
    messages: MessageStore,
    dedup: DedupCache,
    presence: PeerPresenceTracker,
    events: EventSink,
}

impl FloodRouter {
    /// Wire the router to its stores. The dedup cache is reloaded as-is;
    /// ids it no longer holds are still caught by the message store.
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        storage: &Storage,
        config: MeshConfig,
        events: EventSink,
        now_ms: u64,
    ) -> Result<Self, FloodError> {
        config.validate()?;

        let messages = storage.message_store();
        let mut dedup = DedupCache::load(
            storage.dedup.clone(),
            config.dedup_capacity,
            config.dedup_retention_buckets,
            config.dedup_bucket_ms,
        )?;
        dedup.prune(now_ms);

        let presence = PeerPresenceTracker::load(
            storage.peer_store(),
            config.presence_throttle_ms,
            config.peer_timeout_ms,
            events.clone(),
        )?;

        info!(
            "Router ready as {} ({} messages, {} peers)",
            identity.device_id(),
            messages.count(),
            presence.peers().len()
        );

        Ok(Self {
            identity,
            config,
            messages,
            dedup,
            presence,
            events,
        })
    }

    pub fn device_id(&self) -> &str {
        self.identity.device_id()
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    pub fn presence(&self) -> &PeerPresenceTracker {
        &self.presence
    }

    pub fn peers(&self) -> Vec<PeerRecord> {
        self.presence.peers()
    }

    /// Author a message and run it through the pipeline.
    ///
    /// Signing failures degrade to `UNSIGNED_SIGNATURE`. Persistence
    /// failures are returned so the caller can report a failed send.
    pub fn send_message(
        &mut self,
        content: &str,
        receiver: Recipient,
        message_type: MessageType,
        now_ms: u64,
    ) -> Result<RouteOutcome, FloodError> {
        if content.trim().is_empty() {
            return Err(FloodError::InvalidInput("message content is empty".into()));
        }

        let signature = match self.identity.sign(content) {
            Ok(signature) => signature,
            Err(e) => {
                warn!("Signing failed, sending unsigned: {}", e);
                UNSIGNED_SIGNATURE.to_string()
            }
        };

        let envelope = MessageEnvelope::outgoing(
            self.identity.device_id(),
            receiver,
            content,
            message_type,
            self.config.default_ttl,
            signature,
            now_ms,
        );
        debug!("Sending {} to {}", envelope.id, envelope.receiver);

        self.process_incoming(envelope, Origin::Local, now_ms)
    }

    /// Decode raw advertisement bytes and route the result
    pub fn on_raw_advertisement(&mut self, payload: &[u8], now_ms: u64) -> RouteOutcome {
        self.on_advertisement(decode(payload), now_ms)
    }

    /// Route a decoded advertisement. Never fails: storage problems on this
    /// path are logged so one bad write cannot stall the flood.
    pub fn on_advertisement(&mut self, advertisement: Advertisement, now_ms: u64) -> RouteOutcome {
        match advertisement {
            Advertisement::PresenceOnly(peer_id) => {
                let update = self.presence.observe(&peer_id, now_ms);
                RouteOutcome::Presence { peer_id, update }
            }
            Advertisement::Message { sender_id, content } => {
                let envelope = MessageEnvelope::observed(
                    &sender_id,
                    &content,
                    now_ms,
                    self.config.dedup_bucket_ms,
                );
                match self.process_incoming(envelope, Origin::Radio, now_ms) {
                    Ok(outcome) => outcome,
                    // Radio-path storage errors are swallowed inside process_incoming
                    Err(e) => {
                        warn!("Dropping advertisement from {}: {}", sender_id, e);
                        RouteOutcome::Invalid
                    }
                }
            }
            Advertisement::Invalid => RouteOutcome::Invalid,
        }
    }

    /// Shared pipeline for local and radio-observed envelopes
    pub fn process_incoming(
        &mut self,
        mut envelope: MessageEnvelope,
        origin: Origin,
        now_ms: u64,
    ) -> Result<RouteOutcome, FloodError> {
        if self.is_processed(&envelope.id) {
            debug!("Duplicate message ignored: {}", envelope.id);
            return Ok(RouteOutcome::Duplicate {
                message_id: envelope.id,
            });
        }

        info!(
            "New message {} from {} to {}",
            envelope.id, envelope.sender_id, envelope.receiver
        );

        if envelope.sender_id != self.identity.device_id() {
            envelope.record_hop();
            debug!("TTL now {} after {} hops", envelope.ttl, envelope.hops);
        }

        self.persist(&envelope, origin, now_ms)?;

        self.events.emit(RouterEvent::NewMessage(envelope.clone()));
        self.presence.notify();

        let relay = self.relay_decision(&envelope);
        Ok(RouteOutcome::Accepted { envelope, relay })
    }

    /// Periodic maintenance: expire dedup ids and time out silent peers.
    /// Anti-entropy re-gossip would hook in here.
    pub fn housekeeping(&mut self, now_ms: u64) {
        let pruned = self.dedup.prune(now_ms);
        let timed_out = self.presence.sweep(now_ms);
        if pruned > 0 || timed_out > 0 {
            debug!(
                "Housekeeping: {} dedup ids expired, {} peers timed out",
                pruned, timed_out
            );
        }
    }

    pub fn rename_peer(&mut self, id: &str, name: &str) -> Result<PeerRecord, FloodError> {
        Ok(self.presence.rename(id, name)?)
    }

    /// Seen recently, or already in the message store after the cache let
    /// the id go
    fn is_processed(&self, id: &str) -> bool {
        if self.dedup.seen(id) {
            return true;
        }
        match self.messages.has_processed(id) {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Failed to check message store for {}: {}", id, e);
                false
            }
        }
    }

    fn persist(
        &mut self,
        envelope: &MessageEnvelope,
        origin: Origin,
        now_ms: u64,
    ) -> Result<(), FloodError> {
        let saved = self.messages.save(envelope).map(|_| ());
        if origin == Origin::Local {
            saved?;
        } else {
            log_store_failure("save message", &envelope.id, saved);
        }

        let marked = self.dedup.mark_seen(&envelope.id, now_ms);
        let touched = self.presence.touch(&envelope.sender_id, now_ms);
        if origin == Origin::Local {
            marked?;
            touched?;
        } else {
            log_store_failure("mark seen", &envelope.id, marked);
            log_store_failure("update peer", &envelope.sender_id, touched);
        }
        Ok(())
    }

    fn relay_decision(&self, envelope: &MessageEnvelope) -> RelayDecision {
        if envelope.ttl == 0 {
            return RelayDecision::TtlExhausted;
        }

        match encode_message(&envelope.sender_id, &envelope.content) {
            Ok(bytes) => {
                debug!("Relaying {} ({} bytes)", envelope.id, bytes.len());
                RelayDecision::Broadcast(bytes)
            }
            Err(WireError::TooLarge { len, max }) => {
                info!(
                    "Message {} too long to advertise ({} > {} bytes), saved locally",
                    envelope.id, len, max
                );
                RelayDecision::TooLarge { len }
            }
            Err(e) => {
                warn!("Cannot encode {} for relay: {}", envelope.id, e);
                RelayDecision::Unencodable
            }
        }
    }
}

fn log_store_failure(action: &str, key: &str, result: Result<(), StoreError>) {
    if let Err(e) = result {
        warn!("Failed to {} for {}: {}", action, key, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::UnkeyedIdentity;
    use crate::message::encode_presence;
    use crate::store::{MemoryStorage, StorageBackend};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc::UnboundedReceiver;

    const ME: &str = "AAAAAAAAAAAA";
    const BOB: &str = "BBBBBBBBBBBB";

    fn router_with(storage: &Storage) -> (FloodRouter, UnboundedReceiver<RouterEvent>) {
        let identity = Arc::new(UnkeyedIdentity::new(ME).unwrap());
        let (events, rx) = EventSink::channel();
        let router = FloodRouter::new(identity, storage, MeshConfig::default(), events, 0)
            .unwrap();
        (router, rx)
    }

    fn router() -> (FloodRouter, UnboundedReceiver<RouterEvent>) {
        router_with(&Storage::memory())
    }

    fn drain(rx: &mut UnboundedReceiver<RouterEvent>) -> Vec<RouterEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_send_hello_scenario() {
        let (mut router, mut rx) = router();
        let outcome = router
            .send_message("Hello", Recipient::Broadcast, MessageType::Text, 1_000)
            .unwrap();

        let RouteOutcome::Accepted { envelope, relay } = outcome else {
            panic!("expected accepted outcome");
        };
        assert_eq!(envelope.ttl, 3);
        assert_eq!(envelope.hops, 0);
        assert_eq!(envelope.sender_id, ME);
        assert_eq!(envelope.signature, UNSIGNED_SIGNATURE);
        assert_eq!(relay, RelayDecision::Broadcast(b"AAAAAAAAAAAA:Hello".to_vec()));

        let stored = router.messages().get(&envelope.id).unwrap().unwrap();
        assert_eq!(stored.ttl, 3);

        let events = drain(&mut rx);
        assert!(matches!(events[0], RouterEvent::NewMessage(_)));
        assert!(matches!(events[1], RouterEvent::PeersChanged(_)));
    }

    #[test]
    fn test_empty_send_rejected() {
        let (mut router, _rx) = router();
        let sent = router.send_message("  ", Recipient::Broadcast, MessageType::Text, 0);
        assert!(matches!(sent, Err(FloodError::InvalidInput(_))));
        assert_eq!(router.messages().count(), 0);
    }

    #[test]
    fn test_oversize_send_is_stored_not_relayed() {
        let (mut router, _rx) = router();
        let outcome = router
            .send_message(
                "this is far too long for one advertisement",
                Recipient::Broadcast,
                MessageType::Text,
                0,
            )
            .unwrap();

        assert!(outcome.relay_payload().is_none());
        let RouteOutcome::Accepted { envelope, relay } = outcome else {
            panic!("expected accepted outcome");
        };
        assert!(matches!(relay, RelayDecision::TooLarge { len } if len > 31));
        assert!(router.messages().has_processed(&envelope.id).unwrap());
    }

    #[test]
    fn test_repeated_sightings_collapse() {
        let (mut router, mut rx) = router();
        let raw = b"BBBBBBBBBBBB:Hi";

        let first = router.on_raw_advertisement(raw, 60_000);
        assert!(matches!(first, RouteOutcome::Accepted { .. }));
        drain(&mut rx);

        for i in 1..50 {
            let again = router.on_raw_advertisement(raw, 60_000 + i * 100);
            assert!(matches!(again, RouteOutcome::Duplicate { .. }));
        }
        assert_eq!(router.messages().count(), 1);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_resend_after_bucket_is_new() {
        let (mut router, _rx) = router();
        let raw = b"BBBBBBBBBBBB:Hi";

        router.on_raw_advertisement(raw, 59_999);
        let later = router.on_raw_advertisement(raw, 60_000);
        assert!(matches!(later, RouteOutcome::Accepted { .. }));
        assert_eq!(router.messages().count(), 2);
    }

    #[test]
    fn test_radio_message_is_terminal() {
        let (mut router, _rx) = router();
        let outcome = router.on_raw_advertisement(b"BBBBBBBBBBBB:Hi:there", 0);

        let RouteOutcome::Accepted { envelope, relay } = outcome else {
            panic!("expected accepted outcome");
        };
        assert_eq!(envelope.content, "Hi:there");
        assert_eq!(envelope.ttl, 0);
        assert_eq!(envelope.hops, 1);
        assert!(envelope.signature.is_empty());
        assert_eq!(relay, RelayDecision::TtlExhausted);
        assert_eq!(envelope.id, "msg_BBBBBBBBBBBB_Hi:there_0");
    }

    #[test]
    fn test_relayed_envelope_decrements_once() {
        let (mut router, _rx) = router();
        let envelope = MessageEnvelope::outgoing(
            BOB,
            Recipient::Broadcast,
            "relay me",
            MessageType::Text,
            3,
            String::new(),
            0,
        );

        let outcome = router
            .process_incoming(envelope.clone(), Origin::Radio, 0)
            .unwrap();
        let RouteOutcome::Accepted { envelope: stored, relay } = outcome else {
            panic!("expected accepted outcome");
        };
        assert_eq!((stored.ttl, stored.hops), (2, 1));
        assert_eq!(relay, RelayDecision::Broadcast(b"BBBBBBBBBBBB:relay me".to_vec()));

        // Second delivery via another path: no second decrement, no relay
        let again = router.process_incoming(envelope, Origin::Radio, 10).unwrap();
        assert!(matches!(again, RouteOutcome::Duplicate { .. }));
        let persisted = router.messages().get(&stored.id).unwrap().unwrap();
        assert_eq!((persisted.ttl, persisted.hops), (2, 1));
    }

    #[test]
    fn test_own_echo_is_not_decremented() {
        let (mut router, _rx) = router();
        let outcome = router.on_raw_advertisement(b"AAAAAAAAAAAA:echo", 0);
        let RouteOutcome::Accepted { envelope, .. } = outcome else {
            panic!("expected accepted outcome");
        };
        assert_eq!(envelope.hops, 0);
    }

    #[test]
    fn test_presence_and_invalid() {
        let (mut router, mut rx) = router();

        let presence = router.on_raw_advertisement(&encode_presence(BOB).unwrap(), 0);
        assert_eq!(
            presence,
            RouteOutcome::Presence {
                peer_id: BOB.into(),
                update: PresenceUpdate::Discovered,
            }
        );
        assert_eq!(router.messages().count(), 0);
        drain(&mut rx);

        assert_eq!(router.on_raw_advertisement(b"garbage", 0), RouteOutcome::Invalid);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(router.peers().len(), 1);
    }

    #[test]
    fn test_message_refreshes_sender_without_renaming() {
        let (mut router, _rx) = router();
        router.on_raw_advertisement(BOB.as_bytes(), 0);
        router.rename_peer(BOB, "Bob").unwrap();

        router.on_raw_advertisement(b"BBBBBBBBBBBB:yo", 1_000);
        let bob = router.presence().get(BOB).unwrap();
        assert_eq!(bob.name, "Bob");
        assert_eq!(bob.last_seen, 1_000);
    }

    #[test]
    fn test_stored_message_stays_duplicate_without_dedup_tree() {
        let storage = Storage::memory();
        let id = {
            let (mut router, _rx) = router_with(&storage);
            router.on_raw_advertisement(b"BBBBBBBBBBBB:Hi", 0);
            "msg_BBBBBBBBBBBB_Hi_0".to_string()
        };

        // Lose the dedup tree but keep messages
        let storage = Storage {
            dedup: Arc::new(MemoryStorage::new()),
            ..storage
        };
        let (mut router, _rx) = router_with(&storage);
        assert!(router.messages().has_processed(&id).unwrap());
        assert!(storage.dedup.scan_prefix(b"").unwrap().is_empty());
        assert!(matches!(
            router.on_raw_advertisement(b"BBBBBBBBBBBB:Hi", 0),
            RouteOutcome::Duplicate { .. }
        ));
    }

    /// Backend whose writes always fail
    struct BrokenStorage;

    impl StorageBackend for BrokenStorage {
        fn put(&self, _: &[u8], _: &[u8]) -> Result<(), StoreError> {
            Err(StoreError::Backend("disk full".into()))
        }
        fn get(&self, _: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
            Ok(None)
        }
        fn remove(&self, _: &[u8]) -> Result<(), StoreError> {
            Ok(())
        }
        fn scan_prefix(&self, _: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
            Ok(Vec::new())
        }
        fn count_prefix(&self, _: &[u8]) -> Result<usize, StoreError> {
            Ok(0)
        }
        fn flush(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[test]
    fn test_persistence_errors_propagate_on_send_only() {
        let storage = Storage {
            messages: Arc::new(BrokenStorage),
            ..Storage::memory()
        };
        let (mut router, _rx) = router_with(&storage);

        let sent = router.send_message("hi", Recipient::Broadcast, MessageType::Text, 0);
        assert!(matches!(sent, Err(FloodError::Store(_))));

        // Incoming path swallows the failure and still dedups in memory
        let first = router.on_raw_advertisement(b"BBBBBBBBBBBB:Hi", 0);
        assert!(matches!(first, RouteOutcome::Accepted { .. }));
        let second = router.on_raw_advertisement(b"BBBBBBBBBBBB:Hi", 0);
        assert!(matches!(second, RouteOutcome::Duplicate { .. }));
    }

    /// Memory backend that counts writes and flushes
    #[derive(Default)]
    struct CountingStorage {
        inner: MemoryStorage,
        puts: AtomicUsize,
        flushes: AtomicUsize,
    }

    impl StorageBackend for CountingStorage {
        fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            self.inner.put(key, value)
        }
        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
            self.inner.get(key)
        }
        fn remove(&self, key: &[u8]) -> Result<(), StoreError> {
            self.inner.remove(key)
        }
        fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
            self.inner.scan_prefix(prefix)
        }
        fn count_prefix(&self, prefix: &[u8]) -> Result<usize, StoreError> {
            self.inner.count_prefix(prefix)
        }
        fn flush(&self) -> Result<(), StoreError> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            self.inner.flush()
        }
    }

    #[test]
    fn test_startup_does_not_rewrite_dedup_tree() {
        let storage = Storage::memory();
        {
            let (mut router, _rx) = router_with(&storage);
            for i in 0..50 {
                let payload = format!("BBBBBBBBBBBB:m{}", i);
                router.on_raw_advertisement(payload.as_bytes(), 0);
            }
        }
        assert_eq!(storage.message_store().count(), 50);

        let dedup = Arc::new(CountingStorage::default());
        let storage = Storage {
            dedup: dedup.clone(),
            ..storage
        };
        let (mut router, _rx) = router_with(&storage);
        assert_eq!(dedup.puts.load(Ordering::SeqCst), 0);
        assert_eq!(dedup.flushes.load(Ordering::SeqCst), 0);

        // Stored ids are still duplicates
        assert!(matches!(
            router.on_raw_advertisement(b"BBBBBBBBBBBB:m7", 0),
            RouteOutcome::Duplicate { .. }
        ));
    }

    #[test]
    fn test_binary_framed_presence_creates_peer() {
        let (mut router, mut rx) = router();
        let mut raw = vec![0x4c, 0x00, 0xc0];
        raw.extend_from_slice(BOB.as_bytes());

        let outcome = router.on_raw_advertisement(&raw, 0);
        assert!(matches!(
            outcome,
            RouteOutcome::Presence { ref peer_id, .. } if peer_id == BOB
        ));
        assert!(router.presence().get(BOB).is_some());
        assert!(matches!(drain(&mut rx)[..], [RouterEvent::PeersChanged(_)]));

        let mut raw = vec![0xff, 0xff];
        raw.extend_from_slice(b"BBBBBBBBBBBB:Hi");
        assert!(matches!(
            router.on_raw_advertisement(&raw, 1_000),
            RouteOutcome::Accepted { ref envelope, .. } if envelope.content == "Hi"
        ));
    }

    #[test]
    fn test_housekeeping_times_out_peers() {
        let (mut router, _rx) = router();
        router.on_raw_advertisement(BOB.as_bytes(), 0);
        router.housekeeping(31_000);
        assert!(!router.presence().get(BOB).unwrap().is_connected());
    }
}
