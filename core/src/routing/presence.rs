// Peer presence tracking
//
// Advertisements from a nearby device arrive many times per second. The
// tracker only writes a peer through to storage when the peer is new, was
// marked disconnected, or the last durable write is older than the throttle.
// Every durable write is announced to the application; failed writes
// are logged and stay quiet.

use super::events::{EventSink, RouterEvent};
use crate::store::{PeerRecord, PeerStatus, PeerStore, StoreError};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// What `observe` did with a sighting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceUpdate {
    /// First sighting of this peer
    Discovered,
    /// Known peer, written through
    Refreshed,
    /// Known peer, inside the throttle window; nothing written
    Throttled,
}

pub struct PeerPresenceTracker {
    store: PeerStore,
    /// Mirror of the durable peer records, keyed by id
    peers: BTreeMap<String, PeerRecord>,
    throttle_ms: u64,
    timeout_ms: u64,
    events: EventSink,
}

impl PeerPresenceTracker {
    /// Load known peers from storage
    pub fn load(
        store: PeerStore,
        throttle_ms: u64,
        timeout_ms: u64,
        events: EventSink,
    ) -> Result<Self, StoreError> {
        let peers = store
            .all()?
            .into_iter()
            .map(|peer| (peer.id.clone(), peer))
            .collect::<BTreeMap<_, _>>();
        debug!("Presence tracker loaded {} peers", peers.len());

        Ok(Self {
            store,
            peers,
            throttle_ms,
            timeout_ms,
            events,
        })
    }

    /// Record a presence sighting, subject to the write throttle
    pub fn observe(&mut self, id: &str, now_ms: u64) -> PresenceUpdate {
        let update = match self.peers.get(id) {
            None => PresenceUpdate::Discovered,
            Some(peer) if peer.status == PeerStatus::Disconnected => PresenceUpdate::Refreshed,
            Some(peer) if now_ms.saturating_sub(peer.last_seen) > self.throttle_ms => {
                PresenceUpdate::Refreshed
            }
            Some(_) => return PresenceUpdate::Throttled,
        };

        if update == PresenceUpdate::Discovered {
            info!("👋 Discovered peer {}", id);
        }
        match self.write(id, now_ms) {
            Ok(()) => self.notify(),
            Err(e) => warn!("Failed to persist presence for {}: {}", id, e),
        }
        update
    }

    /// Unthrottled update used when a message from `id` is accepted.
    /// Keeps the display name. Does not notify; the caller does.
    pub fn touch(&mut self, id: &str, now_ms: u64) -> Result<(), StoreError> {
        self.write(id, now_ms)
    }

    /// Give a known peer a new display name
    pub fn rename(&mut self, id: &str, name: &str) -> Result<PeerRecord, StoreError> {
        let Some(peer) = self.peers.get_mut(id) else {
            return Err(StoreError::NotFound(id.to_string()));
        };
        peer.name = name.trim().to_string();
        let renamed = peer.clone();
        self.store.save(&renamed)?;
        self.notify();
        Ok(renamed)
    }

    /// Mark peers silent for longer than the timeout as disconnected.
    /// Returns how many changed.
    pub fn sweep(&mut self, now_ms: u64) -> usize {
        let timeout_ms = self.timeout_ms;
        let mut changed = Vec::new();
        for peer in self.peers.values_mut() {
            if peer.is_connected() && now_ms.saturating_sub(peer.last_seen) > timeout_ms {
                peer.status = PeerStatus::Disconnected;
                changed.push(peer.clone());
            }
        }

        for peer in &changed {
            debug!("Peer {} timed out", peer.id);
            if let Err(e) = self.store.save(peer) {
                warn!("Failed to persist disconnect for {}: {}", peer.id, e);
            }
        }
        if !changed.is_empty() {
            self.notify();
        }
        changed.len()
    }

    pub fn get(&self, id: &str) -> Option<&PeerRecord> {
        self.peers.get(id)
    }

    /// Known peers, ordered by id
    pub fn peers(&self) -> Vec<PeerRecord> {
        self.peers.values().cloned().collect()
    }

    pub(crate) fn notify(&self) {
        self.events.emit(RouterEvent::PeersChanged(self.peers()));
    }

    fn write(&mut self, id: &str, now_ms: u64) -> Result<(), StoreError> {
        let peer = self
            .peers
            .entry(id.to_string())
            .or_insert_with(|| PeerRecord::first_sighting(id, now_ms));
        peer.last_seen = now_ms;
        peer.status = PeerStatus::Connected;
        let record = peer.clone();
        self.store.save(&record)
    }
}
