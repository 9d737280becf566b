// Dedup cache — ids of envelopes the router has already processed
//
// The radio hands us the same advertisement dozens of times a second, so
// this set is what makes flooding terminate. Entries are persisted so a
// restart does not re-accept everything still on the air.
//
// Growth is bounded two ways: a hard entry cap (oldest first) and a
// retention window in time buckets. Observed ids already embed their
// bucket, so forgetting an id whose bucket has passed cannot re-admit
// the same sighting.

use crate::message::time_bucket;
use crate::store::backend::{StorageBackend, StoreError};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct DedupCache {
    backend: Arc<dyn StorageBackend>,
    /// Set of seen ids (for O(1) lookup)
    seen_ids: HashSet<String>,
    /// Seen ids with their bucket, oldest first (for eviction)
    seen_order: VecDeque<(String, u64)>,
    capacity: usize,
    retention_buckets: u64,
    bucket_ms: u64,
}

impl DedupCache {
    /// Reload the cache from its backend
    pub fn load(
        backend: Arc<dyn StorageBackend>,
        capacity: usize,
        retention_buckets: u64,
        bucket_ms: u64,
    ) -> Result<Self, StoreError> {
        let mut entries = Vec::new();
        for (key, value) in backend.scan_prefix(b"")? {
            let id = String::from_utf8(key).map_err(|e| StoreError::Serialization(e.to_string()))?;
            let bucket: u64 = bincode::deserialize(&value)?;
            entries.push((id, bucket));
        }
        entries.sort_by_key(|(_, bucket)| *bucket);

        let mut cache = Self {
            backend,
            seen_ids: entries.iter().map(|(id, _)| id.clone()).collect(),
            seen_order: entries.into(),
            capacity: capacity.max(1),
            retention_buckets: retention_buckets.max(1),
            bucket_ms: bucket_ms.max(1),
        };
        cache.enforce_capacity();
        debug!("Dedup cache loaded with {} ids", cache.len());
        Ok(cache)
    }

    /// Check if an id has already been processed
    pub fn seen(&self, id: &str) -> bool {
        self.seen_ids.contains(id)
    }

    /// Record an id as processed
    pub fn mark_seen(&mut self, id: &str, now_ms: u64) -> Result<(), StoreError> {
        if self.seen_ids.contains(id) {
            return Ok(());
        }

        let bucket = time_bucket(now_ms, self.bucket_ms);
        self.seen_ids.insert(id.to_string());
        self.seen_order.push_back((id.to_string(), bucket));
        let persisted = bincode::serialize(&bucket)
            .map_err(StoreError::from)
            .and_then(|value| self.backend.put(id.as_bytes(), &value))
            .and_then(|_| self.backend.flush());

        self.prune(now_ms);
        self.enforce_capacity();
        persisted
    }

    /// Forget ids whose bucket has left the retention window.
    /// Returns how many were evicted.
    pub fn prune(&mut self, now_ms: u64) -> usize {
        let current = time_bucket(now_ms, self.bucket_ms);
        let oldest_kept = current.saturating_sub(self.retention_buckets);
        let mut evicted = 0;

        while let Some((_, bucket)) = self.seen_order.front() {
            if *bucket >= oldest_kept {
                break;
            }
            if let Some((id, _)) = self.seen_order.pop_front() {
                self.forget(&id);
                evicted += 1;
            }
        }

        if evicted > 0 {
            debug!("Dedup cache pruned {} expired ids", evicted);
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.seen_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen_ids.is_empty()
    }

    fn enforce_capacity(&mut self) {
        while self.seen_ids.len() > self.capacity {
            match self.seen_order.pop_front() {
                Some((id, _)) => self.forget(&id),
                None => break,
            }
        }
    }

    fn forget(&mut self, id: &str) {
        self.seen_ids.remove(id);
        if let Err(e) = self.backend.remove(id.as_bytes()) {
            warn!("Failed to drop dedup entry {}: {}", id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::backend::MemoryStorage;

    const BUCKET: u64 = 60_000;

    fn cache(backend: Arc<dyn StorageBackend>, capacity: usize) -> DedupCache {
        DedupCache::load(backend, capacity, 10, BUCKET).unwrap()
    }

    #[test]
    fn test_mark_and_check() {
        let mut dedup = cache(Arc::new(MemoryStorage::new()), 100);
        assert!(!dedup.seen("a"));
        dedup.mark_seen("a", 0).unwrap();
        assert!(dedup.seen("a"));
        assert_eq!(dedup.len(), 1);

        dedup.mark_seen("a", 0).unwrap();
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn test_survives_reload() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        {
            let mut dedup = cache(backend.clone(), 100);
            dedup.mark_seen("a", 0).unwrap();
            dedup.mark_seen("b", BUCKET).unwrap();
        }

        let dedup = cache(backend, 100);
        assert!(dedup.seen("a"));
        assert!(dedup.seen("b"));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        let mut dedup = cache(backend.clone(), 2);
        dedup.mark_seen("a", 0).unwrap();
        dedup.mark_seen("b", 0).unwrap();
        dedup.mark_seen("c", 0).unwrap();

        assert!(!dedup.seen("a"));
        assert!(dedup.seen("b"));
        assert!(dedup.seen("c"));
        assert_eq!(backend.count_prefix(b"").unwrap(), 2);
    }

    #[test]
    fn test_prune_drops_expired_buckets() {
        let mut dedup = cache(Arc::new(MemoryStorage::new()), 100);
        dedup.mark_seen("old", 0).unwrap();
        dedup.mark_seen("recent", 5 * BUCKET).unwrap();

        // Bucket 11 keeps buckets 1..=11
        assert_eq!(dedup.prune(11 * BUCKET), 1);
        assert!(!dedup.seen("old"));
        assert!(dedup.seen("recent"));
    }
}
