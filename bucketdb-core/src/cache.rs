//! Cache & eviction manager
//!
//! Owns the set of resident buckets for one collection and enforces the
//! configured cache size. Eviction flushes the resident bucket with the
//! oldest window key, skipping the bucket currently receiving the insert,
//! so historical windows leave memory before the hot one.
//!
//! The bound is soft: when only the active bucket is resident, or when a
//! flush fails, residency may exceed the configured size by one bucket
//! until the next eviction trigger.

use crate::bucket::Bucket;
use crate::store::BucketStore;
use crate::{Document, Result, Timestamp, TsError, WindowKey};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Cache counters, exposed through collection stats
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Buckets currently resident
    pub resident: usize,
    /// Buckets flushed to the backing collection
    pub flushes: u64,
    /// Documents appended
    pub inserts: u64,
    /// Flushed windows reloaded for late arrivals
    pub reloads: u64,
}

/// Resident bucket set for one collection
pub struct BucketCache {
    buckets: BTreeMap<WindowKey, Bucket>,
    adapter: BucketStore,
    cache_size: usize,
    compressed: bool,
    flushes: u64,
    inserts: u64,
    reloads: u64,
}

impl BucketCache {
    /// Create an empty cache over a backing-store adapter
    pub fn new(adapter: BucketStore, cache_size: usize, compressed: bool) -> Self {
        Self {
            buckets: BTreeMap::new(),
            adapter,
            cache_size,
            compressed,
            flushes: 0,
            inserts: 0,
            reloads: 0,
        }
    }

    /// Append a document to the bucket for `key`, opening one if needed.
    ///
    /// A window that was flushed earlier is reloaded from the backing
    /// collection first, so a late arrival joins the documents already
    /// persisted and the next flush writes the merged set.
    pub fn append(&mut self, key: WindowKey, ts: Timestamp, doc: Document) -> Result<()> {
        if let Some(bucket) = self.buckets.get_mut(&key) {
            bucket.append(ts, doc);
            self.inserts += 1;
            return Ok(());
        }

        self.ensure_capacity(key);
        let mut bucket = self.load_or_open(key)?;
        bucket.append(ts, doc);
        self.buckets.insert(key, bucket);
        self.inserts += 1;
        Ok(())
    }

    /// Snapshot of the resident bucket's documents, if the window is open
    pub fn snapshot(&mut self, key: WindowKey) -> Option<Vec<(Timestamp, Document)>> {
        self.buckets.get_mut(&key).map(|bucket| {
            bucket.touch();
            bucket.snapshot().to_vec()
        })
    }

    /// Check whether a window is resident
    pub fn contains(&self, key: WindowKey) -> bool {
        self.buckets.contains_key(&key)
    }

    /// Resident window keys, ascending
    pub fn resident_keys(&self) -> Vec<WindowKey> {
        self.buckets.keys().copied().collect()
    }

    /// Flush one resident bucket and evict it from memory.
    ///
    /// On a backing-store failure the bucket stays resident, open and
    /// dirty; the flush is retried on the next eviction trigger or
    /// `flush_all`.
    pub fn flush(&mut self, key: WindowKey) -> Result<()> {
        let Some(bucket) = self.buckets.get_mut(&key) else {
            return Ok(());
        };
        if !bucket.is_dirty() {
            self.buckets.remove(&key);
            return Ok(());
        }

        // Appends to this cache are blocked for the duration; the snapshot
        // and the state transition happen together, so readers see the
        // window either fully open or fully flushed.
        bucket.begin_flush();
        let record = match bucket.to_record(self.compressed) {
            Ok(record) => record,
            Err(e) => {
                bucket.abort_flush();
                return Err(TsError::FlushFailed(e.to_string()));
            }
        };

        match self.adapter.put(&record) {
            Ok(()) => {
                bucket.complete_flush();
                self.buckets.remove(&key);
                self.flushes += 1;
                debug!(key, count = record.count, "flushed bucket");
                Ok(())
            }
            Err(e) => {
                bucket.abort_flush();
                Err(TsError::FlushFailed(e.to_string()))
            }
        }
    }

    /// Flush every dirty resident bucket, continuing past failures
    pub fn flush_all(&mut self) -> Result<()> {
        let keys = self.resident_keys();
        let mut failed = 0usize;
        for key in keys {
            if let Err(e) = self.flush(key) {
                warn!(key, error = %e, "flush failed");
                failed += 1;
            }
        }
        if failed > 0 {
            return Err(TsError::FlushFailed(format!(
                "{} bucket(s) left resident",
                failed
            )));
        }
        Ok(())
    }

    /// Flush buckets untouched since the previous sweep.
    ///
    /// Each sweep resets every bucket's activity flag, so a bucket is
    /// flushed on the first sweep after it goes quiet. Returns the number
    /// of buckets flushed.
    pub fn flush_idle(&mut self) -> usize {
        let idle: Vec<WindowKey> = self
            .buckets
            .iter_mut()
            .filter_map(|(k, b)| (!b.take_active() && b.is_dirty()).then_some(*k))
            .collect();

        let mut flushed = 0;
        for key in idle {
            match self.flush(key) {
                Ok(()) => flushed += 1,
                Err(e) => warn!(key, error = %e, "idle flush failed"),
            }
        }
        flushed
    }

    /// Cache counters
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            resident: self.buckets.len(),
            flushes: self.flushes,
            inserts: self.inserts,
            reloads: self.reloads,
        }
    }

    fn load_or_open(&mut self, key: WindowKey) -> Result<Bucket> {
        match self.adapter.get(key) {
            Ok(Some(record)) => match Bucket::from_record(&record) {
                Ok(bucket) => {
                    self.reloads += 1;
                    debug!(key, count = record.count, "reloaded flushed bucket");
                    Ok(bucket)
                }
                Err(e) => {
                    // The persisted payload is unreadable; start the window
                    // over rather than reject the insert.
                    warn!(key, error = %e, "corrupt persisted bucket, opening fresh");
                    Ok(Bucket::new(key))
                }
            },
            Ok(None) => Ok(Bucket::new(key)),
            Err(e) if e.is_corruption() => {
                warn!(key, error = %e, "corrupt persisted bucket, opening fresh");
                Ok(Bucket::new(key))
            }
            Err(e) => Err(e),
        }
    }

    fn ensure_capacity(&mut self, incoming: WindowKey) {
        if self.buckets.len() < self.cache_size {
            return;
        }
        // Oldest window key, never the one receiving the insert. When the
        // active bucket is the only resident, the soft bound allows one
        // extra bucket instead of evicting it.
        let candidate = self.buckets.keys().find(|k| **k != incoming).copied();
        let Some(candidate) = candidate else {
            return;
        };
        if let Err(e) = self.flush(candidate) {
            warn!(key = candidate, error = %e, "eviction flush failed, cache over bound");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CollectionStore, MemoryStore};
    use crate::FieldValue;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    const WIDTH: i64 = 1000;

    fn doc(ts: Timestamp) -> Document {
        Document::new().with("_id", FieldValue::Time(ts)).with("val", ts)
    }

    fn cache(cache_size: usize, compressed: bool) -> (BucketCache, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store.create_collection("t_timeseries").unwrap();
        let adapter = BucketStore::new(store.clone(), "t_timeseries");
        (BucketCache::new(adapter, cache_size, compressed), store)
    }

    fn append(c: &mut BucketCache, ts: Timestamp) {
        c.append(ts.div_euclid(WIDTH), ts, doc(ts)).unwrap();
    }

    #[test]
    fn test_single_window_never_evicts() {
        // Scenario A: one window's worth of inserts, cache size 4
        let (mut c, _) = cache(4, false);
        for ts in (0..1000).step_by(10) {
            append(&mut c, ts);
        }
        let stats = c.stats();
        assert_eq!(stats.resident, 1);
        assert_eq!(stats.flushes, 0);
        assert_eq!(stats.inserts, 100);
    }

    #[test]
    fn test_sequential_windows_evict_prior() {
        // Scenario B: cache size 1, three windows in time order
        let (mut c, _) = cache(1, false);
        for ts in [100, 500, 1100, 1500, 2100, 2500] {
            append(&mut c, ts);
        }
        let stats = c.stats();
        assert_eq!(stats.flushes, 2);
        assert_eq!(stats.resident, 1);
        assert!(c.contains(2));
    }

    #[test]
    fn test_evicts_oldest_window_not_active() {
        let (mut c, _) = cache(2, false);
        // Windows 5 and 9 resident; an insert into window 0 must evict 5,
        // not the incoming window.
        append(&mut c, 5500);
        append(&mut c, 9100);
        append(&mut c, 10);
        assert_eq!(c.resident_keys(), [0, 9]);
        assert_eq!(c.stats().flushes, 1);
    }

    #[test]
    fn test_out_of_order_arrivals() {
        // The arrival pattern from the cache-policy exploration script
        let (mut c, _) = cache(4, false);
        for ts in [2975, 2420, 526, 2118, 9655, 915, 5098, 6902] {
            append(&mut c, ts);
        }
        // Windows 2, 0, 9, 5, 6 in arrival order; capacity 4 forces one
        // eviction of the oldest resident at the time (window 0).
        assert_eq!(c.stats().flushes, 1);
        assert_eq!(c.stats().resident, 4);
        assert!(!c.contains(0));
        assert!(c.contains(2));
    }

    #[test]
    fn test_late_arrival_reloads_flushed_window() {
        let (mut c, _) = cache(1, false);
        append(&mut c, 100);
        append(&mut c, 1100); // evicts window 0

        assert_eq!(c.stats().flushes, 1);
        assert!(!c.contains(0));

        // Late arrival into window 0 reloads the persisted documents
        append(&mut c, 900);
        assert_eq!(c.stats().reloads, 1);
        let snapshot = c.snapshot(0).unwrap();
        let times: Vec<Timestamp> = snapshot.iter().map(|(t, _)| *t).collect();
        assert_eq!(times, [100, 900]);
    }

    #[test]
    fn test_reflush_writes_merged_record() {
        let (mut c, store) = cache(1, false);
        append(&mut c, 100);
        append(&mut c, 1100);
        append(&mut c, 900); // reload of window 0
        c.flush(0).unwrap();

        let adapter = BucketStore::new(store, "t_timeseries");
        let record = adapter.get(0).unwrap().unwrap();
        assert_eq!(record.count, 2);
        assert_eq!(record.min_time, 100);
        assert_eq!(record.max_time, 900);
    }

    #[test]
    fn test_flush_idle_sweeps_quiet_buckets() {
        let (mut c, _) = cache(4, false);
        append(&mut c, 100);
        append(&mut c, 1100);

        // First sweep resets activity flags; nothing is idle yet
        assert_eq!(c.flush_idle(), 0);

        // Window 1 stays busy, window 0 goes quiet
        append(&mut c, 1200);
        assert_eq!(c.flush_idle(), 1);
        assert!(!c.contains(0));
        assert!(c.contains(1));
    }

    #[test]
    fn test_flush_all() {
        let (mut c, store) = cache(4, true);
        for ts in [100, 1100, 2100] {
            append(&mut c, ts);
        }
        c.flush_all().unwrap();
        assert_eq!(c.stats().resident, 0);
        assert_eq!(store.collection_len("t_timeseries"), 3);
    }

    // Store wrapper that fails upserts on demand
    struct FailingStore {
        inner: MemoryStore,
        fail_writes: AtomicBool,
    }

    impl FailingStore {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                fail_writes: AtomicBool::new(false),
            }
        }
    }

    impl CollectionStore for FailingStore {
        fn create_collection(&self, name: &str) -> crate::Result<()> {
            self.inner.create_collection(name)
        }
        fn drop_collection(&self, name: &str) -> crate::Result<()> {
            self.inner.drop_collection(name)
        }
        fn collection_exists(&self, name: &str) -> bool {
            self.inner.collection_exists(name)
        }
        fn list_collections(&self) -> Vec<String> {
            self.inner.list_collections()
        }
        fn upsert(&self, collection: &str, key: i64, bytes: Vec<u8>) -> crate::Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(TsError::Store("injected write failure".into()));
            }
            self.inner.upsert(collection, key, bytes)
        }
        fn get(&self, collection: &str, key: i64) -> crate::Result<Option<Vec<u8>>> {
            self.inner.get(collection, key)
        }
        fn keys_in_range(&self, collection: &str, lo: i64, hi: i64) -> crate::Result<Vec<i64>> {
            self.inner.keys_in_range(collection, lo, hi)
        }
        fn delete_all(&self, collection: &str) -> crate::Result<()> {
            self.inner.delete_all(collection)
        }
    }

    #[test]
    fn test_failed_flush_keeps_bucket_dirty() {
        let store = Arc::new(FailingStore::new());
        store.create_collection("t_timeseries").unwrap();
        let adapter = BucketStore::new(store.clone(), "t_timeseries");
        let mut c = BucketCache::new(adapter, 1, false);

        append(&mut c, 100);
        store.fail_writes.store(true, Ordering::SeqCst);

        // Eviction flush fails; the insert still lands and the cache runs
        // one bucket over its bound.
        append(&mut c, 1100);
        assert_eq!(c.stats().resident, 2);
        assert_eq!(c.stats().flushes, 0);

        // Retry succeeds once the store recovers
        store.fail_writes.store(false, Ordering::SeqCst);
        append(&mut c, 2100);
        assert_eq!(c.stats().flushes, 1);
        assert_eq!(c.stats().resident, 2);

        c.flush_all().unwrap();
        assert_eq!(c.stats().resident, 0);
    }

    #[test]
    fn test_failed_flush_surfaces_flush_failed() {
        let store = Arc::new(FailingStore::new());
        store.create_collection("t_timeseries").unwrap();
        let adapter = BucketStore::new(store.clone(), "t_timeseries");
        let mut c = BucketCache::new(adapter, 4, false);

        append(&mut c, 100);
        store.fail_writes.store(true, Ordering::SeqCst);
        assert!(matches!(c.flush(0), Err(TsError::FlushFailed(_))));
        assert!(c.contains(0));
    }

    #[test]
    fn test_idempotent_flush_record() {
        let (mut c, store) = cache(4, false);
        append(&mut c, 100);
        append(&mut c, 200);

        c.flush(0).unwrap();
        let adapter = BucketStore::new(store.clone(), "t_timeseries");
        let first = adapter.get(0).unwrap().unwrap();

        // Reload without modification and re-encode: identical record
        let reloaded = crate::bucket::Bucket::from_record(&first).unwrap();
        let second = reloaded.to_record(false).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_soft_bound_holds() {
        // After any insert sequence: resident <= cache_size + 1
        let (mut c, _) = cache(2, false);
        for ts in [9655, 526, 2975, 5098, 915, 6902, 2420, 2118, 7777, 1] {
            append(&mut c, ts);
            assert!(c.stats().resident <= 3);
        }
    }
}
