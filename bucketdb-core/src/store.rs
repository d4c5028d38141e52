//! Document store seam and the bucket store adapter
//!
//! The engine treats the host document store as an external collaborator and
//! consumes only four primitives from it: create collection, upsert a
//! document by key, read documents by key or range, drop collection. The
//! [`CollectionStore`] trait captures exactly that surface; [`MemoryStore`]
//! is the in-process implementation the engine ships with.
//!
//! [`BucketStore`] is the typed adapter over one backing collection: it maps
//! flushed buckets onto single documents keyed by window key.

use crate::{Result, Timestamp, TsError, WindowKey};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// One backing-collection document per flushed bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketRecord {
    /// Window key the bucket covers
    pub id: WindowKey,
    /// Codec-encoded document payload
    pub payload: Vec<u8>,
    /// Number of documents in the payload
    pub count: u32,
    /// Smallest time value in the payload
    pub min_time: Timestamp,
    /// Largest time value in the payload
    pub max_time: Timestamp,
    /// Whether the payload body is LZ4-compressed
    pub compressed: bool,
}

/// The host document store surface the engine consumes
pub trait CollectionStore: Send + Sync {
    /// Create an empty collection
    fn create_collection(&self, name: &str) -> Result<()>;

    /// Drop a collection and its contents
    fn drop_collection(&self, name: &str) -> Result<()>;

    /// Check whether a collection exists
    fn collection_exists(&self, name: &str) -> bool;

    /// Names of all collections
    fn list_collections(&self) -> Vec<String>;

    /// Insert or replace the document at `key`
    fn upsert(&self, collection: &str, key: i64, bytes: Vec<u8>) -> Result<()>;

    /// Point-fetch the document at `key`
    fn get(&self, collection: &str, key: i64) -> Result<Option<Vec<u8>>>;

    /// Keys present in `[lo, hi]`, ascending
    fn keys_in_range(&self, collection: &str, lo: i64, hi: i64) -> Result<Vec<i64>>;

    /// Remove every document from a collection
    fn delete_all(&self, collection: &str) -> Result<()>;
}

/// In-memory document store
pub struct MemoryStore {
    collections: RwLock<HashMap<String, BTreeMap<i64, Vec<u8>>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Number of documents in a collection, for inspection
    pub fn collection_len(&self, name: &str) -> usize {
        self.collections
            .read()
            .get(name)
            .map(|c| c.len())
            .unwrap_or(0)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectionStore for MemoryStore {
    fn create_collection(&self, name: &str) -> Result<()> {
        let mut collections = self.collections.write();
        if collections.contains_key(name) {
            return Err(TsError::CollectionExists(name.to_string()));
        }
        collections.insert(name.to_string(), BTreeMap::new());
        Ok(())
    }

    fn drop_collection(&self, name: &str) -> Result<()> {
        let mut collections = self.collections.write();
        if collections.remove(name).is_none() {
            return Err(TsError::CollectionNotFound(name.to_string()));
        }
        Ok(())
    }

    fn collection_exists(&self, name: &str) -> bool {
        self.collections.read().contains_key(name)
    }

    fn list_collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn upsert(&self, collection: &str, key: i64, bytes: Vec<u8>) -> Result<()> {
        let mut collections = self.collections.write();
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| TsError::CollectionNotFound(collection.to_string()))?;
        coll.insert(key, bytes);
        Ok(())
    }

    fn get(&self, collection: &str, key: i64) -> Result<Option<Vec<u8>>> {
        let collections = self.collections.read();
        let coll = collections
            .get(collection)
            .ok_or_else(|| TsError::CollectionNotFound(collection.to_string()))?;
        Ok(coll.get(&key).cloned())
    }

    fn keys_in_range(&self, collection: &str, lo: i64, hi: i64) -> Result<Vec<i64>> {
        let collections = self.collections.read();
        let coll = collections
            .get(collection)
            .ok_or_else(|| TsError::CollectionNotFound(collection.to_string()))?;
        Ok(coll.range(lo..=hi).map(|(k, _)| *k).collect())
    }

    fn delete_all(&self, collection: &str) -> Result<()> {
        let mut collections = self.collections.write();
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| TsError::CollectionNotFound(collection.to_string()))?;
        coll.clear();
        Ok(())
    }
}

/// Adapter persisting bucket records into one backing collection
pub struct BucketStore {
    store: Arc<dyn CollectionStore>,
    backing: String,
}

impl BucketStore {
    /// Create an adapter bound to a backing collection
    pub fn new(store: Arc<dyn CollectionStore>, backing: impl Into<String>) -> Self {
        Self {
            store,
            backing: backing.into(),
        }
    }

    /// Name of the backing collection
    pub fn backing_name(&self) -> &str {
        &self.backing
    }

    /// Upsert one persisted bucket record keyed by its window key
    pub fn put(&self, record: &BucketRecord) -> Result<()> {
        let bytes =
            bincode::serialize(record).map_err(|e| TsError::Store(e.to_string()))?;
        self.store.upsert(&self.backing, record.id, bytes)
    }

    /// Point-fetch a persisted bucket record
    pub fn get(&self, key: WindowKey) -> Result<Option<BucketRecord>> {
        match self.store.get(&self.backing, key)? {
            Some(bytes) => {
                let record = bincode::deserialize(&bytes)
                    .map_err(|e| TsError::CorruptPayload(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Window keys persisted within `[lo, hi]`, ascending
    pub fn keys(&self, lo: WindowKey, hi: WindowKey) -> Result<Vec<WindowKey>> {
        self.store.keys_in_range(&self.backing, lo, hi)
    }

    /// Lazy scan of persisted records overlapping `[lo, hi]`, ascending by
    /// key. The scan fetches one record per step; calling `scan` again
    /// restarts from the beginning.
    pub fn scan(&self, lo: WindowKey, hi: WindowKey) -> Result<RecordScan<'_>> {
        let keys = self.keys(lo, hi)?;
        Ok(RecordScan {
            store: self,
            keys,
            next: 0,
        })
    }

    /// Remove every persisted record
    pub fn delete_all(&self) -> Result<()> {
        self.store.delete_all(&self.backing)
    }
}

/// Iterator over persisted bucket records, fetching one at a time
pub struct RecordScan<'a> {
    store: &'a BucketStore,
    keys: Vec<WindowKey>,
    next: usize,
}

impl Iterator for RecordScan<'_> {
    type Item = Result<BucketRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next < self.keys.len() {
            let key = self.keys[self.next];
            self.next += 1;
            match self.store.get(key) {
                // A record deleted between keys() and get() is skipped
                Ok(None) => continue,
                Ok(Some(record)) => return Some(Ok(record)),
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}
