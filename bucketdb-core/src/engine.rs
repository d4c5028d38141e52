//! Time-series engine - top-level coordinator
//!
//! One engine instance owns a document store handle and the registry of
//! time-series collections created through it. Engines are plain values
//! with an explicit lifecycle; multiple engines over separate stores
//! coexist safely.

use crate::collection::{CollectionConfig, TimeSeriesCollection};
use crate::store::CollectionStore;
use crate::{Result, TsError};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// BucketDB time-series engine
pub struct TimeSeriesEngine {
    store: Arc<dyn CollectionStore>,
    collections: RwLock<HashMap<String, Arc<TimeSeriesCollection>>>,
}

impl TimeSeriesEngine {
    /// Create an engine over a document store
    pub fn new(store: Arc<dyn CollectionStore>) -> Self {
        Self {
            store,
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Create a time-series collection.
    ///
    /// `spec` is the raw `timeseries` creation option: `true`, `"true"`,
    /// `{}`, or an object with any subset of the recognized fields. On
    /// success the (empty) backing collection exists and the collection is
    /// registered.
    pub fn create(&self, name: &str, spec: &Value) -> Result<Arc<TimeSeriesCollection>> {
        let config = CollectionConfig::parse(spec)?;
        config.validate(name)?;

        let mut collections = self.collections.write();

        self.check_name_reserved(&collections, name)?;
        if collections.contains_key(name) || self.store.collection_exists(name) {
            return Err(TsError::CollectionExists(name.to_string()));
        }

        let backing = config.resolve_backing(name);
        if collections.contains_key(&backing)
            || collections.values().any(|c| c.backing_name() == backing)
            || self.store.collection_exists(&backing)
        {
            return Err(TsError::NameCollision(format!(
                "backing collection {} already exists",
                backing
            )));
        }

        self.store.create_collection(&backing)?;

        let collection = Arc::new(TimeSeriesCollection::new(name, config, self.store.clone()));
        collections.insert(name.to_string(), collection.clone());

        info!(collection = name, backing = %backing, "created time-series collection");

        Ok(collection)
    }

    /// Create an ordinary (non-time-series) collection, keeping the
    /// backing namespace reserved
    pub fn create_standard(&self, name: &str) -> Result<()> {
        let collections = self.collections.read();
        self.check_name_reserved(&collections, name)?;
        self.store.create_collection(name)
    }

    /// Get a registered time-series collection by name
    pub fn collection(&self, name: &str) -> Option<Arc<TimeSeriesCollection>> {
        self.collections.read().get(name).cloned()
    }

    /// Names of registered time-series collections
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop a time-series collection: cache state and the backing
    /// collection are removed. Irreversible; nothing is flushed first.
    pub fn drop_collection(&self, name: &str) -> Result<()> {
        let mut collections = self.collections.write();
        let collection = collections
            .remove(name)
            .ok_or_else(|| TsError::CollectionNotFound(name.to_string()))?;

        self.store.drop_collection(collection.backing_name())?;

        info!(collection = name, "dropped time-series collection");

        Ok(())
    }

    /// Flush every dirty bucket in every collection; shutdown path
    pub fn flush_all(&self) -> Result<()> {
        let collections = self.collections.read();
        for collection in collections.values() {
            collection.flush_all()?;
        }
        Ok(())
    }

    /// One idle sweep across all collections, driven by the cache
    /// monitor. Returns the number of buckets flushed.
    pub fn sweep_idle(&self) -> usize {
        let collections = self.collections.read();
        let mut flushed = 0;
        for collection in collections.values() {
            flushed += collection.flush_idle();
        }
        if flushed > 0 {
            debug!(flushed, "idle sweep flushed stale buckets");
        }
        flushed
    }

    /// Reject names that denote or shadow a backing collection
    fn check_name_reserved(
        &self,
        collections: &HashMap<String, Arc<TimeSeriesCollection>>,
        name: &str,
    ) -> Result<()> {
        if collections.values().any(|c| c.backing_name() == name) {
            return Err(TsError::NameCollision(format!(
                "{} is the backing collection of a time-series collection",
                name
            )));
        }
        // A name of the shape <existing>_timeseries is reserved as that
        // collection's derived backing name.
        if let Some(base) = name.strip_suffix(crate::config::BACKING_SUFFIX) {
            if collections.contains_key(base) || self.store.collection_exists(base) {
                return Err(TsError::NameCollision(format!(
                    "{} is reserved as the derived backing name of {}",
                    name, base
                )));
            }
        }
        Ok(())
    }
}
