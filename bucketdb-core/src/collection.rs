//! Time-series collection front
//!
//! The user-facing virtual collection: routes inserts to the bucket for
//! the document's time window and serves reads by merging resident buckets
//! with persisted bucket records.

use crate::cache::{BucketCache, CacheStats};
use crate::store::{BucketStore, CollectionStore};
use crate::types::window_key;
use crate::{Document, FieldValue, Result, TimeRange, Timestamp, TsError, WindowKey};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Resolved time-series collection configuration, immutable after create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionConfig {
    /// LZ4-compress bucket payloads
    pub compressed: bool,
    /// Maximum resident bucket count (soft bound)
    pub cache_size: usize,
    /// Window width in milliseconds
    pub millis_in_batch: i64,
    /// Document field holding the time value
    pub time_field: String,
    /// Backing collection name; derived from the collection name if absent
    pub backing_name: Option<String>,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            compressed: false,
            cache_size: crate::config::DEFAULT_CACHE_SIZE,
            millis_in_batch: crate::config::DEFAULT_MILLIS_IN_BATCH,
            time_field: crate::config::DEFAULT_TIME_FIELD.to_string(),
            backing_name: None,
        }
    }
}

impl CollectionConfig {
    /// Parse the `timeseries` creation option.
    ///
    /// Three input shapes are accepted: `true` (the exploratory scripts
    /// also send the string `"true"`), an empty object, and an object with
    /// any subset of the recognized fields. All resolve to one defaulted
    /// configuration; the raw shape never travels further than this
    /// function.
    pub fn parse(spec: &Value) -> Result<Self> {
        match spec {
            Value::Bool(true) => Ok(Self::default()),
            Value::String(s) if s == "true" => Ok(Self::default()),
            Value::Object(fields) => {
                let mut config = Self::default();
                for (key, value) in fields {
                    match key.as_str() {
                        "compressed" => {
                            config.compressed = value.as_bool().ok_or_else(|| {
                                TsError::InvalidConfig("compressed must be a boolean".into())
                            })?;
                        }
                        "cache_size" => {
                            let n = value.as_u64().ok_or_else(|| {
                                TsError::InvalidConfig(
                                    "cache_size must be a non-negative integer".into(),
                                )
                            })?;
                            config.cache_size = n as usize;
                        }
                        "millis_in_batch" => {
                            let n = value.as_i64().ok_or_else(|| {
                                TsError::InvalidConfig(
                                    "millis_in_batch must be an integer".into(),
                                )
                            })?;
                            config.millis_in_batch = n;
                        }
                        "time_field" => {
                            let s = value.as_str().ok_or_else(|| {
                                TsError::InvalidConfig("time_field must be a string".into())
                            })?;
                            config.time_field = s.to_string();
                        }
                        "backing_name" => {
                            let s = value.as_str().ok_or_else(|| {
                                TsError::InvalidConfig("backing_name must be a string".into())
                            })?;
                            config.backing_name = Some(s.to_string());
                        }
                        other => {
                            return Err(TsError::InvalidConfig(format!(
                                "unrecognized timeseries option: {}",
                                other
                            )));
                        }
                    }
                }
                Ok(config)
            }
            other => Err(TsError::InvalidConfig(format!(
                "timeseries option must be true or an object, got {}",
                other
            ))),
        }
    }

    /// Validate the configuration for a collection name
    pub fn validate(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(TsError::InvalidConfig("collection name is empty".into()));
        }
        for prefix in crate::config::RESERVED_NAME_PREFIXES {
            if name.starts_with(prefix) {
                return Err(TsError::InvalidConfig(format!(
                    "collection name may not start with reserved prefix {}",
                    prefix
                )));
            }
        }
        if self.cache_size < 1 {
            return Err(TsError::InvalidConfig("cache_size must be at least 1".into()));
        }
        if self.millis_in_batch <= 0 {
            return Err(TsError::InvalidConfig(
                "millis_in_batch must be positive".into(),
            ));
        }
        if self.time_field.is_empty() {
            return Err(TsError::InvalidConfig("time_field is empty".into()));
        }
        if let Some(backing) = &self.backing_name {
            if backing.is_empty() {
                return Err(TsError::InvalidConfig("backing_name is empty".into()));
            }
        }
        Ok(())
    }

    /// Backing collection name for a collection, derived unless overridden
    pub fn resolve_backing(&self, name: &str) -> String {
        self.backing_name
            .clone()
            .unwrap_or_else(|| format!("{}{}", name, crate::config::BACKING_SUFFIX))
    }
}

/// A find predicate: an optional time range plus residual field equalities
#[derive(Debug, Clone, Default)]
pub struct Query {
    time_range: Option<TimeRange>,
    filters: Vec<(String, FieldValue)>,
}

impl Query {
    /// Match every document
    pub fn all() -> Self {
        Self::default()
    }

    /// Match documents whose time value lies in `[lo, hi]`
    pub fn range(lo: Timestamp, hi: Timestamp) -> Self {
        Self {
            time_range: Some(TimeRange::new(lo, hi)),
            filters: Vec::new(),
        }
    }

    /// Add an equality predicate on a field
    pub fn with_eq(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }
}

/// Outcome of a batch insert: per-document failures leave siblings intact
#[derive(Debug, Default)]
pub struct InsertManyResult {
    /// Documents stored
    pub inserted: usize,
    /// Rejected documents as (input index, reason)
    pub errors: Vec<(usize, TsError)>,
}

/// A time-series collection instance
pub struct TimeSeriesCollection {
    name: String,
    config: CollectionConfig,
    backing: String,
    cache: Mutex<BucketCache>,
    reader: BucketStore,
}

impl TimeSeriesCollection {
    pub(crate) fn new(
        name: impl Into<String>,
        config: CollectionConfig,
        store: Arc<dyn CollectionStore>,
    ) -> Self {
        let name = name.into();
        let backing = config.resolve_backing(&name);
        let cache = BucketCache::new(
            BucketStore::new(store.clone(), backing.clone()),
            config.cache_size,
            config.compressed,
        );
        Self {
            name,
            reader: BucketStore::new(store, backing.clone()),
            backing,
            cache: Mutex::new(cache),
            config,
        }
    }

    /// Collection name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolved configuration
    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    /// Name of the backing collection
    pub fn backing_name(&self) -> &str {
        &self.backing
    }

    /// Insert one document.
    ///
    /// The configured time field must be present and hold a time value;
    /// eviction triggered by the insert never fails the insert itself.
    pub fn insert(&self, doc: Document) -> Result<()> {
        let ts = self.extract_time(&doc)?;
        let key = window_key(ts, self.config.millis_in_batch);
        self.cache.lock().append(key, ts, doc)
    }

    /// Insert a batch; a rejected document does not affect its siblings
    pub fn insert_many(&self, docs: impl IntoIterator<Item = Document>) -> InsertManyResult {
        let mut result = InsertManyResult::default();
        for (index, doc) in docs.into_iter().enumerate() {
            match self.insert(doc) {
                Ok(()) => result.inserted += 1,
                Err(e) => result.errors.push((index, e)),
            }
        }
        result
    }

    /// Find documents matching a query.
    ///
    /// Returns a lazy, single-pass cursor that visits windows in ascending
    /// key order and decodes one bucket at a time, so peak memory stays at
    /// one decompressed bucket. The stream is non-decreasing by time. A
    /// corrupt persisted bucket yields one error item; the cursor then
    /// continues with the next window.
    pub fn find(&self, query: &Query) -> Result<FindCursor<'_>> {
        let (range, residual) = self.fold_time_predicates(query);

        let keys = match range {
            Some(range) => {
                let windows = range.window_keys(self.config.millis_in_batch);
                let (lo, hi) = (*windows.start(), *windows.end());
                self.known_keys(lo, hi)?
            }
            None => self.known_keys(i64::MIN, i64::MAX)?,
        };
        debug!(collection = %self.name, windows = keys.len(), "find");

        Ok(FindCursor {
            collection: self,
            keys,
            next_key: 0,
            pending: Vec::new().into_iter(),
            range,
            residual,
        })
    }

    /// Flush every dirty resident bucket
    pub fn flush_all(&self) -> Result<()> {
        self.cache.lock().flush_all()
    }

    /// Flush buckets untouched since the previous sweep
    pub fn flush_idle(&self) -> usize {
        self.cache.lock().flush_idle()
    }

    /// Cache counters
    pub fn stats(&self) -> CacheStats {
        self.cache.lock().stats()
    }

    fn extract_time(&self, doc: &Document) -> Result<Timestamp> {
        let field = &self.config.time_field;
        match doc.get(field) {
            None => Err(TsError::MissingTimeField(field.clone())),
            Some(FieldValue::Time(ts)) => Ok(*ts),
            Some(other) => Err(TsError::InvalidTimeType {
                field: field.clone(),
                found: other.type_name().to_string(),
            }),
        }
    }

    /// Fold equality predicates on the time field into the time range
    fn fold_time_predicates(&self, query: &Query) -> (Option<TimeRange>, Vec<(String, FieldValue)>) {
        let mut range = query.time_range;
        let mut residual = Vec::new();
        for (field, value) in &query.filters {
            if *field == self.config.time_field {
                if let FieldValue::Time(ts) = value {
                    let point = TimeRange::at(*ts);
                    range = Some(match range {
                        Some(r) => TimeRange::new(r.start.max(point.start), r.end.min(point.end)),
                        None => point,
                    });
                    continue;
                }
            }
            residual.push((field.clone(), value.clone()));
        }
        (range, residual)
    }

    /// Known window keys in `[lo, hi]`: resident plus persisted, ascending
    fn known_keys(&self, lo: WindowKey, hi: WindowKey) -> Result<Vec<WindowKey>> {
        let mut keys = self.reader.keys(lo, hi)?;
        for key in self.cache.lock().resident_keys() {
            if key >= lo && key <= hi {
                keys.push(key);
            }
        }
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }

    /// Documents for one window: the resident bucket wins over the
    /// persisted record, so a key is never served from both.
    fn window_docs(&self, key: WindowKey) -> Result<Vec<(Timestamp, Document)>> {
        if let Some(snapshot) = self.cache.lock().snapshot(key) {
            return Ok(snapshot);
        }
        match self.reader.get(key)? {
            Some(record) => crate::codec::decode(&record.payload, record.compressed),
            None => Ok(Vec::new()),
        }
    }
}

/// Lazy, single-pass, non-restartable stream of matching documents
pub struct FindCursor<'a> {
    collection: &'a TimeSeriesCollection,
    keys: Vec<WindowKey>,
    next_key: usize,
    pending: std::vec::IntoIter<Document>,
    range: Option<TimeRange>,
    residual: Vec<(String, FieldValue)>,
}

impl FindCursor<'_> {
    fn matches(&self, ts: Timestamp, doc: &Document) -> bool {
        if let Some(range) = &self.range {
            if !range.contains(ts) {
                return false;
            }
        }
        self.residual
            .iter()
            .all(|(field, value)| doc.get(field) == Some(value))
    }
}

impl Iterator for FindCursor<'_> {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(doc) = self.pending.next() {
                return Some(Ok(doc));
            }
            if self.next_key >= self.keys.len() {
                return None;
            }

            let key = self.keys[self.next_key];
            self.next_key += 1;

            let mut docs = match self.collection.window_docs(key) {
                Ok(docs) => docs,
                Err(e) => return Some(Err(e)),
            };
            docs.retain(|(ts, doc)| self.matches(*ts, doc));
            // Windows are disjoint, so sorting within the bucket keeps the
            // whole stream non-decreasing by time.
            docs.sort_by_key(|(ts, _)| *ts);
            self.pending = docs
                .into_iter()
                .map(|(_, doc)| doc)
                .collect::<Vec<_>>()
                .into_iter();
        }
    }
}
