//! In-memory bucket: one time window's accumulated documents

use crate::codec;
use crate::store::BucketRecord;
use crate::{Document, Result, Timestamp, WindowKey};

/// Residency state of a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    /// Owned by the cache, accepting appends
    Open,
    /// Snapshot taken, write to the backing collection in flight
    Flushing,
    /// Backing write acknowledged; the bucket may leave memory
    Flushed,
}

/// One time window's documents plus metadata.
///
/// Documents are kept in arrival order, which is not necessarily time
/// order; every time value lies in `[key * width, (key + 1) * width)`.
#[derive(Debug, Clone)]
pub struct Bucket {
    key: WindowKey,
    docs: Vec<(Timestamp, Document)>,
    min_time: Timestamp,
    max_time: Timestamp,
    dirty: bool,
    state: Residency,
    /// Appended to or read since the last monitor sweep
    active: bool,
}

impl Bucket {
    /// Create an empty open bucket for a window
    pub fn new(key: WindowKey) -> Self {
        Self {
            key,
            docs: Vec::new(),
            min_time: i64::MAX,
            max_time: i64::MIN,
            dirty: false,
            state: Residency::Open,
            active: true,
        }
    }

    /// Rebuild an open bucket from its persisted record.
    ///
    /// Used when a previously flushed window receives a late arrival: the
    /// persisted documents are loaded back so the next flush writes the
    /// merged set. The bucket starts clean; the append that prompted the
    /// reload marks it dirty.
    pub fn from_record(record: &BucketRecord) -> Result<Self> {
        let docs = codec::decode(&record.payload, record.compressed)?;
        let mut bucket = Self::new(record.id);
        bucket.min_time = record.min_time;
        bucket.max_time = record.max_time;
        bucket.docs = docs;
        Ok(bucket)
    }

    /// Window key
    pub fn key(&self) -> WindowKey {
        self.key
    }

    /// Append a document in arrival order
    pub fn append(&mut self, ts: Timestamp, doc: Document) {
        self.min_time = self.min_time.min(ts);
        self.max_time = self.max_time.max(ts);
        self.docs.push((ts, doc));
        self.dirty = true;
        self.active = true;
    }

    /// Number of documents
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// Check if the bucket holds no documents
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Smallest time value seen, if any
    pub fn min_time(&self) -> Option<Timestamp> {
        (!self.docs.is_empty()).then_some(self.min_time)
    }

    /// Largest time value seen, if any
    pub fn max_time(&self) -> Option<Timestamp> {
        (!self.docs.is_empty()).then_some(self.max_time)
    }

    /// Immutable ordered view of the accumulated documents
    pub fn snapshot(&self) -> &[(Timestamp, Document)] {
        &self.docs
    }

    /// Encode into a persisted bucket record
    pub fn to_record(&self, compressed: bool) -> Result<BucketRecord> {
        let payload = codec::encode(&self.docs, compressed)?;
        Ok(BucketRecord {
            id: self.key,
            payload,
            count: self.docs.len() as u32,
            min_time: self.min_time().unwrap_or(0),
            max_time: self.max_time().unwrap_or(0),
            compressed,
        })
    }

    /// True until the bucket's current contents are persisted
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Residency state
    pub fn state(&self) -> Residency {
        self.state
    }

    /// Open -> Flushing, at snapshot time
    pub fn begin_flush(&mut self) {
        debug_assert_eq!(self.state, Residency::Open);
        self.state = Residency::Flushing;
    }

    /// Flushing -> Flushed, once the backing write is acknowledged
    pub fn complete_flush(&mut self) {
        debug_assert_eq!(self.state, Residency::Flushing);
        self.state = Residency::Flushed;
        self.dirty = false;
    }

    /// Flushing -> Open, after a failed backing write; contents unchanged
    pub fn abort_flush(&mut self) {
        debug_assert_eq!(self.state, Residency::Flushing);
        self.state = Residency::Open;
    }

    /// Mark the bucket as touched by a read
    pub fn touch(&mut self) {
        self.active = true;
    }

    /// Return the activity flag and reset it for the next sweep
    pub fn take_active(&mut self) -> bool {
        std::mem::replace(&mut self.active, false)
    }
}
