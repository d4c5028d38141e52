//! Core types for BucketDB

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp in milliseconds since Unix epoch
pub type Timestamp = i64;

/// Identifier of a time window: its start, floor-divided by the window width
pub type WindowKey = i64;

/// Compute the window key for a timestamp given the window width in millis.
///
/// Uses euclidean division so timestamps before the epoch land in the
/// window whose start precedes them.
pub fn window_key(ts: Timestamp, width: i64) -> WindowKey {
    ts.div_euclid(width)
}

/// Possible document field value types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Point in time, millisecond precision
    Time(Timestamp),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// Boolean
    Bool(bool),
    /// String
    Str(String),
    /// Explicit null
    Null,
}

impl FieldValue {
    /// Get as a timestamp if this is a time value
    pub fn as_time(&self) -> Option<Timestamp> {
        match self {
            FieldValue::Time(ts) => Some(*ts),
            _ => None,
        }
    }

    /// Get as i64 if possible
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            FieldValue::Float(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Name of the variant, used in error reporting
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Time(_) => "time",
            FieldValue::Int(_) => "int",
            FieldValue::Float(_) => "float",
            FieldValue::Bool(_) => "bool",
            FieldValue::Str(_) => "string",
            FieldValue::Null => "null",
        }
    }

    /// Get the size in bytes (approximate)
    pub fn size(&self) -> usize {
        match self {
            FieldValue::Time(_) => 8,
            FieldValue::Int(_) => 8,
            FieldValue::Float(_) => 8,
            FieldValue::Bool(_) => 1,
            FieldValue::Str(s) => s.len(),
            FieldValue::Null => 0,
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        FieldValue::Time(v.timestamp_millis())
    }
}

/// A document: an ordered sequence of named field values.
///
/// Field order is part of the document's identity and survives
/// encode/decode, so the container is a plain vector rather than a map.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Document {
    fields: Vec<(String, FieldValue)>,
}

impl Document {
    /// Create an empty document
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Append a field, builder style
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    /// Set a field value, replacing an existing field of the same name
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Get the first value for a field name
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if the document has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate over fields in document order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter().map(|(n, v)| (n, v))
    }

    /// Get the size in bytes (approximate)
    pub fn size(&self) -> usize {
        self.fields
            .iter()
            .map(|(n, v)| n.len() + v.size())
            .sum()
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match value {
                FieldValue::Time(ts) => write!(f, "{}: Time({})", name, ts)?,
                FieldValue::Int(v) => write!(f, "{}: {}", name, v)?,
                FieldValue::Float(v) => write!(f, "{}: {}", name, v)?,
                FieldValue::Bool(v) => write!(f, "{}: {}", name, v)?,
                FieldValue::Str(v) => write!(f, "{}: \"{}\"", name, v)?,
                FieldValue::Null => write!(f, "{}: null", name)?,
            }
        }
        write!(f, "}}")
    }
}

/// Inclusive time range for queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Start timestamp (inclusive)
    pub start: Timestamp,
    /// End timestamp (inclusive)
    pub end: Timestamp,
}

impl TimeRange {
    /// Create a new time range
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// A range covering a single instant
    pub fn at(ts: Timestamp) -> Self {
        Self { start: ts, end: ts }
    }

    /// The full timestamp domain
    pub fn all() -> Self {
        Self {
            start: i64::MIN,
            end: i64::MAX,
        }
    }

    /// Check if a timestamp is within the range
    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.start && ts <= self.end
    }

    /// Check if two ranges overlap
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start <= other.end && self.end >= other.start
    }

    /// Window keys overlapped by this range for a given window width
    pub fn window_keys(&self, width: i64) -> std::ops::RangeInclusive<WindowKey> {
        window_key(self.start, width)..=window_key(self.end, width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_key() {
        assert_eq!(window_key(0, 1000), 0);
        assert_eq!(window_key(999, 1000), 0);
        assert_eq!(window_key(1000, 1000), 1);
        assert_eq!(window_key(2975, 1000), 2);
        // Pre-epoch timestamps round toward the preceding window start
        assert_eq!(window_key(-1, 1000), -1);
        assert_eq!(window_key(-1000, 1000), -1);
        assert_eq!(window_key(-1001, 1000), -2);
    }

    #[test]
    fn test_document_field_order() {
        let doc = Document::new()
            .with("_id", FieldValue::Time(2975))
            .with("val", "pis87")
            .with("n", 42i64);

        let names: Vec<&String> = doc.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["_id", "val", "n"]);
        assert_eq!(doc.get("val"), Some(&FieldValue::Str("pis87".into())));
        assert_eq!(doc.get("missing"), None);
    }

    #[test]
    fn test_document_set_replaces() {
        let mut doc = Document::new().with("val", 1i64);
        doc.set("val", 2i64);
        assert_eq!(doc.len(), 1);
        assert_eq!(doc.get("val"), Some(&FieldValue::Int(2)));
    }

    #[test]
    fn test_time_range() {
        let range1 = TimeRange::new(100, 200);
        let range2 = TimeRange::new(150, 250);
        let range3 = TimeRange::new(300, 400);

        assert!(range1.overlaps(&range2));
        assert!(!range1.overlaps(&range3));
        assert!(range1.contains(200));
        assert!(!range1.contains(250));
    }

    #[test]
    fn test_range_window_keys() {
        let range = TimeRange::new(500, 2500);
        let keys: Vec<WindowKey> = range.window_keys(1000).collect();
        assert_eq!(keys, [0, 1, 2]);
    }
}
