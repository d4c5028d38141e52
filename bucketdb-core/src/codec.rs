//! Bucket payload codec
//!
//! Serializes a bucket's document set to a compact binary payload and back.
//!
//! Payload layout:
//! - body: per document, a u32 length prefix followed by the bincode bytes
//!   of the `(Timestamp, Document)` pair
//! - in compressed mode the whole body is LZ4-compressed (size-prepended)
//! - 4 bytes: CRC32 checksum of the (possibly compressed) body
//!
//! Encoding is deterministic: the same document sequence always produces
//! the same bytes, so re-flushing an unmodified bucket rewrites an
//! identical record.

use crate::{Document, Result, Timestamp, TsError};
use bytes::{Buf, BufMut, BytesMut};

/// Serialize a document sequence into payload bytes
pub fn encode(docs: &[(Timestamp, Document)], compressed: bool) -> Result<Vec<u8>> {
    let mut body = BytesMut::new();

    for entry in docs {
        let record = bincode::serialize(entry)
            .map_err(|e| TsError::CorruptPayload(e.to_string()))?;
        body.put_u32_le(record.len() as u32);
        body.put_slice(&record);
    }

    let body = if compressed {
        lz4_flex::compress_prepend_size(&body)
    } else {
        body.to_vec()
    };

    let mut buf = BytesMut::with_capacity(body.len() + 4);
    buf.put_slice(&body);
    buf.put_u32_le(crc32fast::hash(&body));
    Ok(buf.to_vec())
}

/// Deserialize payload bytes back into the document sequence
pub fn decode(bytes: &[u8], compressed: bool) -> Result<Vec<(Timestamp, Document)>> {
    if bytes.len() < 4 {
        return Err(TsError::CorruptPayload("payload too short".into()));
    }

    let (body, mut trailer) = bytes.split_at(bytes.len() - 4);
    let expected = trailer.get_u32_le();
    let actual = crc32fast::hash(body);
    if expected != actual {
        return Err(TsError::ChecksumMismatch { expected, actual });
    }

    let body = if compressed {
        lz4_flex::decompress_size_prepended(body)
            .map_err(|e| TsError::CorruptPayload(e.to_string()))?
    } else {
        body.to_vec()
    };

    let mut docs = Vec::new();
    let mut cursor = &body[..];
    while cursor.has_remaining() {
        if cursor.remaining() < 4 {
            return Err(TsError::CorruptPayload("truncated record length".into()));
        }
        let len = cursor.get_u32_le() as usize;
        if cursor.remaining() < len {
            return Err(TsError::CorruptPayload(format!(
                "record length {} overruns payload ({} bytes left)",
                len,
                cursor.remaining()
            )));
        }
        let entry: (Timestamp, Document) = bincode::deserialize(&cursor[..len])
            .map_err(|e| TsError::CorruptPayload(e.to_string()))?;
        cursor.advance(len);
        docs.push(entry);
    }

    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FieldValue;

    fn sample_docs() -> Vec<(Timestamp, Document)> {
        vec![
            (
                2975,
                Document::new().with("_id", FieldValue::Time(2975)).with("val", "pis87"),
            ),
            (
                2420,
                Document::new().with("_id", FieldValue::Time(2420)).with("val", "op4qy"),
            ),
            (
                526,
                Document::new()
                    .with("_id", FieldValue::Time(526))
                    .with("val", 0.1f64)
                    .with("flag", true),
            ),
        ]
    }

    #[test]
    fn test_round_trip_raw() {
        let docs = sample_docs();
        let bytes = encode(&docs, false).unwrap();
        let decoded = decode(&bytes, false).unwrap();
        assert_eq!(decoded, docs);
    }

    #[test]
    fn test_round_trip_compressed() {
        let docs = sample_docs();
        let bytes = encode(&docs, true).unwrap();
        let decoded = decode(&bytes, true).unwrap();
        assert_eq!(decoded, docs);
    }

    #[test]
    fn test_order_and_values_preserved() {
        // Arrival order is not time order; both the order and the exact
        // numeric values must survive.
        let docs = vec![
            (900, Document::new().with("v", 0.1f64 + 0.2f64)),
            (100, Document::new().with("v", i64::MIN)),
            (500, Document::new().with("v", f64::MAX)),
        ];
        let decoded = decode(&encode(&docs, true).unwrap(), true).unwrap();
        assert_eq!(decoded, docs);
    }

    #[test]
    fn test_empty_payload() {
        let bytes = encode(&[], false).unwrap();
        assert_eq!(decode(&bytes, false).unwrap(), vec![]);
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut bytes = encode(&sample_docs(), false).unwrap();
        bytes[2] ^= 0xFF;
        let result = decode(&bytes, false);
        assert!(matches!(result, Err(TsError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_truncated_payload() {
        let result = decode(&[0x01, 0x02], false);
        assert!(matches!(result, Err(TsError::CorruptPayload(_))));
    }

    #[test]
    fn test_length_prefix_overrun() {
        // Hand-build a body whose record length points past the end.
        let mut body = BytesMut::new();
        body.put_u32_le(1000);
        body.put_slice(&[0u8; 4]);
        let mut bytes = body.to_vec();
        let checksum = crc32fast::hash(&bytes);
        bytes.extend_from_slice(&checksum.to_le_bytes());

        let result = decode(&bytes, false);
        assert!(matches!(result, Err(TsError::CorruptPayload(_))));
    }

    #[test]
    fn test_deterministic_encode() {
        let docs = sample_docs();
        assert_eq!(encode(&docs, false).unwrap(), encode(&docs, false).unwrap());
        assert_eq!(encode(&docs, true).unwrap(), encode(&docs, true).unwrap());
    }
}
