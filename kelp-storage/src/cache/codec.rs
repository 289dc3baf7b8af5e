//! zstd payload encoding used by the compress retention action.

use kelp_core::{CacheRecord, KelpResult, Payload, StorageError};
use serde_json::Value;

/// Compression level used when a policy does not choose one.
pub const DEFAULT_LEVEL: i32 = 3;

/// Decode a stored payload into its JSON value.
pub fn decode_payload(payload: &Payload) -> KelpResult<Value> {
    match payload {
        Payload::Inline { value } => Ok(value.clone()),
        Payload::Compressed {
            bytes,
            original_size,
        } => {
            let raw = zstd::bulk::decompress(bytes, *original_size as usize).map_err(|e| {
                StorageError::Backend {
                    reason: format!("zstd decompress failed: {e}"),
                }
            })?;
            serde_json::from_slice(&raw).map_err(|e| {
                StorageError::Backend {
                    reason: format!("compressed payload is not JSON: {e}"),
                }
                .into()
            })
        }
    }
}

/// Compress an inline payload. Already compressed payloads are returned as is.
pub fn compress_payload(payload: &Payload, level: i32) -> KelpResult<Payload> {
    match payload {
        Payload::Compressed { .. } => Ok(payload.clone()),
        Payload::Inline { value } => {
            let raw = serde_json::to_vec(value).map_err(|e| StorageError::Backend {
                reason: format!("payload encode failed: {e}"),
            })?;
            let bytes = zstd::bulk::compress(&raw, level).map_err(|e| StorageError::Backend {
                reason: format!("zstd compress failed: {e}"),
            })?;
            Ok(Payload::Compressed {
                bytes,
                original_size: raw.len() as u64,
            })
        }
    }
}

/// Compress a record's payload in place.
///
/// Returns the bytes saved, or `None` when the record was already compressed.
pub fn compress_record(record: &mut CacheRecord, level: i32) -> KelpResult<Option<u64>> {
    if record.payload.is_compressed() {
        return Ok(None);
    }
    let before = record.size_bytes;
    let compressed = compress_payload(&record.payload, level)?;
    record.replace_payload(compressed);
    Ok(Some(before.saturating_sub(record.size_bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compressed_payload_decodes_to_original() {
        let value = json!({"series": vec![1.5; 256], "station": "benguela-07"});
        let compressed = compress_payload(&Payload::inline(value.clone()), DEFAULT_LEVEL).unwrap();
        assert!(compressed.is_compressed());
        assert!(compressed.stored_size() < Payload::inline(value.clone()).stored_size());
        assert_eq!(decode_payload(&compressed).unwrap(), value);
    }

    #[test]
    fn test_compress_is_idempotent() {
        let once = compress_payload(&Payload::inline(json!([1, 2, 3])), DEFAULT_LEVEL).unwrap();
        let twice = compress_payload(&once, DEFAULT_LEVEL).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_corrupt_bytes_are_an_error() {
        let bogus = Payload::Compressed {
            bytes: vec![1, 2, 3, 4],
            original_size: 16,
        };
        assert!(decode_payload(&bogus).is_err());
    }
}
