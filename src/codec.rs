//! Pluggable trace record encoding for the append-only log

use crate::error::LedgerError;
use crate::types::TraceRecord;

/// Trait for pluggable ledger record encoding
pub trait RecordCodec: Send + Sync {
    /// Encode a record to bytes
    fn encode(&self, record: &TraceRecord) -> Result<Vec<u8>, LedgerError>;

    /// Decode a record from bytes
    fn decode(&self, bytes: &[u8]) -> Result<TraceRecord, LedgerError>;

    /// Name of this encoding
    fn name(&self) -> &str;

    /// Version of this encoding
    fn version(&self) -> &str;
}

/// Bincode encoding, the compact default
#[derive(Debug, Clone, Default)]
pub struct BincodeCodec;

impl BincodeCodec {
    pub fn new() -> Self {
        Self
    }
}

impl RecordCodec for BincodeCodec {
    fn encode(&self, record: &TraceRecord) -> Result<Vec<u8>, LedgerError> {
        bincode::serialize(record).map_err(|e| LedgerError::Codec {
            reason: format!("bincode encode failed: {}", e),
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<TraceRecord, LedgerError> {
        bincode::deserialize(bytes).map_err(|e| LedgerError::Codec {
            reason: format!("bincode decode failed: {}", e),
        })
    }

    fn name(&self) -> &str {
        "bincode"
    }

    fn version(&self) -> &str {
        "1.3"
    }
}

/// JSON encoding, for stores that need human-readable records
#[derive(Debug, Clone, Default)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn new() -> Self {
        Self
    }
}

impl RecordCodec for JsonCodec {
    fn encode(&self, record: &TraceRecord) -> Result<Vec<u8>, LedgerError> {
        serde_json::to_vec(record).map_err(|e| LedgerError::Codec {
            reason: format!("json encode failed: {}", e),
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<TraceRecord, LedgerError> {
        serde_json::from_slice(bytes).map_err(|e| LedgerError::Codec {
            reason: format!("json decode failed: {}", e),
        })
    }

    fn name(&self) -> &str {
        "json"
    }

    fn version(&self) -> &str {
        "1.0"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContentHash, EventType, ExecutionStatus, Version};
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_record() -> TraceRecord {
        TraceRecord {
            sequence: 0,
            trace_id: Uuid::new_v4(),
            event_type: EventType::Execution,
            function_id: "loan_eligibility".to_string(),
            version: Version::new(1, 0, 0),
            function_hash: ContentHash([3; 32]),
            caller_id: "svc-a".to_string(),
            timestamp: Utc::now(),
            status: ExecutionStatus::Ok,
            error: None,
            input_hash: ContentHash([1; 32]),
            output_hash: Some(ContentHash([2; 32])),
            feature_snapshot_ref: None,
            governance: None,
            prev_hash: ContentHash::zero(),
            chain_hash: ContentHash([9; 32]),
        }
    }

    #[test]
    fn test_bincode_codec_roundtrip() {
        let codec = BincodeCodec::new();
        let record = sample_record();

        let bytes = codec.encode(&record).unwrap();
        let back = codec.decode(&bytes).unwrap();

        assert_eq!(back, record);
    }

    #[test]
    fn test_json_codec_roundtrip() {
        let codec = JsonCodec::new();
        let record = sample_record();

        let bytes = codec.encode(&record).unwrap();
        let back = codec.decode(&bytes).unwrap();

        assert_eq!(back, record);
    }

    #[test]
    fn test_codec_names_and_versions() {
        assert_eq!(BincodeCodec::new().name(), "bincode");
        assert_eq!(BincodeCodec::new().version(), "1.3");
        assert_eq!(JsonCodec::new().name(), "json");
        assert_eq!(JsonCodec::new().version(), "1.0");
    }

    #[test]
    fn test_garbage_bytes_fail_decode() {
        let codec = JsonCodec::new();
        assert!(codec.decode(b"not json").is_err());
    }
}
