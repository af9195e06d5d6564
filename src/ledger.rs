//! Immutable hash-chained trace ledger
//!
//! A single globally ordered append-only sequence of trace records. Each
//! record's chain hash is `H(prev_chain_hash || canonical(record without
//! chain_hash))`, with the first record chained off a fixed genesis value.
//! Records store the *value* of the previous hash, never a live reference,
//! so concurrent readers are always safe.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use uuid::Uuid;

use crate::codec::RecordCodec;
use crate::error::{LedgerError, StoreError};
use crate::hasher::ContentHasher;
use crate::store::AppendOnlyLog;
use crate::types::{
    ContentHash, EventType, ExecutionStatus, GovernanceAction, TraceFault, TraceRecord, Version,
};

/// Everything a record carries before the ledger assigns its place in the chain
#[derive(Debug, Clone)]
pub struct TraceDraft {
    pub trace_id: Uuid,
    pub event_type: EventType,
    pub function_id: String,
    pub version: Version,
    pub function_hash: ContentHash,
    pub caller_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub error: Option<TraceFault>,
    pub input_hash: ContentHash,
    pub output_hash: Option<ContentHash>,
    pub feature_snapshot_ref: Option<ContentHash>,
    pub governance: Option<GovernanceAction>,
}

/// Result of verifying a range of the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityReport {
    pub ok: bool,
    pub first_broken_trace_id: Option<Uuid>,
    pub records_checked: u64,
}

#[derive(Debug)]
struct ChainState {
    tail: ContentHash,
    next_sequence: u64,
}

/// The hash-chained trace ledger
///
/// `append` is the single serialization point in the system: record payloads
/// may be computed concurrently, but chaining is linearized behind one lock
/// because each chain hash depends on the previous one.
pub struct TraceLedger {
    log: Arc<dyn AppendOnlyLog>,
    codec: Box<dyn RecordCodec>,
    hasher: ContentHasher,
    chain: Mutex<ChainState>,
    index: RwLock<HashMap<Uuid, u64>>,
}

impl std::fmt::Debug for TraceLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceLedger")
            .field("chain", &self.chain)
            .finish_non_exhaustive()
    }
}

impl TraceLedger {
    /// Open a ledger over a log, rebuilding chain state from existing records
    ///
    /// The chain is recomputed while loading; a log that fails verification
    /// is refused rather than silently extended.
    pub fn open(
        log: Arc<dyn AppendOnlyLog>,
        codec: Box<dyn RecordCodec>,
    ) -> Result<Self, LedgerError> {
        let hasher = ContentHasher::new();
        let mut tail = hasher.genesis();
        let mut index = HashMap::new();

        let existing = log.len()?;
        for sequence in 0..existing {
            let bytes = log
                .read(sequence)?
                .ok_or(LedgerError::Storage(StoreError::NotFound {
                    key: format!("log/{}", sequence),
                }))?;
            let record = codec.decode(&bytes)?;

            let mut unchained = record.clone();
            unchained.chain_hash = ContentHash::zero();
            let payload = chain_payload_bytes(&hasher, &unchained)?;
            let expected = hasher.extend_chain(&tail, &payload);
            if record.prev_hash != tail || record.chain_hash != expected {
                return Err(LedgerError::ChainIntegrity {
                    sequence,
                    reason: "recorded chain hash does not match recomputation".to_string(),
                });
            }

            index.insert(record.trace_id, sequence);
            tail = record.chain_hash;
        }

        Ok(Self {
            log,
            codec,
            hasher,
            chain: Mutex::new(ChainState {
                tail,
                next_sequence: existing,
            }),
            index: RwLock::new(index),
        })
    }

    /// Append a record, assigning its sequence and chain hashes
    ///
    /// Idempotency is keyed on `trace_id`: a duplicate append is rejected,
    /// never silently re-chained.
    pub fn append(&self, draft: TraceDraft) -> Result<TraceRecord, LedgerError> {
        let mut chain = self.chain.lock().map_err(|_| {
            LedgerError::Storage(StoreError::Backend {
                reason: "chain lock poisoned".to_string(),
            })
        })?;

        {
            let index = self.index.read().map_err(|_| {
                LedgerError::Storage(StoreError::Backend {
                    reason: "index lock poisoned".to_string(),
                })
            })?;
            if index.contains_key(&draft.trace_id) {
                return Err(LedgerError::DuplicateTrace {
                    trace_id: draft.trace_id,
                });
            }
        }

        let mut record = TraceRecord {
            sequence: chain.next_sequence,
            trace_id: draft.trace_id,
            event_type: draft.event_type,
            function_id: draft.function_id,
            version: draft.version,
            function_hash: draft.function_hash,
            caller_id: draft.caller_id,
            timestamp: draft.timestamp,
            status: draft.status,
            error: draft.error,
            input_hash: draft.input_hash,
            output_hash: draft.output_hash,
            feature_snapshot_ref: draft.feature_snapshot_ref,
            governance: draft.governance,
            prev_hash: chain.tail,
            chain_hash: ContentHash::zero(),
        };

        let payload = chain_payload_bytes(&self.hasher, &record)?;
        record.chain_hash = self.hasher.extend_chain(&chain.tail, &payload);

        let bytes = self.codec.encode(&record)?;
        let sequence = self.log.append(&bytes)?;
        debug_assert_eq!(sequence, record.sequence);

        chain.tail = record.chain_hash;
        chain.next_sequence += 1;

        let mut index = self.index.write().map_err(|_| {
            LedgerError::Storage(StoreError::Backend {
                reason: "index lock poisoned".to_string(),
            })
        })?;
        index.insert(record.trace_id, record.sequence);

        Ok(record)
    }

    /// Number of records in the ledger
    pub fn len(&self) -> Result<u64, LedgerError> {
        Ok(self.log.len()?)
    }

    pub fn is_empty(&self) -> Result<bool, LedgerError> {
        Ok(self.len()? == 0)
    }

    /// Load a record by trace id
    pub fn get(&self, trace_id: &Uuid) -> Result<TraceRecord, LedgerError> {
        let sequence = {
            let index = self.index.read().map_err(|_| {
                LedgerError::Storage(StoreError::Backend {
                    reason: "index lock poisoned".to_string(),
                })
            })?;
            *index
                .get(trace_id)
                .ok_or(LedgerError::UnknownTrace { trace_id: *trace_id })?
        };
        self.read_record(sequence)
    }

    /// Load a record by sequence number
    pub fn read_record(&self, sequence: u64) -> Result<TraceRecord, LedgerError> {
        let bytes = self
            .log
            .read(sequence)?
            .ok_or(LedgerError::Storage(StoreError::NotFound {
                key: format!("log/{}", sequence),
            }))?;
        self.codec.decode(&bytes)
    }

    /// All records for a function whose timestamps fall in `[start, end)`
    pub fn range_query(
        &self,
        function_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TraceRecord>, LedgerError> {
        let mut records = Vec::new();
        for sequence in 0..self.len()? {
            let record = self.read_record(sequence)?;
            if record.function_id == function_id
                && record.timestamp >= start
                && record.timestamp < end
            {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// All records in sequence order
    pub fn records(&self) -> Result<Vec<TraceRecord>, LedgerError> {
        let mut records = Vec::new();
        for sequence in 0..self.len()? {
            records.push(self.read_record(sequence)?);
        }
        Ok(records)
    }

    /// Recompute the chain over `[from, to]` and report the first break
    ///
    /// Verification from sequence 0 anchors on the genesis value; a range
    /// starting later anchors on the recorded chain hash of the preceding
    /// record, so full-ledger verification is the authoritative check.
    pub fn verify_integrity(
        &self,
        from: u64,
        to: Option<u64>,
    ) -> Result<IntegrityReport, LedgerError> {
        let len = self.len()?;
        let to = to.unwrap_or(len.saturating_sub(1));
        if len == 0 || from > to {
            return Ok(IntegrityReport {
                ok: true,
                first_broken_trace_id: None,
                records_checked: 0,
            });
        }

        let mut tail = if from == 0 {
            self.hasher.genesis()
        } else {
            self.read_record(from - 1)?.chain_hash
        };

        let mut checked = 0;
        for sequence in from..=to.min(len - 1) {
            let record = self.read_record(sequence)?;
            checked += 1;

            let mut expected = record.clone();
            expected.chain_hash = ContentHash::zero();
            let payload = chain_payload_bytes(&self.hasher, &expected)?;
            let expected_chain = self.hasher.extend_chain(&tail, &payload);

            if record.prev_hash != tail
                || record.chain_hash != expected_chain
                || record.sequence != sequence
            {
                return Ok(IntegrityReport {
                    ok: false,
                    first_broken_trace_id: Some(record.trace_id),
                    records_checked: checked,
                });
            }
            tail = record.chain_hash;
        }

        Ok(IntegrityReport {
            ok: true,
            first_broken_trace_id: None,
            records_checked: checked,
        })
    }
}

/// Canonical bytes of a record with its chain hash excluded
fn chain_payload_bytes(
    hasher: &ContentHasher,
    record: &TraceRecord,
) -> Result<Vec<u8>, LedgerError> {
    let mut value = serde_json::to_value(record).map_err(|e| LedgerError::Canonicalization {
        reason: e.to_string(),
    })?;
    if let Some(map) = value.as_object_mut() {
        map.remove("chain_hash");
    }
    hasher.canonical_bytes(&value)
}
