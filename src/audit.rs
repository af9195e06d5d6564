//! Independent audit and replay service
//!
//! Runs entirely against read-only views of the registry, ledger, and blob
//! store, and never writes to the primary ledger: drift reports are a
//! separate artifact, which is what keeps the audit credible.

use rayon::prelude::*;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::context::{EvaluationContext, FeatureSnapshot};
use crate::error::AuditError;
use crate::hasher::ContentHasher;
use crate::ledger::{IntegrityReport, TraceLedger};
use crate::registry::FunctionResolver;
use crate::store::BlobStore;
use crate::types::{
    ArtifactStatus, ContentHash, DriftClass, DriftReport, EventType, ExecutionStatus, TraceRecord,
    Version,
};

/// Full-ledger verification result with coverage statistics
#[derive(Debug, Clone)]
pub struct ChainAuditReport {
    pub integrity: IntegrityReport,
    pub total_records: u64,
    pub execution_records: u64,
    pub governance_records: u64,
    /// Distinct (function, version) pairs observed in execution records
    pub functions_covered: usize,
}

/// Aggregated outcome of replaying many historical traces
#[derive(Debug, Clone, Default)]
pub struct BulkReplayReport {
    pub total: usize,
    pub matched: usize,
    pub mismatched: usize,
    pub identical: usize,
    pub regressions: usize,
    pub improvements: usize,
    pub neutral: usize,
    pub violations: usize,
    pub failed_replays: usize,
    pub reports: Vec<DriftReport>,
}

impl BulkReplayReport {
    fn absorb(&mut self, report: DriftReport) {
        self.total += 1;
        if report.matched {
            self.matched += 1;
        } else {
            self.mismatched += 1;
        }
        match report.classification {
            DriftClass::Identical => self.identical += 1,
            DriftClass::Regression => self.regressions += 1,
            DriftClass::Improvement => self.improvements += 1,
            DriftClass::Neutral => self.neutral += 1,
            DriftClass::Violation => self.violations += 1,
        }
        self.reports.push(report);
    }
}

/// Classifies a cross-version output difference as drift
///
/// Only consulted when outputs differ; same-version differences are always
/// determinism violations, never drift.
pub trait DriftClassifier: Send + Sync {
    fn classify(&self, original: &Value, replayed: &Value) -> DriftClass;
}

/// Classifier comparing one decision-relevant output field
///
/// An optional worst-to-best ranking of field values decides direction:
/// moving up the ranking is an improvement, down is a regression. A changed
/// value outside the ranking is conservatively a regression; differences
/// that leave the decision field untouched are neutral.
#[derive(Debug, Clone)]
pub struct OutcomeFieldClassifier {
    pub decision_field: String,
    pub ranking: Vec<Value>,
}

impl OutcomeFieldClassifier {
    pub fn new(decision_field: impl Into<String>, ranking: Vec<Value>) -> Self {
        Self {
            decision_field: decision_field.into(),
            ranking,
        }
    }

    fn rank(&self, value: Option<&Value>) -> Option<usize> {
        let value = value?;
        self.ranking.iter().position(|candidate| candidate == value)
    }
}

impl DriftClassifier for OutcomeFieldClassifier {
    fn classify(&self, original: &Value, replayed: &Value) -> DriftClass {
        let before = original.get(&self.decision_field);
        let after = replayed.get(&self.decision_field);

        if before == after {
            return DriftClass::Neutral;
        }
        match (self.rank(before), self.rank(after)) {
            (Some(b), Some(a)) if a > b => DriftClass::Improvement,
            (Some(b), Some(a)) if a < b => DriftClass::Regression,
            _ => DriftClass::Regression,
        }
    }
}

/// The audit and replay service
pub struct AuditService {
    ledger: Arc<TraceLedger>,
    resolver: Arc<dyn FunctionResolver>,
    blobs: Arc<dyn BlobStore>,
    hasher: ContentHasher,
    classifier: Arc<dyn DriftClassifier>,
}

impl AuditService {
    pub fn new(
        ledger: Arc<TraceLedger>,
        resolver: Arc<dyn FunctionResolver>,
        blobs: Arc<dyn BlobStore>,
        classifier: Arc<dyn DriftClassifier>,
    ) -> Self {
        Self {
            ledger,
            resolver,
            blobs,
            hasher: ContentHasher::new(),
            classifier,
        }
    }

    /// Verify the whole chain and report coverage
    pub fn verify_chain(&self) -> Result<ChainAuditReport, AuditError> {
        let integrity = self.ledger.verify_integrity(0, None)?;

        let mut execution_records = 0;
        let mut governance_records = 0;
        let mut covered: HashSet<(String, Version)> = HashSet::new();
        for record in self.ledger.records()? {
            match record.event_type {
                EventType::Execution => {
                    execution_records += 1;
                    covered.insert((record.function_id.clone(), record.version.clone()));
                }
                EventType::Governance => governance_records += 1,
            }
        }

        Ok(ChainAuditReport {
            integrity,
            total_records: self.ledger.len()?,
            execution_records,
            governance_records,
            functions_covered: covered.len(),
        })
    }

    /// Re-execute one historical decision
    ///
    /// With no `against_version` this is a determinism check: the recorded
    /// input and feature snapshot must reproduce the recorded output exactly,
    /// and any mismatch is classified as a violation. With `against_version`
    /// it is a shadow/regression check and differences are classified by the
    /// drift classifier.
    pub fn replay(
        &self,
        trace_id: &Uuid,
        against_version: Option<&Version>,
    ) -> Result<DriftReport, AuditError> {
        let record = self.ledger.get(trace_id)?;
        let original_output_hash = self.replayable_output_hash(&record)?;

        let input = self.load_payload(&record.input_hash, trace_id, "input")?;
        let snapshot = match record.feature_snapshot_ref {
            Some(snapshot_ref) => {
                let raw = self.load_payload(&snapshot_ref, trace_id, "feature snapshot")?;
                serde_json::from_value::<FeatureSnapshot>(raw).map_err(|e| {
                    AuditError::PayloadIntegrity {
                        trace_id: *trace_id,
                        reason: format!("feature snapshot decode failed: {}", e),
                    }
                })?
            }
            None => FeatureSnapshot::empty(record.timestamp),
        };

        let target_version = against_version.unwrap_or(&record.version);
        let resolved = self
            .resolver
            .resolve_pinned(&record.function_id, target_version)?;
        if resolved.status == ArtifactStatus::Draft {
            return Err(AuditError::NotReplayable {
                trace_id: *trace_id,
                reason: format!("target version {} is still a draft", target_version),
            });
        }

        // Rebuild the exact evaluation context the engine used
        let mut ctx = EvaluationContext::new(record.timestamp, record.input_hash.seed(), snapshot);
        let same_version = target_version == &record.version;
        let replayed = resolved.logic.evaluate(&input, &mut ctx);

        let report = match replayed {
            Ok(output) => {
                let replayed_hash =
                    self.hasher
                        .hash_canonical(&output)
                        .map_err(|e| AuditError::NotReplayable {
                            trace_id: *trace_id,
                            reason: e.to_string(),
                        })?;
                let matched = replayed_hash == original_output_hash;
                let classification = if matched {
                    DriftClass::Identical
                } else if same_version {
                    DriftClass::Violation
                } else {
                    let original = self.load_payload(&original_output_hash, trace_id, "output")?;
                    self.classifier.classify(&original, &output)
                };

                DriftReport {
                    trace_id: *trace_id,
                    function_id: record.function_id.clone(),
                    original_version: record.version.clone(),
                    replayed_version: resolved.version,
                    original_output_hash,
                    replayed_output_hash: Some(replayed_hash),
                    matched,
                    classification,
                }
            }
            Err(err) => {
                if same_version {
                    // The original run succeeded; an error now is a
                    // determinism violation, not drift
                    return Err(AuditError::DeterminismViolation {
                        trace_id: *trace_id,
                        original: original_output_hash.to_string(),
                        replayed: format!("error: {}", err),
                    });
                }
                DriftReport {
                    trace_id: *trace_id,
                    function_id: record.function_id.clone(),
                    original_version: record.version.clone(),
                    replayed_version: resolved.version,
                    original_output_hash,
                    replayed_output_hash: None,
                    matched: false,
                    classification: DriftClass::Regression,
                }
            }
        };

        Ok(report)
    }

    /// Replay and fail loudly on any determinism violation
    pub fn check_determinism(&self, trace_id: &Uuid) -> Result<DriftReport, AuditError> {
        let report = self.replay(trace_id, None)?;
        if report.classification == DriftClass::Violation {
            return Err(AuditError::DeterminismViolation {
                trace_id: *trace_id,
                original: report.original_output_hash.to_string(),
                replayed: report
                    .replayed_output_hash
                    .map(|h| h.to_string())
                    .unwrap_or_else(|| "none".to_string()),
            });
        }
        Ok(report)
    }

    /// Replay many traces in parallel and aggregate the outcomes
    ///
    /// Used both for pre-activation regression testing of a candidate
    /// version and for scheduled drift audits of the active one. Replays
    /// that themselves fail (missing payloads, unknown traces) are counted,
    /// not dropped.
    pub fn bulk_replay(
        &self,
        function_id: &str,
        against_version: Option<&Version>,
        trace_sample: &[Uuid],
    ) -> Result<BulkReplayReport, AuditError> {
        let outcomes: Vec<Result<DriftReport, AuditError>> = trace_sample
            .par_iter()
            .map(|trace_id| {
                let record = self.ledger.get(trace_id)?;
                if record.function_id != function_id {
                    return Err(AuditError::NotReplayable {
                        trace_id: *trace_id,
                        reason: format!("belongs to {}, not {}", record.function_id, function_id),
                    });
                }
                self.replay(trace_id, against_version)
            })
            .collect();

        let mut report = BulkReplayReport::default();
        for outcome in outcomes {
            match outcome {
                Ok(drift) => report.absorb(drift),
                Err(AuditError::DeterminismViolation { .. }) => {
                    report.total += 1;
                    report.mismatched += 1;
                    report.violations += 1;
                }
                Err(_) => {
                    report.total += 1;
                    report.failed_replays += 1;
                }
            }
        }
        Ok(report)
    }

    fn replayable_output_hash(&self, record: &TraceRecord) -> Result<ContentHash, AuditError> {
        if record.event_type != EventType::Execution {
            return Err(AuditError::NotReplayable {
                trace_id: record.trace_id,
                reason: "governance events are not replayable".to_string(),
            });
        }
        if record.status != ExecutionStatus::Ok {
            return Err(AuditError::NotReplayable {
                trace_id: record.trace_id,
                reason: "only OK executions are replayable".to_string(),
            });
        }
        record.output_hash.ok_or(AuditError::NotReplayable {
            trace_id: record.trace_id,
            reason: "record carries no output hash".to_string(),
        })
    }

    /// Load a recorded payload and verify it still matches its hash
    fn load_payload(
        &self,
        hash: &ContentHash,
        trace_id: &Uuid,
        what: &str,
    ) -> Result<Value, AuditError> {
        let bytes = self
            .blobs
            .get(hash)?
            .ok_or_else(|| AuditError::PayloadIntegrity {
                trace_id: *trace_id,
                reason: format!("{} payload {} is missing from the blob store", what, hash),
            })?;

        if self.hasher.hash_bytes(&bytes) != *hash {
            return Err(AuditError::PayloadIntegrity {
                trace_id: *trace_id,
                reason: format!("{} payload does not match its content address", what),
            });
        }

        serde_json::from_slice(&bytes).map_err(|e| AuditError::PayloadIntegrity {
            trace_id: *trace_id,
            reason: format!("{} payload decode failed: {}", what, e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outcome_classifier_neutral_when_decision_field_unchanged() {
        let classifier = OutcomeFieldClassifier::new("eligible", vec![json!(false), json!(true)]);

        let class = classifier.classify(
            &json!({"eligible": true, "note": "a"}),
            &json!({"eligible": true, "note": "b"}),
        );
        assert_eq!(class, DriftClass::Neutral);
    }

    #[test]
    fn test_outcome_classifier_direction() {
        let classifier = OutcomeFieldClassifier::new("eligible", vec![json!(false), json!(true)]);

        let up = classifier.classify(&json!({"eligible": false}), &json!({"eligible": true}));
        assert_eq!(up, DriftClass::Improvement);

        let down = classifier.classify(&json!({"eligible": true}), &json!({"eligible": false}));
        assert_eq!(down, DriftClass::Regression);
    }

    #[test]
    fn test_outcome_classifier_unranked_value_is_regression() {
        let classifier = OutcomeFieldClassifier::new("tier", vec![json!("basic"), json!("gold")]);

        let class = classifier.classify(&json!({"tier": "basic"}), &json!({"tier": "mystery"}));
        assert_eq!(class, DriftClass::Regression);
    }
}
