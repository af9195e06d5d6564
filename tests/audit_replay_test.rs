//! Integration tests for the audit and replay service
//!
//! These tests verify:
//! - Deterministic replay reproduces recorded outputs byte for byte
//! - Shadow replay against a candidate version classifies drift
//! - Bulk replay aggregates outcomes across many traces
//! - Chain verification reports coverage

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use ddge::{
    ArtifactDraft, ArtifactMetadata, AuditError, AuditService, BincodeCodec, ComparisonOp,
    ConditionMode, DecisionEngine, DecisionFunctionRegistry, DecisionRequest, DriftClass,
    EvaluationContext, InMemoryBlobStore, InMemoryFeatureStore, InMemoryKvStore, InMemoryLog,
    KeyedSigner, LogicSpec, NativeCatalog, NativeLogic, OutcomeFieldClassifier, RuleCondition,
    RuleDef, RuleSetLogic, SignerProvider, SignerRole, StaticLegalValidator, TraceLedger, Version,
    VersionSelector,
};

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, d, 0, 0, 0).unwrap()
}

struct Harness {
    registry: Arc<DecisionFunctionRegistry>,
    engine: DecisionEngine,
    audit: AuditService,
    ledger: Arc<TraceLedger>,
    signer: Arc<KeyedSigner>,
    catalog: NativeCatalog,
}

fn harness() -> Harness {
    let ledger = Arc::new(
        TraceLedger::open(Arc::new(InMemoryLog::new()), Box::new(BincodeCodec::new())).unwrap(),
    );
    let signer = Arc::new(KeyedSigner::new());
    signer.register_key("alice", b"alice-secret");
    signer.register_key("bob", b"bob-secret");
    let catalog = NativeCatalog::new();

    let registry = Arc::new(DecisionFunctionRegistry::new(
        Arc::new(InMemoryKvStore::new()),
        ledger.clone(),
        signer.clone(),
        Arc::new(StaticLegalValidator::new()),
        catalog.clone(),
    ));

    let blobs = Arc::new(InMemoryBlobStore::new());
    let engine = DecisionEngine::builder()
        .with_resolver(registry.clone())
        .with_feature_store(Arc::new(InMemoryFeatureStore::new()))
        .with_blob_store(blobs.clone())
        .with_ledger(ledger.clone())
        .build()
        .unwrap();

    let audit = AuditService::new(
        ledger.clone(),
        registry.clone(),
        blobs,
        Arc::new(OutcomeFieldClassifier::new(
            "eligible",
            vec![json!(false), json!(true)],
        )),
    );

    Harness {
        registry,
        engine,
        audit,
        ledger,
        signer,
        catalog,
    }
}

fn threshold_logic(threshold: i64, note: Option<&str>) -> LogicSpec {
    let mut result = json!({"eligible": true});
    let mut default = json!({"eligible": false});
    if let Some(note) = note {
        result = json!({"eligible": true, "note": note});
        default = json!({"eligible": false, "note": note});
    }
    LogicSpec::Rules(RuleSetLogic {
        rules: vec![RuleDef {
            rule_id: "approve".to_string(),
            priority: 10,
            mode: ConditionMode::All,
            conditions: vec![RuleCondition {
                field: "credit_score".to_string(),
                op: ComparisonOp::Ge,
                value: json!(threshold),
            }],
            result,
        }],
        default_result: default,
    })
}

fn draft_with(version: Version, logic: LogicSpec) -> ArtifactDraft {
    ArtifactDraft {
        function_id: "loan_eligibility".to_string(),
        version,
        logic,
        input_schema: json!({
            "type": "object",
            "properties": {"credit_score": {"type": "integer"}},
            "required": ["credit_score"]
        }),
        output_schema: json!({
            "type": "object",
            "properties": {"eligible": {"type": "boolean"}},
            "required": ["eligible"]
        }),
        metadata: ArtifactMetadata {
            author: "alice".to_string(),
            description: "threshold check".to_string(),
            tags: vec![],
            legal_references: vec![],
        },
        feature_names: vec![],
    }
}

fn activate(h: &Harness, draft: ArtifactDraft, from: DateTime<Utc>) {
    let function_id = draft.function_id.clone();
    let version = draft.version.clone();
    h.registry.register_draft(draft).unwrap();
    h.registry
        .request_release(&function_id, &version, "alice")
        .unwrap();
    let payload = h.registry.release_payload(&function_id, &version).unwrap();
    let owner_sig = h.signer.sign(&payload, "alice").unwrap();
    let reviewer_sig = h.signer.sign(&payload, "bob").unwrap();
    h.registry
        .sign(&function_id, &version, "alice", SignerRole::Owner, &owner_sig)
        .unwrap();
    h.registry
        .sign(&function_id, &version, "bob", SignerRole::Reviewer, &reviewer_sig)
        .unwrap();
    h.registry
        .activate(&function_id, &version, from, "alice")
        .unwrap();
}

fn execute(h: &Harness, credit_score: i64) -> ddge::DecisionResult {
    h.engine
        .execute(DecisionRequest {
            function_id: "loan_eligibility".to_string(),
            version: VersionSelector::Latest,
            input: json!({"credit_score": credit_score}),
            entity_id: None,
            caller_id: "svc-loans".to_string(),
            as_of: day(5),
        })
        .unwrap()
}

#[test]
fn test_replay_reproduces_original_output() {
    let h = harness();
    activate(&h, draft_with(Version::new(1, 0, 0), threshold_logic(700, None)), day(1));
    let result = execute(&h, 720);

    let report = h.audit.replay(&result.trace_id, None).unwrap();
    assert!(report.matched);
    assert_eq!(report.classification, DriftClass::Identical);
    assert_eq!(report.replayed_output_hash, Some(result.output_hash));
    assert_eq!(report.original_version, Version::new(1, 0, 0));
}

#[test]
fn test_shadow_replay_classifies_regression() {
    let h = harness();
    activate(&h, draft_with(Version::new(1, 0, 0), threshold_logic(700, None)), day(1));
    let result = execute(&h, 720);

    // Candidate version tightens the threshold; the same applicant now fails
    activate(&h, draft_with(Version::new(2, 0, 0), threshold_logic(750, None)), day(10));

    let report = h
        .audit
        .replay(&result.trace_id, Some(&Version::new(2, 0, 0)))
        .unwrap();
    assert!(!report.matched);
    assert_eq!(report.classification, DriftClass::Regression);
    assert_eq!(report.replayed_version, Version::new(2, 0, 0));
}

#[test]
fn test_shadow_replay_classifies_improvement() {
    let h = harness();
    activate(&h, draft_with(Version::new(1, 0, 0), threshold_logic(700, None)), day(1));
    let result = execute(&h, 680);

    // Candidate version loosens the threshold; the same applicant now passes
    activate(&h, draft_with(Version::new(2, 0, 0), threshold_logic(650, None)), day(10));

    let report = h
        .audit
        .replay(&result.trace_id, Some(&Version::new(2, 0, 0)))
        .unwrap();
    assert_eq!(report.classification, DriftClass::Improvement);
}

#[test]
fn test_shadow_replay_classifies_neutral_changes() {
    let h = harness();
    activate(&h, draft_with(Version::new(1, 0, 0), threshold_logic(700, None)), day(1));
    let result = execute(&h, 720);

    // Candidate version annotates the output but decides identically
    activate(
        &h,
        draft_with(Version::new(2, 0, 0), threshold_logic(700, Some("v2"))),
        day(10),
    );

    let report = h
        .audit
        .replay(&result.trace_id, Some(&Version::new(2, 0, 0)))
        .unwrap();
    assert!(!report.matched);
    assert_eq!(report.classification, DriftClass::Neutral);
}

#[test]
fn test_nondeterministic_logic_is_caught_by_replay() {
    let h = harness();

    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    h.catalog.register(
        "flaky/logic",
        Arc::new(NativeLogic::new(
            move |_: &serde_json::Value, _: &mut EvaluationContext| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!({"eligible": n == 0}))
            },
        )),
    );
    activate(
        &h,
        draft_with(
            Version::new(1, 0, 0),
            LogicSpec::Native {
                code_ref: "flaky/logic".to_string(),
            },
        ),
        day(1),
    );
    let result = execute(&h, 720);

    let report = h.audit.replay(&result.trace_id, None).unwrap();
    assert!(!report.matched);
    assert_eq!(report.classification, DriftClass::Violation);

    let err = h.audit.check_determinism(&result.trace_id).unwrap_err();
    assert!(matches!(err, AuditError::DeterminismViolation { .. }));
}

#[test]
fn test_error_traces_are_not_replayable() {
    let h = harness();
    activate(&h, draft_with(Version::new(1, 0, 0), threshold_logic(700, None)), day(1));

    let err = h
        .engine
        .execute(DecisionRequest {
            function_id: "loan_eligibility".to_string(),
            version: VersionSelector::Latest,
            input: json!({"wrong": true}),
            entity_id: None,
            caller_id: "svc-loans".to_string(),
            as_of: day(5),
        })
        .unwrap_err();
    assert!(matches!(err, ddge::EngineError::Validation { .. }));

    let error_record = h
        .ledger
        .records()
        .unwrap()
        .into_iter()
        .find(|r| r.status == ddge::ExecutionStatus::Error)
        .unwrap();

    let err = h.audit.replay(&error_record.trace_id, None).unwrap_err();
    assert!(matches!(err, AuditError::NotReplayable { .. }));
}

#[test]
fn test_governance_events_are_not_replayable() {
    let h = harness();
    activate(&h, draft_with(Version::new(1, 0, 0), threshold_logic(700, None)), day(1));

    let governance_record = h
        .ledger
        .records()
        .unwrap()
        .into_iter()
        .find(|r| r.event_type == ddge::EventType::Governance)
        .unwrap();

    let err = h.audit.replay(&governance_record.trace_id, None).unwrap_err();
    assert!(matches!(err, AuditError::NotReplayable { .. }));
}

#[test]
fn test_missing_payload_fails_replay_loudly() {
    let h = harness();
    activate(&h, draft_with(Version::new(1, 0, 0), threshold_logic(700, None)), day(1));
    let result = execute(&h, 720);

    // An audit service pointed at an empty blob store cannot silently pass
    let detached_audit = AuditService::new(
        h.ledger.clone(),
        h.registry.clone(),
        Arc::new(InMemoryBlobStore::new()),
        Arc::new(OutcomeFieldClassifier::new(
            "eligible",
            vec![json!(false), json!(true)],
        )),
    );

    let err = detached_audit.replay(&result.trace_id, None).unwrap_err();
    assert!(matches!(err, AuditError::PayloadIntegrity { .. }));
}

#[test]
fn test_bulk_replay_aggregates_by_classification() {
    let h = harness();
    activate(&h, draft_with(Version::new(1, 0, 0), threshold_logic(700, None)), day(1));

    let scores = [720, 710, 705, 680, 660];
    let trace_ids: Vec<_> = scores.iter().map(|s| execute(&h, *s).trace_id).collect();

    // Same-version bulk replay: everything must be identical
    let report = h
        .audit
        .bulk_replay("loan_eligibility", None, &trace_ids)
        .unwrap();
    assert_eq!(report.total, 5);
    assert_eq!(report.matched, 5);
    assert_eq!(report.identical, 5);
    assert_eq!(report.violations, 0);

    // Shadow bulk replay against a tighter candidate: the 705/710 approvals
    // regress, the denials still deny
    activate(&h, draft_with(Version::new(2, 0, 0), threshold_logic(715, None)), day(10));
    let report = h
        .audit
        .bulk_replay("loan_eligibility", Some(&Version::new(2, 0, 0)), &trace_ids)
        .unwrap();
    assert_eq!(report.total, 5);
    assert_eq!(report.matched, 3);
    assert_eq!(report.regressions, 2);
    assert_eq!(report.improvements, 0);
    assert_eq!(report.failed_replays, 0);
}

#[test]
fn test_bulk_replay_rejects_foreign_traces() {
    let h = harness();
    activate(&h, draft_with(Version::new(1, 0, 0), threshold_logic(700, None)), day(1));
    let result = execute(&h, 720);

    let report = h
        .audit
        .bulk_replay("other_function", None, &[result.trace_id])
        .unwrap();
    assert_eq!(report.total, 1);
    assert_eq!(report.failed_replays, 1);
}

#[test]
fn test_verify_chain_reports_coverage() {
    let h = harness();
    activate(&h, draft_with(Version::new(1, 0, 0), threshold_logic(700, None)), day(1));
    execute(&h, 720);
    execute(&h, 650);

    activate(&h, draft_with(Version::new(2, 0, 0), threshold_logic(710, None)), day(2));
    execute(&h, 720);

    let report = h.audit.verify_chain().unwrap();
    assert!(report.integrity.ok);
    assert_eq!(report.execution_records, 3);
    assert_eq!(report.functions_covered, 2);
    assert_eq!(
        report.total_records,
        report.execution_records + report.governance_records
    );
}
