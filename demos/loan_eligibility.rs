//! Loan Eligibility Example
//!
//! This example demonstrates the full governance and execution story:
//! - Registering a declarative decision function with schemas
//! - The dual-signature release workflow (owner + reviewer)
//! - Deterministic execution with point-in-time features
//! - Tamper-evident trace ledger verification
//! - Deterministic replay and shadow replay against a candidate version

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;

use ddge::{
    ArtifactDraft, ArtifactMetadata, AuditService, BincodeCodec, ComparisonOp, ConditionMode,
    DecisionEngine, DecisionFunctionRegistry, DecisionRequest, InMemoryBlobStore,
    InMemoryFeatureStore, InMemoryKvStore, InMemoryLog, KeyedSigner, LogicSpec, NativeCatalog,
    OutcomeFieldClassifier, RuleCondition, RuleDef, RuleSetLogic, SignerProvider, SignerRole,
    StaticLegalValidator, TraceLedger, Version, VersionSelector,
};

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, d, 0, 0, 0).unwrap()
}

fn eligibility_logic(score_threshold: i64) -> LogicSpec {
    LogicSpec::Rules(RuleSetLogic {
        rules: vec![RuleDef {
            rule_id: "standard_approval".to_string(),
            priority: 10,
            mode: ConditionMode::All,
            conditions: vec![
                RuleCondition {
                    field: "credit_score".to_string(),
                    op: ComparisonOp::Ge,
                    value: json!(score_threshold),
                },
                RuleCondition {
                    field: "amount".to_string(),
                    op: ComparisonOp::Le,
                    value: json!(10000),
                },
                RuleCondition {
                    field: "features.fraud_score".to_string(),
                    op: ComparisonOp::Lt,
                    value: json!(0.5),
                },
            ],
            result: json!({"eligible": true}),
        }],
        default_result: json!({"eligible": false}),
    })
}

fn eligibility_draft(version: Version, score_threshold: i64) -> ArtifactDraft {
    ArtifactDraft {
        function_id: "loan_eligibility".to_string(),
        version,
        logic: eligibility_logic(score_threshold),
        input_schema: json!({
            "type": "object",
            "properties": {
                "credit_score": {"type": "integer", "minimum": 0, "maximum": 850},
                "amount": {"type": "number", "minimum": 0}
            },
            "required": ["credit_score", "amount"]
        }),
        output_schema: json!({
            "type": "object",
            "properties": {"eligible": {"type": "boolean"}},
            "required": ["eligible"]
        }),
        metadata: ArtifactMetadata {
            author: "alice".to_string(),
            description: "standard loan eligibility".to_string(),
            tags: vec!["lending".to_string()],
            legal_references: vec!["https://law.example/ecoa".to_string()],
        },
        feature_names: vec!["fraud_score".to_string()],
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Loan Eligibility Example ===\n");

    // Wire the system against in-memory backends
    let ledger = Arc::new(TraceLedger::open(
        Arc::new(InMemoryLog::new()),
        Box::new(BincodeCodec::new()),
    )?);
    let signer = Arc::new(KeyedSigner::new());
    signer.register_key("alice", b"alice-secret");
    signer.register_key("bob", b"bob-secret");
    let legal = Arc::new(StaticLegalValidator::new());
    legal.allow("https://law.example/ecoa", "Equal Credit Opportunity Act", "1691");

    let registry = Arc::new(DecisionFunctionRegistry::new(
        Arc::new(InMemoryKvStore::new()),
        ledger.clone(),
        signer.clone(),
        legal,
        NativeCatalog::new(),
    ));

    let features = Arc::new(InMemoryFeatureStore::new());
    features.record("cust-42", "fraud_score", day(2), json!(0.12));

    let blobs = Arc::new(InMemoryBlobStore::new());
    let engine = DecisionEngine::builder()
        .with_resolver(registry.clone())
        .with_feature_store(features.clone())
        .with_blob_store(blobs.clone())
        .with_ledger(ledger.clone())
        .build()?;

    // Governance: register, dual-sign, activate
    let v1 = Version::new(1, 0, 0);
    registry.register_draft(eligibility_draft(v1.clone(), 700))?;
    registry.request_release("loan_eligibility", &v1, "alice")?;

    let payload = registry.release_payload("loan_eligibility", &v1)?;
    let owner_sig = signer.sign(&payload, "alice")?;
    let reviewer_sig = signer.sign(&payload, "bob")?;
    registry.sign("loan_eligibility", &v1, "alice", SignerRole::Owner, &owner_sig)?;
    registry.sign("loan_eligibility", &v1, "bob", SignerRole::Reviewer, &reviewer_sig)?;
    registry.activate("loan_eligibility", &v1, day(1), "alice")?;
    println!("v1.0.0 registered, signed by alice (owner) and bob (reviewer), active from day 1\n");

    // Execute a decision
    let result = engine.execute(DecisionRequest {
        function_id: "loan_eligibility".to_string(),
        version: VersionSelector::Latest,
        input: json!({"credit_score": 720, "amount": 5000}),
        entity_id: Some("cust-42".to_string()),
        caller_id: "svc-loans".to_string(),
        as_of: day(5),
    })?;
    println!("Decision for credit_score=720, amount=5000:");
    println!("  Output:      {}", result.output);
    println!("  Trace:       {}", result.trace_id);
    println!("  Output hash: {}\n", result.output_hash);

    // Audit: verify the chain and replay the decision
    let audit = AuditService::new(
        ledger.clone(),
        registry.clone(),
        blobs,
        Arc::new(OutcomeFieldClassifier::new(
            "eligible",
            vec![json!(false), json!(true)],
        )),
    );

    let chain = audit.verify_chain()?;
    println!("Chain verification:");
    println!("  Intact:             {}", chain.integrity.ok);
    println!("  Records checked:    {}", chain.integrity.records_checked);
    println!("  Governance records: {}\n", chain.governance_records);

    let replay = audit.replay(&result.trace_id, None)?;
    println!("Deterministic replay:");
    println!("  Matched:        {}", replay.matched);
    println!("  Classification: {:?}\n", replay.classification);

    // Shadow replay against a stricter candidate version
    let v2 = Version::new(2, 0, 0);
    registry.register_draft(eligibility_draft(v2.clone(), 750))?;
    registry.request_release("loan_eligibility", &v2, "alice")?;
    let payload = registry.release_payload("loan_eligibility", &v2)?;
    let owner_sig = signer.sign(&payload, "alice")?;
    let reviewer_sig = signer.sign(&payload, "bob")?;
    registry.sign("loan_eligibility", &v2, "alice", SignerRole::Owner, &owner_sig)?;
    registry.sign("loan_eligibility", &v2, "bob", SignerRole::Reviewer, &reviewer_sig)?;
    registry.activate("loan_eligibility", &v2, day(10), "alice")?;

    let shadow = audit.replay(&result.trace_id, Some(&v2))?;
    println!("Shadow replay against v2.0.0 (threshold 750):");
    println!("  Matched:        {}", shadow.matched);
    println!("  Classification: {:?}", shadow.classification);

    Ok(())
}
