//! Deterministic Decision Governance Engine (DDGE)
//!
//! A library for governed execution of versioned decision functions:
//! a registry with a signed-release workflow, a reproducible execution
//! engine, a hash-chained trace ledger, and an independent audit/replay
//! service.

pub mod audit;
pub mod codec;
pub mod context;
pub mod engine;
pub mod error;
pub mod hasher;
pub mod ledger;
pub mod logging;
pub mod logic;
pub mod providers;
pub mod registry;
pub mod rules;
pub mod schema;
pub mod store;
pub mod types;
pub mod version_index;

// Re-export core types and traits
pub use audit::{
    AuditService, BulkReplayReport, ChainAuditReport, DriftClassifier, OutcomeFieldClassifier,
};
pub use codec::{BincodeCodec, JsonCodec, RecordCodec};
pub use context::{
    DeterministicClock, EvaluationContext, FeatureSnapshot, FeatureValue, SeededRandom,
};
pub use engine::{
    DecisionEngine, DecisionEngineBuilder, DecisionRequest, EngineConfig, VersionSelector,
};
pub use error::{
    AuditError, DdgeError, EngineError, LedgerError, ProviderError, RegistryError, StoreError,
};
pub use hasher::ContentHasher;
pub use ledger::{IntegrityReport, TraceDraft, TraceLedger};
pub use logging::{ExecutionLog, LogEntry, LogLevel};
pub use logic::{Evaluatable, LogicSpec, NativeCatalog, NativeLogic};
pub use providers::{
    CitationCheck, FeatureStore, InMemoryFeatureStore, KeyedSigner, LegalReferenceValidator,
    RetryPolicy, SignerProvider, StaticLegalValidator,
};
pub use registry::{
    ArtifactDraft, ArtifactMetadata, DecisionFunctionArtifact, DecisionFunctionRegistry,
    FunctionResolver, LegalCitation, ResolvedFunction,
};
pub use rules::{
    analyze_conflicts, ComparisonOp, ConditionMode, ConflictAnalysis, RuleCondition, RuleConflict,
    RuleDef, RuleSetLogic, UnanalyzablePair,
};
pub use schema::IoSchema;
pub use store::{
    AppendOnlyLog, BlobStore, InMemoryBlobStore, InMemoryKvStore, InMemoryLog, VersionedKvStore,
};
pub use types::{
    ArtifactStatus, ContentHash, DecisionResult, DriftClass, DriftReport, EventType,
    ExecutionStatus, FaultClass, FieldViolation, GovernanceAction, SignatureRecord, SignerRole,
    TraceFault, TraceRecord, Version,
};
pub use version_index::{EffectiveVersionIndex, EffectiveWindow, VersionIndexError};
