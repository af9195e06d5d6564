//! Error types for the DDGE

use thiserror::Error;
use uuid::Uuid;

use crate::types::{ArtifactStatus, FaultClass, FieldViolation, Version};
use crate::version_index::VersionIndexError;

#[derive(Debug, Error)]
pub enum DdgeError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

/// Registry-time failures: block progression, nothing is executed
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Version {version} of {function_id} already exists")]
    DuplicateVersion { function_id: String, version: Version },

    #[error("Cannot {operation} {function_id} v{version} in status {status}")]
    InvalidStateTransition {
        function_id: String,
        version: Version,
        status: ArtifactStatus,
        operation: String,
    },

    #[error("Separation of duties violated: {signer_id} cannot hold both roles")]
    SeparationOfDuties { signer_id: String },

    #[error("Signature from {signer_id} failed verification")]
    SignatureRejected { signer_id: String },

    #[error("A {role} signature is already present")]
    DuplicateSignature { role: String },

    #[error("Rule conflict: {details}")]
    RuleConflict { details: String },

    #[error("Legal reference rejected: {iri} - {reason}")]
    LegalReference { iri: String, reason: String },

    #[error("Schema invalid ({which}): {reason}")]
    InvalidSchema { which: String, reason: String },

    #[error("No native logic registered for code_ref {code_ref}")]
    UnknownNativeLogic { code_ref: String },

    #[error("No version of {function_id} found: {detail}")]
    VersionNotFound { function_id: String, detail: String },

    #[error("Concurrent update on {key} was rejected")]
    ConcurrentUpdate { key: String },

    #[error("Effective version index error: {0}")]
    Index(#[from] VersionIndexError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

/// Execution-time failures: surfaced to the caller and always traced
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Schema validation failed: {} violation(s)", .violations.len())]
    Validation { violations: Vec<FieldViolation> },

    #[error("{function_id} v{version} is not executable in status {status}")]
    InactiveFunction {
        function_id: String,
        version: Version,
        status: ArtifactStatus,
    },

    #[error("No executable version of {function_id}: {detail}")]
    VersionNotFound { function_id: String, detail: String },

    #[error("Execution exceeded timeout of {limit_ms}ms")]
    Timeout { limit_ms: u64 },

    #[error("Decision logic failed: {reason}")]
    Execution { reason: String },

    #[error("External dependency {dependency} failed: {reason}")]
    ExternalDependency { dependency: String, reason: String },

    #[error("Trace could not be appended: {reason}")]
    TraceAppend { reason: String },
}

impl EngineError {
    /// The failure classification recorded in the trace ledger
    pub fn fault_class(&self) -> FaultClass {
        match self {
            Self::Validation { .. } => FaultClass::Validation,
            Self::InactiveFunction { .. } => FaultClass::InactiveFunction,
            Self::VersionNotFound { .. } => FaultClass::VersionNotFound,
            Self::Timeout { .. } => FaultClass::Timeout,
            Self::Execution { .. } | Self::TraceAppend { .. } => FaultClass::Execution,
            Self::ExternalDependency { .. } => FaultClass::ExternalDependency,
        }
    }
}

/// Ledger failures
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Chain integrity broken at sequence {sequence}: {reason}")]
    ChainIntegrity { sequence: u64, reason: String },

    #[error("Unknown trace {trace_id}")]
    UnknownTrace { trace_id: Uuid },

    #[error("Trace {trace_id} was already appended")]
    DuplicateTrace { trace_id: Uuid },

    #[error("Record codec failed: {reason}")]
    Codec { reason: String },

    #[error("Canonicalization failed: {reason}")]
    Canonicalization { reason: String },

    #[error("Store error: {0}")]
    Storage(#[from] StoreError),
}

/// Audit and replay failures
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Determinism violation on trace {trace_id}: original {original}, replayed {replayed}")]
    DeterminismViolation {
        trace_id: Uuid,
        original: String,
        replayed: String,
    },

    #[error("Trace {trace_id} cannot be replayed: {reason}")]
    NotReplayable { trace_id: Uuid, reason: String },

    #[error("Recorded payload for trace {trace_id} failed verification: {reason}")]
    PayloadIntegrity { trace_id: Uuid, reason: String },

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Persistence backend failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Key not found: {key}")]
    NotFound { key: String },

    #[error("Version conflict on {key}: expected {expected:?}, found {found:?}")]
    VersionConflict {
        key: String,
        expected: Option<u64>,
        found: Option<u64>,
    },

    #[error("Backend failure: {reason}")]
    Backend { reason: String },
}

/// External capability failures (feature store, signer, legal validator)
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider} unavailable: {reason}")]
    Unavailable { provider: String, reason: String },

    #[error("{provider} rejected the request: {reason}")]
    Rejected { provider: String, reason: String },
}
