//! Core data types for the DDGE

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Semantic version for decision function artifacts
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    /// Create a new version
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Blake3 content hash over canonical bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    /// The all-zero hash, used as a placeholder when no content is known
    pub fn zero() -> Self {
        Self([0; 32])
    }

    /// Derive a deterministic RNG seed from the first eight bytes
    pub fn seed(&self) -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.0[..8]);
        u64::from_le_bytes(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

// Hashes serialize as lowercase hex so ledger records stay readable as JSON
// and canonical bytes are identical across codecs.
impl Serialize for ContentHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(&text).map_err(serde::de::Error::custom)?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("content hash must be 32 bytes"))?;
        Ok(Self(array))
    }
}

/// Lifecycle status of a decision function version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Draft,
    PendingReview,
    Approved,
    Active,
    Deprecated,
    Retired,
}

impl fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Draft => "draft",
            Self::PendingReview => "pending_review",
            Self::Approved => "approved",
            Self::Active => "active",
            Self::Deprecated => "deprecated",
            Self::Retired => "retired",
        };
        write!(f, "{}", label)
    }
}

/// Role a signer takes in the release workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignerRole {
    Owner,
    Reviewer,
}

impl fmt::Display for SignerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owner => write!(f, "owner"),
            Self::Reviewer => write!(f, "reviewer"),
        }
    }
}

/// A verified signature collected during the release workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRecord {
    pub signer_id: String,
    pub role: SignerRole,
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
    pub signed_at: DateTime<Utc>,
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(&text).map_err(serde::de::Error::custom)
    }
}

/// Kind of event a ledger record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A decision execution performed by the engine
    Execution,
    /// A registry state transition
    Governance,
}

/// Outcome status carried by a ledger record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Ok,
    Error,
}

/// Classification of an execution failure, stored in ERROR-status records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultClass {
    Validation,
    InactiveFunction,
    VersionNotFound,
    Timeout,
    Execution,
    ExternalDependency,
}

impl fmt::Display for FaultClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Validation => "validation",
            Self::InactiveFunction => "inactive_function",
            Self::VersionNotFound => "version_not_found",
            Self::Timeout => "timeout",
            Self::Execution => "execution",
            Self::ExternalDependency => "external_dependency",
        };
        write!(f, "{}", label)
    }
}

/// Failure details recorded alongside an ERROR-status trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceFault {
    pub class: FaultClass,
    pub message: String,
}

/// Registry state transition recorded as a governance event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernanceAction {
    Registered,
    ReleaseRequested,
    Signed,
    Approved,
    Activated,
    Deprecated,
    Retired,
}

impl fmt::Display for GovernanceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Registered => "registered",
            Self::ReleaseRequested => "release_requested",
            Self::Signed => "signed",
            Self::Approved => "approved",
            Self::Activated => "activated",
            Self::Deprecated => "deprecated",
            Self::Retired => "retired",
        };
        write!(f, "{}", label)
    }
}

/// One record in the hash-chained trace ledger
///
/// Immutable once appended. `chain_hash` covers the previous chain hash plus
/// the canonical bytes of every other field, so altering any historical field
/// invalidates every subsequent chain hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub sequence: u64,
    pub trace_id: Uuid,
    pub event_type: EventType,
    pub function_id: String,
    pub version: Version,
    pub function_hash: ContentHash,
    pub caller_id: String,
    /// For executions this is the decision's `as_of` instant, never wall time
    pub timestamp: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub error: Option<TraceFault>,
    pub input_hash: ContentHash,
    pub output_hash: Option<ContentHash>,
    pub feature_snapshot_ref: Option<ContentHash>,
    pub governance: Option<GovernanceAction>,
    pub prev_hash: ContentHash,
    pub chain_hash: ContentHash,
}

/// A single schema violation, with the instance path that failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    pub path: String,
    pub message: String,
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Result of a successful decision execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionResult {
    pub trace_id: Uuid,
    pub function_id: String,
    pub version: Version,
    pub function_hash: ContentHash,
    pub output: serde_json::Value,
    pub input_hash: ContentHash,
    pub output_hash: ContentHash,
    pub feature_snapshot_ref: Option<ContentHash>,
    pub chain_hash: ContentHash,
}

/// Classification of a replay outcome relative to the recorded decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftClass {
    Identical,
    Regression,
    Improvement,
    Neutral,
    /// Mismatch against the same version: a determinism bug, not drift
    Violation,
}

/// Outcome of replaying one historical decision
///
/// Produced by the audit service; never written to the primary ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftReport {
    pub trace_id: Uuid,
    pub function_id: String,
    pub original_version: Version,
    pub replayed_version: Version,
    pub original_output_hash: ContentHash,
    pub replayed_output_hash: Option<ContentHash>,
    pub matched: bool,
    pub classification: DriftClass,
}
