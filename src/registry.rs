//! Decision function registry and signed-release state machine
//!
//! Owns versioned artifacts and their lifecycle: Draft -> PendingReview ->
//! Approved -> Active -> Deprecated/Retired. Every transition is recorded as
//! a governance event in the trace ledger. Status updates go through the
//! store's compare-and-swap, so concurrent sign/activate races are rejected
//! rather than silently merged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::error::{RegistryError, StoreError};
use crate::hasher::ContentHasher;
use crate::ledger::{TraceDraft, TraceLedger};
use crate::logic::{Evaluatable, LogicSpec, NativeCatalog};
use crate::providers::{LegalReferenceValidator, SignerProvider};
use crate::rules::{analyze_conflicts, ConflictAnalysis};
use crate::schema::IoSchema;
use crate::store::VersionedKvStore;
use crate::types::{
    ArtifactStatus, ContentHash, EventType, ExecutionStatus, GovernanceAction, SignatureRecord,
    SignerRole, Version,
};
use crate::version_index::EffectiveVersionIndex;

/// Descriptive metadata attached at registration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub author: String,
    pub description: String,
    pub tags: Vec<String>,
    /// Legal reference IRIs, validated against the external validator
    pub legal_references: Vec<String>,
}

/// A legal reference resolved by the external validator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegalCitation {
    pub iri: String,
    pub title: String,
    pub section: String,
}

/// Everything needed to register a new draft version
#[derive(Debug, Clone)]
pub struct ArtifactDraft {
    pub function_id: String,
    pub version: Version,
    pub logic: LogicSpec,
    pub input_schema: Value,
    pub output_schema: Value,
    pub metadata: ArtifactMetadata,
    /// Features the engine must fetch before evaluation
    pub feature_names: Vec<String>,
}

/// A persisted decision function version
///
/// Once the version leaves Draft, `logic` and `logic_hash` are frozen; the
/// registry offers no mutation path for them, only new versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionFunctionArtifact {
    pub function_id: String,
    pub version: Version,
    pub logic: LogicSpec,
    pub input_schema: Value,
    pub output_schema: Value,
    pub logic_hash: ContentHash,
    pub metadata: ArtifactMetadata,
    pub legal_citations: Vec<LegalCitation>,
    pub feature_names: Vec<String>,
    pub status: ArtifactStatus,
    pub signatures: Vec<SignatureRecord>,
    pub conflict_analysis: Option<ConflictAnalysis>,
    pub created_at: DateTime<Utc>,
}

impl DecisionFunctionArtifact {
    fn signature_for(&self, role: SignerRole) -> Option<&SignatureRecord> {
        self.signatures.iter().find(|s| s.role == role)
    }

    /// One verified owner and one verified reviewer with distinct identities
    pub fn has_dual_signatures(&self) -> Result<(), RegistryError> {
        let owner = self.signature_for(SignerRole::Owner);
        let reviewer = self.signature_for(SignerRole::Reviewer);
        match (owner, reviewer) {
            (Some(owner), Some(reviewer)) if owner.signer_id == reviewer.signer_id => {
                Err(RegistryError::SeparationOfDuties {
                    signer_id: owner.signer_id.clone(),
                })
            }
            (Some(_), Some(_)) => Ok(()),
            _ => Err(RegistryError::InvalidStateTransition {
                function_id: self.function_id.clone(),
                version: self.version.clone(),
                status: self.status,
                operation: "approve without both signatures".to_string(),
            }),
        }
    }
}

/// Payload a release signature covers
#[derive(Debug, Serialize)]
struct ReleasePayload<'a> {
    function_id: &'a str,
    version: &'a Version,
    logic_hash: &'a ContentHash,
}

/// A version resolved for execution: fresh status plus compiled contracts
#[derive(Clone)]
pub struct ResolvedFunction {
    pub function_id: String,
    pub version: Version,
    pub status: ArtifactStatus,
    pub logic_hash: ContentHash,
    pub feature_names: Vec<String>,
    pub input_schema: IoSchema,
    pub output_schema: IoSchema,
    pub logic: Arc<dyn Evaluatable>,
}

/// Read-only resolution interface the engine and audit service depend on
pub trait FunctionResolver: Send + Sync {
    /// Resolve the version effective at `as_of`
    fn resolve_active(
        &self,
        function_id: &str,
        as_of: DateTime<Utc>,
    ) -> Result<ResolvedFunction, RegistryError>;

    /// Resolve an explicit version, whatever its effectiveness
    fn resolve_pinned(
        &self,
        function_id: &str,
        version: &Version,
    ) -> Result<ResolvedFunction, RegistryError>;
}

struct CompiledVersion {
    logic_hash: ContentHash,
    feature_names: Vec<String>,
    input_schema: IoSchema,
    output_schema: IoSchema,
    logic: Arc<dyn Evaluatable>,
}

/// The decision function registry
pub struct DecisionFunctionRegistry {
    store: Arc<dyn VersionedKvStore>,
    ledger: Arc<TraceLedger>,
    signer: Arc<dyn SignerProvider>,
    legal: Arc<dyn LegalReferenceValidator>,
    natives: NativeCatalog,
    hasher: ContentHasher,
    // Compiled schemas and logic are immutable once registered, so the cache
    // never needs invalidation; status is always read fresh from the store.
    compiled: RwLock<HashMap<(String, Version), Arc<CompiledVersion>>>,
}

impl DecisionFunctionRegistry {
    pub fn new(
        store: Arc<dyn VersionedKvStore>,
        ledger: Arc<TraceLedger>,
        signer: Arc<dyn SignerProvider>,
        legal: Arc<dyn LegalReferenceValidator>,
        natives: NativeCatalog,
    ) -> Self {
        Self {
            store,
            ledger,
            signer,
            legal,
            natives,
            hasher: ContentHasher::new(),
            compiled: RwLock::new(HashMap::new()),
        }
    }

    fn artifact_key(function_id: &str, version: &Version) -> String {
        format!("artifact/{}/{}", function_id, version)
    }

    fn index_key(function_id: &str) -> String {
        format!("index/{}", function_id)
    }

    /// Register a new draft version
    ///
    /// Validates schemas, legal references, and (for declarative logic)
    /// static rule conflicts before anything is persisted; ambiguous logic
    /// never reaches review.
    pub fn register_draft(
        &self,
        draft: ArtifactDraft,
    ) -> Result<DecisionFunctionArtifact, RegistryError> {
        let key = Self::artifact_key(&draft.function_id, &draft.version);
        if self.store.get(&key)?.is_some() {
            return Err(RegistryError::DuplicateVersion {
                function_id: draft.function_id,
                version: draft.version,
            });
        }

        IoSchema::compile(draft.input_schema.clone()).map_err(|reason| {
            RegistryError::InvalidSchema {
                which: "input".to_string(),
                reason,
            }
        })?;
        IoSchema::compile(draft.output_schema.clone()).map_err(|reason| {
            RegistryError::InvalidSchema {
                which: "output".to_string(),
                reason,
            }
        })?;

        let mut legal_citations = Vec::new();
        for iri in &draft.metadata.legal_references {
            let check = self.legal.validate(iri)?;
            if !check.valid {
                return Err(RegistryError::LegalReference {
                    iri: iri.clone(),
                    reason: "rejected by legal reference validator".to_string(),
                });
            }
            legal_citations.push(LegalCitation {
                iri: iri.clone(),
                title: check.title.unwrap_or_default(),
                section: check.section.unwrap_or_default(),
            });
        }

        let conflict_analysis = match &draft.logic {
            LogicSpec::Rules(rules) => {
                let analysis = analyze_conflicts(rules);
                if !analysis.is_clean() {
                    let details = analysis
                        .conflicts
                        .iter()
                        .map(|c| {
                            format!(
                                "{} overlaps {} at priority {} on [{}]",
                                c.first,
                                c.second,
                                c.priority,
                                c.fields.join(", ")
                            )
                        })
                        .collect::<Vec<_>>()
                        .join("; ");
                    return Err(RegistryError::RuleConflict { details });
                }
                Some(analysis)
            }
            LogicSpec::Native { code_ref } => {
                if !self.natives.contains(code_ref) {
                    return Err(RegistryError::UnknownNativeLogic {
                        code_ref: code_ref.clone(),
                    });
                }
                None
            }
        };

        let logic_hash = self.hasher.hash_canonical(&draft.logic)?;
        let artifact = DecisionFunctionArtifact {
            function_id: draft.function_id,
            version: draft.version,
            logic: draft.logic,
            input_schema: draft.input_schema,
            output_schema: draft.output_schema,
            logic_hash,
            metadata: draft.metadata,
            legal_citations,
            feature_names: draft.feature_names,
            status: ArtifactStatus::Draft,
            signatures: Vec::new(),
            conflict_analysis,
            created_at: Utc::now(),
        };

        self.save(&key, &artifact, None)?;
        let author = artifact.metadata.author.clone();
        self.record_event(&artifact, GovernanceAction::Registered, &author)?;
        Ok(artifact)
    }

    /// Move a draft into review
    pub fn request_release(
        &self,
        function_id: &str,
        version: &Version,
        actor: &str,
    ) -> Result<(), RegistryError> {
        let key = Self::artifact_key(function_id, version);
        let (mut artifact, cas) = self.load(&key)?;

        if artifact.status != ArtifactStatus::Draft {
            return Err(RegistryError::InvalidStateTransition {
                function_id: function_id.to_string(),
                version: version.clone(),
                status: artifact.status,
                operation: "request_release".to_string(),
            });
        }

        artifact.status = ArtifactStatus::PendingReview;
        self.save(&key, &artifact, Some(cas))?;
        self.record_event(&artifact, GovernanceAction::ReleaseRequested, actor)?;
        Ok(())
    }

    /// Record a verified release signature; both roles present means Approved
    pub fn sign(
        &self,
        function_id: &str,
        version: &Version,
        signer_id: &str,
        role: SignerRole,
        signature: &[u8],
    ) -> Result<ArtifactStatus, RegistryError> {
        let key = Self::artifact_key(function_id, version);
        let (mut artifact, cas) = self.load(&key)?;

        if artifact.status != ArtifactStatus::PendingReview {
            return Err(RegistryError::InvalidStateTransition {
                function_id: function_id.to_string(),
                version: version.clone(),
                status: artifact.status,
                operation: "sign".to_string(),
            });
        }

        if artifact.signature_for(role).is_some() {
            return Err(RegistryError::DuplicateSignature {
                role: role.to_string(),
            });
        }
        if artifact.signatures.iter().any(|s| s.signer_id == signer_id) {
            return Err(RegistryError::SeparationOfDuties {
                signer_id: signer_id.to_string(),
            });
        }

        // Verification is not retried; a flaky signer must fail fast
        let payload = self.release_payload_bytes(&artifact)?;
        let verified = self.signer.verify(&payload, signature, signer_id)?;
        if !verified {
            return Err(RegistryError::SignatureRejected {
                signer_id: signer_id.to_string(),
            });
        }

        artifact.signatures.push(SignatureRecord {
            signer_id: signer_id.to_string(),
            role,
            signature: signature.to_vec(),
            signed_at: Utc::now(),
        });

        let approved = artifact.signature_for(SignerRole::Owner).is_some()
            && artifact.signature_for(SignerRole::Reviewer).is_some();
        if approved {
            artifact.has_dual_signatures()?;
            artifact.status = ArtifactStatus::Approved;
        }

        self.save(&key, &artifact, Some(cas))?;
        self.record_event(&artifact, GovernanceAction::Signed, signer_id)?;
        if approved {
            self.record_event(&artifact, GovernanceAction::Approved, signer_id)?;
        }
        Ok(artifact.status)
    }

    /// Open the effective window for an approved version
    ///
    /// The previously active version (if any) is superseded at
    /// `effective_from` and moves to Deprecated.
    pub fn activate(
        &self,
        function_id: &str,
        version: &Version,
        effective_from: DateTime<Utc>,
        actor: &str,
    ) -> Result<(), RegistryError> {
        let key = Self::artifact_key(function_id, version);
        let (mut artifact, cas) = self.load(&key)?;

        if artifact.status != ArtifactStatus::Approved {
            return Err(RegistryError::InvalidStateTransition {
                function_id: function_id.to_string(),
                version: version.clone(),
                status: artifact.status,
                operation: "activate".to_string(),
            });
        }
        artifact.has_dual_signatures()?;

        let index_key = Self::index_key(function_id);
        let (mut index, index_cas) = self.load_index(function_id)?;
        let superseded = index.activate(version.clone(), effective_from)?;
        self.save_index(&index_key, &index, index_cas)?;

        if let Some(previous) = superseded {
            if &previous != version {
                let previous_key = Self::artifact_key(function_id, &previous);
                let (mut previous_artifact, previous_cas) = self.load(&previous_key)?;
                previous_artifact.status = ArtifactStatus::Deprecated;
                self.save(&previous_key, &previous_artifact, Some(previous_cas))?;
                self.record_event(&previous_artifact, GovernanceAction::Deprecated, actor)?;
            }
        }

        artifact.status = ArtifactStatus::Active;
        self.save(&key, &artifact, Some(cas))?;
        self.record_event(&artifact, GovernanceAction::Activated, actor)?;
        Ok(())
    }

    /// Close the effective window and retire the version
    ///
    /// The artifact is never deleted; Retired is terminal.
    pub fn retire(
        &self,
        function_id: &str,
        version: &Version,
        sunset_at: DateTime<Utc>,
        actor: &str,
    ) -> Result<(), RegistryError> {
        let key = Self::artifact_key(function_id, version);
        let (mut artifact, cas) = self.load(&key)?;

        if !matches!(
            artifact.status,
            ArtifactStatus::Active | ArtifactStatus::Deprecated
        ) {
            return Err(RegistryError::InvalidStateTransition {
                function_id: function_id.to_string(),
                version: version.clone(),
                status: artifact.status,
                operation: "retire".to_string(),
            });
        }

        let index_key = Self::index_key(function_id);
        let (mut index, index_cas) = self.load_index(function_id)?;
        match index.close(version, sunset_at) {
            Ok(()) => self.save_index(&index_key, &index, index_cas)?,
            // A superseded version's window is already closed
            Err(crate::version_index::VersionIndexError::WindowNotFound { .. }) => {}
            Err(err) => return Err(err.into()),
        }

        artifact.status = ArtifactStatus::Retired;
        self.save(&key, &artifact, Some(cas))?;
        self.record_event(&artifact, GovernanceAction::Retired, actor)?;
        Ok(())
    }

    /// The version effective at `as_of`; a pure lookup over the index
    pub fn resolve_active_version(
        &self,
        function_id: &str,
        as_of: DateTime<Utc>,
    ) -> Result<Version, RegistryError> {
        let (index, _) = self.load_index(function_id)?;
        index
            .resolve(as_of)
            .cloned()
            .ok_or_else(|| RegistryError::VersionNotFound {
                function_id: function_id.to_string(),
                detail: format!("nothing effective at {}", as_of),
            })
    }

    /// Load a persisted artifact
    pub fn artifact(
        &self,
        function_id: &str,
        version: &Version,
    ) -> Result<DecisionFunctionArtifact, RegistryError> {
        let key = Self::artifact_key(function_id, version);
        Ok(self.load(&key)?.0)
    }

    /// All registered versions of a function
    pub fn versions(&self, function_id: &str) -> Result<Vec<Version>, RegistryError> {
        let prefix = format!("artifact/{}/", function_id);
        let mut versions = Vec::new();
        for key in self.store.keys(&prefix)? {
            let (artifact, _) = self.load(&key)?;
            versions.push(artifact.version);
        }
        versions.sort();
        Ok(versions)
    }

    /// The effective version index for a function
    pub fn effective_index(
        &self,
        function_id: &str,
    ) -> Result<EffectiveVersionIndex, RegistryError> {
        Ok(self.load_index(function_id)?.0)
    }

    /// Produce the canonical release payload a signer must cover
    pub fn release_payload(
        &self,
        function_id: &str,
        version: &Version,
    ) -> Result<Vec<u8>, RegistryError> {
        let (artifact, _) = self.load(&Self::artifact_key(function_id, version))?;
        self.release_payload_bytes(&artifact)
    }

    fn release_payload_bytes(
        &self,
        artifact: &DecisionFunctionArtifact,
    ) -> Result<Vec<u8>, RegistryError> {
        Ok(self.hasher.canonical_bytes(&ReleasePayload {
            function_id: &artifact.function_id,
            version: &artifact.version,
            logic_hash: &artifact.logic_hash,
        })?)
    }

    fn fetch(
        &self,
        function_id: &str,
        version: &Version,
    ) -> Result<ResolvedFunction, RegistryError> {
        let (artifact, _) = self.load(&Self::artifact_key(function_id, version))?;

        let cache_key = (function_id.to_string(), version.clone());
        let cached = self
            .compiled
            .read()
            .ok()
            .and_then(|cache| cache.get(&cache_key).cloned());

        let compiled = match cached {
            Some(compiled) => compiled,
            None => {
                let input_schema = IoSchema::compile(artifact.input_schema.clone()).map_err(
                    |reason| RegistryError::InvalidSchema {
                        which: "input".to_string(),
                        reason,
                    },
                )?;
                let output_schema = IoSchema::compile(artifact.output_schema.clone()).map_err(
                    |reason| RegistryError::InvalidSchema {
                        which: "output".to_string(),
                        reason,
                    },
                )?;
                let logic: Arc<dyn Evaluatable> = match &artifact.logic {
                    LogicSpec::Rules(rules) => Arc::new(rules.clone()),
                    LogicSpec::Native { code_ref } => self.natives.resolve(code_ref).ok_or_else(
                        || RegistryError::UnknownNativeLogic {
                            code_ref: code_ref.clone(),
                        },
                    )?,
                };
                let compiled = Arc::new(CompiledVersion {
                    logic_hash: artifact.logic_hash,
                    feature_names: artifact.feature_names.clone(),
                    input_schema,
                    output_schema,
                    logic,
                });
                if let Ok(mut cache) = self.compiled.write() {
                    cache.insert(cache_key, compiled.clone());
                }
                compiled
            }
        };

        Ok(ResolvedFunction {
            function_id: artifact.function_id,
            version: artifact.version,
            status: artifact.status,
            logic_hash: compiled.logic_hash,
            feature_names: compiled.feature_names.clone(),
            input_schema: compiled.input_schema.clone(),
            output_schema: compiled.output_schema.clone(),
            logic: compiled.logic.clone(),
        })
    }

    fn load(&self, key: &str) -> Result<(DecisionFunctionArtifact, u64), RegistryError> {
        let (bytes, cas) = self.store.get(key)?.ok_or_else(|| {
            let parts: Vec<&str> = key.splitn(3, '/').collect();
            RegistryError::VersionNotFound {
                function_id: parts.get(1).unwrap_or(&"").to_string(),
                detail: format!("{} is not registered", parts.get(2).unwrap_or(&"")),
            }
        })?;
        let artifact = serde_json::from_slice(&bytes).map_err(|e| {
            RegistryError::Store(StoreError::Backend {
                reason: format!("artifact decode failed: {}", e),
            })
        })?;
        Ok((artifact, cas))
    }

    fn save(
        &self,
        key: &str,
        artifact: &DecisionFunctionArtifact,
        expected: Option<u64>,
    ) -> Result<(), RegistryError> {
        let bytes = serde_json::to_vec(artifact).map_err(|e| {
            RegistryError::Store(StoreError::Backend {
                reason: format!("artifact encode failed: {}", e),
            })
        })?;
        match self.store.put(key, &bytes, expected) {
            Ok(_) => Ok(()),
            Err(StoreError::VersionConflict { .. }) if expected.is_none() => {
                Err(RegistryError::DuplicateVersion {
                    function_id: artifact.function_id.clone(),
                    version: artifact.version.clone(),
                })
            }
            Err(StoreError::VersionConflict { .. }) => Err(RegistryError::ConcurrentUpdate {
                key: key.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    fn load_index(
        &self,
        function_id: &str,
    ) -> Result<(EffectiveVersionIndex, Option<u64>), RegistryError> {
        match self.store.get(&Self::index_key(function_id))? {
            Some((bytes, cas)) => {
                let index = serde_json::from_slice(&bytes).map_err(|e| {
                    RegistryError::Store(StoreError::Backend {
                        reason: format!("index decode failed: {}", e),
                    })
                })?;
                Ok((index, Some(cas)))
            }
            None => Ok((EffectiveVersionIndex::new(), None)),
        }
    }

    fn save_index(
        &self,
        key: &str,
        index: &EffectiveVersionIndex,
        expected: Option<u64>,
    ) -> Result<(), RegistryError> {
        let bytes = serde_json::to_vec(index).map_err(|e| {
            RegistryError::Store(StoreError::Backend {
                reason: format!("index encode failed: {}", e),
            })
        })?;
        match self.store.put(key, &bytes, expected) {
            Ok(_) => Ok(()),
            Err(StoreError::VersionConflict { .. }) => Err(RegistryError::ConcurrentUpdate {
                key: key.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    fn record_event(
        &self,
        artifact: &DecisionFunctionArtifact,
        action: GovernanceAction,
        caller: &str,
    ) -> Result<(), RegistryError> {
        let event_hash = self.hasher.hash_canonical(&json!({
            "action": action,
            "function_id": artifact.function_id,
            "version": artifact.version,
        }))?;

        self.ledger.append(TraceDraft {
            trace_id: Uuid::new_v4(),
            event_type: EventType::Governance,
            function_id: artifact.function_id.clone(),
            version: artifact.version.clone(),
            function_hash: artifact.logic_hash,
            caller_id: caller.to_string(),
            timestamp: Utc::now(),
            status: ExecutionStatus::Ok,
            error: None,
            input_hash: event_hash,
            output_hash: None,
            feature_snapshot_ref: None,
            governance: Some(action),
        })?;
        Ok(())
    }
}

impl FunctionResolver for DecisionFunctionRegistry {
    fn resolve_active(
        &self,
        function_id: &str,
        as_of: DateTime<Utc>,
    ) -> Result<ResolvedFunction, RegistryError> {
        let version = self.resolve_active_version(function_id, as_of)?;
        self.fetch(function_id, &version)
    }

    fn resolve_pinned(
        &self,
        function_id: &str,
        version: &Version,
    ) -> Result<ResolvedFunction, RegistryError> {
        self.fetch(function_id, version)
    }
}
