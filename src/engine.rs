//! Deterministic decision engine
//!
//! `execute` resolves the effective version, validates input and output
//! against the artifact's schemas, fetches point-in-time features, evaluates
//! the logic under a timeout, and appends exactly one trace record. Failures
//! at any step append an ERROR-status record instead; no execution is ever
//! left untraced. Execution is stateless, so calls run concurrently; the
//! ledger append is the only serialization point.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use uuid::Uuid;

use crate::context::{EvaluationContext, FeatureSnapshot};
use crate::error::EngineError;
use crate::error::RegistryError;
use crate::hasher::ContentHasher;
use crate::ledger::{TraceDraft, TraceLedger};
use crate::logging::{ExecutionLog, LogEntry, LogLevel};
use crate::logic::Evaluatable;
use crate::providers::{FeatureStore, RetryPolicy};
use crate::registry::{FunctionResolver, ResolvedFunction};
use crate::store::BlobStore;
use crate::types::{
    ArtifactStatus, ContentHash, DecisionResult, EventType, ExecutionStatus, FieldViolation,
    TraceFault, Version,
};

/// Which version of a function a request targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSelector {
    /// The version effective at the request's `as_of` instant
    Latest,
    /// An explicit version, used for replay and shadow execution
    Pinned(Version),
}

/// One decision execution request
#[derive(Debug, Clone)]
pub struct DecisionRequest {
    pub function_id: String,
    pub version: VersionSelector,
    pub input: Value,
    /// Entity the feature snapshot is fetched for; required when the
    /// function declares feature names
    pub entity_id: Option<String>,
    pub caller_id: String,
    /// Decision time; features and the evaluation clock are pinned to this,
    /// never to the wall clock
    pub as_of: DateTime<Utc>,
}

/// Engine tuning knobs
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub timeout: Duration,
    pub feature_retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(2000),
            feature_retry: RetryPolicy::default(),
        }
    }
}

struct PipelineSuccess {
    resolved: ResolvedFunction,
    output: Value,
    output_hash: ContentHash,
    snapshot_ref: Option<ContentHash>,
}

struct PipelineFailure {
    version: Version,
    function_hash: ContentHash,
    snapshot_ref: Option<ContentHash>,
    error: EngineError,
}

/// The deterministic decision engine
pub struct DecisionEngine {
    resolver: Arc<dyn FunctionResolver>,
    features: Arc<dyn FeatureStore>,
    blobs: Arc<dyn BlobStore>,
    ledger: Arc<TraceLedger>,
    hasher: ContentHasher,
    config: EngineConfig,
    log: Option<Arc<ExecutionLog>>,
}

impl std::fmt::Debug for DecisionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DecisionEngine {
    /// Create a builder for constructing an engine
    pub fn builder() -> DecisionEngineBuilder {
        DecisionEngineBuilder::new()
    }

    /// Execute a decision and append exactly one trace record
    pub fn execute(&self, request: DecisionRequest) -> Result<DecisionResult, EngineError> {
        let trace_id = Uuid::new_v4();
        let input_hash = self
            .hasher
            .hash_canonical(&request.input)
            .map_err(|e| EngineError::Execution {
                reason: format!("input canonicalization failed: {}", e),
            })?;

        match self.run_pipeline(&request, input_hash) {
            Ok(success) => {
                let record = self
                    .ledger
                    .append(TraceDraft {
                        trace_id,
                        event_type: EventType::Execution,
                        function_id: request.function_id.clone(),
                        version: success.resolved.version.clone(),
                        function_hash: success.resolved.logic_hash,
                        caller_id: request.caller_id.clone(),
                        timestamp: request.as_of,
                        status: ExecutionStatus::Ok,
                        error: None,
                        input_hash,
                        output_hash: Some(success.output_hash),
                        feature_snapshot_ref: success.snapshot_ref,
                        governance: None,
                    })
                    .map_err(|e| EngineError::TraceAppend {
                        reason: e.to_string(),
                    })?;

                self.log_event(
                    LogLevel::Info,
                    &request,
                    trace_id,
                    format!("decision ok, output hash {}", success.output_hash),
                );

                Ok(DecisionResult {
                    trace_id,
                    function_id: request.function_id,
                    version: success.resolved.version,
                    function_hash: success.resolved.logic_hash,
                    output: success.output,
                    input_hash,
                    output_hash: success.output_hash,
                    feature_snapshot_ref: success.snapshot_ref,
                    chain_hash: record.chain_hash,
                })
            }
            Err(failure) => {
                self.ledger
                    .append(TraceDraft {
                        trace_id,
                        event_type: EventType::Execution,
                        function_id: request.function_id.clone(),
                        version: failure.version,
                        function_hash: failure.function_hash,
                        caller_id: request.caller_id.clone(),
                        timestamp: request.as_of,
                        status: ExecutionStatus::Error,
                        error: Some(TraceFault {
                            class: failure.error.fault_class(),
                            message: failure.error.to_string(),
                        }),
                        input_hash,
                        output_hash: None,
                        feature_snapshot_ref: failure.snapshot_ref,
                        governance: None,
                    })
                    .map_err(|e| EngineError::TraceAppend {
                        reason: e.to_string(),
                    })?;

                self.log_event(
                    LogLevel::Error,
                    &request,
                    trace_id,
                    format!("decision failed: {}", failure.error),
                );

                Err(failure.error)
            }
        }
    }

    fn run_pipeline(
        &self,
        request: &DecisionRequest,
        input_hash: ContentHash,
    ) -> Result<PipelineSuccess, PipelineFailure> {
        let unresolved_version = match &request.version {
            VersionSelector::Pinned(version) => version.clone(),
            VersionSelector::Latest => Version::new(0, 0, 0),
        };
        let fail_unresolved = |error: EngineError| PipelineFailure {
            version: unresolved_version.clone(),
            function_hash: ContentHash::zero(),
            snapshot_ref: None,
            error,
        };

        // 1. Resolve the version: pinned for replay, effective index otherwise
        let resolution = match &request.version {
            VersionSelector::Latest => self
                .resolver
                .resolve_active(&request.function_id, request.as_of),
            VersionSelector::Pinned(version) => {
                self.resolver.resolve_pinned(&request.function_id, version)
            }
        };
        let resolved = match resolution {
            Ok(resolved) => resolved,
            Err(RegistryError::VersionNotFound {
                function_id,
                detail,
            }) => {
                return Err(fail_unresolved(EngineError::VersionNotFound {
                    function_id,
                    detail,
                }))
            }
            Err(other) => {
                return Err(fail_unresolved(EngineError::ExternalDependency {
                    dependency: "registry".to_string(),
                    reason: other.to_string(),
                }))
            }
        };

        let fail = |error: EngineError, snapshot_ref: Option<ContentHash>| PipelineFailure {
            version: resolved.version.clone(),
            function_hash: resolved.logic_hash,
            snapshot_ref,
            error,
        };

        let executable = match &request.version {
            VersionSelector::Latest => resolved.status == ArtifactStatus::Active,
            VersionSelector::Pinned(_) => resolved.status != ArtifactStatus::Draft,
        };
        if !executable {
            let error = EngineError::InactiveFunction {
                function_id: resolved.function_id.clone(),
                version: resolved.version.clone(),
                status: resolved.status,
            };
            return Err(fail(error, None));
        }

        // 2. Validate input, enumerating every violation
        if let Err(violations) = resolved.input_schema.validate(&request.input) {
            return Err(fail(EngineError::Validation { violations }, None));
        }

        // Persist the input payload so replay can reload it by hash
        match self.hasher.canonical_bytes(&request.input) {
            Ok(bytes) => {
                if let Err(e) = self.blobs.put(&bytes) {
                    return Err(fail(
                        EngineError::ExternalDependency {
                            dependency: "blob_store".to_string(),
                            reason: e.to_string(),
                        },
                        None,
                    ));
                }
            }
            Err(e) => {
                return Err(fail(
                    EngineError::Execution {
                        reason: e.to_string(),
                    },
                    None,
                ))
            }
        }

        // 3. Fetch point-in-time features at as_of, never "now"
        let (snapshot, snapshot_ref) = match self.fetch_snapshot(request, &resolved) {
            Ok(pair) => pair,
            Err(error) => return Err(fail(error, None)),
        };

        // 4. Evaluate under the execution timeout
        let ctx = EvaluationContext::new(request.as_of, input_hash.seed(), snapshot);
        let output = match self.evaluate_with_timeout(
            resolved.logic.clone(),
            request.input.clone(),
            ctx,
        ) {
            Ok(output) => output,
            Err(error) => return Err(fail(error, snapshot_ref)),
        };

        // 5. Validate output against the output contract
        if let Err(violations) = resolved.output_schema.validate(&output) {
            return Err(fail(EngineError::Validation { violations }, snapshot_ref));
        }

        // 6. Content-address the output for replay comparison
        let output_hash = match self.hasher.canonical_bytes(&output) {
            Ok(bytes) => match self.blobs.put(&bytes) {
                Ok(hash) => hash,
                Err(e) => {
                    return Err(fail(
                        EngineError::ExternalDependency {
                            dependency: "blob_store".to_string(),
                            reason: e.to_string(),
                        },
                        snapshot_ref,
                    ))
                }
            },
            Err(e) => {
                return Err(fail(
                    EngineError::Execution {
                        reason: e.to_string(),
                    },
                    snapshot_ref,
                ))
            }
        };

        Ok(PipelineSuccess {
            resolved,
            output,
            output_hash,
            snapshot_ref,
        })
    }

    fn fetch_snapshot(
        &self,
        request: &DecisionRequest,
        resolved: &ResolvedFunction,
    ) -> Result<(FeatureSnapshot, Option<ContentHash>), EngineError> {
        if resolved.feature_names.is_empty() {
            return Ok((FeatureSnapshot::empty(request.as_of), None));
        }

        let entity_id = request
            .entity_id
            .as_deref()
            .ok_or_else(|| EngineError::Validation {
                violations: vec![FieldViolation {
                    path: "entity_id".to_string(),
                    message: "required for feature-backed functions".to_string(),
                }],
            })?;

        // Feature reads are idempotent, so bounded retry is safe
        let snapshot = self
            .config
            .feature_retry
            .run(|| {
                self.features
                    .get_features_at(entity_id, &resolved.feature_names, request.as_of)
            })
            .map_err(|e| EngineError::ExternalDependency {
                dependency: "feature_store".to_string(),
                reason: e.to_string(),
            })?;

        if !snapshot.is_point_in_time() {
            return Err(EngineError::ExternalDependency {
                dependency: "feature_store".to_string(),
                reason: "returned an observation later than as_of".to_string(),
            });
        }

        let bytes = self
            .hasher
            .canonical_bytes(&snapshot)
            .map_err(|e| EngineError::Execution {
                reason: e.to_string(),
            })?;
        let snapshot_ref = self
            .blobs
            .put(&bytes)
            .map_err(|e| EngineError::ExternalDependency {
                dependency: "blob_store".to_string(),
                reason: e.to_string(),
            })?;

        Ok((snapshot, Some(snapshot_ref)))
    }

    fn evaluate_with_timeout(
        &self,
        logic: Arc<dyn Evaluatable>,
        input: Value,
        mut ctx: EvaluationContext,
    ) -> Result<Value, EngineError> {
        let limit = self.config.timeout;
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let result = logic.evaluate(&input, &mut ctx);
            let _ = tx.send(result);
        });

        match rx.recv_timeout(limit) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(EngineError::Timeout {
                limit_ms: limit.as_millis() as u64,
            }),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(EngineError::Execution {
                reason: "decision logic panicked".to_string(),
            }),
        }
    }

    fn log_event(
        &self,
        level: LogLevel,
        request: &DecisionRequest,
        trace_id: Uuid,
        message: String,
    ) {
        if let Some(log) = &self.log {
            let mut entry = LogEntry::new(level, request.as_of, message).with_trace(trace_id);
            entry.function_id = Some(request.function_id.clone());
            log.record(entry);
        }
    }
}

/// Builder for constructing decision engines with a fluent API
#[derive(Default)]
pub struct DecisionEngineBuilder {
    resolver: Option<Arc<dyn FunctionResolver>>,
    features: Option<Arc<dyn FeatureStore>>,
    blobs: Option<Arc<dyn BlobStore>>,
    ledger: Option<Arc<TraceLedger>>,
    config: Option<EngineConfig>,
    log: Option<Arc<ExecutionLog>>,
}

impl DecisionEngineBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the function resolver (usually the registry)
    pub fn with_resolver(mut self, resolver: Arc<dyn FunctionResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Set the feature store
    pub fn with_feature_store(mut self, features: Arc<dyn FeatureStore>) -> Self {
        self.features = Some(features);
        self
    }

    /// Set the blob store for inputs, outputs, and snapshots
    pub fn with_blob_store(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    /// Set the trace ledger
    pub fn with_ledger(mut self, ledger: Arc<TraceLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Override the default configuration
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Attach a deterministic execution log
    pub fn with_execution_log(mut self, log: Arc<ExecutionLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Build the engine
    pub fn build(self) -> Result<DecisionEngine, String> {
        let resolver = self.resolver.ok_or("Function resolver is required")?;
        let features = self.features.ok_or("Feature store is required")?;
        let blobs = self.blobs.ok_or("Blob store is required")?;
        let ledger = self.ledger.ok_or("Trace ledger is required")?;

        Ok(DecisionEngine {
            resolver,
            features,
            blobs,
            ledger,
            hasher: ContentHasher::new(),
            config: self.config.unwrap_or_default(),
            log: self.log,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BincodeCodec;
    use crate::logic::NativeLogic;
    use crate::providers::InMemoryFeatureStore;
    use crate::schema::IoSchema;
    use crate::store::{InMemoryBlobStore, InMemoryLog};
    use chrono::TimeZone;
    use serde_json::json;

    struct FixedResolver {
        resolved: ResolvedFunction,
    }

    impl FunctionResolver for FixedResolver {
        fn resolve_active(
            &self,
            _function_id: &str,
            _as_of: DateTime<Utc>,
        ) -> Result<ResolvedFunction, RegistryError> {
            Ok(self.resolved.clone())
        }

        fn resolve_pinned(
            &self,
            _function_id: &str,
            _version: &Version,
        ) -> Result<ResolvedFunction, RegistryError> {
            Ok(self.resolved.clone())
        }
    }

    fn resolved_with(logic: Arc<dyn Evaluatable>) -> ResolvedFunction {
        ResolvedFunction {
            function_id: "f".to_string(),
            version: Version::new(1, 0, 0),
            status: ArtifactStatus::Active,
            logic_hash: ContentHash([5; 32]),
            feature_names: vec![],
            input_schema: IoSchema::compile(json!({"type": "object"})).unwrap(),
            output_schema: IoSchema::compile(json!({"type": "object"})).unwrap(),
            logic,
        }
    }

    fn engine_with(resolved: ResolvedFunction) -> DecisionEngine {
        let ledger = Arc::new(
            TraceLedger::open(Arc::new(InMemoryLog::new()), Box::new(BincodeCodec::new()))
                .unwrap(),
        );
        DecisionEngine::builder()
            .with_resolver(Arc::new(FixedResolver { resolved }))
            .with_feature_store(Arc::new(InMemoryFeatureStore::new()))
            .with_blob_store(Arc::new(InMemoryBlobStore::new()))
            .with_ledger(ledger)
            .with_config(EngineConfig {
                timeout: Duration::from_millis(100),
                feature_retry: RetryPolicy::default(),
            })
            .build()
            .unwrap()
    }

    fn request() -> DecisionRequest {
        DecisionRequest {
            function_id: "f".to_string(),
            version: VersionSelector::Latest,
            input: json!({}),
            entity_id: None,
            caller_id: "tester".to_string(),
            as_of: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_builder_requires_all_dependencies() {
        let result = DecisionEngine::builder().build();
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("resolver"));
    }

    #[test]
    fn test_timeout_is_enforced() {
        let slow: Arc<dyn Evaluatable> =
            Arc::new(NativeLogic::new(|_: &Value, _: &mut EvaluationContext| {
                thread::sleep(Duration::from_millis(500));
                Ok(json!({}))
            }));
        let engine = engine_with(resolved_with(slow));

        let err = engine.execute(request()).unwrap_err();
        assert!(matches!(err, EngineError::Timeout { .. }));
    }

    #[test]
    fn test_panicking_logic_is_an_execution_error() {
        let panicking: Arc<dyn Evaluatable> =
            Arc::new(NativeLogic::new(|_: &Value, _: &mut EvaluationContext| {
                panic!("boom")
            }));
        let engine = engine_with(resolved_with(panicking));

        let err = engine.execute(request()).unwrap_err();
        assert!(matches!(err, EngineError::Execution { .. }));
    }

    #[test]
    fn test_rng_seed_derives_from_input() {
        let random: Arc<dyn Evaluatable> =
            Arc::new(NativeLogic::new(|_: &Value, ctx: &mut EvaluationContext| {
                Ok(json!({"draw": ctx.random().next_u64()}))
            }));
        let engine = engine_with(resolved_with(random));

        let first = engine.execute(request()).unwrap();
        let second = engine.execute(request()).unwrap();
        assert_eq!(
            first.output, second.output,
            "Same input must seed the same stream"
        );
    }
}
