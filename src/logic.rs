//! Polymorphic decision logic behind a single evaluation contract

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::context::EvaluationContext;
use crate::error::EngineError;
use crate::rules::RuleSetLogic;

/// The one contract the engine sees, whatever backs a version's logic
pub trait Evaluatable: Send + Sync {
    /// Evaluate the logic against an input and evaluation context
    fn evaluate(&self, input: &Value, ctx: &mut EvaluationContext) -> Result<Value, EngineError>;
}

impl fmt::Debug for dyn Evaluatable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<dyn Evaluatable>")
    }
}

impl Evaluatable for RuleSetLogic {
    fn evaluate(&self, input: &Value, ctx: &mut EvaluationContext) -> Result<Value, EngineError> {
        RuleSetLogic::evaluate(self, input, ctx)
    }
}

/// Native logic backed by a closure
///
/// Used for the opaque executable variant; registered in a [`NativeCatalog`]
/// under a stable `code_ref` so artifacts stay serializable.
pub struct NativeLogic<F>
where
    F: Fn(&Value, &mut EvaluationContext) -> Result<Value, EngineError> + Send + Sync,
{
    func: F,
}

impl<F> NativeLogic<F>
where
    F: Fn(&Value, &mut EvaluationContext) -> Result<Value, EngineError> + Send + Sync,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> Evaluatable for NativeLogic<F>
where
    F: Fn(&Value, &mut EvaluationContext) -> Result<Value, EngineError> + Send + Sync,
{
    fn evaluate(&self, input: &Value, ctx: &mut EvaluationContext) -> Result<Value, EngineError> {
        (self.func)(input, ctx)
    }
}

/// Serializable representation of a version's logic
///
/// The content hash of a decision function version (`logic_hash`) is the
/// canonical hash of this value; it freezes when the version leaves draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogicSpec {
    /// Declarative rule set, statically analyzed at registration
    Rules(RuleSetLogic),
    /// Opaque executable logic addressed by a registered code reference
    Native { code_ref: String },
}

/// Registry of native logic handlers keyed by code reference
#[derive(Clone, Default)]
pub struct NativeCatalog {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn Evaluatable>>>>,
}

impl fmt::Debug for NativeCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.handlers.read().map(|h| h.len()).unwrap_or(0);
        f.debug_struct("NativeCatalog").field("count", &count).finish()
    }
}

impl NativeCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under a code reference
    pub fn register(&self, code_ref: impl Into<String>, handler: Arc<dyn Evaluatable>) {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.insert(code_ref.into(), handler);
        }
    }

    /// True when a handler is registered for the code reference
    pub fn contains(&self, code_ref: &str) -> bool {
        self.handlers
            .read()
            .map(|h| h.contains_key(code_ref))
            .unwrap_or(false)
    }

    /// Resolve a handler by code reference
    pub fn resolve(&self, code_ref: &str) -> Option<Arc<dyn Evaluatable>> {
        self.handlers
            .read()
            .ok()
            .and_then(|h| h.get(code_ref).cloned())
    }

    /// Resolve a logic spec to an executable handle
    pub fn resolve_spec(&self, spec: &LogicSpec) -> Result<Arc<dyn Evaluatable>, EngineError> {
        match spec {
            LogicSpec::Rules(rules) => Ok(Arc::new(rules.clone())),
            LogicSpec::Native { code_ref } => {
                self.resolve(code_ref).ok_or_else(|| EngineError::Execution {
                    reason: format!("no native logic registered for code_ref {}", code_ref),
                })
            }
        }
    }
}
