//! JSON Schema validation for decision function inputs and outputs

use jsonschema::{Draft, Validator};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::types::FieldViolation;

/// A compiled input or output contract
///
/// The raw schema document is kept for artifact persistence and hashing; the
/// compiled validator is shared so concurrent executions validate without
/// recompiling.
#[derive(Clone)]
pub struct IoSchema {
    raw: Value,
    validator: Arc<Validator>,
}

impl fmt::Debug for IoSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoSchema").field("raw", &self.raw).finish()
    }
}

impl IoSchema {
    /// Compile a JSON Schema (Draft 2020-12)
    pub fn compile(raw: Value) -> Result<Self, String> {
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&raw)
            .map_err(|e| e.to_string())?;

        Ok(Self {
            raw,
            validator: Arc::new(validator),
        })
    }

    /// The raw schema document
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Validate an instance, collecting every violation rather than the first
    pub fn validate(&self, instance: &Value) -> Result<(), Vec<FieldViolation>> {
        let violations: Vec<FieldViolation> = self
            .validator
            .iter_errors(instance)
            .map(|err| FieldViolation {
                path: err.instance_path().to_string(),
                message: err.to_string(),
            })
            .collect();

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    /// Cheap validity check without violation details
    pub fn is_valid(&self, instance: &Value) -> bool {
        self.validator.is_valid(instance)
    }
}
