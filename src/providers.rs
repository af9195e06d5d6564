//! External capability interfaces and in-memory fakes
//!
//! The feature store, signer, and legal reference validator are remote
//! dependencies modeled as traits; the core is fully testable against the
//! in-memory implementations here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::time::Duration;

use crate::context::{FeatureSnapshot, FeatureValue};
use crate::error::ProviderError;

/// Point-in-time feature access
pub trait FeatureStore: Send + Sync {
    /// Fetch the named features for an entity as they were known at `as_of`
    ///
    /// Implementations must never return a value observed after `as_of`.
    fn get_features_at(
        &self,
        entity_id: &str,
        names: &[String],
        as_of: DateTime<Utc>,
    ) -> Result<FeatureSnapshot, ProviderError>;
}

/// Signing capability (KMS boundary)
pub trait SignerProvider: Send + Sync {
    /// Produce a signature over a payload with the key identified by `key_id`
    fn sign(&self, payload: &[u8], key_id: &str) -> Result<Vec<u8>, ProviderError>;

    /// Verify a signature over a payload for `key_id`
    fn verify(&self, payload: &[u8], signature: &[u8], key_id: &str)
        -> Result<bool, ProviderError>;
}

/// Result of checking a legal reference IRI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationCheck {
    pub valid: bool,
    pub title: Option<String>,
    pub section: Option<String>,
}

/// Legal reference validation capability
pub trait LegalReferenceValidator: Send + Sync {
    /// Validate a legal reference IRI, resolving its title and section
    fn validate(&self, iri: &str) -> Result<CitationCheck, ProviderError>;
}

/// Bounded retry with exponential backoff, for idempotent reads only
///
/// Signature verification and ledger appends are never retried through this;
/// their idempotency is enforced by request keys, not by repetition.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(25),
        }
    }
}

impl RetryPolicy {
    /// Run an idempotent operation, backing off between attempts
    pub fn run<T, F>(&self, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Result<T, ProviderError>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_err = None;
        for attempt in 0..attempts {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) => {
                    last_err = Some(err);
                    if attempt + 1 < attempts {
                        std::thread::sleep(self.base_delay * 2u32.pow(attempt));
                    }
                }
            }
        }
        Err(last_err.unwrap_or(ProviderError::Unavailable {
            provider: "unknown".to_string(),
            reason: "no attempts were made".to_string(),
        }))
    }
}

/// In-memory feature store holding full observation histories
#[derive(Debug, Default)]
pub struct InMemoryFeatureStore {
    observations: RwLock<HashMap<(String, String), Vec<(DateTime<Utc>, serde_json::Value)>>>,
}

impl InMemoryFeatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observation of a feature value
    pub fn record(
        &self,
        entity_id: impl Into<String>,
        name: impl Into<String>,
        observed_at: DateTime<Utc>,
        value: serde_json::Value,
    ) {
        if let Ok(mut observations) = self.observations.write() {
            let series = observations
                .entry((entity_id.into(), name.into()))
                .or_default();
            series.push((observed_at, value));
            series.sort_by_key(|(at, _)| *at);
        }
    }
}

impl FeatureStore for InMemoryFeatureStore {
    fn get_features_at(
        &self,
        entity_id: &str,
        names: &[String],
        as_of: DateTime<Utc>,
    ) -> Result<FeatureSnapshot, ProviderError> {
        let observations = self
            .observations
            .read()
            .map_err(|_| ProviderError::Unavailable {
                provider: "feature_store".to_string(),
                reason: "lock poisoned".to_string(),
            })?;

        let mut values = BTreeMap::new();
        for name in names {
            let key = (entity_id.to_string(), name.clone());
            // Latest observation at or before as_of; later ones never leak
            if let Some(series) = observations.get(&key) {
                if let Some((observed_at, value)) =
                    series.iter().rev().find(|(at, _)| *at <= as_of)
                {
                    values.insert(
                        name.clone(),
                        FeatureValue {
                            value: value.clone(),
                            observed_at: *observed_at,
                        },
                    );
                }
            }
        }

        Ok(FeatureSnapshot {
            entity_id: entity_id.to_string(),
            as_of,
            values,
        })
    }
}

/// Keyed-MAC signer fake: blake3 keyed hashes stand in for KMS signatures
#[derive(Debug, Default)]
pub struct KeyedSigner {
    keys: RwLock<HashMap<String, [u8; 32]>>,
}

impl KeyedSigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register signing material for a key id
    pub fn register_key(&self, key_id: impl Into<String>, secret: &[u8]) {
        let key = *blake3::hash(secret).as_bytes();
        if let Ok(mut keys) = self.keys.write() {
            keys.insert(key_id.into(), key);
        }
    }

    fn key_for(&self, key_id: &str) -> Option<[u8; 32]> {
        self.keys.read().ok().and_then(|keys| keys.get(key_id).copied())
    }
}

impl SignerProvider for KeyedSigner {
    fn sign(&self, payload: &[u8], key_id: &str) -> Result<Vec<u8>, ProviderError> {
        let key = self.key_for(key_id).ok_or_else(|| ProviderError::Rejected {
            provider: "signer".to_string(),
            reason: format!("unknown key id {}", key_id),
        })?;
        Ok(blake3::keyed_hash(&key, payload).as_bytes().to_vec())
    }

    fn verify(
        &self,
        payload: &[u8],
        signature: &[u8],
        key_id: &str,
    ) -> Result<bool, ProviderError> {
        match self.key_for(key_id) {
            Some(key) => {
                let expected = blake3::keyed_hash(&key, payload);
                Ok(expected.as_bytes().as_slice() == signature)
            }
            None => Ok(false),
        }
    }
}

/// Legal reference validator fake backed by an allowlist
#[derive(Debug, Default)]
pub struct StaticLegalValidator {
    citations: RwLock<HashMap<String, (String, String)>>,
}

impl StaticLegalValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow an IRI, recording its resolved title and section
    pub fn allow(
        &self,
        iri: impl Into<String>,
        title: impl Into<String>,
        section: impl Into<String>,
    ) {
        if let Ok(mut citations) = self.citations.write() {
            citations.insert(iri.into(), (title.into(), section.into()));
        }
    }
}

impl LegalReferenceValidator for StaticLegalValidator {
    fn validate(&self, iri: &str) -> Result<CitationCheck, ProviderError> {
        let citations = self.citations.read().map_err(|_| ProviderError::Unavailable {
            provider: "legal_validator".to_string(),
            reason: "lock poisoned".to_string(),
        })?;

        Ok(match citations.get(iri) {
            Some((title, section)) => CitationCheck {
                valid: true,
                title: Some(title.clone()),
                section: Some(section.clone()),
            },
            None => CitationCheck {
                valid: false,
                title: None,
                section: None,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_feature_store_point_in_time_lookup() {
        let store = InMemoryFeatureStore::new();
        store.record("cust-1", "credit_score", day(1), json!(650));
        store.record("cust-1", "credit_score", day(10), json!(720));

        let names = vec!["credit_score".to_string()];
        let snapshot = store.get_features_at("cust-1", &names, day(5)).unwrap();
        assert_eq!(snapshot.get("credit_score"), Some(&json!(650)));

        let snapshot = store.get_features_at("cust-1", &names, day(15)).unwrap();
        assert_eq!(snapshot.get("credit_score"), Some(&json!(720)));
    }

    #[test]
    fn test_feature_store_never_leaks_future_values() {
        let store = InMemoryFeatureStore::new();
        store.record("cust-1", "flag", day(20), json!(true));

        let names = vec!["flag".to_string()];
        let snapshot = store.get_features_at("cust-1", &names, day(5)).unwrap();
        assert!(snapshot.is_empty());
        assert!(snapshot.is_point_in_time());
    }

    #[test]
    fn test_keyed_signer_roundtrip() {
        let signer = KeyedSigner::new();
        signer.register_key("alice", b"alice-secret");

        let signature = signer.sign(b"release-payload", "alice").unwrap();
        assert!(signer.verify(b"release-payload", &signature, "alice").unwrap());
        assert!(!signer.verify(b"other-payload", &signature, "alice").unwrap());
        assert!(!signer.verify(b"release-payload", &signature, "bob").unwrap());
    }

    #[test]
    fn test_signer_rejects_unknown_key() {
        let signer = KeyedSigner::new();
        assert!(signer.sign(b"payload", "ghost").is_err());
    }

    #[test]
    fn test_legal_validator_allowlist() {
        let validator = StaticLegalValidator::new();
        validator.allow("https://law.example/reg-b", "Regulation B", "1002.4");

        let check = validator.validate("https://law.example/reg-b").unwrap();
        assert!(check.valid);
        assert_eq!(check.section.as_deref(), Some("1002.4"));

        let check = validator.validate("https://law.example/unknown").unwrap();
        assert!(!check.valid);
    }

    #[test]
    fn test_retry_policy_retries_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        };

        let result = policy.run(|| {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ProviderError::Unavailable {
                    provider: "feature_store".to_string(),
                    reason: "transient".to_string(),
                })
            } else {
                Ok(42)
            }
        });

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_retry_policy_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
        };

        let result: Result<(), _> = policy.run(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Unavailable {
                provider: "feature_store".to_string(),
                reason: "down".to_string(),
            })
        });

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
