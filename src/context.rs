//! Evaluation context providing controlled access to external dependencies
//!
//! Decision logic only ever sees frozen time, seeded randomness, and a
//! recorded feature snapshot, so re-evaluating with the same context
//! reproduces the same output byte for byte.

use chrono::{DateTime, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Deterministic clock frozen at the decision's `as_of` instant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeterministicClock {
    as_of: DateTime<Utc>,
}

impl DeterministicClock {
    /// Create a clock frozen at a specific timestamp
    pub fn new(as_of: DateTime<Utc>) -> Self {
        Self { as_of }
    }

    /// The frozen timestamp; logic never reads the wall clock
    pub fn now(&self) -> DateTime<Utc> {
        self.as_of
    }
}

/// Seeded random number generator for reproducible randomness
#[derive(Debug)]
pub struct SeededRandom {
    rng: ChaCha8Rng,
    seed: u64,
}

impl SeededRandom {
    /// Create a new seeded random number generator
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            seed,
        }
    }

    /// The seed used for this generator
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Generate a random u64
    pub fn next_u64(&mut self) -> u64 {
        self.rng.gen()
    }

    /// Generate a random value in a range
    pub fn gen_range<T, R>(&mut self, range: R) -> T
    where
        T: rand::distributions::uniform::SampleUniform,
        R: rand::distributions::uniform::SampleRange<T>,
    {
        self.rng.gen_range(range)
    }

    /// Generate a random boolean with probability `p`
    pub fn gen_bool(&mut self, p: f64) -> bool {
        self.rng.gen_bool(p)
    }
}

impl Clone for SeededRandom {
    fn clone(&self) -> Self {
        // Restart from the seed so clones reproduce the same stream
        Self::new(self.seed)
    }
}

/// A feature value as it was known at a specific instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureValue {
    pub value: serde_json::Value,
    pub observed_at: DateTime<Utc>,
}

/// Point-in-time snapshot of external features
///
/// Values are keyed by feature name in a `BTreeMap` so the canonical bytes,
/// and therefore the snapshot's content address, are stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    pub entity_id: String,
    pub as_of: DateTime<Utc>,
    pub values: BTreeMap<String, FeatureValue>,
}

impl FeatureSnapshot {
    /// Create an empty snapshot for functions that require no features
    pub fn empty(as_of: DateTime<Utc>) -> Self {
        Self {
            entity_id: String::new(),
            as_of,
            values: BTreeMap::new(),
        }
    }

    /// Look up a feature value by name
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.values.get(name).map(|f| &f.value)
    }

    /// True when every observation predates or equals the snapshot instant
    ///
    /// This is the no-future-leakage invariant; a snapshot violating it came
    /// from a broken feature store.
    pub fn is_point_in_time(&self) -> bool {
        self.values.values().all(|f| f.observed_at <= self.as_of)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Evaluation context handed to decision logic
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    clock: DeterministicClock,
    random: SeededRandom,
    features: FeatureSnapshot,
}

impl EvaluationContext {
    /// Create a context with frozen time, a derived seed, and a snapshot
    pub fn new(as_of: DateTime<Utc>, seed: u64, features: FeatureSnapshot) -> Self {
        Self {
            clock: DeterministicClock::new(as_of),
            random: SeededRandom::new(seed),
            features,
        }
    }

    /// The frozen decision time
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Mutable access to the seeded random number generator
    pub fn random(&mut self) -> &mut SeededRandom {
        &mut self.random
    }

    /// The feature snapshot for this evaluation
    pub fn features(&self) -> &FeatureSnapshot {
        &self.features
    }
}
