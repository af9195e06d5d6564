//! Declarative rule sets: evaluation semantics and static conflict analysis

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::context::EvaluationContext;
use crate::error::EngineError;

/// Comparison operator usable in a rule condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
}

/// How a rule combines its conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionMode {
    All,
    Any,
}

/// A single field comparison
///
/// `field` resolves against the input document; the `features.` prefix
/// resolves against the feature snapshot instead. Dotted paths traverse
/// nested objects. A missing field never matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCondition {
    pub field: String,
    pub op: ComparisonOp,
    pub value: Value,
}

/// One rule: conditions plus the result it produces when matched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDef {
    pub rule_id: String,
    pub priority: i64,
    pub mode: ConditionMode,
    pub conditions: Vec<RuleCondition>,
    pub result: Value,
}

/// A complete declarative rule set
///
/// Rules are evaluated in descending priority, ties broken by declaration
/// order; the first full match wins and no match falls through to
/// `default_result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSetLogic {
    pub rules: Vec<RuleDef>,
    pub default_result: Value,
}

impl RuleSetLogic {
    /// Evaluate the rule set against an input and evaluation context
    pub fn evaluate(&self, input: &Value, ctx: &EvaluationContext) -> Result<Value, EngineError> {
        let mut order: Vec<usize> = (0..self.rules.len()).collect();
        order.sort_by_key(|&i| std::cmp::Reverse(self.rules[i].priority));

        for index in order {
            let rule = &self.rules[index];
            if rule_matches(rule, input, ctx)? {
                return Ok(rule.result.clone());
            }
        }

        Ok(self.default_result.clone())
    }
}

fn rule_matches(
    rule: &RuleDef,
    input: &Value,
    ctx: &EvaluationContext,
) -> Result<bool, EngineError> {
    if rule.conditions.is_empty() {
        return Ok(true);
    }

    let mut any = false;
    let mut all = true;
    for condition in &rule.conditions {
        let hit = condition_matches(rule, condition, input, ctx)?;
        any |= hit;
        all &= hit;
    }

    Ok(match rule.mode {
        ConditionMode::All => all,
        ConditionMode::Any => any,
    })
}

fn condition_matches(
    rule: &RuleDef,
    condition: &RuleCondition,
    input: &Value,
    ctx: &EvaluationContext,
) -> Result<bool, EngineError> {
    let actual = match resolve_field(&condition.field, input, ctx) {
        Some(value) => value,
        None => return Ok(false),
    };

    compare(condition.op, actual, &condition.value).map_err(|reason| EngineError::Execution {
        reason: format!(
            "rule {} condition on {}: {}",
            rule.rule_id, condition.field, reason
        ),
    })
}

fn resolve_field<'a>(
    field: &str,
    input: &'a Value,
    ctx: &'a EvaluationContext,
) -> Option<&'a Value> {
    if let Some(name) = field.strip_prefix("features.") {
        return ctx.features().get(name);
    }
    field.split('.').try_fold(input, |acc, seg| acc.get(seg))
}

/// Numeric-aware equality: 5 and 5.0 compare equal, everything else is deep
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(op: ComparisonOp, actual: &Value, expected: &Value) -> Result<bool, String> {
    match op {
        ComparisonOp::Eq => Ok(loose_eq(actual, expected)),
        ComparisonOp::Ne => Ok(!loose_eq(actual, expected)),
        ComparisonOp::In => {
            let options = expected
                .as_array()
                .ok_or_else(|| "'in' requires an array value".to_string())?;
            Ok(options.iter().any(|candidate| loose_eq(actual, candidate)))
        }
        ComparisonOp::Lt | ComparisonOp::Le | ComparisonOp::Gt | ComparisonOp::Ge => {
            let ordering = if let (Some(x), Some(y)) = (actual.as_f64(), expected.as_f64()) {
                x.partial_cmp(&y)
            } else if let (Some(x), Some(y)) = (actual.as_str(), expected.as_str()) {
                Some(x.cmp(y))
            } else {
                None
            };
            let ordering =
                ordering.ok_or_else(|| format!("cannot order {} against {}", actual, expected))?;
            Ok(match op {
                ComparisonOp::Lt => ordering.is_lt(),
                ComparisonOp::Le => ordering.is_le(),
                ComparisonOp::Gt => ordering.is_gt(),
                ComparisonOp::Ge => ordering.is_ge(),
                _ => unreachable!(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Static conflict analysis
// ---------------------------------------------------------------------------

/// Two equal-priority rules whose condition domains provably overlap while
/// producing different results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConflict {
    pub first: String,
    pub second: String,
    pub priority: i64,
    pub fields: Vec<String>,
}

/// An equal-priority pair the analyzer could not decide
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnanalyzablePair {
    pub first: String,
    pub second: String,
    pub reason: String,
}

/// Outcome of static conflict analysis, stored on the artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictAnalysis {
    pub conflicts: Vec<RuleConflict>,
    /// Pairs requiring manual review; never silently skipped
    pub unanalyzable: Vec<UnanalyzablePair>,
}

impl ConflictAnalysis {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// Domain a rule constrains one field to, for the computable operators
#[derive(Debug, Clone)]
enum Domain {
    Any,
    /// Numeric interval; infinities encode open ends
    Num {
        lo: f64,
        lo_incl: bool,
        hi: f64,
        hi_incl: bool,
    },
    /// Finite set of scalar values
    Set(Vec<Value>),
    Empty,
}

impl Domain {
    fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

fn interval(lo: f64, lo_incl: bool, hi: f64, hi_incl: bool) -> Domain {
    if lo > hi || (lo == hi && !(lo_incl && hi_incl)) {
        Domain::Empty
    } else {
        Domain::Num {
            lo,
            lo_incl,
            hi,
            hi_incl,
        }
    }
}

fn scalar(value: &Value) -> bool {
    matches!(
        value,
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_)
    )
}

/// Domain restricted by one condition, or None when not statically analyzable
fn condition_domain(condition: &RuleCondition) -> Option<Domain> {
    match condition.op {
        ComparisonOp::Eq => {
            if let Some(n) = condition.value.as_f64() {
                Some(interval(n, true, n, true))
            } else if scalar(&condition.value) {
                Some(Domain::Set(vec![condition.value.clone()]))
            } else {
                None
            }
        }
        ComparisonOp::In => {
            let options = condition.value.as_array()?;
            if options.iter().all(scalar) {
                Some(Domain::Set(options.clone()))
            } else {
                None
            }
        }
        ComparisonOp::Lt => condition
            .value
            .as_f64()
            .map(|n| interval(f64::NEG_INFINITY, false, n, false)),
        ComparisonOp::Le => condition
            .value
            .as_f64()
            .map(|n| interval(f64::NEG_INFINITY, false, n, true)),
        ComparisonOp::Gt => condition
            .value
            .as_f64()
            .map(|n| interval(n, false, f64::INFINITY, false)),
        ComparisonOp::Ge => condition
            .value
            .as_f64()
            .map(|n| interval(n, true, f64::INFINITY, false)),
        // Co-finite domains are not representable here
        ComparisonOp::Ne => None,
    }
}

fn intersect(a: &Domain, b: &Domain) -> Domain {
    match (a, b) {
        (Domain::Empty, _) | (_, Domain::Empty) => Domain::Empty,
        (Domain::Any, other) | (other, Domain::Any) => other.clone(),
        (
            Domain::Num {
                lo: alo,
                lo_incl: aloi,
                hi: ahi,
                hi_incl: ahii,
            },
            Domain::Num {
                lo: blo,
                lo_incl: bloi,
                hi: bhi,
                hi_incl: bhii,
            },
        ) => {
            let (lo, lo_incl) = if alo > blo {
                (*alo, *aloi)
            } else if blo > alo {
                (*blo, *bloi)
            } else {
                (*alo, *aloi && *bloi)
            };
            let (hi, hi_incl) = if ahi < bhi {
                (*ahi, *ahii)
            } else if bhi < ahi {
                (*bhi, *bhii)
            } else {
                (*ahi, *ahii && *bhii)
            };
            interval(lo, lo_incl, hi, hi_incl)
        }
        (Domain::Set(xs), Domain::Set(ys)) => {
            let kept: Vec<Value> = xs
                .iter()
                .filter(|x| ys.iter().any(|y| loose_eq(x, y)))
                .cloned()
                .collect();
            if kept.is_empty() {
                Domain::Empty
            } else {
                Domain::Set(kept)
            }
        }
        (Domain::Set(xs), num @ Domain::Num { .. }) | (num @ Domain::Num { .. }, Domain::Set(xs)) => {
            let kept: Vec<Value> = xs
                .iter()
                .filter(|x| x.as_f64().is_some_and(|n| num_contains(num, n)))
                .cloned()
                .collect();
            if kept.is_empty() {
                Domain::Empty
            } else {
                Domain::Set(kept)
            }
        }
    }
}

fn num_contains(domain: &Domain, n: f64) -> bool {
    match domain {
        Domain::Num {
            lo,
            lo_incl,
            hi,
            hi_incl,
        } => {
            let above = n > *lo || (n == *lo && *lo_incl);
            let below = n < *hi || (n == *hi && *hi_incl);
            above && below
        }
        _ => false,
    }
}

/// Per-field domain of a whole rule, or Err(reason) when unanalyzable
fn rule_domains(rule: &RuleDef) -> Result<BTreeMap<String, Domain>, String> {
    if rule.mode == ConditionMode::Any && rule.conditions.len() > 1 {
        return Err("'any' condition groups are not statically analyzable".to_string());
    }

    let mut domains: BTreeMap<String, Domain> = BTreeMap::new();
    for condition in &rule.conditions {
        let domain = condition_domain(condition).ok_or_else(|| {
            format!(
                "operator {:?} on {} is not statically analyzable",
                condition.op, condition.field
            )
        })?;
        let merged = match domains.get(&condition.field) {
            Some(existing) => intersect(existing, &domain),
            None => domain,
        };
        domains.insert(condition.field.clone(), merged);
    }
    Ok(domains)
}

fn domains_overlap(
    a: &BTreeMap<String, Domain>,
    b: &BTreeMap<String, Domain>,
) -> (bool, Vec<String>) {
    let mut fields: Vec<String> = Vec::new();
    for key in a.keys().chain(b.keys()) {
        if fields.contains(key) {
            continue;
        }
        fields.push(key.clone());
    }

    for field in &fields {
        let disjoint = match (a.get(field), b.get(field)) {
            (Some(da), Some(db)) => intersect(da, db).is_empty(),
            (Some(d), None) | (None, Some(d)) => d.is_empty(),
            (None, None) => false,
        };
        if disjoint {
            return (false, fields);
        }
    }
    (true, fields)
}

/// Statically analyze a rule set for ambiguous equal-priority rules
///
/// Analysis is restricted to operators with computable overlap (equality,
/// ranges, enum membership). Pairs it cannot decide are reported as
/// unanalyzable rather than silently skipped. Only provable conflicts —
/// overlapping domains with materially different results — should block
/// registration.
pub fn analyze_conflicts(logic: &RuleSetLogic) -> ConflictAnalysis {
    let mut conflicts = Vec::new();
    let mut unanalyzable = Vec::new();

    for i in 0..logic.rules.len() {
        for j in (i + 1)..logic.rules.len() {
            let a = &logic.rules[i];
            let b = &logic.rules[j];
            if a.priority != b.priority {
                continue;
            }
            // Identical results cannot be ambiguous, whichever rule wins
            if a.result == b.result {
                continue;
            }

            match (rule_domains(a), rule_domains(b)) {
                (Ok(da), Ok(db)) => {
                    if da.values().any(Domain::is_empty) || db.values().any(Domain::is_empty) {
                        continue;
                    }
                    let (overlap, fields) = domains_overlap(&da, &db);
                    if overlap {
                        conflicts.push(RuleConflict {
                            first: a.rule_id.clone(),
                            second: b.rule_id.clone(),
                            priority: a.priority,
                            fields,
                        });
                    }
                }
                (Err(reason), _) | (_, Err(reason)) => {
                    unanalyzable.push(UnanalyzablePair {
                        first: a.rule_id.clone(),
                        second: b.rule_id.clone(),
                        reason: format!("requires manual review: {}", reason),
                    });
                }
            }
        }
    }

    ConflictAnalysis {
        conflicts,
        unanalyzable,
    }
}
