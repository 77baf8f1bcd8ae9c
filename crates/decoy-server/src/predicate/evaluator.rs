//! Predicate evaluation against a request's JSON view.
//!
//! Declarative predicates are pure functions of the request and never fail: a
//! field the request does not have simply does not match. Injected predicates
//! go through the [`InjectionHost`]; a runtime failure there is logged and
//! counts as "no match".

use super::types::{Operator, Predicate, PredicateKind, PredicateOptions};
use crate::canonical::CanonicalRequest;
use crate::scripting::InjectionHost;
use futures::future::{BoxFuture, FutureExt};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Compiled patterns shared by all imposters. Cleared when full, so patterns
/// of replaced stubs do not accumulate.
const REGEX_CACHE_CAPACITY: usize = 1024;

static REGEX_CACHE: Lazy<Mutex<HashMap<String, Arc<Regex>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn cached_regex(pattern: &str) -> Option<Arc<Regex>> {
    let mut cache = REGEX_CACHE.lock();
    if let Some(re) = cache.get(pattern) {
        return Some(Arc::clone(re));
    }
    let re = Arc::new(Regex::new(pattern).ok()?);
    if cache.len() >= REGEX_CACHE_CAPACITY {
        cache.clear();
    }
    cache.insert(pattern.to_string(), Arc::clone(&re));
    Some(re)
}

/// Evaluate a declarative predicate. Injected predicates evaluate to `false`
/// here; use [`PredicateEvaluator`] when injection may be involved.
pub fn matches(predicate: &Predicate, request: &CanonicalRequest) -> bool {
    matches_view(predicate, &request.view())
}

pub(crate) fn matches_view(predicate: &Predicate, view: &Value) -> bool {
    match &predicate.kind {
        PredicateKind::Operator { op, fields } => {
            let cmp = Comparison::new(*op, &predicate.options);
            fields
                .iter()
                .all(|(field, expected)| cmp.field(expected, view.get(field)))
        }
        PredicateKind::Not(inner) => !matches_view(inner, view),
        PredicateKind::Or(items) => items.iter().any(|p| matches_view(p, view)),
        PredicateKind::And(items) => items.iter().all(|p| matches_view(p, view)),
        PredicateKind::Inject(_) => false,
        PredicateKind::Fields(fields) => fields.iter().all(|(field, expected)| {
            bare_matches(expected, view.get(field), field == "headers")
        }),
    }
}

/// Evaluates predicate lists, delegating injected predicates to the sandbox.
#[derive(Clone)]
pub struct PredicateEvaluator {
    host: Arc<dyn InjectionHost>,
}

impl PredicateEvaluator {
    pub fn new(host: Arc<dyn InjectionHost>) -> Self {
        Self { host }
    }

    /// Logical AND over `predicates`; an empty list matches everything.
    pub async fn all_match(&self, predicates: &[Predicate], request: &CanonicalRequest) -> bool {
        let view = request.view();
        for predicate in predicates {
            if !self.evaluate(predicate, request, &view).await {
                return false;
            }
        }
        true
    }

    fn evaluate<'a>(
        &'a self,
        predicate: &'a Predicate,
        request: &'a CanonicalRequest,
        view: &'a Value,
    ) -> BoxFuture<'a, bool> {
        async move {
            if !predicate.requires_injection() {
                return matches_view(predicate, view);
            }
            match &predicate.kind {
                PredicateKind::Inject(source) => {
                    match self.host.evaluate_predicate(source, request).await {
                        Ok(matched) => matched,
                        Err(e) => {
                            warn!(
                                method = %request.method,
                                path = %request.path,
                                "Injected predicate failed, treating as no match: {}",
                                e
                            );
                            false
                        }
                    }
                }
                PredicateKind::Not(inner) => !self.evaluate(inner, request, view).await,
                PredicateKind::Or(items) => {
                    for item in items {
                        if self.evaluate(item, request, view).await {
                            return true;
                        }
                    }
                    false
                }
                PredicateKind::And(items) => {
                    for item in items {
                        if !self.evaluate(item, request, view).await {
                            return false;
                        }
                    }
                    true
                }
                _ => matches_view(predicate, view),
            }
        }
        .boxed()
    }
}

// ============================================================================
// Operator comparison
// ============================================================================

struct Comparison {
    op: Operator,
    case_sensitive: bool,
    except: Option<Arc<Regex>>,
}

impl Comparison {
    fn new(op: Operator, options: &PredicateOptions) -> Self {
        Self {
            op,
            case_sensitive: options.case_sensitive,
            except: options.except.as_deref().and_then(cached_regex),
        }
    }

    fn field(&self, expected: &Value, actual: Option<&Value>) -> bool {
        if self.op == Operator::Exists {
            return self.exists(expected, actual);
        }
        let empty_text = Value::String(String::new());
        let empty_object = Value::Object(Map::new());
        let actual = match actual {
            Some(v) => v,
            None if expected.is_object() => &empty_object,
            None => &empty_text,
        };
        self.compare(expected, actual)
    }

    fn compare(&self, expected: &Value, actual: &Value) -> bool {
        match (expected, actual) {
            (Value::Object(exp), Value::Object(act)) => {
                if self.op == Operator::DeepEquals && exp.len() != act.len() {
                    return false;
                }
                exp.iter().all(|(key, value)| {
                    let sub = lookup(act, key, self.case_sensitive);
                    self.field(value, sub)
                })
            }
            (Value::Object(_) | Value::Array(_), Value::String(text)) => {
                match serde_json::from_str::<Value>(text) {
                    Ok(parsed @ (Value::Object(_) | Value::Array(_))) => {
                        self.compare(expected, &parsed)
                    }
                    _ => false,
                }
            }
            (Value::Array(exp), Value::Array(act)) => {
                if self.op == Operator::DeepEquals && exp.len() != act.len() {
                    return false;
                }
                exp.iter()
                    .all(|e| act.iter().any(|a| self.compare(e, a)))
            }
            (Value::Object(_) | Value::Array(_), _) => false,
            (_, Value::Array(act)) => {
                if self.op == Operator::DeepEquals {
                    act.len() == 1 && self.compare(expected, &act[0])
                } else {
                    act.iter().any(|a| self.compare(expected, a))
                }
            }
            (_, Value::Object(_)) => false,
            (exp, act) => self.compare_text(&scalar_text(exp), &scalar_text(act)),
        }
    }

    fn compare_text(&self, expected: &str, actual: &str) -> bool {
        let actual = match &self.except {
            Some(re) => re.replace_all(actual, "").into_owned(),
            None => actual.to_string(),
        };

        if self.op == Operator::Matches {
            let pattern = if self.case_sensitive {
                expected.to_string()
            } else {
                format!("(?i){expected}")
            };
            return cached_regex(&pattern)
                .map(|re| re.is_match(&actual))
                .unwrap_or(false);
        }

        let (expected, actual) = if self.case_sensitive {
            (expected.to_string(), actual)
        } else {
            (expected.to_lowercase(), actual.to_lowercase())
        };

        match self.op {
            Operator::Equals | Operator::DeepEquals => actual == expected,
            Operator::Contains => actual.contains(&expected),
            Operator::StartsWith => actual.starts_with(&expected),
            Operator::EndsWith => actual.ends_with(&expected),
            Operator::Matches | Operator::Exists => false,
        }
    }

    fn exists(&self, expected: &Value, actual: Option<&Value>) -> bool {
        match expected {
            Value::Bool(should_exist) => is_present(actual) == *should_exist,
            Value::Object(exp) => {
                let parsed;
                let act = match actual {
                    Some(Value::Object(obj)) => Some(obj),
                    Some(Value::String(text)) => {
                        parsed = serde_json::from_str::<Value>(text).ok();
                        parsed.as_ref().and_then(Value::as_object)
                    }
                    _ => None,
                };
                exp.iter().all(|(key, value)| {
                    let sub = act.and_then(|obj| lookup(obj, key, self.case_sensitive));
                    self.exists(value, sub)
                })
            }
            _ => false,
        }
    }
}

// ============================================================================
// Bare field clauses
// ============================================================================

/// `true` requires presence, a string requires exact equality, and a mapping
/// requires every listed sub-key to match recursively (extra keys ignored).
fn bare_matches(expected: &Value, actual: Option<&Value>, ci_keys: bool) -> bool {
    match expected {
        Value::Bool(should_exist) => is_present(actual) == *should_exist,
        Value::Null => !is_present(actual),
        Value::Object(exp) => {
            let parsed;
            let act = match actual {
                Some(Value::Object(obj)) => Some(obj),
                Some(Value::String(text)) => {
                    parsed = serde_json::from_str::<Value>(text).ok();
                    parsed.as_ref().and_then(Value::as_object)
                }
                _ => None,
            };
            exp.iter().all(|(key, value)| {
                let sub = act.and_then(|obj| lookup(obj, key, !ci_keys));
                bare_matches(value, sub, ci_keys)
            })
        }
        Value::Array(exp) => match actual {
            Some(Value::Array(act)) => exp
                .iter()
                .all(|e| act.iter().any(|a| bare_matches(e, Some(a), ci_keys))),
            _ => false,
        },
        scalar => {
            let expected = scalar_text(scalar);
            match actual {
                Some(Value::Array(act)) => act
                    .iter()
                    .any(|a| !a.is_object() && !a.is_array() && scalar_text(a) == expected),
                Some(Value::Object(_)) => false,
                Some(act) => scalar_text(act) == expected,
                None => expected.is_empty(),
            }
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn lookup<'a>(obj: &'a Map<String, Value>, key: &str, case_sensitive: bool) -> Option<&'a Value> {
    obj.get(key).or_else(|| {
        if case_sensitive {
            None
        } else {
            obj.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v)
        }
    })
}

fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Object(obj)) => !obj.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(_) => true,
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
