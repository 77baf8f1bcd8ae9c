//! Predicate synthesis from recorded requests.
//!
//! A generator such as `{"matches": {"method": true, "query": {"first": true}}}`
//! turns a live request into predicates that match "the same" request later:
//! top-level fields captured with `true` become a `deepEquals` clause over the
//! whole field value, and nested mappings capture only the listed sub-keys into
//! an `equals` clause.

use super::types::{Operator, Predicate, PredicateOptions};
use crate::canonical::CanonicalRequest;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One entry of a proxy's `predicateGenerators`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredicateGenerator {
    #[serde(default)]
    pub matches: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_sensitive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub except: Option<String>,
}

impl PredicateGenerator {
    fn options(&self) -> PredicateOptions {
        PredicateOptions {
            case_sensitive: self.case_sensitive.unwrap_or(false),
            except: self.except.clone(),
        }
    }
}

/// Build the predicates recorded alongside a proxied response. Generators that
/// capture nothing from the request produce no predicate.
pub fn synthesize(request: &CanonicalRequest, generators: &[PredicateGenerator]) -> Vec<Predicate> {
    let view = request.view();
    let mut predicates = Vec::new();

    for generator in generators {
        let except = generator.except.as_deref().and_then(|p| Regex::new(p).ok());
        let mut whole = Map::new();
        let mut partial = Map::new();

        for (field, selector) in &generator.matches {
            let Some(actual) = view.get(field) else {
                continue;
            };
            match selector {
                Value::Bool(true) => {
                    whole.insert(field.clone(), strip(actual, except.as_ref()));
                }
                Value::Object(sub_selectors) => {
                    if let Some(captured) = capture(actual, sub_selectors, field == "headers") {
                        partial.insert(field.clone(), strip(&captured, except.as_ref()));
                    }
                }
                _ => {}
            }
        }

        if !whole.is_empty() {
            predicates.push(
                Predicate::operator(Operator::DeepEquals, whole).with_options(generator.options()),
            );
        }
        if !partial.is_empty() {
            predicates.push(
                Predicate::operator(Operator::Equals, partial).with_options(generator.options()),
            );
        }
    }

    predicates
}

/// Capture the selected sub-keys of `actual`. Returns `None` when nothing was
/// captured.
fn capture(actual: &Value, selectors: &Map<String, Value>, ci_keys: bool) -> Option<Value> {
    let parsed;
    let source = match actual {
        Value::Object(obj) => obj,
        Value::String(text) => {
            parsed = serde_json::from_str::<Value>(text).ok()?;
            parsed.as_object()?
        }
        _ => return None,
    };

    let mut captured = Map::new();
    for (key, selector) in selectors {
        let found = source.get(key.as_str()).map(|v| (key, v)).or_else(|| {
            if ci_keys {
                source.iter().find(|(k, _)| k.eq_ignore_ascii_case(key))
            } else {
                None
            }
        });
        let Some((actual_key, value)) = found else {
            continue;
        };
        match selector {
            Value::Bool(true) => {
                captured.insert(actual_key.clone(), value.clone());
            }
            Value::Object(nested) => {
                if let Some(inner) = capture(value, nested, false) {
                    captured.insert(actual_key.clone(), inner);
                }
            }
            _ => {}
        }
    }

    if captured.is_empty() {
        None
    } else {
        Some(Value::Object(captured))
    }
}

fn strip(value: &Value, except: Option<&Regex>) -> Value {
    let Some(re) = except else {
        return value.clone();
    };
    match value {
        Value::String(s) => Value::String(re.replace_all(s, "").into_owned()),
        Value::Array(items) => Value::Array(items.iter().map(|v| strip(v, except)).collect()),
        Value::Object(obj) => Value::Object(
            obj.iter()
                .map(|(k, v)| (k.clone(), strip(v, except)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Order-independent equality of two predicate sets.
pub fn same_predicate_set(left: &[Predicate], right: &[Predicate]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    let mut unmatched: Vec<&Predicate> = right.iter().collect();
    for predicate in left {
        match unmatched.iter().position(|candidate| *candidate == predicate) {
            Some(idx) => {
                unmatched.swap_remove(idx);
            }
            None => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::matches;
    use serde_json::json;

    fn generators(value: Value) -> Vec<PredicateGenerator> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_true_leaf_becomes_deep_equals() {
        let request = CanonicalRequest::new("GET", "/first").with_query_string("a=1");
        let predicates = synthesize(
            &request,
            &generators(json!([{"matches": {"method": true, "path": true}}])),
        );
        assert_eq!(predicates.len(), 1);
        assert_eq!(
            Value::from(predicates[0].clone()),
            json!({"deepEquals": {"method": "GET", "path": "/first"}})
        );
    }

    #[test]
    fn test_whole_query_requires_exact_parameters() {
        let recorded = CanonicalRequest::new("GET", "/").with_query_string("first=1&second=2");
        let predicates = synthesize(&recorded, &generators(json!([{"matches": {"query": true}}])));
        let subset = CanonicalRequest::new("GET", "/").with_query_string("first=1");
        assert!(predicates.iter().all(|p| matches(p, &recorded)));
        assert!(!predicates.iter().all(|p| matches(p, &subset)));
    }

    #[test]
    fn test_sub_key_selection_is_containment() {
        let recorded = CanonicalRequest::new("GET", "/").with_query_string("first=1&second=2");
        let predicates = synthesize(
            &recorded,
            &generators(json!([{"matches": {"query": {"first": true}}}])),
        );
        assert_eq!(
            Value::from(predicates[0].clone()),
            json!({"equals": {"query": {"first": "1"}}})
        );
        let superset =
            CanonicalRequest::new("GET", "/").with_query_string("first=1&second=2&third=3");
        assert!(matches(&predicates[0], &superset));
    }

    #[test]
    fn test_header_selection_is_case_insensitive() {
        let recorded = CanonicalRequest::new("GET", "/").with_header("X-Tenant", "acme");
        let predicates = synthesize(
            &recorded,
            &generators(json!([{"matches": {"headers": {"x-tenant": true}}}])),
        );
        assert_eq!(
            Value::from(predicates[0].clone()),
            json!({"equals": {"headers": {"X-Tenant": "acme"}}})
        );
    }

    #[test]
    fn test_empty_capture_produces_nothing() {
        let request = CanonicalRequest::new("GET", "/");
        let predicates = synthesize(
            &request,
            &generators(json!([{"matches": {"query": {"missing": true}, "method": false}}])),
        );
        assert!(predicates.is_empty());
    }

    #[test]
    fn test_options_are_copied() {
        let request = CanonicalRequest::new("GET", "/users/123");
        let predicates = synthesize(
            &request,
            &generators(json!([{"matches": {"path": true}, "caseSensitive": true, "except": "\\d+"}])),
        );
        assert_eq!(
            Value::from(predicates[0].clone()),
            json!({"deepEquals": {"path": "/users/"}, "caseSensitive": true, "except": "\\d+"})
        );
        assert!(matches(&predicates[0], &CanonicalRequest::new("GET", "/users/456")));
    }

    #[test]
    fn test_same_predicate_set_ignores_order() {
        let a = Predicate::try_from(json!({"equals": {"path": "/a"}})).unwrap();
        let b = Predicate::try_from(json!({"deepEquals": {"method": "GET"}})).unwrap();
        assert!(same_predicate_set(&[a.clone(), b.clone()], &[b.clone(), a.clone()]));
        assert!(!same_predicate_set(&[a.clone()], &[b.clone()]));
        assert!(!same_predicate_set(&[a.clone(), a.clone()], &[a, b]));
        assert!(same_predicate_set(&[], &[]));
    }
}
