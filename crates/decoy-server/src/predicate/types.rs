//! Predicate model.
//!
//! Predicates keep the Mountebank JSON shape on the wire. Parsing happens once
//! when a stub is created, so malformed predicates are rejected up front.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equals,
    DeepEquals,
    Contains,
    StartsWith,
    EndsWith,
    Matches,
    Exists,
}

impl Operator {
    pub fn name(&self) -> &'static str {
        match self {
            Operator::Equals => "equals",
            Operator::DeepEquals => "deepEquals",
            Operator::Contains => "contains",
            Operator::StartsWith => "startsWith",
            Operator::EndsWith => "endsWith",
            Operator::Matches => "matches",
            Operator::Exists => "exists",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "equals" => Operator::Equals,
            "deepEquals" => Operator::DeepEquals,
            "contains" => Operator::Contains,
            "startsWith" => Operator::StartsWith,
            "endsWith" => Operator::EndsWith,
            "matches" => Operator::Matches,
            "exists" => Operator::Exists,
            _ => return None,
        })
    }
}

/// Parameters that modify how a predicate compares values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredicateOptions {
    /// Compare strings (and object keys) case-sensitively. Off by default.
    #[serde(default)]
    pub case_sensitive: bool,
    /// Regex stripped from the actual value before comparison.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub except: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PredicateKind {
    /// `{ "<operator>": { field: expected, ... } }`
    Operator { op: Operator, fields: Map<String, Value> },
    Not(Box<Predicate>),
    Or(Vec<Predicate>),
    And(Vec<Predicate>),
    /// JavaScript function source `(request) -> boolean`.
    Inject(String),
    /// Bare clause `{ field: true | "value" | { subKey: ... } }`.
    Fields(Map<String, Value>),
}

/// A single stub condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Predicate {
    pub kind: PredicateKind,
    pub options: PredicateOptions,
}

impl Predicate {
    pub fn new(kind: PredicateKind) -> Self {
        Self {
            kind,
            options: PredicateOptions::default(),
        }
    }

    pub fn operator(op: Operator, fields: Map<String, Value>) -> Self {
        Self::new(PredicateKind::Operator { op, fields })
    }

    pub fn with_options(mut self, options: PredicateOptions) -> Self {
        self.options = options;
        self
    }

    /// Whether evaluating this predicate requires the injection sandbox.
    pub fn requires_injection(&self) -> bool {
        match &self.kind {
            PredicateKind::Inject(_) => true,
            PredicateKind::Not(inner) => inner.requires_injection(),
            PredicateKind::Or(items) | PredicateKind::And(items) => {
                items.iter().any(Predicate::requires_injection)
            }
            PredicateKind::Operator { .. } | PredicateKind::Fields(_) => false,
        }
    }

    /// Every injected function source in this predicate tree.
    pub fn inject_sources(&self) -> Vec<&str> {
        let mut sources = Vec::new();
        self.collect_inject_sources(&mut sources);
        sources
    }

    fn collect_inject_sources<'a>(&'a self, out: &mut Vec<&'a str>) {
        match &self.kind {
            PredicateKind::Inject(source) => out.push(source),
            PredicateKind::Not(inner) => inner.collect_inject_sources(out),
            PredicateKind::Or(items) | PredicateKind::And(items) => {
                for item in items {
                    item.collect_inject_sources(out);
                }
            }
            PredicateKind::Operator { .. } | PredicateKind::Fields(_) => {}
        }
    }
}

/// Error for predicates that do not have a recognizable shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid predicate: {0}")]
pub struct PredicateParseError(pub String);

impl TryFrom<Value> for Predicate {
    type Error = PredicateParseError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let Value::Object(mut obj) = value else {
            return Err(PredicateParseError(format!(
                "expected an object, got {value}"
            )));
        };

        let case_sensitive = match obj.remove("caseSensitive") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => b,
            Some(other) => {
                return Err(PredicateParseError(format!(
                    "caseSensitive must be a boolean, got {other}"
                )))
            }
        };
        let except = match obj.remove("except") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => {
                regex::Regex::new(&s)
                    .map_err(|e| PredicateParseError(format!("invalid except pattern: {e}")))?;
                Some(s)
            }
            Some(other) => {
                return Err(PredicateParseError(format!(
                    "except must be a string, got {other}"
                )))
            }
        };
        let options = PredicateOptions {
            case_sensitive,
            except,
        };

        let named = obj
            .keys()
            .filter(|k| is_operator_key(k))
            .cloned()
            .collect::<Vec<_>>();

        let kind = match named.as_slice() {
            [] => {
                if obj.is_empty() {
                    return Err(PredicateParseError("empty predicate".to_string()));
                }
                PredicateKind::Fields(obj)
            }
            [_] if obj.len() == 1 => {
                let (key, inner) = obj
                    .into_iter()
                    .next()
                    .ok_or_else(|| PredicateParseError("empty predicate".to_string()))?;
                parse_named(key.as_str(), inner)?
            }
            [_] => {
                return Err(PredicateParseError(format!(
                    "operator '{}' cannot be combined with other fields",
                    named[0]
                )))
            }
            _ => {
                return Err(PredicateParseError(format!(
                    "a predicate takes exactly one operator, found {}",
                    named.join(", ")
                )))
            }
        };

        Ok(Predicate { kind, options })
    }
}

fn is_operator_key(key: &str) -> bool {
    Operator::from_name(key).is_some() || matches!(key, "not" | "or" | "and" | "inject")
}

fn parse_named(key: &str, inner: Value) -> Result<PredicateKind, PredicateParseError> {
    if let Some(op) = Operator::from_name(key) {
        let Value::Object(fields) = inner else {
            return Err(PredicateParseError(format!("{key} expects an object")));
        };
        if op == Operator::Matches {
            validate_patterns(&fields)?;
        }
        return Ok(PredicateKind::Operator { op, fields });
    }

    match key {
        "not" => Ok(PredicateKind::Not(Box::new(Predicate::try_from(inner)?))),
        "or" | "and" => {
            let Value::Array(items) = inner else {
                return Err(PredicateParseError(format!("{key} expects an array")));
            };
            let parsed = items
                .into_iter()
                .map(Predicate::try_from)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(if key == "or" {
                PredicateKind::Or(parsed)
            } else {
                PredicateKind::And(parsed)
            })
        }
        "inject" => match inner {
            Value::String(source) => Ok(PredicateKind::Inject(source)),
            other => Err(PredicateParseError(format!(
                "inject expects a function source string, got {other}"
            ))),
        },
        other => Err(PredicateParseError(format!("unknown operator {other}"))),
    }
}

fn validate_patterns(fields: &Map<String, Value>) -> Result<(), PredicateParseError> {
    for value in fields.values() {
        match value {
            Value::String(pattern) => {
                regex::Regex::new(pattern)
                    .map_err(|e| PredicateParseError(format!("invalid regex '{pattern}': {e}")))?;
            }
            Value::Object(nested) => validate_patterns(nested)?,
            _ => {}
        }
    }
    Ok(())
}

impl From<Predicate> for Value {
    fn from(predicate: Predicate) -> Self {
        let mut obj = match predicate.kind {
            PredicateKind::Operator { op, fields } => {
                let mut obj = Map::new();
                obj.insert(op.name().to_string(), Value::Object(fields));
                obj
            }
            PredicateKind::Not(inner) => {
                let mut obj = Map::new();
                obj.insert("not".to_string(), Value::from(*inner));
                obj
            }
            PredicateKind::Or(items) => {
                let mut obj = Map::new();
                obj.insert(
                    "or".to_string(),
                    Value::Array(items.into_iter().map(Value::from).collect()),
                );
                obj
            }
            PredicateKind::And(items) => {
                let mut obj = Map::new();
                obj.insert(
                    "and".to_string(),
                    Value::Array(items.into_iter().map(Value::from).collect()),
                );
                obj
            }
            PredicateKind::Inject(source) => {
                let mut obj = Map::new();
                obj.insert("inject".to_string(), Value::String(source));
                obj
            }
            PredicateKind::Fields(fields) => fields,
        };

        if predicate.options.case_sensitive {
            obj.insert("caseSensitive".to_string(), Value::Bool(true));
        }
        if let Some(except) = predicate.options.except {
            obj.insert("except".to_string(), Value::String(except));
        }
        Value::Object(obj)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::from(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> Result<Predicate, PredicateParseError> {
        Predicate::try_from(value)
    }

    #[test]
    fn test_parse_operator() {
        let predicate = parse(json!({"equals": {"path": "/test"}, "caseSensitive": true})).unwrap();
        assert!(matches!(
            predicate.kind,
            PredicateKind::Operator {
                op: Operator::Equals,
                ..
            }
        ));
        assert!(predicate.options.case_sensitive);
    }

    #[test]
    fn test_parse_bare_clause() {
        let predicate = parse(json!({"method": "GET", "query": {"first": true}})).unwrap();
        match predicate.kind {
            PredicateKind::Fields(fields) => assert_eq!(fields.len(), 2),
            other => panic!("expected bare clause, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_logical_and_inject() {
        let predicate = parse(json!({
            "or": [
                {"inject": "function (request) { return true; }"},
                {"not": {"exists": {"body": true}}}
            ]
        }))
        .unwrap();
        assert!(predicate.requires_injection());
        assert_eq!(predicate.inject_sources().len(), 1);
    }

    #[test]
    fn test_rejects_malformed_predicates() {
        assert!(parse(json!("equals")).is_err());
        assert!(parse(json!({})).is_err());
        assert!(parse(json!({"equals": {"path": "/"}, "contains": {"path": "/"}})).is_err());
        assert!(parse(json!({"equals": {"path": "/"}, "path": "/"})).is_err());
        assert!(parse(json!({"matches": {"path": "("}})).is_err());
        assert!(parse(json!({"inject": 42})).is_err());
    }

    #[test]
    fn test_json_form_is_preserved() {
        let original = json!({"deepEquals": {"query": {"a": "1"}}, "except": "\\d+"});
        let predicate = parse(original.clone()).unwrap();
        assert_eq!(Value::from(predicate), original);
    }
}
