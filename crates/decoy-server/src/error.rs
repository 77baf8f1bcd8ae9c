//! Structured errors returned to API clients and requesters.
//!
//! Every layer has its own `thiserror` enum; all of them convert into
//! [`StructuredError`], the only error type that crosses the admin API and the
//! imposter transport.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "invalid predicate injection")]
    InvalidPredicateInjection,
    #[serde(rename = "invalid response injection")]
    InvalidResponseInjection,
    #[serde(rename = "invalid injection")]
    InvalidInjection,
    #[serde(rename = "injection timeout")]
    InjectionTimeout,
    #[serde(rename = "invalid proxy")]
    InvalidProxy,
    #[serde(rename = "proxy timeout")]
    ProxyTimeout,
    #[serde(rename = "proxy error")]
    ProxyError,
    #[serde(rename = "bad data")]
    BadData,
    #[serde(rename = "invalid protocol")]
    InvalidProtocol,
    #[serde(rename = "resource conflict")]
    ResourceConflict,
    #[serde(rename = "no such resource")]
    NoSuchResource,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidPredicateInjection => "invalid predicate injection",
            ErrorCode::InvalidResponseInjection => "invalid response injection",
            ErrorCode::InvalidInjection => "invalid injection",
            ErrorCode::InjectionTimeout => "injection timeout",
            ErrorCode::InvalidProxy => "invalid proxy",
            ErrorCode::ProxyTimeout => "proxy timeout",
            ErrorCode::ProxyError => "proxy error",
            ErrorCode::BadData => "bad data",
            ErrorCode::InvalidProtocol => "invalid protocol",
            ErrorCode::ResourceConflict => "resource conflict",
            ErrorCode::NoSuchResource => "no such resource",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{code, message, data?, source?}` error body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct StructuredError {
    pub code: ErrorCode,
    pub message: String,
    /// Underlying detail, e.g. the error thrown by injected code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// The configuration fragment that caused the error.
    #[serde(
        rename = "source",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub origin: Option<serde_json::Value>,
}

impl StructuredError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
            origin: None,
        }
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<serde_json::Value>) -> Self {
        self.origin = Some(source.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serialized_shape() {
        let err = StructuredError::new(ErrorCode::InvalidProxy, "Cannot resolve \"http://x\"")
            .with_data("dns error")
            .with_source(json!({"to": "http://x"}));
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(
            value,
            json!({
                "code": "invalid proxy",
                "message": "Cannot resolve \"http://x\"",
                "data": "dns error",
                "source": {"to": "http://x"}
            })
        );
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let err = StructuredError::new(ErrorCode::BadData, "nope");
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value, json!({"code": "bad data", "message": "nope"}));
        assert_eq!(err.to_string(), "bad data: nope");
    }
}
