//! Type definitions for imposters and their stubs.
//!
//! The wire shapes follow Mountebank: responses are `{is}`, `{proxy}` or
//! `{inject}` objects, `statusCode` may be a number or a numeric string, and
//! behaviors are accepted both as `_behaviors: {...}` and `behaviors: [...]`.

use crate::canonical::{CanonicalRequest, Headers};
use crate::error::{ErrorCode, StructuredError};
use crate::predicate::{Predicate, PredicateGenerator};
use crate::proxy::ProxyError;
use crate::scripting::{InjectionError, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Recorded Request Types
// ============================================================================

/// Request recorded by an imposter created with `recordRequests`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedRequest {
    #[serde(flatten)]
    pub request: CanonicalRequest,
    pub timestamp: String,
}

impl RecordedRequest {
    pub fn now(request: CanonicalRequest) -> Self {
        Self {
            request,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

// ============================================================================
// Stub Types
// ============================================================================

/// Stub definition: predicates (ANDed) and the responses cycled through when
/// they all match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stub {
    #[serde(default)]
    pub predicates: Vec<Predicate>,
    #[serde(default)]
    pub responses: Vec<StubResponse>,
}

impl Stub {
    pub fn new(predicates: Vec<Predicate>, responses: Vec<StubResponse>) -> Self {
        Self {
            predicates,
            responses,
        }
    }

    pub fn requires_injection(&self) -> bool {
        self.predicates.iter().any(Predicate::requires_injection)
            || self
                .responses
                .iter()
                .any(|r| matches!(r, StubResponse::Inject { .. }))
    }
}

/// Response within a stub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StubResponseRaw", into = "StubResponseOut")]
pub enum StubResponse {
    Is {
        is: IsResponse,
        behaviors: Option<Behaviors>,
    },
    Proxy {
        proxy: ProxyResponse,
    },
    Inject {
        inject: String,
    },
}

impl StubResponse {
    pub fn is(is: IsResponse) -> Self {
        StubResponse::Is {
            is,
            behaviors: None,
        }
    }
}

impl Default for StubResponse {
    fn default() -> Self {
        StubResponse::is(IsResponse::default())
    }
}

/// Accepts every response shape seen in the wild:
/// - `is`, `proxy` or `inject` (in that priority)
/// - `_behaviors` as an object or `behaviors` as an array of single-key objects
/// - an empty object, meaning an empty `is`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StubResponseRaw {
    is: Option<IsResponse>,
    proxy: Option<ProxyResponse>,
    inject: Option<String>,
    #[serde(rename = "_behaviors")]
    underscore_behaviors: Option<Value>,
    behaviors: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct StubResponseOut {
    #[serde(skip_serializing_if = "Option::is_none")]
    is: Option<IsResponse>,
    #[serde(rename = "_behaviors", skip_serializing_if = "Option::is_none")]
    behaviors: Option<Behaviors>,
    #[serde(skip_serializing_if = "Option::is_none")]
    proxy: Option<ProxyResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inject: Option<String>,
}

impl TryFrom<StubResponseRaw> for StubResponse {
    type Error = String;

    fn try_from(raw: StubResponseRaw) -> Result<Self, Self::Error> {
        if let Some(proxy) = raw.proxy.filter(|_| raw.is.is_none()) {
            return Ok(StubResponse::Proxy { proxy });
        }
        if let Some(inject) = raw.inject.filter(|_| raw.is.is_none()) {
            return Ok(StubResponse::Inject { inject });
        }

        let behaviors = match raw
            .underscore_behaviors
            .or_else(|| raw.behaviors.and_then(normalize_behaviors))
        {
            Some(value) => Some(
                serde_json::from_value::<Behaviors>(value)
                    .map_err(|e| format!("invalid behaviors: {e}"))?,
            )
            .filter(|b| !b.is_empty()),
            None => None,
        };

        Ok(StubResponse::Is {
            is: raw.is.unwrap_or_default(),
            behaviors,
        })
    }
}

impl From<StubResponse> for StubResponseOut {
    fn from(response: StubResponse) -> Self {
        let empty = StubResponseOut {
            is: None,
            behaviors: None,
            proxy: None,
            inject: None,
        };
        match response {
            StubResponse::Is { is, behaviors } => StubResponseOut {
                is: Some(is),
                behaviors,
                ..empty
            },
            StubResponse::Proxy { proxy } => StubResponseOut {
                proxy: Some(proxy),
                ..empty
            },
            StubResponse::Inject { inject } => StubResponseOut {
                inject: Some(inject),
                ..empty
            },
        }
    }
}

/// Merge `[{"wait": 10}, {...}]` into a single behaviors object.
pub(crate) fn normalize_behaviors(value: Value) -> Option<Value> {
    match value {
        Value::Array(arr) => {
            let mut merged = serde_json::Map::new();
            for item in arr {
                if let Value::Object(obj) = item {
                    merged.extend(obj);
                }
            }
            if merged.is_empty() {
                None
            } else {
                Some(Value::Object(merged))
            }
        }
        Value::Object(_) => Some(value),
        _ => None,
    }
}

/// Behaviors applied to an `is` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Behaviors {
    /// Delay in milliseconds before the response is sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait: Option<u64>,
}

impl Behaviors {
    pub fn wait(ms: u64) -> Self {
        Self { wait: Some(ms) }
    }

    fn is_empty(&self) -> bool {
        self.wait.is_none()
    }
}

/// Response mode for body handling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// Body is UTF-8 text
    #[default]
    Text,
    /// Body is base64-encoded binary data
    Binary,
}

fn is_text_mode(mode: &ResponseMode) -> bool {
    *mode == ResponseMode::Text
}

/// Static response fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IsResponse {
    #[serde(
        default = "default_status_code",
        deserialize_with = "deserialize_status_code"
    )]
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Headers::is_empty")]
    pub headers: Headers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(rename = "_mode", default, skip_serializing_if = "is_text_mode")]
    pub mode: ResponseMode,
}

impl Default for IsResponse {
    fn default() -> Self {
        Self {
            status_code: default_status_code(),
            headers: Headers::new(),
            body: None,
            mode: ResponseMode::Text,
        }
    }
}

pub(crate) fn default_status_code() -> u16 {
    200
}

/// Deserialize statusCode from either a number or a string
pub(crate) fn deserialize_status_code<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u16::try_from(n).ok())
            .ok_or_else(|| D::Error::custom("invalid status code number")),
        Value::String(s) => s
            .parse::<u16>()
            .map_err(|_| D::Error::custom(format!("invalid status code string: {s}"))),
        _ => Err(D::Error::custom("statusCode must be a number or string")),
    }
}

/// When a proxy stub records origin responses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProxyMode {
    /// Record the first response per predicate set in front of the proxy;
    /// later matching requests are served from the recording.
    #[default]
    ProxyOnce,
    /// Always proxy, accumulating every response behind the proxy.
    ProxyAlways,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyResponse {
    pub to: String,
    #[serde(default)]
    pub mode: ProxyMode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub predicate_generators: Vec<PredicateGenerator>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub add_wait_behavior: bool,
    #[serde(default, skip_serializing_if = "Headers::is_empty")]
    pub inject_headers: Headers,
}

impl ProxyResponse {
    pub fn new(to: impl Into<String>, mode: ProxyMode) -> Self {
        Self {
            to: to.into(),
            mode,
            predicate_generators: Vec::new(),
            add_wait_behavior: false,
            inject_headers: Headers::new(),
        }
    }
}

// ============================================================================
// Imposter Config
// ============================================================================

fn default_protocol() -> String {
    "http".to_string()
}

/// Configuration for creating an imposter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImposterConfig {
    /// Port for the imposter. If not specified, an available port will be auto-assigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Host/IP address to bind to. Defaults to "0.0.0.0".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub record_requests: bool,
    #[serde(default)]
    pub stubs: Vec<Stub>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_response: Option<IsResponse>,
}

impl Default for ImposterConfig {
    fn default() -> Self {
        Self {
            port: None,
            host: None,
            protocol: default_protocol(),
            name: None,
            record_requests: false,
            stubs: Vec::new(),
            default_response: None,
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Error types for imposter management
#[derive(Debug, thiserror::Error)]
pub enum ImposterError {
    #[error("Port {0} is already in use")]
    PortInUse(u16),
    #[error("Imposter not found on port {0}")]
    NotFound(u16),
    #[error("Failed to bind port {0}: {1}")]
    BindError(u16, String),
    #[error("Invalid protocol: {0}")]
    InvalidProtocol(String),
    #[error("Stub index {0} out of bounds")]
    StubIndexOutOfBounds(usize),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl From<ImposterError> for StructuredError {
    fn from(err: ImposterError) -> Self {
        match err {
            ImposterError::Validation(inner) => inner.into(),
            ImposterError::PortInUse(_) | ImposterError::BindError(..) => {
                StructuredError::new(ErrorCode::ResourceConflict, err.to_string())
            }
            ImposterError::NotFound(_) => {
                StructuredError::new(ErrorCode::NoSuchResource, err.to_string())
            }
            ImposterError::InvalidProtocol(_) => {
                StructuredError::new(ErrorCode::InvalidProtocol, err.to_string())
            }
            ImposterError::StubIndexOutOfBounds(_) => {
                StructuredError::new(ErrorCode::BadData, err.to_string())
            }
        }
    }
}

/// Failure while producing the response for one request.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("{error}")]
    Injection { script: String, error: InjectionError },
    #[error(transparent)]
    Proxy(#[from] ProxyError),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<ResolveError> for StructuredError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Injection {
                error: InjectionError::Timeout(ms),
                script,
            } => StructuredError::new(
                ErrorCode::InjectionTimeout,
                InjectionError::Timeout(ms).to_string(),
            )
            .with_source(script),
            ResolveError::Injection { script, error } => StructuredError::new(
                ErrorCode::InvalidResponseInjection,
                ErrorCode::InvalidResponseInjection.as_str(),
            )
            .with_data(error.to_string())
            .with_source(script),
            ResolveError::Proxy(inner) => inner.into(),
            ResolveError::InvalidResponse(message) => {
                StructuredError::new(ErrorCode::BadData, message)
            }
        }
    }
}
