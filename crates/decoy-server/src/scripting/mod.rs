//! Injection sandbox for user-supplied JavaScript.
//!
//! Injected predicates and responses run behind the [`InjectionHost`] trait so
//! the resolver never depends on a particular engine. [`JsSandbox`] is the
//! shipped host: an in-process Boa VM executed on tokio's blocking pool with a
//! bounded timeout.

use crate::canonical::CanonicalRequest;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

mod js_engine;
mod stub_validator;

pub use js_engine::JsSandbox;
pub use stub_validator::{
    validate_imposter_stubs, validate_is_response, validate_stub, ValidationError,
};

/// Per-imposter state shared by every injected response function of that
/// imposter. The lock is held for the whole of a stateful injection.
pub type InjectionState = Arc<tokio::sync::Mutex<Map<String, Value>>>;

pub fn new_injection_state() -> InjectionState {
    Arc::new(tokio::sync::Mutex::new(Map::new()))
}

/// Failure of an injected function.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InjectionError {
    /// Syntax error or an exception thrown by the function.
    #[error("{0}")]
    Script(String),
    #[error("predicate returned {0} instead of a boolean")]
    NotBoolean(String),
    #[error("injected response must be an object, got {0}")]
    InvalidResponse(String),
    #[error("function declares a callback parameter but also returned a value")]
    AmbiguousCompletion,
    #[error("injection did not complete within {0}ms")]
    Timeout(u64),
    #[error("injection aborted: {0}")]
    Aborted(String),
}

/// Executes injected code on behalf of the resolver and the validator.
#[async_trait]
pub trait InjectionHost: Send + Sync {
    /// Run an injected predicate `(request) -> boolean`.
    async fn evaluate_predicate(
        &self,
        source: &str,
        request: &CanonicalRequest,
    ) -> Result<bool, InjectionError>;

    /// Run an injected response function and return the partial response
    /// mapping it produced (`statusCode`, `headers`, `body`, `_mode`).
    async fn compute_response(
        &self,
        source: &str,
        request: &CanonicalRequest,
        state: &InjectionState,
    ) -> Result<Value, InjectionError>;

    /// Dry-run a predicate against `sample`.
    async fn validate_predicate(
        &self,
        source: &str,
        sample: &CanonicalRequest,
    ) -> Result<(), InjectionError>;

    /// Dry-run a response function against `sample` with throwaway state.
    /// Callback-style functions are not waited on.
    async fn validate_response(
        &self,
        source: &str,
        sample: &CanonicalRequest,
    ) -> Result<(), InjectionError>;
}
