//! Stub validation for the Admin API.
//!
//! Runs before an imposter opens its port or a stub is added, so injection
//! mistakes and unusable proxy targets are caught at configuration time
//! rather than at request time. Injected functions are dry-run against a
//! synthetic sample request.

use super::{InjectionError, InjectionHost};
use crate::canonical::CanonicalRequest;
use crate::error::{ErrorCode, StructuredError};
use crate::imposter::{IsResponse, ResponseMode, Stub, StubResponse};
use crate::proxy::{validate_target, ProxyError};
use base64::Engine;
use tracing::debug;

const INJECTION_DISALLOWED: &str =
    "JavaScript injection is not allowed unless decoy is run with the --allow-injection flag";

/// Configuration error found while validating stubs.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("JavaScript injection is not allowed unless decoy is run with the --allow-injection flag")]
    InjectionDisallowed { script: String },
    #[error("invalid predicate injection: {detail}")]
    PredicateInjection { script: String, detail: String },
    #[error("invalid response injection: {detail}")]
    ResponseInjection { script: String, detail: String },
    #[error(transparent)]
    ProxyTarget(ProxyError),
    #[error("{0}")]
    BadData(String),
}

impl From<ValidationError> for StructuredError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::InjectionDisallowed { script } => {
                StructuredError::new(ErrorCode::InvalidInjection, INJECTION_DISALLOWED)
                    .with_source(script)
            }
            ValidationError::PredicateInjection { script, detail } => StructuredError::new(
                ErrorCode::InvalidPredicateInjection,
                ErrorCode::InvalidPredicateInjection.as_str(),
            )
            .with_data(detail)
            .with_source(script),
            ValidationError::ResponseInjection { script, detail } => StructuredError::new(
                ErrorCode::InvalidResponseInjection,
                ErrorCode::InvalidResponseInjection.as_str(),
            )
            .with_data(detail)
            .with_source(script),
            ValidationError::ProxyTarget(inner) => inner.into(),
            ValidationError::BadData(message) => StructuredError::new(ErrorCode::BadData, message),
        }
    }
}

/// Validate every stub of an imposter, stopping at the first error.
pub async fn validate_imposter_stubs(
    stubs: &[Stub],
    host: &dyn InjectionHost,
    allow_injection: bool,
) -> Result<(), ValidationError> {
    for (index, stub) in stubs.iter().enumerate() {
        validate_stub(stub, index, host, allow_injection).await?;
    }
    Ok(())
}

/// Validate a single stub.
pub async fn validate_stub(
    stub: &Stub,
    index: usize,
    host: &dyn InjectionHost,
    allow_injection: bool,
) -> Result<(), ValidationError> {
    let sample = CanonicalRequest::sample();

    for predicate in &stub.predicates {
        for script in predicate.inject_sources() {
            ensure_injection_allowed(script, allow_injection)?;
            host.validate_predicate(script, &sample)
                .await
                .map_err(|e| ValidationError::PredicateInjection {
                    script: script.to_string(),
                    detail: detail(e),
                })?;
        }
    }

    for (response_index, response) in stub.responses.iter().enumerate() {
        match response {
            StubResponse::Is { is, .. } => validate_is_response(is)?,
            StubResponse::Proxy { proxy } => {
                validate_target(&proxy.to).map_err(ValidationError::ProxyTarget)?;
                for generator in &proxy.predicate_generators {
                    if let Some(pattern) = &generator.except {
                        regex::Regex::new(pattern).map_err(|e| {
                            ValidationError::BadData(format!(
                                "invalid except pattern in predicateGenerators: {e}"
                            ))
                        })?;
                    }
                }
            }
            StubResponse::Inject { inject } => {
                ensure_injection_allowed(inject, allow_injection)?;
                host.validate_response(inject, &sample)
                    .await
                    .map_err(|e| ValidationError::ResponseInjection {
                        script: inject.clone(),
                        detail: detail(e),
                    })?;
            }
        }
        debug!("Validated stub {} response {}", index, response_index);
    }

    Ok(())
}

/// Check the fields of a static response that cannot be checked by serde.
pub fn validate_is_response(is: &IsResponse) -> Result<(), ValidationError> {
    if !(100..=999).contains(&is.status_code) {
        return Err(ValidationError::BadData(format!(
            "invalid status code {}",
            is.status_code
        )));
    }
    if is.mode == ResponseMode::Binary {
        match &is.body {
            None => {}
            Some(serde_json::Value::String(encoded)) => {
                base64::engine::general_purpose::STANDARD
                    .decode(encoded)
                    .map_err(|e| {
                        ValidationError::BadData(format!("binary body is not valid base64: {e}"))
                    })?;
            }
            Some(_) => {
                return Err(ValidationError::BadData(
                    "binary body must be a base64 string".to_string(),
                ))
            }
        }
    }
    Ok(())
}

fn ensure_injection_allowed(script: &str, allow_injection: bool) -> Result<(), ValidationError> {
    if allow_injection {
        Ok(())
    } else {
        Err(ValidationError::InjectionDisallowed {
            script: script.to_string(),
        })
    }
}

fn detail(err: InjectionError) -> String {
    err.to_string()
}
