//! Outbound HTTP client for `proxy` responses.

use super::headers::{end_to_end, is_hop_by_hop};
use crate::canonical::{CanonicalRequest, CanonicalResponse, Headers, ProxyResolution, ResponseBody};
use crate::error::{ErrorCode, StructuredError};
use reqwest::{Method, Url};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Classified failure of an origin round trip.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProxyError {
    /// DNS or connection failure.
    #[error("Cannot resolve \"{to}\"")]
    Unresolvable { to: String },
    #[error("Request to \"{to}\" timed out after {after_ms}ms")]
    Timeout { to: String, after_ms: u64 },
    #[error("Error proxying to \"{to}\": {message}")]
    Transport { to: String, message: String },
    #[error("Invalid proxy target \"{to}\": {reason}")]
    InvalidTarget { to: String, reason: String },
}

impl ProxyError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ProxyError::Unresolvable { .. } | ProxyError::InvalidTarget { .. } => {
                ErrorCode::InvalidProxy
            }
            ProxyError::Timeout { .. } => ErrorCode::ProxyTimeout,
            ProxyError::Transport { .. } => ErrorCode::ProxyError,
        }
    }

    pub fn target(&self) -> &str {
        match self {
            ProxyError::Unresolvable { to }
            | ProxyError::Timeout { to, .. }
            | ProxyError::Transport { to, .. }
            | ProxyError::InvalidTarget { to, .. } => to,
        }
    }
}

impl From<ProxyError> for StructuredError {
    fn from(err: ProxyError) -> Self {
        let source = serde_json::json!({ "to": err.target() });
        StructuredError::new(err.code(), err.to_string()).with_source(source)
    }
}

/// Check that `to` is an absolute http(s) URL with a host.
pub fn validate_target(to: &str) -> Result<Url, ProxyError> {
    let invalid = |reason: &str| ProxyError::InvalidTarget {
        to: to.to_string(),
        reason: reason.to_string(),
    };
    let url = Url::parse(to).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host"));
    }
    Ok(url)
}

/// Forwards canonical requests to an origin server.
#[derive(Debug, Clone)]
pub struct ProxyClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl ProxyClient {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(0) // origin connections are not reused across requests
            .build()?;
        Ok(Self { client, timeout })
    }

    /// Send `request` to `to` (keeping its path and query) and return the
    /// origin's response tagged with a [`ProxyResolution`].
    pub async fn forward(
        &self,
        request: &CanonicalRequest,
        to: &str,
        inject_headers: &Headers,
    ) -> Result<CanonicalResponse, ProxyError> {
        validate_target(to)?;
        let target_url = format!("{}{}", to.trim_end_matches('/'), request.path_and_query());
        let method =
            Method::from_bytes(request.method.as_bytes()).map_err(|e| ProxyError::Transport {
                to: to.to_string(),
                message: e.to_string(),
            })?;

        debug!("Proxy request to: {} {}", request.method, target_url);

        let mut outbound = self.client.request(method, &target_url);
        for (name, value) in end_to_end(&request.headers).iter() {
            if inject_headers.contains(name) {
                continue;
            }
            outbound = outbound.header(name, value);
        }
        for (name, value) in inject_headers.iter() {
            outbound = outbound.header(name, value);
        }
        let body = request.body_bytes();
        if !body.is_empty() {
            outbound = outbound.body(body);
        }

        let start = Instant::now();
        let response = outbound
            .send()
            .await
            .map_err(|e| self.classify(to, e))?;

        let status_code = response.status().as_u16();
        let headers: Headers = response
            .headers()
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.bytes().await.map_err(|e| self.classify(to, e))?;
        let latency_ms = start.elapsed().as_millis() as u64;

        debug!(
            "Proxy response from {}: {} ({} bytes, {}ms)",
            to,
            status_code,
            body.len(),
            latency_ms
        );

        Ok(CanonicalResponse {
            status_code,
            headers,
            body: ResponseBody::from_bytes(body),
            wait_ms: None,
            proxy_resolution: Some(ProxyResolution {
                to: to.to_string(),
                latency_ms,
            }),
        })
    }

    fn classify(&self, to: &str, err: reqwest::Error) -> ProxyError {
        warn!("Proxy request to {} failed: {}", to, err);
        if err.is_timeout() {
            ProxyError::Timeout {
                to: to.to_string(),
                after_ms: self.timeout.as_millis() as u64,
            }
        } else if err.is_connect() || err.is_builder() {
            ProxyError::Unresolvable { to: to.to_string() }
        } else {
            ProxyError::Transport {
                to: to.to_string(),
                message: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_target() {
        assert!(validate_target("http://localhost:8080").is_ok());
        assert!(validate_target("https://example.com/base").is_ok());
        assert!(matches!(
            validate_target("ftp://example.com"),
            Err(ProxyError::InvalidTarget { .. })
        ));
        assert!(matches!(
            validate_target("not a url"),
            Err(ProxyError::InvalidTarget { .. })
        ));
    }

    #[test]
    fn test_error_codes() {
        let unresolvable = ProxyError::Unresolvable {
            to: "http://invalid.domain".to_string(),
        };
        assert_eq!(unresolvable.code(), ErrorCode::InvalidProxy);
        assert_eq!(unresolvable.to_string(), "Cannot resolve \"http://invalid.domain\"");

        let structured = StructuredError::from(ProxyError::Timeout {
            to: "http://slow".to_string(),
            after_ms: 10,
        });
        assert_eq!(structured.code, ErrorCode::ProxyTimeout);
        assert_eq!(structured.origin, Some(serde_json::json!({"to": "http://slow"})));
    }

    #[tokio::test]
    async fn test_unresolvable_host() {
        let client = ProxyClient::new(Duration::from_secs(5)).unwrap();
        let request = CanonicalRequest::new("GET", "/");
        let result = client
            .forward(&request, "http://invalid.domain", &Headers::new())
            .await;
        assert_eq!(
            result,
            Err(ProxyError::Unresolvable {
                to: "http://invalid.domain".to_string()
            })
        );
    }
}
