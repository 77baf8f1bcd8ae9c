//! Turning stored response definitions into canonical responses, and origin
//! responses back into stored definitions.

use super::types::{Behaviors, IsResponse, ResolveError, ResponseMode, StubResponse};
use crate::canonical::{CanonicalResponse, ResponseBody};
use crate::proxy::end_to_end;
use base64::Engine;
use bytes::Bytes;
use serde_json::Value;

/// Render an `is` response. Object bodies become JSON text and binary bodies
/// are base64-decoded.
pub fn render_is(
    is: &IsResponse,
    behaviors: Option<&Behaviors>,
) -> Result<CanonicalResponse, ResolveError> {
    let body = match (is.mode, &is.body) {
        (_, None) | (_, Some(Value::Null)) => ResponseBody::empty(),
        (ResponseMode::Binary, Some(Value::String(encoded))) => {
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| {
                    ResolveError::InvalidResponse(format!("binary body is not valid base64: {e}"))
                })?;
            ResponseBody::Binary(Bytes::from(decoded))
        }
        (ResponseMode::Binary, Some(_)) => {
            return Err(ResolveError::InvalidResponse(
                "binary body must be a base64 string".to_string(),
            ))
        }
        (ResponseMode::Text, Some(Value::String(text))) => ResponseBody::Text(text.clone()),
        (ResponseMode::Text, Some(other)) => ResponseBody::Text(other.to_string()),
    };

    Ok(CanonicalResponse {
        status_code: is.status_code,
        headers: is.headers.clone(),
        body,
        wait_ms: behaviors.and_then(|b| b.wait),
        proxy_resolution: None,
    })
}

/// Render the partial response produced by an injected function. Missing
/// fields take the same defaults as an `is` response.
pub fn render_injected(value: Value) -> Result<CanonicalResponse, ResolveError> {
    let is: IsResponse = serde_json::from_value(value)
        .map_err(|e| ResolveError::InvalidResponse(format!("injected response: {e}")))?;
    render_is(&is, None)
}

/// Store an origin response as an `is` response. Connection-level headers are
/// dropped; `add_wait` keeps the measured origin latency as a wait behavior.
pub fn recorded_response(response: &CanonicalResponse, add_wait: bool) -> StubResponse {
    let (body, mode) = match &response.body {
        ResponseBody::Text(text) => (Value::String(text.clone()), ResponseMode::Text),
        ResponseBody::Binary(bytes) => (
            Value::String(base64::engine::general_purpose::STANDARD.encode(bytes)),
            ResponseMode::Binary,
        ),
    };
    let behaviors = response
        .proxy_resolution
        .as_ref()
        .filter(|_| add_wait)
        .map(|resolution| Behaviors::wait(resolution.latency_ms));

    StubResponse::Is {
        is: IsResponse {
            status_code: response.status_code,
            headers: end_to_end(&response.headers),
            body: Some(body),
            mode,
        },
        behaviors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::{Headers, ProxyResolution};
    use serde_json::json;

    #[test]
    fn test_object_body_is_serialized() {
        let is: IsResponse = serde_json::from_value(json!({
            "statusCode": 201,
            "headers": {"Content-Type": "application/json"},
            "body": {"id": 1, "name": "x"}
        }))
        .unwrap();
        let response = render_is(&is, Some(&Behaviors::wait(5))).unwrap();
        assert_eq!(response.status_code, 201);
        assert_eq!(response.body_text(), r#"{"id":1,"name":"x"}"#);
        assert_eq!(response.headers.get("content-type"), Some("application/json"));
        assert_eq!(response.wait_ms, Some(5));
    }

    #[test]
    fn test_binary_body_is_decoded() {
        let is: IsResponse =
            serde_json::from_value(json!({"body": "AAEC", "_mode": "binary"})).unwrap();
        let response = render_is(&is, None).unwrap();
        assert_eq!(response.body, ResponseBody::Binary(Bytes::from_static(&[0, 1, 2])));
    }

    #[test]
    fn test_injected_defaults() {
        let response = render_injected(json!({"body": "GET INJECTED"})).unwrap();
        assert_eq!(response.status_code, 200);
        assert!(response.headers.is_empty());
        assert_eq!(response.body_text(), "GET INJECTED");

        let redirect = render_injected(json!({
            "statusCode": "302",
            "headers": {"Location": "http://example.com"}
        }))
        .unwrap();
        assert_eq!(redirect.status_code, 302);
        assert_eq!(redirect.body_text(), "");
    }

    #[test]
    fn test_injected_bad_status_is_rejected() {
        assert!(matches!(
            render_injected(json!({"statusCode": "abc"})),
            Err(ResolveError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_recorded_response_drops_connection_headers() {
        let headers: Headers = vec![
            ("Content-Type", "text/plain"),
            ("Connection", "keep-alive"),
            ("Transfer-Encoding", "chunked"),
        ]
        .into_iter()
        .collect();
        let origin = CanonicalResponse {
            headers,
            proxy_resolution: Some(ProxyResolution {
                to: "http://origin".to_string(),
                latency_ms: 42,
            }),
            ..CanonicalResponse::text(200, "origin body")
        };

        match recorded_response(&origin, true) {
            StubResponse::Is { is, behaviors } => {
                assert_eq!(is.body, Some(json!("origin body")));
                assert_eq!(is.headers.len(), 1);
                assert_eq!(behaviors, Some(Behaviors::wait(42)));
            }
            other => panic!("expected is, got {other:?}"),
        }

        match recorded_response(&origin, false) {
            StubResponse::Is { behaviors, .. } => assert!(behaviors.is_none()),
            other => panic!("expected is, got {other:?}"),
        }
    }

    #[test]
    fn test_binary_origin_body_round_trips_through_base64() {
        let origin = CanonicalResponse {
            body: ResponseBody::Binary(Bytes::from_static(&[0xff, 0x00])),
            ..CanonicalResponse::new(200)
        };
        let StubResponse::Is { is, behaviors } = recorded_response(&origin, false) else {
            panic!("expected is");
        };
        assert_eq!(is.mode, ResponseMode::Binary);
        assert_eq!(
            render_is(&is, behaviors.as_ref()).unwrap().body,
            origin.body
        );
    }
}
