//! HTTP transport for imposters: hyper request in, canonical request through
//! [`Imposter::resolve`], hyper response out.

use super::core::Imposter;
use crate::canonical::{CanonicalRequest, CanonicalResponse, Headers};
use crate::error::StructuredError;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderName, HeaderValue, CONNECTION, CONTENT_TYPE};
use hyper::{Request, Response, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Handle a request to an imposter
pub async fn handle_imposter_request(
    req: Request<Incoming>,
    imposter: Arc<Imposter>,
    client_addr: SocketAddr,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let request = match canonical_request(req, client_addr).await {
        Ok(request) => request,
        Err(e) => {
            warn!("Imposter {}: failed to read request body: {}", imposter.port, e);
            return Ok(plain_response(StatusCode::BAD_REQUEST, "failed to read request body"));
        }
    };

    debug!(
        "Imposter {}: {} {} from {}",
        imposter.port, request.method, request.path, request.request_from
    );

    match imposter.resolve(request).await {
        Ok(response) => Ok(write_response(response)),
        Err(e) => {
            warn!("Imposter {}: {}", imposter.port, e);
            Ok(error_response(e.into()))
        }
    }
}

async fn canonical_request(
    req: Request<Incoming>,
    client_addr: SocketAddr,
) -> Result<CanonicalRequest, hyper::Error> {
    let (parts, body) = req.into_parts();
    let headers: Headers = parts
        .headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    let bytes = body.collect().await?.to_bytes();

    let mut request = CanonicalRequest::new(parts.method.as_str(), parts.uri.path())
        .with_request_from(client_addr.to_string())
        .with_query_string(parts.uri.query().unwrap_or(""))
        .with_raw_body(bytes);
    request.headers = headers;
    Ok(request)
}

/// Convert a canonical response to hyper, adding `Connection: close` unless
/// the response sets its own connection header.
pub fn write_response(response: CanonicalResponse) -> Response<Full<Bytes>> {
    let Ok(status) = StatusCode::from_u16(response.status_code) else {
        return plain_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("invalid status code {}", response.status_code),
        );
    };

    let mut builder = Response::builder().status(status);
    if let Some(headers) = builder.headers_mut() {
        for (name, value) in response.headers.iter() {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => warn!("Dropping invalid response header {}: {}", name, value),
            }
        }
        if !headers.contains_key(CONNECTION) {
            headers.insert(CONNECTION, HeaderValue::from_static("close"));
        }
    }

    builder
        .body(Full::new(response.body.to_bytes()))
        .unwrap_or_else(|_| {
            plain_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to build response")
        })
}

fn error_response(error: StructuredError) -> Response<Full<Bytes>> {
    let body = serde_json::json!({ "errors": [error] });
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
        .headers_mut()
        .insert(CONNECTION, HeaderValue::from_static("close"));
    response
}

fn plain_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(message.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONNECTION, HeaderValue::from_static("close"));
    response
}
