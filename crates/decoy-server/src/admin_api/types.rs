//! Response types and HATEOAS structures for the Admin API.

use crate::error::{ErrorCode, StructuredError};
use crate::imposter::{Imposter, RecordedRequest, Stub};
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;

/// HATEOAS link structure for Mountebank compatibility
#[derive(Debug, Serialize, Clone)]
pub struct Link {
    pub href: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct ImposterLinks {
    #[serde(rename = "self")]
    pub self_link: Link,
    pub stubs: Link,
}

#[derive(Debug, Serialize, Clone)]
pub struct StubLinks {
    #[serde(rename = "self")]
    pub self_link: Link,
}

/// Imposter summary for list responses
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImposterSummary {
    pub protocol: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub number_of_requests: u64,
    #[serde(rename = "_links")]
    pub links: ImposterLinks,
}

#[derive(Debug, Serialize)]
pub struct ListImpostersResponse {
    pub imposters: Vec<ImposterSummary>,
}

/// A stub with its _links for the response
#[derive(Debug, Serialize)]
pub struct StubWithLinks {
    #[serde(flatten)]
    pub stub: Stub,
    #[serde(rename = "_links")]
    pub links: StubLinks,
}

/// Detailed imposter response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImposterDetail {
    pub protocol: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub number_of_requests: u64,
    pub record_requests: bool,
    pub requests: Vec<RecordedRequest>,
    pub stubs: Vec<StubWithLinks>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_response: Option<crate::imposter::IsResponse>,
    #[serde(rename = "_links")]
    pub links: ImposterLinks,
}

impl ImposterDetail {
    /// Snapshot of an imposter with its current stubs.
    pub fn from_imposter(imposter: &Imposter, base_url: &str) -> Self {
        let port = imposter.port;
        let stubs = imposter
            .stubs
            .stubs()
            .into_iter()
            .enumerate()
            .map(|(index, stub)| StubWithLinks {
                stub,
                links: make_stub_links(base_url, port, index),
            })
            .collect();

        Self {
            protocol: imposter.protocol().to_string(),
            port,
            name: imposter.config.name.clone(),
            number_of_requests: imposter.request_count.load(Ordering::Relaxed),
            record_requests: imposter.config.record_requests,
            requests: imposter.get_recorded_requests(),
            stubs,
            default_response: imposter.config.default_response.clone(),
            links: make_imposter_links(base_url, port),
        }
    }
}

/// Error response structure
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub errors: Vec<StructuredError>,
}

/// Request to add a stub
#[derive(Debug, Deserialize)]
pub struct AddStubRequest {
    #[serde(default)]
    pub index: Option<usize>,
    pub stub: Stub,
}

/// Request to replace all stubs
#[derive(Debug, Deserialize)]
pub struct ReplaceStubsRequest {
    pub stubs: Vec<Stub>,
}

// =============================================================================
// Helper functions for generating HATEOAS links
// =============================================================================

/// Extract base URL from request headers for HATEOAS links
pub fn get_base_url(req: &Request<Incoming>) -> String {
    if let Some(host) = req.headers().get("host") {
        if let Ok(host_str) = host.to_str() {
            return format!("http://{}", host_str);
        }
    }
    "http://localhost:2525".to_string()
}

pub fn make_imposter_links(base_url: &str, port: u16) -> ImposterLinks {
    ImposterLinks {
        self_link: Link {
            href: format!("{}/imposters/{}", base_url, port),
        },
        stubs: Link {
            href: format!("{}/imposters/{}/stubs", base_url, port),
        },
    }
}

pub fn make_stub_links(base_url: &str, port: u16, index: usize) -> StubLinks {
    StubLinks {
        self_link: Link {
            href: format!("{}/imposters/{}/stubs/{}", base_url, port, index),
        },
    }
}

// =============================================================================
// Response helper functions
// =============================================================================

/// Create a JSON response
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string_pretty(body).unwrap_or_else(|_| "{}".to_string());
    build_response_with_headers(status, [("Content-Type", "application/json")], json)
}

/// Build an HTTP response with headers.
///
/// Falls back to a bare 500 response if the builder rejects the input.
pub fn build_response_with_headers(
    status: StatusCode,
    headers: impl IntoIterator<Item = (impl AsRef<str>, impl AsRef<str>)>,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut builder = Response::builder().status(status);
    for (key, value) in headers {
        builder = builder.header(key.as_ref(), value.as_ref());
    }
    builder.body(Full::new(body.into())).unwrap_or_else(|_| {
        let mut response = Response::new(Full::new(Bytes::from("Internal Server Error")));
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        response
    })
}

/// HTTP status for a structured error.
pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::NoSuchResource => StatusCode::NOT_FOUND,
        ErrorCode::InvalidPredicateInjection
        | ErrorCode::InvalidResponseInjection
        | ErrorCode::InvalidInjection
        | ErrorCode::InvalidProxy
        | ErrorCode::BadData
        | ErrorCode::InvalidProtocol
        | ErrorCode::ResourceConflict => StatusCode::BAD_REQUEST,
        ErrorCode::InjectionTimeout | ErrorCode::ProxyTimeout | ErrorCode::ProxyError => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// `{"errors": [error]}` with the status matching its code.
pub fn structured_error_response(error: impl Into<StructuredError>) -> Response<Full<Bytes>> {
    let error = error.into();
    let status = status_for(error.code);
    json_response(status, &ErrorResponse { errors: vec![error] })
}

/// `bad data` error for malformed request bodies.
pub fn bad_data(message: impl Into<String>) -> Response<Full<Bytes>> {
    structured_error_response(StructuredError::new(ErrorCode::BadData, message))
}

pub fn not_found() -> Response<Full<Bytes>> {
    structured_error_response(StructuredError::new(ErrorCode::NoSuchResource, "Not Found"))
}

/// Collect request body into bytes
pub async fn collect_body(req: Request<Incoming>) -> Result<Bytes, String> {
    use http_body_util::BodyExt;
    req.collect()
        .await
        .map(|c| c.to_bytes())
        .map_err(|e| format!("Failed to read request body: {e}"))
}
