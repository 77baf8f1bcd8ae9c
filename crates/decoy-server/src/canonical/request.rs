use super::headers::Headers;
use super::query::{parse_query_string, QueryParams};
use bytes::Bytes;
use serde::Serialize;
use serde_json::{json, Value};

/// An incoming request in protocol-neutral form.
///
/// Built once by the transport and never mutated afterwards; predicates,
/// injected functions and the proxy client all read from the same instance.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalRequest {
    pub request_from: String,
    pub method: String,
    pub path: String,
    pub query: QueryParams,
    pub headers: Headers,
    /// Body as text, lossily decoded. This is what predicates and injected
    /// functions see.
    pub body: String,
    /// Body exactly as received, forwarded to proxied origins.
    #[serde(skip)]
    pub raw_body: Option<Bytes>,
}

impl CanonicalRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            request_from: String::new(),
            method: method.into(),
            path: path.into(),
            query: QueryParams::new(),
            headers: Headers::new(),
            body: String::new(),
            raw_body: None,
        }
    }

    /// Request used to dry-run injected functions when a stub is created.
    pub fn sample() -> Self {
        Self::new("GET", "/").with_request_from("127.0.0.1:0")
    }

    pub fn with_request_from(mut self, request_from: impl Into<String>) -> Self {
        self.request_from = request_from.into();
        self
    }

    pub fn with_query_string(mut self, query: &str) -> Self {
        self.query = parse_query_string(query);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self.raw_body = None;
        self
    }

    /// Keep the received bytes and expose their text form to matching.
    pub fn with_raw_body(mut self, bytes: Bytes) -> Self {
        self.body = String::from_utf8_lossy(&bytes).into_owned();
        self.raw_body = Some(bytes);
        self
    }

    /// Bytes to send upstream.
    pub fn body_bytes(&self) -> Bytes {
        match &self.raw_body {
            Some(bytes) => bytes.clone(),
            None => Bytes::from(self.body.clone()),
        }
    }

    /// Path plus query string, as sent to a proxied origin.
    pub fn path_and_query(&self) -> String {
        if self.query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.query.to_query_string())
        }
    }

    /// JSON view used by predicate matching and handed to injected functions.
    pub fn view(&self) -> Value {
        json!({
            "requestFrom": self.request_from,
            "method": self.method,
            "path": self.path,
            "query": self.query.to_json(),
            "headers": self.headers.to_json(),
            "body": self.body,
        })
    }
}
