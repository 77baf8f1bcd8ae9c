use super::headers::Headers;
use bytes::Bytes;

/// Response payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    Text(String),
    Binary(Bytes),
}

impl ResponseBody {
    pub fn empty() -> Self {
        ResponseBody::Text(String::new())
    }

    pub fn to_bytes(&self) -> Bytes {
        match self {
            ResponseBody::Text(text) => Bytes::from(text.clone()),
            ResponseBody::Binary(bytes) => bytes.clone(),
        }
    }

    /// Text form; binary bodies are decoded lossily.
    pub fn as_text(&self) -> String {
        match self {
            ResponseBody::Text(text) => text.clone(),
            ResponseBody::Binary(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    /// Text bodies stay text; anything that is not valid UTF-8 is binary.
    pub fn from_bytes(bytes: Bytes) -> Self {
        match std::str::from_utf8(&bytes) {
            Ok(text) => ResponseBody::Text(text.to_string()),
            Err(_) => ResponseBody::Binary(bytes),
        }
    }
}

impl Default for ResponseBody {
    fn default() -> Self {
        ResponseBody::empty()
    }
}

/// Marks a response as produced by a live origin round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyResolution {
    pub to: String,
    pub latency_ms: u64,
}

/// A response in protocol-neutral form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalResponse {
    pub status_code: u16,
    pub headers: Headers,
    pub body: ResponseBody,
    /// Delay applied before the response is returned.
    pub wait_ms: Option<u64>,
    /// Set only while a proxied response is being recorded.
    pub proxy_resolution: Option<ProxyResolution>,
}

impl CanonicalResponse {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            headers: Headers::new(),
            body: ResponseBody::empty(),
            wait_ms: None,
            proxy_resolution: None,
        }
    }

    pub fn text(status_code: u16, body: impl Into<String>) -> Self {
        Self {
            body: ResponseBody::Text(body.into()),
            ..Self::new(status_code)
        }
    }

    pub fn body_text(&self) -> String {
        self.body.as_text()
    }
}

impl Default for CanonicalResponse {
    fn default() -> Self {
        Self::new(200)
    }
}
