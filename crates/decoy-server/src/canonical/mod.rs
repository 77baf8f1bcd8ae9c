//! Protocol-neutral request and response representations.
//!
//! Transports convert wire traffic into a [`CanonicalRequest`] before stub
//! resolution and write the resulting [`CanonicalResponse`] back out. These are
//! also the shapes injected JavaScript functions observe.

mod headers;
mod query;
mod request;
mod response;

pub use headers::Headers;
pub use query::{parse_query_string, QueryParams, QueryValue};
pub use request::CanonicalRequest;
pub use response::{CanonicalResponse, ProxyResolution, ResponseBody};
