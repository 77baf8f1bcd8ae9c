//! Proxying to origin servers.
//!
//! [`ProxyClient`] performs the origin round trip for `proxy` responses;
//! recording the result into the stub list is the imposter's job.

mod client;
mod headers;

pub use client::{validate_target, ProxyClient, ProxyError};
pub use headers::{end_to_end, is_hop_by_hop, HOP_BY_HOP};
