//! Header filtering for proxied traffic.

use crate::canonical::Headers;

/// Headers that describe a single connection and must not cross a proxy hop
/// or be replayed from a recording.
pub const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
    "host",
    "content-length",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Copy of `headers` with every hop-by-hop header removed.
pub fn end_to_end(headers: &Headers) -> Headers {
    headers.without(HOP_BY_HOP)
}
