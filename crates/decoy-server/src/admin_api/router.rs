//! Route dispatch logic for the Admin API.

use crate::admin_api::handlers::{imposters, stubs, system};
use crate::admin_api::types::{bad_data, get_base_url, not_found};
use crate::imposter::ImposterManager;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Method, Request, Response};
use std::sync::Arc;
use tracing::debug;

/// Parsed route for imposter-specific endpoints
#[derive(Debug, PartialEq)]
enum ImposterRoute {
    /// GET/DELETE /imposters/:port
    Root,
    /// POST/PUT/GET /imposters/:port/stubs
    Stubs,
    /// DELETE /imposters/:port/stubs/:index
    StubByIndex(usize),
}

impl ImposterRoute {
    /// Parse route from path segments after `/imposters/:port`
    fn parse(segments: &[&str]) -> Option<Self> {
        match segments {
            [] | [""] => Some(ImposterRoute::Root),
            ["stubs"] => Some(ImposterRoute::Stubs),
            ["stubs", index_str] => index_str.parse().ok().map(ImposterRoute::StubByIndex),
            _ => None,
        }
    }
}

/// Main request router
pub async fn route_request(
    req: Request<Incoming>,
    manager: Arc<ImposterManager>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let base_url = get_base_url(&req);

    debug!("Admin API: {} {}", method, path);

    Ok(route_by_path(&method, &path, req, &base_url, manager).await)
}

async fn route_by_path(
    method: &Method,
    path: &str,
    req: Request<Incoming>,
    base_url: &str,
    manager: Arc<ImposterManager>,
) -> Response<Full<Bytes>> {
    match (method, path) {
        (&Method::GET, "/") => return system::handle_root(base_url),
        (&Method::GET, "/config") => return system::handle_config(manager),
        _ => {}
    }

    if path == "/imposters" {
        return match *method {
            Method::GET => imposters::handle_list(manager, base_url).await,
            Method::POST => imposters::handle_create(req, base_url, manager).await,
            Method::DELETE => imposters::handle_delete_all(manager, base_url).await,
            _ => not_found(),
        };
    }

    if let Some(rest) = path.strip_prefix("/imposters/") {
        return route_imposter(method, rest, req, base_url, manager).await;
    }

    not_found()
}

async fn route_imposter(
    method: &Method,
    path: &str,
    req: Request<Incoming>,
    base_url: &str,
    manager: Arc<ImposterManager>,
) -> Response<Full<Bytes>> {
    let segments: Vec<&str> = path.split('/').collect();
    let Some((port_segment, rest)) = segments.split_first() else {
        return not_found();
    };

    let port: u16 = match port_segment.parse() {
        Ok(p) => p,
        Err(_) => return bad_data(format!("Invalid port number: {port_segment}")),
    };

    let Some(route) = ImposterRoute::parse(rest) else {
        return not_found();
    };

    match (method, route) {
        (&Method::GET, ImposterRoute::Root) => imposters::handle_get(port, base_url, manager).await,
        (&Method::DELETE, ImposterRoute::Root) => {
            imposters::handle_delete(port, base_url, manager).await
        }

        (&Method::GET, ImposterRoute::Stubs) => {
            stubs::handle_get_all(port, base_url, manager).await
        }
        (&Method::POST, ImposterRoute::Stubs) => {
            stubs::handle_add(port, req, base_url, manager).await
        }
        (&Method::PUT, ImposterRoute::Stubs) => {
            stubs::handle_replace_all(port, req, base_url, manager).await
        }

        (&Method::DELETE, ImposterRoute::StubByIndex(index)) => {
            stubs::handle_delete(port, index, base_url, manager).await
        }

        _ => not_found(),
    }
}
