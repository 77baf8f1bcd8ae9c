//! Stub management handlers.

use crate::admin_api::handlers::imposters::handle_get as handle_get_imposter;
use crate::admin_api::types::{
    bad_data, collect_body, json_response, make_stub_links, structured_error_response,
    AddStubRequest, ReplaceStubsRequest, StubWithLinks,
};
use crate::imposter::ImposterManager;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use std::sync::Arc;
use tracing::info;

/// POST /imposters/:port/stubs - Add a stub
pub async fn handle_add(
    port: u16,
    req: Request<Incoming>,
    base_url: &str,
    manager: Arc<ImposterManager>,
) -> Response<Full<Bytes>> {
    let body = match collect_body(req).await {
        Ok(b) => b,
        Err(e) => return bad_data(e),
    };

    let add_req: AddStubRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => return bad_data(format!("Invalid stub JSON: {e}")),
    };

    match manager.add_stub(port, add_req.stub, add_req.index).await {
        Ok(index) => {
            info!("Imposter {}: added stub at index {}", port, index);
            handle_get_imposter(port, base_url, manager).await
        }
        Err(e) => structured_error_response(e),
    }
}

/// PUT /imposters/:port/stubs - Replace all stubs
pub async fn handle_replace_all(
    port: u16,
    req: Request<Incoming>,
    base_url: &str,
    manager: Arc<ImposterManager>,
) -> Response<Full<Bytes>> {
    let body = match collect_body(req).await {
        Ok(b) => b,
        Err(e) => return bad_data(e),
    };

    let replace_req: ReplaceStubsRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => return bad_data(format!("Invalid stubs JSON: {e}")),
    };

    match manager.replace_stubs(port, replace_req.stubs).await {
        Ok(()) => handle_get_imposter(port, base_url, manager).await,
        Err(e) => structured_error_response(e),
    }
}

/// GET /imposters/:port/stubs - List the current stubs
pub async fn handle_get_all(
    port: u16,
    base_url: &str,
    manager: Arc<ImposterManager>,
) -> Response<Full<Bytes>> {
    match manager.get_imposter(port) {
        Ok(imposter) => {
            let stubs: Vec<StubWithLinks> = imposter
                .stubs
                .stubs()
                .into_iter()
                .enumerate()
                .map(|(index, stub)| StubWithLinks {
                    stub,
                    links: make_stub_links(base_url, port, index),
                })
                .collect();
            json_response(StatusCode::OK, &serde_json::json!({ "stubs": stubs }))
        }
        Err(e) => structured_error_response(e),
    }
}

/// DELETE /imposters/:port/stubs/:index - Delete a stub
pub async fn handle_delete(
    port: u16,
    index: usize,
    base_url: &str,
    manager: Arc<ImposterManager>,
) -> Response<Full<Bytes>> {
    match manager.delete_stub(port, index) {
        Ok(_) => {
            info!("Imposter {}: deleted stub {}", port, index);
            handle_get_imposter(port, base_url, manager).await
        }
        Err(e) => structured_error_response(e),
    }
}
