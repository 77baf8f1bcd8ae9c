//! Imposter CRUD handlers.

use crate::admin_api::types::*;
use crate::imposter::{ImposterConfig, ImposterManager};
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

/// POST /imposters - Create a new imposter
pub async fn handle_create(
    req: Request<Incoming>,
    base_url: &str,
    manager: Arc<ImposterManager>,
) -> Response<Full<Bytes>> {
    let body = match collect_body(req).await {
        Ok(b) => b,
        Err(e) => return bad_data(e),
    };

    let config: ImposterConfig = match serde_json::from_slice(&body) {
        Ok(c) => c,
        Err(e) => return bad_data(format!("Invalid imposter JSON: {e}")),
    };

    match manager.create_imposter(config).await {
        Ok(port) => match manager.get_imposter(port) {
            Ok(imposter) => json_response(
                StatusCode::CREATED,
                &ImposterDetail::from_imposter(&imposter, base_url),
            ),
            Err(e) => structured_error_response(e),
        },
        Err(e) => {
            warn!("Rejected imposter: {}", e);
            structured_error_response(e)
        }
    }
}

/// GET /imposters - List all imposters
pub async fn handle_list(manager: Arc<ImposterManager>, base_url: &str) -> Response<Full<Bytes>> {
    let imposters = manager
        .list_imposters()
        .iter()
        .map(|i| ImposterSummary {
            protocol: i.protocol().to_string(),
            port: i.port,
            name: i.config.name.clone(),
            number_of_requests: i.request_count.load(Ordering::Relaxed),
            links: make_imposter_links(base_url, i.port),
        })
        .collect();

    json_response(StatusCode::OK, &ListImpostersResponse { imposters })
}

/// DELETE /imposters - Delete all imposters
pub async fn handle_delete_all(
    manager: Arc<ImposterManager>,
    base_url: &str,
) -> Response<Full<Bytes>> {
    let deleted: Vec<ImposterDetail> = manager
        .delete_all()
        .await
        .iter()
        .map(|imposter| ImposterDetail::from_imposter(imposter, base_url))
        .collect();
    info!("Deleted {} imposters", deleted.len());
    json_response(StatusCode::OK, &serde_json::json!({ "imposters": deleted }))
}

/// GET /imposters/:port - Get a specific imposter
pub async fn handle_get(
    port: u16,
    base_url: &str,
    manager: Arc<ImposterManager>,
) -> Response<Full<Bytes>> {
    match manager.get_imposter(port) {
        Ok(imposter) => json_response(
            StatusCode::OK,
            &ImposterDetail::from_imposter(&imposter, base_url),
        ),
        Err(e) => structured_error_response(e),
    }
}

/// DELETE /imposters/:port - Delete a specific imposter
///
/// Deleting an unknown port is not an error; the body is then `{}`.
pub async fn handle_delete(
    port: u16,
    base_url: &str,
    manager: Arc<ImposterManager>,
) -> Response<Full<Bytes>> {
    match manager.delete_imposter(port).await {
        Ok(imposter) => json_response(
            StatusCode::OK,
            &ImposterDetail::from_imposter(&imposter, base_url),
        ),
        Err(_) => json_response(StatusCode::OK, &serde_json::json!({})),
    }
}
