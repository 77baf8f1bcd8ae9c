//! System handlers: root links and config.

use crate::admin_api::types::*;
use crate::imposter::ImposterManager;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use std::sync::Arc;

/// GET / - Root endpoint (Mountebank-compatible format)
pub fn handle_root(base_url: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "_links": {
            "imposters": {"href": format!("{}/imposters", base_url)},
            "config": {"href": format!("{}/config", base_url)}
        }
    });
    json_response(StatusCode::OK, &body)
}

/// GET /config - Engine settings this process runs with
pub fn handle_config(manager: Arc<ImposterManager>) -> Response<Full<Bytes>> {
    let settings = manager.settings();
    let config = serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "options": {
            "allowInjection": settings.allow_injection,
            "injectionTimeoutMs": settings.injection_timeout.as_millis() as u64,
            "proxyTimeoutMs": settings.proxy_timeout.as_millis() as u64
        }
    });
    json_response(StatusCode::OK, &config)
}
