//! Integration tests for the admin API and imposter transport.
//!
//! Each test starts the admin API in-process on an OS-assigned port and
//! creates imposters bound to 127.0.0.1, then drives both over HTTP.

use assert_json_diff::assert_json_include;
use decoy_server::admin_api::serve;
use decoy_server::config::EngineSettings;
use decoy_server::imposter::ImposterManager;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;

const COUNTER: &str = "function (request, state) {\n\
    state.count = (state.count || 0) + 1;\n\
    return { body: String(state.count) };\n\
}";

struct TestServer {
    admin_url: String,
    client: Client,
}

impl TestServer {
    async fn start(settings: EngineSettings) -> Self {
        let manager = Arc::new(ImposterManager::new(settings).expect("manager"));
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind admin");
        let addr = listener.local_addr().expect("admin addr");
        tokio::spawn(serve(listener, manager));
        Self {
            admin_url: format!("http://{addr}"),
            client: Client::new(),
        }
    }

    async fn post_imposter(&self, mut config: Value) -> reqwest::Response {
        config["host"] = json!("127.0.0.1");
        self.client
            .post(format!("{}/imposters", self.admin_url))
            .json(&config)
            .send()
            .await
            .expect("Failed to create imposter")
    }

    async fn create_imposter(&self, config: Value) -> u16 {
        let response = self.post_imposter(config).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body: Value = response.json().await.expect("Failed to parse response");
        body["port"].as_u64().expect("Missing port in response") as u16
    }

    async fn admin(&self, method: reqwest::Method, path: &str) -> (StatusCode, Value) {
        let response = self
            .client
            .request(method, format!("{}{}", self.admin_url, path))
            .send()
            .await
            .expect("admin request");
        let status = response.status();
        let body = response.json().await.unwrap_or(Value::Null);
        (status, body)
    }

    async fn imposter_get(&self, port: u16, path: &str) -> reqwest::Response {
        self.client
            .get(format!("http://127.0.0.1:{port}{path}"))
            .send()
            .await
            .expect("imposter request")
    }
}

#[tokio::test]
async fn test_create_and_call_imposter() {
    let server = TestServer::start(EngineSettings::default()).await;
    let response = server
        .post_imposter(json!({
            "protocol": "http",
            "name": "orders",
            "stubs": [{
                "predicates": [{"equals": {"path": "/orders"}}],
                "responses": [{"is": {"statusCode": 201, "headers": {"X-Id": "7"}, "body": "created"}}]
            }]
        }))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created: Value = response.json().await.unwrap();
    assert_json_include!(
        actual: created.clone(),
        expected: json!({"protocol": "http", "name": "orders", "numberOfRequests": 0})
    );
    let port = created["port"].as_u64().unwrap() as u16;

    let response = server.imposter_get(port, "/orders").await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers()["x-id"], "7");
    assert_eq!(response.headers()["connection"], "close");
    assert_eq!(response.text().await.unwrap(), "created");

    let response = server.imposter_get(port, "/other").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "");

    let (status, body) = server
        .admin(reqwest::Method::GET, &format!("/imposters/{port}"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["numberOfRequests"], 2);
}

#[tokio::test]
async fn test_list_and_delete_imposters() {
    let server = TestServer::start(EngineSettings::default()).await;
    let first = server.create_imposter(json!({})).await;
    let second = server.create_imposter(json!({})).await;

    let (status, body) = server.admin(reqwest::Method::GET, "/imposters").await;
    assert_eq!(status, StatusCode::OK);
    let mut ports: Vec<u64> = body["imposters"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["port"].as_u64().unwrap())
        .collect();
    ports.sort();
    let mut expected = vec![first as u64, second as u64];
    expected.sort();
    assert_eq!(ports, expected);

    let (status, body) = server
        .admin(reqwest::Method::DELETE, &format!("/imposters/{first}"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["port"], first);

    let (status, body) = server.admin(reqwest::Method::DELETE, "/imposters").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["imposters"].as_array().unwrap().len(), 1);

    let (status, body) = server
        .admin(reqwest::Method::GET, &format!("/imposters/{second}"))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errors"][0]["code"], "no such resource");
}

#[tokio::test]
async fn test_injection_rejected_when_disabled() {
    let server = TestServer::start(EngineSettings::default()).await;
    let response = server
        .post_imposter(json!({"stubs": [{"responses": [{"inject": COUNTER}]}]}))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["errors"][0]["code"], "invalid injection");

    let (_, list) = server.admin(reqwest::Method::GET, "/imposters").await;
    assert_eq!(list["imposters"], json!([]));
}

#[tokio::test]
async fn test_bad_predicate_injection_reported() {
    let server = TestServer::start(EngineSettings::default().with_injection(true)).await;
    let response = server
        .post_imposter(json!({
            "stubs": [{
                "predicates": [{"inject": "return true;"}],
                "responses": [{"is": {"body": "Matched"}}]
            }]
        }))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["errors"][0]["code"], "invalid predicate injection");
    assert_eq!(body["errors"][0]["source"], "return true;");
}

#[tokio::test]
async fn test_malformed_body_is_bad_data() {
    let server = TestServer::start(EngineSettings::default()).await;
    let response = server
        .client
        .post(format!("{}/imposters", server.admin_url))
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["errors"][0]["code"], "bad data");
}

#[tokio::test]
async fn test_stateful_injection_over_http() {
    let server = TestServer::start(EngineSettings::default().with_injection(true)).await;
    let port = server
        .create_imposter(json!({"stubs": [{"responses": [{"inject": COUNTER}]}]}))
        .await;

    let first = server.imposter_get(port, "/").await.text().await.unwrap();
    let second = server.imposter_get(port, "/").await.text().await.unwrap();
    assert_eq!((first.as_str(), second.as_str()), ("1", "2"));
}

#[tokio::test]
async fn test_proxy_failure_returns_structured_error() {
    let server = TestServer::start(EngineSettings::default()).await;
    let port = server
        .create_imposter(json!({
            "stubs": [{"responses": [{"proxy": {"to": "http://invalid.domain"}}]}]
        }))
        .await;

    let response = server.imposter_get(port, "/").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["errors"][0]["code"], "invalid proxy");
    assert_eq!(
        body["errors"][0]["message"],
        "Cannot resolve \"http://invalid.domain\""
    );
}

#[tokio::test]
async fn test_proxy_once_over_http() {
    let server = TestServer::start(EngineSettings::default().with_injection(true)).await;
    let origin = server
        .create_imposter(json!({"stubs": [{"responses": [{"inject": COUNTER}]}]}))
        .await;
    let port = server
        .create_imposter(json!({
            "stubs": [{
                "responses": [{
                    "proxy": {
                        "to": format!("http://127.0.0.1:{origin}"),
                        "predicateGenerators": [{"matches": {"path": true}}]
                    }
                }]
            }]
        }))
        .await;

    let first = server.imposter_get(port, "/first").await.text().await.unwrap();
    let replay = server.imposter_get(port, "/first").await.text().await.unwrap();
    assert_eq!(first, "1");
    assert_eq!(replay, "1");

    let (_, origin_detail) = server
        .admin(reqwest::Method::GET, &format!("/imposters/{origin}"))
        .await;
    assert_eq!(origin_detail["numberOfRequests"], 1);

    let (_, detail) = server
        .admin(reqwest::Method::GET, &format!("/imposters/{port}"))
        .await;
    let stubs = detail["stubs"].as_array().unwrap();
    assert_eq!(stubs.len(), 2);
    assert_eq!(
        stubs[0]["predicates"],
        json!([{"deepEquals": {"path": "/first"}}])
    );
    assert!(stubs[0]["_links"]["self"]["href"]
        .as_str()
        .unwrap()
        .ends_with(&format!("/imposters/{port}/stubs/0")));
}

#[tokio::test]
async fn test_stub_endpoints() {
    let server = TestServer::start(EngineSettings::default()).await;
    let port = server
        .create_imposter(json!({"stubs": [{"responses": [{"is": {"body": "fallback"}}]}]}))
        .await;

    let response = server
        .client
        .post(format!("{}/imposters/{port}/stubs", server.admin_url))
        .json(&json!({
            "index": 0,
            "stub": {
                "predicates": [{"startsWith": {"path": "/api"}}],
                "responses": [{"is": {"body": "api"}}]
            }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["stubs"].as_array().unwrap().len(), 2);

    let text = server.imposter_get(port, "/api/users").await.text().await.unwrap();
    assert_eq!(text, "api");

    let (status, _) = server
        .admin(reqwest::Method::DELETE, &format!("/imposters/{port}/stubs/0"))
        .await;
    assert_eq!(status, StatusCode::OK);
    let text = server.imposter_get(port, "/api/users").await.text().await.unwrap();
    assert_eq!(text, "fallback");

    let (status, body) = server
        .admin(reqwest::Method::DELETE, &format!("/imposters/{port}/stubs/9"))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"][0]["code"], "bad data");

    let response = server
        .client
        .put(format!("{}/imposters/{port}/stubs", server.admin_url))
        .json(&json!({"stubs": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["stubs"], json!([]));
}
