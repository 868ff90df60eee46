//! End-to-end webhook tests against mocked directory and collector servers.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use peerlog_core::config::{Config, PeerlogDefaults, parse_config, validate};
use peerlog_server::app::{self, App, StartupError};
use serde_json::{Value, json};
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::{header as header_eq, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "hook-token";

async fn directory() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "u1", "email": "ada@example.com", "name": "Ada"},
            {"id": "u2", "email": "bob@example.com", "name": ""}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/peers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "p1", "hostname": "laptop", "ip": "100.64.0.7", "user_id": "u1"},
            {"id": "exit", "hostname": "exit-oslo-1", "ip": "100.64.0.1", "user_id": ""}
        ])))
        .mount(&server)
        .await;
    server
}

fn config(directory: &MockServer, hec: Option<&MockServer>) -> Config {
    let mut yaml = format!(
        r#"
directory:
  base_url: {}
  token: dir-token
server:
  auth_token: {TOKEN}
policy:
  exclusion_networks: ["100.64.0.0/10"]
translations:
  source_ip_overrides:
    exit-oslo-1: 192.0.2.10
"#,
        directory.uri()
    );
    if let Some(hec) = hec {
        yaml.push_str(&format!(
            "sink:\n  url: {}\n  token: hec-token\n  host: gw-1\n",
            hec.uri()
        ));
    }
    let config = parse_config(&yaml).unwrap();
    validate(&config).unwrap();
    config
}

async fn build(config: &Config) -> App {
    app::build(config, &PeerlogDefaults::default()).await.unwrap()
}

async fn post(router: &Router, body: Value, auth: Option<&str>) -> (StatusCode, Value) {
    let body = body.to_string();
    let mut request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_LENGTH, body.len());
    if let Some(auth) = auth {
        request = request.header(header::AUTHORIZATION, auth);
    }
    let response = router
        .clone()
        .oneshot(request.body(Body::from(body)).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

fn traffic(destination: &str) -> Value {
    json!({
        "ID": "evt-1",
        "Message": "TYPE_START",
        "Timestamp": "2024-01-01T00:00:00Z",
        "Meta": {
            "direction": "INGRESS",
            "destination_type": "PEER",
            "destination_name": "db-1",
            "destination_addr": destination,
            "source_addr": "100.64.0.7:51820",
            "source_id": "p1",
            "reporter_id": "exit",
            "protocol": 6
        }
    })
}

#[tokio::test]
async fn test_rejects_missing_or_wrong_token() {
    let dir = directory().await;
    let app = build(&config(&dir, None)).await;

    let (status, body) = post(&app.webhook, traffic("192.168.1.5:443"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({"error": "unauthorized"}));

    let (status, _) = post(&app.webhook, traffic("192.168.1.5:443"), Some("Bearer nope")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_traffic_forwarded_to_collector() {
    let dir = directory().await;
    let hec = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/services/collector/event"))
        .and(header_eq("authorization", "Splunk hec-token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&hec)
        .await;

    let app = build(&config(&dir, Some(&hec))).await;
    app.lifecycle.mark_ready();

    let (status, body) = post(
        &app.webhook,
        traffic("192.168.1.5:443"),
        Some(&format!("Token {TOKEN}")),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(
        body,
        json!({"status": "ok", "handled_as": "traffic", "forwarded": true})
    );

    app.sink_shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), app.sink_worker.unwrap())
        .await
        .unwrap()
        .unwrap();

    let requests = hec.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let payload: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(payload["host"], "gw-1");
    assert_eq!(payload["sourcetype"], "netbird:traffic");
    assert_eq!(payload["event"]["email"], "ada@example.com");
    assert_eq!(payload["event"]["exitnode"], "exit-oslo-1");
    assert_eq!(payload["event"]["srcip"], "192.0.2.10");
    assert_eq!(payload["event"]["protocol"], "TCP");
    assert_eq!(payload["time"], 1_704_067_200.0);
}

#[tokio::test]
async fn test_overlay_destination_is_filtered() {
    let dir = directory().await;
    let app = build(&config(&dir, None)).await;

    let (status, body) = post(
        &app.webhook,
        traffic("100.64.3.3:443"),
        Some(&format!("Bearer {TOKEN}")),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["forwarded"], false);
    assert_eq!(body["reason"], "excluded_network");
}

#[tokio::test]
async fn test_audit_event_accepted() {
    let dir = directory().await;
    let app = build(&config(&dir, None)).await;

    let audit = json!({
        "ID": 42,
        "Timestamp": "2024-01-01T00:00:00Z",
        "Message": "user blocked",
        "InitiatorID": "u1",
        "TargetID": "u2",
        "Meta": {"ip": "10.0.0.1"}
    });
    let (status, body) = post(&app.webhook, audit, Some(&format!("Bearer {TOKEN}"))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["handled_as"], "audit");
    assert_eq!(body["forwarded"], true);
}

#[tokio::test]
async fn test_unknown_and_invalid_payloads() {
    let dir = directory().await;
    let app = build(&config(&dir, None)).await;
    let auth = format!("Bearer {TOKEN}");

    let (status, body) = post(&app.webhook, json!({"hello": "world"}), Some(&auth)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"message": "Event processed successfully"}));

    let (status, body) = post(&app.webhook, json!([1, 2, 3]), Some(&auth)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].is_string());
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let dir = directory().await;
    let mut config = config(&dir, None);
    config.server.max_body_bytes = Some(64);
    let app = build(&config).await;

    let big = json!({"Message": "x".repeat(1024)});
    let (status, _) = post(&app.webhook, big, Some(&format!("Bearer {TOKEN}"))).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_requests_rejected_while_draining() {
    let dir = directory().await;
    let app = build(&config(&dir, None)).await;
    app.lifecycle.mark_ready();
    app.lifecycle.begin_shutdown();

    let (status, _) = post(
        &app.webhook,
        traffic("192.168.1.5:443"),
        Some(&format!("Bearer {TOKEN}")),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_startup_fails_when_directory_is_down() {
    let dir = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&dir)
        .await;

    let result = app::build(&config(&dir, None), &PeerlogDefaults::default()).await;
    assert!(matches!(result, Err(StartupError::Directory(_))));
}
