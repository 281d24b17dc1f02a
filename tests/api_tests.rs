//! Router-level tests: the full middleware stack driven with `oneshot`.
//!
//! No network is needed except for the idempotency test, which points Bags
//! at a closed local port so the upstream call fails fast.
//!
//! Run with: `cargo test --test api_tests`
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::ConnectInfo;
use axum::http::{Method, Request, StatusCode, header};
use axum::response::Response;
use serde_json::{Value, json};
use tower::ServiceExt;

use tokenscan_api::{AppState, Config, build_router};

const WSOL: &str = "So11111111111111111111111111111111111111112";

fn app_with(config: Config) -> Router {
    build_router(AppState::new(config).expect("state"))
}

fn app() -> Router {
    app_with(Config::default())
}

/// Attach the socket address `axum::serve` would supply via `ConnectInfo`.
fn from_peer(mut request: Request<Body>, ip: &str) -> Request<Body> {
    let addr = SocketAddr::new(ip.parse().unwrap(), 40_000);
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

fn post_json(uri: &str, body: &str, ip: &str) -> Request<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    from_peer(request, ip)
}

async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).expect("envelope is JSON")
}

fn error_code(body: &Value) -> &str {
    body["error"]["code"].as_str().unwrap_or_default()
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_envelope() {
    let response = app()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["cache-control"], "no-store");
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["response"]["status"], "healthy");
    assert_eq!(body["response"]["upstreams"]["helius"], false);
    assert_eq!(body["response"]["features"]["launchpad"], false);
    assert!(body["meta"]["requestId"].is_string());
    assert!(body["meta"]["timestamp"].is_string());
}

#[tokio::test]
async fn test_health_is_not_rate_limited() {
    let app = app_with(Config {
        rate_limit_max: 1,
        ..Config::default()
    });

    for _ in 0..5 {
        let response = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

// =============================================================================
// Request ID
// =============================================================================

#[tokio::test]
async fn test_request_id_echoed_in_header_and_meta() {
    let response = app()
        .oneshot(
            Request::get("/health")
                .header("x-request-id", "client-trace-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.headers()["x-request-id"], "client-trace-42");
    let body = body_json(response).await;
    assert_eq!(body["meta"]["requestId"], "client-trace-42");
}

#[tokio::test]
async fn test_invalid_request_id_replaced() {
    let response = app()
        .oneshot(
            Request::get("/health")
                .header("x-request-id", "has spaces and <tags>")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let header_id = response.headers()["x-request-id"].to_str().unwrap().to_string();
    assert_ne!(header_id, "has spaces and <tags>");
    let body = body_json(response).await;
    assert_eq!(body["meta"]["requestId"], header_id.as_str());
}

#[tokio::test]
async fn test_error_envelope_shares_request_id() {
    let response = app()
        .oneshot(
            Request::get("/does-not-exist")
                .header("x-request-id", "trace-404")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.headers()["x-request-id"], "trace-404");
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(error_code(&body), "NOT_FOUND");
    assert_eq!(body["meta"]["requestId"], "trace-404");
}

// =============================================================================
// Routing fallbacks and CORS
// =============================================================================

#[tokio::test]
async fn test_method_not_allowed_envelope() {
    let response = app()
        .oneshot(Request::get("/api/scan").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    let body = body_json(response).await;
    assert_eq!(error_code(&body), "METHOD_NOT_ALLOWED");
}

#[tokio::test]
async fn test_preflight_is_204() {
    let response = app()
        .oneshot(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/api/scan")
                .header(header::ORIGIN, "https://app.example.com")
                .header("access-control-request-method", "POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    assert!(response.headers().contains_key("access-control-allow-methods"));
}

#[tokio::test]
async fn test_cors_allowlist_omits_unknown_origin() {
    let app = app_with(Config {
        cors_allowed_origins: vec!["https://app.example.com".to_string()],
        ..Config::default()
    });

    let allowed = app
        .clone()
        .oneshot(
            Request::get("/health")
                .header(header::ORIGIN, "https://app.example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        allowed.headers()["access-control-allow-origin"],
        "https://app.example.com"
    );

    let denied = app
        .oneshot(
            Request::get("/health")
                .header(header::ORIGIN, "https://evil.example.net")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(!denied.headers().contains_key("access-control-allow-origin"));
}

// =============================================================================
// Body handling
// =============================================================================

#[tokio::test]
async fn test_wrong_content_type_is_415() {
    let response = app()
        .oneshot(
            Request::post("/api/simulate")
                .header(header::CONTENT_TYPE, "text/plain")
                .body(Body::from("name=Moon"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let body = body_json(response).await;
    assert_eq!(error_code(&body), "UNSUPPORTED_MEDIA_TYPE");
}

#[tokio::test]
async fn test_oversized_body_is_413() {
    let app = app_with(Config {
        max_json_size: 1024,
        ..Config::default()
    });
    let padding = "a".repeat(2048);
    let body = json!({ "name": padding, "symbol": "MCAT" }).to_string();

    let response = app
        .oneshot(post_json("/api/simulate", &body, "198.51.100.1"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = body_json(response).await;
    assert_eq!(error_code(&body), "PAYLOAD_TOO_LARGE");
}

#[tokio::test]
async fn test_deep_nesting_is_rejected_before_parsing() {
    let depth = 40;
    let body = format!("{}{}", "[".repeat(depth), "]".repeat(depth));

    let response = app()
        .oneshot(post_json("/api/simulate", &body, "198.51.100.2"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(error_code(&body), "TOO_DEEP");
}

#[tokio::test]
async fn test_malformed_json_is_400() {
    let response = app()
        .oneshot(post_json("/api/simulate", "{\"name\": ", "198.51.100.3"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(error_code(&body), "INVALID_JSON");
}

// =============================================================================
// Validation
// =============================================================================

#[tokio::test]
async fn test_validation_reports_every_issue() {
    let body = json!({
        "symbol": "MCAT",
        "website": "http://localhost/admin",
        "initialBuySol": "5000",
        "surprise": true,
    })
    .to_string();

    let response = app()
        .oneshot(post_json("/api/simulate", &body, "198.51.100.4"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(error_code(&body), "VALIDATION_ERROR");

    let paths: Vec<&str> = body["error"]["details"]
        .as_array()
        .expect("details is a list of issues")
        .iter()
        .filter_map(|issue| issue["path"].as_str())
        .collect();
    assert!(paths.contains(&"name"), "missing name reported: {paths:?}");
    assert!(paths.contains(&"website"), "SSRF URL reported: {paths:?}");
    assert!(paths.contains(&"initialBuySol"), "range reported: {paths:?}");
    assert!(paths.contains(&"surprise"), "unknown key reported: {paths:?}");
}

#[tokio::test]
async fn test_simulate_computes_launch_cost() {
    let body = json!({
        "name": "  Moon Cat  ",
        "symbol": "mcat",
        "initialBuySol": "0.5",
    })
    .to_string();

    let response = app()
        .oneshot(post_json("/api/simulate", &body, "198.51.100.5"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let summary = &body["response"];
    assert_eq!(summary["token"]["name"], "Moon Cat");
    assert_eq!(summary["token"]["symbol"], "MCAT");
    assert_eq!(summary["initialBuyLamports"], 500_000_000u64);
    assert_eq!(summary["networkFeeLamports"], 10_000u64);
    assert_eq!(summary["totalLamports"], 500_010_000u64);
    assert!(!summary["warnings"].as_array().unwrap().is_empty());
}

// =============================================================================
// Rate limiting
// =============================================================================

#[tokio::test]
async fn test_eleventh_request_is_429() {
    let app = app();
    let body = json!({ "name": "Moon Cat", "symbol": "MCAT" }).to_string();

    for i in 0..10 {
        let response = app
            .clone()
            .oneshot(post_json("/api/simulate", &body, "203.0.113.10"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "request {i}");
        assert_eq!(
            response.headers()["x-ratelimit-remaining"],
            (9 - i).to_string().as_str()
        );
    }

    let response = app
        .clone()
        .oneshot(post_json("/api/simulate", &body, "203.0.113.10"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    let envelope = body_json(response).await;
    assert_eq!(error_code(&envelope), "RATE_LIMIT_EXCEEDED");

    // Other clients and other routes keep their own windows
    let other_ip = app
        .clone()
        .oneshot(post_json("/api/simulate", &body, "203.0.113.11"))
        .await
        .unwrap();
    assert_eq!(other_ip.status(), StatusCode::OK);

    let other_route = app
        .oneshot(post_json("/api/scan", &json!({ "mint": WSOL }).to_string(), "203.0.113.10"))
        .await
        .unwrap();
    assert_ne!(other_route.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_rotating_forwarded_for_does_not_reset_window() {
    let app = app();
    let body = json!({ "name": "Moon Cat", "symbol": "MCAT" }).to_string();

    let mut statuses = Vec::new();
    for i in 0..11 {
        let mut request = post_json("/api/simulate", &body, "203.0.113.40");
        request.headers_mut().insert(
            "x-forwarded-for",
            format!("198.18.{i}.1").parse().unwrap(),
        );
        request
            .headers_mut()
            .insert("x-real-ip", format!("198.19.{i}.1").parse().unwrap());
        statuses.push(app.clone().oneshot(request).await.unwrap().status());
    }

    assert!(statuses[..10].iter().all(|s| *s == StatusCode::OK), "{statuses:?}");
    assert_eq!(statuses[10], StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_trusted_proxy_forwarded_for_keys_clients() {
    let app = app_with(Config {
        rate_limit_max: 1,
        trusted_proxies: vec!["10.0.0.0/8".to_string()],
        ..Config::default()
    });
    let body = json!({ "name": "Moon Cat", "symbol": "MCAT" }).to_string();

    let via_proxy = |client: &str| {
        let mut request = post_json("/api/simulate", &body, "10.0.0.5");
        request
            .headers_mut()
            .insert("x-forwarded-for", client.parse().unwrap());
        request
    };

    let first = app.clone().oneshot(via_proxy("203.0.113.41")).await.unwrap();
    let other_client = app.clone().oneshot(via_proxy("203.0.113.42")).await.unwrap();
    let repeat = app.oneshot(via_proxy("203.0.113.41")).await.unwrap();

    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(other_client.status(), StatusCode::OK);
    assert_eq!(repeat.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_rate_limit_disabled_with_zero_max() {
    let app = app_with(Config {
        rate_limit_max: 0,
        ..Config::default()
    });
    let body = json!({ "name": "Moon Cat", "symbol": "MCAT" }).to_string();

    for _ in 0..15 {
        let response = app
            .clone()
            .oneshot(post_json("/api/simulate", &body, "203.0.113.12"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.headers().contains_key("x-ratelimit-limit"));
    }
}

// =============================================================================
// Feature and credential gates
// =============================================================================

#[tokio::test]
async fn test_scan_without_helius_key_is_501() {
    let response = app()
        .oneshot(post_json("/api/scan", &json!({ "mint": WSOL }).to_string(), "198.51.100.6"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    let body = body_json(response).await;
    assert_eq!(error_code(&body), "NOT_IMPLEMENTED");
    assert!(body["error"]["message"].as_str().unwrap().contains("HELIUS_API_KEY"));
}

#[tokio::test]
async fn test_apply_disabled_is_501_even_with_bad_body() {
    let response = app()
        .oneshot(post_json("/api/apply", "{not json", "198.51.100.7"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    let body = body_json(response).await;
    assert!(body["error"]["message"].as_str().unwrap().contains("LAUNCHPAD_ENABLED"));
}

#[tokio::test]
async fn test_swap_disabled_is_501() {
    let response = app()
        .oneshot(post_json("/api/swap", "{}", "198.51.100.8"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn test_bags_launch_path_gated_by_flag() {
    let app = app_with(Config {
        bags_api_key: Some("bags-key-for-tests".to_string()),
        ..Config::default()
    });

    let response = app
        .oneshot(post_json(
            "/api/bags/token-launch/create-launch-transaction",
            "{}",
            "198.51.100.9",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn test_bags_launch_writes_refused_when_enabled() {
    let app = app_with(launch_config());

    for path in [
        "/api/bags/token-launch/create-token-info",
        "/api/bags/token-launch/create-launch-transaction",
    ] {
        let body = json!({
            "name": "Moon Cat",
            "symbol": "MCAT",
            "imageUrl": "https://169.254.169.254/latest/meta-data",
        });
        let response = app
            .clone()
            .oneshot(post_json(path, &body.to_string(), "198.51.100.10"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{path}");
        let envelope = body_json(response).await;
        assert_eq!(error_code(&envelope), "NOT_FOUND");
    }
}

#[tokio::test]
async fn test_bags_proxy_rejects_traversal() {
    let app = app_with(Config {
        bags_api_key: Some("bags-key-for-tests".to_string()),
        ..Config::default()
    });

    let response = app
        .oneshot(
            Request::get("/api/bags/token..launch/feed")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// =============================================================================
// Idempotency
// =============================================================================

fn launch_config() -> Config {
    Config {
        launchpad_enabled: true,
        bags_api_key: Some("bags-key-for-tests".to_string()),
        // Closed port: the upstream call fails fast
        bags_api_url: "http://127.0.0.1:9/api/v1".to_string(),
        upstream_timeout: Duration::from_secs(2),
        ..Config::default()
    }
}

fn apply_request(key: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder =
        Request::post("/api/apply").header(header::CONTENT_TYPE, "application/json");
    if let Some(key) = key {
        builder = builder.header("idempotency-key", key);
    }
    from_peer(
        builder.body(Body::from(body.to_string())).unwrap(),
        "198.51.100.20",
    )
}

fn valid_apply_body() -> Value {
    json!({
        "name": "Moon Cat",
        "symbol": "MCAT",
        "creatorWallet": WSOL,
    })
}

#[tokio::test]
async fn test_apply_requires_idempotency_key() {
    let response = app_with(launch_config())
        .oneshot(apply_request(None, &valid_apply_body()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"]["message"].as_str().unwrap().contains("Idempotency-Key"));
}

#[tokio::test]
async fn test_idempotency_key_reuse_is_409() {
    let app = app_with(launch_config());

    let first = app
        .clone()
        .oneshot(apply_request(Some("launch-0001"), &valid_apply_body()))
        .await
        .unwrap();
    // Upstream unreachable, but the key is spent
    assert_eq!(first.status(), StatusCode::BAD_GATEWAY);
    let body = body_json(first).await;
    assert_eq!(error_code(&body), "UPSTREAM_ERROR");

    let replay = app
        .oneshot(apply_request(Some("launch-0001"), &valid_apply_body()))
        .await
        .unwrap();
    assert_eq!(replay.status(), StatusCode::CONFLICT);
    assert!(replay.headers().contains_key("retry-after"));
    let body = body_json(replay).await;
    assert_eq!(error_code(&body), "IDEMPOTENCY_CONFLICT");
}

#[tokio::test]
async fn test_invalid_body_does_not_spend_key() {
    let app = app_with(launch_config());

    let rejected = app
        .clone()
        .oneshot(apply_request(Some("launch-0002"), &json!({ "name": "Moon Cat" })))
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);

    let retried = app
        .oneshot(apply_request(Some("launch-0002"), &valid_apply_body()))
        .await
        .unwrap();
    assert_ne!(retried.status(), StatusCode::CONFLICT);
}

// =============================================================================
// Authentication
// =============================================================================

#[tokio::test]
async fn test_api_key_required_when_configured() {
    let app = app_with(Config {
        api_key: Some("operator-secret".to_string()),
        ..Config::default()
    });
    let body = json!({ "name": "Moon Cat", "symbol": "MCAT" }).to_string();

    let health = app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);

    let anonymous = app
        .clone()
        .oneshot(post_json("/api/simulate", &body, "198.51.100.30"))
        .await
        .unwrap();
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
    let envelope = body_json(anonymous).await;
    assert_eq!(error_code(&envelope), "UNAUTHORIZED");

    let mut authed = post_json("/api/simulate", &body, "198.51.100.30");
    authed
        .headers_mut()
        .insert("x-api-key", "operator-secret".parse().unwrap());
    let response = app.oneshot(authed).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
