//! Tests for upstream request rewriting and forwarding

mod common;

use cas_gateway::http::request::{Method, RequestBuilder};
use cas_gateway::http::response::StatusCode;
use cas_gateway::proxy::upstream::FORWARDED_BY;
use cas_gateway::proxy::{Forwarder, rewrite_request, strip_route_prefix};
use common::MockBackend;
use std::time::Duration;
use url::Url;

fn forwarder() -> Forwarder {
    Forwarder::new(Duration::from_secs(5), Duration::from_secs(30))
}

#[test]
fn test_build_http_request() {
    let request = RequestBuilder::new()
        .method(Method::GET)
        .path("/api/users")
        .version("HTTP/1.1")
        .header("User-Agent", "Test")
        .build()
        .unwrap();

    let backend_url = Url::parse("http://localhost:3000").unwrap();
    let request_bytes = forwarder().build_http_request(&request, &backend_url);
    let request_str = String::from_utf8_lossy(&request_bytes);

    assert!(request_str.starts_with("GET /api/users HTTP/1.1\r\n"));
    assert!(request_str.contains("Host: localhost:3000"));
    assert!(request_str.contains("User-Agent: Test"));
    assert!(request_str.contains("Connection: close"));
}

#[test]
fn test_build_http_request_with_body() {
    let request = RequestBuilder::new()
        .method(Method::POST)
        .path("/api/data")
        .header("Content-Type", "application/json")
        .header("Expect", "100-continue")
        .body(b"{\"a\":1}".to_vec())
        .build()
        .unwrap();

    let backend_url = Url::parse("http://localhost:8080").unwrap();
    let request_bytes = forwarder().build_http_request(&request, &backend_url);
    let request_str = String::from_utf8_lossy(&request_bytes);

    assert!(request_str.contains("POST /api/data HTTP/1.1"));
    assert!(request_str.contains("Content-Length: 7"));
    assert!(!request_str.contains("Expect"));
    assert!(request_str.ends_with("\r\n\r\n{\"a\":1}"));
}

#[test]
fn test_build_http_request_removes_hop_by_hop_headers() {
    let request = RequestBuilder::new()
        .method(Method::GET)
        .path("/")
        .header("Connection", "keep-alive, X-Private")
        .header("X-Private", "secret")
        .header("Upgrade", "websocket")
        .header("Keep-Alive", "timeout=5")
        .header("User-Agent", "Test")
        .build()
        .unwrap();

    let backend_url = Url::parse("http://localhost:3000").unwrap();
    let request_bytes = forwarder().build_http_request(&request, &backend_url);
    let request_str = String::from_utf8_lossy(&request_bytes);

    assert!(request_str.contains("Connection: close"));
    assert!(!request_str.contains("Upgrade: websocket"));
    assert!(!request_str.contains("Keep-Alive"));
    assert!(!request_str.contains("X-Private"));
    assert!(request_str.contains("User-Agent: Test"));
}

#[test]
fn test_build_http_request_default_path() {
    let request = RequestBuilder::new()
        .method(Method::GET)
        .path("")
        .build()
        .unwrap();

    let backend_url = Url::parse("http://localhost:3000").unwrap();
    let request_bytes = forwarder().build_http_request(&request, &backend_url);
    let request_str = String::from_utf8_lossy(&request_bytes);

    // Empty path should default to "/"
    assert!(request_str.contains("GET / HTTP/1.1"));
}

#[test]
fn test_strip_route_prefix() {
    assert_eq!(strip_route_prefix("/app/x", "/app"), "/x");
    assert_eq!(strip_route_prefix("/app", "/app"), "/");
    assert_eq!(strip_route_prefix("/app/", "/app"), "/");
    assert_eq!(strip_route_prefix("/apple", "/app"), "/apple");
    assert_eq!(strip_route_prefix("/other", "/app"), "/other");
    assert_eq!(strip_route_prefix("/x", "/"), "/x");
}

#[test]
fn test_rewrite_request_joins_target_path_and_keeps_query() {
    let request = RequestBuilder::new()
        .method(Method::GET)
        .path("/app/users?page=2")
        .header("Host", "gw.example.com")
        .remote_addr("10.0.0.7:5555".parse().unwrap())
        .build()
        .unwrap();

    let target = Url::parse("http://backend:9000/base").unwrap();
    let rewritten = rewrite_request(&request, &target, Some("/app"));

    assert_eq!(rewritten.path, "/base/users?page=2");
    assert_eq!(rewritten.header("X-Forwarded-By"), Some(FORWARDED_BY));
    assert_eq!(rewritten.header("X-Forwarded-Host"), Some("gw.example.com"));
    assert_eq!(rewritten.header("X-Forwarded-Proto"), Some("http"));
    assert_eq!(rewritten.header("X-Forwarded-For"), Some("10.0.0.7"));

    // The inbound request is untouched
    assert_eq!(request.path, "/app/users?page=2");
    assert_eq!(request.header("X-Forwarded-By"), None);
}

#[test]
fn test_rewrite_request_appends_forwarded_for() {
    let request = RequestBuilder::new()
        .method(Method::GET)
        .path("/x")
        .header("X-Forwarded-For", "1.2.3.4")
        .header("X-Forwarded-Proto", "https")
        .remote_addr("10.0.0.7:5555".parse().unwrap())
        .build()
        .unwrap();

    let target = Url::parse("http://backend:9000").unwrap();
    let rewritten = rewrite_request(&request, &target, None);

    assert_eq!(rewritten.path, "/x");
    assert_eq!(rewritten.header("X-Forwarded-For"), Some("1.2.3.4, 10.0.0.7"));
    assert_eq!(rewritten.header("X-Forwarded-Proto"), Some("https"));
}

#[tokio::test]
async fn test_forward_relays_status_headers_and_body() {
    let backend = MockBackend::start(|_| {
        common::raw_response(
            "201 Created",
            &[("X-Backend", "yes"), ("Set-Cookie", "a=1"), ("Set-Cookie", "b=2")],
            b"created",
        )
    })
    .await;

    let request = RequestBuilder::new()
        .method(Method::POST)
        .path("/app/items")
        .header("Host", "gw.example.com")
        .body(b"payload".to_vec())
        .build()
        .unwrap();

    let response = forwarder()
        .forward(&request, &backend.url(), Some("/app"))
        .await;

    assert_eq!(response.status.as_u16(), 201);
    assert_eq!(response.reason, "Created");
    assert_eq!(response.body, b"created".to_vec());
    assert_eq!(response.header("X-Backend"), Some("yes"));
    assert_eq!(response.headers.get_all("Set-Cookie").count(), 2);

    let seen = backend.last_request().await.unwrap();
    assert_eq!(seen.method, Method::POST);
    assert_eq!(seen.path, "/items");
    assert_eq!(seen.body, b"payload".to_vec());
    assert_eq!(seen.header("X-Forwarded-By"), Some(FORWARDED_BY));
}

#[tokio::test]
async fn test_forward_decodes_chunked_backend_response() {
    let backend = MockBackend::start(|_| {
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n"
            .to_vec()
    })
    .await;

    let request = RequestBuilder::new()
        .method(Method::GET)
        .path("/")
        .build()
        .unwrap();

    let response = forwarder().forward(&request, &backend.url(), None).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, b"Wikipedia".to_vec());
    assert_eq!(response.header("Transfer-Encoding"), None);
    assert_eq!(response.header("Content-Length"), Some("9"));
}

#[tokio::test]
async fn test_forward_unreachable_backend_is_bad_gateway() {
    let request = RequestBuilder::new()
        .method(Method::GET)
        .path("/")
        .build()
        .unwrap();

    let target = Url::parse(&format!("http://127.0.0.1:{}", common::closed_port())).unwrap();
    let response = forwarder().forward(&request, &target, None).await;

    assert_eq!(response.status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_forward_slow_backend_is_gateway_timeout() {
    let backend = MockBackend::start_silent().await;

    let request = RequestBuilder::new()
        .method(Method::GET)
        .path("/")
        .build()
        .unwrap();

    let forwarder = Forwarder::new(Duration::from_secs(1), Duration::from_millis(200));
    let response = forwarder.forward(&request, &backend.url(), None).await;

    assert_eq!(response.status, StatusCode::GATEWAY_TIMEOUT);
}
