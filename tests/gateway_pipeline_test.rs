// ============================================================================
// Gateway pipeline tests
// ============================================================================
//
// Drive the public router end to end against an in-process echo backend:
// CORS and preflight, access control, rate limiting, token checks and
// route resolution.
//
// ============================================================================

mod test_utils;

use axum::body::Body;
use axum::http::StatusCode;
use sky_gateway::clock::{ManualClock, SystemClock};
use std::sync::Arc;
use test_utils::*;

#[tokio::test]
async fn test_exempt_path_forwards_with_path_and_query() {
    let backend = spawn_backend().await;
    let (router, _) = gateway(&test_config(&backend.address), Arc::new(SystemClock));

    let response = send(
        &router,
        request("POST", "/auth/admins/login?next=%2Fhome&x=1", "10.0.0.1")
            .body(Body::from(r#"{"username":"root"}"#))
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_cors(&response);

    let body = json_body(response).await;
    assert_eq!(body["method"], "POST");
    assert_eq!(body["path"], "/auth/admins/login");
    assert_eq!(body["query"], "next=%2Fhome&x=1");
    assert!(body["user_id"].is_null());
    assert_eq!(backend.hits(), 1);
}

#[tokio::test]
async fn test_forwarded_request_carries_request_id_and_forwarded_for() {
    let backend = spawn_backend().await;
    let (router, _) = gateway(&test_config(&backend.address), Arc::new(SystemClock));

    let response = send(
        &router,
        request("GET", "/swagger/index.html", "10.0.0.1")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert!(!body["request_id"].as_str().unwrap().is_empty());
    let forwarded = body["forwarded_for"].as_str().unwrap();
    assert!(forwarded.starts_with("10.0.0.1"));
    assert!(forwarded.ends_with("127.0.0.1"));
}

#[tokio::test]
async fn test_preflight_answered_without_backend() {
    let backend = spawn_backend().await;
    let (router, _) = gateway(&test_config(&backend.address), Arc::new(SystemClock));

    // Blacklisted origin, protected path, no token: preflight still succeeds
    let response = send(
        &router,
        request("OPTIONS", "/system/users", "192.168.1.100")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_cors(&response);
    assert_eq!(backend.hits(), 0);
}

#[tokio::test]
async fn test_blacklisted_ip_gets_403_with_cors() {
    let backend = spawn_backend().await;
    let (router, _) = gateway(&test_config(&backend.address), Arc::new(SystemClock));

    let response = send(
        &router,
        request("GET", "/auth/admins/login", "192.168.1.100")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_cors(&response);
    let body = json_body(response).await;
    assert_eq!(body["error_code"], "BLACKLISTED");
    assert_eq!(backend.hits(), 0);
}

#[tokio::test]
async fn test_whitelist_rejects_unknown_ip() {
    let backend = spawn_backend().await;
    let mut config = test_config(&backend.address);
    config.access.enable_whitelist = true;
    config.access.whitelist = vec!["10.0.0.7".to_string()];
    let (router, _) = gateway(&config, Arc::new(SystemClock));

    let denied = send(
        &router,
        request("GET", "/auth/admins/login", "10.0.0.8")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);

    let allowed = send(
        &router,
        request("GET", "/auth/admins/login", "10.0.0.7")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(allowed.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_restricted_prefix_requires_allowed_ip() {
    let backend = spawn_backend().await;
    let (router, state) = gateway(&test_config(&backend.address), Arc::new(SystemClock));

    let response = send(
        &router,
        request("GET", "/admin/settings", "10.0.0.1")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = json_body(response).await;
    assert_eq!(body["error_code"], "RESTRICTED_ROUTE");

    // Runtime update takes effect on the next request
    state.access.block_ip("10.0.0.2");
    let response = send(
        &router,
        request("GET", "/auth/admins/login", "10.0.0.2")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_rate_limit_per_ip_per_second() {
    let backend = spawn_backend().await;
    let mut config = test_config(&backend.address);
    config.rate_limit.enabled = true;
    let clock = Arc::new(ManualClock::new(1_700_000_000));
    let (router, _) = gateway(&config, clock.clone());

    let first = send(
        &router,
        request("GET", "/auth/admins/login", "10.0.0.1")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(first.status(), StatusCode::OK);

    let second = send(
        &router,
        request("GET", "/auth/admins/login", "10.0.0.1")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_cors(&second);

    // Another IP in the same second is unaffected
    let other = send(
        &router,
        request("GET", "/auth/admins/login", "10.0.0.2")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(other.status(), StatusCode::OK);

    clock.advance(1);
    let next_window = send(
        &router,
        request("GET", "/auth/admins/login", "10.0.0.1")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(next_window.status(), StatusCode::OK);
    assert_eq!(backend.hits(), 3);
}

#[tokio::test]
async fn test_protected_path_requires_token() {
    let backend = spawn_backend().await;
    let (router, _) = gateway(&test_config(&backend.address), Arc::new(SystemClock));

    let missing = send(
        &router,
        request("GET", "/system/users", "10.0.0.1")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    assert_cors(&missing);

    let wrong_scheme = send(
        &router,
        request("GET", "/system/users", "10.0.0.1")
            .header("authorization", "Basic dXNlcjpwYXNz")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(wrong_scheme.status(), StatusCode::UNAUTHORIZED);

    let invalid = send(
        &router,
        request("GET", "/system/users", "10.0.0.1")
            .header("authorization", "Bearer not.a.token")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(invalid.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(invalid).await;
    assert!(body["error"].as_str().unwrap().contains("Invalid token"));

    assert_eq!(backend.hits(), 0);
}

#[tokio::test]
async fn test_valid_token_propagates_identity() {
    let backend = spawn_backend().await;
    let (router, _) = gateway(&test_config(&backend.address), Arc::new(SystemClock));
    let token = auth_manager().create_token("42", "admin").unwrap();

    let response = send(
        &router,
        request("GET", "/system/users?page=2", "10.0.0.1")
            .header("authorization", format!("Bearer {}", token))
            .header("x-user-id", "spoofed")
            .header("x-user-role", "superuser")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["path"], "/system/users");
    assert_eq!(body["query"], "page=2");
    assert_eq!(body["user_id"], "42");
    assert_eq!(body["role"], "admin");
}

#[tokio::test]
async fn test_exempt_path_strips_spoofed_identity() {
    let backend = spawn_backend().await;
    let (router, _) = gateway(&test_config(&backend.address), Arc::new(SystemClock));

    let response = send(
        &router,
        request("GET", "/auth/admins/code", "10.0.0.1")
            .header("x-user-id", "spoofed")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert!(body["user_id"].is_null());
}

#[tokio::test]
async fn test_route_without_endpoints_is_404() {
    let backend = spawn_backend().await;
    let (router, _) = gateway(&test_config(&backend.address), Arc::new(SystemClock));
    let token = auth_manager().create_token("42", "admin").unwrap();

    let response = send(
        &router,
        request("GET", "/order/list", "10.0.0.1")
            .header("authorization", format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_cors(&response);
    assert_eq!(backend.hits(), 0);
}

#[tokio::test]
async fn test_oversized_body_is_400_without_forwarding() {
    let backend = spawn_backend().await;
    let mut config = test_config(&backend.address);
    config.upstream.max_body_bytes = 16;
    let (router, _) = gateway(&config, Arc::new(SystemClock));

    let response = send(
        &router,
        request("POST", "/auth/admins/login", "10.0.0.1")
            .body(Body::from(vec![b'x'; 64]))
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_cors(&response);
    let body = json_body(response).await;
    assert_eq!(body["error_code"], "INVALID_REQUEST");
    assert_eq!(body["status"], 400);
    assert_eq!(backend.hits(), 0);
}

#[tokio::test]
async fn test_preflight_does_not_consume_rate_limit() {
    let backend = spawn_backend().await;
    let mut config = test_config(&backend.address);
    config.rate_limit.enabled = true;
    let clock = Arc::new(ManualClock::new(0));
    clock.set(1_700_000_500);
    let (router, _) = gateway(&config, clock.clone());

    for _ in 0..3 {
        let preflight = send(
            &router,
            request("OPTIONS", "/auth/admins/login", "10.0.0.1")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(preflight.status(), StatusCode::OK);
    }

    let response = send(
        &router,
        request("GET", "/auth/admins/login", "10.0.0.1")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(backend.hits(), 1);
}
