#![allow(dead_code)]

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::json;
use sky_gateway::{
    auth::AuthManager,
    clock::Clock,
    config::{
        AccessConfig, CircuitBreakerConfig, Config, JwtConfig, RateLimitConfig, RoutingConfig,
        UpstreamConfig,
    },
    gateway::{create_router, Endpoint, GatewayState},
};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceExt;

pub const TEST_SECRET: &str = "gateway-test-secret";
pub const PEER_ADDR: ([u8; 4], u16) = ([127, 0, 0, 1], 40_000);

pub struct MockBackend {
    pub address: String,
    hits: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// Echo backend: answers with the request line and identity headers it
/// received. Any path containing `/fail` answers 500.
pub async fn spawn_backend() -> MockBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let hits = Arc::new(AtomicUsize::new(0));

    let app = Router::new()
        .fallback(echo)
        .with_state(hits.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockBackend { address, hits }
}

async fn echo(State(hits): State<Arc<AtomicUsize>>, request: Request) -> Response {
    hits.fetch_add(1, Ordering::SeqCst);

    let header = |name: &str| {
        request
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let body = json!({
        "method": request.method().as_str(),
        "path": request.uri().path(),
        "query": request.uri().query(),
        "user_id": header("x-user-id"),
        "role": header("x-user-role"),
        "request_id": header("x-request-id"),
        "forwarded_for": header("x-forwarded-for"),
    });

    if request.uri().path().contains("/fail") {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    } else {
        Json(body).into_response()
    }
}

/// An address nothing listens on
pub async fn closed_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);
    address
}

pub fn test_config(backend_address: &str) -> Config {
    let mut routes = BTreeMap::new();
    for name in ["default", "security", "system"] {
        routes.insert(name.to_string(), vec![Endpoint::new(backend_address, 1)]);
    }

    let mut restricted_routes = BTreeMap::new();
    restricted_routes.insert("/admin".to_string(), vec!["192.168.1.50".to_string()]);

    Config {
        port: 0,
        admin_port: 0,
        jwt: JwtConfig {
            secret: TEST_SECRET.to_string(),
            token_ttl_hours: 72,
            exempt_paths: vec![
                "/auth/admins/login".to_string(),
                "/auth/admins/code".to_string(),
                "/swagger/index.html".to_string(),
            ],
        },
        routing: RoutingConfig {
            routes,
            prefixes: vec![
                ("/security".to_string(), "security".to_string()),
                ("/system".to_string(), "system".to_string()),
                ("/order".to_string(), "order".to_string()),
            ],
            default_route: "default".to_string(),
        },
        access: AccessConfig {
            blacklist: vec!["192.168.1.100".to_string()],
            whitelist: vec![],
            restricted_routes,
            enable_blacklist: true,
            enable_whitelist: false,
            enable_restricted: true,
        },
        rate_limit: RateLimitConfig {
            enabled: false,
            requests_per_second: 1,
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 5,
            cool_down_secs: 10,
        },
        upstream: UpstreamConfig::default(),
    }
}

pub fn gateway(config: &Config, clock: Arc<dyn Clock>) -> (Router, Arc<GatewayState>) {
    let state = GatewayState::new(config, clock).unwrap();
    (create_router(state.clone()), state)
}

pub fn auth_manager() -> AuthManager {
    AuthManager::new(&JwtConfig {
        secret: TEST_SECRET.to_string(),
        token_ttl_hours: 72,
        exempt_paths: vec![],
    })
    .unwrap()
}

/// Request from `ip` (via X-Forwarded-For) with a transport peer attached
pub fn request(method: &str, path: &str, ip: &str) -> axum::http::request::Builder {
    axum::http::Request::builder()
        .method(method)
        .uri(path)
        .header("x-forwarded-for", ip)
        .extension(ConnectInfo(SocketAddr::from(PEER_ADDR)))
}

pub async fn send(router: &Router, request: Request<Body>) -> Response {
    router.clone().oneshot(request).await.unwrap()
}

pub async fn json_body(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn assert_cors(response: &Response) {
    let headers = response.headers();
    assert_eq!(headers.get("access-control-allow-origin").unwrap(), "*");
    assert_eq!(
        headers.get("access-control-allow-methods").unwrap(),
        "GET, POST, PUT, DELETE, OPTIONS"
    );
    assert_eq!(
        headers.get("access-control-allow-headers").unwrap(),
        "Content-Type, Authorization"
    );
    assert_eq!(headers.get("access-control-allow-credentials").unwrap(), "true");
}
