// ============================================================================
// Gateway Router
// ============================================================================
//
// Dispatch pipeline for every non-preflight request, in fixed order:
// access control -> rate limit -> circuit breaker -> token check ->
// route resolution -> load balancing -> forward -> breaker observes status.
//
// A rejection at any stage answers immediately; nothing is retried.
// CORS and the OPTIONS short-circuit happen in the `cors` middleware, which
// wraps this handler.
//
// ============================================================================

use anyhow::Result;
use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::auth::AuthManager;
use crate::clock::Clock;
use crate::config::Config;
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::access::AccessControl;
use crate::gateway::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::gateway::middleware::{
    attach_identity, cors, ensure_request_id, handle_panic, request_logging, TokenAuthenticator,
};
use crate::gateway::rate_limit::RateLimiter;
use crate::gateway::registry::ServiceRegistry;
use crate::gateway::service_client::ServiceClient;
use crate::metrics;
use crate::utils::extract_client_ip;

/// Gateway state: every pipeline component, built once at startup
pub struct GatewayState {
    pub registry: ServiceRegistry,
    pub access: AccessControl,
    /// `None` when rate limiting is disabled
    pub rate_limiter: Option<RateLimiter>,
    pub circuit_breaker: CircuitBreaker,
    pub authenticator: TokenAuthenticator,
    pub service_client: ServiceClient,
}

impl GatewayState {
    pub fn new(config: &Config, clock: Arc<dyn Clock>) -> Result<Arc<Self>> {
        let auth_manager = Arc::new(AuthManager::new(&config.jwt)?);

        let rate_limiter = if config.rate_limit.enabled {
            Some(RateLimiter::from_config(&config.rate_limit, clock))
        } else {
            tracing::warn!("Rate limiting is DISABLED");
            None
        };

        Ok(Arc::new(Self {
            registry: ServiceRegistry::from_config(&config.routing),
            access: AccessControl::from_config(&config.access),
            rate_limiter,
            circuit_breaker: CircuitBreaker::new(Arc::new(config.circuit_breaker.clone())),
            authenticator: TokenAuthenticator::new(auth_manager, config.jwt.exempt_paths.clone()),
            service_client: ServiceClient::new(&config.upstream)?,
        }))
    }
}

/// Fallback handler: every path goes through the dispatch pipeline
pub async fn route_request(
    State(state): State<Arc<GatewayState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
) -> Response {
    metrics::REQUESTS_TOTAL.inc();
    let remote_addr = connect_info.map(|ConnectInfo(addr)| addr);

    match dispatch(&state, remote_addr, request).await {
        Ok(response) => response,
        Err(err) => {
            metrics::REJECTIONS_TOTAL
                .with_label_values(&[err.error_code()])
                .inc();
            err.into_response()
        }
    }
}

async fn dispatch(
    state: &GatewayState,
    remote_addr: Option<SocketAddr>,
    mut request: Request,
) -> GatewayResult<Response> {
    let path = request.uri().path().to_string();
    let client_ip = extract_client_ip(request.headers(), remote_addr);

    if let Err(denial) = state.access.check(&client_ip, &path) {
        tracing::warn!(ip = %client_ip, path = %path, reason = %denial, "Access denied");
        return Err(GatewayError::Forbidden(denial));
    }

    if let Some(limiter) = &state.rate_limiter {
        if !limiter.allow(&client_ip) {
            tracing::warn!(ip = %client_ip, path = %path, "IP rate limit exceeded");
            return Err(GatewayError::RateLimited);
        }
    }

    if let Err(e) = state.circuit_breaker.allow_request().await {
        tracing::warn!(ip = %client_ip, path = %path, "Circuit breaker is open, rejecting request");
        return Err(e.into());
    }

    let identity = state.authenticator.authenticate(request.headers(), &path)?;
    attach_identity(&mut request, identity);
    let request_id = ensure_request_id(request.headers_mut());

    let route = state.registry.route_for_path(&path).to_string();
    let endpoint = state
        .registry
        .resolve_endpoint(&route)
        .ok_or_else(|| GatewayError::RouteNotFound(route.clone()))?;

    tracing::debug!(
        request_id = %request_id,
        route = %route,
        endpoint = %endpoint.address,
        "Forwarding request"
    );

    match state
        .service_client
        .forward_request(&route, &endpoint, remote_addr, request)
        .await
    {
        Ok(response) => {
            state.circuit_breaker.record_response(response.status()).await;
            Ok(response)
        }
        Err(err) => {
            // Transport failures surface as 502 and count like a backend 5xx
            if matches!(err, GatewayError::Upstream(_)) {
                state.circuit_breaker.record_failure().await;
            }
            Err(err)
        }
    }
}

/// Public gateway router (catch-all)
pub fn create_router(state: Arc<GatewayState>) -> Router {
    // ServiceBuilder applies layers top to bottom, first is outermost
    Router::new()
        .fallback(route_request)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(request_logging))
                .layer(middleware::from_fn(cors))
                .layer(CatchPanicLayer::custom(handle_panic))
                .into_inner(),
        )
}

/// Admin router: health and metrics, served on a separate port so no
/// backend path is shadowed
pub fn create_admin_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn health_check(State(state): State<Arc<GatewayState>>) -> Json<serde_json::Value> {
    let circuit = match state.circuit_breaker.state().await {
        CircuitState::Closed => "closed",
        CircuitState::Open => "open",
    };
    Json(json!({
        "status": "ok",
        "circuit": circuit,
        "failure_count": state.circuit_breaker.failure_count().await,
    }))
}

async fn metrics_handler() -> Response {
    match metrics::gather_metrics() {
        Ok(body) => (
            [("content-type", "text/plain; version=0.0.4")],
            Body::from(body),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to gather metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
