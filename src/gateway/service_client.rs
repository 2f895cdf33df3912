// ============================================================================
// Service Client
// ============================================================================
//
// HTTP client for forwarding requests to backend endpoints.
// Only scheme and authority are rewritten: the backend sees the original
// path and query. Hop-by-hop headers are dropped in both directions.
//
// ============================================================================

use anyhow::{Context, Result};
use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, Response};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::config::UpstreamConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::registry::Endpoint;
use crate::metrics;

const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// HTTP client for forwarding requests to backends
pub struct ServiceClient {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl ServiceClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        // Connection pooling and keep-alive; no overall request timeout, slow
        // backends are the backend owner's concern
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .tcp_keepalive(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// Forward `request` to `endpoint` and relay the backend response as-is
    pub async fn forward_request(
        &self,
        route: &str,
        endpoint: &Endpoint,
        remote_addr: Option<SocketAddr>,
        request: Request<Body>,
    ) -> GatewayResult<Response<Body>> {
        let target_url = target_url(endpoint, &request);

        let (parts, body) = request.into_parts();
        let body_bytes = axum::body::to_bytes(body, self.max_body_bytes)
            .await
            .map_err(|e| GatewayError::InvalidRequest(format!("Failed to read request body: {}", e)))?;

        let mut headers = strip_hop_by_hop(&parts.headers);
        headers.remove("host");
        if let Some(addr) = remote_addr {
            append_forwarded_for(&mut headers, &addr.ip().to_string());
        }

        let mut upstream_request = self
            .client
            .request(parts.method.clone(), &target_url)
            .headers(headers);
        if !body_bytes.is_empty() {
            upstream_request = upstream_request.body(body_bytes);
        }

        let started = Instant::now();
        let upstream_response = upstream_request.send().await.map_err(|e| {
            tracing::error!(
                error = %e,
                route = %route,
                endpoint = %endpoint.address,
                "Failed to forward request to backend"
            );
            GatewayError::Upstream(e.to_string())
        })?;

        let status = upstream_response.status();
        let response_headers = strip_hop_by_hop(upstream_response.headers());
        let response_body = upstream_response.bytes().await.map_err(|e| {
            tracing::error!(error = %e, route = %route, "Failed to read backend response body");
            GatewayError::Upstream(e.to_string())
        })?;

        metrics::UPSTREAM_LATENCY
            .with_label_values(&[route])
            .observe(started.elapsed().as_secs_f64());
        metrics::UPSTREAM_RESPONSES_TOTAL
            .with_label_values(&[route, metrics::status_class(status.as_u16())])
            .inc();

        let mut response = Response::new(Body::from(response_body));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }
}

/// `http://<endpoint>/<original path and query>`
pub fn target_url<B>(endpoint: &Endpoint, request: &Request<B>) -> String {
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    format!("http://{}{}", endpoint.address, path_and_query)
}

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = headers.clone();
    for name in HOP_BY_HOP_HEADERS {
        filtered.remove(name);
    }
    filtered
}

fn append_forwarded_for(headers: &mut HeaderMap, peer_ip: &str) {
    let value = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.is_empty() => format!("{}, {}", existing, peer_ip),
        _ => peer_ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(HeaderName::from_static("x-forwarded-for"), value);
    }
}
