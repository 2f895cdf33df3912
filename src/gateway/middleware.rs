// ============================================================================
// Gateway Middleware
// ============================================================================
//
// - cors: permissive CORS headers on every response, preflight short-circuit
// - request_logging: method/path/status/duration per request
// - handle_panic: generic 500 for panics caught by CatchPanicLayer
// - TokenAuthenticator: bearer token gate used by the dispatcher
//
// ============================================================================

use axum::{
    extract::Request,
    http::{header::AUTHORIZATION, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::auth::AuthManager;
use crate::error::{GatewayError, GatewayResult};

// Header names for identity propagation to backends
pub const HEADER_USER_ID: &str = "x-user-id";
pub const HEADER_USER_ROLE: &str = "x-user-role";
pub const HEADER_REQUEST_ID: &str = "x-request-id";

const CORS_HEADERS: [(&str, &str); 4] = [
    ("access-control-allow-origin", "*"),
    ("access-control-allow-methods", "GET, POST, PUT, DELETE, OPTIONS"),
    ("access-control-allow-headers", "Content-Type, Authorization"),
    ("access-control-allow-credentials", "true"),
];

/// Set the permissive CORS headers, replacing any existing values
pub fn apply_cors_headers(headers: &mut HeaderMap) {
    for (name, value) in CORS_HEADERS {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }
}

/// CORS middleware
///
/// Runs outside every policy check so denials and errors carry the headers
/// too. OPTIONS requests are answered here with 200 and never reach the
/// dispatcher.
pub async fn cors(req: Request, next: Next) -> Response {
    let mut response = if req.method() == Method::OPTIONS {
        StatusCode::OK.into_response()
    } else {
        next.run(req).await
    };

    apply_cors_headers(response.headers_mut());
    response
}

/// Request logging middleware
pub async fn request_logging(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    tracing::debug!(method = %method, path = %path, "Incoming request");

    let response = next.run(req).await;

    tracing::info!(
        method = %method,
        path = %path,
        status = %response.status().as_u16(),
        duration_ms = start.elapsed().as_millis(),
        "Request completed"
    );

    response
}

/// Response for a panic inside request handling. The panic payload is
/// logged but never sent to the client.
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    };
    tracing::error!(panic = %detail, "Request handler panicked");

    GatewayError::internal("request handler panicked").into_response()
}

/// Caller identity established from a verified token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedIdentity {
    pub subject_id: String,
    pub role: String,
}

/// Bearer token gate. Exempt paths are matched exactly, not by prefix.
/// Authorization by role is left to the backends.
pub struct TokenAuthenticator {
    auth_manager: Arc<AuthManager>,
    exempt_paths: HashSet<String>,
}

impl TokenAuthenticator {
    pub fn new(auth_manager: Arc<AuthManager>, exempt_paths: impl IntoIterator<Item = String>) -> Self {
        Self {
            auth_manager,
            exempt_paths: exempt_paths.into_iter().collect(),
        }
    }

    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.contains(path)
    }

    /// `Ok(None)` for exempt paths, `Ok(Some(identity))` for a valid token
    pub fn authenticate(
        &self,
        headers: &HeaderMap,
        path: &str,
    ) -> GatewayResult<Option<AuthenticatedIdentity>> {
        if self.is_exempt(path) {
            return Ok(None);
        }

        let token = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| {
                tracing::debug!(path = %path, "Missing or malformed Authorization header");
                GatewayError::unauthorized("Missing bearer token")
            })?;

        let claims = self.auth_manager.verify_token(token).map_err(|e| {
            tracing::warn!(error = %e, path = %path, "JWT verification failed");
            GatewayError::unauthorized(format!("Invalid token: {}", e))
        })?;

        Ok(Some(AuthenticatedIdentity {
            subject_id: claims.subject_id,
            role: claims.role,
        }))
    }
}

/// Replace client-supplied identity headers with the verified identity (if
/// any) and expose it as a request extension.
pub fn attach_identity(request: &mut Request, identity: Option<AuthenticatedIdentity>) {
    let headers = request.headers_mut();
    headers.remove(HEADER_USER_ID);
    headers.remove(HEADER_USER_ROLE);

    let Some(identity) = identity else {
        return;
    };

    for (name, value) in [
        (HEADER_USER_ID, identity.subject_id.as_str()),
        (HEADER_USER_ROLE, identity.role.as_str()),
    ] {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                headers.insert(HeaderName::from_static(name), value);
            }
            Err(_) => {
                tracing::warn!(header = name, "Claim is not a valid header value, not propagated");
            }
        }
    }
    request.extensions_mut().insert(identity);
}

/// Keep the caller's request ID or generate one
pub fn ensure_request_id(headers: &mut HeaderMap) -> String {
    if let Some(existing) = headers
        .get(HEADER_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        return existing.to_string();
    }

    let request_id = Uuid::new_v4().to_string();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        headers.insert(HeaderName::from_static(HEADER_REQUEST_ID), value);
    }
    request_id
}
