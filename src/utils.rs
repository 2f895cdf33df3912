use axum::http::HeaderMap;
use std::net::SocketAddr;

/// Extracts the client IP used by access control and rate limiting
///
/// Checks, in order:
/// 1. X-Forwarded-For (first entry in the chain, trimmed)
/// 2. X-Real-IP
/// 3. The transport-level peer address (host part only)
///
/// # Security Note
/// Both headers are taken verbatim. The gateway is deployed behind a trusted
/// proxy that owns these headers; values are not parsed or validated, so
/// `::1` and `127.0.0.1` stay distinct literals.
pub fn extract_client_ip(headers: &HeaderMap, remote_addr: Option<SocketAddr>) -> String {
    if let Some(forwarded_for) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        // "client, proxy1, proxy2" -> client
        return forwarded_for
            .split(',')
            .next()
            .unwrap_or("")
            .trim()
            .to_string();
    }

    if let Some(real_ip) = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        return real_ip.to_string();
    }

    match remote_addr {
        Some(addr) => addr.ip().to_string(),
        None => {
            tracing::debug!("No client address available for request");
            String::new()
        }
    }
}
