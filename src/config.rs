use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::ffi::OsString;

use crate::gateway::registry::Endpoint;

// ============================================================================
// Configuration Constants
// ============================================================================

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_ADMIN_PORT: u16 = 8081;

const DEFAULT_TOKEN_TTL_HOURS: i64 = 72;
/// Upper bound on token lifetime (one year)
pub const MAX_TOKEN_TTL_HOURS: i64 = 24 * 366;
const DEFAULT_EXEMPT_PATHS: &str =
    "/auth/admins/login,/auth/admins/code,/auth/admins/getTest,/swagger/index.html";

const DEFAULT_ROUTE_PREFIXES: &str = "/security=security,/system=system,/order=order";
const DEFAULT_ROUTE_NAME: &str = "default";
const ENDPOINTS_ENV_SUFFIX: &str = "_SERVICE_ENDPOINTS";

const DEFAULT_REQUESTS_PER_SECOND: u32 = 1;
const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_COOL_DOWN_SECS: u64 = 10;

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_POOL_IDLE_TIMEOUT_SECS: u64 = 90;
pub const MAX_REQUEST_BODY_SIZE: usize = 2 * 1024 * 1024; // 2 MB

// ============================================================================
// Configuration Structures
// ============================================================================

/// Bearer token verification settings
#[derive(Clone)]
pub struct JwtConfig {
    /// Shared HS256 signing secret
    pub secret: String,
    /// Lifetime of issued tokens
    pub token_ttl_hours: i64,
    /// Paths (exact match) that skip token verification
    pub exempt_paths: Vec<String>,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field("token_ttl_hours", &self.token_ttl_hours)
            .field("exempt_paths", &self.exempt_paths)
            .finish()
    }
}

impl JwtConfig {
    pub(crate) fn from_env() -> Result<Self> {
        let secret = std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        Ok(Self {
            secret,
            token_ttl_hours: std::env::var("JWT_TOKEN_TTL_HOURS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_TOKEN_TTL_HOURS),
            exempt_paths: parse_list(
                &std::env::var("AUTH_EXEMPT_PATHS")
                    .unwrap_or_else(|_| DEFAULT_EXEMPT_PATHS.to_string()),
            ),
        })
    }
}

/// Route table: backend endpoints per route name plus the path prefix table
#[derive(Clone, Debug)]
pub struct RoutingConfig {
    pub routes: BTreeMap<String, Vec<Endpoint>>,
    /// (path prefix, route name)
    pub prefixes: Vec<(String, String)>,
    /// Route used when no prefix matches
    pub default_route: String,
}

impl RoutingConfig {
    pub(crate) fn from_env() -> Result<Self> {
        let mut routes = collect_service_endpoints(std::env::vars_os())?;

        if routes.is_empty() {
            tracing::warn!(
                "No *_SERVICE_ENDPOINTS variables set, using local development endpoints"
            );
            routes = default_routes();
        }

        let prefixes = parse_prefix_table(
            &std::env::var("GATEWAY_ROUTE_PREFIXES")
                .unwrap_or_else(|_| DEFAULT_ROUTE_PREFIXES.to_string()),
        )
        .context("Failed to parse GATEWAY_ROUTE_PREFIXES")?;

        Ok(Self {
            routes,
            prefixes,
            default_route: std::env::var("GATEWAY_DEFAULT_ROUTE")
                .unwrap_or_else(|_| DEFAULT_ROUTE_NAME.to_string()),
        })
    }
}

/// Build the route table from `<NAME>_SERVICE_ENDPOINTS` variables.
///
/// Variables whose name or value is not valid UTF-8 are skipped; a malformed
/// endpoint list is an error.
pub fn collect_service_endpoints(
    vars: impl IntoIterator<Item = (OsString, OsString)>,
) -> Result<BTreeMap<String, Vec<Endpoint>>> {
    let mut routes = BTreeMap::new();
    for (key, value) in vars {
        let Some(key) = key.to_str() else {
            continue;
        };
        let Some(name) = key.strip_suffix(ENDPOINTS_ENV_SUFFIX) else {
            continue;
        };
        if name.is_empty() {
            continue;
        }
        let value = match value.into_string() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(variable = %key, "Endpoint variable is not valid UTF-8, ignored");
                continue;
            }
        };
        let endpoints =
            parse_endpoints(&value).with_context(|| format!("Failed to parse {}", key))?;
        routes.insert(name.to_lowercase(), endpoints);
    }
    Ok(routes)
}

fn default_routes() -> BTreeMap<String, Vec<Endpoint>> {
    let mut routes = BTreeMap::new();
    routes.insert(
        "default".to_string(),
        vec![Endpoint::new("127.0.0.1:8000", 1)],
    );
    routes.insert(
        "security".to_string(),
        vec![Endpoint::new("127.0.0.1:8001", 1)],
    );
    routes.insert(
        "system".to_string(),
        vec![Endpoint::new("127.0.0.1:8002", 1)],
    );
    routes
}

/// Blacklist / whitelist / restricted-route policy
#[derive(Clone, Debug, Default)]
pub struct AccessConfig {
    pub blacklist: Vec<String>,
    pub whitelist: Vec<String>,
    /// Path prefix -> IPs allowed to reach it
    pub restricted_routes: BTreeMap<String, Vec<String>>,
    pub enable_blacklist: bool,
    pub enable_whitelist: bool,
    pub enable_restricted: bool,
}

impl AccessConfig {
    pub(crate) fn from_env() -> Result<Self> {
        Ok(Self {
            blacklist: parse_list(&std::env::var("ACCESS_BLACKLIST").unwrap_or_default()),
            whitelist: parse_list(&std::env::var("ACCESS_WHITELIST").unwrap_or_default()),
            restricted_routes: parse_restricted_routes(
                &std::env::var("ACCESS_RESTRICTED_ROUTES").unwrap_or_default(),
            )
            .context("Failed to parse ACCESS_RESTRICTED_ROUTES")?,
            enable_blacklist: env_flag("ACCESS_ENABLE_BLACKLIST", true),
            enable_whitelist: env_flag("ACCESS_ENABLE_WHITELIST", false),
            enable_restricted: env_flag("ACCESS_ENABLE_RESTRICTED", true),
        })
    }
}

/// Per-IP fixed window rate limiting
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Accepted requests per IP per one-second window
    pub requests_per_second: u32,
}

impl RateLimitConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            enabled: env_flag("RATE_LIMIT_ENABLED", true),
            requests_per_second: std::env::var("RATE_LIMIT_REQUESTS_PER_SECOND")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_REQUESTS_PER_SECOND),
        }
    }
}

/// Circuit breaker configuration
#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    /// Breaker opens once the failure count exceeds this value (default: 5)
    pub failure_threshold: u32,
    /// Seconds the breaker stays open before resetting (default: 10)
    pub cool_down_secs: u64,
}

impl CircuitBreakerConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            failure_threshold: std::env::var("CIRCUIT_BREAKER_FAILURE_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_FAILURE_THRESHOLD),
            cool_down_secs: std::env::var("CIRCUIT_BREAKER_COOL_DOWN_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_COOL_DOWN_SECS),
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cool_down_secs: DEFAULT_COOL_DOWN_SECS,
        }
    }
}

/// Outbound HTTP client settings
#[derive(Clone, Debug)]
pub struct UpstreamConfig {
    pub connect_timeout_secs: u64,
    pub pool_idle_timeout_secs: u64,
    pub max_body_bytes: usize,
}

impl UpstreamConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            connect_timeout_secs: std::env::var("UPSTREAM_CONNECT_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
            pool_idle_timeout_secs: std::env::var("UPSTREAM_POOL_IDLE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_POOL_IDLE_TIMEOUT_SECS),
            max_body_bytes: std::env::var("MAX_REQUEST_BODY_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(MAX_REQUEST_BODY_SIZE),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            pool_idle_timeout_secs: DEFAULT_POOL_IDLE_TIMEOUT_SECS,
            max_body_bytes: MAX_REQUEST_BODY_SIZE,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    /// Listener for /health and /metrics
    pub admin_port: u16,
    pub jwt: JwtConfig,
    pub routing: RoutingConfig,
    pub access: AccessConfig,
    pub rate_limit: RateLimitConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub upstream: UpstreamConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            admin_port: std::env::var("ADMIN_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_ADMIN_PORT),
            jwt: JwtConfig::from_env()?,
            routing: RoutingConfig::from_env()?,
            access: AccessConfig::from_env()?,
            rate_limit: RateLimitConfig::from_env(),
            circuit_breaker: CircuitBreakerConfig::from_env(),
            upstream: UpstreamConfig::from_env(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the gateway cannot run with.
    ///
    /// Zero-weight routes and prefixes pointing at unknown routes are only
    /// warned about: they resolve to 404 at request time.
    pub fn validate(&self) -> Result<()> {
        if self.jwt.secret.trim().is_empty() {
            anyhow::bail!("JWT_SECRET must not be empty");
        }
        if !(1..=MAX_TOKEN_TTL_HOURS).contains(&self.jwt.token_ttl_hours) {
            anyhow::bail!(
                "JWT_TOKEN_TTL_HOURS must be between 1 and {}, got {}",
                MAX_TOKEN_TTL_HOURS,
                self.jwt.token_ttl_hours
            );
        }
        if self.rate_limit.enabled && self.rate_limit.requests_per_second == 0 {
            anyhow::bail!("RATE_LIMIT_REQUESTS_PER_SECOND must be greater than 0");
        }
        if !self.routing.routes.contains_key(&self.routing.default_route) {
            anyhow::bail!(
                "Default route '{}' has no endpoints configured",
                self.routing.default_route
            );
        }

        for (name, endpoints) in &self.routing.routes {
            let total: u64 = endpoints.iter().map(|e| u64::from(e.weight)).sum();
            if total == 0 {
                tracing::warn!(route = %name, "Route has zero total weight and will never resolve");
            }
        }
        for (prefix, route) in &self.routing.prefixes {
            if !self.routing.routes.contains_key(route) {
                tracing::warn!(
                    prefix = %prefix,
                    route = %route,
                    "Route prefix points at a route without endpoints"
                );
            }
        }
        Ok(())
    }
}

// ============================================================================
// Parsing helpers
// ============================================================================

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

/// Comma separated list, blanks dropped
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// `host:port=weight,host:port` (weight defaults to 1)
pub fn parse_endpoints(raw: &str) -> Result<Vec<Endpoint>> {
    let mut endpoints = Vec::new();
    for item in parse_list(raw) {
        let (address, weight) = match item.split_once('=') {
            Some((address, weight)) => {
                let weight: u32 = weight
                    .trim()
                    .parse()
                    .with_context(|| format!("Invalid weight in '{}'", item))?;
                (address.trim(), weight)
            }
            None => (item.as_str(), 1),
        };

        let (host, port) = address
            .rsplit_once(':')
            .with_context(|| format!("Endpoint '{}' must be host:port", address))?;
        if host.is_empty() {
            anyhow::bail!("Endpoint '{}' has an empty host", address);
        }
        port.parse::<u16>()
            .with_context(|| format!("Invalid port in endpoint '{}'", address))?;

        endpoints.push(Endpoint::new(address, weight));
    }

    if endpoints.is_empty() {
        anyhow::bail!("Endpoint list is empty");
    }
    Ok(endpoints)
}

/// `/prefix=route,/other=route`
pub fn parse_prefix_table(raw: &str) -> Result<Vec<(String, String)>> {
    parse_list(raw)
        .into_iter()
        .map(|item| {
            let (prefix, route) = item
                .split_once('=')
                .with_context(|| format!("Prefix entry '{}' must be /prefix=route", item))?;
            let (prefix, route) = (prefix.trim(), route.trim());
            if !prefix.starts_with('/') || route.is_empty() {
                anyhow::bail!("Prefix entry '{}' must be /prefix=route", item);
            }
            Ok((prefix.to_string(), route.to_string()))
        })
        .collect()
}

/// `/admin=10.0.0.1|10.0.0.2;/ops=10.0.0.3`
pub fn parse_restricted_routes(raw: &str) -> Result<BTreeMap<String, Vec<String>>> {
    let mut restricted = BTreeMap::new();
    for item in raw.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let (prefix, ips) = item
            .split_once('=')
            .with_context(|| format!("Restricted route '{}' must be /prefix=ip|ip", item))?;
        let prefix = prefix.trim();
        if !prefix.starts_with('/') {
            anyhow::bail!("Restricted route prefix '{}' must start with '/'", prefix);
        }
        let ips = ips
            .split('|')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        restricted.insert(prefix.to_string(), ips);
    }
    Ok(restricted)
}
