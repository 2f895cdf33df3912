// ============================================================================
// API Gateway
// ============================================================================
//
// Single entry point in front of the auth, system and security services.
// It handles:
// - CORS headers and preflight answers
// - IP access control (blacklist, whitelist, restricted prefixes)
// - Per-IP fixed window rate limiting
// - A process-wide circuit breaker over backend 5xx responses
// - Bearer token verification and identity propagation
// - Weighted random load balancing and reverse proxying
//
// ============================================================================

pub mod access;
pub mod circuit_breaker;
pub mod middleware;
pub mod rate_limit;
pub mod registry;
pub mod router;
pub mod service_client;

pub use access::{AccessControl, AccessDenial, AccessPolicy};
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use middleware::{AuthenticatedIdentity, TokenAuthenticator};
pub use rate_limit::RateLimiter;
pub use registry::{Endpoint, ServiceRegistry};
pub use router::{create_admin_router, create_router, GatewayState};
pub use service_client::ServiceClient;
