// ============================================================================
// Service Registry & Load Balancer
// ============================================================================
//
// Holds the weighted backend endpoints per route name and maps request paths
// to routes by longest matching prefix. Built once at startup and read-only
// afterwards, so lookups take no lock.
//
// Selection is weighted random: draw r in [0, total) and return the first
// endpoint whose cumulative weight exceeds r. No memory of prior choices.
//
// ============================================================================

use rand::Rng;
use std::collections::BTreeMap;

use crate::config::RoutingConfig;

/// One backend address with its relative selection weight
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// host:port
    pub address: String,
    pub weight: u32,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, weight: u32) -> Self {
        Self {
            address: address.into(),
            weight,
        }
    }
}

pub struct ServiceRegistry {
    routes: BTreeMap<String, Vec<Endpoint>>,
    /// Sorted longest prefix first
    prefixes: Vec<(String, String)>,
    default_route: String,
}

impl ServiceRegistry {
    pub fn new(
        routes: BTreeMap<String, Vec<Endpoint>>,
        mut prefixes: Vec<(String, String)>,
        default_route: impl Into<String>,
    ) -> Self {
        prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self {
            routes,
            prefixes,
            default_route: default_route.into(),
        }
    }

    pub fn from_config(config: &RoutingConfig) -> Self {
        Self::new(
            config.routes.clone(),
            config.prefixes.clone(),
            config.default_route.clone(),
        )
    }

    /// Route name for a request path; unmatched paths go to the default route
    pub fn route_for_path(&self, path: &str) -> &str {
        self.prefixes
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map(|(_, route)| route.as_str())
            .unwrap_or(self.default_route.as_str())
    }

    /// Pick an endpoint for `route`. `None` for unknown routes and for routes
    /// whose total weight is zero.
    pub fn resolve_endpoint(&self, route: &str) -> Option<Endpoint> {
        self.resolve_endpoint_with(route, &mut rand::thread_rng())
    }

    pub fn resolve_endpoint_with<R: Rng + ?Sized>(
        &self,
        route: &str,
        rng: &mut R,
    ) -> Option<Endpoint> {
        let endpoints = self.routes.get(route)?;
        let selected = select_weighted(endpoints, rng).cloned();
        if selected.is_none() {
            tracing::warn!(route = %route, "Route has no selectable endpoint");
        }
        selected
    }

    pub fn routes(&self) -> impl Iterator<Item = (&str, &[Endpoint])> {
        self.routes
            .iter()
            .map(|(name, endpoints)| (name.as_str(), endpoints.as_slice()))
    }
}

/// Weighted random choice over `endpoints`
pub fn select_weighted<'a, R: Rng + ?Sized>(
    endpoints: &'a [Endpoint],
    rng: &mut R,
) -> Option<&'a Endpoint> {
    let total: u64 = endpoints.iter().map(|e| u64::from(e.weight)).sum();
    if total == 0 {
        return None;
    }

    let r = rng.gen_range(0..total);
    let mut cumulative = 0u64;
    for endpoint in endpoints {
        cumulative += u64::from(endpoint.weight);
        if cumulative > r {
            return Some(endpoint);
        }
    }
    None
}
