// ============================================================================
// Access Control Engine
// ============================================================================
//
// Evaluated per request against the resolved client IP, short-circuiting in
// a fixed order:
// 1. blacklist
// 2. whitelist (only when non-empty)
// 3. restricted path prefixes
//
// All sets hold exact IP literals (no CIDR, no loopback aliasing).
//
// ============================================================================

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::AccessConfig;

/// Why a request was refused by the access policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDenial {
    Blacklisted,
    NotWhitelisted,
    RestrictedRoute,
}

impl AccessDenial {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessDenial::Blacklisted => "blacklisted",
            AccessDenial::NotWhitelisted => "not whitelisted",
            AccessDenial::RestrictedRoute => "restricted route",
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AccessDenial::Blacklisted => "BLACKLISTED",
            AccessDenial::NotWhitelisted => "NOT_WHITELISTED",
            AccessDenial::RestrictedRoute => "RESTRICTED_ROUTE",
        }
    }
}

impl fmt::Display for AccessDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    pub blacklist: HashSet<String>,
    pub whitelist: HashSet<String>,
    /// Path prefix -> IPs allowed to reach it
    pub restricted_routes: BTreeMap<String, HashSet<String>>,
    pub enable_blacklist: bool,
    pub enable_whitelist: bool,
    pub enable_restricted: bool,
}

impl AccessPolicy {
    pub fn from_config(config: &AccessConfig) -> Self {
        Self {
            blacklist: config.blacklist.iter().cloned().collect(),
            whitelist: config.whitelist.iter().cloned().collect(),
            restricted_routes: config
                .restricted_routes
                .iter()
                .map(|(prefix, ips)| (prefix.clone(), ips.iter().cloned().collect()))
                .collect(),
            enable_blacklist: config.enable_blacklist,
            enable_whitelist: config.enable_whitelist,
            enable_restricted: config.enable_restricted,
        }
    }

    pub fn check(&self, client_ip: &str, path: &str) -> Result<(), AccessDenial> {
        if self.enable_blacklist && self.blacklist.contains(client_ip) {
            return Err(AccessDenial::Blacklisted);
        }

        if self.enable_whitelist
            && !self.whitelist.is_empty()
            && !self.whitelist.contains(client_ip)
        {
            return Err(AccessDenial::NotWhitelisted);
        }

        if self.enable_restricted {
            let denied = self
                .restricted_routes
                .iter()
                .any(|(prefix, allowed)| path.starts_with(prefix.as_str()) && !allowed.contains(client_ip));
            if denied {
                return Err(AccessDenial::RestrictedRoute);
            }
        }

        Ok(())
    }
}

/// Shared, runtime-adjustable access policy. Requests take the read lock;
/// administrative updates take the write lock.
pub struct AccessControl {
    policy: RwLock<AccessPolicy>,
}

impl AccessControl {
    pub fn new(policy: AccessPolicy) -> Self {
        Self {
            policy: RwLock::new(policy),
        }
    }

    pub fn from_config(config: &AccessConfig) -> Self {
        Self::new(AccessPolicy::from_config(config))
    }

    pub fn check(&self, client_ip: &str, path: &str) -> Result<(), AccessDenial> {
        self.read().check(client_ip, path)
    }

    pub fn block_ip(&self, ip: &str) {
        self.write().blacklist.insert(ip.to_string());
        tracing::info!(ip = %ip, "IP added to blacklist");
    }

    pub fn unblock_ip(&self, ip: &str) {
        self.write().blacklist.remove(ip);
        tracing::info!(ip = %ip, "IP removed from blacklist");
    }

    pub fn allow_ip(&self, ip: &str) {
        self.write().whitelist.insert(ip.to_string());
        tracing::info!(ip = %ip, "IP added to whitelist");
    }

    pub fn disallow_ip(&self, ip: &str) {
        self.write().whitelist.remove(ip);
        tracing::info!(ip = %ip, "IP removed from whitelist");
    }

    /// Replace the allowed IP set of a restricted prefix
    pub fn restrict_route(&self, prefix: &str, allowed: impl IntoIterator<Item = String>) {
        self.write()
            .restricted_routes
            .insert(prefix.to_string(), allowed.into_iter().collect());
        tracing::info!(prefix = %prefix, "Restricted route updated");
    }

    pub fn snapshot(&self) -> AccessPolicy {
        self.read().clone()
    }

    // A panic while holding the lock cannot leave the sets half-updated, so
    // poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, AccessPolicy> {
        self.policy.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, AccessPolicy> {
        self.policy.write().unwrap_or_else(|e| e.into_inner())
    }
}
