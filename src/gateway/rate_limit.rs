// ============================================================================
// Rate Limiter
// ============================================================================
//
// Fixed one-second windows per client IP, keyed by (ip, unix second).
// The first request of a window creates the slot; each slot counts up to the
// configured limit. A slot is dropped one window after creation by a detached
// task, never by the request path.
//
// ============================================================================

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::config::RateLimitConfig;

const WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WindowKey {
    ip: String,
    window_start: u64,
}

pub struct RateLimiter {
    windows: Arc<DashMap<WindowKey, u32>>,
    requests_per_window: u32,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(requests_per_window: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            requests_per_window,
            clock,
        }
    }

    pub fn from_config(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(config.requests_per_second, clock)
    }

    /// Count a request from `client_ip` against the current window.
    /// Returns false once the window's quota is used up.
    pub fn allow(&self, client_ip: &str) -> bool {
        let key = WindowKey {
            ip: client_ip.to_string(),
            window_start: self.clock.now_unix_secs(),
        };

        // The entry holds the shard lock, so check-and-increment is atomic
        // per key.
        let (allowed, created) = match self.windows.entry(key.clone()) {
            Entry::Occupied(mut slot) => {
                if *slot.get() < self.requests_per_window {
                    *slot.get_mut() += 1;
                    (true, false)
                } else {
                    (false, false)
                }
            }
            Entry::Vacant(slot) => {
                if self.requests_per_window == 0 {
                    (false, false)
                } else {
                    slot.insert(1);
                    (true, true)
                }
            }
        };

        if created {
            self.schedule_expiry(key);
        }
        if !allowed {
            tracing::debug!(ip = %client_ip, limit = self.requests_per_window, "Rate limit hit");
        }
        allowed
    }

    /// Number of live (ip, window) slots
    pub fn tracked_windows(&self) -> usize {
        self.windows.len()
    }

    fn schedule_expiry(&self, key: WindowKey) {
        let windows = Arc::clone(&self.windows);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(WINDOW).await;
                    windows.remove(&key);
                });
            }
            Err(_) => {
                tracing::debug!(ip = %key.ip, "No runtime available, rate limit slot not expired");
            }
        }
    }
}
