// ============================================================================
// Circuit Breaker
// ============================================================================
//
// One breaker for the whole gateway process, not per route.
//
// States:
// - Closed: Normal operation, backend 5xx responses are counted
// - Open: Every request is rejected before reaching a backend
//
// Closed -> Open once the failure count exceeds the threshold.
// Open -> Closed on a timer after the cool-down, with the count reset to 0.
// There is no half-open probing and successes never decrement the count.
//
// ============================================================================

use axum::http::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::CircuitBreakerConfig;
use crate::error::GatewayError;
use crate::metrics;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Closed: Normal operation
    Closed,
    /// Open: Backends are failing, reject requests
    Open,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
}

#[derive(Clone)]
pub struct CircuitBreaker {
    config: Arc<CircuitBreakerConfig>,
    inner: Arc<Mutex<BreakerState>>,
}

impl CircuitBreaker {
    pub fn new(config: Arc<CircuitBreakerConfig>) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
            })),
        }
    }

    /// Ok(()) if the request may proceed, Err while the circuit is open
    pub async fn allow_request(&self) -> Result<(), CircuitBreakerError> {
        match self.inner.lock().await.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => Err(CircuitBreakerError::CircuitOpen),
        }
    }

    /// Observe a completed backend response; only 5xx count as failures
    pub async fn record_response(&self, status: StatusCode) {
        if status.is_server_error() {
            self.record_failure().await;
        }
    }

    /// Record a failed request
    pub async fn record_failure(&self) {
        let mut guard = self.inner.lock().await;
        if guard.state != CircuitState::Closed {
            // Already open; the scheduled reset clears everything
            return;
        }

        guard.failure_count += 1;
        if guard.failure_count > self.config.failure_threshold {
            guard.state = CircuitState::Open;
            metrics::CIRCUIT_OPENED_TOTAL.inc();
            tracing::warn!(
                failure_count = guard.failure_count,
                threshold = self.config.failure_threshold,
                cool_down_secs = self.config.cool_down_secs,
                "Circuit breaker opened due to failures"
            );
            self.schedule_reset();
        }
    }

    fn schedule_reset(&self) {
        let inner = Arc::clone(&self.inner);
        let cool_down = Duration::from_secs(self.config.cool_down_secs);

        tokio::spawn(async move {
            tokio::time::sleep(cool_down).await;
            let mut guard = inner.lock().await;
            guard.state = CircuitState::Closed;
            guard.failure_count = 0;
            tracing::info!("Circuit breaker closed after cool-down");
        });
    }

    /// Get current state (for metrics)
    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    /// Get failure count (for metrics)
    pub async fn failure_count(&self) -> u32 {
        self.inner.lock().await.failure_count
    }
}

/// Circuit breaker error
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError {
    #[error("Circuit breaker is open - service is unavailable")]
    CircuitOpen,
}

impl From<CircuitBreakerError> for GatewayError {
    fn from(err: CircuitBreakerError) -> Self {
        match err {
            CircuitBreakerError::CircuitOpen => GatewayError::CircuitOpen,
        }
    }
}
