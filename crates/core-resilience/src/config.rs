//! Aggregate configuration for the resilience layer

use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::recovery::RecoveryConfig;
use crate::retry::RetryPolicy;
use crate::window::DEFAULT_HORIZON;

/// Everything a [`crate::ResilienceHandler`] needs to be built
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    /// Horizon of the per-category error windows
    pub window_horizon: Duration,
    /// Breaker thresholds and cool-down
    pub breaker: CircuitBreakerConfig,
    /// Policy handed out to callers for their own retries
    pub retry: RetryPolicy,
    /// Recovery strategy timings
    pub recovery: RecoveryConfig,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            window_horizon: DEFAULT_HORIZON,
            breaker: CircuitBreakerConfig::default(),
            retry: RetryPolicy::default(),
            recovery: RecoveryConfig::default(),
        }
    }
}
