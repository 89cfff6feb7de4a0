//! Per-category circuit breakers
//!
//! A breaker opens when the error window of its category reaches the
//! configured threshold, and closes on its own after a cool-down. While it is
//! open, recovery attempts for that category are skipped so a known-bad
//! dependency is not hammered.
//!
//! Breakers are isolated per category: a storm of network errors does not
//! block recovery of unrelated model errors. The error window keeps counting
//! while a breaker is open, so re-activation after a reset reflects the true
//! recent error frequency.
//!
//! # States
//! - Closed: no entry in the registry
//! - Open: entry exists and `now - activated_at <= cool_down`
//!
//! Expiry is lazy: the first [`CircuitBreakerRegistry::is_active`] call after
//! the cool-down removes the entry and logs the reset.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info};

use crate::classify::ErrorCategory;
use crate::window::ErrorWindowTracker;

/// Default number of recent errors that opens a breaker
pub const DEFAULT_THRESHOLD: usize = 5;

/// Default time a breaker stays open
pub const DEFAULT_COOL_DOWN: Duration = Duration::from_secs(15 * 60);

/// Configuration for breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Per-category thresholds; categories not listed use `default_threshold`
    pub thresholds: HashMap<ErrorCategory, usize>,
    /// Threshold for categories without an override
    pub default_threshold: usize,
    /// Duration a breaker stays open after activation
    pub cool_down: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            thresholds: HashMap::new(),
            default_threshold: DEFAULT_THRESHOLD,
            cool_down: DEFAULT_COOL_DOWN,
        }
    }
}

impl CircuitBreakerConfig {
    /// Threshold in effect for a category
    pub fn threshold(&self, category: ErrorCategory) -> usize {
        self.thresholds
            .get(&category)
            .copied()
            .unwrap_or(self.default_threshold)
    }
}

/// An open breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenBreaker {
    pub activated_at: Instant,
    pub cool_down: Duration,
}

impl OpenBreaker {
    fn expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.activated_at) > self.cool_down
    }
}

/// Registry of open breakers keyed by category
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    open: HashMap<ErrorCategory, OpenBreaker>,
}

impl CircuitBreakerRegistry {
    /// Create a registry with the given configuration
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            open: HashMap::new(),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn threshold(&self, category: ErrorCategory) -> usize {
        self.config.threshold(category)
    }

    /// True iff the category's recent error count has reached its threshold.
    ///
    /// Does not touch breaker state.
    pub fn should_break(&self, category: ErrorCategory, tracker: &ErrorWindowTracker) -> bool {
        self.should_break_at(category, tracker, Instant::now())
    }

    pub fn should_break_at(
        &self,
        category: ErrorCategory,
        tracker: &ErrorWindowTracker,
        now: Instant,
    ) -> bool {
        tracker.recent_count_at(category, now) >= self.threshold(category)
    }

    /// Open (or re-open) the breaker for a category
    pub fn activate(&mut self, category: ErrorCategory) {
        self.activate_at(category, Instant::now());
    }

    pub fn activate_at(&mut self, category: ErrorCategory, now: Instant) {
        let breaker = OpenBreaker {
            activated_at: now,
            cool_down: self.config.cool_down,
        };
        self.open.insert(category, breaker);

        error!(
            critical = true,
            category = %category,
            cool_down_secs = self.config.cool_down.as_secs(),
            "Circuit breaker activated for {}",
            category
        );
    }

    /// Whether the breaker for a category is open.
    ///
    /// An expired entry is removed and reported closed.
    pub fn is_active(&mut self, category: ErrorCategory) -> bool {
        self.is_active_at(category, Instant::now())
    }

    pub fn is_active_at(&mut self, category: ErrorCategory, now: Instant) -> bool {
        let Some(breaker) = self.open.get(&category) else {
            return false;
        };

        if breaker.expired_at(now) {
            self.open.remove(&category);
            info!(category = %category, "Circuit breaker for {} has been reset", category);
            return false;
        }

        true
    }

    /// Close a breaker explicitly. Returns true if one was open.
    pub fn reset(&mut self, category: ErrorCategory) -> bool {
        let was_open = self.open.remove(&category).is_some();
        if was_open {
            info!(category = %category, "Circuit breaker for {} reset manually", category);
        }
        was_open
    }

    /// Categories whose breakers are currently open, expiring stale ones first
    pub fn active_categories(&mut self) -> Vec<ErrorCategory> {
        let now = Instant::now();
        let mut active: Vec<ErrorCategory> = self.open.keys().copied().collect();
        active.retain(|category| self.is_active_at(*category, now));
        active.sort();
        active
    }

    /// Entry for a category, if one is stored (expired or not)
    pub fn entry(&self, category: ErrorCategory) -> Option<&OpenBreaker> {
        self.open.get(&category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{ErrorEvent, Severity};

    fn record_n(tracker: &mut ErrorWindowTracker, category: ErrorCategory, n: usize, now: Instant) {
        for _ in 0..n {
            tracker.record_at(&ErrorEvent::new(category, Severity::Medium, "err"), now);
        }
    }

    #[test]
    fn test_should_break_at_threshold_only() {
        let registry = CircuitBreakerRegistry::default();
        let mut tracker = ErrorWindowTracker::default();
        let now = Instant::now();

        record_n(&mut tracker, ErrorCategory::Api, 4, now);
        assert!(!registry.should_break_at(ErrorCategory::Api, &tracker, now));

        record_n(&mut tracker, ErrorCategory::Api, 1, now);
        assert!(registry.should_break_at(ErrorCategory::Api, &tracker, now));
        assert!(!registry.should_break_at(ErrorCategory::Network, &tracker, now));
    }

    #[test]
    fn test_per_category_threshold_override() {
        let mut config = CircuitBreakerConfig::default();
        config.thresholds.insert(ErrorCategory::Trading, 2);
        let registry = CircuitBreakerRegistry::new(config);
        let mut tracker = ErrorWindowTracker::default();
        let now = Instant::now();

        record_n(&mut tracker, ErrorCategory::Trading, 2, now);
        assert!(registry.should_break_at(ErrorCategory::Trading, &tracker, now));
        assert_eq!(registry.threshold(ErrorCategory::Data), DEFAULT_THRESHOLD);
    }

    #[test]
    fn test_should_break_does_not_open_breaker() {
        let registry = CircuitBreakerRegistry::default();
        let mut tracker = ErrorWindowTracker::default();
        let now = Instant::now();
        record_n(&mut tracker, ErrorCategory::Api, 10, now);

        assert!(registry.should_break_at(ErrorCategory::Api, &tracker, now));
        assert!(registry.entry(ErrorCategory::Api).is_none());
    }

    #[test]
    fn test_lazy_expiry_removes_entry() {
        let mut registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            cool_down: Duration::from_secs(900),
            ..Default::default()
        });
        let start = Instant::now();

        registry.activate_at(ErrorCategory::Network, start);
        assert!(registry.is_active_at(ErrorCategory::Network, start + Duration::from_secs(900)));

        let expired = start + Duration::from_secs(901);
        assert!(!registry.is_active_at(ErrorCategory::Network, expired));
        assert!(registry.entry(ErrorCategory::Network).is_none());
        assert!(!registry.is_active_at(ErrorCategory::Network, expired));
    }

    #[test]
    fn test_isolation_between_categories() {
        let mut registry = CircuitBreakerRegistry::default();
        registry.activate(ErrorCategory::Network);

        assert!(registry.is_active(ErrorCategory::Network));
        assert!(!registry.is_active(ErrorCategory::Model));
        assert_eq!(registry.active_categories(), vec![ErrorCategory::Network]);
    }

    #[test]
    fn test_manual_reset() {
        let mut registry = CircuitBreakerRegistry::default();
        registry.activate(ErrorCategory::Data);

        assert!(registry.reset(ErrorCategory::Data));
        assert!(!registry.is_active(ErrorCategory::Data));
        assert!(!registry.reset(ErrorCategory::Data));
    }
}
