//! Error windows: trailing, time-bounded error counts per category
//!
//! Each category keeps the monotonic timestamps of its recent errors. Entries
//! older than the horizon are pruned on every update, so the window length is
//! exactly the number of "recent" errors the circuit breaker looks at.
//!
//! Timestamps are `tokio::time::Instant`, so wall-clock adjustments never
//! move entries in or out of a window, and paused-time tests can advance the
//! clock deterministically.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

use crate::classify::{ErrorCategory, ErrorEvent};

/// Default horizon of an error window
pub const DEFAULT_HORIZON: Duration = Duration::from_secs(60 * 60);

/// Per-category trailing window of error timestamps
#[derive(Debug)]
pub struct ErrorWindowTracker {
    horizon: Duration,
    windows: HashMap<ErrorCategory, VecDeque<Instant>>,
    last_errors: HashMap<ErrorCategory, ErrorEvent>,
}

impl ErrorWindowTracker {
    /// Create a tracker with the given horizon
    pub fn new(horizon: Duration) -> Self {
        Self {
            horizon,
            windows: HashMap::new(),
            last_errors: HashMap::new(),
        }
    }

    pub fn horizon(&self) -> Duration {
        self.horizon
    }

    /// Record an event at the current monotonic time
    pub fn record(&mut self, event: &ErrorEvent) {
        self.record_at(event, Instant::now());
    }

    /// Record an event observed at `now`
    pub fn record_at(&mut self, event: &ErrorEvent, now: Instant) {
        let category = event.category();
        let window = self.windows.entry(category).or_default();
        window.push_back(now);
        Self::prune_window(window, self.horizon, now);
        self.last_errors.insert(category, event.clone());
    }

    /// Number of errors of `category` within the horizon
    pub fn recent_count(&self, category: ErrorCategory) -> usize {
        self.recent_count_at(category, Instant::now())
    }

    /// Number of errors of `category` within the horizon ending at `now`
    ///
    /// Read-only: stale entries are ignored here and dropped on the next update.
    pub fn recent_count_at(&self, category: ErrorCategory, now: Instant) -> usize {
        self.windows
            .get(&category)
            .map(|window| {
                window
                    .iter()
                    .filter(|ts| now.saturating_duration_since(**ts) <= self.horizon)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Most recent event seen for a category
    pub fn last_error(&self, category: ErrorCategory) -> Option<&ErrorEvent> {
        self.last_errors.get(&category)
    }

    /// Recent counts for every category that has seen an error
    pub fn counts(&self) -> HashMap<ErrorCategory, usize> {
        let now = Instant::now();
        self.windows
            .keys()
            .map(|category| (*category, self.recent_count_at(*category, now)))
            .collect()
    }

    /// Last event per category
    pub fn last_errors(&self) -> impl Iterator<Item = (&ErrorCategory, &ErrorEvent)> {
        self.last_errors.iter()
    }

    /// Drop every window entry that has fallen out of the horizon
    pub fn prune(&mut self) {
        let now = Instant::now();
        for window in self.windows.values_mut() {
            Self::prune_window(window, self.horizon, now);
        }
    }

    fn prune_window(window: &mut VecDeque<Instant>, horizon: Duration, now: Instant) {
        // Timestamps are appended in order, so stale entries are always at the front
        while let Some(oldest) = window.front() {
            if now.saturating_duration_since(*oldest) > horizon {
                window.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Default for ErrorWindowTracker {
    fn default() -> Self {
        Self::new(DEFAULT_HORIZON)
    }
}
