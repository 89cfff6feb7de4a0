//! Error-handling pipeline
//!
//! [`ResilienceHandler`] is the single entry point the trading process feeds
//! classified failures into. For every event it:
//!
//! 1. logs the event at a level matching its severity
//! 2. records it in the error window of its category
//! 3. fails fast if the category's circuit breaker is open
//! 4. trips the breaker (and fails fast) once the window reaches the threshold
//! 5. otherwise runs the category's recovery strategy
//! 6. escalates the degradation level when recovery fails
//! 7. alerts on high and critical events
//!
//! A panic anywhere in the pipeline is caught, logged as critical and reported
//! as an unrecovered failure. The handler never takes the process down.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, warn};

use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::classify::{Classify, ErrorCategory, ErrorEvent};
use crate::config::ResilienceConfig;
use crate::error::ResilienceError;
use crate::recovery::{RecoveryOrchestrator, RecoveryState, RecoveryStatus};
use crate::retry::RetryPolicy;
use crate::window::ErrorWindowTracker;

/// Receiver of operator alerts
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn alert(&self, event: &ErrorEvent);
}

/// Alert sink that only writes a critical log line
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn alert(&self, event: &ErrorEvent) {
        error!(
            critical = true,
            alert = true,
            category = %event.category(),
            "ALERT: {} {} - {}",
            event.severity(),
            event.category(),
            event.message()
        );
    }
}

/// How the pipeline disposed of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Recovery strategy succeeded
    Recovered,
    /// Recovery strategy ran and failed; degradation may have been raised
    RecoveryFailed,
    /// Breaker was already open, recovery skipped
    CircuitOpen,
    /// This event tripped the breaker, recovery skipped
    BreakerTripped,
    /// The pipeline itself panicked
    HandlerFailed,
}

impl HandleOutcome {
    pub fn is_recovered(&self) -> bool {
        matches!(self, HandleOutcome::Recovered)
    }
}

/// Point-in-time health summary
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Recent error count per category that has seen errors
    pub error_counts: BTreeMap<ErrorCategory, usize>,
    /// Categories whose breakers are open
    pub active_circuit_breakers: Vec<ErrorCategory>,
    /// Wall-clock time of the last error per category
    pub last_errors: BTreeMap<ErrorCategory, DateTime<Utc>>,
    pub recovery: RecoveryStatus,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug)]
struct ErrorLedger {
    tracker: ErrorWindowTracker,
    breakers: CircuitBreakerRegistry,
}

enum Gate {
    Closed,
    Open,
    Tripped,
}

/// Error-handling pipeline over windows, breakers and recovery
pub struct ResilienceHandler {
    ledger: Mutex<ErrorLedger>,
    orchestrator: Arc<RecoveryOrchestrator>,
    alerts: Arc<dyn AlertSink>,
    retry: RetryPolicy,
}

impl ResilienceHandler {
    /// Build a handler around an existing orchestrator, alerting through logs
    pub fn new(config: ResilienceConfig, orchestrator: Arc<RecoveryOrchestrator>) -> Self {
        Self {
            ledger: Mutex::new(ErrorLedger {
                tracker: ErrorWindowTracker::new(config.window_horizon),
                breakers: CircuitBreakerRegistry::new(config.breaker),
            }),
            orchestrator,
            alerts: Arc::new(LogAlertSink),
            retry: config.retry,
        }
    }

    /// Build a handler with its own orchestrator (no-op hooks, no persistence)
    pub fn standalone(config: ResilienceConfig) -> Self {
        let orchestrator = Arc::new(RecoveryOrchestrator::new(config.recovery.clone()));
        Self::new(config, orchestrator)
    }

    pub fn with_alert_sink(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn orchestrator(&self) -> &Arc<RecoveryOrchestrator> {
        &self.orchestrator
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run an event through the pipeline. `true` iff recovery succeeded.
    pub async fn handle(&self, event: &ErrorEvent) -> bool {
        self.handle_with_outcome(event).await.is_recovered()
    }

    /// Classify an error, attach context and handle it
    pub async fn report<E, I, K, V>(&self, err: &E, context: I) -> bool
    where
        E: Classify + Display + ?Sized,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ToString,
    {
        let event = context
            .into_iter()
            .fold(ErrorEvent::from_error(err), |event, (key, value)| {
                event.with_context(key, value)
            });
        self.handle(&event).await
    }

    /// Like [`handle`](Self::handle), reporting which path the event took
    pub async fn handle_with_outcome(&self, event: &ErrorEvent) -> HandleOutcome {
        match AssertUnwindSafe(self.process(event)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                let err = ResilienceError::HandlerPanicked(panic_message(panic.as_ref()));
                error!(critical = true, category = %event.category(), "{}", err);
                HandleOutcome::HandlerFailed
            }
        }
    }

    async fn process(&self, event: &ErrorEvent) -> HandleOutcome {
        event.log();
        let category = event.category();

        let gate = {
            let mut ledger = self.lock_ledger();
            let ErrorLedger { tracker, breakers } = &mut *ledger;
            tracker.record(event);
            if breakers.is_active(category) {
                Gate::Open
            } else if breakers.should_break(category, tracker) {
                breakers.activate(category);
                Gate::Tripped
            } else {
                Gate::Closed
            }
        };

        let outcome = match gate {
            Gate::Open => {
                warn!(category = %category, "Circuit breaker open for {}, skipping recovery", category);
                HandleOutcome::CircuitOpen
            }
            Gate::Tripped => HandleOutcome::BreakerTripped,
            Gate::Closed => {
                if self.orchestrator.attempt_recovery_for(event).await {
                    HandleOutcome::Recovered
                } else {
                    self.escalate(event).await;
                    HandleOutcome::RecoveryFailed
                }
            }
        };

        if event.severity().is_alerting() {
            self.alerts.alert(event).await;
        }

        outcome
    }

    async fn escalate(&self, event: &ErrorEvent) {
        let weight = event.severity().degradation_weight();
        if weight == 0 {
            return;
        }
        let posture = self
            .orchestrator
            .initiate_graceful_degradation(event.category(), weight);
        if posture.state == RecoveryState::Emergency {
            self.orchestrator
                .emergency_shutdown("degradation reached maximum level")
                .await;
        }
    }

    /// Retry an operation under the configured policy, aborting on shutdown
    pub async fn retry<T, E, F, Fut>(&self, label: &str, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        let signal = self.orchestrator.shutdown_signal();
        self.retry.run_with_signal(label, &signal, op).await
    }

    pub fn recent_count(&self, category: ErrorCategory) -> usize {
        self.lock_ledger().tracker.recent_count(category)
    }

    pub fn should_break(&self, category: ErrorCategory) -> bool {
        let ledger = self.lock_ledger();
        ledger.breakers.should_break(category, &ledger.tracker)
    }

    pub fn activate_breaker(&self, category: ErrorCategory) {
        self.lock_ledger().breakers.activate(category);
    }

    pub fn is_circuit_open(&self, category: ErrorCategory) -> bool {
        self.lock_ledger().breakers.is_active(category)
    }

    pub fn reset_breaker(&self, category: ErrorCategory) -> bool {
        self.lock_ledger().breakers.reset(category)
    }

    /// Summarize error counts, open breakers and recovery state
    pub fn health(&self) -> HealthReport {
        let (error_counts, active_circuit_breakers, last_errors) = {
            let mut ledger = self.lock_ledger();
            let counts = ledger.tracker.counts().into_iter().collect();
            let last = ledger
                .tracker
                .last_errors()
                .map(|(category, event)| (*category, event.occurred_at()))
                .collect();
            (counts, ledger.breakers.active_categories(), last)
        };

        HealthReport {
            error_counts,
            active_circuit_breakers,
            last_errors,
            recovery: self.orchestrator.status(),
            generated_at: Utc::now(),
        }
    }

    fn lock_ledger(&self) -> MutexGuard<'_, ErrorLedger> {
        self.ledger
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for ResilienceHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceHandler")
            .field("orchestrator", &self.orchestrator)
            .field("retry", &self.retry)
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
