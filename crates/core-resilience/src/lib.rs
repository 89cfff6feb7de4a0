//! Rampart Core Resilience: fault-handling primitives for a long-running trading process
//!
//! # Overview
//!
//! The trading loop calls out to brokerage APIs, market-data feeds and
//! prediction models, any of which can fail transiently or persistently. This
//! crate keeps those failures from compounding:
//!
//! - **Classification**: every failure becomes an [`ErrorEvent`] with a category and severity
//! - **Error windows**: trailing one-hour error counts per category
//! - **Circuit breakers**: per-category fail-fast once a window reaches its threshold
//! - **Retry**: bounded exponential backoff, async and blocking
//! - **Recovery**: one strategy per category, plus a five-level degradation ladder
//! - **Emergency shutdown**: one-shot halt that aborts every pending wait
//!
//! # Key Principles
//!
//! This crate knows nothing about brokers, feeds or storage. Remediation is
//! delegated to [`RecoveryHooks`], snapshot persistence to [`StatePersistence`]
//! and paging to [`AlertSink`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Trading loop                    │
//! └─────────────┬───────────────────────────┘
//!               │ ErrorEvent
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       ResilienceHandler                 │  ← log, record, alert
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │  ErrorWindowTracker + breaker registry  │  ← fail fast per category
//! └─────────────┬───────────────────────────┘
//!               │ closed
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       RecoveryOrchestrator              │  ← strategy, degradation ladder
//! └─────────────┬───────────────────────────┘
//!               │ level 5
//!               ▼
//!        Emergency shutdown
//!   (ShutdownSignal + StatePersistence)
//! ```
//!
//! # Usage Example
//!
//! ```no_run
//! use rampart_core_resilience::prelude::*;
//!
//! # async fn example() {
//! let handler = ResilienceHandler::standalone(ResilienceConfig::default());
//!
//! let event = ErrorEvent::new(ErrorCategory::Network, Severity::Medium, "connection reset")
//!     .with_context("retry_count", 2);
//!
//! if !handler.handle(&event).await {
//!     // degraded: consult handler.orchestrator().posture()
//! }
//! # }
//! ```

pub mod circuit_breaker;
pub mod classify;
pub mod config;
pub mod error;
pub mod handler;
pub mod recovery;
pub mod retry;
pub mod shutdown;
pub mod window;

// Re-export main types for convenience
pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry, OpenBreaker};
pub use classify::{Classify, ErrorCategory, ErrorEvent, Severity};
pub use config::ResilienceConfig;
pub use error::ResilienceError;
pub use handler::{AlertSink, HandleOutcome, HealthReport, LogAlertSink, ResilienceHandler};
pub use recovery::{
    DegradationMeasure, DegradationPosture, NoopHooks, RecoveryConfig, RecoveryHooks,
    RecoveryOrchestrator, RecoveryState, RecoveryStatus, RecoveryStrategy, StatePersistence,
    MAX_DEGRADATION_LEVEL,
};
pub use retry::{retry, retry_blocking, RetryPolicy};
pub use shutdown::ShutdownSignal;
pub use window::ErrorWindowTracker;

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use rampart_core_resilience::prelude::*;
/// ```
pub mod prelude {
    pub use super::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
    pub use super::classify::{Classify, ErrorCategory, ErrorEvent, Severity};
    pub use super::config::ResilienceConfig;
    pub use super::error::ResilienceError;
    pub use super::handler::{AlertSink, HealthReport, ResilienceHandler};
    pub use super::recovery::{
        DegradationMeasure, DegradationPosture, RecoveryConfig, RecoveryHooks,
        RecoveryOrchestrator, RecoveryState, StatePersistence,
    };
    pub use super::retry::RetryPolicy;
    pub use super::shutdown::ShutdownSignal;
    pub use super::window::ErrorWindowTracker;
}
