//! Recovery orchestration: degradation ladder and recovery state machine
//!
//! The orchestrator owns the only process-wide mutable resilience state: the
//! degradation level (0..=5) and the recovery bookkeeping it derives the
//! [`RecoveryState`] from. Callers never set either directly; they go through
//! [`RecoveryOrchestrator::initiate_graceful_degradation`],
//! [`RecoveryOrchestrator::attempt_recovery`] and
//! [`RecoveryOrchestrator::emergency_shutdown`].
//!
//! ```text
//!            degrade (level >= 3)              degrade (level == 5)
//!  Normal ─────────────────────────> Degraded ───────────────────────> Emergency
//!    ^  \                              ^   │                              │
//!    │   └── attempt ──> Recovering ───┘   └── attempt ──> Recovering     │
//!    │                       │                                            │
//!    └── success, level 0 ───┘                       reset() ─────────────┘
//! ```
//!
//! The state is derived, never stored:
//! - Emergency iff level == 5
//! - Recovering while an attempt is in flight (and level < 5)
//! - Degraded iff level >= 3 and nothing is in flight
//! - Normal otherwise
//!
//! Degradation measures are signaled, not enforced: collaborators subscribe to
//! a [`DegradationPosture`] channel and adjust their own behavior.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::classify::{ErrorCategory, ErrorEvent};
use crate::error::ResilienceError;
use crate::shutdown::ShutdownSignal;

/// Highest degradation level: full halt
pub const MAX_DEGRADATION_LEVEL: u8 = 5;

/// Level from which the process counts as degraded
pub const DEGRADED_LEVEL: u8 = 3;

/// Process-wide resilience posture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryState {
    Normal,
    Degraded,
    Recovering,
    Emergency,
}

impl RecoveryState {
    fn derive(level: u8, in_flight: usize) -> Self {
        if level >= MAX_DEGRADATION_LEVEL {
            RecoveryState::Emergency
        } else if in_flight > 0 {
            RecoveryState::Recovering
        } else if level >= DEGRADED_LEVEL {
            RecoveryState::Degraded
        } else {
            RecoveryState::Normal
        }
    }
}

impl std::fmt::Display for RecoveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryState::Normal => write!(f, "normal"),
            RecoveryState::Degraded => write!(f, "degraded"),
            RecoveryState::Recovering => write!(f, "recovering"),
            RecoveryState::Emergency => write!(f, "emergency"),
        }
    }
}

/// A measure on the degradation ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationMeasure {
    /// Level >= 1: run loops less often
    ReduceFrequency,
    /// Level >= 2: shrink the position-sizing multiplier
    ReducePositionSizing,
    /// Level >= 3: open no new positions
    HaltNewPositions,
    /// Level >= 4: close the highest-risk existing positions
    CloseRiskiestPositions,
    /// Level 5: stop everything
    FullHalt,
}

impl DegradationMeasure {
    const LADDER: [DegradationMeasure; 5] = [
        DegradationMeasure::ReduceFrequency,
        DegradationMeasure::ReducePositionSizing,
        DegradationMeasure::HaltNewPositions,
        DegradationMeasure::CloseRiskiestPositions,
        DegradationMeasure::FullHalt,
    ];

    /// Lowest level at which the measure applies
    pub fn min_level(&self) -> u8 {
        match self {
            DegradationMeasure::ReduceFrequency => 1,
            DegradationMeasure::ReducePositionSizing => 2,
            DegradationMeasure::HaltNewPositions => 3,
            DegradationMeasure::CloseRiskiestPositions => 4,
            DegradationMeasure::FullHalt => 5,
        }
    }

    /// Every measure in force at `level`
    pub fn for_level(level: u8) -> Vec<DegradationMeasure> {
        Self::LADDER
            .iter()
            .copied()
            .filter(|measure| level >= measure.min_level())
            .collect()
    }

    fn announce(&self) {
        match self {
            DegradationMeasure::ReduceFrequency => {
                info!("Reducing operation frequency due to degradation")
            }
            DegradationMeasure::ReducePositionSizing => {
                info!("Reducing position sizing due to degradation")
            }
            DegradationMeasure::HaltNewPositions => {
                warn!("Halting new positions due to high degradation")
            }
            DegradationMeasure::CloseRiskiestPositions => {
                error!("Closing highest-risk positions due to severe degradation")
            }
            DegradationMeasure::FullHalt => {
                error!(critical = true, "Full system halt due to critical degradation")
            }
        }
    }
}

/// What collaborators observe on the posture channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DegradationPosture {
    pub level: u8,
    pub state: RecoveryState,
    pub measures: Vec<DegradationMeasure>,
}

impl DegradationPosture {
    fn new(level: u8, state: RecoveryState) -> Self {
        Self {
            level,
            state,
            measures: DegradationMeasure::for_level(level),
        }
    }

    pub fn applies(&self, measure: DegradationMeasure) -> bool {
        self.measures.contains(&measure)
    }
}

/// Point-in-time view of the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryStatus {
    pub state: RecoveryState,
    pub degradation_level: u8,
    pub recovery_in_flight: bool,
    pub shut_down: bool,
    pub last_snapshot_at: Option<DateTime<Utc>>,
}

/// Timing knobs used by the recovery strategies
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryConfig {
    /// Wait before re-testing the API
    pub api_retry_delay: Duration,
    /// First network backoff step
    pub network_backoff_base: Duration,
    /// Ceiling for the network backoff
    pub network_backoff_cap: Duration,
    /// Wait before reassessing positions after a trading halt
    pub trading_halt_wait: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            api_retry_delay: Duration::from_secs(5),
            network_backoff_base: Duration::from_secs(1),
            network_backoff_cap: Duration::from_secs(60),
            trading_halt_wait: Duration::from_secs(300),
        }
    }
}

impl RecoveryConfig {
    /// Network wait for the given retry count: `min(base * 2^retry_count, cap)`
    pub fn network_delay(&self, retry_count: u32) -> Duration {
        let secs = self.network_backoff_base.as_secs_f64() * 2f64.powi(retry_count.min(63) as i32);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(Duration::MAX)
            .min(self.network_backoff_cap)
    }
}

/// Remediation actions provided by the host process.
///
/// Every method defaults to a no-op success so hosts only implement what they
/// can actually do.
#[async_trait]
pub trait RecoveryHooks: Send + Sync {
    /// Issue a cheap API call to confirm connectivity
    async fn check_api(&self) -> Result<(), ResilienceError> {
        Ok(())
    }

    /// Confirm the network path is back
    async fn check_network(&self) -> Result<(), ResilienceError> {
        Ok(())
    }

    /// Switch to cached or backup market data
    async fn switch_to_backup_data(&self) -> Result<(), ResilienceError> {
        Ok(())
    }

    /// Reload the model (callers fall back to rule-based trading meanwhile)
    async fn reload_model(&self) -> Result<(), ResilienceError> {
        Ok(())
    }

    /// Re-read positions after a trading halt
    async fn reassess_positions(&self) -> Result<(), ResilienceError> {
        Ok(())
    }

    /// Reduce load and clear caches
    async fn shed_load(&self) -> Result<(), ResilienceError> {
        Ok(())
    }
}

/// Hooks that succeed without doing anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl RecoveryHooks for NoopHooks {}

/// Durable storage for the last known system snapshot
#[async_trait]
pub trait StatePersistence: Send + Sync {
    /// Persist the most recent snapshot.
    ///
    /// Returns the snapshot's timestamp, or `None` when no snapshot exists yet.
    async fn persist_latest(&self) -> Result<Option<DateTime<Utc>>, ResilienceError>;
}

/// Recovery strategy, one per error category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    ApiFailure,
    NetworkPartition,
    DataFeedFailure,
    ModelFailure,
    TradingHalt,
    SystemOverload,
    InvalidData,
}

/// Everything a strategy may touch while it runs
pub struct StrategyContext<'a> {
    pub config: &'a RecoveryConfig,
    pub hooks: &'a dyn RecoveryHooks,
    pub signal: &'a ShutdownSignal,
}

impl RecoveryStrategy {
    pub fn for_category(category: ErrorCategory) -> Self {
        match category {
            ErrorCategory::Api => RecoveryStrategy::ApiFailure,
            ErrorCategory::Network => RecoveryStrategy::NetworkPartition,
            ErrorCategory::Data => RecoveryStrategy::DataFeedFailure,
            ErrorCategory::Model => RecoveryStrategy::ModelFailure,
            ErrorCategory::Trading => RecoveryStrategy::TradingHalt,
            ErrorCategory::System => RecoveryStrategy::SystemOverload,
            ErrorCategory::Validation => RecoveryStrategy::InvalidData,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RecoveryStrategy::ApiFailure => "api_failure",
            RecoveryStrategy::NetworkPartition => "network_partition",
            RecoveryStrategy::DataFeedFailure => "data_feed_failure",
            RecoveryStrategy::ModelFailure => "model_failure",
            RecoveryStrategy::TradingHalt => "trading_halt",
            RecoveryStrategy::SystemOverload => "system_overload",
            RecoveryStrategy::InvalidData => "invalid_data",
        }
    }

    /// Trading and system failures always escalate instead of self-healing
    pub fn is_conservative(&self) -> bool {
        matches!(
            self,
            RecoveryStrategy::TradingHalt | RecoveryStrategy::SystemOverload
        )
    }

    /// Run the strategy. `false` means the condition is still present.
    pub async fn attempt(&self, event: Option<&ErrorEvent>, ctx: &StrategyContext<'_>) -> bool {
        match self {
            RecoveryStrategy::ApiFailure => {
                if !ctx.signal.sleep(ctx.config.api_retry_delay).await {
                    return self.cancelled();
                }
                info!("Testing API connectivity");
                self.hook_outcome(ctx.hooks.check_api().await)
            }
            RecoveryStrategy::NetworkPartition => {
                let retry_count = event
                    .and_then(|e| e.context_value("retry_count"))
                    .and_then(|v| v.parse::<u32>().ok())
                    .unwrap_or(0);
                let delay = ctx.config.network_delay(retry_count);
                if !ctx.signal.sleep(delay).await {
                    return self.cancelled();
                }
                info!("Network recovery attempt after {:?} delay", delay);
                self.hook_outcome(ctx.hooks.check_network().await)
            }
            RecoveryStrategy::DataFeedFailure => {
                info!("Switching to backup data sources");
                self.hook_outcome(ctx.hooks.switch_to_backup_data().await)
            }
            RecoveryStrategy::ModelFailure => {
                info!("Reloading model, rule-based strategy in effect meanwhile");
                self.hook_outcome(ctx.hooks.reload_model().await)
            }
            RecoveryStrategy::InvalidData => {
                info!("Skipping invalid data point");
                true
            }
            RecoveryStrategy::TradingHalt => {
                warn!(
                    "Trading error, waiting {:?} before reassessing positions",
                    ctx.config.trading_halt_wait
                );
                if !ctx.signal.sleep(ctx.config.trading_halt_wait).await {
                    return self.cancelled();
                }
                if let Err(e) = ctx.hooks.reassess_positions().await {
                    error!("Position reassessment failed: {}", e);
                }
                warn!("Trading recovery requires manual confirmation");
                false
            }
            RecoveryStrategy::SystemOverload => {
                error!(
                    critical = true,
                    "System error detected, shedding load; manual intervention may be needed"
                );
                if let Err(e) = ctx.hooks.shed_load().await {
                    error!("Load shedding failed: {}", e);
                }
                false
            }
        }
    }

    fn hook_outcome(&self, result: Result<(), ResilienceError>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                error!(strategy = self.name(), "Remediation failed: {}", e);
                false
            }
        }
    }

    fn cancelled(&self) -> bool {
        warn!(strategy = self.name(), "{}", ResilienceError::Cancelled);
        false
    }
}

#[derive(Debug, Default)]
struct OrchestratorState {
    level: u8,
    in_flight: usize,
    shut_down: bool,
    last_snapshot_at: Option<DateTime<Utc>>,
}

impl OrchestratorState {
    fn state(&self) -> RecoveryState {
        RecoveryState::derive(self.level, self.in_flight)
    }

    fn posture(&self) -> DegradationPosture {
        DegradationPosture::new(self.level, self.state())
    }
}

/// Owner of the degradation level and recovery state
pub struct RecoveryOrchestrator {
    config: RecoveryConfig,
    hooks: Arc<dyn RecoveryHooks>,
    persistence: Option<Arc<dyn StatePersistence>>,
    state: Mutex<OrchestratorState>,
    signal: Mutex<ShutdownSignal>,
    posture_tx: watch::Sender<DegradationPosture>,
}

impl RecoveryOrchestrator {
    /// Create an orchestrator with no-op hooks and no persistence
    pub fn new(config: RecoveryConfig) -> Self {
        let initial = OrchestratorState::default();
        let (posture_tx, _) = watch::channel(initial.posture());
        Self {
            config,
            hooks: Arc::new(NoopHooks),
            persistence: None,
            state: Mutex::new(initial),
            signal: Mutex::new(ShutdownSignal::new()),
            posture_tx,
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn RecoveryHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn StatePersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    pub fn level(&self) -> u8 {
        self.lock().level
    }

    pub fn state(&self) -> RecoveryState {
        self.lock().state()
    }

    pub fn status(&self) -> RecoveryStatus {
        let state = self.lock();
        RecoveryStatus {
            state: state.state(),
            degradation_level: state.level,
            recovery_in_flight: state.in_flight > 0,
            shut_down: state.shut_down,
            last_snapshot_at: state.last_snapshot_at,
        }
    }

    /// Current posture
    pub fn posture(&self) -> DegradationPosture {
        self.lock().posture()
    }

    /// Watch posture changes.
    ///
    /// Postures are published under the state lock, so do not call back into
    /// the orchestrator while holding a `borrow()` of the receiver.
    pub fn subscribe(&self) -> watch::Receiver<DegradationPosture> {
        self.posture_tx.subscribe()
    }

    /// Signal that every recovery and backoff wait observes
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.signal
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Record that a snapshot was taken
    pub fn note_snapshot(&self, taken_at: DateTime<Utc>) {
        self.lock().last_snapshot_at = Some(taken_at);
    }

    /// Raise the degradation level by `severity` (clamped to 5) and apply the ladder
    pub fn initiate_graceful_degradation(
        &self,
        category: ErrorCategory,
        severity: u8,
    ) -> DegradationPosture {
        let mut state = self.lock();
        let before = state.state();
        state.level = state
            .level
            .saturating_add(severity)
            .min(MAX_DEGRADATION_LEVEL);

        warn!(
            category = %category,
            level = state.level,
            "Graceful degradation initiated: {}, level: {}",
            category,
            state.level
        );
        let posture = state.posture();
        for measure in &posture.measures {
            measure.announce();
        }

        self.publish(&state, before)
    }

    /// Attempt recovery for a category
    pub async fn attempt_recovery(&self, category: ErrorCategory) -> bool {
        self.run_recovery(category, None).await
    }

    /// Attempt recovery for a specific event (strategies may read its context)
    pub async fn attempt_recovery_for(&self, event: &ErrorEvent) -> bool {
        self.run_recovery(event.category(), Some(event)).await
    }

    async fn run_recovery(&self, category: ErrorCategory, event: Option<&ErrorEvent>) -> bool {
        let signal = {
            let mut state = self.lock();
            if state.shut_down {
                warn!(category = %category, "Recovery for {} refused: emergency shutdown in effect", category);
                return false;
            }
            let before = state.state();
            state.in_flight += 1;
            self.publish(&state, before);
            self.shutdown_signal()
        };

        let strategy = RecoveryStrategy::for_category(category);
        let ctx = StrategyContext {
            config: &self.config,
            hooks: self.hooks.as_ref(),
            signal: &signal,
        };

        let success = match AssertUnwindSafe(strategy.attempt(event, &ctx))
            .catch_unwind()
            .await
        {
            Ok(success) => success,
            Err(_) => {
                error!(
                    critical = true,
                    strategy = strategy.name(),
                    "Recovery strategy panicked"
                );
                false
            }
        };

        let mut state = self.lock();
        let before = state.state();
        state.in_flight = state.in_flight.saturating_sub(1);
        if success {
            state.level = state.level.saturating_sub(1);
            info!(
                category = %category,
                level = state.level,
                "Recovery successful for {} ({})",
                category,
                strategy.name()
            );
        } else {
            error!(
                category = %category,
                level = state.level,
                "Recovery failed for {} ({})",
                category,
                strategy.name()
            );
        }

        self.publish(&state, before);
        success
    }

    /// Enter Emergency, abort pending waits and persist the last snapshot.
    ///
    /// Only the first call has side effects; later calls just log. Returns
    /// whether this call performed the shutdown.
    pub async fn emergency_shutdown(&self, reason: &str) -> bool {
        let signal = {
            let mut state = self.lock();
            if state.shut_down {
                error!(critical = true, "Emergency shutdown already performed, ignoring: {}", reason);
                return false;
            }
            let before = state.state();
            state.shut_down = true;
            state.level = MAX_DEGRADATION_LEVEL;
            self.publish(&state, before);
            self.shutdown_signal()
        };

        error!(critical = true, "EMERGENCY SHUTDOWN: {}", reason);
        signal.trigger();

        if let Some(persistence) = &self.persistence {
            match persistence.persist_latest().await {
                Ok(Some(taken_at)) => {
                    self.note_snapshot(taken_at);
                    info!("Final snapshot from {} persisted", taken_at);
                }
                Ok(None) => warn!("No snapshot available to persist during shutdown"),
                Err(e) => error!(critical = true, "Emergency shutdown failed to persist snapshot: {}", e),
            }
        }

        error!(critical = true, "Emergency shutdown completed");
        true
    }

    /// Explicitly leave Emergency: level back to 0 with a fresh shutdown signal
    pub fn reset(&self) {
        let mut state = self.lock();
        let before = state.state();
        state.level = 0;
        state.shut_down = false;
        *self
            .signal
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = ShutdownSignal::new();

        info!("Recovery orchestrator reset");
        self.publish(&state, before);
    }

    /// Log the transition and broadcast the posture; callers hold the state lock
    fn publish(&self, state: &OrchestratorState, before: RecoveryState) -> DegradationPosture {
        let posture = state.posture();
        let after = posture.state;
        if before != after {
            match after {
                RecoveryState::Emergency => error!(
                    critical = true,
                    level = posture.level,
                    "Recovery state {} -> {}",
                    before,
                    after
                ),
                RecoveryState::Degraded => {
                    warn!(level = posture.level, "Recovery state {} -> {}", before, after)
                }
                RecoveryState::Recovering | RecoveryState::Normal => {
                    info!(level = posture.level, "Recovery state {} -> {}", before, after)
                }
            }
        }
        self.posture_tx.send_replace(posture.clone());
        posture
    }

    fn lock(&self) -> MutexGuard<'_, OrchestratorState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for RecoveryOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryOrchestrator")
            .field("config", &self.config)
            .field("status", &self.status())
            .finish()
    }
}
