/*!
 * Wiring of the resilience layer for a trading process
 */

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use rampart_core_resilience::{
    AlertSink, RecoveryHooks, RecoveryOrchestrator, ResilienceHandler, StatePersistence,
};

use crate::config::RampartConfig;
use crate::error::Result;
use crate::schedule::spawn_snapshot_schedule;
use crate::snapshot::{SnapshotSource, SnapshotStore, SystemSnapshot};

/// Handler, orchestrator and snapshot store built from one configuration
pub struct Rampart {
    config: RampartConfig,
    handler: Arc<ResilienceHandler>,
    store: Arc<SnapshotStore>,
}

impl Rampart {
    /// Validate the configuration and wire the components together.
    ///
    /// Emergency shutdown persists the latest snapshot through the store.
    pub fn new(
        config: RampartConfig,
        hooks: Arc<dyn RecoveryHooks>,
        alerts: Arc<dyn AlertSink>,
    ) -> Result<Self> {
        config.validate()?;
        let resilience = config.resilience_config();
        let store = Arc::new(SnapshotStore::new(config.snapshot_dir.clone()));

        let persistence: Arc<dyn StatePersistence> = store.clone();
        let orchestrator = Arc::new(
            RecoveryOrchestrator::new(resilience.recovery.clone())
                .with_hooks(hooks)
                .with_persistence(persistence),
        );
        let handler =
            Arc::new(ResilienceHandler::new(resilience, orchestrator).with_alert_sink(alerts));

        info!(
            "Resilience layer ready (snapshots in {})",
            config.snapshot_dir.display()
        );

        Ok(Self {
            config,
            handler,
            store,
        })
    }

    pub fn config(&self) -> &RampartConfig {
        &self.config
    }

    pub fn handler(&self) -> &Arc<ResilienceHandler> {
        &self.handler
    }

    pub fn orchestrator(&self) -> &Arc<RecoveryOrchestrator> {
        self.handler.orchestrator()
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    /// Take and persist a snapshot now
    pub async fn snapshot(&self, source: &dyn SnapshotSource) -> Result<SystemSnapshot> {
        let snapshot = self
            .store
            .create_snapshot(source, self.config.snapshot_configuration()?)
            .await?;
        self.orchestrator().note_snapshot(snapshot.timestamp);
        Ok(snapshot)
    }

    /// Newest snapshot on disk, for resuming after a crash
    pub async fn restore(&self) -> Result<Option<SystemSnapshot>> {
        self.store.load_latest().await
    }

    /// Start the periodic snapshot task if `snapshot_interval` is set
    pub fn start_snapshot_schedule(
        &self,
        source: Arc<dyn SnapshotSource>,
    ) -> Result<Option<JoinHandle<usize>>> {
        let Some(interval) = self.config.snapshot_schedule() else {
            return Ok(None);
        };
        Ok(Some(spawn_snapshot_schedule(
            self.store.clone(),
            source,
            self.config.snapshot_configuration()?,
            interval,
            self.orchestrator().clone(),
        )))
    }
}

impl std::fmt::Debug for Rampart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rampart")
            .field("config", &self.config)
            .field("store", &self.store)
            .finish()
    }
}
