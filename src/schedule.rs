/*!
 * Periodic snapshot task
 */

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use rampart_core_resilience::RecoveryOrchestrator;

use crate::snapshot::{SnapshotSource, SnapshotStore};

/// Take a snapshot every `interval` until the orchestrator shuts down.
///
/// The first snapshot is taken immediately. Each persisted snapshot is noted
/// on the orchestrator's recovery status. A failed snapshot is logged and
/// the schedule continues. Returns the number of snapshots persisted.
pub fn spawn_snapshot_schedule(
    store: Arc<SnapshotStore>,
    source: Arc<dyn SnapshotSource>,
    configuration: BTreeMap<String, Value>,
    interval: Duration,
    orchestrator: Arc<RecoveryOrchestrator>,
) -> JoinHandle<usize> {
    let signal = orchestrator.shutdown_signal();
    tokio::spawn(async move {
        info!(
            "Snapshot schedule started: every {}s into {}",
            interval.as_secs(),
            store.dir().display()
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut taken = 0;

        loop {
            tokio::select! {
                _ = signal.triggered() => break,
                _ = ticker.tick() => {}
            }

            match store
                .create_snapshot(source.as_ref(), configuration.clone())
                .await
            {
                Ok(snapshot) => {
                    orchestrator.note_snapshot(snapshot.timestamp);
                    taken += 1;
                }
                Err(e) => error!("Scheduled snapshot failed: {}", e),
            }
        }

        info!("Snapshot schedule stopped after {} snapshots", taken);
        taken
    })
}
