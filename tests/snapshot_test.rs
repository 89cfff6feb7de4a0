//! Snapshot persistence and crash-recovery tests

use async_trait::async_trait;
use rampart::resilience::{
    ErrorCategory, ErrorEvent, LogAlertSink, NoopHooks, RecoveryState, Severity,
};
use rampart::{OrderRecord, Position, Rampart, RampartConfig, SnapshotSource, SnapshotStore};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;

/// Fixed broker view used by the tests
struct StaticSource {
    fail_orders: bool,
}

#[async_trait]
impl SnapshotSource for StaticSource {
    async fn positions(&self) -> anyhow::Result<BTreeMap<String, Position>> {
        let mut positions = BTreeMap::new();
        positions.insert(
            "AAPL".to_string(),
            Position {
                qty: 10.0,
                side: "long".to_string(),
                market_value: 1_895.3,
                cost_basis: 1_750.0,
                unrealized_pl: 145.3,
                unrealized_plpc: 0.083_028_571,
                avg_entry_price: 175.0,
                current_price: 189.53,
            },
        );
        Ok(positions)
    }

    async fn account_balance(&self) -> anyhow::Result<f64> {
        Ok(15_000.0)
    }

    async fn active_orders(&self, status: &str) -> anyhow::Result<Vec<OrderRecord>> {
        if self.fail_orders {
            anyhow::bail!("broker returned 503");
        }
        Ok(vec![OrderRecord {
            id: "ord-1".to_string(),
            symbol: "MSFT".to_string(),
            side: "buy".to_string(),
            qty: 5.0,
            order_type: "limit".to_string(),
            status: status.to_string(),
            limit_price: Some(410.25),
            stop_price: None,
            submitted_at: None,
        }])
    }

    async fn model_state(&self) -> anyhow::Result<BTreeMap<String, Value>> {
        let mut state = BTreeMap::new();
        state.insert("trained".to_string(), json!(true));
        state.insert("last_accuracy".to_string(), json!(0.61));
        Ok(state)
    }
}

fn config_in(dir: &TempDir) -> RampartConfig {
    RampartConfig {
        snapshot_dir: dir.path().join("snapshots"),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_snapshot_round_trip() {
    let dir = TempDir::new().unwrap();
    let rampart = Rampart::new(config_in(&dir), Arc::new(NoopHooks), Arc::new(LogAlertSink)).unwrap();

    let created = rampart
        .snapshot(&StaticSource { fail_orders: false })
        .await
        .unwrap();
    assert_eq!(created.positions["AAPL"].qty, 10.0);
    assert_eq!(created.account_balance, 15_000.0);
    assert_eq!(created.active_orders.len(), 1);

    let loaded = rampart.restore().await.unwrap().unwrap();
    assert_eq!(loaded, created);
    assert_eq!(
        rampart.orchestrator().status().last_snapshot_at,
        Some(created.timestamp)
    );
}

#[tokio::test]
async fn test_snapshot_file_layout() {
    let dir = TempDir::new().unwrap();
    let store = SnapshotStore::new(dir.path());
    let snapshot = store
        .create_snapshot(&StaticSource { fail_orders: false }, BTreeMap::new())
        .await
        .unwrap();

    let files = store.list().await.unwrap();
    assert_eq!(files.len(), 1);
    let name = files[0].path.file_name().unwrap().to_string_lossy().into_owned();
    assert_eq!(
        name,
        format!("snapshot_{}.json", snapshot.timestamp.format("%Y%m%d_%H%M%S"))
    );

    let raw: Value = serde_json::from_slice(&std::fs::read(&files[0].path).unwrap()).unwrap();
    let mut keys: Vec<&str> = raw.as_object().unwrap().keys().map(String::as_str).collect();
    keys.sort_unstable();
    assert_eq!(
        keys,
        vec![
            "account_balance",
            "active_orders",
            "configuration",
            "model_state",
            "positions",
            "timestamp"
        ]
    );
}

#[tokio::test]
async fn test_empty_directory_has_no_snapshot() {
    let dir = TempDir::new().unwrap();
    let store = SnapshotStore::new(dir.path());
    assert!(store.load_latest().await.unwrap().is_none());

    let missing = SnapshotStore::new(dir.path().join("never-created"));
    assert!(missing.load_latest().await.unwrap().is_none());
    assert!(missing.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failing_source_is_best_effort() {
    let dir = TempDir::new().unwrap();
    let store = SnapshotStore::new(dir.path());

    let snapshot = store
        .create_snapshot(&StaticSource { fail_orders: true }, BTreeMap::new())
        .await
        .unwrap();

    assert!(snapshot.active_orders.is_empty());
    assert_eq!(snapshot.positions.len(), 1);
    assert_eq!(store.load_latest().await.unwrap().unwrap(), snapshot);
}

#[tokio::test]
async fn test_emergency_shutdown_persists_latest_snapshot() {
    let dir = TempDir::new().unwrap();
    let rampart = Rampart::new(config_in(&dir), Arc::new(NoopHooks), Arc::new(LogAlertSink)).unwrap();
    let created = rampart
        .snapshot(&StaticSource { fail_orders: false })
        .await
        .unwrap();

    assert!(rampart.orchestrator().emergency_shutdown("test").await);
    assert!(!rampart.orchestrator().emergency_shutdown("test").await);

    // one manual snapshot plus exactly one emergency write
    let files = rampart.store().list().await.unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(rampart.restore().await.unwrap().unwrap(), created);
    assert_eq!(rampart.orchestrator().state(), RecoveryState::Emergency);
}

#[tokio::test]
async fn test_handler_events_do_not_touch_snapshots() {
    let dir = TempDir::new().unwrap();
    let rampart = Rampart::new(config_in(&dir), Arc::new(NoopHooks), Arc::new(LogAlertSink)).unwrap();

    let event = ErrorEvent::new(ErrorCategory::Validation, Severity::Low, "negative volume");
    assert!(rampart.handler().handle(&event).await);
    assert!(rampart.restore().await.unwrap().is_none());
}

/// Broker view with full-precision prices
struct PreciseSource;

#[async_trait]
impl SnapshotSource for PreciseSource {
    async fn positions(&self) -> anyhow::Result<BTreeMap<String, Position>> {
        let mut positions = BTreeMap::new();
        positions.insert(
            "NVDA".to_string(),
            Position {
                qty: 3.0,
                side: "long".to_string(),
                market_value: 985.690_694_632_869_5,
                cost_basis: 912.337_160_944_913_2,
                unrealized_pl: 73.353_533_687_956_3,
                unrealized_plpc: 0.080_401_238_742_901_77,
                avg_entry_price: 304.112_386_981_637_7,
                current_price: 328.563_564_877_623_2,
            },
        );
        Ok(positions)
    }

    async fn account_balance(&self) -> anyhow::Result<f64> {
        Ok(14_873.219_487_310_553)
    }

    async fn active_orders(&self, _status: &str) -> anyhow::Result<Vec<OrderRecord>> {
        Ok(Vec::new())
    }

    async fn model_state(&self) -> anyhow::Result<BTreeMap<String, Value>> {
        let mut state = BTreeMap::new();
        state.insert("last_accuracy".to_string(), json!(0.613_742_918_305_117_4));
        Ok(state)
    }
}

#[tokio::test]
async fn test_full_precision_values_survive_reload() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(&dir);
    config.base_delay = 0.1 + 0.2;
    let rampart = Rampart::new(config, Arc::new(NoopHooks), Arc::new(LogAlertSink)).unwrap();

    let created = rampart.snapshot(&PreciseSource).await.unwrap();
    let loaded = rampart.restore().await.unwrap().unwrap();

    assert_eq!(loaded.positions["NVDA"].market_value, 985.690_694_632_869_5);
    assert_eq!(loaded, created);
}

#[tokio::test]
async fn test_stored_configuration_restores_config() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(&dir);
    config.circuit_breaker.insert("network".to_string(), 4);
    let rampart =
        Rampart::new(config.clone(), Arc::new(NoopHooks), Arc::new(LogAlertSink)).unwrap();

    rampart.snapshot(&PreciseSource).await.unwrap();
    let loaded = rampart.restore().await.unwrap().unwrap();

    assert_eq!(loaded.configuration["log_file"], Value::Null);
    let object: serde_json::Map<String, Value> = loaded.configuration.into_iter().collect();
    let restored: RampartConfig = serde_json::from_value(Value::Object(object)).unwrap();
    assert_eq!(restored, config);
}

#[tokio::test]
async fn test_scheduled_snapshots_update_recovery_status() {
    let dir = TempDir::new().unwrap();
    let config = RampartConfig {
        snapshot_interval: 3600,
        ..config_in(&dir)
    };
    let rampart = Rampart::new(config, Arc::new(NoopHooks), Arc::new(LogAlertSink)).unwrap();

    let handle = rampart
        .start_snapshot_schedule(Arc::new(StaticSource { fail_orders: false }))
        .unwrap()
        .unwrap();

    while rampart.orchestrator().status().last_snapshot_at.is_none() {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert_eq!(
        rampart.orchestrator().status().last_snapshot_at,
        rampart.store().latest().map(|snapshot| snapshot.timestamp)
    );

    rampart.orchestrator().emergency_shutdown("end of test").await;
    assert_eq!(handle.await.unwrap(), 1);
}
