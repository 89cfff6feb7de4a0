/*!
 * Rampart - resilience layer for a long-running trading process
 *
 * - Error classification with per-category trailing error windows
 * - Per-category circuit breakers with cool-down
 * - Retry with bounded exponential backoff
 * - Five-level graceful degradation and recovery strategies
 * - Emergency shutdown that persists the last snapshot
 * - Append-only JSON snapshots for crash recovery
 */

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod schedule;
pub mod snapshot;

pub use rampart_core_resilience as resilience;

// Re-export commonly used types
pub use config::{LogLevel, RampartConfig};
pub use error::{RampartError, Result};
pub use runtime::Rampart;
pub use schedule::spawn_snapshot_schedule;
pub use snapshot::{OrderRecord, Position, SnapshotSource, SnapshotStore, SystemSnapshot};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
