use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::config::serde_secs;

/// Telemetry store configuration.
///
/// ```rust
/// use std::time::Duration;
/// use servwatch::TelemetryConfig;
///
/// let cfg = TelemetryConfig::from_json_str(r#"{"path": "/tmp/t.db", "retention": 3600}"#).unwrap();
/// assert_eq!(cfg.retention, Duration::from_secs(3600));
/// assert_eq!(cfg.batch_size, 100);
/// ```
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// SQLite database file. Parent directories are created on open.
    pub path: PathBuf,

    /// Records older than this are deleted by the retention sweep.
    #[serde(with = "serde_secs")]
    pub retention: Duration,

    /// Size failsafe: oldest records are evicted while the used database size exceeds this.
    pub max_db_bytes: u64,

    /// Interval between retention sweeps. The first sweep runs at startup.
    #[serde(with = "serde_secs")]
    pub sweep_interval: Duration,

    /// Interval between session heartbeats.
    #[serde(with = "serde_secs")]
    pub heartbeat_interval: Duration,

    /// Capacity of the writer queue; records beyond it are dropped and counted.
    pub queue_capacity: usize,

    /// Maximum number of queued operations written per transaction.
    pub batch_size: usize,
}

impl Default for TelemetryConfig {
    /// - `path = "servwatch.db"`
    /// - `retention = 7 days`
    /// - `max_db_bytes = 500 MiB`
    /// - `sweep_interval = 1h`
    /// - `heartbeat_interval = 30s`
    /// - `queue_capacity = 10_000`
    /// - `batch_size = 100`
    fn default() -> Self {
        Self {
            path: PathBuf::from("servwatch.db"),
            retention: Duration::from_secs(7 * 24 * 3600),
            max_db_bytes: 500 * 1024 * 1024,
            sweep_interval: Duration::from_secs(3600),
            heartbeat_interval: Duration::from_secs(30),
            queue_capacity: 10_000,
            batch_size: 100,
        }
    }
}

impl TelemetryConfig {
    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Default configuration writing to `path`.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}
