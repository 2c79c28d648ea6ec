//! # Supervisor configuration.
//!
//! [`SupervisorConfig`] centralizes the knobs of the supervision runtime.
//! Every field has a documented default; configs can be built in code or
//! deserialized (durations as seconds, fractional allowed):
//!
//! ```rust
//! use std::time::Duration;
//! use servwatch::SupervisorConfig;
//!
//! let cfg = SupervisorConfig::from_json_str(r#"{
//!     "max_restart_attempts": 3,
//!     "backoff": { "base": 0.5, "multiplier": 2.0, "max": 30 },
//!     "grace": 5
//! }"#).unwrap();
//!
//! assert_eq!(cfg.max_restart_attempts, 3);
//! assert_eq!(cfg.backoff.base, Duration::from_millis(500));
//! assert_eq!(cfg.ready_confirm_timeout, Duration::from_secs(30));
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::policies::BackoffPolicy;

/// Runtime configuration for the supervisor and its service watcher.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Restarts allowed per resource before escalation.
    ///
    /// The counter resets only after a restarted resource is both `Running`
    /// and `Ready` (see [`ready_confirm_timeout`](Self::ready_confirm_timeout)).
    pub max_restart_attempts: u32,

    /// Delay schedule between restarts.
    pub backoff: BackoffPolicy,

    /// How long a resource waits for its dependencies before failing its start.
    #[serde(with = "serde_secs")]
    pub startup_timeout: Duration,

    /// How long a resource that reached `Running` has to report `Ready`
    /// before the watcher stops treating it as a candidate for counter reset.
    #[serde(with = "serde_secs")]
    pub ready_confirm_timeout: Duration,

    /// Maximum time to wait for all resources to stop during shutdown.
    #[serde(with = "serde_secs")]
    pub grace: Duration,

    /// Capacity of the event bus ring buffer (min 1).
    pub bus_capacity: usize,
}

impl Default for SupervisorConfig {
    /// - `max_restart_attempts = 5`
    /// - `backoff = BackoffPolicy::default()` (1s, ×2, max 60s)
    /// - `startup_timeout = 30s`
    /// - `ready_confirm_timeout = 30s`
    /// - `grace = 10s`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            max_restart_attempts: 5,
            backoff: BackoffPolicy::default(),
            startup_timeout: Duration::from_secs(30),
            ready_confirm_timeout: Duration::from_secs(30),
            grace: Duration::from_secs(10),
            bus_capacity: 1024,
        }
    }
}

impl SupervisorConfig {
    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

/// `Duration` as (fractional) seconds.
pub(crate) mod serde_secs {
    use std::time::Duration;

    use serde::{de::Error, Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}
