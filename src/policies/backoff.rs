//! # Restart backoff.
//!
//! [`BackoffPolicy`] maps the number of restarts already attempted for a
//! resource to the delay before the next one:
//!
//! ```text
//! delay(attempts) = clamp(base × multiplier^attempts, max), then jitter
//! ```
//!
//! The base value depends only on `attempts`, so jitter never feeds back into
//! later delays.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use servwatch::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     base: Duration::from_secs(1),
//!     multiplier: 2.0,
//!     max: Duration::from_secs(32),
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.delay_for(0), Duration::from_secs(1));
//! assert_eq!(backoff.delay_for(3), Duration::from_secs(8));
//! assert_eq!(backoff.delay_for(9), Duration::from_secs(32));
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::config::serde_secs;
use crate::policies::jitter::JitterPolicy;

/// Exponential restart backoff.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Delay before the first restart.
    #[serde(with = "serde_secs")]
    pub base: Duration,
    /// Growth factor per attempt (`>= 1.0` expected).
    pub multiplier: f64,
    /// Upper bound for any delay.
    #[serde(with = "serde_secs")]
    pub max: Duration,
    /// Randomization applied after clamping.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// `base = 1s`, `multiplier = 2.0`, `max = 60s`, no jitter.
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            multiplier: 2.0,
            max: Duration::from_secs(60),
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the restart that follows `attempts` earlier restarts.
    ///
    /// Non-finite or negative intermediate values clamp to `max`.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let exp = attempts.min(i32::MAX as u32) as i32;
        let secs = self.base.as_secs_f64() * self.multiplier.powi(exp);

        let clamped = if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        };
        self.jitter.apply(clamped)
    }
}
