/*!
 * Mutex Configuration
 *
 * Construction-time tuning for the spin phase and the wake policy
 */

use crate::core::errors::{MutexError, MutexResult};
use crate::core::limits::{
    DEFAULT_SPIN_ITERATIONS, DEFAULT_SPIN_YIELD_BURST, LONG_WAIT_SPIN_ITERATIONS,
    LOW_LATENCY_SPIN_ITERATIONS, MAX_PARK_TIMEOUT, MAX_SPIN_ITERATIONS, MAX_SPIN_YIELD_BURST,
    MIN_PARK_TIMEOUT,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

pub const ENV_SPIN_ITERATIONS: &str = "ADAPTIVE_MUTEX_SPIN_ITERATIONS";
pub const ENV_SPIN_YIELD_BURST: &str = "ADAPTIVE_MUTEX_SPIN_YIELD_BURST";
pub const ENV_WAKE_ANY: &str = "ADAPTIVE_MUTEX_WAKE_ANY";
pub const ENV_PARK_TIMEOUT_US: &str = "ADAPTIVE_MUTEX_PARK_TIMEOUT_US";

/// Adaptive mutex configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MutexConfig {
    /// Bound on the spin-privilege holder's reload loop
    pub spin_iterations: u32,
    /// `spin_loop` hints between two reloads
    pub spin_yield_burst: u32,
    /// Let the OS pick any parked thread instead of the oldest one
    pub wake_any: bool,
    /// Re-validate the lock word this often while parked
    pub park_timeout: Option<Duration>,
}

impl MutexConfig {
    pub const DEFAULT: Self = Self {
        spin_iterations: DEFAULT_SPIN_ITERATIONS,
        spin_yield_burst: DEFAULT_SPIN_YIELD_BURST,
        wake_any: true,
        park_timeout: None,
    };

    /// Configuration optimized for short critical sections (< 1µs hold time)
    pub const fn low_latency() -> Self {
        Self {
            spin_iterations: LOW_LATENCY_SPIN_ITERATIONS,
            ..Self::DEFAULT
        }
    }

    /// Configuration optimized for long hold times (> 1ms expected)
    pub const fn long_wait() -> Self {
        Self {
            spin_iterations: LONG_WAIT_SPIN_ITERATIONS,
            spin_yield_burst: 1,
            ..Self::DEFAULT
        }
    }

    pub const fn with_spin_iterations(mut self, spin_iterations: u32) -> Self {
        self.spin_iterations = spin_iterations;
        self
    }

    pub const fn with_wake_any(mut self, wake_any: bool) -> Self {
        self.wake_any = wake_any;
        self
    }

    pub const fn with_park_timeout(mut self, park_timeout: Option<Duration>) -> Self {
        self.park_timeout = park_timeout;
        self
    }

    pub fn validate(&self) -> MutexResult<()> {
        if self.spin_iterations > MAX_SPIN_ITERATIONS {
            return Err(MutexError::InvalidConfig(format!(
                "spin_iterations {} exceeds {}",
                self.spin_iterations, MAX_SPIN_ITERATIONS
            )));
        }
        if self.spin_yield_burst == 0 || self.spin_yield_burst > MAX_SPIN_YIELD_BURST {
            return Err(MutexError::InvalidConfig(format!(
                "spin_yield_burst {} outside 1..={}",
                self.spin_yield_burst, MAX_SPIN_YIELD_BURST
            )));
        }
        if let Some(timeout) = self.park_timeout {
            if timeout < MIN_PARK_TIMEOUT || timeout > MAX_PARK_TIMEOUT {
                return Err(MutexError::InvalidConfig(format!(
                    "park_timeout {:?} outside {:?}..={:?}",
                    timeout, MIN_PARK_TIMEOUT, MAX_PARK_TIMEOUT
                )));
            }
        }
        Ok(())
    }

    /// Same checks as [`validate`](Self::validate), usable in const context
    pub const fn is_valid(&self) -> bool {
        let timeout_ok = match self.park_timeout {
            Some(timeout) => {
                let nanos = timeout.as_nanos();
                nanos >= MIN_PARK_TIMEOUT.as_nanos() && nanos <= MAX_PARK_TIMEOUT.as_nanos()
            }
            None => true,
        };
        self.spin_iterations <= MAX_SPIN_ITERATIONS
            && self.spin_yield_burst >= 1
            && self.spin_yield_burst <= MAX_SPIN_YIELD_BURST
            && timeout_ok
    }

    /// Load from `ADAPTIVE_MUTEX_*` environment variables, defaulting unset ones
    pub fn from_env() -> MutexResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key/value source
    pub fn from_lookup<F>(lookup: F) -> MutexResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::DEFAULT;

        if let Some(v) = parse_var::<u32, _>(&lookup, ENV_SPIN_ITERATIONS)? {
            config.spin_iterations = v;
        }
        if let Some(v) = parse_var::<u32, _>(&lookup, ENV_SPIN_YIELD_BURST)? {
            config.spin_yield_burst = v;
        }
        if let Some(raw) = lookup(ENV_WAKE_ANY) {
            config.wake_any = parse_flag(&raw).ok_or_else(|| {
                MutexError::InvalidConfig(format!("{ENV_WAKE_ANY}={raw:?} is not a boolean"))
            })?;
        }
        if let Some(us) = parse_var::<u64, _>(&lookup, ENV_PARK_TIMEOUT_US)? {
            config.park_timeout = (us > 0).then(|| Duration::from_micros(us));
        }

        config.validate()?;
        debug!(?config, "Loaded mutex configuration");
        Ok(config)
    }
}

impl Default for MutexConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> MutexResult<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| MutexError::InvalidConfig(format!("{key}={raw:?} is not a number"))),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
