//! Pool configuration types
//!
//! [`PoolConfig`] is a plain bag of tunables. Invalid combinations are not
//! rejected: [`PoolConfig::normalize`] replaces them with documented defaults
//! and reports every replacement as a [`ConfigWarning`].

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default hard capacity.
pub const DEFAULT_CAPACITY: usize = 20;
/// Default number of connections opened at construction.
pub const DEFAULT_INITIAL_SIZE: usize = 10;
/// Default acquire wait budget.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(30);
/// Default reaper period.
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(10);
/// `max_wait` values at or below this floor are replaced by the default.
pub const MIN_MAX_WAIT: Duration = Duration::from_millis(10);

/// Configuration for a connection pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of connections (idle + checked out)
    pub capacity: usize,
    /// Connections opened eagerly when the pool is built
    pub initial_size: usize,
    /// How long `acquire` waits once capacity is reached
    #[serde(rename = "max_wait_ms", with = "millis")]
    pub max_wait: Duration,
    /// Whether the background reaper runs
    pub reap_enabled: bool,
    /// Period between reaper scans
    #[serde(rename = "reap_interval_ms", with = "millis")]
    pub reap_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            initial_size: DEFAULT_INITIAL_SIZE,
            max_wait: DEFAULT_MAX_WAIT,
            reap_enabled: true,
            reap_interval: DEFAULT_REAP_INTERVAL,
        }
    }
}

/// A correction applied by [`PoolConfig::normalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// `capacity` was zero.
    Capacity {
        /// The rejected value
        given: usize,
        /// The value used instead
        used: usize,
    },
    /// `initial_size` exceeded `capacity`.
    InitialSize {
        /// The rejected value
        given: usize,
        /// The value used instead
        used: usize,
    },
    /// `max_wait` was at or below [`MIN_MAX_WAIT`].
    MaxWait {
        /// The rejected value
        given: Duration,
        /// The value used instead
        used: Duration,
    },
    /// Reaping was enabled with an interval longer than a third of `max_wait`.
    ReapInterval {
        /// The rejected `(max_wait, reap_interval)` pair
        given: (Duration, Duration),
        /// The pair used instead
        used: (Duration, Duration),
    },
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Capacity { given, used } => {
                write!(f, "capacity {given} must be positive, using {used}")
            }
            Self::InitialSize { given, used } => {
                write!(f, "initial size {given} exceeds capacity, using {used}")
            }
            Self::MaxWait { given, used } => write!(
                f,
                "max wait {}ms is below the {}ms floor, using {}ms",
                given.as_millis(),
                MIN_MAX_WAIT.as_millis(),
                used.as_millis()
            ),
            Self::ReapInterval { given, used } => write!(
                f,
                "reap interval {}ms must be non-zero and at most a third of max wait {}ms, \
                 using max wait {}ms and reap interval {}ms",
                given.1.as_millis(),
                given.0.as_millis(),
                used.0.as_millis(),
                used.1.as_millis()
            ),
        }
    }
}

impl PoolConfig {
    /// Replace invalid settings with defaults.
    ///
    /// Returns the corrected configuration together with one warning per
    /// correction. Each warning is also emitted as a `tracing` warn event.
    #[must_use]
    pub fn normalize(mut self) -> (Self, Vec<ConfigWarning>) {
        let mut warnings = Vec::new();

        if self.capacity == 0 {
            warnings.push(ConfigWarning::Capacity {
                given: self.capacity,
                used: DEFAULT_CAPACITY,
            });
            self.capacity = DEFAULT_CAPACITY;
        }

        if self.initial_size > self.capacity {
            let used = DEFAULT_INITIAL_SIZE.min(self.capacity);
            warnings.push(ConfigWarning::InitialSize {
                given: self.initial_size,
                used,
            });
            self.initial_size = used;
        }

        if self.max_wait <= MIN_MAX_WAIT {
            warnings.push(ConfigWarning::MaxWait {
                given: self.max_wait,
                used: DEFAULT_MAX_WAIT,
            });
            self.max_wait = DEFAULT_MAX_WAIT;
        }

        if self.reap_enabled
            && (self.reap_interval.is_zero() || self.reap_interval * 3 > self.max_wait)
        {
            warnings.push(ConfigWarning::ReapInterval {
                given: (self.max_wait, self.reap_interval),
                used: (DEFAULT_MAX_WAIT, DEFAULT_REAP_INTERVAL),
            });
            self.max_wait = DEFAULT_MAX_WAIT;
            self.reap_interval = DEFAULT_REAP_INTERVAL;
        }

        for warning in &warnings {
            tracing::warn!(%warning, "pool configuration corrected");
        }

        (self, warnings)
    }

    /// Build a configuration from flat key/value properties.
    ///
    /// Recognized keys: `maxConnections`, `initialSize`, `maxWait` (ms),
    /// `releaserInterval` (ms) and `runReleaser`. Missing keys keep their
    /// defaults; values that do not parse are a configuration error.
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            capacity: parse_prop(props, "maxConnections")?.unwrap_or(defaults.capacity),
            initial_size: parse_prop(props, "initialSize")?.unwrap_or(defaults.initial_size),
            max_wait: parse_prop(props, "maxWait")?
                .map_or(defaults.max_wait, Duration::from_millis),
            reap_enabled: parse_prop(props, "runReleaser")?.unwrap_or(defaults.reap_enabled),
            reap_interval: parse_prop(props, "releaserInterval")?
                .map_or(defaults.reap_interval, Duration::from_millis),
        })
    }

    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::configuration_with("invalid pool configuration JSON", e))
    }
}

fn parse_prop<T>(props: &HashMap<String, String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    props
        .get(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| {
                    Error::configuration_with(format!("invalid value {raw:?} for {key}"), e)
                })
        })
        .transpose()
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
