//! Pool configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::priority::DEFAULT_HIGH_PRIORITY_ODDS;

/// Configuration for [`crate::ConnectionPool`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Upper bound on live connections
    pub max_connections: usize,

    /// Idle connections older than this are destroyed by the sweeper
    pub idle_timeout: Duration,

    /// How often permit accounting is checked against live connections
    pub reconcile_interval: Duration,

    /// Probability that a released admission permit goes to high priority waiters
    pub high_priority_odds: f64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 20,
            idle_timeout: Duration::from_secs(60),
            reconcile_interval: Duration::from_secs(5),
            high_priority_odds: DEFAULT_HIGH_PRIORITY_ODDS,
        }
    }
}

impl PoolConfig {
    /// Create a config bounded to `max_connections`
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            ..Self::default()
        }
    }

    /// Build from `NZBSTREAM_POOL_*` environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_connections: std::env::var("NZBSTREAM_POOL_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_connections),
            idle_timeout: std::env::var("NZBSTREAM_POOL_IDLE_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.idle_timeout, Duration::from_secs),
            reconcile_interval: std::env::var("NZBSTREAM_POOL_RECONCILE_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.reconcile_interval, Duration::from_millis),
            high_priority_odds: std::env::var("NZBSTREAM_POOL_HIGH_PRIORITY_ODDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.high_priority_odds),
        }
    }

    /// Set the connection bound
    #[must_use]
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Set the idle timeout
    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Set the reconcile interval
    #[must_use]
    pub fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = interval;
        self
    }

    /// Set the high priority odds
    #[must_use]
    pub fn with_high_priority_odds(mut self, odds: f64) -> Self {
        self.high_priority_odds = odds;
        self
    }

    /// Interval of the idle sweep, half the idle timeout with a floor of 10ms
    pub fn sweep_interval(&self) -> Duration {
        (self.idle_timeout / 2).max(Duration::from_millis(10))
    }
}
