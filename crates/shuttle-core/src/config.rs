//! Engine configuration.
//!
//! Plain serde struct; every field has a default so a config file only
//! needs the values it changes. Loading is left to the caller.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on any inter-tick sleep, whatever the configured interval.
pub const MAX_TICK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} must be at least 1")]
    ZeroCapacity(&'static str),
}

/// Which tier the dispatcher tries first each tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOrder {
    #[default]
    PriorityFirst,
    BacklogFirst,
}

/// What the producer does when the priority queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityOverflow {
    /// Wait for room on the backlog instead. Nothing is lost.
    #[default]
    FallbackToBacklog,
    /// Drop the task, log it and count it.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pool_capacity: usize,
    pub priority_capacity: usize,
    pub backlog_capacity: usize,
    pub poll_interval_ms: u64,
    pub shared_dir: PathBuf,
    pub dispatch_order: DispatchOrder,
    pub priority_overflow: PriorityOverflow,
    /// Finished tasks kept in the pool ledger.
    pub ledger_retention: usize,
    /// How long shutdown waits for in-flight tasks.
    pub shutdown_grace_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool_capacity: 8,
            priority_capacity: 64,
            backlog_capacity: 1024,
            poll_interval_ms: 200,
            shared_dir: std::env::temp_dir().join("shuttle"),
            dispatch_order: DispatchOrder::default(),
            priority_overflow: PriorityOverflow::default(),
            ledger_retention: 1024,
            shutdown_grace_secs: 30,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("pool_capacity"));
        }
        if self.priority_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("priority_capacity"));
        }
        if self.backlog_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("backlog_capacity"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// The configured interval clamped to [`MAX_TICK_INTERVAL`].
    pub fn tick_interval(&self) -> Duration {
        self.poll_interval().min(MAX_TICK_INTERVAL)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
