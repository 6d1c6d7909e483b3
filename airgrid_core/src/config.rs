//! Device pool configuration.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};

/// What happens to a device's assignment list when a round ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptRetention {
    /// Assignments are dropped at the end of every round
    #[default]
    PerRound,
    
    /// Assignments accumulate and every script runs again each round
    Standing,
}

/// Configuration for one device's worker pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Worker threads per device, not counting the coordinator (default: 7)
    pub workers: usize,
    
    /// Assignment lifetime (default: per round)
    pub retention: ScriptRetention,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            workers: 7,
            retention: ScriptRetention::PerRound,
        }
    }
}

impl DeviceConfig {
    /// Sets the worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
    
    /// Sets the retention policy.
    pub fn with_retention(mut self, retention: ScriptRetention) -> Self {
        self.retention = retention;
        self
    }
    
    /// Threads that rendezvous on the intra-device barrier (workers + coordinator).
    pub fn pool_size(&self) -> usize {
        self.workers + 1
    }
    
    /// Rejects configurations that cannot run.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.workers == 0 {
            return Err(CoreError::invalid_config("a device needs at least one worker thread"));
        }
        Ok(())
    }
}
