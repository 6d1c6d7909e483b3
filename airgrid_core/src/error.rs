//! Error types for the AirGrid device core.

use airgrid_env::{DeviceId, Location, Reading, ScriptError};
use thiserror::Error;

/// Errors raised by the barrier, lock registry, device and worker pool.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A size, count or setting that can never work (zero parties, zero workers, ...)
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    
    /// A location index beyond the lock registry bound
    #[error("Location {location} out of range (registry holds {bound} locations)")]
    LocationOutOfRange { location: Location, bound: usize },
    
    /// The script collaborator reported an error
    #[error("Device {device}: script failed at {location}: {source}")]
    ScriptExecution {
        device: DeviceId,
        location: Location,
        #[source]
        source: ScriptError,
    },
    
    /// The script collaborator returned NaN or an infinity
    #[error("Device {device}: script returned non-finite value {value} at {location}")]
    NonFiniteResult {
        device: DeviceId,
        location: Location,
        value: Reading,
    },
    
    /// Another party broke the barrier this thread was waiting on
    #[error("Barrier broken")]
    BarrierBroken,
    
    /// The simulation was aborted while this thread was blocked
    #[error("Simulation aborted: {0}")]
    Aborted(String),
    
    /// A pool thread panicked
    #[error("Thread {0} panicked")]
    ThreadPanicked(String),
    
    /// The OS refused to spawn a pool thread
    #[error("Failed to spawn pool thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl CoreError {
    /// Creates an invalid-configuration error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }
    
    /// Creates an abort error.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted(reason.into())
    }
    
    /// Returns true for errors that are only a consequence of another
    /// party's failure (a broken barrier, an aborted wait).
    pub fn is_secondary(&self) -> bool {
        matches!(self, CoreError::BarrierBroken | CoreError::Aborted(_))
    }
}

/// Keeps the first root-cause error, falling back to the first secondary one.
pub fn keep_root_cause(current: &mut Option<CoreError>, candidate: CoreError) {
    match current {
        None => *current = Some(candidate),
        Some(existing) if existing.is_secondary() && !candidate.is_secondary() => {
            *current = Some(candidate);
        }
        Some(_) => {}
    }
}
