//! Error types for the simulation harness.

use airgrid_core::CoreError;
use thiserror::Error;

/// Errors raised while building, driving or exporting a simulation.
#[derive(Debug, Error)]
pub enum SimError {
    /// The simulation parameters are unusable
    #[error("Invalid simulation config: {0}")]
    InvalidConfig(String),

    /// The device core failed
    #[error(transparent)]
    Core(#[from] CoreError),

    /// No device entered the next round within the stall timeout
    #[error("Simulation stalled waiting for round {round}")]
    Stalled { round: usize },

    /// Writing an export failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serializing an export failed
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SimError {
    /// Creates a config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Returns the core error, if this is one.
    pub fn as_core(&self) -> Option<&CoreError> {
        match self {
            SimError::Core(err) => Some(err),
            _ => None,
        }
    }
}
