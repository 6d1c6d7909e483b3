//! Error types for the AirGrid collaborator seams.

use thiserror::Error;

/// Errors a script may report instead of a reading.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    /// The script ran but could not produce a value
    #[error("Script failed: {0}")]
    Failed(String),
    
    /// The pooled readings are unusable for this script
    #[error("Invalid script input: {0}")]
    InvalidInput(String),
    
    /// The script was handed no readings at all
    #[error("Script received no readings")]
    EmptyInput,
}

impl ScriptError {
    /// Creates a generic failure.
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
    
    /// Creates an invalid-input error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}
