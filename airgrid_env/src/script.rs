//! Script abstraction: the unit of work a device executes per assignment.

use crate::error::ScriptError;
use crate::types::Reading;

/// A computation that reduces the readings pooled for one location
/// (from the device and its current neighbours) into an updated reading.
///
/// Scripts are shared between devices and executed concurrently from many
/// worker threads, so they must be `Send + Sync`. The core serializes
/// executions per location, never per script.
pub trait Script: Send + Sync + 'static {
    /// Runs the script over the pooled readings.
    ///
    /// `values` is never empty when called by the device core: neighbour
    /// readings come first in neighbour order, the executing device's own
    /// reading (if it tracks the location) comes last.
    fn run(&self, values: &[Reading]) -> Result<Reading, ScriptError>;
    
    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "script"
    }
}

/// Adapts a plain function or closure into a [`Script`].
pub struct FnScript<F> {
    name: String,
    func: F,
}

impl<F> FnScript<F>
where
    F: Fn(&[Reading]) -> Result<Reading, ScriptError> + Send + Sync + 'static,
{
    /// Wraps `func` under the given name.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Script for FnScript<F>
where
    F: Fn(&[Reading]) -> Result<Reading, ScriptError> + Send + Sync + 'static,
{
    fn run(&self, values: &[Reading]) -> Result<Reading, ScriptError> {
        (self.func)(values)
    }
    
    fn name(&self) -> &str {
        &self.name
    }
}

impl<F> std::fmt::Debug for FnScript<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnScript").field("name", &self.name).finish()
    }
}
