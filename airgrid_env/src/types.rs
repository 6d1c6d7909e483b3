//! Common types shared by the AirGrid crates.

use serde::{Deserialize, Serialize};

/// A pollution reading for one location.
pub type Reading = f64;

/// Unique identifier of a device, stable for the lifetime of a simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

impl DeviceId {
    /// Returns the raw id.
    pub fn get(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a measurement point.
///
/// Locations are dense indices: the lock registry holds one mutex per
/// index in `0..location_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Location(pub usize);

impl Location {
    /// Returns the location as a registry index.
    pub fn index(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}", self.0)
    }
}
