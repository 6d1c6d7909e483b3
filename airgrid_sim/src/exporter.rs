//! JSON exporter for reading trajectories.
//!
//! Frame `k` holds the readings after `k` completed rounds; frame 0 is the
//! initial sensor data.

use airgrid_core::Device;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

/// Readings of the whole population between two rounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundFrame {
    /// Rounds completed when this frame was taken
    pub round: usize,

    /// Per-device readings
    pub devices: Vec<DeviceFrame>,
}

/// Readings of one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceFrame {
    pub device_id: u32,
    pub readings: Vec<LocationReading>,
}

/// A single reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationReading {
    pub location: usize,
    pub value: f64,
}

impl RoundFrame {
    /// Captures the readings of every device.
    ///
    /// Only meaningful while no scripts run, i.e. between rounds.
    pub fn capture(round: usize, devices: &[Arc<Device>]) -> Self {
        let devices = devices
            .iter()
            .map(|device| DeviceFrame {
                device_id: device.id().get(),
                readings: device
                    .readings()
                    .into_iter()
                    .map(|(location, value)| LocationReading {
                        location: location.index(),
                        value,
                    })
                    .collect(),
            })
            .collect();
        Self { round, devices }
    }

    /// Readings of one location across all devices that track it.
    pub fn values_at(&self, location: usize) -> Vec<f64> {
        self.devices
            .iter()
            .flat_map(|device| device.readings.iter())
            .filter(|reading| reading.location == location)
            .map(|reading| reading.value)
            .collect()
    }

    /// Distinct locations tracked by anyone, ascending.
    pub fn locations(&self) -> Vec<usize> {
        let mut locations: Vec<usize> = self
            .devices
            .iter()
            .flat_map(|device| device.readings.iter().map(|r| r.location))
            .collect();
        locations.sort_unstable();
        locations.dedup();
        locations
    }

    /// Max minus min per location, averaged over locations.
    pub fn mean_spread(&self) -> f64 {
        let locations = self.locations();
        if locations.is_empty() {
            return 0.0;
        }
        let total: f64 = locations
            .iter()
            .map(|&location| {
                let values = self.values_at(location);
                let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
                let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                hi - lo
            })
            .sum();
        total / locations.len() as f64
    }
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Rounds the population completed
    pub rounds_completed: u64,

    /// All frames
    pub frames: Vec<RoundFrame>,

    /// Final results
    pub passed: bool,

    /// Why the scenario failed, if it did
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            rounds_completed: 0,
            frames: Vec::new(),
            passed: false,
            failure_reason: None,
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: RoundFrame) {
        self.rounds_completed = frame.round as u64;
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>) {
        self.passed = passed;
        self.failure_reason = failure_reason;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn frame() -> RoundFrame {
        RoundFrame {
            round: 2,
            devices: vec![
                DeviceFrame {
                    device_id: 0,
                    readings: vec![
                        LocationReading { location: 0, value: 10.0 },
                        LocationReading { location: 3, value: 4.0 },
                    ],
                },
                DeviceFrame {
                    device_id: 1,
                    readings: vec![LocationReading { location: 0, value: 14.0 }],
                },
            ],
        }
    }

    #[test]
    fn test_frame_queries() {
        let frame = frame();
        assert_eq!(frame.locations(), vec![0, 3]);
        assert_eq!(frame.values_at(0), vec![10.0, 14.0]);
        // (4 + 0) / 2
        assert_relative_eq!(frame.mean_spread(), 2.0);
    }

    #[test]
    fn test_export_json_roundtrip() {
        let mut export = SimExport::new("converge", 42);
        export.add_frame(frame());
        export.finalize(false, Some("diverged".into()));

        let json = serde_json::to_string(&export).unwrap();
        let back: SimExport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.rounds_completed, 2);
        assert_eq!(back.failure_reason.as_deref(), Some("diverged"));
        assert_eq!(back.frames[0].devices[1].readings[0].value, 14.0);
    }

    #[test]
    fn test_passed_export_omits_reason() {
        let mut export = SimExport::new("contention", 1);
        export.finalize(true, None);
        let json = serde_json::to_string(&export).unwrap();
        assert!(!json.contains("failure_reason"));
    }
}
