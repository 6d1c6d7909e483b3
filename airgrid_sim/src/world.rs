//! SimWorld - The simulation harness container.

use crate::error::SimError;
use crate::exporter::RoundFrame;
use crate::supervisor::SimSupervisor;
use crate::topology::Topology;
use crate::workload::Workload;

use airgrid_core::{keep_root_cause, CoreError, Device, DeviceConfig, ScriptRetention, SimulationContext, StatsSnapshot};
use airgrid_env::{DeviceId, Location, Reading};
use rand::seq::index::sample;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Configuration for a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Number of devices to spawn
    pub num_devices: usize,

    /// Size of the location universe
    pub num_locations: usize,

    /// Locations tracked by each device
    pub locations_per_device: usize,

    /// Rounds before the supervisor terminates
    pub rounds: usize,

    /// Worker threads per device
    pub workers: usize,

    /// Chance that two devices sharing a location are neighbours in a round
    pub link_probability: f64,

    /// Assignment lifetime
    pub retention: ScriptRetention,

    /// Mean of the initial pollution readings
    pub reading_mean: f64,

    /// Standard deviation of the initial pollution readings
    pub reading_std: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            num_devices: 6,
            num_locations: 10,
            locations_per_device: 4,
            rounds: 10,
            workers: 7,
            link_probability: 0.5,
            retention: ScriptRetention::PerRound,
            reading_mean: 50.0,
            reading_std: 15.0,
        }
    }
}

impl SimConfig {
    /// Rejects parameters the harness cannot run.
    pub fn validate(&self) -> Result<(), SimError> {
        if self.num_devices == 0 {
            return Err(SimError::config("need at least one device"));
        }
        if self.num_locations == 0 {
            return Err(SimError::config("need at least one location"));
        }
        if self.locations_per_device == 0 || self.locations_per_device > self.num_locations {
            return Err(SimError::config(format!(
                "locations per device must be in 1..={}, got {}",
                self.num_locations, self.locations_per_device
            )));
        }
        if !(0.0..=1.0).contains(&self.link_probability) {
            return Err(SimError::config(format!(
                "link probability must be in [0, 1], got {}",
                self.link_probability
            )));
        }
        if !self.reading_std.is_finite() || self.reading_std < 0.0 || !self.reading_mean.is_finite() {
            return Err(SimError::config("reading distribution must be finite"));
        }
        self.device_config().validate()?;
        Ok(())
    }

    /// Pool configuration handed to every device.
    pub fn device_config(&self) -> DeviceConfig {
        DeviceConfig::default()
            .with_workers(self.workers)
            .with_retention(self.retention)
    }
}

/// Aggregated counters of the whole population.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PopulationStats {
    /// Minimum rounds completed by any device
    pub rounds_completed: u64,
    pub scripts_executed: u64,
    pub scripts_skipped: u64,
}

impl PopulationStats {
    fn collect(snapshots: impl IntoIterator<Item = StatsSnapshot>) -> Self {
        let mut stats = Self {
            rounds_completed: u64::MAX,
            ..Self::default()
        };
        let mut any = false;
        for snapshot in snapshots {
            any = true;
            stats.rounds_completed = stats.rounds_completed.min(snapshot.rounds_completed);
            stats.scripts_executed += snapshot.scripts_executed;
            stats.scripts_skipped += snapshot.scripts_skipped;
        }
        if !any {
            stats.rounds_completed = 0;
        }
        stats
    }
}

/// The SimWorld - container for the entire simulation.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,

    /// Shared simulation context (locks, barrier, abort switch)
    pub context: Arc<SimulationContext>,

    /// Round driver
    pub supervisor: Arc<SimSupervisor>,

    /// Population, index = device id
    pub devices: Vec<Arc<Device>>,
}

impl SimWorld {
    /// Builds the population, its sensor data and every round's topology.
    ///
    /// Devices are created but not started; call [`SimWorld::setup`].
    pub fn new(config: SimConfig, workload: Arc<dyn Workload>) -> Result<Self, SimError> {
        config.validate()?;

        // Derive separate seeds for different subsystems
        let sensor_seed = config.seed;
        let topology_seed = config.seed.wrapping_mul(0x9e3779b97f4a7c15);

        let mut sensor_rng = ChaCha8Rng::seed_from_u64(sensor_seed);
        let mut topology_rng = ChaCha8Rng::seed_from_u64(topology_seed);
        let readings = Normal::new(config.reading_mean, config.reading_std)
            .map_err(|err| SimError::config(err.to_string()))?;

        let placements: Vec<Vec<Location>> = (0..config.num_devices)
            .map(|_| {
                let mut picked =
                    sample(&mut sensor_rng, config.num_locations, config.locations_per_device).into_vec();
                picked.sort_unstable();
                picked.into_iter().map(Location).collect()
            })
            .collect();

        let topologies: Vec<Topology> = (0..config.rounds)
            .map(|_| Topology::random(&placements, config.link_probability, &mut topology_rng))
            .collect();
        let links: usize = topologies.iter().map(Topology::link_count).sum();

        let context = SimulationContext::shared();
        let supervisor = SimSupervisor::new(
            config.num_locations,
            config.retention,
            topologies,
            workload,
            Arc::clone(&context),
        );

        let device_config = config.device_config();
        let devices = placements
            .iter()
            .enumerate()
            .map(|(index, locations)| {
                let data: Vec<(Location, Reading)> = locations
                    .iter()
                    .map(|&location| (location, readings.sample(&mut sensor_rng).max(0.0)))
                    .collect();
                Device::new(
                    DeviceId(index as u32),
                    data,
                    Arc::new(supervisor.handle(index)),
                    Arc::clone(&context),
                    device_config.clone(),
                )
            })
            .collect::<Result<Vec<_>, CoreError>>()?;
        supervisor.attach(&devices)?;

        info!(
            "SimWorld: {} devices, {} locations, {} rounds, {:.1} links/round (seed {})",
            config.num_devices,
            config.num_locations,
            config.rounds,
            links as f64 / config.rounds.max(1) as f64,
            config.seed
        );

        Ok(Self {
            config,
            context,
            supervisor,
            devices,
        })
    }

    /// Starts every device's pool.
    ///
    /// If a device fails to start, the simulation is aborted so already
    /// started pools exit; the caller should still call [`SimWorld::shutdown`].
    pub fn setup(&self) -> Result<(), SimError> {
        for device in &self.devices {
            if let Err(err) = device.setup_devices(&self.devices) {
                self.context.abort(format!("setup of device {} failed: {}", device.id(), err));
                return Err(err.into());
            }
        }
        debug!("All {} device pools started", self.devices.len());
        Ok(())
    }

    /// Drives all rounds and returns the reading frames.
    pub fn run(&self) -> Result<Vec<RoundFrame>, SimError> {
        self.supervisor.drive()
    }

    /// Joins every pool and returns the root-cause failure, if any.
    pub fn shutdown(&self) -> Result<(), CoreError> {
        let mut failure: Option<CoreError> = None;
        for device in &self.devices {
            if let Err(err) = device.shutdown() {
                keep_root_cause(&mut failure, err);
            }
        }
        failure.map_or(Ok(()), Err)
    }

    /// Counters summed over the population.
    pub fn stats(&self) -> PopulationStats {
        PopulationStats::collect(self.devices.iter().map(|device| device.stats()))
    }

    /// Current readings of all devices.
    pub fn snapshot(&self) -> RoundFrame {
        RoundFrame::capture(self.stats().rounds_completed as usize, &self.devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripts::Average;
    use crate::workload::EveryLocation;

    fn workload() -> Arc<dyn Workload> {
        Arc::new(EveryLocation::new(Arc::new(Average)))
    }

    #[test]
    fn test_config_validation() {
        assert!(SimConfig::default().validate().is_ok());

        let bad = [
            SimConfig { num_devices: 0, ..SimConfig::default() },
            SimConfig { locations_per_device: 11, ..SimConfig::default() },
            SimConfig { link_probability: 1.5, ..SimConfig::default() },
            SimConfig { workers: 0, ..SimConfig::default() },
            SimConfig { reading_std: f64::NAN, ..SimConfig::default() },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "{:?}", config);
        }
    }

    #[test]
    fn test_world_is_deterministic() {
        let config = SimConfig { rounds: 0, ..SimConfig::default() };
        let a = SimWorld::new(config.clone(), workload()).unwrap();
        let b = SimWorld::new(config, workload()).unwrap();

        for (x, y) in a.devices.iter().zip(&b.devices) {
            assert_eq!(x.readings(), y.readings());
        }
    }

    #[test]
    fn test_sensor_data_shape() {
        let config = SimConfig { rounds: 0, num_devices: 5, ..SimConfig::default() };
        let world = SimWorld::new(config, workload()).unwrap();

        assert_eq!(world.devices.len(), 5);
        for device in &world.devices {
            let readings = device.readings();
            assert_eq!(readings.len(), 4);
            assert!(readings.keys().all(|l| l.index() < 10));
            assert!(readings.values().all(|&v| v >= 0.0 && v.is_finite()));
        }
    }

    #[test]
    fn test_full_run() {
        let config = SimConfig { rounds: 4, workers: 3, ..SimConfig::default() };
        let world = SimWorld::new(config, workload()).unwrap();
        world.setup().unwrap();
        let frames = world.run().unwrap();
        world.shutdown().unwrap();

        assert_eq!(frames.len(), 5);
        assert_eq!(world.stats().rounds_completed, 4);
        let stats = world.stats();
        assert_eq!(
            stats.scripts_executed + stats.scripts_skipped,
            world.supervisor.expected_runs()
        );
    }

    #[test]
    fn test_population_stats_of_nobody() {
        assert_eq!(PopulationStats::collect(Vec::new()), PopulationStats::default());
    }
}
