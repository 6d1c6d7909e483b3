//! Simulated supervisor: hands out neighbourhoods and pushes workloads.
//!
//! # Protocol
//!
//! ```text
//!  device coordinators                    driver (SimSupervisor::drive)
//!  ───────────────────                    ─────────────────────────────
//!  neighbours() for round R  ──entered──▶ wait until every device entered R
//!                                         capture frame R
//!  wait assignment_complete  ◀──────────  assign_script(..) + None per device
//!  run round R
//!  device barrier
//!  neighbours() for round R + 1 ...
//! ```
//!
//! A round's scripts are only pushed once every device has fetched that
//! round's neighbourhood, so a device can never pick up work meant for the
//! next round while still finishing the current one.

use crate::error::SimError;
use crate::exporter::RoundFrame;
use crate::topology::Topology;
use crate::workload::Workload;

use airgrid_core::{CoreError, Device, ScriptRetention, SimulationContext};
use airgrid_env::{Neighbourhood, Supervisor};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How often the driver re-checks the abort switch while waiting.
const ABORT_POLL: Duration = Duration::from_millis(20);

/// Supervisor state shared by all devices of one simulation.
pub struct SimSupervisor {
    rounds: usize,
    location_count: usize,
    retention: ScriptRetention,
    topologies: Vec<Topology>,
    workload: Arc<dyn Workload>,
    context: Arc<SimulationContext>,
    stall_timeout: Duration,

    /// Population, index = device index
    devices: OnceLock<Vec<Weak<Device>>>,

    /// Neighbour fetches per device (rounds entered, terminate included)
    entered: Mutex<Vec<usize>>,
    entered_cvar: Condvar,

    ordering_violations: AtomicU64,
    expected_runs: AtomicU64,
}

impl SimSupervisor {
    /// Creates a supervisor for `topologies.len()` rounds.
    pub fn new(
        location_count: usize,
        retention: ScriptRetention,
        topologies: Vec<Topology>,
        workload: Arc<dyn Workload>,
        context: Arc<SimulationContext>,
    ) -> Arc<Self> {
        let device_count = topologies.first().map_or(0, Topology::device_count);
        Arc::new(Self {
            rounds: topologies.len(),
            location_count,
            retention,
            topologies,
            workload,
            context,
            stall_timeout: Duration::from_secs(30),
            devices: OnceLock::new(),
            entered: Mutex::new(vec![0; device_count]),
            entered_cvar: Condvar::new(),
            ordering_violations: AtomicU64::new(0),
            expected_runs: AtomicU64::new(0),
        })
    }

    /// Returns the handle device `index` talks to.
    pub fn handle(self: &Arc<Self>, index: usize) -> DeviceSupervisor {
        DeviceSupervisor {
            index,
            shared: Arc::clone(self),
        }
    }

    /// Binds the population. Only the first call has an effect.
    pub fn attach(&self, devices: &[Arc<Device>]) -> Result<(), SimError> {
        {
            let mut entered = self.entered.lock();
            if entered.len() != devices.len() {
                if self.rounds > 0 {
                    return Err(SimError::config(format!(
                        "topology covers {} devices, population has {}",
                        entered.len(),
                        devices.len()
                    )));
                }
                entered.resize(devices.len(), 0);
            }
        }
        let _ = self.devices.set(devices.iter().map(Arc::downgrade).collect());
        Ok(())
    }

    /// Number of rounds before the supervisor terminates.
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// Times a device entered a round while someone still lagged behind.
    pub fn ordering_violations(&self) -> u64 {
        self.ordering_violations.load(Ordering::Relaxed)
    }

    /// Script executions the pushed workload should have produced.
    pub fn expected_runs(&self) -> u64 {
        self.expected_runs.load(Ordering::Relaxed)
    }

    /// Runs the simulation to termination.
    ///
    /// Returns one frame per completed round plus the initial one. Fails
    /// with the abort reason if the population aborted, or `Stalled` if no
    /// device made progress for the stall timeout.
    pub fn drive(&self) -> Result<Vec<RoundFrame>, SimError> {
        let devices = self.population()?;
        let mut frames = Vec::with_capacity(self.rounds + 1);
        let mut standing = vec![0u64; devices.len()];

        for round in 0..self.rounds {
            self.wait_entered(round + 1)?;
            frames.push(RoundFrame::capture(round, &devices));

            let mut pushed = 0;
            for (index, device) in devices.iter().enumerate() {
                let jobs = self.workload.jobs(round, device.id(), &device.locations());
                pushed += jobs.len();
                standing[index] += jobs.len() as u64;

                let runs = match self.retention {
                    ScriptRetention::PerRound => jobs.len() as u64,
                    ScriptRetention::Standing => standing[index],
                };
                self.expected_runs.fetch_add(runs, Ordering::Relaxed);

                for (script, location) in jobs {
                    device.assign_script(Some(script), location);
                }
                device.finish_assignment();
            }
            debug!("Round {}: pushed {} scripts to {} devices", round, pushed, devices.len());
        }

        self.wait_entered(self.rounds + 1)?;
        frames.push(RoundFrame::capture(self.rounds, &devices));
        Ok(frames)
    }

    fn population(&self) -> Result<Vec<Arc<Device>>, SimError> {
        let devices = self
            .devices
            .get()
            .ok_or_else(|| SimError::config("supervisor has no population attached"))?;
        devices
            .iter()
            .map(|weak| {
                weak.upgrade()
                    .ok_or_else(|| SimError::config("device dropped before the simulation ended"))
            })
            .collect()
    }

    /// Waits until every device fetched its neighbourhood `count` times.
    fn wait_entered(&self, count: usize) -> Result<(), SimError> {
        let mut entered = self.entered.lock();
        let mut progress = entered.iter().sum::<usize>();
        let mut last_progress = Instant::now();

        loop {
            if entered.iter().all(|&e| e >= count) {
                return Ok(());
            }
            if self.context.is_aborted() {
                let reason = self.context.abort_reason().unwrap_or_default();
                return Err(CoreError::aborted(reason).into());
            }

            let now_progress = entered.iter().sum::<usize>();
            if now_progress != progress {
                progress = now_progress;
                last_progress = Instant::now();
            } else if last_progress.elapsed() >= self.stall_timeout {
                let round = count - 1;
                warn!("No device progress for {:?} waiting for round {}", self.stall_timeout, round);
                return Err(SimError::Stalled { round });
            }

            self.entered_cvar.wait_for(&mut entered, ABORT_POLL);
        }
    }

    fn neighbours_for(&self, index: usize) -> Neighbourhood<Arc<Device>> {
        let round = {
            let mut entered = self.entered.lock();
            let Some(count) = entered.get_mut(index) else {
                warn!("Unknown device index {}, terminating it", index);
                return Neighbourhood::Terminate;
            };
            let round = *count;
            *count += 1;
            self.entered_cvar.notify_all();
            round
        };

        if round >= self.rounds {
            return Neighbourhood::Terminate;
        }
        let Some(devices) = self.devices.get() else {
            warn!("Device {} asked for neighbours before attach", index);
            return Neighbourhood::Terminate;
        };

        // Everyone must have finished round - 1 by now
        let lagging = devices
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|device| device.rounds_completed() < round as u64)
            .count();
        if lagging > 0 {
            self.ordering_violations.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Device {} entered round {} while {} devices lag behind",
                index, round, lagging
            );
        }

        let neighbours = self.topologies[round]
            .neighbours(index)
            .iter()
            .filter_map(|&j| devices.get(j).and_then(Weak::upgrade))
            .collect();
        Neighbourhood::Round(neighbours)
    }
}

/// Per-device view of a [`SimSupervisor`].
pub struct DeviceSupervisor {
    index: usize,
    shared: Arc<SimSupervisor>,
}

impl DeviceSupervisor {
    /// Index of the device this handle serves.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Supervisor<Arc<Device>> for DeviceSupervisor {
    fn neighbours(&self) -> Neighbourhood<Arc<Device>> {
        self.shared.neighbours_for(self.index)
    }

    fn location_count(&self) -> usize {
        self.shared.location_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripts::Average;
    use crate::workload::EveryLocation;
    use airgrid_core::DeviceConfig;
    use airgrid_env::{DeviceId, Location};

    fn population(
        supervisor: &Arc<SimSupervisor>,
        context: &Arc<SimulationContext>,
        data: &[&[(usize, f64)]],
    ) -> Vec<Arc<Device>> {
        data.iter()
            .enumerate()
            .map(|(i, readings)| {
                Device::new(
                    DeviceId(i as u32),
                    readings.iter().map(|&(l, v)| (Location(l), v)),
                    Arc::new(supervisor.handle(i)),
                    Arc::clone(context),
                    DeviceConfig::default().with_workers(2),
                )
                .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_terminates_after_rounds() {
        let context = SimulationContext::shared();
        let supervisor = SimSupervisor::new(
            2,
            ScriptRetention::PerRound,
            vec![Topology::complete(2); 3],
            Arc::new(EveryLocation::new(Arc::new(Average))),
            Arc::clone(&context),
        );
        let devices = population(&supervisor, &context, &[&[(0, 10.0)], &[(0, 20.0), (1, 4.0)]]);
        supervisor.attach(&devices).unwrap();
        for device in &devices {
            device.setup_devices(&devices).unwrap();
        }

        let frames = supervisor.drive().unwrap();
        for device in &devices {
            device.shutdown().unwrap();
        }

        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0].values_at(0), vec![10.0, 20.0]);
        assert_eq!(frames[1].values_at(0), vec![15.0, 15.0]);
        assert!(devices.iter().all(|d| d.rounds_completed() == 3));
        assert_eq!(supervisor.ordering_violations(), 0);
        // Device 0: 1 location, device 1: 2 locations, 3 rounds
        assert_eq!(supervisor.expected_runs(), 9);
    }

    #[test]
    fn test_isolated_devices_keep_their_readings() {
        let context = SimulationContext::shared();
        let supervisor = SimSupervisor::new(
            1,
            ScriptRetention::PerRound,
            vec![Topology::isolated(2); 2],
            Arc::new(EveryLocation::new(Arc::new(Average))),
            Arc::clone(&context),
        );
        let devices = population(&supervisor, &context, &[&[(0, 1.0)], &[(0, 9.0)]]);
        supervisor.attach(&devices).unwrap();
        for device in &devices {
            device.setup_devices(&devices).unwrap();
        }

        let frames = supervisor.drive().unwrap();
        for device in &devices {
            device.shutdown().unwrap();
        }
        assert_eq!(frames.last().unwrap().values_at(0), vec![1.0, 9.0]);
    }

    #[test]
    fn test_attach_rejects_mismatched_population() {
        let context = SimulationContext::shared();
        let supervisor = SimSupervisor::new(
            1,
            ScriptRetention::PerRound,
            vec![Topology::complete(3)],
            Arc::new(EveryLocation::new(Arc::new(Average))),
            Arc::clone(&context),
        );
        let devices = population(&supervisor, &context, &[&[(0, 1.0)]]);
        assert!(matches!(supervisor.attach(&devices), Err(SimError::InvalidConfig(_))));
    }

    #[test]
    fn test_drive_without_population() {
        let supervisor = SimSupervisor::new(
            1,
            ScriptRetention::PerRound,
            vec![Topology::complete(1)],
            Arc::new(EveryLocation::new(Arc::new(Average))),
            SimulationContext::shared(),
        );
        assert!(supervisor.drive().is_err());
    }
}
