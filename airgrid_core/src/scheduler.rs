//! RoundScheduler - the per-device coordinator and worker pool.
//!
//! Every pool thread runs the same round loop; the coordinator additionally
//! does the round bookkeeping and represents the device at the population
//! barrier.
//!
//! # Round State Machine
//!
//! ```text
//!  coordinator            workers (K)
//!  ───────────            ───────────
//!  fetch neighbours
//!  reset cursor
//!  set_neighbours ──┐
//!                   ▼
//!  ═══════ wait neighbours_ready ═══════   Terminate ⇒ every thread exits
//!  ═══════ wait assignment_complete ════
//!  claim → lock location → run → publish   (looped until list exhausted)
//!  ═══════ pool barrier ════════════════
//!  reset_round
//!  ═══════ pool barrier ════════════════
//!  device barrier (one party per device)
//!  └──────────────► next round
//! ```
//!
//! # Failure
//!
//! A thread that fails for its own reasons (script error, non-finite
//! result, out-of-range location, panic) aborts the whole simulation via
//! [`SimulationContext::abort`](crate::SimulationContext::abort). Its peers
//! then leave their barrier or signal waits with a secondary error instead
//! of waiting for an arrival that will never come.

use crate::device::{Assignment, Device};
use crate::error::{keep_root_cause, CoreError};

use airgrid_env::DeviceId;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, trace, warn};

/// Which part of the round loop a pool thread plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Round bookkeeping plus the population barrier
    Coordinator,

    /// Script execution only
    Worker(usize),
}

impl Role {
    /// Returns true for the coordinator.
    pub fn is_coordinator(&self) -> bool {
        matches!(self, Role::Coordinator)
    }

    fn thread_name(&self, device: DeviceId) -> String {
        match self {
            Role::Coordinator => format!("device-{}-coordinator", device),
            Role::Worker(index) => format!("device-{}-worker-{}", device, index),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Coordinator => write!(f, "coordinator"),
            Role::Worker(index) => write!(f, "worker {}", index),
        }
    }
}

struct PoolThread {
    name: String,
    handle: JoinHandle<Result<(), CoreError>>,
}

/// Running pool threads of one device.
pub struct RoundScheduler {
    device: DeviceId,
    threads: Vec<PoolThread>,
}

impl RoundScheduler {
    /// Spawns the coordinator and the configured number of workers.
    pub(crate) fn start(device: &Arc<Device>) -> Result<Self, CoreError> {
        let roles = std::iter::once(Role::Coordinator)
            .chain((0..device.config().workers).map(Role::Worker));
        let mut threads = Vec::with_capacity(device.config().pool_size());

        for role in roles {
            let name = role.thread_name(device.id());
            let pool_device = Arc::clone(device);
            let spawned = thread::Builder::new()
                .name(name.clone())
                .spawn(move || run_pool_thread(pool_device, role));

            match spawned {
                Ok(handle) => threads.push(PoolThread { name, handle }),
                Err(err) => {
                    device
                        .context()
                        .abort(format!("device {} could not spawn {}: {}", device.id(), name, err));
                    for thread in threads {
                        let _ = thread.handle.join();
                    }
                    return Err(CoreError::Spawn(err));
                }
            }
        }

        Ok(Self {
            device: device.id(),
            threads,
        })
    }

    /// Number of pool threads (workers + coordinator).
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// Waits for every pool thread and returns the most telling error.
    pub fn join(self) -> Result<(), CoreError> {
        let mut failure = None;

        for thread in self.threads {
            match thread.handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => keep_root_cause(&mut failure, err),
                Err(_) => keep_root_cause(&mut failure, CoreError::ThreadPanicked(thread.name)),
            }
        }

        if let Some(err) = &failure {
            debug!("Device {} pool joined with error: {}", self.device, err);
        }
        failure.map_or(Ok(()), Err)
    }
}

/// Aborts the simulation if the owning thread unwinds.
struct AbortOnPanic<'a> {
    device: &'a Device,
    role: Role,
}

impl Drop for AbortOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.device.context().abort(format!(
                "device {} {} panicked",
                self.device.id(),
                self.role
            ));
        }
    }
}

fn run_pool_thread(device: Arc<Device>, role: Role) -> Result<(), CoreError> {
    let _panic_guard = AbortOnPanic {
        device: &device,
        role,
    };

    let result = round_loop(&device, role);
    match &result {
        Ok(()) => debug!("Device {} {} exited", device.id(), role),
        Err(err) if err.is_secondary() => {
            debug!("Device {} {} released by abort: {}", device.id(), role, err)
        }
        Err(err) => {
            warn!("Device {} {} failed: {}", device.id(), role, err);
            device
                .context()
                .abort(format!("device {} {}: {}", device.id(), role, err));
        }
    }
    result
}

fn round_loop(device: &Device, role: Role) -> Result<(), CoreError> {
    loop {
        if role.is_coordinator() {
            let neighbourhood = device.fetch_neighbours();
            device.reset_cursor();
            device.set_neighbours(neighbourhood);
        }

        device.neighbours_ready().wait()?;
        let Some(neighbours) = device.neighbour_snapshot() else {
            if role.is_coordinator() {
                info!(
                    "Device {} terminating after {} rounds",
                    device.id(),
                    device.rounds_completed()
                );
            }
            return Ok(());
        };

        device.assignment_complete().wait()?;

        while let Some(assignment) = device.claim_next() {
            if device.context().is_aborted() {
                let reason = device.context().abort_reason().unwrap_or_default();
                return Err(CoreError::aborted(reason));
            }
            process_assignment(device, &neighbours, &assignment)?;
        }
        drop(neighbours);

        device.pool_barrier().wait()?;
        if role.is_coordinator() {
            device.reset_round();
        }
        device.pool_barrier().wait()?;

        if role.is_coordinator() {
            device.counters().round_completed();
            debug!("Device {} completed round {}", device.id(), device.rounds_completed());
            device.context().device_barrier()?.wait()?;
        }
    }
}

/// Runs one assignment under its location lock.
fn process_assignment(
    device: &Device,
    neighbours: &[Arc<Device>],
    assignment: &Assignment,
) -> Result<(), CoreError> {
    let location = assignment.location;
    let registry = device.context().registry()?;
    let _location_guard = registry.acquire(location)?;

    let mut script_data: Vec<f64> = neighbours
        .iter()
        .filter_map(|neighbour| neighbour.get_data(location))
        .collect();
    if let Some(own) = device.get_data(location) {
        script_data.push(own);
    }

    if script_data.is_empty() {
        trace!("Device {}: nobody tracks {}, skipping", device.id(), location);
        device.counters().script_skipped();
        return Ok(());
    }

    let result = assignment
        .script
        .run(&script_data)
        .map_err(|source| CoreError::ScriptExecution {
            device: device.id(),
            location,
            source,
        })?;

    if !result.is_finite() {
        return Err(CoreError::NonFiniteResult {
            device: device.id(),
            location,
            value: result,
        });
    }

    for neighbour in neighbours {
        neighbour.set_data(location, result);
    }
    device.set_data(location, result);
    device.counters().script_executed();

    trace!(
        "Device {}: {} over {} readings at {} -> {:.3}",
        device.id(),
        assignment.script.name(),
        script_data.len(),
        location,
        result
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_names() {
        assert_eq!(Role::Coordinator.thread_name(DeviceId(3)), "device-3-coordinator");
        assert_eq!(Role::Worker(2).thread_name(DeviceId(3)), "device-3-worker-2");
    }

    #[test]
    fn test_role_display() {
        assert!(Role::Coordinator.is_coordinator());
        assert!(!Role::Worker(0).is_coordinator());
        assert_eq!(Role::Worker(5).to_string(), "worker 5");
    }
}
