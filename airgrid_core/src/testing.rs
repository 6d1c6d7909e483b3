//! Test doubles for driving device pools round by round.

use crate::device::Device;
use airgrid_env::{FnScript, Neighbourhood, Reading, Script, ScriptError, Supervisor};
use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

type RoundProbe = Box<dyn Fn(usize) + Send + Sync>;

/// Hands out a fixed neighbour list for `rounds` rounds, then terminates.
pub(crate) struct StaticSupervisor {
    rounds: usize,
    location_count: usize,
    neighbours: Mutex<Vec<Weak<Device>>>,
    entered: Mutex<usize>,
    cvar: Condvar,
    probe: Option<RoundProbe>,
}

impl StaticSupervisor {
    pub(crate) fn new(rounds: usize, location_count: usize) -> Arc<Self> {
        Arc::new(Self {
            rounds,
            location_count,
            neighbours: Mutex::new(Vec::new()),
            entered: Mutex::new(0),
            cvar: Condvar::new(),
            probe: None,
        })
    }

    /// Calls `probe(round)` every time the device enters a round.
    pub(crate) fn with_probe(
        rounds: usize,
        location_count: usize,
        probe: impl Fn(usize) + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            rounds,
            location_count,
            neighbours: Mutex::new(Vec::new()),
            entered: Mutex::new(0),
            cvar: Condvar::new(),
            probe: Some(Box::new(probe)),
        })
    }

    pub(crate) fn connect(&self, neighbours: &[Arc<Device>]) {
        *self.neighbours.lock() = neighbours.iter().map(Arc::downgrade).collect();
    }

    /// Rounds entered so far, including the terminating fetch.
    pub(crate) fn entered(&self) -> usize {
        *self.entered.lock()
    }

    /// Waits until the device has entered at least `count` rounds.
    pub(crate) fn wait_entered(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut entered = self.entered.lock();
        while *entered < count {
            if self.cvar.wait_until(&mut entered, deadline).timed_out() {
                return *entered >= count;
            }
        }
        true
    }
}

impl Supervisor<Arc<Device>> for StaticSupervisor {
    fn neighbours(&self) -> Neighbourhood<Arc<Device>> {
        let round = {
            let mut entered = self.entered.lock();
            let round = *entered;
            *entered += 1;
            self.cvar.notify_all();
            round
        };

        if let Some(probe) = &self.probe {
            probe(round);
        }

        if round >= self.rounds {
            return Neighbourhood::Terminate;
        }
        Neighbourhood::Round(
            self.neighbours
                .lock()
                .iter()
                .filter_map(Weak::upgrade)
                .collect(),
        )
    }

    fn location_count(&self) -> usize {
        self.location_count
    }
}

/// Waits for every device to enter `round`, then pushes its workload.
pub(crate) fn drive_round(
    devices: &[Arc<Device>],
    supervisors: &[Arc<StaticSupervisor>],
    round: usize,
    assign: impl Fn(&Device),
) {
    for supervisor in supervisors {
        assert!(
            supervisor.wait_entered(round + 1, Duration::from_secs(10)),
            "device never entered round {}",
            round
        );
    }
    for device in devices {
        assign(device);
        device.finish_assignment();
    }
}

pub(crate) fn average() -> Arc<dyn Script> {
    Arc::new(FnScript::new("average", |values: &[Reading]| {
        if values.is_empty() {
            return Err(ScriptError::EmptyInput);
        }
        Ok(values.iter().sum::<f64>() / values.len() as f64)
    }))
}
