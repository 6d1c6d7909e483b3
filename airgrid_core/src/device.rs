//! Device - a sensor node with its own round-synchronized worker pool.
//!
//! A device owns the readings for a fixed set of locations and, once set
//! up, a pool of one coordinator and `workers` worker threads (see
//! [`crate::scheduler`]). Per round it receives a neighbour snapshot from
//! its supervisor and a list of (script, location) assignments, runs every
//! assignment over the readings pooled from itself and its neighbours, and
//! writes each result back to everyone in the neighbourhood that tracks the
//! location.
//!
//! # Round State
//!
//! ```text
//!   supervisor ──assign_script(Some)──► assignments ◄──claim_next── workers
//!   supervisor ──assign_script(None)──► assignment_complete
//!   coordinator ──set_neighbours──────► neighbours + neighbours_ready
//!   coordinator ──reset_round─────────► signals lowered, round state dropped
//! ```

use crate::barrier::CyclicBarrier;
use crate::config::{DeviceConfig, ScriptRetention};
use crate::context::SimulationContext;
use crate::error::CoreError;
use crate::scheduler::RoundScheduler;
use crate::signal::RoundSignal;
use crate::stats::{DeviceStats, StatsSnapshot};

use airgrid_env::{DeviceId, Location, Neighbourhood, Reading, Script, Supervisor};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// The supervisor handle a device consults once per round.
pub type SharedSupervisor = Arc<dyn Supervisor<Arc<Device>>>;

/// One unit of round work: run `script` for `location`.
#[derive(Clone)]
pub struct Assignment {
    /// The script to run
    pub script: Arc<dyn Script>,

    /// The location whose readings it reduces
    pub location: Location,
}

impl std::fmt::Debug for Assignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assignment")
            .field("script", &self.script.name())
            .field("location", &self.location)
            .finish()
    }
}

/// Neighbour snapshot for the current round.
#[derive(Default)]
enum NeighbourView {
    /// Between rounds
    #[default]
    Pending,

    /// Set by the coordinator for the running round
    Round(Vec<Arc<Device>>),

    /// The supervisor sent the termination sentinel
    Terminated,
}

/// Lifecycle of the device's thread pool.
enum PoolState {
    Idle,
    Running(RoundScheduler),
    Stopped,
}

/// A simulated sensor node.
pub struct Device {
    /// Stable identity
    id: DeviceId,

    /// Readings; the key set never changes after construction
    sensor_data: HashMap<Location, Mutex<Reading>>,

    /// Topology and round progression
    supervisor: SharedSupervisor,

    /// Registry, population barrier and abort switch shared with peers
    context: Arc<SimulationContext>,

    /// Pool size and assignment retention
    config: DeviceConfig,

    /// Assignments for the running round, in arrival order
    assignments: RwLock<Vec<Assignment>>,

    /// Next assignment index to hand out
    cursor: AtomicUsize,

    /// Neighbour snapshot, valid only within a round
    neighbours: RwLock<NeighbourView>,

    /// Raised by the coordinator once the snapshot is in place
    neighbours_ready: RoundSignal,

    /// Raised by the supervisor once the round's workload is complete
    assignment_complete: RoundSignal,

    /// Rendezvous of the coordinator and all workers
    pool_barrier: CyclicBarrier,

    /// Counters
    stats: DeviceStats,

    /// Pool threads, started by `setup_devices`
    pool: Mutex<PoolState>,
}

impl Device {
    /// Creates a device. No threads run until [`Device::setup_devices`].
    ///
    /// # Arguments
    /// * `id` - Unique device id
    /// * `sensor_data` - Initial (location, reading) pairs; fixes the key set
    /// * `supervisor` - This device's supervisor handle
    /// * `context` - Context shared by every device of the simulation
    /// * `config` - Pool configuration
    ///
    /// # Errors
    /// `InvalidConfiguration` when the pool configuration cannot run.
    pub fn new(
        id: DeviceId,
        sensor_data: impl IntoIterator<Item = (Location, Reading)>,
        supervisor: SharedSupervisor,
        context: Arc<SimulationContext>,
        config: DeviceConfig,
    ) -> Result<Arc<Self>, CoreError> {
        config.validate()?;
        let pool_barrier = CyclicBarrier::new(config.pool_size())?;

        let sensor_data = sensor_data
            .into_iter()
            .map(|(location, reading)| (location, Mutex::new(reading)))
            .collect();

        Ok(Arc::new(Self {
            id,
            sensor_data,
            supervisor,
            context,
            config,
            assignments: RwLock::new(Vec::new()),
            cursor: AtomicUsize::new(0),
            neighbours: RwLock::new(NeighbourView::Pending),
            neighbours_ready: RoundSignal::new(),
            assignment_complete: RoundSignal::new(),
            pool_barrier,
            stats: DeviceStats::default(),
            pool: Mutex::new(PoolState::Idle),
        }))
    }

    /// Returns the device id.
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Returns the pool configuration.
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Returns the shared simulation context.
    pub fn context(&self) -> &Arc<SimulationContext> {
        &self.context
    }

    /// Prepares the simulation and starts this device's pool.
    ///
    /// Sizes the shared lock registry (first caller wins) and the population
    /// barrier for `devices.len()` devices, registers the population for
    /// abort propagation, then spawns the coordinator and worker threads.
    /// Calling it again is harmless: the pool is started once.
    ///
    /// `devices` must be the whole population, including this device.
    pub fn setup_devices(self: &Arc<Self>, devices: &[Arc<Device>]) -> Result<(), CoreError> {
        self.context.ensure_registry(self.supervisor.location_count())?;
        self.context.establish_population(devices.len())?;
        self.context.register(devices);
        self.context.register(std::slice::from_ref(self));

        let mut pool = self.pool.lock();
        if matches!(*pool, PoolState::Idle) {
            let scheduler = RoundScheduler::start(self)?;
            info!(
                "Device {} started {} pool threads",
                self.id,
                scheduler.thread_count()
            );
            *pool = PoolState::Running(scheduler);
        }
        Ok(())
    }

    /// Adds work to the current round, or closes the round's workload.
    ///
    /// `Some(script)` appends `(script, location)` to the assignment list.
    /// `None` is the end-of-workload sentinel: it wakes the pool, and
    /// `location` is ignored. Only the supervisor thread may call this.
    pub fn assign_script(&self, script: Option<Arc<dyn Script>>, location: Location) {
        match script {
            Some(script) => {
                self.assignments.write().push(Assignment { script, location });
            }
            None => {
                debug!(
                    "Device {} workload complete ({} assignments)",
                    self.id,
                    self.assignments.read().len()
                );
                self.assignment_complete.raise();
            }
        }
    }

    /// Closes the round's workload. Same as `assign_script(None, _)`.
    pub fn finish_assignment(&self) {
        self.assign_script(None, Location(0));
    }

    /// Returns the reading for `location`, or `None` if this device does
    /// not track it.
    pub fn get_data(&self, location: Location) -> Option<Reading> {
        self.sensor_data.get(&location).map(|reading| *reading.lock())
    }

    /// Overwrites the reading for `location`. Unknown locations are ignored.
    ///
    /// Callers must hold `location`'s registry lock.
    pub fn set_data(&self, location: Location, value: Reading) {
        if let Some(reading) = self.sensor_data.get(&location) {
            *reading.lock() = value;
        }
    }

    /// Locations tracked by this device, ascending.
    pub fn locations(&self) -> Vec<Location> {
        let mut locations: Vec<Location> = self.sensor_data.keys().copied().collect();
        locations.sort();
        locations
    }

    /// Copies every reading, ordered by location.
    pub fn readings(&self) -> BTreeMap<Location, Reading> {
        self.sensor_data
            .iter()
            .map(|(location, reading)| (*location, *reading.lock()))
            .collect()
    }

    /// Publishes the neighbour snapshot for the round and raises
    /// neighbours-ready. Coordinator only.
    pub fn set_neighbours(&self, neighbourhood: Neighbourhood<Arc<Device>>) {
        let view = match neighbourhood {
            Neighbourhood::Round(neighbours) => NeighbourView::Round(neighbours),
            Neighbourhood::Terminate => NeighbourView::Terminated,
        };
        *self.neighbours.write() = view;
        self.neighbours_ready.raise();
    }

    /// Ends the round: lowers both round signals and drops the neighbour
    /// snapshot and, unless scripts are standing, the assignments.
    ///
    /// Coordinator only, between the two intra-device barriers. Resetting
    /// twice leaves the same state as resetting once.
    pub fn reset_round(&self) {
        self.neighbours_ready.clear();
        self.assignment_complete.clear();
        *self.neighbours.write() = NeighbourView::Pending;
        if self.config.retention == ScriptRetention::PerRound {
            self.assignments.write().clear();
        }
    }

    /// Blocks until every pool thread of this device has exited.
    ///
    /// Returns the first root-cause error a pool thread reported. A device
    /// that was never set up returns immediately.
    pub fn shutdown(&self) -> Result<(), CoreError> {
        let state = std::mem::replace(&mut *self.pool.lock(), PoolState::Stopped);
        let result = match state {
            PoolState::Running(scheduler) => scheduler.join(),
            PoolState::Idle | PoolState::Stopped => Ok(()),
        };

        // Peers hold each other through neighbour snapshots
        *self.neighbours.write() = NeighbourView::Terminated;

        match &result {
            Ok(()) => info!("Device {} shut down", self.id),
            Err(err) => info!("Device {} shut down with error: {}", self.id, err),
        }
        result
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Rounds this device has fully completed.
    pub fn rounds_completed(&self) -> u64 {
        self.stats.rounds_completed()
    }

    // ---------------------------------------------------------------------
    // Pool-side accessors
    // ---------------------------------------------------------------------

    pub(crate) fn fetch_neighbours(&self) -> Neighbourhood<Arc<Device>> {
        self.supervisor.neighbours()
    }

    /// `None` once the termination sentinel has been published.
    pub(crate) fn neighbour_snapshot(&self) -> Option<Vec<Arc<Device>>> {
        match &*self.neighbours.read() {
            NeighbourView::Round(neighbours) => Some(neighbours.clone()),
            NeighbourView::Pending => Some(Vec::new()),
            NeighbourView::Terminated => None,
        }
    }

    pub(crate) fn reset_cursor(&self) {
        self.cursor.store(0, Ordering::Release);
    }

    /// Claims the next unprocessed assignment. The cursor never moves past
    /// the end of the list.
    pub(crate) fn claim_next(&self) -> Option<Assignment> {
        let assignments = self.assignments.read();
        let len = assignments.len();
        let index = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |next| {
                (next < len).then_some(next + 1)
            })
            .ok()?;
        assignments.get(index).cloned()
    }

    pub(crate) fn neighbours_ready(&self) -> &RoundSignal {
        &self.neighbours_ready
    }

    pub(crate) fn assignment_complete(&self) -> &RoundSignal {
        &self.assignment_complete
    }

    pub(crate) fn pool_barrier(&self) -> &CyclicBarrier {
        &self.pool_barrier
    }

    pub(crate) fn counters(&self) -> &DeviceStats {
        &self.stats
    }

    /// Unblocks every pool thread of this device with an error.
    pub(crate) fn abort_round(&self) {
        self.pool_barrier.break_barrier();
        self.neighbours_ready.abort();
        self.assignment_complete.abort();
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Device {}", self.id)
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("locations", &self.sensor_data.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
