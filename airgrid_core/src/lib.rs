//! AirGrid Core - Round-Synchronized Sensor Device Pools
//!
//! A population of simulated sensor devices refines per-location pollution
//! readings round by round. Each device runs a small thread pool that
//! executes scripts over readings pooled from its neighbourhood, and the
//! whole population advances in lockstep.
//!
//! # Synchronization Layers
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     SimulationContext                        │
//! │   LocationLockRegistry (one mutex per location)              │
//! │   device barrier (one party per device)                      │
//! │   abort switch                                               │
//! └──────────────────────────────────────────────────────────────┘
//!        ▲                      ▲                      ▲
//! ┌──────┴───────┐       ┌──────┴───────┐       ┌──────┴───────┐
//! │   Device 0   │       │   Device 1   │  ...  │   Device N   │
//! │ coordinator  │       │ coordinator  │       │ coordinator  │
//! │ workers x K  │       │ workers x K  │       │ workers x K  │
//! │ pool barrier │       │ pool barrier │       │ pool barrier │
//! └──────────────┘       └──────────────┘       └──────────────┘
//! ```
//!
//! - The **pool barrier** (K + 1 parties) keeps a device's threads in the
//!   same round and fences the round reset.
//! - The **device barrier** (N parties, coordinators only) keeps any device
//!   from starting round R + 1 before every device finished round R.
//! - The **location locks** make read-compute-write of one location atomic
//!   across the whole population.
//!
//! # Usage
//!
//! ```ignore
//! use airgrid_core::{Device, DeviceConfig, SimulationContext};
//!
//! let context = SimulationContext::shared();
//! let device = Device::new(id, readings, supervisor, context.clone(), DeviceConfig::default())?;
//! device.setup_devices(&population)?;
//!
//! device.assign_script(Some(script), location);
//! device.assign_script(None, location); // round workload complete
//!
//! device.shutdown()?; // after the supervisor sent Terminate
//! ```

mod barrier;
mod config;
mod context;
mod device;
mod error;
mod registry;
mod scheduler;
mod signal;
mod stats;

#[cfg(test)]
mod testing;

pub use barrier::{BarrierWaitResult, CyclicBarrier};
pub use config::{DeviceConfig, ScriptRetention};
pub use context::SimulationContext;
pub use device::{Assignment, Device, SharedSupervisor};
pub use error::{keep_root_cause, CoreError};
pub use registry::{LocationGuard, LocationLockRegistry};
pub use scheduler::{Role, RoundScheduler};
pub use signal::RoundSignal;
pub use stats::{DeviceStats, StatsSnapshot};
