//! AirGrid Simulation Harness
//!
//! Builds a seeded population of sensor devices, drives it round by round
//! through a simulated supervisor and checks what came out.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         SimWorld                            │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ SimSupervisor (topology per round + workload)        │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │       │ neighbours / scripts      │                         │
//! │  ┌────▼────┐                 ┌────▼────┐                    │
//! │  │ Device  │◄───readings────►│ Device  │     ...            │
//! │  │   #0    │                 │   #1    │                    │
//! │  └─────────┘                 └─────────┘                    │
//! │       ▲                           ▲                         │
//! │  ┌────┴───────────────────────────┴────┐                    │
//! │  │ SimulationContext (locks, barrier)  │                    │
//! │  └─────────────────────────────────────┘                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything random (sensor placement, initial readings, topologies,
//! sampled workloads) derives from one 64-bit seed. Thread interleaving is
//! not controlled, so final readings may differ between runs of the same
//! seed; the scenario checks only assert interleaving-independent facts.
//!
//! # Usage
//!
//! ```ignore
//! use airgrid_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42, 6).with_rounds(10).run(ScenarioId::Converge);
//! assert!(result.passed);
//! ```

mod error;
mod exporter;
mod runner;
mod supervisor;
mod topology;
mod world;
pub mod scenarios;
pub mod scripts;
pub mod workload;

pub use error::SimError;
pub use exporter::{DeviceFrame, LocationReading, RoundFrame, SimExport};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use supervisor::{DeviceSupervisor, SimSupervisor};
pub use topology::Topology;
pub use world::{PopulationStats, SimConfig, SimWorld};
