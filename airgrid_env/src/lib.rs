//! AirGrid Environment Abstraction Layer
//!
//! This crate defines the seams between the AirGrid device core and the
//! collaborators it does not own:
//! - **Supervisor**: decides each device's neighbour set per round and
//!   announces the end of the simulation
//! - **Script**: reduces the pooled readings of one location to a new reading
//!
//! The core only ever talks to these traits, so the same device pool runs
//! against a seeded simulation harness, a hand-written test double, or a
//! real topology service.
//!
//! # Example
//!
//! ```ignore
//! use airgrid_env::{Neighbourhood, Supervisor};
//!
//! struct Lonely;
//!
//! impl<N: Send + Sync + 'static> Supervisor<N> for Lonely {
//!     fn neighbours(&self) -> Neighbourhood<N> {
//!         Neighbourhood::Terminate
//!     }
//!
//!     fn location_count(&self) -> usize {
//!         1
//!     }
//! }
//! ```

mod error;
mod script;
mod supervisor;
mod types;

pub use error::ScriptError;
pub use script::{FnScript, Script};
pub use supervisor::{Neighbourhood, Supervisor};
pub use types::{DeviceId, Location, Reading};
