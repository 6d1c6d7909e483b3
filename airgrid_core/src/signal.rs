//! Resettable round signals.
//!
//! A [`RoundSignal`] is a condvar-guarded boolean: raised once per round by
//! its single writer, waited on by every pool thread, and cleared by the
//! coordinator between the two intra-device barriers, when no thread can
//! still be waiting on it.

use crate::error::CoreError;
use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct SignalState {
    raised: bool,
    aborted: bool,
}

/// A binary signal that can be raised, cleared, and aborted.
#[derive(Debug, Default)]
pub struct RoundSignal {
    state: Mutex<SignalState>,
    cvar: Condvar,
}

impl RoundSignal {
    /// Creates a lowered signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the signal and wakes every waiter.
    pub fn raise(&self) {
        let mut state = self.state.lock();
        state.raised = true;
        self.cvar.notify_all();
    }

    /// Lowers the signal. Clearing a lowered signal is a no-op.
    pub fn clear(&self) {
        self.state.lock().raised = false;
    }

    /// Returns true while the signal is raised.
    pub fn is_raised(&self) -> bool {
        self.state.lock().raised
    }

    /// Blocks until the signal is raised.
    ///
    /// # Errors
    /// `Aborted` once [`RoundSignal::abort`] has been called, even if the
    /// signal is also raised.
    pub fn wait(&self) -> Result<(), CoreError> {
        let mut state = self.state.lock();
        loop {
            if state.aborted {
                return Err(CoreError::aborted("round signal aborted"));
            }
            if state.raised {
                return Ok(());
            }
            self.cvar.wait(&mut state);
        }
    }

    /// Permanently fails every current and future `wait`.
    pub fn abort(&self) {
        let mut state = self.state.lock();
        state.aborted = true;
        self.cvar.notify_all();
    }
}
