//! Reusable N-party rendezvous.
//!
//! Every device pool owns one [`CyclicBarrier`] sized to its thread count,
//! and the simulation context owns one sized to the device population.
//!
//! # Cycle Safety
//!
//! The barrier counts down under its mutex. The last arrival of a cycle
//! refills the counter and bumps the generation in the same critical
//! section, then wakes everyone. A waiter only leaves once the generation
//! it arrived in has passed, so a thread that has already re-entered
//! `wait()` for cycle K+1 can never be released by the tail of cycle K,
//! and spurious condvar wakeups just loop back to sleep.
//!
//! # Breaking
//!
//! A party that can no longer arrive (its worker failed or panicked) must
//! call [`CyclicBarrier::break_barrier`]. Every current and future waiter
//! then returns [`CoreError::BarrierBroken`] instead of blocking forever.

use crate::error::CoreError;
use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
struct BarrierState {
    /// Arrivals still missing in the current cycle
    remaining: usize,

    /// Completed cycles
    generation: u64,

    /// Set once a party gave up; never cleared
    broken: bool,
}

/// Outcome of a successful [`CyclicBarrier::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierWaitResult {
    leader: bool,
    generation: u64,
}

impl BarrierWaitResult {
    /// True for exactly one party per cycle: the arrival that released the others.
    pub fn is_leader(&self) -> bool {
        self.leader
    }

    /// The cycle this wait belonged to (0-based).
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// A barrier that `parties` threads pass together, cycle after cycle.
#[derive(Debug)]
pub struct CyclicBarrier {
    parties: usize,
    state: Mutex<BarrierState>,
    cvar: Condvar,
}

impl CyclicBarrier {
    /// Creates a barrier for `parties` threads.
    ///
    /// # Errors
    /// `InvalidConfiguration` when `parties` is zero.
    pub fn new(parties: usize) -> Result<Self, CoreError> {
        if parties == 0 {
            return Err(CoreError::invalid_config("barrier party count must be positive"));
        }

        Ok(Self {
            parties,
            state: Mutex::new(BarrierState {
                remaining: parties,
                generation: 0,
                broken: false,
            }),
            cvar: Condvar::new(),
        })
    }

    /// Blocks until `parties` threads have called `wait` in this cycle.
    ///
    /// # Errors
    /// `BarrierBroken` if the barrier is or becomes broken before this
    /// cycle completes.
    pub fn wait(&self) -> Result<BarrierWaitResult, CoreError> {
        let mut state = self.state.lock();
        if state.broken {
            return Err(CoreError::BarrierBroken);
        }

        let generation = state.generation;
        state.remaining -= 1;

        if state.remaining == 0 {
            state.remaining = self.parties;
            state.generation = generation.wrapping_add(1);
            self.cvar.notify_all();
            return Ok(BarrierWaitResult { leader: true, generation });
        }

        while state.generation == generation && !state.broken {
            self.cvar.wait(&mut state);
        }

        if state.generation == generation {
            // Broken before our cycle completed
            return Err(CoreError::BarrierBroken);
        }

        Ok(BarrierWaitResult { leader: false, generation })
    }

    /// Permanently breaks the barrier and wakes all waiters.
    pub fn break_barrier(&self) {
        let mut state = self.state.lock();
        if !state.broken {
            state.broken = true;
            self.cvar.notify_all();
        }
    }

    /// Returns true once the barrier has been broken.
    pub fn is_broken(&self) -> bool {
        self.state.lock().broken
    }

    /// Number of parties per cycle.
    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Number of parties currently blocked in this cycle.
    pub fn waiting(&self) -> usize {
        let state = self.state.lock();
        self.parties - state.remaining
    }

    /// Number of completed cycles.
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::Duration;

    /// Runs `parties` threads through `cycles` cycles and checks that no
    /// thread ever gets ahead of a cycle that is still filling up.
    fn run_cycles(parties: usize, cycles: usize) {
        let barrier = Arc::new(CyclicBarrier::new(parties).unwrap());
        let arrivals = Arc::new(AtomicUsize::new(0));
        let leaders = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..parties)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                let arrivals = Arc::clone(&arrivals);
                let leaders = Arc::clone(&leaders);
                thread::spawn(move || {
                    for cycle in 0..cycles {
                        arrivals.fetch_add(1, Ordering::SeqCst);
                        let result = barrier.wait().unwrap();
                        assert_eq!(result.generation(), cycle as u64);

                        // Everyone of this cycle has arrived; nobody of the
                        // next cycle can have been counted without us.
                        let seen = arrivals.load(Ordering::SeqCst);
                        assert!(seen >= (cycle + 1) * parties);
                        assert!(seen <= (cycle + 2) * parties - 1);

                        if result.is_leader() {
                            leaders.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(leaders.load(Ordering::SeqCst), cycles);
        assert_eq!(barrier.generation(), cycles as u64);
        assert_eq!(barrier.waiting(), 0);
    }

    #[test]
    fn test_zero_parties_rejected() {
        assert!(matches!(CyclicBarrier::new(0), Err(CoreError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_single_party_never_blocks() {
        let barrier = CyclicBarrier::new(1).unwrap();
        for cycle in 0..5 {
            let result = barrier.wait().unwrap();
            assert!(result.is_leader());
            assert_eq!(result.generation(), cycle);
        }
    }

    #[test]
    fn test_reuse_across_cycles() {
        run_cycles(8, 50);
    }

    #[test]
    fn test_waiter_not_released_early() {
        let barrier = Arc::new(CyclicBarrier::new(3).unwrap());
        let (tx, rx) = mpsc::channel();

        for _ in 0..2 {
            let barrier = Arc::clone(&barrier);
            let tx = tx.clone();
            thread::spawn(move || {
                let _ = tx.send(barrier.wait().is_ok());
            });
        }

        // Two of three parties: nobody may pass yet
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        assert!(barrier.wait().unwrap().is_leader());
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
    }

    #[test]
    fn test_break_releases_waiters() {
        let barrier = Arc::new(CyclicBarrier::new(3).unwrap());
        let (tx, rx) = mpsc::channel();

        for _ in 0..2 {
            let barrier = Arc::clone(&barrier);
            let tx = tx.clone();
            thread::spawn(move || {
                let _ = tx.send(barrier.wait());
            });
        }

        while barrier.waiting() < 2 {
            thread::yield_now();
        }
        barrier.break_barrier();

        for _ in 0..2 {
            let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert!(matches!(result, Err(CoreError::BarrierBroken)));
        }

        // Stays broken for later arrivals
        assert!(barrier.is_broken());
        assert!(matches!(barrier.wait(), Err(CoreError::BarrierBroken)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_every_cycle_releases_all_parties(parties in 1usize..7, cycles in 1usize..6) {
            run_cycles(parties, cycles);
        }
    }
}
