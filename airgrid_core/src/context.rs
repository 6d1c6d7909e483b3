//! Shared simulation context.
//!
//! Everything that every device of one simulation must agree on lives here
//! instead of in process-wide statics: the location lock registry, the
//! population barrier, and the abort switch. Two contexts never share
//! anything, so several simulations can run side by side in one process.

use crate::barrier::CyclicBarrier;
use crate::device::Device;
use crate::error::CoreError;
use crate::registry::LocationLockRegistry;

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tracing::{debug, error, info};

/// State shared by every device of one simulation.
#[derive(Debug, Default)]
pub struct SimulationContext {
    /// Location locks, sized once by the first device set up
    registry: OnceLock<LocationLockRegistry>,

    /// Population barrier, one party per device coordinator
    device_barrier: RwLock<Option<Arc<CyclicBarrier>>>,

    /// Devices to tear down on abort
    devices: Mutex<Vec<Weak<Device>>>,

    /// Set once by the first failure
    aborted: AtomicBool,

    /// Why the simulation was aborted
    abort_reason: Mutex<Option<String>>,

    /// Lock tables built by `ensure_registry`
    #[cfg(test)]
    registry_builds: std::sync::atomic::AtomicUsize,
}

impl SimulationContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an Arc-wrapped context for sharing across devices.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Sizes the location lock registry if nobody has yet.
    ///
    /// Safe to call concurrently: exactly one registry is ever built and
    /// later callers get it back whatever count they asked for.
    pub fn ensure_registry(&self, location_count: usize) -> Result<&LocationLockRegistry, CoreError> {
        if let Some(registry) = self.registry.get() {
            if registry.len() != location_count {
                debug!(
                    "Lock registry already holds {} locations, ignoring request for {}",
                    registry.len(),
                    location_count
                );
            }
            return Ok(registry);
        }

        if location_count == 0 {
            return Err(CoreError::invalid_config("lock registry needs at least one location"));
        }

        // Only the winning initializer builds the lock table
        Ok(self.registry.get_or_init(|| {
            #[cfg(test)]
            self.registry_builds.fetch_add(1, Ordering::SeqCst);
            info!("Location lock registry sized for {} locations", location_count);
            LocationLockRegistry::with_locks(location_count)
        }))
    }

    /// Returns the location lock registry.
    ///
    /// # Errors
    /// `InvalidConfiguration` before any device has been set up.
    pub fn registry(&self) -> Result<&LocationLockRegistry, CoreError> {
        self.registry
            .get()
            .ok_or_else(|| CoreError::invalid_config("location lock registry not initialized"))
    }

    /// Sizes the population barrier for `device_count` devices.
    ///
    /// Reuses the current barrier when it already has that many parties, so
    /// every device may call this with the same population.
    pub fn establish_population(&self, device_count: usize) -> Result<Arc<CyclicBarrier>, CoreError> {
        let mut slot = self.device_barrier.write();
        if let Some(barrier) = slot.as_ref() {
            if barrier.parties() == device_count {
                return Ok(Arc::clone(barrier));
            }
        }

        let barrier = Arc::new(CyclicBarrier::new(device_count)?);
        info!("Device barrier sized for {} devices", device_count);
        *slot = Some(Arc::clone(&barrier));
        Ok(barrier)
    }

    /// Returns the population barrier.
    pub fn device_barrier(&self) -> Result<Arc<CyclicBarrier>, CoreError> {
        self.device_barrier
            .read()
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| CoreError::invalid_config("device barrier not established"))
    }

    /// Registers devices so an abort can reach them. Duplicates are ignored.
    pub(crate) fn register(&self, devices: &[Arc<Device>]) {
        let mut registered = self.devices.lock();
        registered.retain(|weak| weak.strong_count() > 0);

        for device in devices {
            let known = registered
                .iter()
                .any(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(device)));
            if !known {
                registered.push(Arc::downgrade(device));
            }
        }

        let late_abort = self.is_aborted();
        drop(registered);
        if late_abort {
            for device in devices {
                device.abort_round();
            }
        }
    }

    /// Fails the whole simulation.
    ///
    /// Breaks the population barrier and every registered device's pool
    /// barrier and round signals, so no thread anywhere stays blocked on a
    /// party that will never arrive. Only the first reason is kept.
    pub fn abort(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.aborted.swap(true, Ordering::AcqRel) {
            debug!("Simulation already aborted, dropping reason: {}", reason);
            return;
        }

        error!("Aborting simulation: {}", reason);
        *self.abort_reason.lock() = Some(reason);

        if let Some(barrier) = self.device_barrier.read().as_ref() {
            barrier.break_barrier();
        }

        let devices: Vec<Arc<Device>> = self
            .devices
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for device in devices {
            device.abort_round();
        }
    }

    /// Returns true once the simulation has been aborted.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Returns the reason of the first abort.
    pub fn abort_reason(&self) -> Option<String> {
        self.abort_reason.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_registry_requires_setup() {
        let context = SimulationContext::new();
        assert!(context.registry().is_err());
        assert!(context.device_barrier().is_err());
    }

    #[test]
    fn test_registry_first_writer_wins() {
        let context = SimulationContext::new();
        assert_eq!(context.ensure_registry(5).unwrap().len(), 5);
        assert_eq!(context.ensure_registry(9).unwrap().len(), 5);
        assert_eq!(context.registry().unwrap().len(), 5);
    }

    #[test]
    fn test_registry_concurrent_initialization() {
        let context = SimulationContext::shared();

        let handles: Vec<_> = (1..=8)
            .map(|count| {
                let context = Arc::clone(&context);
                thread::spawn(move || {
                    let registry = context.ensure_registry(count).unwrap();
                    registry as *const LocationLockRegistry as usize
                })
            })
            .collect();

        let addresses: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(addresses.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[test]
    fn test_concurrent_setup_builds_one_registry() {
        const THREADS: usize = 8;

        for _ in 0..30 {
            let context = SimulationContext::shared();
            let start = Arc::new(std::sync::Barrier::new(THREADS));

            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    let context = Arc::clone(&context);
                    let start = Arc::clone(&start);
                    thread::spawn(move || {
                        start.wait();
                        context.ensure_registry(200_000).unwrap().len()
                    })
                })
                .collect();

            for handle in handles {
                assert_eq!(handle.join().unwrap(), 200_000);
            }
            assert_eq!(context.registry_builds.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_zero_locations_rejected_before_init() {
        let context = SimulationContext::new();
        assert!(matches!(
            context.ensure_registry(0),
            Err(CoreError::InvalidConfiguration(_))
        ));
        assert!(context.registry().is_err());
        assert_eq!(context.ensure_registry(2).unwrap().len(), 2);
    }

    #[test]
    fn test_population_barrier_reused_and_resized() {
        let context = SimulationContext::new();
        let first = context.establish_population(3).unwrap();
        let same = context.establish_population(3).unwrap();
        assert!(Arc::ptr_eq(&first, &same));

        let resized = context.establish_population(4).unwrap();
        assert_eq!(resized.parties(), 4);
        assert!(Arc::ptr_eq(&resized, &context.device_barrier().unwrap()));

        assert!(context.establish_population(0).is_err());
    }

    #[test]
    fn test_abort_breaks_device_barrier() {
        let context = SimulationContext::new();
        let barrier = context.establish_population(2).unwrap();

        context.abort("first");
        context.abort("second");

        assert!(context.is_aborted());
        assert_eq!(context.abort_reason().as_deref(), Some("first"));
        assert!(barrier.is_broken());
        assert!(matches!(barrier.wait(), Err(CoreError::BarrierBroken)));
    }
}
