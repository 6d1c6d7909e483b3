//! Per-location mutual exclusion shared by every device of a simulation.

use crate::error::CoreError;
use airgrid_env::Location;
use parking_lot::{Mutex, MutexGuard};

/// One mutex per location index.
///
/// Holding a location's lock is the only thing that makes reading the
/// pooled readings, running the script, and writing the result back look
/// atomic to every other device. The registry never grows: its size is
/// fixed by the first device that sets the simulation up.
#[derive(Debug)]
pub struct LocationLockRegistry {
    locks: Vec<Mutex<()>>,
}

/// Scoped ownership of one location. Dropping it releases the location.
#[must_use = "the location is released as soon as the guard is dropped"]
pub struct LocationGuard<'a> {
    location: Location,
    _guard: MutexGuard<'a, ()>,
}

impl LocationGuard<'_> {
    /// The location this guard holds.
    pub fn location(&self) -> Location {
        self.location
    }
}

impl LocationLockRegistry {
    /// Creates a registry covering locations `0..location_count`.
    ///
    /// # Errors
    /// `InvalidConfiguration` when `location_count` is zero.
    pub fn new(location_count: usize) -> Result<Self, CoreError> {
        if location_count == 0 {
            return Err(CoreError::invalid_config("lock registry needs at least one location"));
        }
        Ok(Self::with_locks(location_count))
    }

    /// Builds the lock table without validation; the caller has already
    /// rejected a zero count.
    pub(crate) fn with_locks(location_count: usize) -> Self {
        Self {
            locks: (0..location_count).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Blocks until `location` is free and takes it.
    ///
    /// # Errors
    /// `LocationOutOfRange` when the index is beyond the registry bound.
    pub fn acquire(&self, location: Location) -> Result<LocationGuard<'_>, CoreError> {
        let lock = self.locks.get(location.index()).ok_or(CoreError::LocationOutOfRange {
            location,
            bound: self.locks.len(),
        })?;

        Ok(LocationGuard {
            location,
            _guard: lock.lock(),
        })
    }

    /// Releases a location early. Equivalent to dropping the guard.
    pub fn release(guard: LocationGuard<'_>) {
        drop(guard);
    }

    /// Number of locations covered.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Always false: a registry covers at least one location.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Returns true if `location` is within the registry bound.
    pub fn contains(&self, location: Location) -> bool {
        location.index() < self.locks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_empty_registry_rejected() {
        assert!(matches!(
            LocationLockRegistry::new(0),
            Err(CoreError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_out_of_range_location() {
        let registry = LocationLockRegistry::new(4).unwrap();
        assert!(registry.contains(Location(3)));
        assert!(!registry.contains(Location(4)));

        match registry.acquire(Location(4)) {
            Err(CoreError::LocationOutOfRange { location, bound }) => {
                assert_eq!(location, Location(4));
                assert_eq!(bound, 4);
            }
            _ => panic!("expected LocationOutOfRange"),
        };
    }

    #[test]
    fn test_distinct_locations_do_not_block() {
        let registry = LocationLockRegistry::new(2).unwrap();
        let a = registry.acquire(Location(0)).unwrap();
        let b = registry.acquire(Location(1)).unwrap();
        assert_eq!(a.location(), Location(0));
        assert_eq!(b.location(), Location(1));
        LocationLockRegistry::release(a);
        let again = registry.acquire(Location(0)).unwrap();
        assert_eq!(again.location(), Location(0));
    }

    #[test]
    fn test_mutual_exclusion_under_stress() {
        let registry = Arc::new(LocationLockRegistry::new(3).unwrap());
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let total = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let in_flight = Arc::clone(&in_flight);
                let max_seen = Arc::clone(&max_seen);
                let total = Arc::clone(&total);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let _guard = registry.acquire(Location(1)).unwrap();
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        total.fetch_add(1, Ordering::Relaxed);
                        thread::yield_now();
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(total.load(Ordering::Relaxed), 16 * 500);
    }
}
