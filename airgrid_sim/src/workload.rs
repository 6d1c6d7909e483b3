//! Workloads: which scripts each device gets in each round.

use airgrid_env::{DeviceId, Location, Script};
use rand::seq::index::sample;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;

/// One script bound to a location.
pub type Job = (Arc<dyn Script>, Location);

/// Decides the per-round script list of every device.
pub trait Workload: Send + Sync {
    /// Scripts for `device` in `round`. `tracked` lists the device's own
    /// locations in ascending order.
    fn jobs(&self, round: usize, device: DeviceId, tracked: &[Location]) -> Vec<Job>;
}

/// One script per tracked location, every round.
pub struct EveryLocation {
    script: Arc<dyn Script>,
}

impl EveryLocation {
    pub fn new(script: Arc<dyn Script>) -> Self {
        Self { script }
    }
}

impl Workload for EveryLocation {
    fn jobs(&self, _round: usize, _device: DeviceId, tracked: &[Location]) -> Vec<Job> {
        tracked
            .iter()
            .map(|&location| (Arc::clone(&self.script), location))
            .collect()
    }
}

/// Every device hammers one location, `per_device` times per round.
pub struct Hotspot {
    script: Arc<dyn Script>,
    location: Location,
    per_device: usize,
}

impl Hotspot {
    pub fn new(script: Arc<dyn Script>, location: Location, per_device: usize) -> Self {
        Self {
            script,
            location,
            per_device,
        }
    }
}

impl Workload for Hotspot {
    fn jobs(&self, _round: usize, _device: DeviceId, _tracked: &[Location]) -> Vec<Job> {
        (0..self.per_device)
            .map(|_| (Arc::clone(&self.script), self.location))
            .collect()
    }
}

/// A seeded random subset of tracked locations per device and round.
pub struct Sampled {
    script: Arc<dyn Script>,
    per_round: usize,
    seed: u64,
}

impl Sampled {
    pub fn new(script: Arc<dyn Script>, per_round: usize, seed: u64) -> Self {
        Self {
            script,
            per_round,
            seed,
        }
    }

    fn rng_for(&self, round: usize, device: DeviceId) -> ChaCha8Rng {
        let stream = (round as u64)
            .wrapping_mul(0x9E37_79B9_7F4A_7C15)
            .wrapping_add(device.get() as u64);
        ChaCha8Rng::seed_from_u64(self.seed ^ stream)
    }
}

impl Workload for Sampled {
    fn jobs(&self, round: usize, device: DeviceId, tracked: &[Location]) -> Vec<Job> {
        let amount = self.per_round.min(tracked.len());
        let mut rng = self.rng_for(round, device);
        let mut picked: Vec<usize> = sample(&mut rng, tracked.len(), amount).into_vec();
        picked.sort_unstable();
        picked
            .into_iter()
            .map(|index| (Arc::clone(&self.script), tracked[index]))
            .collect()
    }
}

/// One script per tracked location, switching scripts at a fixed round.
///
/// Rounds before `switch_round` run `before`, later rounds run `after`.
pub struct Phased {
    before: Arc<dyn Script>,
    after: Arc<dyn Script>,
    switch_round: usize,
}

impl Phased {
    pub fn new(before: Arc<dyn Script>, after: Arc<dyn Script>, switch_round: usize) -> Self {
        Self {
            before,
            after,
            switch_round,
        }
    }
}

impl Workload for Phased {
    fn jobs(&self, round: usize, _device: DeviceId, tracked: &[Location]) -> Vec<Job> {
        let script = if round < self.switch_round {
            &self.before
        } else {
            &self.after
        };
        tracked
            .iter()
            .map(|&location| (Arc::clone(script), location))
            .collect()
    }
}

/// Hands out the inner workload in the first round only.
///
/// Combined with standing retention the first-round scripts keep running
/// for the rest of the simulation.
pub struct FirstRoundOnly<W> {
    inner: W,
}

impl<W: Workload> FirstRoundOnly<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl<W: Workload> Workload for FirstRoundOnly<W> {
    fn jobs(&self, round: usize, device: DeviceId, tracked: &[Location]) -> Vec<Job> {
        if round == 0 {
            self.inner.jobs(round, device, tracked)
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripts::{Average, Maximum, Minimum};

    fn tracked() -> Vec<Location> {
        vec![Location(1), Location(4), Location(6), Location(9)]
    }

    #[test]
    fn test_every_location() {
        let jobs = EveryLocation::new(Arc::new(Average)).jobs(3, DeviceId(0), &tracked());
        let locations: Vec<Location> = jobs.iter().map(|(_, l)| *l).collect();
        assert_eq!(locations, tracked());
    }

    #[test]
    fn test_hotspot_ignores_tracking() {
        let jobs = Hotspot::new(Arc::new(Average), Location(2), 3).jobs(0, DeviceId(1), &[]);
        assert_eq!(jobs.len(), 3);
        assert!(jobs.iter().all(|(_, l)| *l == Location(2)));
    }

    #[test]
    fn test_sampled_is_deterministic_subset() {
        let workload = Sampled::new(Arc::new(Average), 2, 42);
        let a: Vec<Location> = workload.jobs(1, DeviceId(3), &tracked()).into_iter().map(|(_, l)| l).collect();
        let b: Vec<Location> = workload.jobs(1, DeviceId(3), &tracked()).into_iter().map(|(_, l)| l).collect();

        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
        assert!(a.iter().all(|l| tracked().contains(l)));

        // Never more than the device tracks
        assert_eq!(Sampled::new(Arc::new(Average), 10, 1).jobs(0, DeviceId(0), &tracked()).len(), 4);
    }

    #[test]
    fn test_first_round_only() {
        let workload = FirstRoundOnly::new(EveryLocation::new(Arc::new(Average)));
        assert_eq!(workload.jobs(0, DeviceId(0), &tracked()).len(), 4);
        assert!(workload.jobs(1, DeviceId(0), &tracked()).is_empty());
    }

    #[test]
    fn test_phased_switches_script() {
        let workload = Phased::new(Arc::new(Minimum), Arc::new(Maximum), 2);
        let names = |round| -> Vec<String> {
            workload
                .jobs(round, DeviceId(0), &tracked())
                .iter()
                .map(|(script, _)| script.name().to_string())
                .collect()
        };

        assert_eq!(names(1), vec!["minimum"; 4]);
        assert_eq!(names(2), vec!["maximum"; 4]);
        assert_eq!(workload.jobs(5, DeviceId(0), &tracked()).len(), 4);
    }
}
