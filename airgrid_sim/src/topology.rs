//! Per-round neighbour graphs.
//!
//! Neighbourhoods are symmetric and never contain the device itself. Two
//! devices can only be linked if they track at least one common location;
//! otherwise they would have nothing to pool.

use airgrid_env::Location;
use rand::Rng;
use std::collections::BTreeSet;

/// Undirected neighbour graph over device indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    /// Adjacency list: device index -> neighbour indices (ascending)
    adjacency: Vec<Vec<usize>>,
}

impl Topology {
    /// Creates a graph without links.
    pub fn isolated(devices: usize) -> Self {
        Self {
            adjacency: vec![Vec::new(); devices],
        }
    }

    /// Creates a complete graph.
    pub fn complete(devices: usize) -> Self {
        let adjacency = (0..devices)
            .map(|i| (0..devices).filter(|&j| j != i).collect())
            .collect();
        Self { adjacency }
    }

    /// Draws a random graph.
    ///
    /// Each pair of devices that shares a location is linked with
    /// probability `link_probability`.
    pub fn random<R: Rng>(
        device_locations: &[Vec<Location>],
        link_probability: f64,
        rng: &mut R,
    ) -> Self {
        let sets: Vec<BTreeSet<Location>> = device_locations
            .iter()
            .map(|locations| locations.iter().copied().collect())
            .collect();

        let mut topology = Self::isolated(sets.len());
        for i in 0..sets.len() {
            for j in (i + 1)..sets.len() {
                // Draw for every pair so the stream does not depend on overlap
                let linked = rng.gen_bool(link_probability);
                if linked && !sets[i].is_disjoint(&sets[j]) {
                    topology.link(i, j);
                }
            }
        }
        topology
    }

    fn link(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        for (from, to) in [(a, b), (b, a)] {
            let neighbours = &mut self.adjacency[from];
            if let Err(pos) = neighbours.binary_search(&to) {
                neighbours.insert(pos, to);
            }
        }
    }

    /// Returns the neighbours of a device.
    pub fn neighbours(&self, device: usize) -> &[usize] {
        self.adjacency.get(device).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Number of devices in the graph.
    pub fn device_count(&self) -> usize {
        self.adjacency.len()
    }

    /// Number of undirected links.
    pub fn link_count(&self) -> usize {
        self.adjacency.iter().map(Vec::len).sum::<usize>() / 2
    }
}
