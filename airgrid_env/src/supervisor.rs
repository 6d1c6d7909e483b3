//! Supervisor abstraction: the owner of topology and round progression.

/// What a supervisor hands a device at the start of a round.
#[derive(Debug, Clone, PartialEq)]
pub enum Neighbourhood<N> {
    /// The device's neighbours for this round (possibly empty)
    Round(Vec<N>),
    
    /// No more rounds: the device must shut its pool down
    Terminate,
}

impl<N> Neighbourhood<N> {
    /// Returns true for the termination sentinel.
    pub fn is_terminate(&self) -> bool {
        matches!(self, Neighbourhood::Terminate)
    }
    
    /// Returns the neighbour list, or `None` for the termination sentinel.
    pub fn into_round(self) -> Option<Vec<N>> {
        match self {
            Neighbourhood::Round(neighbours) => Some(neighbours),
            Neighbourhood::Terminate => None,
        }
    }
}

impl<N> From<Option<Vec<N>>> for Neighbourhood<N> {
    fn from(value: Option<Vec<N>>) -> Self {
        match value {
            Some(neighbours) => Neighbourhood::Round(neighbours),
            None => Neighbourhood::Terminate,
        }
    }
}

/// The per-device view of the supervising infrastructure.
///
/// Each device holds its own supervisor handle. The device's coordinator
/// thread calls [`Supervisor::neighbours`] exactly once per round, at the
/// start of the round, so implementations may count calls to know which
/// round a device has entered.
///
/// # Protocol
///
/// ```text
/// Supervisor                      Device (coordinator)
///     |                                 |
///     |<------- neighbours() -----------|  round r begins
///     |-- Round(list) ----------------->|
///     |-- assign_script(s, loc) ... --->|
///     |-- assign_script(None, _) ------>|  round r workload complete
///     |                                 |  ... scripts run, barriers ...
///     |<------- neighbours() -----------|  round r + 1 begins
///     |-- Terminate ------------------->|  pool exits
/// ```
pub trait Supervisor<N>: Send + Sync + 'static {
    /// Returns the neighbour set for the round the device is entering.
    fn neighbours(&self) -> Neighbourhood<N>;
    
    /// Total number of distinct locations in the simulation.
    ///
    /// Sizes the shared location lock registry.
    fn location_count(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_neighbourhood_from_option() {
        let round: Neighbourhood<u32> = Some(vec![1, 2]).into();
        assert_eq!(round, Neighbourhood::Round(vec![1, 2]));
        assert!(!round.is_terminate());
        
        let done: Neighbourhood<u32> = None.into();
        assert!(done.is_terminate());
        assert_eq!(done.into_round(), None);
    }
}
