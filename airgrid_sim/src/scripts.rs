//! Aggregation scripts run by the simulated devices.
//!
//! All scripts reject empty input; the device core never calls them with
//! an empty slice, but a script must not rely on that.

use airgrid_env::{Reading, Script, ScriptError};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn non_empty(values: &[Reading]) -> Result<&[Reading], ScriptError> {
    if values.is_empty() {
        Err(ScriptError::EmptyInput)
    } else {
        Ok(values)
    }
}

/// Arithmetic mean.
#[derive(Debug, Clone, Copy, Default)]
pub struct Average;

impl Script for Average {
    fn run(&self, values: &[Reading]) -> Result<Reading, ScriptError> {
        let values = non_empty(values)?;
        Ok(values.iter().sum::<f64>() / values.len() as f64)
    }

    fn name(&self) -> &str {
        "average"
    }
}

/// Smallest reading.
#[derive(Debug, Clone, Copy, Default)]
pub struct Minimum;

impl Script for Minimum {
    fn run(&self, values: &[Reading]) -> Result<Reading, ScriptError> {
        Ok(non_empty(values)?.iter().copied().fold(f64::INFINITY, f64::min))
    }

    fn name(&self) -> &str {
        "minimum"
    }
}

/// Largest reading.
#[derive(Debug, Clone, Copy, Default)]
pub struct Maximum;

impl Script for Maximum {
    fn run(&self, values: &[Reading]) -> Result<Reading, ScriptError> {
        Ok(non_empty(values)?.iter().copied().fold(f64::NEG_INFINITY, f64::max))
    }

    fn name(&self) -> &str {
        "maximum"
    }
}

/// Median; the mean of the two middle readings for even counts.
#[derive(Debug, Clone, Copy, Default)]
pub struct Median;

impl Script for Median {
    fn run(&self, values: &[Reading]) -> Result<Reading, ScriptError> {
        let mut sorted = non_empty(values)?.to_vec();
        if sorted.iter().any(|v| v.is_nan()) {
            return Err(ScriptError::invalid_input("median of NaN"));
        }
        sorted.sort_by(f64::total_cmp);

        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            Ok((sorted[mid - 1] + sorted[mid]) / 2.0)
        } else {
            Ok(sorted[mid])
        }
    }

    fn name(&self) -> &str {
        "median"
    }
}

/// Delegates to an inner script, then fails every call after the first `n`.
pub struct Failing {
    inner: Arc<dyn Script>,
    succeed: u64,
    calls: AtomicU64,
}

impl Failing {
    /// Fails from call `n + 1` on.
    pub fn after(n: u64, inner: Arc<dyn Script>) -> Self {
        Self {
            inner,
            succeed: n,
            calls: AtomicU64::new(0),
        }
    }

    /// Calls seen so far, failed ones included.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl Script for Failing {
    fn run(&self, values: &[Reading]) -> Result<Reading, ScriptError> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if call > self.succeed {
            return Err(ScriptError::failed(format!(
                "injected fault on call {} of {}",
                call,
                self.inner.name()
            )));
        }
        self.inner.run(values)
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Records how many of its executions overlap in time.
///
/// Used to observe location mutual exclusion: when every execution targets
/// the same location, the maximum in-flight count must stay at one.
pub struct Probe {
    inner: Arc<dyn Script>,
    dwell: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicU64,
}

impl Probe {
    /// Wraps `inner`, holding each execution open for `dwell`.
    pub fn new(inner: Arc<dyn Script>, dwell: Duration) -> Self {
        Self {
            inner,
            dwell,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: AtomicU64::new(0),
        }
    }

    /// Highest number of simultaneous executions observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::Acquire)
    }

    /// Completed and running calls.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl Script for Probe {
    fn run(&self, values: &[Reading]) -> Result<Reading, ScriptError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_in_flight.fetch_max(now, Ordering::AcqRel);

        if !self.dwell.is_zero() {
            thread::sleep(self.dwell);
        }
        let result = self.inner.run(values);

        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        result
    }

    fn name(&self) -> &str {
        "probe"
    }
}
