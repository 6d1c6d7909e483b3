//! Scenario runner - builds a world, drives it and checks the outcome.

use crate::error::SimError;
use crate::exporter::{RoundFrame, SimExport};
use crate::scenarios::ScenarioId;
use crate::scripts::{Average, Failing, Maximum, Median, Minimum, Probe};
use crate::workload::{EveryLocation, FirstRoundOnly, Hotspot, Phased, Sampled, Workload};
use crate::world::{PopulationStats, SimConfig, SimWorld};

use airgrid_core::{CoreError, ScriptRetention};
use airgrid_env::Location;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Slack for float comparisons of averaged readings.
const EPSILON: f64 = 1e-9;

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Rounds completed by the slowest device
    pub rounds_completed: u64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioMetrics {
    /// Scripts that ran and published a result
    pub scripts_executed: u64,

    /// Scripts claimed for a location nobody in the neighbourhood tracks
    pub scripts_skipped: u64,

    /// Executions the pushed workload called for
    pub expected_runs: u64,

    /// Rounds entered while another device lagged behind
    pub ordering_violations: u64,

    /// Highest overlap of probed executions (contention only)
    pub max_concurrency: usize,

    /// Mean per-location reading spread before the first round
    pub initial_spread: f64,

    /// Mean per-location reading spread at the end
    pub final_spread: f64,
}

/// What a simulation run left behind.
struct Outcome {
    frames: Vec<RoundFrame>,
    drive_error: Option<SimError>,
    shutdown_error: Option<CoreError>,
    stats: PopulationStats,
    expected_runs: u64,
    ordering_violations: u64,
}

impl Outcome {
    fn metrics(&self) -> ScenarioMetrics {
        ScenarioMetrics {
            scripts_executed: self.stats.scripts_executed,
            scripts_skipped: self.stats.scripts_skipped,
            expected_runs: self.expected_runs,
            ordering_violations: self.ordering_violations,
            max_concurrency: 0,
            initial_spread: self.frames.first().map_or(0.0, RoundFrame::mean_spread),
            final_spread: self.frames.last().map_or(0.0, RoundFrame::mean_spread),
        }
    }

    /// Failure checks shared by every scenario that should run to the end.
    fn clean_run_failure(&self, rounds: usize) -> Option<String> {
        if let Some(err) = &self.drive_error {
            return Some(format!("driver failed: {}", err));
        }
        if let Some(err) = &self.shutdown_error {
            return Some(format!("device failed: {}", err));
        }
        if self.stats.rounds_completed != rounds as u64 {
            return Some(format!(
                "completed {} of {} rounds",
                self.stats.rounds_completed, rounds
            ));
        }
        if self.ordering_violations > 0 {
            return Some(format!(
                "{} devices entered a round before everyone finished the previous one",
                self.ordering_violations
            ));
        }
        let runs = self.stats.scripts_executed + self.stats.scripts_skipped;
        if runs != self.expected_runs {
            return Some(format!(
                "ran {} scripts, workload called for {}",
                runs, self.expected_runs
            ));
        }
        None
    }
}

/// Runs stress scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Number of devices
    num_devices: usize,

    /// Size of the location universe
    num_locations: usize,

    /// Rounds per run
    rounds: usize,

    /// Worker threads per device
    workers: usize,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64, num_devices: usize) -> Self {
        Self {
            seed,
            num_devices,
            num_locations: 10,
            rounds: 10,
            workers: 7,
        }
    }

    /// Sets the number of rounds.
    pub fn with_rounds(mut self, rounds: usize) -> Self {
        self.rounds = rounds;
        self
    }

    /// Sets the number of locations.
    pub fn with_locations(mut self, locations: usize) -> Self {
        self.num_locations = locations;
        self
    }

    /// Sets the worker threads per device.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.execute(scenario).0
    }

    /// Runs a scenario and also returns its reading trajectory.
    pub fn run_exported(&self, scenario: ScenarioId) -> (ScenarioResult, SimExport) {
        let (result, frames) = self.execute(scenario);

        let mut export = SimExport::new(scenario.name(), self.seed);
        for frame in frames {
            export.add_frame(frame);
        }
        export.finalize(result.passed, result.failure_reason.clone());
        (result, export)
    }

    fn execute(&self, scenario: ScenarioId) -> (ScenarioResult, Vec<RoundFrame>) {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let run = match scenario {
            ScenarioId::Converge => self.run_converge(),
            ScenarioId::Contention => self.run_contention(),
            ScenarioId::Churn => self.run_churn(),
            ScenarioId::Fault => self.run_fault(),
            ScenarioId::Extremes => self.run_extremes(),
        };

        match run {
            Ok((outcome, failure, max_concurrency)) => {
                let mut metrics = outcome.metrics();
                metrics.max_concurrency = max_concurrency;
                let result = ScenarioResult {
                    scenario,
                    seed: self.seed,
                    passed: failure.is_none(),
                    rounds_completed: outcome.stats.rounds_completed,
                    failure_reason: failure,
                    metrics,
                };
                if let Some(reason) = &result.failure_reason {
                    warn!("Scenario {} failed: {}", scenario, reason);
                }
                (result, outcome.frames)
            }
            Err(err) => {
                warn!("Scenario {} could not run: {}", scenario, err);
                let result = ScenarioResult {
                    scenario,
                    seed: self.seed,
                    passed: false,
                    rounds_completed: 0,
                    failure_reason: Some(err.to_string()),
                    metrics: ScenarioMetrics::default(),
                };
                (result, Vec::new())
            }
        }
    }

    fn base_config(&self) -> SimConfig {
        let defaults = SimConfig::default();
        SimConfig {
            seed: self.seed,
            num_devices: self.num_devices,
            num_locations: self.num_locations,
            locations_per_device: defaults.locations_per_device.min(self.num_locations),
            rounds: self.rounds,
            workers: self.workers,
            ..defaults
        }
    }

    /// Builds, drives and joins a world.
    fn simulate(&self, config: SimConfig, workload: Arc<dyn Workload>) -> Result<Outcome, SimError> {
        let world = SimWorld::new(config, workload)?;

        let driven = world.setup().and_then(|()| world.run());
        if driven.is_err() && !world.context.is_aborted() {
            world.context.abort("simulation driver failed");
        }
        let shutdown_error = world.shutdown().err();

        let (frames, drive_error) = match driven {
            Ok(frames) => (frames, None),
            Err(err) => (vec![world.snapshot()], Some(err)),
        };
        debug!(
            "Simulation finished: {} frames, aborted={}",
            frames.len(),
            world.context.is_aborted()
        );

        Ok(Outcome {
            frames,
            drive_error,
            shutdown_error,
            stats: world.stats(),
            expected_runs: world.supervisor.expected_runs(),
            ordering_violations: world.supervisor.ordering_violations(),
        })
    }

    /// Averaging: every reading stays inside the initial per-location range,
    /// and the range never widens.
    fn run_converge(&self) -> Result<(Outcome, Option<String>, usize), SimError> {
        let config = SimConfig {
            link_probability: 0.6,
            ..self.base_config()
        };
        let outcome = self.simulate(config, Arc::new(EveryLocation::new(Arc::new(Average))))?;

        let failure = outcome
            .clean_run_failure(self.rounds)
            .or_else(|| bounds_violation(&outcome.frames))
            .or_else(|| {
                let metrics = outcome.metrics();
                (metrics.final_spread > metrics.initial_spread + EPSILON).then(|| {
                    format!(
                        "spread grew from {:.4} to {:.4}",
                        metrics.initial_spread, metrics.final_spread
                    )
                })
            });

        info!(
            "Converge: spread {:.3} -> {:.3}",
            outcome.metrics().initial_spread,
            outcome.metrics().final_spread
        );
        Ok((outcome, failure, 0))
    }

    /// Hot location: probed executions must never overlap.
    fn run_contention(&self) -> Result<(Outcome, Option<String>, usize), SimError> {
        // Every device tracks every location, so the hot one is always live
        let config = SimConfig {
            num_locations: 4,
            locations_per_device: 4,
            link_probability: 1.0,
            ..self.base_config()
        };
        let probe = Arc::new(Probe::new(Arc::new(Average), Duration::from_micros(200)));
        let workload = Hotspot::new(probe.clone(), Location(0), 3);
        let outcome = self.simulate(config, Arc::new(workload))?;

        let max_concurrency = probe.max_in_flight();
        let failure = outcome.clean_run_failure(self.rounds).or_else(|| {
            (max_concurrency > 1).then(|| {
                format!("{} scripts ran on the hot location at once", max_concurrency)
            })
        });

        info!(
            "Contention: {} probed calls, max overlap {}",
            probe.calls(),
            max_concurrency
        );
        Ok((outcome, failure, max_concurrency))
    }

    /// Standing scripts from round 0 keep running over changing neighbourhoods.
    fn run_churn(&self) -> Result<(Outcome, Option<String>, usize), SimError> {
        let config = SimConfig {
            link_probability: 0.3,
            retention: ScriptRetention::Standing,
            ..self.base_config()
        };
        let workload = FirstRoundOnly::new(Sampled::new(Arc::new(Median), 2, self.seed));
        let outcome = self.simulate(config, Arc::new(workload))?;

        let failure = outcome.clean_run_failure(self.rounds).or_else(|| {
            let runs = outcome.expected_runs;
            (self.rounds > 0 && runs % self.rounds as u64 != 0)
                .then(|| format!("{} runs do not repeat evenly over {} rounds", runs, self.rounds))
        });
        Ok((outcome, failure, 0))
    }

    /// Failing script halfway: the population aborts with the script error.
    fn run_fault(&self) -> Result<(Outcome, Option<String>, usize), SimError> {
        let config = self.base_config();
        let per_round = (config.num_devices * config.locations_per_device) as u64;
        let fail_round = (self.rounds / 2) as u64;
        let script = Arc::new(Failing::after(per_round * fail_round, Arc::new(Average)));
        let outcome = self.simulate(config, Arc::new(EveryLocation::new(script)))?;

        let failure = match (&outcome.drive_error, &outcome.shutdown_error) {
            _ if self.rounds == 0 => Some("fault needs at least one round".to_string()),
            (None, _) => Some("simulation ran to completion despite the fault".to_string()),
            (Some(_), Some(CoreError::ScriptExecution { .. })) => {
                (outcome.stats.rounds_completed != fail_round).then(|| {
                    format!(
                        "aborted after {} rounds, fault was injected in round {}",
                        outcome.stats.rounds_completed, fail_round
                    )
                })
            }
            (Some(_), Some(other)) => Some(format!("wrong root cause: {}", other)),
            (Some(_), None) => Some("devices shut down without reporting the fault".to_string()),
        };

        info!(
            "Fault: aborted after {} rounds ({:?})",
            outcome.stats.rounds_completed,
            outcome.shutdown_error.as_ref().map(ToString::to_string)
        );
        Ok((outcome, failure, 0))
    }

    /// Minimum rounds then maximum rounds: each phase moves readings one way
    /// and never out of the initial range.
    fn run_extremes(&self) -> Result<(Outcome, Option<String>, usize), SimError> {
        let config = SimConfig {
            link_probability: 0.6,
            ..self.base_config()
        };
        let switch_round = self.rounds / 2;
        let workload = Phased::new(Arc::new(Minimum), Arc::new(Maximum), switch_round);
        let outcome = self.simulate(config, Arc::new(workload))?;

        let failure = outcome
            .clean_run_failure(self.rounds)
            .or_else(|| bounds_violation(&outcome.frames))
            .or_else(|| monotonic_violation(&outcome.frames, switch_round));

        info!(
            "Extremes: {} scripts, switched to maximum at round {}",
            outcome.stats.scripts_executed, switch_round
        );
        Ok((outcome, failure, 0))
    }
}

/// Checks that no reading moved against the phase of the round that ran:
/// rounds before `switch_round` may only lower readings, later rounds may
/// only raise them.
fn monotonic_violation(frames: &[RoundFrame], switch_round: usize) -> Option<String> {
    for pair in frames.windows(2) {
        let (before, after) = (&pair[0], &pair[1]);
        let lowering = before.round < switch_round;
        for (old, new) in before.devices.iter().zip(&after.devices) {
            for (a, b) in old.readings.iter().zip(&new.readings) {
                if a.location != b.location {
                    continue;
                }
                let wrong_way = if lowering {
                    b.value > a.value + EPSILON
                } else {
                    b.value < a.value - EPSILON
                };
                if wrong_way {
                    return Some(format!(
                        "round {}: device {} moved L{} from {:.4} to {:.4} during a {} round",
                        before.round,
                        new.device_id,
                        b.location,
                        a.value,
                        b.value,
                        if lowering { "minimum" } else { "maximum" }
                    ));
                }
            }
        }
    }
    None
}

/// Checks that every frame stays within the first frame's per-location range.
fn bounds_violation(frames: &[RoundFrame]) -> Option<String> {
    let initial = frames.first()?;
    let bounds: BTreeMap<usize, (f64, f64)> = initial
        .locations()
        .into_iter()
        .map(|location| {
            let values = initial.values_at(location);
            let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
            let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            (location, (lo, hi))
        })
        .collect();

    for frame in frames {
        for device in &frame.devices {
            for reading in &device.readings {
                let Some(&(lo, hi)) = bounds.get(&reading.location) else {
                    return Some(format!("location {} appeared mid-run", reading.location));
                };
                if reading.value < lo - EPSILON || reading.value > hi + EPSILON {
                    return Some(format!(
                        "round {}: device {} reads {:.4} at L{}, outside [{:.4}, {:.4}]",
                        frame.round, device.device_id, reading.value, reading.location, lo, hi
                    ));
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::{DeviceFrame, LocationReading};

    fn runner() -> ScenarioRunner {
        ScenarioRunner::new(7, 4).with_rounds(6).with_workers(3)
    }

    #[test]
    fn test_converge_passes() {
        let result = runner().run(ScenarioId::Converge);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.rounds_completed, 6);
        assert!(result.metrics.final_spread <= result.metrics.initial_spread + EPSILON);
    }

    #[test]
    fn test_contention_never_overlaps() {
        let result = runner().run(ScenarioId::Contention);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.max_concurrency, 1);
        // 4 devices x 3 hot scripts x 6 rounds
        assert_eq!(result.metrics.scripts_executed, 72);
    }

    #[test]
    fn test_churn_reruns_standing_scripts() {
        let result = runner().run(ScenarioId::Churn);
        assert!(result.passed, "{:?}", result.failure_reason);
        // 4 devices x 2 sampled scripts, re-run every round
        assert_eq!(result.metrics.expected_runs, 4 * 2 * 6);
    }

    #[test]
    fn test_fault_aborts_cleanly() {
        let result = runner().run(ScenarioId::Fault);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.rounds_completed, 3);
    }

    #[test]
    fn test_fault_in_first_round() {
        let result = ScenarioRunner::new(3, 3)
            .with_rounds(1)
            .with_workers(2)
            .run(ScenarioId::Fault);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.rounds_completed, 0);
    }

    #[test]
    fn test_extremes_moves_readings_one_way_per_phase() {
        let result = runner().run(ScenarioId::Extremes);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.rounds_completed, 6);
        assert_eq!(result.scenario.name(), "extremes");
    }

    #[test]
    fn test_monotonic_violation_detected() {
        let frame = |round, value| RoundFrame {
            round,
            devices: vec![DeviceFrame {
                device_id: 0,
                readings: vec![LocationReading { location: 1, value }],
            }],
        };
        let falling = [frame(0, 9.0), frame(1, 4.0), frame(2, 4.0)];
        assert!(monotonic_violation(&falling, 2).is_none());

        // A reading rising during a minimum round
        assert!(monotonic_violation(&[frame(0, 4.0), frame(1, 9.0)], 1).is_some());

        // A reading falling during a maximum round
        let rising_then_falling = [frame(0, 4.0), frame(1, 9.0), frame(2, 3.0)];
        assert!(monotonic_violation(&rising_then_falling, 0).is_some());
    }

    #[test]
    fn test_invalid_setup_reports_failure() {
        let result = ScenarioRunner::new(1, 0).run(ScenarioId::Converge);
        assert!(!result.passed);
        assert!(result.failure_reason.unwrap().contains("device"));
    }

    #[test]
    fn test_run_exported_frames() {
        let (result, export) = runner().run_exported(ScenarioId::Converge);
        assert_eq!(export.passed, result.passed);
        assert_eq!(export.frames.len(), 7);
        assert_eq!(export.rounds_completed, 6);
        assert_eq!(export.scenario, "converge");
    }

    #[test]
    fn test_bounds_violation_detected() {
        let frame = |round, value| RoundFrame {
            round,
            devices: vec![DeviceFrame {
                device_id: 0,
                readings: vec![LocationReading { location: 2, value }],
            }],
        };
        assert!(bounds_violation(&[frame(0, 5.0), frame(1, 5.0)]).is_none());
        assert!(bounds_violation(&[frame(0, 5.0), frame(1, 6.0)]).is_some());
    }
}
