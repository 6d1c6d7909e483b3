//! Stress scenarios for the round-synchronized device population.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// Averaging over random neighbourhoods
    Converge,

    /// Every script of every device targets one location
    Contention,

    /// Standing scripts over a reshuffled topology
    Churn,

    /// A script starts failing mid-run
    Fault,

    /// Minimum sweeps followed by maximum sweeps
    Extremes,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Converge,
            ScenarioId::Contention,
            ScenarioId::Churn,
            ScenarioId::Fault,
            ScenarioId::Extremes,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Converge => "converge",
            ScenarioId::Contention => "contention",
            ScenarioId::Churn => "churn",
            ScenarioId::Fault => "fault",
            ScenarioId::Extremes => "extremes",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Converge => "Neighbourhood averaging, readings must stay within initial bounds",
            ScenarioId::Contention => "All scripts hit one hot location, executions must never overlap",
            ScenarioId::Churn => "Standing median scripts while the topology changes every round",
            ScenarioId::Fault => "Injected script failure must abort the population cleanly",
            ScenarioId::Extremes => "Minimum rounds never raise a reading, maximum rounds never lower one",
        }
    }

    /// Returns true if the scenario is expected to end in an abort.
    pub fn expects_abort(&self) -> bool {
        matches!(self, ScenarioId::Fault)
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "converge" | "average" => Ok(ScenarioId::Converge),
            "contention" | "hotspot" => Ok(ScenarioId::Contention),
            "churn" | "standing" => Ok(ScenarioId::Churn),
            "fault" | "failure" => Ok(ScenarioId::Fault),
            "extremes" | "minmax" => Ok(ScenarioId::Extremes),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
