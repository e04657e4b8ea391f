use std::fmt;

/// Phase of a scenario run that an invocation belongs to.
///
/// Warm-up builds stabilise the daemon and establish its identity; measured
/// builds are the ones whose results are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    WarmUp,
    Measure,
}

impl Phase {
    fn id(&self) -> &'static str {
        match self {
            Phase::WarmUp => "warm-up",
            Phase::Measure => "measured",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// The step of an iteration being invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStep {
    Cleanup,
    Build,
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStep::Cleanup => f.write_str("cleanup"),
            BuildStep::Build => f.write_str("build"),
        }
    }
}

/// Scenario-scoped identification, fixed for the whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioContext {
    unique_scenario_id: String,
    display_name: String,
}

impl ScenarioContext {
    pub fn new(unique_scenario_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            unique_scenario_id: unique_scenario_id.into(),
            display_name: display_name.into(),
        }
    }

    pub fn unique_scenario_id(&self) -> &str {
        &self.unique_scenario_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Project this scenario context onto one build. `iteration` is 1-based
    /// within the given phase.
    pub fn with_build(&self, phase: Phase, iteration: usize) -> BuildContext {
        BuildContext {
            scenario: self.clone(),
            phase,
            iteration,
        }
    }
}

/// One build within a phase. Derived fresh per iteration and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildContext {
    scenario: ScenarioContext,
    phase: Phase,
    iteration: usize,
}

impl BuildContext {
    pub fn scenario(&self) -> &ScenarioContext {
        &self.scenario
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Human-readable build number used in log banners, e.g. "warm-up build #3".
    pub fn display_build_number(&self) -> String {
        format!("{} build #{}", self.phase, self.iteration)
    }

    /// Stable identifier usable in artifact file names.
    pub fn unique_build_id(&self) -> String {
        format!(
            "{}-{}-{}",
            self.scenario.unique_scenario_id,
            self.phase.id(),
            self.iteration
        )
    }
}
