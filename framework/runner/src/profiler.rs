use std::path::PathBuf;
use std::process::Command;

use anyhow::Context as _;
use crank_core::prelude::ArgsCalculator;

use crate::definition::ScenarioDefinition;

/// A sampling profiler attached around the measured builds of a scenario.
///
/// A profiling mode may contribute arguments to every build of the scenario,
/// and additional arguments to the measured ("instrumented") builds only.
pub trait Profiler {
    fn launch_args_calculator(
        &self,
        _scenario: &ScenarioDefinition,
    ) -> Option<Box<dyn ArgsCalculator>> {
        None
    }

    fn build_args_calculator(
        &self,
        _scenario: &ScenarioDefinition,
    ) -> Option<Box<dyn ArgsCalculator>> {
        None
    }

    fn instrumented_launch_args_calculator(
        &self,
        _scenario: &ScenarioDefinition,
    ) -> Option<Box<dyn ArgsCalculator>> {
        None
    }

    fn instrumented_build_args_calculator(
        &self,
        _scenario: &ScenarioDefinition,
    ) -> Option<Box<dyn ArgsCalculator>> {
        None
    }

    /// Controller for one scenario run. `expected_pid` is the daemon observed
    /// during warm-up; it is always present when profiling, because profiling
    /// requires at least one warm-up build.
    fn new_controller(
        &self,
        expected_pid: Option<&str>,
        scenario: &ScenarioDefinition,
    ) -> Box<dyn ProfilerController>;
}

/// Session-scoped control around the external profiler.
///
/// The engine guarantees the call order: `start_session`, then zero or more
/// `start_recording`/`stop_recording` pairs, then `stop_session`. Any failure
/// is fatal for the scenario; no partial-recording recovery is attempted.
pub trait ProfilerController {
    fn start_session(&mut self) -> anyhow::Result<()>;
    fn start_recording(&mut self) -> anyhow::Result<()>;
    fn stop_recording(&mut self, daemon_pid: &str) -> anyhow::Result<()>;
    fn stop_session(&mut self) -> anyhow::Result<()>;
}

/// Controller used when no profiler is attached.
pub struct NoopProfilerController;

impl ProfilerController for NoopProfilerController {
    fn start_session(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn start_recording(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn stop_recording(&mut self, _daemon_pid: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn stop_session(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Drives an external sampling profiler through configured start and stop
/// command lines.
///
/// `{pid}` in either command is replaced with the daemon pid and `{output}`
/// with the recording artifact path. Each `start_recording` begins a new
/// numbered artifact under the scenario output directory, so re-bracketed
/// recordings never overwrite each other.
pub struct CommandProfiler {
    start_command: Vec<String>,
    stop_command: Vec<String>,
}

impl CommandProfiler {
    pub fn new(start_command: Vec<String>, stop_command: Vec<String>) -> Self {
        Self {
            start_command,
            stop_command,
        }
    }
}

impl Profiler for CommandProfiler {
    fn new_controller(
        &self,
        expected_pid: Option<&str>,
        scenario: &ScenarioDefinition,
    ) -> Box<dyn ProfilerController> {
        Box::new(CommandProfilerController {
            start_command: self.start_command.clone(),
            stop_command: self.stop_command.clone(),
            expected_pid: expected_pid.map(str::to_string),
            output_dir: scenario.output_dir().to_path_buf(),
            scenario_id: scenario.context().unique_scenario_id().to_string(),
            recording: 0,
        })
    }
}

struct CommandProfilerController {
    start_command: Vec<String>,
    stop_command: Vec<String>,
    expected_pid: Option<String>,
    output_dir: PathBuf,
    scenario_id: String,
    recording: usize,
}

impl CommandProfilerController {
    fn artifact(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}-{}.profile", self.scenario_id, self.recording))
    }

    fn run(&self, template: &[String], pid: &str) -> anyhow::Result<()> {
        let artifact = self.artifact().display().to_string();
        let rendered: Vec<String> = template
            .iter()
            .map(|arg| arg.replace("{pid}", pid).replace("{output}", &artifact))
            .collect();
        let (program, args) = rendered
            .split_first()
            .context("profiler command is empty")?;

        let output = Command::new(program)
            .args(args)
            .output()
            .with_context(|| format!("failed to launch profiler command {program}"))?;
        anyhow::ensure!(
            output.status.success(),
            "profiler command {program} exited with {}",
            output.status
        );
        Ok(())
    }
}

impl ProfilerController for CommandProfilerController {
    fn start_session(&mut self) -> anyhow::Result<()> {
        // The session is implicit for command-driven profilers; recordings
        // carry all the state.
        log::debug!("Starting profiler session for scenario {}", self.scenario_id);
        Ok(())
    }

    fn start_recording(&mut self) -> anyhow::Result<()> {
        let pid = self
            .expected_pid
            .clone()
            .context("no daemon pid was observed during warm-up")?;
        self.recording += 1;
        log::debug!("Starting recording {} for daemon {pid}", self.recording);
        self.run(&self.start_command, &pid)
    }

    fn stop_recording(&mut self, daemon_pid: &str) -> anyhow::Result<()> {
        log::debug!(
            "Stopping recording {} for daemon {daemon_pid} into {}",
            self.recording,
            self.artifact().display()
        );
        self.run(&self.stop_command, daemon_pid)
    }

    fn stop_session(&mut self) -> anyhow::Result<()> {
        log::debug!("Profiler session done, {} recording(s) taken", self.recording);
        Ok(())
    }
}
