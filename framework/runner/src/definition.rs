use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Context as _;
use crank_core::prelude::ScenarioContext;

use crate::actions::{BuildAction, NoAction, RunTargets};
use crate::mutator::{BuildMutator, CompositeBuildMutator, MutatorFactory};

/// How builds are launched and whether the daemon is reused between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationMode {
    /// One daemon serves every build of the scenario.
    WarmDaemon,
    /// The daemon is stopped before every build so each one is served by a
    /// fresh daemon.
    ColdDaemon,
}

impl InvocationMode {
    pub fn reuses_daemon(&self) -> bool {
        matches!(self, InvocationMode::WarmDaemon)
    }

    pub fn stops_daemon_between_builds(&self) -> bool {
        matches!(self, InvocationMode::ColdDaemon)
    }
}

/// The build tool installation a scenario runs against.
#[derive(Debug, Clone)]
pub struct BuildConfiguration {
    binary: PathBuf,
    daemon_launch_args: Vec<String>,
    daemon_stop_args: Vec<String>,
    launch_opts_env: String,
}

impl BuildConfiguration {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            daemon_launch_args: Vec::new(),
            daemon_stop_args: Vec::new(),
            launch_opts_env: "BUILD_TOOL_OPTS".to_string(),
        }
    }

    /// Base launch arguments passed to the process hosting the daemon.
    pub fn with_launch_args(mut self, args: Vec<String>) -> Self {
        self.daemon_launch_args = args;
        self
    }

    /// Arguments that make the tool stop any running daemon, e.g. `--stop`.
    pub fn with_stop_args(mut self, args: Vec<String>) -> Self {
        self.daemon_stop_args = args;
        self
    }

    /// Environment variable through which launch arguments reach the tool.
    pub fn with_launch_opts_env(mut self, name: impl Into<String>) -> Self {
        self.launch_opts_env = name.into();
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn daemon_launch_args(&self) -> &[String] {
        &self.daemon_launch_args
    }

    pub fn daemon_stop_args(&self) -> &[String] {
        &self.daemon_stop_args
    }

    pub fn launch_opts_env(&self) -> &str {
        &self.launch_opts_env
    }

    /// The binary to execute, resolving a bare tool name through `PATH`.
    pub fn resolved_binary(&self) -> anyhow::Result<PathBuf> {
        if self.binary.exists() || self.binary.components().count() > 1 {
            return Ok(self.binary.clone());
        }
        which::which(&self.binary)
            .with_context(|| format!("build tool '{}' not found in PATH", self.binary.display()))
    }

    /// Logs the version the build tool reports. A failed probe is not fatal;
    /// benchmarking can proceed against a tool without `--version`.
    pub fn log_version_info(&self) {
        match self.probe_version() {
            Ok(version) => log::info!("Build tool version: {version}"),
            Err(error) => log::warn!("Could not probe build tool version: {error:#}"),
        }
    }

    fn probe_version(&self) -> anyhow::Result<String> {
        let binary = self.resolved_binary()?;
        let output = Command::new(&binary)
            .arg("--version")
            .output()
            .with_context(|| format!("failed to run {} --version", binary.display()))?;
        anyhow::ensure!(
            output.status.success(),
            "{} --version exited with {}",
            binary.display(),
            output.status
        );
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
    }
}

/// Immutable description of one benchmark scenario. Built once from
/// configuration; read-only thereafter.
pub struct ScenarioDefinition {
    name: String,
    output_dir: PathBuf,
    warm_up_count: usize,
    build_count: usize,
    build_action: Box<dyn BuildAction>,
    cleanup_action: Box<dyn BuildAction>,
    env: HashMap<String, String>,
    launch_args: Vec<String>,
    build_args: Vec<String>,
    system_properties: BTreeMap<String, String>,
    measured_build_operations: Vec<String>,
    invocation_mode: InvocationMode,
    build_configuration: BuildConfiguration,
    mutator_factories: Vec<MutatorFactory>,
}

impl ScenarioDefinition {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn warm_up_count(&self) -> usize {
        self.warm_up_count
    }

    pub fn build_count(&self) -> usize {
        self.build_count
    }

    pub fn build_action(&self) -> &dyn BuildAction {
        self.build_action.as_ref()
    }

    pub fn cleanup_action(&self) -> &dyn BuildAction {
        self.cleanup_action.as_ref()
    }

    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }

    pub fn launch_args(&self) -> &[String] {
        &self.launch_args
    }

    pub fn build_args(&self) -> &[String] {
        &self.build_args
    }

    pub fn system_properties(&self) -> &BTreeMap<String, String> {
        &self.system_properties
    }

    pub fn measured_build_operations(&self) -> &[String] {
        &self.measured_build_operations
    }

    pub fn invocation_mode(&self) -> InvocationMode {
        self.invocation_mode
    }

    pub fn build_configuration(&self) -> &BuildConfiguration {
        &self.build_configuration
    }

    /// Scenario-scoped context for one run.
    pub fn context(&self) -> ScenarioContext {
        ScenarioContext::new(self.name.replace([' ', '/'], "-"), self.name.clone())
    }

    /// Constructs the mutator for one run. The configured factories are each
    /// invoked once and their mutators composed in declaration order.
    pub fn new_mutator(&self) -> Box<dyn BuildMutator> {
        Box::new(CompositeBuildMutator::new(
            self.mutator_factories.iter().map(|factory| factory()).collect(),
        ))
    }
}

/// Builder for a [ScenarioDefinition].
pub struct ScenarioDefinitionBuilder {
    name: String,
    output_dir: PathBuf,
    warm_up_count: usize,
    build_count: usize,
    build_action: Box<dyn BuildAction>,
    cleanup_action: Box<dyn BuildAction>,
    env: HashMap<String, String>,
    launch_args: Vec<String>,
    build_args: Vec<String>,
    system_properties: BTreeMap<String, String>,
    measured_build_operations: Vec<String>,
    invocation_mode: InvocationMode,
    build_configuration: BuildConfiguration,
    mutator_factories: Vec<MutatorFactory>,
}

impl ScenarioDefinitionBuilder {
    /// Defaults: 6 warm-ups, 10 measured builds, no cleanup, warm daemon,
    /// output under `crank-out/<name>`.
    pub fn new(name: &str, build_configuration: BuildConfiguration) -> Self {
        Self {
            name: name.to_string(),
            output_dir: PathBuf::from("crank-out").join(name),
            warm_up_count: 6,
            build_count: 10,
            build_action: Box::new(RunTargets::new(Vec::new())),
            cleanup_action: Box::new(NoAction),
            env: HashMap::new(),
            launch_args: Vec::new(),
            build_args: Vec::new(),
            system_properties: BTreeMap::new(),
            measured_build_operations: Vec::new(),
            invocation_mode: InvocationMode::WarmDaemon,
            build_configuration,
            mutator_factories: Vec::new(),
        }
    }

    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    pub fn with_warm_ups(mut self, count: usize) -> Self {
        self.warm_up_count = count;
        self
    }

    pub fn with_iterations(mut self, count: usize) -> Self {
        self.build_count = count;
        self
    }

    pub fn with_build_action(mut self, action: impl BuildAction + 'static) -> Self {
        self.build_action = Box::new(action);
        self
    }

    pub fn with_cleanup_action(mut self, action: impl BuildAction + 'static) -> Self {
        self.cleanup_action = Box::new(action);
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_launch_args(mut self, args: Vec<String>) -> Self {
        self.launch_args = args;
        self
    }

    pub fn with_build_args(mut self, args: Vec<String>) -> Self {
        self.build_args = args;
        self
    }

    pub fn with_system_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.system_properties.insert(key.into(), value.into());
        self
    }

    pub fn with_measured_operations(mut self, operations: Vec<String>) -> Self {
        self.measured_build_operations = operations;
        self
    }

    pub fn with_invocation_mode(mut self, mode: InvocationMode) -> Self {
        self.invocation_mode = mode;
        self
    }

    /// Adds a mutator; several mutators compose in the order they were added.
    pub fn use_mutator(mut self, factory: MutatorFactory) -> Self {
        self.mutator_factories.push(factory);
        self
    }

    pub fn build(self) -> ScenarioDefinition {
        ScenarioDefinition {
            name: self.name,
            output_dir: self.output_dir,
            warm_up_count: self.warm_up_count,
            build_count: self.build_count,
            build_action: self.build_action,
            cleanup_action: self.cleanup_action,
            env: self.env,
            launch_args: self.launch_args,
            build_args: self.build_args,
            system_properties: self.system_properties,
            measured_build_operations: self.measured_build_operations,
            invocation_mode: self.invocation_mode,
            build_configuration: self.build_configuration,
            mutator_factories: self.mutator_factories,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_modes_imply_daemon_handling() {
        assert!(InvocationMode::WarmDaemon.reuses_daemon());
        assert!(!InvocationMode::WarmDaemon.stops_daemon_between_builds());
        assert!(!InvocationMode::ColdDaemon.reuses_daemon());
        assert!(InvocationMode::ColdDaemon.stops_daemon_between_builds());
    }

    #[test]
    fn scenario_context_id_is_file_name_safe() {
        let scenario =
            ScenarioDefinitionBuilder::new("clean build/assemble", BuildConfiguration::new("tool"))
                .build();

        assert_eq!(scenario.context().unique_scenario_id(), "clean-build-assemble");
        assert_eq!(scenario.context().display_name(), "clean build/assemble");
    }

    #[cfg(unix)]
    #[test]
    fn bare_tool_names_resolve_through_path() {
        let configuration = BuildConfiguration::new("sh");
        let resolved = configuration.resolved_binary().unwrap();
        assert!(resolved.is_absolute());
    }

    #[test]
    fn explicit_paths_are_not_resolved() {
        let configuration = BuildConfiguration::new("/opt/tool/bin/tool");
        assert_eq!(
            configuration.resolved_binary().unwrap(),
            PathBuf::from("/opt/tool/bin/tool")
        );
    }
}
