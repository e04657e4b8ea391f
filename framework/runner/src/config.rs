use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context as _};
use serde::Deserialize;

use crate::actions::{NoAction, RunTargets};
use crate::cli::CrankCli;
use crate::definition::{
    BuildConfiguration, InvocationMode, ScenarioDefinition, ScenarioDefinitionBuilder,
};
use crate::mutator::ApplyChangeToFileMutator;
use crate::profiler::CommandProfiler;
use crate::settings::InvocationSettings;

const DEFAULT_WARM_UPS: usize = 6;
const DEFAULT_ITERATIONS: usize = 10;

/// Everything a harness binary needs to start running scenarios.
pub struct LoadedConfiguration {
    pub settings: InvocationSettings,
    pub scenarios: Vec<ScenarioDefinition>,
}

impl std::fmt::Debug for LoadedConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedConfiguration")
            .field("scenarios", &self.scenarios.len())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct ScenarioFile {
    tool: ToolConfig,
    profiler: Option<ProfilerConfig>,
    #[serde(default)]
    scenario: BTreeMap<String, ScenarioConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct ToolConfig {
    binary: String,
    #[serde(default)]
    launch_args: Vec<String>,
    #[serde(default)]
    stop_args: Vec<String>,
    launch_opts_env: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct ProfilerConfig {
    start: Vec<String>,
    stop: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct ScenarioConfig {
    #[serde(default)]
    targets: Vec<String>,
    #[serde(default)]
    cleanup_targets: Vec<String>,
    warm_ups: Option<usize>,
    iterations: Option<usize>,
    #[serde(default)]
    daemon: DaemonMode,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    launch_args: Vec<String>,
    #[serde(default)]
    build_args: Vec<String>,
    #[serde(default)]
    system_properties: BTreeMap<String, String>,
    #[serde(default)]
    measured_operations: Vec<String>,
    apply_change_to: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum DaemonMode {
    #[default]
    Warm,
    Cold,
}

impl From<DaemonMode> for InvocationMode {
    fn from(mode: DaemonMode) -> Self {
        match mode {
            DaemonMode::Warm => InvocationMode::WarmDaemon,
            DaemonMode::Cold => InvocationMode::ColdDaemon,
        }
    }
}

/// Reads the scenario file named by the CLI and assembles the settings plus
/// the selected scenario definitions, applying CLI overrides.
pub fn load_scenarios(cli: &CrankCli) -> anyhow::Result<LoadedConfiguration> {
    let path = cli.project_dir.join(&cli.scenario_file);
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("cannot read scenario file {}", path.display()))?;
    let file: ScenarioFile = toml::from_str(&raw)
        .with_context(|| format!("cannot parse scenario file {}", path.display()))?;

    let mut settings = InvocationSettings::new(&cli.project_dir, &cli.output_dir)
        .with_measure_config_time(cli.measure_config_time)
        .with_dry_run(cli.dry_run);
    if cli.profile {
        let profiler = file
            .profiler
            .as_ref()
            .context("--profile requires a [profiler] section in the scenario file")?;
        settings = settings.with_profiler(Box::new(CommandProfiler::new(
            profiler.start.clone(),
            profiler.stop.clone(),
        )));
    }

    let selection: Vec<String> = if cli.scenarios.is_empty() {
        file.scenario.keys().cloned().collect()
    } else {
        for name in &cli.scenarios {
            if !file.scenario.contains_key(name) {
                bail!(
                    "unknown scenario '{name}', available scenarios: {}",
                    file.scenario.keys().cloned().collect::<Vec<_>>().join(", ")
                );
            }
        }
        cli.scenarios.clone()
    };
    if selection.is_empty() {
        bail!("scenario file {} defines no scenarios", path.display());
    }

    let mut build_configuration = BuildConfiguration::new(&file.tool.binary)
        .with_launch_args(file.tool.launch_args.clone())
        .with_stop_args(file.tool.stop_args.clone());
    if let Some(env_name) = &file.tool.launch_opts_env {
        build_configuration = build_configuration.with_launch_opts_env(env_name);
    }

    let scenarios = selection
        .iter()
        .map(|name| {
            let config = &file.scenario[name];
            scenario_from(name, config, cli, build_configuration.clone())
        })
        .collect();

    Ok(LoadedConfiguration {
        settings,
        scenarios,
    })
}

fn scenario_from(
    name: &str,
    config: &ScenarioConfig,
    cli: &CrankCli,
    build_configuration: BuildConfiguration,
) -> ScenarioDefinition {
    let mut builder = ScenarioDefinitionBuilder::new(name, build_configuration)
        .with_output_dir(cli.output_dir.join(name))
        .with_warm_ups(cli.warm_ups.or(config.warm_ups).unwrap_or(DEFAULT_WARM_UPS))
        .with_iterations(
            cli.iterations
                .or(config.iterations)
                .unwrap_or(DEFAULT_ITERATIONS),
        )
        .with_build_action(RunTargets::new(config.targets.clone()))
        .with_env(config.env.clone())
        .with_launch_args(config.launch_args.clone())
        .with_build_args(config.build_args.clone())
        .with_measured_operations(config.measured_operations.clone())
        .with_invocation_mode(config.daemon.into());

    if config.cleanup_targets.is_empty() {
        builder = builder.with_cleanup_action(NoAction);
    } else {
        builder = builder.with_cleanup_action(RunTargets::new(config.cleanup_targets.clone()));
    }

    for (key, value) in &config.system_properties {
        builder = builder.with_system_property(key, value);
    }

    if let Some(file_to_change) = &config.apply_change_to {
        let file_to_change = if file_to_change.is_absolute() {
            file_to_change.clone()
        } else {
            cli.project_dir.join(file_to_change)
        };
        builder = builder.use_mutator(Box::new(move || {
            Box::new(ApplyChangeToFileMutator::new(file_to_change.clone()))
        }));
    }

    builder.build()
}
