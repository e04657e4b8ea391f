use std::path::PathBuf;

use clap::Parser;

/// Command line interface for a crank harness binary.
#[derive(Parser, Debug)]
#[command(about, long_about = None)]
pub struct CrankCli {
    /// Directory of the project to benchmark
    #[clap(long, default_value = ".")]
    pub project_dir: PathBuf,

    /// Scenario file to read, relative to the project directory
    #[clap(long, default_value = "crank.toml")]
    pub scenario_file: PathBuf,

    /// Directory to write profiler recordings into
    #[clap(long, default_value = "crank-out")]
    pub output_dir: PathBuf,

    /// Profile the measured builds with the profiler command configured in
    /// the scenario file
    #[clap(long, default_value = "false")]
    pub profile: bool,

    /// Also measure the configuration phase of each build
    #[clap(long, default_value = "false")]
    pub measure_config_time: bool,

    /// Ask the build tool to skip actually executing work
    #[clap(long, default_value = "false")]
    pub dry_run: bool,

    /// Override the number of warm-up builds for every scenario
    #[clap(long)]
    pub warm_ups: Option<usize>,

    /// Override the number of measured builds for every scenario
    #[clap(long)]
    pub iterations: Option<usize>,

    /// Names of the scenarios to run; all scenarios in the file when empty
    pub scenarios: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_overrides_and_scenario_selection() {
        let cli = CrankCli::try_parse_from([
            "crank",
            "--project-dir",
            "/work/app",
            "--warm-ups",
            "2",
            "--iterations",
            "5",
            "--profile",
            "assemble",
            "clean-build",
        ])
        .unwrap();

        assert_eq!(cli.project_dir, PathBuf::from("/work/app"));
        assert_eq!(cli.warm_ups, Some(2));
        assert_eq!(cli.iterations, Some(5));
        assert!(cli.profile);
        assert_eq!(cli.scenarios, ["assemble", "clean-build"]);
    }

    #[test]
    fn defaults_require_nothing() {
        let cli = CrankCli::try_parse_from(["crank"]).unwrap();

        assert_eq!(cli.scenario_file, PathBuf::from("crank.toml"));
        assert!(!cli.profile);
        assert!(cli.scenarios.is_empty());
    }
}
