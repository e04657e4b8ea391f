use std::process::ExitCode;
use std::sync::Arc;

use crank_runner::prelude::{
    init, load_scenarios, CommandDaemonControl, CrankCli, InvocationResult, LoadedConfiguration,
    PidInstrumentation, ProcessBuildClient, ScenarioInvoker,
};

fn main() -> ExitCode {
    let cli = init();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            log::error!("{error:#}");
            ExitCode::FAILURE
        }
    }
}

/// Runs every selected scenario in turn. A failed scenario is recorded and
/// the remaining scenarios still run.
fn run(cli: CrankCli) -> anyhow::Result<()> {
    let LoadedConfiguration {
        settings,
        scenarios,
    } = load_scenarios(&cli)?;
    let pid_instrumentation = Arc::new(PidInstrumentation::new()?);

    let mut failed = Vec::new();
    for scenario in &scenarios {
        let engine = ScenarioInvoker::new(
            Box::new(CommandDaemonControl),
            pid_instrumentation.clone(),
            Box::new(ProcessBuildClient::new(scenario.build_configuration().clone())),
        );
        let mut consumer = |result: InvocationResult| {
            log::info!(
                "{} took {:?} on daemon {}",
                result.context().display_build_number(),
                result.execution_time(),
                result.daemon_pid()
            );
        };
        if let Err(error) = engine.run(scenario, &settings, &mut consumer) {
            let error = anyhow::Error::new(error);
            log::error!("Scenario {} failed: {error:#}", scenario.name());
            failed.push(scenario.name().to_string());
        }
    }

    if !failed.is_empty() {
        anyhow::bail!("{} scenario(s) failed: {}", failed.len(), failed.join(", "));
    }
    Ok(())
}
