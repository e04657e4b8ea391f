use std::fs;
use std::sync::Arc;

use crank_core::prelude::{
    ArgList, ArgsCalculator, BuildContext, BuildStep, CalculatorChain, Phase, ScenarioContext,
    ScenarioError, ShutdownFlag,
};
use crank_instruments::prelude::{
    BuildOperationInstrumentation, InvocationResult, PidInstrumentation, Sample,
};

use crate::client::{BuildClient, ClientHandle};
use crate::daemon::DaemonControl;
use crate::definition::{InvocationMode, ScenarioDefinition};
use crate::invoker::BuildInvoker;
use crate::monitor::start_monitor;
use crate::mutator::BuildMutator;
use crate::profiler::{NoopProfilerController, ProfilerController};
use crate::settings::InvocationSettings;

/// Receives each measured [InvocationResult] synchronously, in iteration
/// order. A slow consumer delays the next iteration; there is no buffering.
pub type ResultConsumer<'a> = dyn FnMut(InvocationResult) + 'a;

/// Drives one scenario end to end: warm-up, profiler session, measured
/// builds, and the daemon-identity checks in between.
pub struct ScenarioInvoker {
    daemon_control: Box<dyn DaemonControl>,
    pid_instrumentation: Arc<PidInstrumentation>,
    client: Box<dyn BuildClient>,
}

impl ScenarioInvoker {
    pub fn new(
        daemon_control: Box<dyn DaemonControl>,
        pid_instrumentation: Arc<PidInstrumentation>,
        client: Box<dyn BuildClient>,
    ) -> Self {
        Self {
            daemon_control,
            pid_instrumentation,
            client,
        }
    }

    /// The samples every invocation of this scenario can provide, in
    /// reporting order: execution time, then the configuration-phase duration
    /// when measured, then the custom operations in declaration order.
    pub fn samples_for(
        &self,
        settings: &InvocationSettings,
        scenario: &ScenarioDefinition,
    ) -> Vec<Sample> {
        let mut samples = vec![Sample::execution_time()];
        if settings.measure_config_time() {
            samples.push(Sample::time_to_build_execution());
        }
        samples.extend(
            scenario
                .measured_build_operations()
                .iter()
                .map(|operation| Sample::build_operation(operation)),
        );
        samples
    }

    /// Runs the whole scenario, streaming measured results to `consumer`.
    ///
    /// Any failure aborts the remaining iterations; results already handed to
    /// the consumer stay delivered, and the cleanup block (mutator
    /// `after_scenario`, client close, daemon stop, in that order) runs no
    /// matter how the run ended.
    pub fn run(
        &self,
        scenario: &ScenarioDefinition,
        settings: &InvocationSettings,
        consumer: &mut ResultConsumer<'_>,
    ) -> Result<(), ScenarioError> {
        if settings.is_profile() && scenario.warm_up_count() == 0 {
            return Err(ScenarioError::Configuration(
                "profiling requires at least one warm-up build".to_string(),
            ));
        }

        log::info!("Running scenario {}", scenario.name());
        fs::create_dir_all(scenario.output_dir())?;

        let samples = self.samples_for(settings, scenario);
        log::debug!(
            "Collecting samples: {}",
            samples.iter().map(Sample::name).collect::<Vec<_>>().join(", ")
        );

        let build_operation_instrumentation = Arc::new(BuildOperationInstrumentation::new(
            settings.measure_config_time(),
            scenario.measured_build_operations(),
        )?);

        let mut launch_calculators = CalculatorChain::new();
        let mut build_calculators = CalculatorChain::new().plus(self.pid_instrumentation.clone());
        if let Some(profiler) = settings.profiler() {
            if let Some(calculator) = profiler.launch_args_calculator(scenario) {
                launch_calculators = launch_calculators.plus(calculator);
            }
            if let Some(calculator) = profiler.build_args_calculator(scenario) {
                build_calculators = build_calculators.plus(calculator);
            }
        }
        if build_operation_instrumentation.measures_anything() {
            build_calculators = build_calculators.plus(build_operation_instrumentation.clone());
        }

        self.daemon_control
            .stop(scenario.build_configuration())
            .map_err(ScenarioError::DaemonControl)?;

        let mut mutator = scenario.new_mutator();
        let scenario_context = scenario.context();
        let connection = ClientHandle::connect(self.client.as_ref(), settings.project_dir())
            .map_err(ScenarioError::Client)?;

        let monitor_shutdown = ShutdownFlag::new();
        start_monitor(monitor_shutdown.clone());

        let outcome = self.run_scenario(
            scenario,
            settings,
            consumer,
            &scenario_context,
            &connection,
            mutator.as_mut(),
            &launch_calculators,
            &build_calculators,
            &build_operation_instrumentation,
        );

        // Guaranteed cleanup, in order, even when the run failed.
        monitor_shutdown.shutdown();
        let after_scenario = mutator.after_scenario(&scenario_context);
        let close = connection.close();
        let daemon_stop = self.daemon_control.stop(scenario.build_configuration());

        match outcome {
            Err(error) => {
                if let Err(secondary) = after_scenario {
                    log::warn!("Mutator after-scenario hook also failed: {secondary:#}");
                }
                if let Err(secondary) = close {
                    log::warn!("Closing the build client also failed: {secondary:#}");
                }
                if let Err(secondary) = daemon_stop {
                    log::warn!("Stopping the daemon also failed: {secondary:#}");
                }
                Err(error)
            }
            Ok(()) => {
                after_scenario.map_err(ScenarioError::Mutator)?;
                close.map_err(ScenarioError::Client)?;
                daemon_stop.map_err(ScenarioError::DaemonControl)?;
                Ok(())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run_scenario(
        &self,
        scenario: &ScenarioDefinition,
        settings: &InvocationSettings,
        consumer: &mut ResultConsumer<'_>,
        scenario_context: &ScenarioContext,
        connection: &ClientHandle,
        mutator: &mut dyn BuildMutator,
        launch_calculators: &CalculatorChain,
        build_calculators: &CalculatorChain,
        build_operation_instrumentation: &Arc<BuildOperationInstrumentation>,
    ) -> Result<(), ScenarioError> {
        scenario.build_configuration().log_version_info();

        let mut all_builds_launch_args = ArgList::new();
        all_builds_launch_args.extend(
            scenario
                .build_configuration()
                .daemon_launch_args()
                .iter()
                .cloned(),
        );
        all_builds_launch_args.extend(scenario.launch_args().iter().cloned());
        for (key, value) in scenario.system_properties() {
            all_builds_launch_args.add(format!("-D{key}={value}"));
        }
        all_builds_launch_args.add(format!("-Dcrank.scenario={}", scenario.name()));
        launch_calculators.calculate(&mut all_builds_launch_args);
        log_args("Launch args", &all_builds_launch_args);

        let mut all_builds_build_args = ArgList::new();
        for (key, value) in scenario.system_properties() {
            all_builds_build_args.add(format!("-D{key}={value}"));
        }
        all_builds_build_args.extend(scenario.build_args().iter().cloned());
        if settings.dry_run() {
            all_builds_build_args.add("--dry-run");
        }
        build_calculators.calculate(&mut all_builds_build_args);
        log_args("Build args", &all_builds_build_args);

        let invoker = BuildInvoker::new(
            connection.clone(),
            all_builds_launch_args.as_slice().to_vec(),
            all_builds_build_args.as_slice().to_vec(),
            scenario.env().clone(),
            self.pid_instrumentation.clone(),
            build_operation_instrumentation.clone(),
        );

        mutator
            .before_scenario(scenario_context)
            .map_err(ScenarioError::Mutator)?;

        let mut baseline_pid: Option<String> = None;

        for iteration in 1..=scenario.warm_up_count() {
            let build_context = scenario_context.with_build(Phase::WarmUp, iteration);
            mutator
                .before_build(&build_context)
                .map_err(ScenarioError::Mutator)?;
            let outcome = (|| {
                self.run_cleanup(&build_context, scenario, &invoker)?;
                invoker.run_build(&build_context, BuildStep::Build, scenario.build_action())
            })();
            let result = finish_unit(mutator, &build_context, outcome)?;

            match &baseline_pid {
                None => baseline_pid = Some(result.daemon_pid().to_string()),
                Some(expected) => {
                    check_daemon_pid(expected, result.daemon_pid(), scenario.invocation_mode())?
                }
            }
        }

        let mut controller: Box<dyn ProfilerController> = match settings.profiler() {
            Some(profiler) => profiler.new_controller(baseline_pid.as_deref(), scenario),
            None => Box::new(NoopProfilerController),
        };

        let mut instrumented_launch_args = all_builds_launch_args.clone();
        let mut instrumented_build_args = all_builds_build_args.clone();
        if let Some(profiler) = settings.profiler() {
            if let Some(calculator) = profiler.instrumented_launch_args_calculator(scenario) {
                calculator.calculate(&mut instrumented_launch_args);
            }
            if let Some(calculator) = profiler.instrumented_build_args_calculator(scenario) {
                calculator.calculate(&mut instrumented_build_args);
            }
        }
        if instrumented_launch_args != all_builds_launch_args {
            log_args("Launch args for instrumented builds", &instrumented_launch_args);
        }
        if instrumented_build_args != all_builds_build_args {
            log_args("Build args for instrumented builds", &instrumented_build_args);
        }
        let instrumented_invoker = invoker.with_args(
            instrumented_launch_args.into_vec(),
            instrumented_build_args.into_vec(),
        );

        controller.start_session().map_err(ScenarioError::Profiler)?;

        let mut recording_open = false;
        let mut last_pid: Option<String> = None;

        for iteration in 1..=scenario.build_count() {
            let build_context = scenario_context.with_build(Phase::Measure, iteration);
            mutator
                .before_build(&build_context)
                .map_err(ScenarioError::Mutator)?;
            let outcome = (|| {
                self.run_cleanup(&build_context, scenario, &invoker)?;

                if !recording_open {
                    controller.start_recording().map_err(ScenarioError::Profiler)?;
                    recording_open = true;
                }

                let result = instrumented_invoker.run_build(
                    &build_context,
                    BuildStep::Build,
                    scenario.build_action(),
                )?;

                if iteration == scenario.build_count()
                    || self.cleanup_invalidates_warm_state(scenario)
                {
                    controller
                        .stop_recording(result.daemon_pid())
                        .map_err(ScenarioError::Profiler)?;
                    recording_open = false;
                }

                Ok(result)
            })();
            let result = finish_unit(mutator, &build_context, outcome)?;

            last_pid = Some(result.daemon_pid().to_string());
            consumer(result);
        }

        controller.stop_session().map_err(ScenarioError::Profiler)?;

        if let (Some(expected), Some(actual)) = (&baseline_pid, &last_pid) {
            check_daemon_pid(expected, actual, scenario.invocation_mode())?;
        }
        Ok(())
    }

    /// Runs the unmeasured part of one iteration: the cleanup action when it
    /// does something, then a daemon stop when the invocation mode wants a
    /// fresh daemon per build. Cleanup always uses the all-builds arguments.
    fn run_cleanup(
        &self,
        build_context: &BuildContext,
        scenario: &ScenarioDefinition,
        invoker: &BuildInvoker,
    ) -> Result<(), ScenarioError> {
        if scenario.cleanup_action().does_something() {
            invoker.run_build(build_context, BuildStep::Cleanup, scenario.cleanup_action())?;
        }
        if scenario.invocation_mode().stops_daemon_between_builds() {
            self.daemon_control
                .stop(scenario.build_configuration())
                .map_err(ScenarioError::DaemonControl)?;
        }
        Ok(())
    }

    /// Non-trivial cleanup invalidates the assumption that successive builds
    /// run in identical warm state, so each such build gets its own bracketed
    /// recording.
    fn cleanup_invalidates_warm_state(&self, scenario: &ScenarioDefinition) -> bool {
        scenario.cleanup_action().does_something()
            || scenario.invocation_mode().stops_daemon_between_builds()
    }
}

/// Completes one measured unit: runs the after-build hook with the outcome,
/// then resolves which failure wins. The build failure takes precedence; a
/// hook failure alone still aborts the scenario.
fn finish_unit(
    mutator: &mut dyn BuildMutator,
    build_context: &BuildContext,
    outcome: Result<InvocationResult, ScenarioError>,
) -> Result<InvocationResult, ScenarioError> {
    let hook_outcome = mutator.after_build(build_context, outcome.as_ref().err());
    let result = outcome?;
    hook_outcome.map_err(ScenarioError::Mutator)?;
    Ok(result)
}

fn check_daemon_pid(
    expected: &str,
    actual: &str,
    mode: InvocationMode,
) -> Result<(), ScenarioError> {
    if mode.reuses_daemon() {
        if expected != actual {
            return Err(ScenarioError::DaemonIdentity(format!(
                "multiple daemons were used: expected {expected}, saw {actual}"
            )));
        }
    } else if expected == actual {
        return Err(ScenarioError::DaemonIdentity(format!(
            "daemon {actual} was reused but a fresh daemon was required"
        )));
    }
    Ok(())
}

fn log_args(title: &str, args: &ArgList) {
    log::debug!("{title}:");
    for arg in args.as_slice() {
        log::debug!("  {arg}");
    }
}
