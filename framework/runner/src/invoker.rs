use std::collections::HashMap;
use std::io::Write as _;
use std::sync::Arc;
use std::time::Instant;

use crank_core::prelude::{BuildContext, BuildStep, ScenarioError};
use crank_instruments::prelude::{
    BuildOperationInstrumentation, InvocationResult, PidInstrumentation,
};

use crate::actions::BuildAction;
use crate::client::{BuildSpec, ClientHandle};

/// Executes individual build steps against the build system under test.
///
/// Holds the argument sets for one "round"; [`with_args`] derives an invoker
/// with different sets sharing the same connection, which is how the engine
/// switches from the all-builds arguments to the instrumented ones after
/// warm-up.
///
/// [`with_args`]: BuildInvoker::with_args
pub struct BuildInvoker {
    connection: ClientHandle,
    launch_args: Vec<String>,
    build_args: Vec<String>,
    env: HashMap<String, String>,
    pid_instrumentation: Arc<PidInstrumentation>,
    build_operation_instrumentation: Arc<BuildOperationInstrumentation>,
}

impl BuildInvoker {
    pub fn new(
        connection: ClientHandle,
        launch_args: Vec<String>,
        build_args: Vec<String>,
        env: HashMap<String, String>,
        pid_instrumentation: Arc<PidInstrumentation>,
        build_operation_instrumentation: Arc<BuildOperationInstrumentation>,
    ) -> Self {
        Self {
            connection,
            launch_args,
            build_args,
            env,
            pid_instrumentation,
            build_operation_instrumentation,
        }
    }

    /// Derives an invoker with different argument sets over the same
    /// connection and instrumentation.
    pub fn with_args(&self, launch_args: Vec<String>, build_args: Vec<String>) -> Self {
        Self {
            connection: self.connection.clone(),
            launch_args,
            build_args,
            env: self.env.clone(),
            pid_instrumentation: self.pid_instrumentation.clone(),
            build_operation_instrumentation: self.build_operation_instrumentation.clone(),
        }
    }

    pub fn run_build(
        &self,
        context: &BuildContext,
        step: BuildStep,
        action: &dyn BuildAction,
    ) -> Result<InvocationResult, ScenarioError> {
        log::info!("* Running {step} for {}", context.display_build_number());
        log::debug!("Build action: {}", action.display_name());

        let spec = BuildSpec {
            targets: action.targets(),
            launch_args: &self.launch_args,
            build_args: &self.build_args,
            env: &self.env,
        };
        let mut captured = Vec::new();
        let started = Instant::now();
        let outcome = self.connection.run_build(&spec, &mut captured);
        let execution_time = started.elapsed();

        if let Err(failure) = outcome {
            replay_captured_output(&captured);
            return Err(ScenarioError::BuildInvocation(failure.into()));
        }

        let daemon_pid = self
            .pid_instrumentation
            .pid_of_last_build()
            .map_err(ScenarioError::Instrumentation)?;
        log::info!("Used daemon with pid {daemon_pid}");

        let time_to_build_execution = self
            .build_operation_instrumentation
            .time_to_build_execution()
            .map_err(ScenarioError::Instrumentation)?;
        let build_operations = self
            .build_operation_instrumentation
            .operation_durations()
            .map_err(ScenarioError::Instrumentation)?;

        Ok(InvocationResult::new(
            context.clone(),
            daemon_pid,
            execution_time,
            time_to_build_execution,
            build_operations,
        ))
    }
}

/// The build ran with its output buffered away from the console; on failure
/// the whole capture is replayed once, behind an error banner, so the
/// operator can diagnose without re-running.
fn replay_captured_output(captured: &[u8]) {
    log::error!("ERROR: failed to run build. Build output follows:");
    let mut stderr = std::io::stderr().lock();
    let _ = stderr.write_all(captured);
    let _ = stderr.write_all(b"\n");
}
