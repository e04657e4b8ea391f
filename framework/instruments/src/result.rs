use std::collections::HashMap;
use std::time::Duration;

use crank_core::prelude::BuildContext;

/// Outcome of one build invocation.
///
/// Produced once per successful build step and handed straight to the result
/// consumer; the engine never retains these.
#[derive(Debug, Clone)]
pub struct InvocationResult {
    context: BuildContext,
    daemon_pid: String,
    execution_time: Duration,
    time_to_build_execution: Option<Duration>,
    build_operations: HashMap<String, Duration>,
}

impl InvocationResult {
    pub fn new(
        context: BuildContext,
        daemon_pid: String,
        execution_time: Duration,
        time_to_build_execution: Option<Duration>,
        build_operations: HashMap<String, Duration>,
    ) -> Self {
        Self {
            context,
            daemon_pid,
            execution_time,
            time_to_build_execution,
            build_operations,
        }
    }

    pub fn context(&self) -> &BuildContext {
        &self.context
    }

    /// Pid of the daemon that served this invocation.
    pub fn daemon_pid(&self) -> &str {
        &self.daemon_pid
    }

    /// Wall-clock duration of the whole invocation.
    pub fn execution_time(&self) -> Duration {
        self.execution_time
    }

    /// Duration of the configuration phase, when it was measured.
    pub fn time_to_build_execution(&self) -> Option<Duration> {
        self.time_to_build_execution
    }

    /// Durations of the custom measured build operations, keyed by name.
    pub fn build_operations(&self) -> &HashMap<String, Duration> {
        &self.build_operations
    }
}

/// A named scalar extractable from an [InvocationResult].
///
/// The sample set for a scenario is fixed before any build runs, so the set
/// is comparable and deterministic for a given configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    name: String,
    kind: SampleKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SampleKind {
    ExecutionTime,
    TimeToBuildExecution,
    BuildOperation(String),
}

impl Sample {
    /// Total wall-clock time of the invocation; always available.
    pub fn execution_time() -> Self {
        Self {
            name: "execution".to_string(),
            kind: SampleKind::ExecutionTime,
        }
    }

    /// Configuration-phase duration; present when its measurement is enabled.
    pub fn time_to_build_execution() -> Self {
        Self {
            name: "time to build execution".to_string(),
            kind: SampleKind::TimeToBuildExecution,
        }
    }

    /// Duration of one custom measured build operation.
    pub fn build_operation(operation: &str) -> Self {
        Self {
            name: operation.to_string(),
            kind: SampleKind::BuildOperation(operation.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn extract_from(&self, result: &InvocationResult) -> Option<Duration> {
        match &self.kind {
            SampleKind::ExecutionTime => Some(result.execution_time),
            SampleKind::TimeToBuildExecution => result.time_to_build_execution,
            SampleKind::BuildOperation(operation) => {
                result.build_operations.get(operation).copied()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crank_core::prelude::{Phase, ScenarioContext};

    fn result() -> InvocationResult {
        let context = ScenarioContext::new("assemble", "assemble").with_build(Phase::Measure, 1);
        InvocationResult::new(
            context,
            "4242".to_string(),
            Duration::from_millis(1500),
            Some(Duration::from_millis(300)),
            HashMap::from([("dex".to_string(), Duration::from_millis(120))]),
        )
    }

    #[test]
    fn samples_extract_their_quantity() {
        let result = result();

        assert_eq!(
            Sample::execution_time().extract_from(&result),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(
            Sample::time_to_build_execution().extract_from(&result),
            Some(Duration::from_millis(300))
        );
        assert_eq!(
            Sample::build_operation("dex").extract_from(&result),
            Some(Duration::from_millis(120))
        );
        assert_eq!(Sample::build_operation("link").extract_from(&result), None);
    }
}
