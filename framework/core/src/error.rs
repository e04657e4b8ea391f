use thiserror::Error;

/// Failure taxonomy for one scenario run.
///
/// Every variant is fatal for the scenario it occurs in: remaining iterations
/// are abandoned, nothing is retried, and the guaranteed cleanup block runs
/// before the error reaches the caller. Results already delivered to the
/// consumer stay delivered.
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// Pre-flight configuration problem; surfaced before any build runs.
    #[error("invalid scenario configuration: {0}")]
    Configuration(String),

    /// The daemon reuse policy was violated mid-run.
    #[error("daemon identity violation: {0}")]
    DaemonIdentity(String),

    /// The build client reported a failed invocation. The captured build
    /// output has already been replayed by the time this propagates.
    #[error("build invocation failed")]
    BuildInvocation(#[source] anyhow::Error),

    /// Starting or stopping the profiler session or a recording failed.
    #[error("profiler failed")]
    Profiler(#[source] anyhow::Error),

    /// A build mutator hook failed.
    #[error("build mutator failed")]
    Mutator(#[source] anyhow::Error),

    /// Stopping the daemon failed.
    #[error("daemon control failed")]
    DaemonControl(#[source] anyhow::Error),

    /// Connecting to or closing the build client failed.
    #[error("build client failed")]
    Client(#[source] anyhow::Error),

    /// An instrumentation side channel could not be read.
    #[error("instrumentation failed")]
    Instrumentation(#[source] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
