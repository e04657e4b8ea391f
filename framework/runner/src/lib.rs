mod actions;
mod cli;
mod client;
mod config;
mod daemon;
mod definition;
mod init;
mod invoker;
mod monitor;
mod mutator;
mod profiler;
mod run;
mod settings;

pub mod prelude {
    pub use crate::actions::{BuildAction, NoAction, RunTargets};
    pub use crate::cli::CrankCli;
    pub use crate::client::{
        BuildClient, BuildConnection, BuildFailure, BuildSpec, ClientHandle, ProcessBuildClient,
    };
    pub use crate::config::{load_scenarios, LoadedConfiguration};
    pub use crate::daemon::{CommandDaemonControl, DaemonControl};
    pub use crate::definition::{
        BuildConfiguration, InvocationMode, ScenarioDefinition, ScenarioDefinitionBuilder,
    };
    pub use crate::init::init;
    pub use crate::invoker::BuildInvoker;
    pub use crate::mutator::{
        ApplyChangeToFileMutator, BuildMutator, CompositeBuildMutator, HookResult, MutatorFactory,
    };
    pub use crate::profiler::{
        CommandProfiler, NoopProfilerController, Profiler, ProfilerController,
    };
    pub use crate::run::{ResultConsumer, ScenarioInvoker};
    pub use crate::settings::InvocationSettings;

    pub use crank_core::prelude::*;
    pub use crank_instruments::prelude::*;
}
