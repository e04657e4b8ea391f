use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::definition::BuildConfiguration;

/// Arguments and environment for one build invocation.
pub struct BuildSpec<'a> {
    pub targets: &'a [String],
    pub launch_args: &'a [String],
    pub build_args: &'a [String],
    pub env: &'a HashMap<String, String>,
}

/// A failed build reported by the client. The captured output is replayed by
/// the invoker; this only carries the reason.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct BuildFailure {
    message: String,
}

impl BuildFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Transport used to reach the build system under test.
pub trait BuildClient {
    fn connect(&self, project_dir: &Path) -> anyhow::Result<Box<dyn BuildConnection>>;
}

/// One open connection, owned exclusively by one engine run.
pub trait BuildConnection {
    /// Runs one build, appending combined stdout and stderr to `output`.
    fn run_build(&mut self, spec: &BuildSpec<'_>, output: &mut Vec<u8>) -> Result<(), BuildFailure>;

    fn close(&mut self) -> anyhow::Result<()>;
}

/// Shared handle over a connection. Clones share the connection; the
/// underlying `close` runs exactly once no matter how often [`close`] is
/// called.
///
/// [`close`]: ClientHandle::close
#[derive(Clone)]
pub struct ClientHandle {
    connection: Arc<Mutex<Option<Box<dyn BuildConnection>>>>,
}

impl ClientHandle {
    pub fn connect(client: &dyn BuildClient, project_dir: &Path) -> anyhow::Result<Self> {
        let connection = client.connect(project_dir)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(Some(connection))),
        })
    }

    pub(crate) fn run_build(
        &self,
        spec: &BuildSpec<'_>,
        output: &mut Vec<u8>,
    ) -> Result<(), BuildFailure> {
        match self.connection.lock().as_mut() {
            Some(connection) => connection.run_build(spec, output),
            None => Err(BuildFailure::new("build client connection is already closed")),
        }
    }

    pub fn close(&self) -> anyhow::Result<()> {
        match self.connection.lock().take() {
            Some(mut connection) => connection.close(),
            None => Ok(()),
        }
    }
}

/// Client that launches the build tool binary once per invocation, passing
/// launch arguments through the configured environment variable.
pub struct ProcessBuildClient {
    configuration: BuildConfiguration,
}

impl ProcessBuildClient {
    pub fn new(configuration: BuildConfiguration) -> Self {
        Self { configuration }
    }
}

impl BuildClient for ProcessBuildClient {
    fn connect(&self, project_dir: &Path) -> anyhow::Result<Box<dyn BuildConnection>> {
        anyhow::ensure!(
            project_dir.is_dir(),
            "project directory {} does not exist",
            project_dir.display()
        );
        let binary = self.configuration.resolved_binary()?;
        Ok(Box::new(ProcessConnection {
            binary,
            project_dir: project_dir.to_path_buf(),
            launch_opts_env: self.configuration.launch_opts_env().to_string(),
        }))
    }
}

struct ProcessConnection {
    binary: PathBuf,
    project_dir: PathBuf,
    launch_opts_env: String,
}

impl BuildConnection for ProcessConnection {
    fn run_build(&mut self, spec: &BuildSpec<'_>, output: &mut Vec<u8>) -> Result<(), BuildFailure> {
        let mut command = Command::new(&self.binary);
        command
            .current_dir(&self.project_dir)
            .args(spec.build_args)
            .args(spec.targets)
            .envs(spec.env);
        if !spec.launch_args.is_empty() {
            command.env(&self.launch_opts_env, spec.launch_args.join(" "));
        }

        let out = command.output().map_err(|error| {
            BuildFailure::new(format!("failed to launch {}: {error}", self.binary.display()))
        })?;
        output.extend_from_slice(&out.stdout);
        output.extend_from_slice(&out.stderr);
        if !out.status.success() {
            return Err(BuildFailure::new(format!("build exited with {}", out.status)));
        }
        Ok(())
    }

    fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}
