use std::fs;
use std::path::Path;

use crank_core::prelude::{ArgList, ArgsCalculator};
use tempfile::NamedTempFile;

/// No build has reported a daemon pid through the side channel yet.
#[derive(derive_more::Error, derive_more::Display, Debug)]
pub struct PidUnavailableError {
    msg: String,
}

impl Default for PidUnavailableError {
    fn default() -> Self {
        Self {
            msg: "no build has reported a daemon pid yet".to_string(),
        }
    }
}

/// Side channel through which the build tool reports the pid of the daemon
/// that served each invocation.
///
/// Contributes the build arguments that direct the report into a scratch
/// file. The file is overwritten on every build, so [`pid_of_last_build`]
/// always reflects the most recent invocation.
///
/// [`pid_of_last_build`]: PidInstrumentation::pid_of_last_build
#[derive(Debug)]
pub struct PidInstrumentation {
    pid_file: NamedTempFile,
}

impl PidInstrumentation {
    pub fn new() -> std::io::Result<Self> {
        let pid_file = tempfile::Builder::new()
            .prefix("crank-pid-")
            .suffix(".txt")
            .tempfile()?;
        Ok(Self { pid_file })
    }

    pub fn pid_file(&self) -> &Path {
        self.pid_file.path()
    }

    /// Pid of the daemon that served the last build. Fails if no build has
    /// run yet.
    pub fn pid_of_last_build(&self) -> anyhow::Result<String> {
        let raw = fs::read_to_string(self.pid_file.path())?;
        let pid = raw.trim();
        if pid.is_empty() {
            anyhow::bail!(PidUnavailableError::default());
        }
        Ok(pid.to_string())
    }
}

impl ArgsCalculator for PidInstrumentation {
    fn calculate(&self, args: &mut ArgList) {
        args.add("--pid-file");
        args.add(self.pid_file.path().display().to_string());
    }
}
