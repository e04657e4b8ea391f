use std::process::Command;

use anyhow::Context as _;

use crate::definition::BuildConfiguration;

/// Stops any running daemon matching a build configuration.
pub trait DaemonControl {
    /// Idempotent; must succeed when no daemon is running.
    fn stop(&self, configuration: &BuildConfiguration) -> anyhow::Result<()>;
}

/// Stops the daemon by invoking the build tool's own stop command.
pub struct CommandDaemonControl;

impl DaemonControl for CommandDaemonControl {
    fn stop(&self, configuration: &BuildConfiguration) -> anyhow::Result<()> {
        let stop_args = configuration.daemon_stop_args();
        if stop_args.is_empty() {
            log::debug!("No daemon stop command configured, not stopping anything");
            return Ok(());
        }

        let binary = configuration.resolved_binary()?;
        log::debug!("Stopping daemon with {} {}", binary.display(), stop_args.join(" "));
        let output = Command::new(&binary)
            .args(stop_args)
            .output()
            .with_context(|| format!("failed to run daemon stop command {}", binary.display()))?;
        if !output.status.success() {
            // Stop commands report failure when there was nothing to stop.
            log::warn!("Daemon stop command exited with {}", output.status);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_stop_command_is_a_no_op() {
        let configuration = BuildConfiguration::new("/definitely/not/a/tool");
        assert!(CommandDaemonControl.stop(&configuration).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn failing_stop_command_is_tolerated() {
        let configuration =
            BuildConfiguration::new("/bin/false").with_stop_args(vec!["--stop".to_string()]);
        assert!(CommandDaemonControl.stop(&configuration).is_ok());
    }

    #[test]
    fn missing_tool_is_an_error() {
        let configuration = BuildConfiguration::new("/definitely/not/a/tool")
            .with_stop_args(vec!["--stop".to_string()]);
        assert!(CommandDaemonControl.stop(&configuration).is_err());
    }
}
