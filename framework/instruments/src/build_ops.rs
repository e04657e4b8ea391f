use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use crank_core::prelude::{ArgList, ArgsCalculator};
use tempfile::NamedTempFile;

/// Key under which the build tool reports the configuration-phase duration.
const TIME_TO_BUILD_EXECUTION_KEY: &str = "time-to-build-execution";

/// Instrumentation for durations measured inside the build: the
/// configuration phase and any named build operations.
///
/// Contributes the build arguments that ask the tool to write a timings file
/// with one `name=millis` line per measured quantity. The tool truncates the
/// file at the start of every build, so readers always see the last build.
#[derive(Debug)]
pub struct BuildOperationInstrumentation {
    measure_config_time: bool,
    measured_operations: Vec<String>,
    timings_file: NamedTempFile,
}

impl BuildOperationInstrumentation {
    pub fn new(measure_config_time: bool, measured_operations: &[String]) -> std::io::Result<Self> {
        let timings_file = tempfile::Builder::new()
            .prefix("crank-timings-")
            .suffix(".txt")
            .tempfile()?;
        Ok(Self {
            measure_config_time,
            measured_operations: measured_operations.to_vec(),
            timings_file,
        })
    }

    pub fn timings_file(&self) -> &Path {
        self.timings_file.path()
    }

    /// Whether this scenario measures anything inside the build at all. When
    /// false the instrumentation contributes no arguments and reads nothing.
    pub fn measures_anything(&self) -> bool {
        self.measure_config_time || !self.measured_operations.is_empty()
    }

    /// Configuration-phase duration of the last build, when measured and
    /// reported.
    pub fn time_to_build_execution(&self) -> anyhow::Result<Option<Duration>> {
        if !self.measure_config_time {
            return Ok(None);
        }
        Ok(self.read_timings()?.remove(TIME_TO_BUILD_EXECUTION_KEY))
    }

    /// Durations of the measured build operations reported by the last build.
    /// Operations the build did not report are absent from the map.
    pub fn operation_durations(&self) -> anyhow::Result<HashMap<String, Duration>> {
        let mut timings = self.read_timings()?;
        Ok(self
            .measured_operations
            .iter()
            .filter_map(|operation| {
                timings
                    .remove(operation)
                    .map(|duration| (operation.clone(), duration))
            })
            .collect())
    }

    fn read_timings(&self) -> anyhow::Result<HashMap<String, Duration>> {
        if !self.measures_anything() {
            return Ok(HashMap::new());
        }
        let raw = match fs::read_to_string(self.timings_file.path()) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No timings file written by the last build");
                return Ok(HashMap::new());
            }
            Err(error) => return Err(error.into()),
        };

        let mut timings = HashMap::new();
        for line in raw.lines().filter(|line| !line.trim().is_empty()) {
            let (name, millis) = line
                .split_once('=')
                .with_context(|| format!("malformed timings line: {line}"))?;
            let millis: u64 = millis
                .trim()
                .parse()
                .with_context(|| format!("malformed duration in timings line: {line}"))?;
            timings.insert(name.trim().to_string(), Duration::from_millis(millis));
        }
        Ok(timings)
    }
}

impl ArgsCalculator for BuildOperationInstrumentation {
    fn calculate(&self, args: &mut ArgList) {
        args.add("--timings-file");
        args.add(self.timings_file.path().display().to_string());
        if self.measure_config_time {
            args.add("--time-build-execution");
        }
        for operation in &self.measured_operations {
            args.add("--measure-operation");
            args.add(operation.clone());
        }
    }
}
