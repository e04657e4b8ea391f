use std::path::{Path, PathBuf};

use crate::profiler::Profiler;

/// Cross-scenario invocation settings, fixed for a whole harness run.
pub struct InvocationSettings {
    project_dir: PathBuf,
    output_dir: PathBuf,
    profiler: Option<Box<dyn Profiler>>,
    measure_config_time: bool,
    dry_run: bool,
}

impl InvocationSettings {
    pub fn new(project_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
            output_dir: output_dir.into(),
            profiler: None,
            measure_config_time: false,
            dry_run: false,
        }
    }

    pub fn with_profiler(mut self, profiler: Box<dyn Profiler>) -> Self {
        self.profiler = Some(profiler);
        self
    }

    pub fn with_measure_config_time(mut self, measure: bool) -> Self {
        self.measure_config_time = measure;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn is_profile(&self) -> bool {
        self.profiler.is_some()
    }

    pub fn profiler(&self) -> Option<&dyn Profiler> {
        self.profiler.as_deref()
    }

    pub fn measure_config_time(&self) -> bool {
        self.measure_config_time
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }
}
