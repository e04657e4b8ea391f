use std::fs;
use std::path::PathBuf;

use anyhow::Context as _;
use crank_core::prelude::{BuildContext, ScenarioContext, ScenarioError};

pub type HookResult = anyhow::Result<()>;

/// Constructs the mutator for one scenario run; invoked exactly once per run.
pub type MutatorFactory = Box<dyn Fn() -> Box<dyn BuildMutator>>;

/// Hooks that may alter the working tree or environment around a scenario
/// and around each build. Every hook defaults to doing nothing.
///
/// `before_build`/`after_build` bracket one measured unit: the optional
/// cleanup step plus the build that follows it. `after_scenario` runs even
/// when the scenario fails partway.
pub trait BuildMutator {
    fn before_scenario(&mut self, _context: &ScenarioContext) -> HookResult {
        Ok(())
    }

    fn before_build(&mut self, _context: &BuildContext) -> HookResult {
        Ok(())
    }

    /// Runs after the measured unit, whether it succeeded or failed. An
    /// error returned here aborts the scenario.
    fn after_build(&mut self, _context: &BuildContext, _error: Option<&ScenarioError>) -> HookResult {
        Ok(())
    }

    fn after_scenario(&mut self, _context: &ScenarioContext) -> HookResult {
        Ok(())
    }
}

/// Applies several mutators in order, with the same sequencing semantics as
/// the argument calculator chain. An empty composite is a no-op.
#[derive(Default)]
pub struct CompositeBuildMutator {
    mutators: Vec<Box<dyn BuildMutator>>,
}

impl CompositeBuildMutator {
    pub fn new(mutators: Vec<Box<dyn BuildMutator>>) -> Self {
        Self { mutators }
    }
}

impl BuildMutator for CompositeBuildMutator {
    fn before_scenario(&mut self, context: &ScenarioContext) -> HookResult {
        for mutator in &mut self.mutators {
            mutator.before_scenario(context)?;
        }
        Ok(())
    }

    fn before_build(&mut self, context: &BuildContext) -> HookResult {
        for mutator in &mut self.mutators {
            mutator.before_build(context)?;
        }
        Ok(())
    }

    fn after_build(&mut self, context: &BuildContext, error: Option<&ScenarioError>) -> HookResult {
        for mutator in &mut self.mutators {
            mutator.after_build(context, error)?;
        }
        Ok(())
    }

    fn after_scenario(&mut self, context: &ScenarioContext) -> HookResult {
        for mutator in &mut self.mutators {
            mutator.after_scenario(context)?;
        }
        Ok(())
    }
}

/// Appends a unique marker line to a source file before every build so that
/// incremental builds always have work to do, then restores the original
/// contents when the scenario ends.
///
/// The marker is a C-style line comment; point this at a file whose language
/// tolerates one.
pub struct ApplyChangeToFileMutator {
    file: PathBuf,
    original: Option<String>,
}

impl ApplyChangeToFileMutator {
    pub fn new(file: PathBuf) -> Self {
        Self {
            file,
            original: None,
        }
    }
}

impl BuildMutator for ApplyChangeToFileMutator {
    fn before_scenario(&mut self, _context: &ScenarioContext) -> HookResult {
        let original = fs::read_to_string(&self.file)
            .with_context(|| format!("cannot read file to mutate: {}", self.file.display()))?;
        self.original = Some(original);
        Ok(())
    }

    fn before_build(&mut self, context: &BuildContext) -> HookResult {
        let original = self
            .original
            .as_ref()
            .context("before_scenario has not run")?;
        let mutated = format!("{}\n// {}\n", original.trim_end(), context.unique_build_id());
        fs::write(&self.file, mutated)
            .with_context(|| format!("cannot mutate file: {}", self.file.display()))?;
        Ok(())
    }

    fn after_scenario(&mut self, _context: &ScenarioContext) -> HookResult {
        if let Some(original) = self.original.take() {
            fs::write(&self.file, original)
                .with_context(|| format!("cannot restore file: {}", self.file.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crank_core::prelude::Phase;

    fn contexts() -> (ScenarioContext, BuildContext) {
        let scenario = ScenarioContext::new("assemble", "assemble");
        let build = scenario.with_build(Phase::Measure, 1);
        (scenario, build)
    }

    #[test]
    fn apply_change_mutates_and_restores() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("App.java");
        fs::write(&file, "class App {}\n").unwrap();

        let (scenario, build) = contexts();
        let mut mutator = ApplyChangeToFileMutator::new(file.clone());

        mutator.before_scenario(&scenario).unwrap();
        mutator.before_build(&build).unwrap();
        let mutated = fs::read_to_string(&file).unwrap();
        assert!(mutated.contains("// assemble-measured-1"));

        mutator.after_scenario(&scenario).unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "class App {}\n");
    }

    #[test]
    fn apply_change_fails_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let (scenario, _) = contexts();

        let mut mutator = ApplyChangeToFileMutator::new(dir.path().join("missing.java"));
        assert!(mutator.before_scenario(&scenario).is_err());
    }

    #[test]
    fn composite_runs_mutators_in_order() {
        use std::cell::RefCell;
        use std::rc::Rc;

        struct Recorder {
            name: &'static str,
            calls: Rc<RefCell<Vec<String>>>,
        }

        impl BuildMutator for Recorder {
            fn before_build(&mut self, _context: &BuildContext) -> HookResult {
                self.calls.borrow_mut().push(self.name.to_string());
                Ok(())
            }
        }

        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut composite = CompositeBuildMutator::new(vec![
            Box::new(Recorder {
                name: "first",
                calls: calls.clone(),
            }),
            Box::new(Recorder {
                name: "second",
                calls: calls.clone(),
            }),
        ]);

        let (_, build) = contexts();
        composite.before_build(&build).unwrap();

        assert_eq!(*calls.borrow(), ["first", "second"]);
    }
}
