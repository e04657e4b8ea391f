use std::cell::{Cell, RefCell};
use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;

use crank_runner::prelude::{
    ArgList, ArgsCalculator, BuildAction, BuildClient, BuildConfiguration, BuildConnection,
    BuildContext, BuildFailure, BuildMutator, BuildSpec, DaemonControl, HookResult,
    InvocationMode, InvocationResult, InvocationSettings, NoAction, PidInstrumentation, Profiler,
    ProfilerController, RunTargets, Sample, ScenarioContext, ScenarioDefinition,
    ScenarioDefinitionBuilder, ScenarioError, ScenarioInvoker,
};
use pretty_assertions::assert_eq;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    DaemonStop,
    Connect,
    BeforeScenario,
    BeforeBuild(String),
    /// One build invocation reaching the client, tagged with its targets.
    Build(String),
    AfterBuild(String, bool),
    AfterScenario,
    StartSession,
    StartRecording,
    StopRecording(String),
    StopSession,
    Close,
}

type EventLog = Rc<RefCell<Vec<Event>>>;

/// Client whose connection reports scripted daemon pids through the pid
/// side channel, exactly as an instrumented build tool would.
#[derive(Clone)]
struct MockClient {
    events: EventLog,
    pids: Rc<Vec<String>>,
    next_pid: Rc<Cell<usize>>,
    fail_on_call: Option<usize>,
    calls: Rc<Cell<usize>>,
    build_args_seen: Rc<RefCell<Vec<Vec<String>>>>,
}

impl MockClient {
    fn new(events: EventLog, pids: &[&str]) -> Self {
        Self {
            events,
            pids: Rc::new(pids.iter().map(|pid| pid.to_string()).collect()),
            next_pid: Rc::new(Cell::new(0)),
            fail_on_call: None,
            calls: Rc::new(Cell::new(0)),
            build_args_seen: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Makes the nth (1-based) build invocation fail.
    fn failing_on_call(mut self, call: usize) -> Self {
        self.fail_on_call = Some(call);
        self
    }
}

impl BuildClient for MockClient {
    fn connect(&self, _project_dir: &Path) -> anyhow::Result<Box<dyn BuildConnection>> {
        self.events.borrow_mut().push(Event::Connect);
        Ok(Box::new(MockConnection {
            client: self.clone(),
        }))
    }
}

struct MockConnection {
    client: MockClient,
}

impl BuildConnection for MockConnection {
    fn run_build(&mut self, spec: &BuildSpec<'_>, output: &mut Vec<u8>) -> Result<(), BuildFailure> {
        let client = &self.client;
        client.calls.set(client.calls.get() + 1);
        client
            .events
            .borrow_mut()
            .push(Event::Build(spec.targets.join(" ")));
        client.build_args_seen.borrow_mut().push(spec.build_args.to_vec());

        if client.fail_on_call == Some(client.calls.get()) {
            output.extend_from_slice(b"BUILD FAILED: simulated breakage\n");
            return Err(BuildFailure::new("simulated build failure"));
        }

        output.extend_from_slice(b"BUILD SUCCESSFUL\n");
        if let Some(pid_file) = flag_value(spec.build_args, "--pid-file") {
            let index = client.next_pid.get().min(client.pids.len() - 1);
            client.next_pid.set(client.next_pid.get() + 1);
            fs::write(pid_file, &client.pids[index])
                .map_err(|error| BuildFailure::new(error.to_string()))?;
        }
        Ok(())
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.client.events.borrow_mut().push(Event::Close);
        Ok(())
    }
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|index| args.get(index + 1))
        .map(String::as_str)
}

struct RecordingDaemonControl {
    events: EventLog,
}

impl DaemonControl for RecordingDaemonControl {
    fn stop(&self, _configuration: &BuildConfiguration) -> anyhow::Result<()> {
        self.events.borrow_mut().push(Event::DaemonStop);
        Ok(())
    }
}

/// Profiler that records every controller call; optionally contributes an
/// extra argument to the instrumented builds.
struct RecordingProfiler {
    events: EventLog,
    instrument: bool,
}

struct AddInstrumentedFlag;

impl ArgsCalculator for AddInstrumentedFlag {
    fn calculate(&self, args: &mut ArgList) {
        args.add("--instrumented");
    }
}

impl Profiler for RecordingProfiler {
    fn instrumented_build_args_calculator(
        &self,
        _scenario: &ScenarioDefinition,
    ) -> Option<Box<dyn ArgsCalculator>> {
        self.instrument
            .then(|| Box::new(AddInstrumentedFlag) as Box<dyn ArgsCalculator>)
    }

    fn new_controller(
        &self,
        _expected_pid: Option<&str>,
        _scenario: &ScenarioDefinition,
    ) -> Box<dyn ProfilerController> {
        Box::new(RecordingController {
            events: self.events.clone(),
        })
    }
}

struct RecordingController {
    events: EventLog,
}

impl ProfilerController for RecordingController {
    fn start_session(&mut self) -> anyhow::Result<()> {
        self.events.borrow_mut().push(Event::StartSession);
        Ok(())
    }

    fn start_recording(&mut self) -> anyhow::Result<()> {
        self.events.borrow_mut().push(Event::StartRecording);
        Ok(())
    }

    fn stop_recording(&mut self, daemon_pid: &str) -> anyhow::Result<()> {
        self.events
            .borrow_mut()
            .push(Event::StopRecording(daemon_pid.to_string()));
        Ok(())
    }

    fn stop_session(&mut self) -> anyhow::Result<()> {
        self.events.borrow_mut().push(Event::StopSession);
        Ok(())
    }
}

struct RecordingMutator {
    events: EventLog,
    fail_after_build: bool,
}

impl BuildMutator for RecordingMutator {
    fn before_scenario(&mut self, _context: &ScenarioContext) -> HookResult {
        self.events.borrow_mut().push(Event::BeforeScenario);
        Ok(())
    }

    fn before_build(&mut self, context: &BuildContext) -> HookResult {
        self.events
            .borrow_mut()
            .push(Event::BeforeBuild(context.display_build_number()));
        Ok(())
    }

    fn after_build(&mut self, context: &BuildContext, error: Option<&ScenarioError>) -> HookResult {
        self.events.borrow_mut().push(Event::AfterBuild(
            context.display_build_number(),
            error.is_some(),
        ));
        if self.fail_after_build {
            anyhow::bail!("mutator rejected the build");
        }
        Ok(())
    }

    fn after_scenario(&mut self, _context: &ScenarioContext) -> HookResult {
        self.events.borrow_mut().push(Event::AfterScenario);
        Ok(())
    }
}

/// Cleanup action answering `does_something` from a script, one answer per
/// query, defaulting to false once the script runs out.
struct ScriptedCleanupAction {
    answers: Vec<bool>,
    next: Cell<usize>,
    targets: Vec<String>,
}

impl ScriptedCleanupAction {
    fn new(answers: Vec<bool>) -> Self {
        Self {
            answers,
            next: Cell::new(0),
            targets: vec!["clean".to_string()],
        }
    }
}

impl BuildAction for ScriptedCleanupAction {
    fn does_something(&self) -> bool {
        let index = self.next.get();
        self.next.set(index + 1);
        self.answers.get(index).copied().unwrap_or(false)
    }

    fn display_name(&self) -> String {
        "scripted cleanup".to_string()
    }

    fn targets(&self) -> &[String] {
        &self.targets
    }
}

struct Harness {
    events: EventLog,
    engine: ScenarioInvoker,
    build_args_seen: Rc<RefCell<Vec<Vec<String>>>>,
    output_root: tempfile::TempDir,
}

impl Harness {
    fn new(pids: &[&str], fail_on_call: Option<usize>) -> Self {
        let events: EventLog = Rc::new(RefCell::new(Vec::new()));
        let mut client = MockClient::new(events.clone(), pids);
        if let Some(call) = fail_on_call {
            client = client.failing_on_call(call);
        }
        let build_args_seen = client.build_args_seen.clone();
        let engine = ScenarioInvoker::new(
            Box::new(RecordingDaemonControl {
                events: events.clone(),
            }),
            Arc::new(PidInstrumentation::new().unwrap()),
            Box::new(client),
        );
        Self {
            events,
            engine,
            build_args_seen,
            output_root: tempfile::tempdir().unwrap(),
        }
    }

    fn scenario_builder(&self, mode: InvocationMode) -> ScenarioDefinitionBuilder {
        let events = self.events.clone();
        ScenarioDefinitionBuilder::new("assemble", BuildConfiguration::new("/not/a/build/tool"))
            .with_output_dir(self.output_root.path().join("assemble"))
            .with_build_action(RunTargets::new(vec!["assemble".to_string()]))
            .with_cleanup_action(NoAction)
            .with_invocation_mode(mode)
            .use_mutator(Box::new(move || -> Box<dyn BuildMutator> {
                Box::new(RecordingMutator {
                    events: events.clone(),
                    fail_after_build: false,
                })
            }))
    }

    fn settings(&self, profiler: Option<RecordingProfiler>) -> InvocationSettings {
        let settings =
            InvocationSettings::new(self.output_root.path(), self.output_root.path().join("out"));
        match profiler {
            Some(profiler) => settings.with_profiler(Box::new(profiler)),
            None => settings,
        }
    }

    fn recording_profiler(&self) -> RecordingProfiler {
        RecordingProfiler {
            events: self.events.clone(),
            instrument: false,
        }
    }

    fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    fn run(
        &self,
        scenario: &ScenarioDefinition,
        settings: &InvocationSettings,
    ) -> (Result<(), ScenarioError>, Vec<InvocationResult>) {
        let mut results = Vec::new();
        let outcome = {
            let mut consumer = |result: InvocationResult| results.push(result);
            self.engine.run(scenario, settings, &mut consumer)
        };
        (outcome, results)
    }
}

#[test]
fn warm_daemon_scenario_streams_measured_results_in_order() {
    let harness = Harness::new(&["1000"], None);
    let scenario = harness
        .scenario_builder(InvocationMode::WarmDaemon)
        .with_warm_ups(1)
        .with_iterations(2)
        .build();
    let settings = harness.settings(Some(harness.recording_profiler()));

    let (outcome, results) = harness.run(&scenario, &settings);

    outcome.unwrap();
    let delivered: Vec<_> = results
        .iter()
        .map(|result| {
            (
                result.context().display_build_number(),
                result.daemon_pid().to_string(),
            )
        })
        .collect();
    assert_eq!(
        delivered,
        [
            ("measured build #1".to_string(), "1000".to_string()),
            ("measured build #2".to_string(), "1000".to_string()),
        ]
    );

    assert_eq!(
        harness.events(),
        vec![
            Event::DaemonStop,
            Event::Connect,
            Event::BeforeScenario,
            Event::BeforeBuild("warm-up build #1".to_string()),
            Event::Build("assemble".to_string()),
            Event::AfterBuild("warm-up build #1".to_string(), false),
            Event::StartSession,
            Event::BeforeBuild("measured build #1".to_string()),
            Event::StartRecording,
            Event::Build("assemble".to_string()),
            Event::AfterBuild("measured build #1".to_string(), false),
            Event::BeforeBuild("measured build #2".to_string()),
            Event::Build("assemble".to_string()),
            Event::StopRecording("1000".to_string()),
            Event::AfterBuild("measured build #2".to_string(), false),
            Event::StopSession,
            Event::AfterScenario,
            Event::Close,
            Event::DaemonStop,
        ]
    );
}

#[test]
fn daemon_change_under_reuse_policy_is_fatal() {
    let harness = Harness::new(&["1000", "2000"], None);
    let scenario = harness
        .scenario_builder(InvocationMode::WarmDaemon)
        .with_warm_ups(2)
        .with_iterations(3)
        .build();
    let settings = harness.settings(None);

    let (outcome, results) = harness.run(&scenario, &settings);

    assert!(matches!(outcome, Err(ScenarioError::DaemonIdentity(_))));
    assert!(results.is_empty());

    let events = harness.events();
    // The second warm-up build completed before the check fired.
    assert!(events.contains(&Event::AfterBuild("warm-up build #2".to_string(), false)));
    // No measured build started, but the cleanup block still ran.
    assert!(!events.contains(&Event::BeforeBuild("measured build #1".to_string())));
    let tail = &events[events.len() - 3..];
    assert_eq!(
        tail,
        [Event::AfterScenario, Event::Close, Event::DaemonStop]
    );
}

#[test]
fn cold_daemon_scenario_requires_a_fresh_daemon_per_build() {
    let harness = Harness::new(&["1000", "2000", "3000", "4000"], None);
    let scenario = harness
        .scenario_builder(InvocationMode::ColdDaemon)
        .with_warm_ups(2)
        .with_iterations(2)
        .build();
    let settings = harness.settings(Some(harness.recording_profiler()));

    let (outcome, results) = harness.run(&scenario, &settings);

    outcome.unwrap();
    assert_eq!(results.len(), 2);

    let events = harness.events();
    // One scenario-level stop on each side, plus one stop before each of the
    // four builds.
    let stops = events.iter().filter(|event| **event == Event::DaemonStop).count();
    assert_eq!(stops, 6);
    // Every measured build is bracketed by its own recording.
    assert_eq!(
        events
            .iter()
            .filter(|event| **event == Event::StartRecording)
            .count(),
        2
    );
    assert_eq!(
        events
            .iter()
            .filter(|event| matches!(event, Event::StopRecording(_)))
            .count(),
        2
    );
}

#[test]
fn daemon_reuse_under_cold_policy_is_fatal() {
    let harness = Harness::new(&["5000"], None);
    let scenario = harness
        .scenario_builder(InvocationMode::ColdDaemon)
        .with_warm_ups(2)
        .with_iterations(1)
        .build();
    let settings = harness.settings(None);

    let (outcome, _) = harness.run(&scenario, &settings);

    assert!(matches!(outcome, Err(ScenarioError::DaemonIdentity(_))));
}

#[test]
fn profiling_without_warm_up_fails_before_any_side_effect() {
    let harness = Harness::new(&["1000"], None);
    let scenario = harness
        .scenario_builder(InvocationMode::WarmDaemon)
        .with_warm_ups(0)
        .with_iterations(3)
        .build();
    let settings = harness.settings(Some(harness.recording_profiler()));

    let (outcome, results) = harness.run(&scenario, &settings);

    assert!(matches!(outcome, Err(ScenarioError::Configuration(_))));
    assert!(results.is_empty());
    // No daemon stop, no connection, not even the output directory.
    assert_eq!(harness.events(), Vec::<Event>::new());
    assert!(!scenario.output_dir().exists());
}

#[test]
fn recording_is_rebracketed_around_builds_whose_cleanup_does_work() {
    let harness = Harness::new(&["1000"], None);
    // Queried once per cleanup opportunity and once per stop decision; true
    // exactly while the iteration-2 cleanup is pending or just done.
    let scenario = harness
        .scenario_builder(InvocationMode::WarmDaemon)
        .with_warm_ups(1)
        .with_iterations(3)
        .with_cleanup_action(ScriptedCleanupAction::new(vec![
            false, false, true, true, true, false,
        ]))
        .build();
    let settings = harness.settings(Some(harness.recording_profiler()));

    let (outcome, results) = harness.run(&scenario, &settings);

    outcome.unwrap();
    assert_eq!(results.len(), 3);

    let recording_events: Vec<_> = harness
        .events()
        .into_iter()
        .filter(|event| {
            matches!(
                event,
                Event::StartRecording | Event::StopRecording(_) | Event::Build(_)
            )
        })
        .collect();
    assert_eq!(
        recording_events,
        vec![
            // Warm-up runs before the session; no recording events.
            Event::Build("assemble".to_string()),
            // Iteration 1: bracketed because the next cleanup will do work.
            Event::StartRecording,
            Event::Build("assemble".to_string()),
            Event::StopRecording("1000".to_string()),
            // Iteration 2: its cleanup ran, so it gets its own bracket.
            Event::Build("clean".to_string()),
            Event::StartRecording,
            Event::Build("assemble".to_string()),
            Event::StopRecording("1000".to_string()),
            // Iteration 3: fresh bracket, closed because it is the last build.
            Event::StartRecording,
            Event::Build("assemble".to_string()),
            Event::StopRecording("1000".to_string()),
        ]
    );
}

#[test]
fn trivial_cleanup_keeps_one_recording_across_all_builds() {
    let harness = Harness::new(&["1000"], None);
    let scenario = harness
        .scenario_builder(InvocationMode::WarmDaemon)
        .with_warm_ups(1)
        .with_iterations(3)
        .build();
    let settings = harness.settings(Some(harness.recording_profiler()));

    let (outcome, _) = harness.run(&scenario, &settings);

    outcome.unwrap();
    let events = harness.events();
    assert_eq!(
        events
            .iter()
            .filter(|event| **event == Event::StartRecording)
            .count(),
        1
    );
    assert_eq!(
        events
            .iter()
            .filter(|event| matches!(event, Event::StopRecording(_)))
            .count(),
        1
    );
}

#[test]
fn client_failure_mid_measurement_aborts_but_cleans_up() {
    // Calls: warm-up #1, measured #1, measured #2 (fails).
    let harness = Harness::new(&["1000"], Some(3));
    let scenario = harness
        .scenario_builder(InvocationMode::WarmDaemon)
        .with_warm_ups(1)
        .with_iterations(3)
        .build();
    let settings = harness.settings(Some(harness.recording_profiler()));

    let (outcome, results) = harness.run(&scenario, &settings);

    assert!(matches!(outcome, Err(ScenarioError::BuildInvocation(_))));
    // Iteration 1 stays delivered; nothing for iterations 2 and 3.
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].context().display_build_number(), "measured build #1");

    let events = harness.events();
    assert!(events.contains(&Event::AfterBuild("measured build #2".to_string(), true)));
    assert!(!events.contains(&Event::BeforeBuild("measured build #3".to_string())));
    assert!(!events.contains(&Event::StopSession));
    // Exactly one more daemon stop after the failure.
    let stops = events.iter().filter(|event| **event == Event::DaemonStop).count();
    assert_eq!(stops, 2);
    let tail = &events[events.len() - 3..];
    assert_eq!(
        tail,
        [Event::AfterScenario, Event::Close, Event::DaemonStop]
    );
}

#[test]
fn after_build_hook_failure_aborts_without_delivering_the_result() {
    let harness = Harness::new(&["1000"], None);
    let events = harness.events.clone();
    let scenario = harness
        .scenario_builder(InvocationMode::WarmDaemon)
        .with_warm_ups(0)
        .with_iterations(2)
        .use_mutator(Box::new(move || -> Box<dyn BuildMutator> {
            Box::new(RecordingMutator {
                events: events.clone(),
                fail_after_build: true,
            })
        }))
        .build();
    let settings = harness.settings(None);

    let (outcome, results) = harness.run(&scenario, &settings);

    assert!(matches!(outcome, Err(ScenarioError::Mutator(_))));
    assert!(results.is_empty());
    let tail_events = harness.events();
    let tail = &tail_events[tail_events.len() - 3..];
    assert_eq!(
        tail,
        [Event::AfterScenario, Event::Close, Event::DaemonStop]
    );
}

#[test]
fn samples_are_deterministic_and_ordered() {
    let harness = Harness::new(&["1000"], None);
    let scenario = harness
        .scenario_builder(InvocationMode::WarmDaemon)
        .with_measured_operations(vec!["configuration".to_string(), "dex".to_string()])
        .build();
    let settings = harness.settings(None).with_measure_config_time(true);

    let samples = harness.engine.samples_for(&settings, &scenario);
    let names: Vec<_> = samples.iter().map(Sample::name).collect();
    assert_eq!(
        names,
        ["execution", "time to build execution", "configuration", "dex"]
    );

    assert_eq!(samples, harness.engine.samples_for(&settings, &scenario));
}

#[test]
fn instrumented_builds_reuse_the_all_builds_args_without_a_profiler() {
    let harness = Harness::new(&["1000"], None);
    let scenario = harness
        .scenario_builder(InvocationMode::WarmDaemon)
        .with_warm_ups(1)
        .with_iterations(1)
        .build();
    let settings = harness.settings(None);

    let (outcome, _) = harness.run(&scenario, &settings);

    outcome.unwrap();
    let seen = harness.build_args_seen.borrow();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], seen[1]);
}

#[test]
fn instrumented_builds_get_the_profiler_args_on_top_of_the_baseline() {
    let harness = Harness::new(&["1000"], None);
    let scenario = harness
        .scenario_builder(InvocationMode::WarmDaemon)
        .with_warm_ups(1)
        .with_iterations(1)
        .build();
    let settings = harness.settings(Some(RecordingProfiler {
        events: harness.events.clone(),
        instrument: true,
    }));

    let (outcome, _) = harness.run(&scenario, &settings);

    outcome.unwrap();
    let seen = harness.build_args_seen.borrow();
    assert_eq!(seen.len(), 2);
    let warm_up_args = &seen[0];
    let measured_args = &seen[1];
    assert!(!warm_up_args.contains(&"--instrumented".to_string()));
    assert!(measured_args.contains(&"--instrumented".to_string()));
    // Everything else is the shared baseline.
    let mut measured_without_extra = measured_args.clone();
    measured_without_extra.retain(|arg| arg != "--instrumented");
    assert_eq!(&measured_without_extra, warm_up_args);
}

#[test]
fn scenario_output_dir_is_created_before_builds_run() {
    let harness = Harness::new(&["1000"], None);
    let scenario = harness
        .scenario_builder(InvocationMode::WarmDaemon)
        .with_warm_ups(1)
        .with_iterations(1)
        .build();
    let settings = harness.settings(None);

    let (outcome, _) = harness.run(&scenario, &settings);

    outcome.unwrap();
    assert!(scenario.output_dir().is_dir());
}
