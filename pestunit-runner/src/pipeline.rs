// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-process event pipeline.
//!
//! Each test runner process gets its own [`EventPipeline`]. Output chunks go
//! in; lines are assembled, parsed, repaired, correlated and dispatched one at
//! a time, so each line is fully handled before the next one is looked at.

use crate::{
    config::{FlowIdSearch, PestunitProfile},
    correlator::ResultCorrelator,
    dispatch::EventDispatcher,
    events::{ProcessExit, RunEvent},
    fixer::CompatibilityFixer,
    teamcity::{LineAssembler, ParsedLine, TestResultParser},
};
use std::fmt;
use tracing::debug;

/// Which output stream of a process a chunk came from.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum OutputStream {
    /// Standard output.
    Stdout,

    /// Standard error.
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// Settings for an [`EventPipeline`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PipelineSettings {
    /// How far back to search for missing flowIds.
    pub flow_id_search: FlowIdSearch,

    /// Whether to normalize Pest location hints.
    pub fix_location_hints: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            flow_id_search: FlowIdSearch::default(),
            fix_location_hints: true,
        }
    }
}

impl PipelineSettings {
    /// Reads pipeline settings from a profile.
    pub fn from_profile(profile: &PestunitProfile<'_>) -> Self {
        Self {
            flow_id_search: profile.flow_id_search(),
            fix_location_hints: profile.fix_location_hints(),
        }
    }
}

/// Turns the output of one test runner process into dispatched events.
#[derive(Debug)]
pub struct EventPipeline {
    stdout: LineAssembler,
    stderr: LineAssembler,
    parser: TestResultParser,
    correlator: ResultCorrelator,
    fixer: CompatibilityFixer,
    dispatcher: EventDispatcher,
}

impl EventPipeline {
    /// Creates a new pipeline that delivers events to `dispatcher`.
    pub fn new(dispatcher: EventDispatcher, settings: PipelineSettings) -> Self {
        Self {
            stdout: LineAssembler::new(),
            stderr: LineAssembler::new(),
            parser: TestResultParser::new(),
            correlator: ResultCorrelator::new(settings.flow_id_search),
            fixer: CompatibilityFixer::new(settings.fix_location_hints),
            dispatcher,
        }
    }

    /// Returns the dispatcher, to register more subscribers.
    pub fn dispatcher_mut(&mut self) -> &mut EventDispatcher {
        &mut self.dispatcher
    }

    /// Returns the correlator.
    pub fn correlator(&self) -> &ResultCorrelator {
        &self.correlator
    }

    /// Announces that the pipeline was created.
    pub fn start(&mut self) {
        self.dispatcher.emit(&RunEvent::Start);
    }

    /// Announces that `command` is about to run.
    pub fn run(&mut self, command: impl Into<String>) {
        self.dispatcher.emit(&RunEvent::Run {
            command: command.into(),
        });
    }

    /// Feeds a chunk of output from `stream`, handling every line it completes.
    pub fn push_chunk(&mut self, stream: OutputStream, chunk: &[u8]) {
        let lines = match stream {
            OutputStream::Stdout => self.stdout.push(chunk),
            OutputStream::Stderr => self.stderr.push(chunk),
        };
        for line in lines {
            self.process_line(&line);
        }
    }

    /// Handles a single complete line.
    pub fn process_line(&mut self, line: &str) {
        self.dispatcher.emit(&RunEvent::Line(line.to_owned()));

        for item in self.parser.parse(line) {
            match item {
                ParsedLine::Result(mut result) => {
                    self.fixer.apply(&self.correlator, &mut result);
                    if let Some(result) = self.correlator.correlate(result) {
                        self.dispatcher.emit(&RunEvent::Result(result));
                    }
                }
                ParsedLine::Info(info) => self.dispatcher.emit(&RunEvent::Info(info)),
                ParsedLine::Plain(text) => self.dispatcher.emit(&RunEvent::Output(text)),
            }
        }
    }

    /// Reports an error reading from or managing the process.
    pub fn error(&mut self, message: impl Into<String>) {
        self.dispatcher.emit(&RunEvent::Error(message.into()));
    }

    /// Tears down the pipeline after the process ended.
    ///
    /// Trailing partial lines are handled first. Tests and suites still open
    /// are discarded without producing results. Observers then see `abort`
    /// (if the process was killed), `close` and `done`.
    ///
    /// Returns the number of discarded tests and suites.
    pub fn finish(mut self, exit: ProcessExit) -> usize {
        for stream in [OutputStream::Stdout, OutputStream::Stderr] {
            let partial = match stream {
                OutputStream::Stdout => self.stdout.finish(),
                OutputStream::Stderr => self.stderr.finish(),
            };
            if let Some(line) = partial {
                debug!("{stream} ended without a trailing newline");
                self.process_line(&line);
            }
        }

        let discarded = self.correlator.discard_open();

        let code = match exit {
            ProcessExit::Exited { code } => code,
            ProcessExit::Aborted(reason) => {
                self.dispatcher.emit(&RunEvent::Abort { reason });
                None
            }
        };
        self.dispatcher.emit(&RunEvent::Close { code });
        self.dispatcher.emit(&RunEvent::Done);

        discarded
    }

    /// Tears down a pipeline whose process never ran. Observers only see `done`.
    pub fn done(mut self) {
        self.dispatcher.emit(&RunEvent::Done);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{AbortReason, EventKind, InfoEvent, ResultKind, TestResult};
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    type Events = Arc<Mutex<Vec<RunEvent>>>;

    fn collecting_pipeline(settings: PipelineSettings) -> (EventPipeline, Events) {
        let events = Events::default();
        let mut dispatcher = EventDispatcher::new();
        for &kind in EventKind::ALL {
            if kind == EventKind::Line {
                continue;
            }
            let events = events.clone();
            dispatcher.on(kind, move |event| events.lock().unwrap().push(event.clone()));
        }
        (EventPipeline::new(dispatcher, settings), events)
    }

    fn results(events: &Events) -> Vec<TestResult> {
        events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                RunEvent::Result(result) => Some(result.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn passing_test() {
        let (mut pipeline, events) = collecting_pipeline(PipelineSettings::default());
        pipeline.start();
        pipeline.push_chunk(
            OutputStream::Stdout,
            indoc! {"
                ##teamcity[testStarted name='test_passed' locationHint='php_qn://A.php::C::test_passed' flowId='12']
                ##teamcity[testFinished name='test_passed' duration='5' flowId='12']
            "}
            .as_bytes(),
        );
        assert_eq!(pipeline.finish(ProcessExit::Exited { code: Some(0) }), 0);

        let events = events.lock().unwrap();
        let kinds: Vec<_> = events.iter().map(RunEvent::kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Start,
                EventKind::TestStarted,
                EventKind::TestFinished,
                EventKind::Close,
                EventKind::Done,
            ]
        );
        let RunEvent::Result(terminal) = &events[2] else {
            panic!("expected a result, got {:?}", events[2]);
        };
        assert_eq!(terminal.duration, Some(5));
        assert_eq!(terminal.flow_id, Some(12));
        assert_eq!(terminal.message(), None);
        assert_eq!(events[3], RunEvent::Close { code: Some(0) });
    }

    #[test]
    fn legacy_fault_without_flow_id() {
        let (mut pipeline, events) = collecting_pipeline(PipelineSettings::default());
        pipeline.push_chunk(
            OutputStream::Stdout,
            indoc! {"
                ##teamcity[testSuiteStarted name='Tests\\Unit\\ExampleTest' flowId='7']
                ##teamcity[testStarted name='test_x' locationHint='pest_qn://tests/Unit/ExampleTest.php::test_x' flowId='7']
                ##teamcity[testFailed name='test_x' message='boom' details='tests/Unit/ExampleTest.php:9']
                ##teamcity[testFinished name='test_x' duration='3']
                ##teamcity[testSuiteFinished name='Tests\\Unit\\ExampleTest' flowId='7']
            "}
            .as_bytes(),
        );
        pipeline.finish(ProcessExit::Exited { code: Some(1) });

        let results = results(&events);
        assert_eq!(results.len(), 4);
        let failed = &results[2];
        assert_eq!(failed.kind, ResultKind::TestFailed);
        assert_eq!(failed.flow_id, Some(7));
        assert_eq!(failed.duration, Some(3));
        assert_eq!(failed.message(), Some("boom"));
        assert_eq!(results[3].kind, ResultKind::TestSuiteFinished);
    }

    #[test]
    fn plain_and_informational_lines() {
        let (mut pipeline, events) = collecting_pipeline(PipelineSettings::default());
        pipeline.push_chunk(
            OutputStream::Stdout,
            indoc! {"
                PHPUnit 11.0.0 by Sebastian Bergmann and contributors.

                some debug output
                ##teamcity[testCount count='1' flowId='1']
                OK (1 test, 1 assertion)
            "}
            .as_bytes(),
        );

        let kinds: Vec<_> = events.lock().unwrap().iter().map(RunEvent::kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::TestVersion,
                EventKind::Output,
                EventKind::Output,
                EventKind::TestCount,
                EventKind::TestResultSummary,
            ]
        );
        assert!(events.lock().unwrap().contains(&RunEvent::Output("some debug output".to_owned())));
    }

    #[test]
    fn every_line_is_announced_first() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = EventDispatcher::new();
        {
            let lines = lines.clone();
            dispatcher.on(EventKind::Line, move |event| {
                lines.lock().unwrap().push(format!("{:?}", event));
            });
        }
        {
            let lines = lines.clone();
            dispatcher.on(EventKind::Output, move |event| {
                lines.lock().unwrap().push(format!("{:?}", event));
            });
        }
        let mut pipeline = EventPipeline::new(dispatcher, PipelineSettings::default());
        pipeline.process_line("hello");
        pipeline.process_line("##teamcity[testCount count='1']");

        assert_eq!(
            *lines.lock().unwrap(),
            vec![
                r###"Line("hello")"###,
                r###"Output("hello")"###,
                r###"Line("##teamcity[testCount count='1']")"###,
            ]
        );
    }

    #[test]
    fn streams_are_assembled_separately() {
        let (mut pipeline, events) = collecting_pipeline(PipelineSettings::default());
        pipeline.push_chunk(OutputStream::Stdout, b"##teamcity[testStarted name='t' ");
        pipeline.push_chunk(OutputStream::Stderr, b"Deprecated: something\r\n");
        pipeline.push_chunk(OutputStream::Stdout, b"flowId='1']\r\n");

        let events = events.lock().unwrap();
        assert_eq!(events[0], RunEvent::Output("Deprecated: something".to_owned()));
        assert!(
            matches!(&events[1], RunEvent::Result(r) if r.kind == ResultKind::TestStarted && r.flow_id == Some(1))
        );
    }

    #[test]
    fn killed_process_discards_open_tests() {
        let (mut pipeline, events) = collecting_pipeline(PipelineSettings::default());
        pipeline.push_chunk(
            OutputStream::Stdout,
            b"##teamcity[testSuiteStarted name='Suite' flowId='1']\n##teamcity[testStarted name='slow' flowId='1']\nhalf a li",
        );
        let discarded = pipeline.finish(ProcessExit::Aborted(AbortReason::TimedOut));
        assert_eq!(discarded, 2);

        let events = events.lock().unwrap();
        let tail: Vec<_> = events.iter().skip(2).cloned().collect();
        assert_eq!(
            tail,
            vec![
                RunEvent::Output("half a li".to_owned()),
                RunEvent::Abort {
                    reason: AbortReason::TimedOut
                },
                RunEvent::Close { code: None },
                RunEvent::Done,
            ]
        );
        assert!(
            !events.iter().any(|event| matches!(
                event,
                RunEvent::Result(r) if r.kind.is_finished() || r.kind.is_fault()
            )),
            "no results are fabricated"
        );
    }

    #[test]
    fn location_hint_fix_follows_settings() {
        let line = "##teamcity[testStarted name='it works' locationHint='pest_qn:///app/tests/Unit/ExampleTest.php::it works with (1)' flowId='1']";

        let (mut pipeline, events) = collecting_pipeline(PipelineSettings::default());
        pipeline.process_line(line);
        assert_eq!(
            results(&events)[0].location_hint.as_deref(),
            Some("pest_qn://Unit/ExampleTest.php::it works with data set \"(1)\"")
        );

        let (mut pipeline, events) = collecting_pipeline(PipelineSettings {
            fix_location_hints: false,
            ..PipelineSettings::default()
        });
        pipeline.process_line(line);
        assert_eq!(
            results(&events)[0].location_hint.as_deref(),
            Some("pest_qn:///app/tests/Unit/ExampleTest.php::it works with (1)")
        );
    }

    #[test]
    fn run_and_error_events() {
        let (mut pipeline, events) = collecting_pipeline(PipelineSettings::default());
        pipeline.run("vendor/bin/phpunit --teamcity");
        pipeline.error("failed to read stdout");
        pipeline.done();

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                RunEvent::Run {
                    command: "vendor/bin/phpunit --teamcity".to_owned()
                },
                RunEvent::Error("failed to read stdout".to_owned()),
                RunEvent::Done,
            ]
        );
    }

    #[test]
    fn info_events_are_not_correlated() {
        let (mut pipeline, events) = collecting_pipeline(PipelineSettings::default());
        pipeline.process_line("Runtime:       PHP 8.3.4");
        assert_eq!(pipeline.correlator().open_count(), 0);
        assert!(matches!(
            &events.lock().unwrap()[0],
            RunEvent::Info(InfoEvent::Runtime { runtime, .. }) if runtime == "PHP 8.3.4"
        ));
    }
}
