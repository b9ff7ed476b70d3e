// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Events produced while decoding test runner output.
//!
//! The central types are [`TestResult`], the record for one test or suite
//! lifecycle event, and [`RunEvent`], the payload handed to subscribers by the
//! [`EventDispatcher`](crate::dispatch::EventDispatcher).

use crate::errors::EventKindParseError;
use serde::Serialize;
use std::{fmt, str::FromStr};

/// The kind of a test or suite lifecycle event.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ResultKind {
    /// A test suite started.
    TestSuiteStarted,

    /// A test suite finished.
    TestSuiteFinished,

    /// A test started.
    TestStarted,

    /// A test finished.
    TestFinished,

    /// A test failed. This is a fault kind.
    TestFailed,

    /// A test was ignored (skipped, incomplete or risky). This is a fault kind.
    TestIgnored,
}

impl ResultKind {
    /// Looks up a result kind by its service message name, e.g. `testStarted`.
    pub fn from_message_name(name: &str) -> Option<Self> {
        let kind = match name {
            "testSuiteStarted" => Self::TestSuiteStarted,
            "testSuiteFinished" => Self::TestSuiteFinished,
            "testStarted" => Self::TestStarted,
            "testFinished" => Self::TestFinished,
            "testFailed" => Self::TestFailed,
            "testIgnored" => Self::TestIgnored,
            _ => return None,
        };
        Some(kind)
    }

    /// Returns the service message name for this kind.
    pub fn message_name(self) -> &'static str {
        self.event_kind().as_str()
    }

    /// Returns true if this kind opens a correlation entry.
    pub fn is_started(self) -> bool {
        matches!(self, Self::TestSuiteStarted | Self::TestStarted)
    }

    /// Returns true if this kind closes a correlation entry.
    pub fn is_finished(self) -> bool {
        matches!(self, Self::TestSuiteFinished | Self::TestFinished)
    }

    /// Returns true if this is a fault kind (failed or ignored).
    pub fn is_fault(self) -> bool {
        matches!(self, Self::TestFailed | Self::TestIgnored)
    }

    /// Returns the event kind subscribers register for.
    pub fn event_kind(self) -> EventKind {
        match self {
            Self::TestSuiteStarted => EventKind::TestSuiteStarted,
            Self::TestSuiteFinished => EventKind::TestSuiteFinished,
            Self::TestStarted => EventKind::TestStarted,
            Self::TestFinished => EventKind::TestFinished,
            Self::TestFailed => EventKind::TestFailed,
            Self::TestIgnored => EventKind::TestIgnored,
        }
    }
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message_name())
    }
}

/// The key used to correlate start, fault and finish events.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct CorrelationKey {
    /// The logical name of the test or suite.
    pub name: String,

    /// The flow the test or suite runs in, if the runner reported one.
    pub flow_id: Option<u64>,
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.flow_id {
            Some(flow_id) => write!(f, "{} (flow {flow_id})", self.name),
            None => write!(f, "{} (no flow)", self.name),
        }
    }
}

/// A source location reported alongside a fault.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SourceLocation {
    /// The file the location points into.
    pub file: String,

    /// The 1-based line number.
    pub line: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// The fault fields of a failed or ignored test.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Fault {
    /// The fault message. Multiple faults for one test are joined by a blank line.
    pub message: String,

    /// Source locations, in the order they were reported.
    pub details: Vec<SourceLocation>,

    /// The fault type, e.g. `comparisonFailure`.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub fault_type: Option<String>,

    /// The expected value of a failed comparison.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,

    /// The actual value of a failed comparison.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
}

impl Fault {
    /// Appends another fault reported for the same test.
    pub fn append(&mut self, other: Fault) {
        if !other.message.is_empty() {
            if self.message.is_empty() {
                self.message = other.message;
            } else {
                self.message.push_str("\n\n");
                self.message.push_str(&other.message);
            }
        }
        self.details.extend(other.details);
    }
}

/// A test or suite lifecycle event.
///
/// Started events are dispatched as soon as they're seen. Finished events are
/// dispatched as terminal records: the merge of the started event, any
/// faults, and the finished event itself.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    /// The kind of event.
    pub kind: ResultKind,

    /// The logical name of the test or suite.
    pub name: String,

    /// The flow the test or suite runs in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<u64>,

    /// The test identifier, derived from the location hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// The file the test or suite lives in, derived from the location hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// The location hint as reported by the runner.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_hint: Option<String>,

    /// The duration in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,

    /// Fault fields, if this test failed or was ignored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<Fault>,
}

impl TestResult {
    /// Creates a new result with only a kind and a name.
    pub fn new(kind: ResultKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            flow_id: None,
            id: None,
            file: None,
            location_hint: None,
            duration: None,
            fault: None,
        }
    }

    /// Returns the correlation key for this result.
    pub fn key(&self) -> CorrelationKey {
        CorrelationKey {
            name: self.name.clone(),
            flow_id: self.flow_id,
        }
    }

    /// Returns the fault message, if any.
    pub fn message(&self) -> Option<&str> {
        self.fault.as_ref().map(|fault| fault.message.as_str())
    }

    /// Returns the duration as a [`std::time::Duration`].
    pub fn elapsed(&self) -> Option<std::time::Duration> {
        self.duration.map(std::time::Duration::from_millis)
    }
}

/// Counts parsed from a result summary line.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ResultSummary {
    /// Total number of tests.
    pub tests: usize,
    /// Number of assertions, if reported.
    pub assertions: Option<usize>,
    /// Tests that passed. Only Pest reports this directly.
    pub passed: Option<usize>,
    /// Tests that errored.
    pub errors: usize,
    /// Tests that failed.
    pub failures: usize,
    /// Warnings.
    pub warnings: usize,
    /// Deprecations, including PHPUnit deprecations.
    pub deprecations: usize,
    /// Notices.
    pub notices: usize,
    /// Skipped tests.
    pub skipped: usize,
    /// Incomplete tests.
    pub incomplete: usize,
    /// Risky tests.
    pub risky: usize,
}

impl ResultSummary {
    /// Returns true if no test errored or failed.
    pub fn is_success(&self) -> bool {
        self.errors == 0 && self.failures == 0
    }
}

/// An informational event. These are never correlated.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InfoEvent {
    /// The runner announced its version.
    Version {
        /// The line as printed.
        text: String,
        /// The runner name, e.g. `PHPUnit` or `ParaTest`.
        runner: String,
        /// The version string.
        version: String,
    },

    /// The runner announced the PHP runtime.
    Runtime {
        /// The line as printed.
        text: String,
        /// The runtime, e.g. `PHP 8.3.4`.
        runtime: String,
    },

    /// The runner announced the configuration file in use.
    Configuration {
        /// The line as printed.
        text: String,
        /// The configuration path.
        path: String,
    },

    /// The runner announced the number of worker processes.
    Processes {
        /// The line as printed.
        text: String,
        /// The number of worker processes.
        processes: usize,
    },

    /// The runner announced the number of tests it's going to run.
    Count {
        /// The line as printed.
        text: String,
        /// The number of tests.
        count: usize,
        /// The flow this count belongs to.
        #[serde(skip_serializing_if = "Option::is_none")]
        flow_id: Option<u64>,
    },

    /// The runner printed the time and memory taken.
    Duration {
        /// The line as printed.
        text: String,
        /// The time as printed, e.g. `00:00.049`.
        time: String,
        /// The memory as printed, e.g. `6.00 MB`.
        #[serde(skip_serializing_if = "Option::is_none")]
        memory: Option<String>,
    },

    /// The runner printed the result summary.
    ResultSummary {
        /// The line as printed.
        text: String,
        /// The parsed counts.
        summary: ResultSummary,
    },
}

impl InfoEvent {
    /// Returns the line this event was parsed from.
    pub fn text(&self) -> &str {
        match self {
            Self::Version { text, .. }
            | Self::Runtime { text, .. }
            | Self::Configuration { text, .. }
            | Self::Processes { text, .. }
            | Self::Count { text, .. }
            | Self::Duration { text, .. }
            | Self::ResultSummary { text, .. } => text,
        }
    }

    /// Returns the event kind subscribers register for.
    pub fn event_kind(&self) -> EventKind {
        match self {
            Self::Version { .. } => EventKind::TestVersion,
            Self::Runtime { .. } => EventKind::TestRuntime,
            Self::Configuration { .. } => EventKind::TestConfiguration,
            Self::Processes { .. } => EventKind::TestProcesses,
            Self::Count { .. } => EventKind::TestCount,
            Self::Duration { .. } => EventKind::TestDuration,
            Self::ResultSummary { .. } => EventKind::TestResultSummary,
        }
    }
}

/// The reason a process was killed before it exited on its own.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AbortReason {
    /// The run was cancelled.
    Cancelled,

    /// The process hit its configured timeout.
    TimedOut,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => f.write_str("cancelled"),
            Self::TimedOut => f.write_str("timed out"),
        }
    }
}

/// How a test runner process ended.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ProcessExit {
    /// The process exited on its own.
    Exited {
        /// The exit code, or `None` if the process was terminated by a signal.
        code: Option<i32>,
    },

    /// The process was killed.
    Aborted(AbortReason),
}

impl ProcessExit {
    /// Returns true if the process exited on its own with code 0.
    pub fn is_success(self) -> bool {
        matches!(self, Self::Exited { code: Some(0) })
    }
}

/// The symbol subscribers register for.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum EventKind {
    /// A suite started.
    TestSuiteStarted,
    /// A suite finished.
    TestSuiteFinished,
    /// A test started.
    TestStarted,
    /// A test passed.
    TestFinished,
    /// A test failed.
    TestFailed,
    /// A test was ignored.
    TestIgnored,
    /// The runner version line.
    TestVersion,
    /// The runtime line.
    TestRuntime,
    /// The configuration line.
    TestConfiguration,
    /// The worker processes line.
    TestProcesses,
    /// The test count message.
    TestCount,
    /// The time and memory line.
    TestDuration,
    /// The result summary line.
    TestResultSummary,
    /// The pipeline was created.
    Start,
    /// The process is about to run.
    Run,
    /// A raw line was received.
    Line,
    /// Plain output that isn't part of the protocol.
    Output,
    /// An error occurred while spawning or reading from the process.
    Error,
    /// The process closed.
    Close,
    /// The process was killed.
    Abort,
    /// The pipeline is done; no further events follow.
    Done,
}

impl EventKind {
    /// All event kinds, in declaration order.
    pub const ALL: &'static [EventKind] = &[
        Self::TestSuiteStarted,
        Self::TestSuiteFinished,
        Self::TestStarted,
        Self::TestFinished,
        Self::TestFailed,
        Self::TestIgnored,
        Self::TestVersion,
        Self::TestRuntime,
        Self::TestConfiguration,
        Self::TestProcesses,
        Self::TestCount,
        Self::TestDuration,
        Self::TestResultSummary,
        Self::Start,
        Self::Run,
        Self::Line,
        Self::Output,
        Self::Error,
        Self::Close,
        Self::Abort,
        Self::Done,
    ];

    /// Returns the symbol for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TestSuiteStarted => "testSuiteStarted",
            Self::TestSuiteFinished => "testSuiteFinished",
            Self::TestStarted => "testStarted",
            Self::TestFinished => "testFinished",
            Self::TestFailed => "testFailed",
            Self::TestIgnored => "testIgnored",
            Self::TestVersion => "testVersion",
            Self::TestRuntime => "testRuntime",
            Self::TestConfiguration => "testConfiguration",
            Self::TestProcesses => "testProcesses",
            Self::TestCount => "testCount",
            Self::TestDuration => "testDuration",
            Self::TestResultSummary => "testResultSummary",
            Self::Start => "start",
            Self::Run => "run",
            Self::Line => "line",
            Self::Output => "output",
            Self::Error => "error",
            Self::Close => "close",
            Self::Abort => "abort",
            Self::Done => "done",
        }
    }

    /// Returns the symbols of all known kinds.
    pub fn variants() -> impl Iterator<Item = &'static str> {
        Self::ALL.iter().map(|kind| kind.as_str())
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = EventKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| EventKindParseError::new(s))
    }
}

/// An event dispatched to subscribers.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum RunEvent {
    /// A test or suite lifecycle event.
    Result(TestResult),

    /// An informational event.
    Info(InfoEvent),

    /// The pipeline was created.
    Start,

    /// The process is about to run.
    Run {
        /// The command line, for display.
        command: String,
    },

    /// A raw line of output. Sent for every line before it is interpreted.
    Line(String),

    /// Plain output that isn't part of the protocol.
    Output(String),

    /// An error occurred while spawning or reading from the process.
    Error(String),

    /// The process closed.
    Close {
        /// The exit code, if the process exited normally.
        code: Option<i32>,
    },

    /// The process was killed.
    Abort {
        /// Why the process was killed.
        reason: AbortReason,
    },

    /// The pipeline is done.
    Done,
}

impl RunEvent {
    /// Returns the kind subscribers register for to receive this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Result(result) => result.kind.event_kind(),
            Self::Info(info) => info.event_kind(),
            Self::Start => EventKind::Start,
            Self::Run { .. } => EventKind::Run,
            Self::Line(_) => EventKind::Line,
            Self::Output(_) => EventKind::Output,
            Self::Error(_) => EventKind::Error,
            Self::Close { .. } => EventKind::Close,
            Self::Abort { .. } => EventKind::Abort,
            Self::Done => EventKind::Done,
        }
    }
}
