// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fan-out of run events to subscribers.
//!
//! The [`EventDispatcher`] holds a registration table from [`EventKind`] to
//! an ordered list of subscribers. Events are delivered synchronously, in the
//! order they're emitted, to each subscriber registered for their kind.

use crate::{
    events::{AbortReason, EventKind, InfoEvent, RunEvent, TestResult},
    helpers::panic_payload_to_string,
};
use debug_ignore::DebugIgnore;
use std::{
    collections::HashMap,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};
use tracing::warn;

/// A callback registered with an [`EventDispatcher`].
pub type Subscriber = Box<dyn FnMut(&RunEvent) + Send>;

/// Delivers run events to registered subscribers.
///
/// Each subscriber is invoked at most once per event. A subscriber that
/// panics is logged and skipped; the remaining subscribers still run.
#[derive(Debug, Default)]
pub struct EventDispatcher {
    subscribers: HashMap<EventKind, Vec<DebugIgnore<Subscriber>>>,
}

impl EventDispatcher {
    /// Creates a new dispatcher with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber for events of `kind`.
    pub fn on<F>(&mut self, kind: EventKind, callback: F) -> &mut Self
    where
        F: FnMut(&RunEvent) + Send + 'static,
    {
        self.subscribers
            .entry(kind)
            .or_default()
            .push(DebugIgnore(Box::new(callback)));
        self
    }

    /// Registers an observer for events of every kind.
    pub fn observe(&mut self, observer: Arc<dyn TestRunnerObserver>) -> &mut Self {
        for &kind in EventKind::ALL {
            let observer = observer.clone();
            self.on(kind, move |event| observer.notify(event));
        }
        self
    }

    /// Returns the number of subscribers registered for `kind`.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers.get(&kind).map_or(0, Vec::len)
    }

    /// Delivers `event` to every subscriber registered for its kind, in
    /// registration order.
    pub fn emit(&mut self, event: &RunEvent) {
        let kind = event.kind();
        let Some(subscribers) = self.subscribers.get_mut(&kind) else {
            return;
        };

        for (index, subscriber) in subscribers.iter_mut().enumerate() {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| (subscriber.0)(event))) {
                warn!(
                    "subscriber {index} for `{kind}` panicked: {}",
                    panic_payload_to_string(payload)
                );
            }
        }
    }
}

/// Receives run events.
///
/// Every method has a no-op default, so observers only implement the events
/// they care about. Observers may be shared between pipelines running in
/// parallel, so methods take `&self`.
pub trait TestRunnerObserver: Send + Sync {
    /// A suite started.
    fn on_test_suite_started(&self, _result: &TestResult) {}

    /// A suite finished. This is the terminal record for the suite.
    fn on_test_suite_finished(&self, _result: &TestResult) {}

    /// A test started.
    fn on_test_started(&self, _result: &TestResult) {}

    /// A test passed.
    fn on_test_finished(&self, _result: &TestResult) {}

    /// A test failed.
    fn on_test_failed(&self, _result: &TestResult) {}

    /// A test was ignored.
    fn on_test_ignored(&self, _result: &TestResult) {}

    /// The runner printed its version.
    fn on_test_version(&self, _info: &InfoEvent) {}

    /// The runner printed the PHP runtime.
    fn on_test_runtime(&self, _info: &InfoEvent) {}

    /// The runner printed its configuration file.
    fn on_test_configuration(&self, _info: &InfoEvent) {}

    /// The runner printed its number of worker processes.
    fn on_test_processes(&self, _info: &InfoEvent) {}

    /// The runner reported the number of tests.
    fn on_test_count(&self, _info: &InfoEvent) {}

    /// The runner printed the time and memory used.
    fn on_test_duration(&self, _info: &InfoEvent) {}

    /// The runner printed its result summary.
    fn on_test_result_summary(&self, _info: &InfoEvent) {}

    /// A pipeline was created.
    fn on_start(&self) {}

    /// A process is about to run.
    fn on_run(&self, _command: &str) {}

    /// A raw line was received.
    fn on_line(&self, _line: &str) {}

    /// The process printed plain output.
    fn on_output(&self, _text: &str) {}

    /// An error occurred while spawning or reading from the process.
    fn on_error(&self, _message: &str) {}

    /// The process closed.
    fn on_close(&self, _code: Option<i32>) {}

    /// The process was killed.
    fn on_abort(&self, _reason: AbortReason) {}

    /// The pipeline is done.
    fn on_done(&self) {}

    /// Routes `event` to the method for its kind.
    fn notify(&self, event: &RunEvent) {
        use crate::events::ResultKind;

        match event {
            RunEvent::Result(result) => match result.kind {
                ResultKind::TestSuiteStarted => self.on_test_suite_started(result),
                ResultKind::TestSuiteFinished => self.on_test_suite_finished(result),
                ResultKind::TestStarted => self.on_test_started(result),
                ResultKind::TestFinished => self.on_test_finished(result),
                ResultKind::TestFailed => self.on_test_failed(result),
                ResultKind::TestIgnored => self.on_test_ignored(result),
            },
            RunEvent::Info(info) => match info {
                InfoEvent::Version { .. } => self.on_test_version(info),
                InfoEvent::Runtime { .. } => self.on_test_runtime(info),
                InfoEvent::Configuration { .. } => self.on_test_configuration(info),
                InfoEvent::Processes { .. } => self.on_test_processes(info),
                InfoEvent::Count { .. } => self.on_test_count(info),
                InfoEvent::Duration { .. } => self.on_test_duration(info),
                InfoEvent::ResultSummary { .. } => self.on_test_result_summary(info),
            },
            RunEvent::Start => self.on_start(),
            RunEvent::Run { command } => self.on_run(command),
            RunEvent::Line(line) => self.on_line(line),
            RunEvent::Output(text) => self.on_output(text),
            RunEvent::Error(message) => self.on_error(message),
            RunEvent::Close { code } => self.on_close(*code),
            RunEvent::Abort { reason } => self.on_abort(*reason),
            RunEvent::Done => self.on_done(),
        }
    }
}
