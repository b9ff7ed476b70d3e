// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    dispatch::TestRunnerObserver,
    events::{AbortReason, TestResult},
};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counts results across all processes of a run.
///
/// Counters only ever increase, so the final counts don't depend on the order
/// in which processes report. A single `RunStats` is meant to be shared
/// between all pipelines of a run.
#[derive(Debug, Default)]
pub struct RunStats {
    processes: AtomicUsize,
    suites: AtomicUsize,
    tests: AtomicUsize,
    passed: AtomicUsize,
    failed: AtomicUsize,
    ignored: AtomicUsize,
    aborted_processes: AtomicUsize,
    failed_processes: AtomicUsize,
    errors: AtomicUsize,
}

impl RunStats {
    /// Creates a new set of counters, all zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the current counts.
    pub fn snapshot(&self) -> RunStatsSnapshot {
        let load = |counter: &AtomicUsize| counter.load(Ordering::Relaxed);
        RunStatsSnapshot {
            processes: load(&self.processes),
            suites: load(&self.suites),
            tests: load(&self.tests),
            passed: load(&self.passed),
            failed: load(&self.failed),
            ignored: load(&self.ignored),
            aborted_processes: load(&self.aborted_processes),
            failed_processes: load(&self.failed_processes),
            errors: load(&self.errors),
        }
    }

    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl TestRunnerObserver for RunStats {
    fn on_test_suite_finished(&self, _result: &TestResult) {
        Self::bump(&self.suites);
    }

    fn on_test_finished(&self, _result: &TestResult) {
        Self::bump(&self.tests);
        Self::bump(&self.passed);
    }

    fn on_test_failed(&self, _result: &TestResult) {
        Self::bump(&self.tests);
        Self::bump(&self.failed);
    }

    fn on_test_ignored(&self, _result: &TestResult) {
        Self::bump(&self.tests);
        Self::bump(&self.ignored);
    }

    fn on_error(&self, _message: &str) {
        Self::bump(&self.errors);
    }

    fn on_close(&self, code: Option<i32>) {
        if code != Some(0) {
            Self::bump(&self.failed_processes);
        }
    }

    fn on_abort(&self, _reason: AbortReason) {
        Self::bump(&self.aborted_processes);
    }

    fn on_done(&self) {
        Self::bump(&self.processes);
    }
}

/// A point-in-time copy of [`RunStats`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RunStatsSnapshot {
    /// Processes whose pipelines are done.
    pub processes: usize,

    /// Suites that finished.
    pub suites: usize,

    /// Tests that finished, whatever the outcome.
    pub tests: usize,

    /// Tests that passed.
    pub passed: usize,

    /// Tests that failed.
    pub failed: usize,

    /// Tests that were ignored.
    pub ignored: usize,

    /// Processes that were killed.
    pub aborted_processes: usize,

    /// Processes that didn't exit with code 0, including killed ones.
    pub failed_processes: usize,

    /// Errors spawning or reading from processes.
    pub errors: usize,
}

impl RunStatsSnapshot {
    /// Returns true if no test failed and every process exited cleanly.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.failed_processes == 0 && self.errors == 0
    }

    /// Returns true if any process was killed or couldn't be run.
    pub fn has_process_failures(&self) -> bool {
        self.aborted_processes > 0 || self.errors > 0
    }
}
