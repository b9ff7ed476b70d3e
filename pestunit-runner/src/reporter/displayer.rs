// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::RunStatsSnapshot;
use crate::{
    dispatch::TestRunnerObserver,
    events::{AbortReason, InfoEvent, TestResult},
    helpers::plural,
};
use owo_colors::{OwoColorize, Style};
use std::{
    fmt,
    io::{self, Write},
    sync::Mutex,
    time::Duration,
};
use swrite::{SWrite, swrite};
use tracing::debug;

/// Prints test results for humans.
///
/// Each terminal result is printed as a status line. Failures are followed by
/// their message and source locations.
#[derive(Debug)]
pub struct DisplayReporter<W> {
    writer: Mutex<W>,
    styles: Styles,
    show_output: bool,
}

impl<W: Write + Send> DisplayReporter<W> {
    /// Creates a new reporter writing to `writer`.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            styles: Styles::default(),
            show_output: false,
        }
    }

    /// Colorizes output.
    pub fn colorize(&mut self) -> &mut Self {
        self.styles.colorize();
        self
    }

    /// Also prints plain output and recognized banner lines from the test runner.
    pub fn set_show_output(&mut self, show_output: bool) -> &mut Self {
        self.show_output = show_output;
        self
    }

    /// Prints the final summary line for a run.
    pub fn write_summary(&self, stats: &RunStatsSnapshot, elapsed: Duration) -> io::Result<()> {
        let mut writer = self.lock();
        let summary_style = if !stats.is_success() {
            self.styles.fail
        } else if stats.tests == 0 {
            self.styles.skip
        } else {
            self.styles.pass
        };

        writeln!(writer, "{}", "-".repeat(12))?;
        write!(writer, "{:>12} ", "Summary".style(summary_style))?;
        write!(writer, "{}", DisplayBracketedDuration(elapsed))?;
        writeln!(
            writer,
            "{} {} run: {}",
            stats.tests.style(self.styles.count),
            plural::tests_str(stats.tests),
            summary_str(stats, &self.styles),
        )?;

        if stats.aborted_processes > 0 || stats.errors > 0 {
            let failed = stats.aborted_processes + stats.errors;
            writeln!(
                writer,
                "{:>12} {} {} did not finish",
                "",
                failed.style(self.styles.count),
                plural::processes_str(failed),
            )?;
        }

        writer.flush()
    }

    /// Consumes the reporter, returning the writer.
    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, W> {
        self.writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_with(&self, f: impl FnOnce(&mut W, &Styles) -> io::Result<()>) {
        let mut writer = self.lock();
        if let Err(error) = f(&mut *writer, &self.styles) {
            debug!("failed to write test output: {error}");
        }
    }

    fn write_info(&self, info: &InfoEvent) {
        if self.show_output {
            self.write_with(|writer, _| writeln!(writer, "{}", info.text()));
        }
    }

    fn write_status_line(&self, status: &str, style: Style, result: &TestResult) {
        self.write_with(|writer, styles| {
            write!(writer, "{:>12} ", status.style(style))?;
            write!(
                writer,
                "{}",
                DisplayBracketedDuration(result.elapsed().unwrap_or_default())
            )?;
            writeln!(writer, "{}", DisplayTestName { result, styles })?;

            if let Some(fault) = &result.fault {
                for line in fault.message.lines() {
                    writeln!(writer, "{:>12} {line}", "")?;
                }
                if let (Some(expected), Some(actual)) = (&fault.expected, &fault.actual) {
                    writeln!(writer, "{:>12} {} {expected}", "", "expected:".style(styles.pass))?;
                    writeln!(writer, "{:>12} {} {actual}", "", "actual:".style(styles.fail))?;
                }
                for location in &fault.details {
                    writeln!(writer, "{:>12} at {}", "", location.style(styles.location))?;
                }
            }
            Ok(())
        });
    }
}

impl<W: Write + Send> TestRunnerObserver for DisplayReporter<W> {
    fn on_test_finished(&self, result: &TestResult) {
        self.write_status_line("PASS", self.styles.pass, result);
    }

    fn on_test_failed(&self, result: &TestResult) {
        self.write_status_line("FAIL", self.styles.fail, result);
    }

    fn on_test_ignored(&self, result: &TestResult) {
        self.write_status_line("SKIP", self.styles.skip, result);
    }

    fn on_test_version(&self, info: &InfoEvent) {
        self.write_info(info);
    }

    fn on_test_runtime(&self, info: &InfoEvent) {
        self.write_info(info);
    }

    fn on_test_configuration(&self, info: &InfoEvent) {
        self.write_info(info);
    }

    fn on_test_duration(&self, info: &InfoEvent) {
        self.write_info(info);
    }

    fn on_test_result_summary(&self, info: &InfoEvent) {
        self.write_info(info);
    }

    fn on_run(&self, command: &str) {
        self.write_with(|writer, styles| {
            writeln!(writer, "{:>12} {command}", "Running".style(styles.pass))
        });
    }

    fn on_output(&self, text: &str) {
        if self.show_output {
            self.write_with(|writer, _| writeln!(writer, "{text}"));
        }
    }

    fn on_error(&self, message: &str) {
        self.write_with(|writer, styles| {
            writeln!(writer, "{:>12} {message}", "ERROR".style(styles.fail))
        });
    }

    fn on_abort(&self, reason: AbortReason) {
        self.write_with(|writer, styles| {
            let status = match reason {
                AbortReason::Cancelled => "CANCEL",
                AbortReason::TimedOut => "TIMEOUT",
            };
            writeln!(
                writer,
                "{:>12} test runner {reason}",
                status.style(styles.fail)
            )
        });
    }
}

fn summary_str(stats: &RunStatsSnapshot, styles: &Styles) -> String {
    let mut out = String::new();
    swrite!(
        out,
        "{} {}",
        stats.passed.style(styles.count),
        "passed".style(styles.pass)
    );
    if stats.failed > 0 {
        swrite!(
            out,
            ", {} {}",
            stats.failed.style(styles.count),
            "failed".style(styles.fail)
        );
    }
    swrite!(
        out,
        ", {} {}",
        stats.ignored.style(styles.count),
        "skipped".style(styles.skip)
    );
    if stats.suites > 0 {
        swrite!(
            out,
            " in {} {}",
            stats.suites.style(styles.count),
            plural::suites_str(stats.suites)
        );
    }
    out
}

struct DisplayBracketedDuration(Duration);

impl fmt::Display for DisplayBracketedDuration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // * > means right-align.
        // * 8 is the number of characters to pad to.
        // * .3 means print three digits after the decimal point.
        write!(f, "[{:>8.3?}s] ", self.0.as_secs_f64())
    }
}

struct DisplayTestName<'a> {
    result: &'a TestResult,
    styles: &'a Styles,
}

impl fmt::Display for DisplayTestName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = self.result;
        match result.id.as_deref().and_then(|id| id.rsplit_once("::")) {
            Some((prefix, name)) => write!(
                f,
                "{}::{}",
                prefix.style(self.styles.prefix),
                name.style(self.styles.name)
            ),
            None => write!(f, "{}", result.name.style(self.styles.name)),
        }
    }
}

#[derive(Clone, Debug, Default)]
struct Styles {
    count: Style,
    pass: Style,
    fail: Style,
    skip: Style,
    prefix: Style,
    name: Style,
    location: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.count = Style::new().bold();
        self.pass = Style::new().green().bold();
        self.fail = Style::new().red().bold();
        self.skip = Style::new().yellow().bold();
        self.prefix = Style::new().magenta().bold();
        self.name = Style::new().blue().bold();
        self.location = Style::new().dimmed();
    }
}
