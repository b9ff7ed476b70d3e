// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::TestCommand;
use crate::{
    config::PestunitProfile,
    dispatch::EventDispatcher,
    errors::RunError,
    events::{AbortReason, ProcessExit},
    pipeline::{EventPipeline, OutputStream, PipelineSettings},
};
use futures::StreamExt;
use std::{io, num::NonZeroUsize, pin::pin, process::Stdio, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Child,
    sync::watch,
};
use tracing::{debug, warn};

/// The size of the buffer used to read process output.
pub const CHUNK_SIZE: usize = 4 * 1024;

/// How a test runner process ended, and what was left over.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RunOutcome {
    /// How the process ended.
    pub exit: ProcessExit,

    /// The number of tests and suites that were still open when the process
    /// ended. They produced no results.
    pub discarded: usize,
}

impl RunOutcome {
    /// Returns true if the process exited with code 0 and left nothing open.
    pub fn is_success(&self) -> bool {
        self.exit.is_success() && self.discarded == 0
    }
}

/// Cancels running test runner processes.
///
/// Cloning a handle produces another handle to the same cancellation state.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    /// Creates a new handle, not yet cancelled.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Cancels all processes started by runners sharing this handle. Processes
    /// started after this call are killed immediately.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Returns true if [`Self::cancel`] was called.
    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            // The sender can't be dropped while self is alive, but if it
            // somehow is, cancellation can never happen.
            std::future::pending::<()>().await;
        }
    }
}

/// Test runner options.
#[derive(Debug, Default)]
pub struct TestRunnerBuilder {
    timeout: Option<Duration>,
    workers: Option<NonZeroUsize>,
    settings: PipelineSettings,
    cancel_handle: Option<CancelHandle>,
}

impl TestRunnerBuilder {
    /// Sets the time after which a process is killed.
    pub fn set_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the number of processes to run at once.
    pub fn set_workers(&mut self, workers: NonZeroUsize) -> &mut Self {
        self.workers = Some(workers);
        self
    }

    /// Sets the settings used for each process's pipeline.
    pub fn set_pipeline_settings(&mut self, settings: PipelineSettings) -> &mut Self {
        self.settings = settings;
        self
    }

    /// Uses an existing cancel handle, e.g. one shared with a signal handler.
    pub fn set_cancel_handle(&mut self, handle: CancelHandle) -> &mut Self {
        self.cancel_handle = Some(handle);
        self
    }

    /// Takes settings not set explicitly from `profile`.
    pub fn apply_profile(&mut self, profile: &PestunitProfile<'_>) -> &mut Self {
        if self.timeout.is_none() {
            self.timeout = profile.timeout();
        }
        if self.workers.is_none() {
            self.workers = Some(profile.workers());
        }
        self.settings = PipelineSettings::from_profile(profile);
        self
    }

    /// Creates a new test runner.
    pub fn build(self) -> TestRunner {
        TestRunner {
            timeout: self.timeout,
            workers: self.workers.unwrap_or(NonZeroUsize::MIN),
            settings: self.settings,
            cancel_handle: self.cancel_handle.unwrap_or_default(),
        }
    }
}

/// Spawns test runner processes and feeds their output through a fresh
/// [`EventPipeline`] each.
#[derive(Debug)]
pub struct TestRunner {
    timeout: Option<Duration>,
    workers: NonZeroUsize,
    settings: PipelineSettings,
    cancel_handle: CancelHandle,
}

enum Step {
    Read(OutputStream, io::Result<usize>),
    Exited(io::Result<std::process::ExitStatus>),
    Abort(AbortReason),
}

impl TestRunner {
    /// Returns a handle that cancels processes started by this runner.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel_handle.clone()
    }

    /// Returns the number of processes run at once by [`Self::run_workers`].
    pub fn workers(&self) -> NonZeroUsize {
        self.workers
    }

    /// Runs a single process to completion, delivering its events to `dispatcher`.
    pub async fn run(
        &self,
        command: &TestCommand,
        dispatcher: EventDispatcher,
    ) -> Result<RunOutcome, RunError> {
        let command_line = command.to_string();
        let mut pipeline = EventPipeline::new(dispatcher, self.settings);
        pipeline.start();
        pipeline.run(command_line.clone());

        let mut cmd = command.to_tokio_command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("spawning `{command_line}`");
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(error) => {
                pipeline.error(format!("failed to spawn `{command_line}`: {error}"));
                pipeline.done();
                return Err(RunError::Spawn {
                    command: command_line,
                    error,
                });
            }
        };

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let mut stdout_buf = vec![0; CHUNK_SIZE];
        let mut stderr_buf = vec![0; CHUNK_SIZE];

        let mut timeout = pin!(deadline(self.timeout));
        let mut cancelled = pin!(self.cancel_handle.cancelled());

        let status = loop {
            let step = tokio::select! {
                res = read_opt(&mut stdout, &mut stdout_buf) => Step::Read(OutputStream::Stdout, res),
                res = read_opt(&mut stderr, &mut stderr_buf) => Step::Read(OutputStream::Stderr, res),
                res = child.wait(), if stdout.is_none() && stderr.is_none() => Step::Exited(res),
                () = &mut timeout => Step::Abort(AbortReason::TimedOut),
                () = &mut cancelled => Step::Abort(AbortReason::Cancelled),
            };

            match step {
                Step::Read(stream, Ok(0)) => {
                    debug!("{stream} of `{command_line}` closed");
                    close_stream(stream, &mut stdout, &mut stderr);
                }
                Step::Read(stream, Ok(n)) => {
                    let buf = match stream {
                        OutputStream::Stdout => &stdout_buf,
                        OutputStream::Stderr => &stderr_buf,
                    };
                    pipeline.push_chunk(stream, &buf[..n]);
                }
                Step::Read(stream, Err(error)) => {
                    pipeline.error(format!("failed to read {stream} of `{command_line}`: {error}"));
                    close_stream(stream, &mut stdout, &mut stderr);
                }
                Step::Exited(res) => break res.map(|status| ProcessExit::Exited {
                    code: status.code(),
                }),
                Step::Abort(reason) => {
                    debug!("killing `{command_line}`: {reason}");
                    break kill(&mut child).await.map(|()| ProcessExit::Aborted(reason));
                }
            }
        };

        match status {
            Ok(exit) => {
                let discarded = pipeline.finish(exit);
                if discarded > 0 {
                    debug!("`{command_line}` left {discarded} tests and suites unfinished");
                }
                Ok(RunOutcome { exit, discarded })
            }
            Err(error) => {
                pipeline.error(format!("failed to wait for `{command_line}`: {error}"));
                pipeline.finish(ProcessExit::Exited { code: None });
                Err(RunError::Wait {
                    command: command_line,
                    error,
                })
            }
        }
    }

    /// Runs several processes, at most [`Self::workers`] at a time.
    ///
    /// Each process gets its own pipeline, with a dispatcher created by
    /// `make_dispatcher`. Outcomes are returned in the order of `commands`.
    pub async fn run_workers<F>(
        &self,
        commands: &[TestCommand],
        mut make_dispatcher: F,
    ) -> Vec<Result<RunOutcome, RunError>>
    where
        F: FnMut(&TestCommand) -> EventDispatcher,
    {
        let runs: Vec<_> = commands
            .iter()
            .map(|command| self.run(command, make_dispatcher(command)))
            .collect();
        futures::stream::iter(runs)
            .buffered(self.workers.get())
            .collect()
            .await
    }
}

async fn read_opt<R>(reader: &mut Option<R>, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match reader {
        Some(reader) => reader.read(buf).await,
        None => std::future::pending().await,
    }
}

fn close_stream<A, B>(stream: OutputStream, stdout: &mut Option<A>, stderr: &mut Option<B>) {
    match stream {
        OutputStream::Stdout => *stdout = None,
        OutputStream::Stderr => *stderr = None,
    }
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}

async fn kill(child: &mut Child) -> io::Result<()> {
    // The process may have exited on its own in the meantime.
    if let Err(error) = child.start_kill() {
        warn!("failed to kill child process: {error}");
    }
    child.wait().await.map(|_| ())
}
