// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    ExpectedError,
    errors::Result,
    exit_codes::PestunitExitCode,
    output::{OutputContext, OutputOpts, clap_styles},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand, ValueEnum};
use pestunit_runner::{
    config::{PestunitConfig, PestunitProfile},
    dispatch::EventDispatcher,
    events::{EventKind, ProcessExit, RunEvent},
    pipeline::{EventPipeline, OutputStream, PipelineSettings},
    reporter::{DisplayReporter, RunStats, RunStatsSnapshot},
    runner::{CHUNK_SIZE, RunOutcome, TestCommand, TestRunnerBuilder},
};
use std::{
    fs::File,
    io::{self, Read, Stderr, Write},
    num::NonZeroUsize,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};

/// Runs PHPUnit and Pest test suites, reporting results as they stream in.
///
/// The configured test runner is started with TeamCity output enabled, and
/// its service messages are decoded into test results.
#[derive(Debug, Parser)]
#[command(version, name = "pestunit", styles = clap_styles::style())]
pub struct PestunitApp {
    #[clap(flatten)]
    output: OutputOpts,

    #[clap(flatten)]
    config_opts: ConfigOpts,

    #[clap(subcommand)]
    command: Command,
}

impl PestunitApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app, returning the process exit code.
    pub fn exec(self, output: OutputContext) -> Result<i32> {
        match self.command {
            Command::Run { run_opts } => exec_run(&self.config_opts, output, run_opts),
            Command::Replay {
                file,
                reporter_opts,
            } => exec_replay(&self.config_opts, output, &file, reporter_opts),
        }
    }
}

#[derive(Debug, Args)]
struct ConfigOpts {
    /// Project root [default: current directory]
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<Utf8PathBuf>,

    /// Config file [default: project-root/.config/pestunit.toml]
    #[arg(long, global = true, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,

    /// Config profile to use
    #[arg(
        long,
        short = 'P',
        global = true,
        env = "PESTUNIT_PROFILE",
        default_value = PestunitConfig::DEFAULT_PROFILE
    )]
    profile: String,
}

impl ConfigOpts {
    fn project_root(&self) -> Result<Utf8PathBuf> {
        if let Some(root) = &self.project_root {
            return Ok(root.clone());
        }
        let current_dir =
            std::env::current_dir().map_err(|err| ExpectedError::CurrentDirFailed { err })?;
        Utf8PathBuf::try_from(current_dir)
            .map_err(|err| ExpectedError::ProjectRootInvalidUtf8 { path: err.into_path_buf() })
    }

    fn make_config(&self, project_root: &Utf8Path) -> Result<PestunitConfig> {
        Ok(PestunitConfig::from_sources(
            project_root,
            self.config_file.as_deref(),
        )?)
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run tests
    ///
    /// Starts one test runner process per path (or a single process if no
    /// paths are given), up to the configured number at once.
    Run {
        #[clap(flatten)]
        run_opts: RunOpts,
    },

    /// Report on previously captured test runner output
    ///
    /// The file is decoded exactly as live output would be.
    Replay {
        /// File containing captured TeamCity output
        #[arg(value_name = "FILE")]
        file: Utf8PathBuf,

        #[clap(flatten)]
        reporter_opts: ReporterOpts,
    },
}

#[derive(Debug, Args)]
struct RunOpts {
    /// Kill test runner processes that run longer than this, e.g. `5m`
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Number of test runner processes to run at once
    #[arg(long, short = 'j', value_name = "N", env = "PESTUNIT_WORKERS")]
    workers: Option<NonZeroUsize>,

    #[clap(flatten)]
    reporter_opts: ReporterOpts,

    /// Test paths, each run in its own process
    #[arg(value_name = "PATHS")]
    paths: Vec<String>,

    /// Extra arguments passed to the test runner
    #[arg(last = true, value_name = "EXTRA_ARGS")]
    extra_args: Vec<String>,
}

impl RunOpts {
    fn commands(&self, profile: &PestunitProfile<'_>) -> Vec<TestCommand> {
        if self.paths.is_empty() {
            vec![TestCommand::from_profile(profile, &self.extra_args, None)]
        } else {
            self.paths
                .iter()
                .map(|path| TestCommand::from_profile(profile, &self.extra_args, Some(path)))
                .collect()
        }
    }
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Reporter options")]
struct ReporterOpts {
    /// Also print output that isn't part of the TeamCity protocol
    #[arg(long)]
    show_output: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t, value_name = "FMT")]
    message_format: MessageFormat,
}

impl ReporterOpts {
    fn build(&self, output: OutputContext) -> RunReporter {
        let display = match self.message_format {
            MessageFormat::Human => {
                let mut reporter = DisplayReporter::new(io::stderr());
                if output.color.should_colorize(supports_color::Stream::Stderr) {
                    reporter.colorize();
                }
                reporter.set_show_output(self.show_output);
                Some(Arc::new(reporter))
            }
            MessageFormat::Json => None,
        };

        RunReporter {
            stats: Arc::new(RunStats::new()),
            display,
            show_output: self.show_output,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
enum MessageFormat {
    /// Human-readable status lines on stderr
    #[default]
    Human,
    /// One JSON object per event on stdout
    Json,
}

/// Fans events from every process out to the counters and the chosen output.
struct RunReporter {
    stats: Arc<RunStats>,
    display: Option<Arc<DisplayReporter<Stderr>>>,
    show_output: bool,
}

impl RunReporter {
    fn dispatcher(&self) -> EventDispatcher {
        let mut dispatcher = EventDispatcher::new();
        dispatcher.observe(self.stats.clone());
        match &self.display {
            Some(display) => {
                dispatcher.observe(display.clone());
            }
            None => {
                for &kind in EventKind::ALL {
                    if kind == EventKind::Line || (kind == EventKind::Output && !self.show_output) {
                        continue;
                    }
                    dispatcher.on(kind, write_json_event);
                }
            }
        }
        dispatcher
    }

    fn finish(&self, elapsed: Duration) -> RunStatsSnapshot {
        let snapshot = self.stats.snapshot();
        if let Some(display) = &self.display {
            if let Err(error) = display.write_summary(&snapshot, elapsed) {
                warn!("failed to write summary: {error}");
            }
        }
        snapshot
    }
}

fn write_json_event(event: &RunEvent) {
    let mut stdout = io::stdout().lock();
    let res = serde_json::to_writer(&mut stdout, event)
        .map_err(io::Error::from)
        .and_then(|()| writeln!(stdout));
    if let Err(error) = res {
        warn!("failed to write {} event: {error}", event.kind());
    }
}

fn exec_run(config_opts: &ConfigOpts, output: OutputContext, run_opts: RunOpts) -> Result<i32> {
    let project_root = config_opts.project_root()?;
    let config = config_opts.make_config(&project_root)?;
    let profile = config.profile(&config_opts.profile)?;

    let mut builder = TestRunnerBuilder::default();
    builder.apply_profile(&profile);
    if let Some(timeout) = run_opts.timeout {
        builder.set_timeout(timeout);
    }
    if let Some(workers) = run_opts.workers {
        builder.set_workers(workers);
    }
    let runner = builder.build();

    let commands = run_opts.commands(&profile);
    let reporter = run_opts.reporter_opts.build(output);
    debug!(
        "running {} processes, {} at a time",
        commands.len(),
        runner.workers()
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| ExpectedError::RuntimeCreateError { err })?;

    let start = Instant::now();
    let outcomes = runtime.block_on(async {
        let cancel_handle = runner.cancel_handle();
        let signal_task = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupted, cancelling test run");
                cancel_handle.cancel();
            }
        });
        let outcomes = runner
            .run_workers(&commands, |_| reporter.dispatcher())
            .await;
        signal_task.abort();
        outcomes
    });
    let snapshot = reporter.finish(start.elapsed());

    let mut aborted = 0;
    let mut incomplete = false;
    for outcome in &outcomes {
        match outcome {
            Ok(RunOutcome {
                exit: ProcessExit::Aborted(_),
                ..
            }) => aborted += 1,
            Ok(outcome) => incomplete |= outcome.discarded > 0,
            Err(error) => {
                // The error was already reported through the pipeline.
                debug!("test runner process failed: {error}");
                aborted += 1;
            }
        }
    }

    if aborted > 0 {
        Err(ExpectedError::ProcessAborted { count: aborted })
    } else if incomplete || !snapshot.is_success() {
        Err(ExpectedError::TestRunFailed)
    } else {
        Ok(PestunitExitCode::OK)
    }
}

fn exec_replay(
    config_opts: &ConfigOpts,
    output: OutputContext,
    file: &Utf8Path,
    reporter_opts: ReporterOpts,
) -> Result<i32> {
    let project_root = config_opts.project_root()?;
    let config = config_opts.make_config(&project_root)?;
    let profile = config.profile(&config_opts.profile)?;

    let reporter = reporter_opts.build(output);
    let start = Instant::now();
    let discarded = replay_file(
        file,
        reporter.dispatcher(),
        PipelineSettings::from_profile(&profile),
    )?;
    let snapshot = reporter.finish(start.elapsed());

    if discarded > 0 {
        warn!("{discarded} tests or suites never finished");
    }
    if discarded > 0 || !snapshot.is_success() {
        Err(ExpectedError::TestRunFailed)
    } else {
        Ok(PestunitExitCode::OK)
    }
}

/// Feeds `file` through a pipeline in fixed-size chunks, returning the number
/// of tests and suites left open.
fn replay_file(
    file: &Utf8Path,
    dispatcher: EventDispatcher,
    settings: PipelineSettings,
) -> Result<usize> {
    let read_error = |err| ExpectedError::ReplayReadError {
        path: file.to_owned(),
        err,
    };
    let mut reader = File::open(file).map_err(read_error)?;

    let mut pipeline = EventPipeline::new(dispatcher, settings);
    pipeline.start();
    pipeline.run(format!("replay {file}"));

    let mut buf = vec![0; CHUNK_SIZE];
    loop {
        let read = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                pipeline.error(format!("failed to read `{file}`: {err}"));
                pipeline.done();
                return Err(read_error(err));
            }
        };
        pipeline.push_chunk(OutputStream::Stdout, &buf[..read]);
    }

    // Captured output has no exit status; treat it as a clean exit.
    Ok(pipeline.finish(ProcessExit::Exited { code: Some(0) }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use indoc::indoc;
    use pestunit_runner::events::ResultKind;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    fn parse(args: &[&str]) -> PestunitApp {
        PestunitApp::try_parse_from(std::iter::once("pestunit").chain(args.iter().copied()))
            .expect("arguments are valid")
    }

    #[test]
    fn verify_app() {
        use clap::CommandFactory;
        PestunitApp::command().debug_assert();
    }

    #[test]
    fn parse_run() {
        let app = parse(&[
            "run",
            "-P",
            "ci",
            "--timeout",
            "5m",
            "-j",
            "4",
            "tests/Unit",
            "tests/Feature",
            "--",
            "--stop-on-failure",
        ]);
        assert_eq!(app.config_opts.profile, "ci");
        let Command::Run { run_opts } = app.command else {
            panic!("expected run command");
        };
        assert_eq!(run_opts.timeout, Some(Duration::from_secs(300)));
        assert_eq!(run_opts.workers, NonZeroUsize::new(4));
        assert_eq!(run_opts.paths, vec!["tests/Unit", "tests/Feature"]);
        assert_eq!(run_opts.extra_args, vec!["--stop-on-failure"]);
        assert_eq!(run_opts.reporter_opts.message_format, MessageFormat::Human);
    }

    #[test]
    fn parse_invalid_workers() {
        let result = PestunitApp::try_parse_from(["pestunit", "run", "-j", "0"]);
        assert!(result.is_err(), "zero workers is rejected");
    }

    #[test]
    fn run_commands_per_path() {
        let config = PestunitConfig::default_config("/app");
        let profile = config
            .profile(PestunitConfig::DEFAULT_PROFILE)
            .expect("default profile exists");
        let app = parse(&["run", "tests/Unit", "--", "--colors=never"]);
        let Command::Run { run_opts } = app.command else {
            panic!("expected run command");
        };

        let commands = run_opts.commands(&profile);
        assert_eq!(commands.len(), 1);
        assert_eq!(
            commands[0].get_args(),
            ["--teamcity", "--colors=never", "tests/Unit"]
        );
        assert_eq!(commands[0].get_current_dir(), Some(Utf8Path::new("/app")));
    }

    #[test]
    fn replay_captured_output() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let path = dir.path().join("output.txt");
        std::fs::write(
            &path,
            indoc! {"
                PHPUnit 11.0.0 by Sebastian Bergmann and contributors.
                ##teamcity[testSuiteStarted name='Tests\\ExampleTest' flowId='7']
                ##teamcity[testStarted name='test_one' flowId='7']
                ##teamcity[testFinished name='test_one' duration='4' flowId='7']
                ##teamcity[testStarted name='test_two' flowId='7']
                ##teamcity[testIgnored name='test_two' message='skipped' flowId='7']
                ##teamcity[testFinished name='test_two' duration='0' flowId='7']
                ##teamcity[testSuiteFinished name='Tests\\ExampleTest' flowId='7']
            "},
        )
        .expect("wrote captured output");

        let kinds = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = EventDispatcher::new();
        for kind in [EventKind::TestFinished, EventKind::TestIgnored, EventKind::Done] {
            let kinds = kinds.clone();
            dispatcher.on(kind, move |event| {
                let kind = match event {
                    RunEvent::Result(result) => Some(result.kind),
                    _ => None,
                };
                kinds.lock().unwrap().push(kind);
            });
        }

        let discarded = replay_file(&path, dispatcher, PipelineSettings::default())
            .expect("replayed output");
        assert_eq!(discarded, 0);
        assert_eq!(
            *kinds.lock().unwrap(),
            vec![
                Some(ResultKind::TestFinished),
                Some(ResultKind::TestIgnored),
                None,
            ]
        );
    }

    #[test]
    fn replay_missing_file() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let error = replay_file(
            &dir.path().join("missing.txt"),
            EventDispatcher::new(),
            PipelineSettings::default(),
        )
        .unwrap_err();
        assert_eq!(error.process_exit_code(), PestunitExitCode::SETUP_ERROR);
    }
}
