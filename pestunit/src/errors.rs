// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{exit_codes::PestunitExitCode, output::StderrStyles};
use camino::Utf8PathBuf;
use owo_colors::OwoColorize;
use pestunit_runner::errors::{ConfigParseError, ProfileNotFound};
use std::error::Error;
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// Note that the #[error()] strings are mostly placeholder messages -- the expected way to print out
// errors is with the display_to_stderr method, which colorizes errors.

/// An error that pestunit expects might happen: a bad setup, or failing tests.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("could not determine the current directory")]
    CurrentDirFailed {
        #[source]
        err: std::io::Error,
    },
    #[error("project root is not valid UTF-8")]
    ProjectRootInvalidUtf8 { path: std::path::PathBuf },
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("profile not found")]
    ProfileNotFound {
        #[from]
        err: ProfileNotFound,
    },
    #[error("failed to create the async runtime")]
    RuntimeCreateError {
        #[source]
        err: std::io::Error,
    },
    #[error("failed to read captured output")]
    ReplayReadError {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("test run failed")]
    TestRunFailed,
    #[error("test runner processes did not finish")]
    ProcessAborted { count: usize },
}

impl ExpectedError {
    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::CurrentDirFailed { .. }
            | Self::ProjectRootInvalidUtf8 { .. }
            | Self::ConfigParseError { .. }
            | Self::ProfileNotFound { .. }
            | Self::RuntimeCreateError { .. }
            | Self::ReplayReadError { .. } => PestunitExitCode::SETUP_ERROR,
            Self::TestRunFailed => PestunitExitCode::TEST_RUN_FAILED,
            Self::ProcessAborted { .. } => PestunitExitCode::PROCESS_ABORTED,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match self {
            Self::CurrentDirFailed { err } => {
                error!("could not determine the current directory");
                Some(err as &dyn Error)
            }
            Self::ProjectRootInvalidUtf8 { path } => {
                error!(
                    "project root `{}` is not valid UTF-8",
                    path.display().style(styles.bold)
                );
                None
            }
            Self::ConfigParseError { err } => {
                error!(
                    "failed to parse pestunit config at `{}`",
                    err.config_file().style(styles.bold)
                );
                err.source()
            }
            Self::ProfileNotFound { err } => {
                error!("{err}");
                err.source()
            }
            Self::RuntimeCreateError { err } => {
                error!("failed to create the async runtime");
                Some(err as &dyn Error)
            }
            Self::ReplayReadError { path, err } => {
                error!(
                    "failed to read captured output from `{}`",
                    path.style(styles.bold)
                );
                Some(err as &dyn Error)
            }
            Self::TestRunFailed => {
                error!("test run failed");
                None
            }
            Self::ProcessAborted { count } => {
                let noun = if *count == 1 { "process" } else { "processes" };
                error!("{count} test runner {noun} did not finish");
                None
            }
        };

        while let Some(err) = next_error {
            error!(target: crate::output::NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}
