// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by pestunit.
//!
//! Decoding runner output never produces an error: malformed lines degrade to
//! plain text. The errors here cover configuration and process management.

use crate::events::EventKind;
use camino::Utf8PathBuf;
use config::ConfigError;
use itertools::Itertools;
use std::{error::Error, fmt};
use thiserror::Error;

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse pestunit config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file for this error.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }

    /// Returns the kind of error this is.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of a [`ConfigParseError`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the config.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),
}

/// An error which indicates that a profile was requested but not known to pestunit.
#[derive(Clone, Debug, Error)]
#[error("profile `{profile}` not found (known profiles: {})", .all_profiles.join(", "))]
pub struct ProfileNotFound {
    profile: String,
    all_profiles: Vec<String>,
}

impl ProfileNotFound {
    pub(crate) fn new(
        profile: impl Into<String>,
        all_profiles: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut all_profiles: Vec<_> = all_profiles.into_iter().map(|s| s.into()).collect();
        all_profiles.sort_unstable();
        Self {
            profile: profile.into(),
            all_profiles,
        }
    }

    /// Returns the name of the profile that wasn't found.
    pub fn profile(&self) -> &str {
        &self.profile
    }
}

/// Error returned while parsing an [`EventKind`] from a string.
#[derive(Clone, Debug, Error)]
#[error(
    "unrecognized event kind: {input}\n(known values: {})",
    EventKind::variants().join(", "),
)]
pub struct EventKindParseError {
    input: String,
}

impl EventKindParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// Error returned while parsing a
/// [`FlowIdSearch`](crate::config::FlowIdSearch) from a string.
#[derive(Clone, Debug, Error)]
#[error("unrecognized value for flow-id-search: {input}\n(expected `open`, `recent` or `recent:<depth>`)")]
pub struct FlowIdSearchParseError {
    input: String,
}

impl FlowIdSearchParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// An error that occurred while running a test runner process.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunError {
    /// The process could not be spawned.
    #[error("failed to spawn `{command}`")]
    Spawn {
        /// The command that was being spawned.
        command: String,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// Waiting for the process to exit failed.
    #[error("failed to wait for `{command}` to exit")]
    Wait {
        /// The command that was running.
        command: String,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },
}

/// Displays an error along with its chain of sources, one per line.
pub struct DisplayErrorChain<E>(E);

impl<E: Error> DisplayErrorChain<E> {
    /// Creates a new error chain display.
    pub fn new(error: E) -> Self {
        Self(error)
    }
}

impl<E: Error> fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(error) = source {
            write!(f, "\n  caused by: {error}")?;
            source = error.source();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_chain_lists_sources() {
        let error = RunError::Spawn {
            command: "vendor/bin/phpunit".to_owned(),
            error: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        let displayed = DisplayErrorChain::new(&error).to_string();
        assert_eq!(
            displayed,
            "failed to spawn `vendor/bin/phpunit`\n  caused by: no such file"
        );
    }

    #[test]
    fn profile_not_found_sorts_profiles() {
        let error = ProfileNotFound::new("nope", ["default", "ci"]);
        assert_eq!(
            error.to_string(),
            "profile `nope` not found (known profiles: ci, default)"
        );
    }
}
