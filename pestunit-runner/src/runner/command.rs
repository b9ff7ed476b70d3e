// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::config::{PestunitProfile, RunnerCommand};
use camino::{Utf8Path, Utf8PathBuf};
use std::{collections::BTreeMap, fmt};

/// A test runner invocation: program, arguments, working directory and
/// environment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestCommand {
    program: String,
    args: Vec<String>,
    current_dir: Option<Utf8PathBuf>,
    env: BTreeMap<String, String>,
}

impl TestCommand {
    /// Creates a new command that runs `command` in the current directory.
    pub fn new(command: &RunnerCommand) -> Self {
        Self {
            program: command.program().to_owned(),
            args: command.args().to_vec(),
            current_dir: None,
            env: BTreeMap::new(),
        }
    }

    /// Creates the command for a profile.
    ///
    /// `extra_args` are appended to the profile's command, followed by
    /// `path` if given. The command runs in the project root with the
    /// profile's environment.
    pub fn from_profile(
        profile: &PestunitProfile<'_>,
        extra_args: &[String],
        path: Option<&str>,
    ) -> Self {
        let mut command = Self::new(&profile.command());
        command
            .args(extra_args.iter().cloned())
            .args(path.map(str::to_owned))
            .current_dir(profile.project_root())
            .envs(profile.env());
        command
    }

    /// Appends arguments.
    pub fn args(&mut self, args: impl IntoIterator<Item = String>) -> &mut Self {
        self.args.extend(args);
        self
    }

    /// Sets the working directory.
    pub fn current_dir(&mut self, dir: impl AsRef<Utf8Path>) -> &mut Self {
        self.current_dir = Some(dir.as_ref().to_owned());
        self
    }

    /// Sets environment variables, in addition to those inherited.
    pub fn envs(&mut self, env: impl IntoIterator<Item = (String, String)>) -> &mut Self {
        self.env.extend(env);
        self
    }

    /// Returns the program.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Returns the arguments.
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Returns the working directory, if set.
    pub fn get_current_dir(&self) -> Option<&Utf8Path> {
        self.current_dir.as_deref()
    }

    pub(super) fn to_tokio_command(&self) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(&self.program);
        command.args(&self.args).envs(&self.env);
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }
        command
    }
}

impl fmt::Display for TestCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let words = std::iter::once(&self.program).chain(&self.args);
        write!(f, "{}", shell_words::join(words))
    }
}
