// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt;

/// The command used to invoke the test runner.
///
/// In config files this is either an array (`["vendor/bin/pest", "--teamcity"]`)
/// or a string split with shell quoting rules (`"vendor/bin/pest --teamcity"`).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunnerCommand {
    program: String,
    args: Vec<String>,
}

impl RunnerCommand {
    /// Creates a new command from a program and its arguments.
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates a command from a list of words. Returns `None` if the list is empty.
    pub fn from_words(words: impl IntoIterator<Item = String>) -> Option<Self> {
        let mut words = words.into_iter();
        let program = words.next()?;
        Some(Self {
            program,
            args: words.collect(),
        })
    }

    /// Parses a command line with shell quoting rules.
    ///
    /// A blank command line produces an empty command; see [`Self::is_empty`].
    pub fn parse(command_line: &str) -> Result<Self, shell_words::ParseError> {
        let words = shell_words::split(command_line)?;
        Ok(Self::from_words(words).unwrap_or_else(|| Self::new("", Vec::<String>::new())))
    }

    /// Returns the program to run.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Returns the arguments to pass to the program.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Returns true if the program is empty.
    pub fn is_empty(&self) -> bool {
        self.program.is_empty()
    }
}

impl fmt::Display for RunnerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let words = std::iter::once(&self.program).chain(&self.args);
        write!(f, "{}", shell_words::join(words))
    }
}

pub(in crate::config) fn deserialize_runner_command<'de, D>(
    deserializer: D,
) -> Result<Option<RunnerCommand>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct V;

    impl<'de2> serde::de::Visitor<'de2> for V {
        type Value = Option<RunnerCommand>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(
                formatter,
                "an array ([\"vendor/bin/phpunit\", \"--teamcity\"]) or a string (\"vendor/bin/phpunit --teamcity\")"
            )
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            let words = shell_words::split(v).map_err(E::custom)?;
            RunnerCommand::from_words(words)
                .map(Some)
                .ok_or_else(|| E::invalid_length(0, &self))
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: serde::de::SeqAccess<'de2>,
        {
            let mut words = Vec::new();
            while let Some(word) = seq.next_element::<String>()? {
                words.push(word);
            }
            RunnerCommand::from_words(words)
                .map(Some)
                .ok_or_else(|| serde::de::Error::invalid_length(0, &self))
        }
    }

    deserializer.deserialize_any(V)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let command =
            RunnerCommand::parse("php -d 'memory_limit=1G' vendor/bin/pest --teamcity").expect("valid");
        assert_eq!(command.program(), "php");
        assert_eq!(
            command.args(),
            ["-d", "memory_limit=1G", "vendor/bin/pest", "--teamcity"]
        );
        assert_eq!(
            command.to_string(),
            "php -d 'memory_limit=1G' vendor/bin/pest --teamcity"
        );
    }

    #[test]
    fn empty_command_line() {
        assert!(RunnerCommand::parse("   ").expect("valid").is_empty());
        assert!(RunnerCommand::parse("'unterminated").is_err());
    }
}
