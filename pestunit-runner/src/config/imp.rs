// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    FlowIdSearch, RunnerCommand,
    elements::{deserialize_flow_id_search, deserialize_runner_command},
};
use crate::errors::{ConfigParseError, ConfigParseErrorKind, ProfileNotFound};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, builder::DefaultState};
use itertools::Itertools;
use serde::Deserialize;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    num::NonZeroUsize,
    time::Duration,
};
use tracing::warn;

/// Overall configuration for pestunit.
///
/// This is the root data structure for pestunit configuration. Most settings
/// are part of a profile; see [`PestunitProfile`].
#[derive(Clone, Debug)]
pub struct PestunitConfig {
    project_root: Utf8PathBuf,
    default_profile: DefaultProfileImpl,
    other_profiles: HashMap<String, CustomProfileImpl>,
}

impl PestunitConfig {
    /// The default location of the config within the project root: `.config/pestunit.toml`.
    pub const CONFIG_PATH: &'static str = ".config/pestunit.toml";

    /// Contains the default config as a TOML file.
    ///
    /// Repository-specific configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../../default-config.toml");

    /// The name of the default profile.
    pub const DEFAULT_PROFILE: &'static str = "default";

    /// Reads the pestunit config from the given file, or if not specified from
    /// `.config/pestunit.toml` in the project root.
    ///
    /// If no config file is specified and the project doesn't have
    /// `.config/pestunit.toml`, uses the default config options.
    pub fn from_sources(
        project_root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        let project_root = project_root.into();

        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = project_root.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let builder = Self::make_default_config().add_source(source);
        let (config, unknown) = Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;

        if !unknown.is_empty() {
            warn!(
                "ignoring unknown configuration keys in config file {config_file}: {}",
                unknown.iter().join(", ")
            );
        }

        Ok(config.into_config(project_root))
    }

    /// Returns the default config, with no repository-specific settings.
    pub fn default_config(project_root: impl Into<Utf8PathBuf>) -> Self {
        let mut profiles = HashMap::new();
        profiles.insert(
            Self::DEFAULT_PROFILE.to_owned(),
            CustomProfileImpl::embedded_default(),
        );
        PestunitConfigDeserialize { profiles }.into_config(project_root.into())
    }

    /// Returns the project root the config was read for.
    pub fn project_root(&self) -> &Utf8Path {
        &self.project_root
    }

    /// Returns the profile with the given name, or an error if a profile was
    /// specified but not found.
    pub fn profile(&self, name: impl AsRef<str>) -> Result<PestunitProfile<'_>, ProfileNotFound> {
        let name = name.as_ref();
        let custom_profile = match name {
            Self::DEFAULT_PROFILE => None,
            other => Some(
                self.other_profiles
                    .get(other)
                    .ok_or_else(|| ProfileNotFound::new(name, self.all_profiles()))?,
            ),
        };

        Ok(PestunitProfile {
            name: name.to_owned(),
            project_root: &self.project_root,
            default_profile: &self.default_profile,
            custom_profile,
        })
    }

    /// Returns the names of all known profiles, including `default`.
    pub fn all_profiles(&self) -> impl Iterator<Item = &str> {
        self.other_profiles
            .keys()
            .map(|key| key.as_str())
            .chain(std::iter::once(Self::DEFAULT_PROFILE))
    }

    // ---
    // Helper methods
    // ---

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    /// This returns a tuple of (config, ignored paths).
    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(PestunitConfigDeserialize, BTreeSet<String>), ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config: PestunitConfigDeserialize = serde_path_to_error::deserialize(ignored_de)
            .map_err(|error| {
                // serde_path_to_error already reports the key, so drop it from
                // the config error.
                let path = error.path().clone();
                let config_error = error.into_inner();
                let error = match config_error {
                    ConfigError::At { error, .. } => *error,
                    other => other,
                };
                ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                    path, error,
                )))
            })?;

        Ok((config, ignored))
    }
}

/// A configuration profile for pestunit.
///
/// Returned by [`PestunitConfig::profile`]. Settings missing from a custom
/// profile fall back to the default profile.
#[derive(Clone, Debug)]
pub struct PestunitProfile<'cfg> {
    name: String,
    project_root: &'cfg Utf8Path,
    default_profile: &'cfg DefaultProfileImpl,
    custom_profile: Option<&'cfg CustomProfileImpl>,
}

macro_rules! profile_field {
    ($self:ident.$field:ident) => {
        $self
            .custom_profile
            .and_then(|profile| profile.$field.clone())
            .unwrap_or_else(|| $self.default_profile.$field.clone())
    };
}

impl<'cfg> PestunitProfile<'cfg> {
    /// Returns the name of the profile.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the project root. Test runners are started in this directory.
    pub fn project_root(&self) -> &'cfg Utf8Path {
        self.project_root
    }

    /// Returns the command used to run tests.
    pub fn command(&self) -> RunnerCommand {
        profile_field!(self.command)
    }

    /// Returns extra environment variables for the test runner.
    ///
    /// Variables set in a custom profile are merged over the default profile's.
    pub fn env(&self) -> BTreeMap<String, String> {
        let mut env = self.default_profile.env.clone();
        if let Some(custom_env) = self.custom_profile.and_then(|profile| profile.env.as_ref()) {
            env.extend(custom_env.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        env
    }

    /// Returns the time after which a test runner process is killed, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.custom_profile
            .and_then(|profile| profile.timeout)
            .or(self.default_profile.timeout)
    }

    /// Returns the number of test runner processes to run at once.
    pub fn workers(&self) -> NonZeroUsize {
        profile_field!(self.workers)
    }

    /// Returns how far back to search for missing flowIds.
    pub fn flow_id_search(&self) -> FlowIdSearch {
        profile_field!(self.flow_id_search)
    }

    /// Returns true if Pest location hints should be normalized.
    pub fn fix_location_hints(&self) -> bool {
        profile_field!(self.fix_location_hints)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct PestunitConfigDeserialize {
    #[serde(rename = "profile")]
    profiles: HashMap<String, CustomProfileImpl>,
}

impl PestunitConfigDeserialize {
    fn into_config(mut self, project_root: Utf8PathBuf) -> PestunitConfig {
        let p = self
            .profiles
            .remove(PestunitConfig::DEFAULT_PROFILE)
            .unwrap_or_else(CustomProfileImpl::embedded_default);
        PestunitConfig {
            project_root,
            default_profile: DefaultProfileImpl::new(p),
            other_profiles: self.profiles,
        }
    }
}

#[derive(Clone, Debug)]
struct DefaultProfileImpl {
    command: RunnerCommand,
    env: BTreeMap<String, String>,
    timeout: Option<Duration>,
    workers: NonZeroUsize,
    flow_id_search: FlowIdSearch,
    fix_location_hints: bool,
}

impl DefaultProfileImpl {
    // Settings the default profile leaves out come from the embedded defaults.
    fn new(p: CustomProfileImpl) -> Self {
        let embedded = CustomProfileImpl::embedded_default();
        Self {
            command: p
                .command
                .or(embedded.command)
                .unwrap_or_else(|| RunnerCommand::new("vendor/bin/phpunit", ["--teamcity"])),
            env: p.env.unwrap_or_default(),
            timeout: p.timeout,
            workers: p.workers.or(embedded.workers).unwrap_or(NonZeroUsize::MIN),
            flow_id_search: p
                .flow_id_search
                .or(embedded.flow_id_search)
                .unwrap_or_default(),
            fix_location_hints: p
                .fix_location_hints
                .or(embedded.fix_location_hints)
                .unwrap_or(true),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CustomProfileImpl {
    #[serde(default, deserialize_with = "deserialize_runner_command")]
    command: Option<RunnerCommand>,
    #[serde(default)]
    env: Option<BTreeMap<String, String>>,
    #[serde(default, with = "humantime_serde")]
    timeout: Option<Duration>,
    #[serde(default)]
    workers: Option<NonZeroUsize>,
    #[serde(default, deserialize_with = "deserialize_flow_id_search")]
    flow_id_search: Option<FlowIdSearch>,
    #[serde(default)]
    fix_location_hints: Option<bool>,
}

impl CustomProfileImpl {
    // The default profile as embedded in the binary. If the embedded config
    // somehow fails to parse, every setting falls back to its hardcoded value.
    fn embedded_default() -> Self {
        PestunitConfig::make_default_config()
            .build()
            .ok()
            .and_then(|config| config.try_deserialize::<PestunitConfigDeserialize>().ok())
            .and_then(|mut config| config.profiles.remove(PestunitConfig::DEFAULT_PROFILE))
            .unwrap_or_default()
    }
}
