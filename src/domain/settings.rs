//! Repository configuration and task descriptor settings
//!
//! `tinyci.yml` lives on the default branch and holds repository-wide
//! defaults; `task.yml` lives in every task directory and declares runs and
//! dependencies. Both are parsed strictly: unknown keys are errors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::names::normalize_dir;

/// Queue used when neither the task nor the repository names one
pub const DEFAULT_QUEUE: &str = "default";

/// Errors from parsing or validating configuration files
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Resources requested for a run; interpretation is up to the runner
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Resources {
    #[serde(default)]
    pub cpu: u32,
    #[serde(default)]
    pub memory: u32,
    #[serde(default)]
    pub disk: u32,
    #[serde(default)]
    pub iops: u32,
}

impl Resources {
    pub fn is_empty(&self) -> bool {
        *self == Resources::default()
    }
}

/// Repository-wide configuration (`tinyci.yml`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoConfig {
    #[serde(default)]
    pub workdir: String,
    #[serde(default)]
    pub queue: String,
    #[serde(default)]
    pub override_queue: bool,
    /// Run timeout in seconds; 0 means none
    #[serde(default)]
    pub global_timeout: u64,
    #[serde(default)]
    pub override_timeout: bool,
    #[serde(default, rename = "ignore_directories")]
    pub ignore_dirs: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub override_metadata: bool,
    #[serde(default)]
    pub default_image: String,
    #[serde(default)]
    pub default_resources: Resources,
}

impl RepoConfig {
    pub fn parse(buf: &[u8]) -> Result<Self, SettingsError> {
        let mut config: RepoConfig = if buf.iter().all(u8::is_ascii_whitespace) {
            RepoConfig::default()
        } else {
            serde_yaml::from_slice(buf)?
        };

        if config.queue.is_empty() {
            config.queue = DEFAULT_QUEUE.to_string();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.queue.is_empty() {
            return Err(SettingsError::Validation("queue was empty".to_string()));
        }
        Ok(())
    }

    /// True if `path` falls under one of the ignored directories
    pub fn is_ignored(&self, path: &str) -> bool {
        self.ignore_dirs
            .iter()
            .filter(|dir| !dir.is_empty())
            .any(|dir| path.starts_with(dir.as_str()))
    }
}

/// Settings for one named run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunSettings {
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub queue: String,
    /// Timeout in seconds; 0 means none
    #[serde(default)]
    pub timeout: u64,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub resources: Resources,
    /// Key of the run in the descriptor's `runs` map; always reset on parse
    #[serde(default)]
    pub name: String,
}

impl RunSettings {
    fn validate(&mut self, default_resources: Resources) -> Result<(), SettingsError> {
        if self.command.is_empty() {
            return Err(SettingsError::Validation(format!(
                "run {:?}: command was empty",
                self.name
            )));
        }
        if self.image.is_empty() {
            return Err(SettingsError::Validation(format!(
                "run {:?}: image was empty",
                self.name
            )));
        }
        if self.queue.is_empty() {
            return Err(SettingsError::Validation(format!(
                "run {:?}: queue name was empty",
                self.name
            )));
        }
        if self.resources.is_empty() {
            self.resources = default_resources;
        }
        Ok(())
    }
}

/// Parsed task descriptor (`task.yml`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskSettings {
    #[serde(default)]
    pub mountpoint: String,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub workdir: String,
    #[serde(default)]
    pub runs: BTreeMap<String, RunSettings>,
    #[serde(default)]
    pub default_timeout: u64,
    #[serde(default)]
    pub default_queue: String,
    #[serde(default)]
    pub default_image: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub default_resources: Resources,
}

impl TaskSettings {
    /// Parse a descriptor and apply repository defaults.
    ///
    /// With `require_runs` a descriptor without runs is rejected; otherwise it
    /// is accepted as an intermediate node that only contributes dependencies.
    pub fn parse(
        buf: &[u8],
        require_runs: bool,
        config: &RepoConfig,
    ) -> Result<Self, SettingsError> {
        let mut settings: TaskSettings = if buf.iter().all(u8::is_ascii_whitespace) {
            TaskSettings::default()
        } else {
            serde_yaml::from_slice(buf)?
        };

        settings.dependencies = settings
            .dependencies
            .iter()
            .map(|dep| normalize_dir(dep))
            .collect();

        settings.apply_overrides(config);
        settings.validate(require_runs)?;
        Ok(settings)
    }

    /// A task is a terminal unit of work only if it has at least one run
    pub fn is_runnable(&self) -> bool {
        !self.runs.is_empty()
    }

    pub fn validate(&mut self, require_runs: bool) -> Result<(), SettingsError> {
        if self.runs.is_empty() {
            if require_runs {
                return Err(SettingsError::Validation(
                    "runs are required to proceed further with this task".to_string(),
                ));
            }
            return Ok(());
        }

        if self.mountpoint.is_empty() {
            return Err(SettingsError::Validation("no mountpoint".to_string()));
        }

        if self.workdir.is_empty() {
            self.workdir = self.mountpoint.clone();
        }

        let default_resources = self.default_resources;
        for run in self.runs.values_mut() {
            run.validate(default_resources)?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, config: &RepoConfig) {
        if self.default_image.is_empty() && !config.default_image.is_empty() {
            self.default_image = config.default_image.clone();
        }

        for (name, run) in self.runs.iter_mut() {
            if run.image.is_empty() && !self.default_image.is_empty() {
                run.image = self.default_image.clone();
            }

            for (key, value) in &config.metadata {
                if config.override_metadata || !run.metadata.contains_key(key) {
                    run.metadata.insert(key.clone(), value.clone());
                }
            }

            run.name = name.clone();
        }

        self.apply_timeouts(config);
        self.apply_queues(config);

        if self.workdir.is_empty() && !config.workdir.is_empty() {
            self.workdir = config.workdir.clone();
        }

        if self.default_resources.is_empty() && !config.default_resources.is_empty() {
            self.default_resources = config.default_resources;
        }
    }

    fn apply_timeouts(&mut self, config: &RepoConfig) {
        if config.override_timeout && config.global_timeout != 0 {
            for run in self.runs.values_mut() {
                run.timeout = config.global_timeout;
            }
            return;
        }

        for run in self.runs.values_mut().filter(|r| r.timeout == 0) {
            if self.default_timeout != 0 {
                run.timeout = self.default_timeout;
            } else if config.global_timeout != 0 {
                run.timeout = config.global_timeout;
            }
        }
    }

    fn apply_queues(&mut self, config: &RepoConfig) {
        if config.override_queue {
            for run in self.runs.values_mut() {
                run.queue = config.queue.clone();
            }
            return;
        }

        let fallback = if !self.default_queue.is_empty() {
            self.default_queue.clone()
        } else if !config.queue.is_empty() {
            config.queue.clone()
        } else {
            DEFAULT_QUEUE.to_string()
        };

        for run in self.runs.values_mut().filter(|r| r.queue.is_empty()) {
            run.queue = fallback.clone();
        }
    }
}
