//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

fn default_db_file() -> String {
    "groups.db".into()
}

fn default_wait_timeout_seconds() -> u64 {
    10
}

fn default_close_grace_seconds() -> u64 {
    2
}

fn default_stop_grace_seconds() -> u64 {
    5
}

/// Global configuration parsed from `procgroups.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Directory holding the capture files and the database file.
    pub root: PathBuf,
    /// Database file name, relative to `root`.
    #[serde(default = "default_db_file")]
    pub db_file: String,
    /// Deadline applied by `Groups::wait`.
    #[serde(default = "default_wait_timeout_seconds")]
    pub wait_timeout_seconds: u64,
    /// Grace period allowed for killed processes to be reaped on close.
    #[serde(default = "default_close_grace_seconds")]
    pub close_grace_seconds: u64,
    /// Grace period allowed for a single stopped process to be reaped.
    #[serde(default = "default_stop_grace_seconds")]
    pub stop_grace_seconds: u64,
}

impl GlobalConfig {
    /// Build a configuration with default timings rooted at `root`.
    #[must_use]
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            db_file: default_db_file(),
            wait_timeout_seconds: default_wait_timeout_seconds(),
            close_grace_seconds: default_close_grace_seconds(),
            stop_grace_seconds: default_stop_grace_seconds(),
        }
    }

    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Path of the `SQLite` database file.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.root.join(&self.db_file)
    }

    /// Deadline applied to `wait`.
    #[must_use]
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_seconds)
    }

    /// Grace period applied to `close`.
    #[must_use]
    pub fn close_grace(&self) -> Duration {
        Duration::from_secs(self.close_grace_seconds)
    }

    /// Grace period applied to `remove` and `stop`.
    #[must_use]
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_seconds)
    }

    /// Validate field values.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when a timing is zero, the database file
    /// name is empty or nested, or `root` exists but is not a directory.
    pub fn validate(&self) -> Result<()> {
        if self.wait_timeout_seconds == 0 {
            return Err(AppError::Config(
                "wait_timeout_seconds must be greater than zero".into(),
            ));
        }
        if self.close_grace_seconds == 0 {
            return Err(AppError::Config(
                "close_grace_seconds must be greater than zero".into(),
            ));
        }
        if self.stop_grace_seconds == 0 {
            return Err(AppError::Config(
                "stop_grace_seconds must be greater than zero".into(),
            ));
        }
        if self.db_file.is_empty() || Path::new(&self.db_file).components().count() != 1 {
            return Err(AppError::Config(format!(
                "db_file must be a plain file name, got {:?}",
                self.db_file
            )));
        }
        if self.root.exists() && !self.root.is_dir() {
            return Err(AppError::Config(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }
        Ok(())
    }
}
