//! Job process configuration.
//!
//! Each process of a BOSH job is described by a small YAML file:
//!
//! ```yaml
//! name: server
//! executable: /var/vcap/packages/program/bin/program-server
//! args:
//!   - --port=2424
//! env:
//!   - FOO=BAR
//! limits:
//!   memory: 100G
//!   open_files: 100
//!   processes: 200
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Declarative configuration for one process of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Logical process name, used in container-ID formation and log
    /// filenames.
    #[serde(default)]
    pub name: String,

    /// Absolute path to the binary to exec inside the container.
    #[serde(default)]
    pub executable: String,

    /// Arguments passed as argv to the executable.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables as `KEY=VALUE` strings.
    #[serde(default)]
    pub env: Vec<String>,

    /// Optional resource limits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<Limits>,
}

/// Resource limits for a process. A missing field imposes no limit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Limits {
    /// Memory limit as a human-readable byte string, e.g. `"100G"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,

    /// Maximum number of open file descriptors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_files: Option<u64>,

    /// Maximum number of processes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processes: Option<u64>,
}

/// Configuration loading errors, one variant per stage.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading the file failed.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        /// The configuration file path.
        path: PathBuf,
        /// The underlying I/O failure.
        source: std::io::Error,
    },

    /// The file is not valid YAML for the schema.
    #[error("invalid configuration in {}: {source}", path.display())]
    Parse {
        /// The configuration file path.
        path: PathBuf,
        /// The YAML decoding failure.
        source: serde_yaml::Error,
    },

    /// The decoded configuration violates a structural invariant.
    #[error(transparent)]
    Validate(#[from] ValidationError),
}

/// Structural invariant violations in a decoded configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The process name is empty.
    #[error("invalid config: name is required")]
    MissingName,

    /// The executable path is empty.
    #[error("invalid config: executable is required")]
    MissingExecutable,
}

impl JobConfig {
    /// Load and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] identifying the failed stage: read,
    /// parse, or validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self =
            serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Check the structural invariants: `name` and `executable` must be
    /// non-empty.
    ///
    /// Limits are not validated here; an invalid memory quantity is
    /// reported when the runtime spec is built.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::MissingName);
        }
        if self.executable.is_empty() {
            return Err(ValidationError::MissingExecutable);
        }
        Ok(())
    }
}
