//! Backup tool config.
//!

use std::{fs, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::provider::Component;

/// A workload declared in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// The stable identifier.
    pub id: String,

    /// The display name.
    pub name: String,

    /// The components the workload exposes for backup.
    #[serde(default)]
    pub components: Vec<Component>,
}

/// The backup tool's config.
#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    /// The destination directory for archives; must already exist.
    pub output_dir: PathBuf,

    /// The archive name template. `{vm}`, `{component}` and `{timestamp}`
    /// are substituted.
    pub name_template: String,

    /// Gzip compression level, 0-9.
    pub compression_level: i64,

    /// Back up every workload through one shared snapshot set.
    pub single_snapshot: bool,

    /// The workloads the config-backed provider and catalog expose.
    #[serde(default)]
    pub workloads: Vec<WorkloadConfig>,
}

impl Config {
    /// Tries to load a config from a toml file.
    pub fn load_toml(file_path: PathBuf) -> Result<Self, LoadConfigError> {
        if !file_path.exists() {
            return Err(LoadConfigError::NoFile);
        }

        let contents = fs::read_to_string(file_path).map_err(LoadConfigError::Read)?;
        let config = toml::from_str(&contents)?;

        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./backups"),
            name_template: "{vm}_{component}_{timestamp}.tar.gz".to_string(),
            compression_level: 6,
            single_snapshot: false,
            workloads: Vec::new(),
        }
    }
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("The file does not exist.")]
    NoFile,

    #[error("Failed to read the file:\n{0}")]
    Read(#[source] std::io::Error),

    #[error("Failed to deserialize the file:\n{0}")]
    Deserialize(#[from] toml::de::Error),
}
