//! Application configuration management.
//!
//! Settings are merged from, lowest priority first:
//!
//! 1. Built-in defaults
//! 2. A TOML file: `--config PATH`, or `config.toml` in the platform config
//!    directory (e.g. `~/.config/webdiff/config.toml`)
//! 3. Environment variables prefixed `WEBDIFF_` (e.g. `WEBDIFF_TOOL_TIMEOUT_SECS=10`)
//! 4. Command-line overrides
//!
//! ```toml
//! cache_capacity = 256
//! tool_timeout_secs = 10
//! compare_program = "/opt/magick/bin/compare"
//! ```

use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::identity::hasher::DEFAULT_MMAP_THRESHOLD;
use crate::magick::ToolPrograms;

/// Prefix for configuration environment variables.
pub const ENV_PREFIX: &str = "WEBDIFF_";

/// Errors raised while loading or validating configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// A configuration source could not be read or parsed.
    #[error("Invalid configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// A value is outside its allowed range.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue {
        /// Name of the offending setting
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },
}

/// Pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum entries per memo cache.
    pub cache_capacity: usize,
    /// Seconds an external tool may run before it is killed.
    pub tool_timeout_secs: u64,
    /// `compare` binary.
    pub compare_program: String,
    /// `convert` binary.
    pub convert_program: String,
    /// `identify` binary.
    pub identify_program: String,
    /// Directory for diff artifacts; the system temp directory when unset.
    pub temp_dir: Option<PathBuf>,
    /// Delete an artifact's file when its cache entry is evicted.
    pub delete_evicted_artifacts: bool,
    /// Files at least this large are memory-mapped for hashing.
    pub mmap_threshold: u64,
    /// Worker threads for batch operations.
    pub io_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        let programs = ToolPrograms::default();
        Self {
            cache_capacity: 128,
            tool_timeout_secs: 30,
            compare_program: programs.compare,
            convert_program: programs.convert,
            identify_program: programs.identify,
            temp_dir: None,
            delete_evicted_artifacts: true,
            mmap_threshold: DEFAULT_MMAP_THRESHOLD,
            io_threads: 4,
        }
    }
}

impl Config {
    /// Load configuration from defaults, the config file and the environment.
    ///
    /// `explicit_path` replaces the platform config file. A missing platform
    /// file is fine; a missing explicit file is an error.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a source cannot be parsed or a value is invalid.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::figment(explicit_path)?
            .extract::<Self>()
            .map_err(|e| ConfigError::Load(Box::new(e)))
            .and_then(Self::validated)
    }

    /// The merged configuration sources, for callers that layer more on top.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if `explicit_path` does not exist.
    pub fn figment(explicit_path: Option<&Path>) -> Result<Figment, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        match explicit_path {
            Some(path) => {
                if !path.is_file() {
                    return Err(ConfigError::InvalidValue {
                        field: "config",
                        reason: format!("{} does not exist", path.display()),
                    });
                }
                figment = figment.merge(Toml::file(path));
            }
            None => {
                if let Some(path) = Self::default_path() {
                    log::debug!("Looking for config at {}", path.display());
                    figment = figment.merge(Toml::file(path));
                }
            }
        }

        Ok(figment.merge(Env::prefixed(ENV_PREFIX)))
    }

    /// Platform-specific default config file location.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "webdiff").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for the first out-of-range setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("cache_capacity", self.cache_capacity as u64),
            ("tool_timeout_secs", self.tool_timeout_secs),
            ("io_threads", self.io_threads as u64),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        for (field, program) in [
            ("compare_program", &self.compare_program),
            ("convert_program", &self.convert_program),
            ("identify_program", &self.identify_program),
        ] {
            if program.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }

    fn validated(self) -> Result<Self, ConfigError> {
        self.validate()?;
        Ok(self)
    }

    /// Timeout for a single external tool run.
    #[must_use]
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    /// Toolkit program names.
    #[must_use]
    pub fn programs(&self) -> ToolPrograms {
        ToolPrograms {
            compare: self.compare_program.clone(),
            convert: self.convert_program.clone(),
            identify: self.identify_program.clone(),
        }
    }
}
