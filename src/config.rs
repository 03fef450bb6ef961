//! Configuration using Figment
//!
//! Settings are layered, later sources overriding earlier ones:
//! 1. built-in defaults
//! 2. a TOML file (`config/lcls_live.toml` unless another path is given)
//! 3. environment variables prefixed with `LCLS_LIVE_`, nested keys separated by `__`
//!    (e.g. `LCLS_LIVE_APPLICATION__LOG_LEVEL=debug`)
//!
//! # Example
//! ```no_run
//! use lcls_live::config::Settings;
//!
//! let settings = Settings::load()?;
//! println!("Archive extension: {}", settings.archive.extension);
//! # Ok::<(), lcls_live::error::LiveError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::archive::{is_readable_extension, readable_extensions, DEFAULT_EXTENSION, DEFAULT_SEARCH_PATHS};
use crate::datamap::Dialect;
use crate::error::{LiveError, LiveResult};

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/lcls_live.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "LCLS_LIVE_";

/// Top-level settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationSettings,
    /// Archive lookup
    #[serde(default)]
    pub archive: ArchiveSettings,
    /// Statement rendering
    #[serde(default)]
    pub output: OutputSettings,
}

/// Application-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Archive settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveSettings {
    /// Candidate archive roots, the first existing one is used
    #[serde(default = "default_search_paths")]
    pub search_paths: Vec<PathBuf>,
    /// Shard file extension without the dot
    #[serde(default = "default_extension")]
    pub extension: String,
}

/// Output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSettings {
    /// `bmad`, `tao`, or a custom template containing `{value}`
    #[serde(default = "default_dialect")]
    pub dialect: String,
}

fn default_name() -> String {
    "lcls-live".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

fn default_search_paths() -> Vec<PathBuf> {
    DEFAULT_SEARCH_PATHS.iter().map(PathBuf::from).collect()
}

fn default_extension() -> String {
    DEFAULT_EXTENSION.to_string()
}

fn default_dialect() -> String {
    "tao".to_string()
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            search_paths: default_search_paths(),
            extension: default_extension(),
        }
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            dialect: default_dialect(),
        }
    }
}

impl Settings {
    /// Load from the default file and the environment.
    pub fn load() -> LiveResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file and the environment. A missing file is not an error.
    pub fn load_from<P: AsRef<Path>>(path: P) -> LiveResult<Self> {
        let settings: Self = Self::figment(path).extract()?;
        settings.validate().map_err(LiveError::Configuration)?;
        Ok(settings)
    }

    /// Provider stack used by [`Settings::load_from`].
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate settings after loading
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            ));
        }

        if self.archive.search_paths.is_empty() {
            return Err("archive.search_paths must not be empty".to_string());
        }

        if self.archive.extension.trim_start_matches('.').is_empty() {
            return Err("archive.extension must not be empty".to_string());
        }

        if !is_readable_extension(&self.archive.extension) {
            return Err(format!(
                "No shard reader for archive.extension '{}'. Readable: {}",
                self.archive.extension,
                readable_extensions().join(", ")
            ));
        }

        self.dialect().map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Configured output dialect.
    pub fn dialect(&self) -> LiveResult<Dialect> {
        self.output.dialect.parse()
    }
}
