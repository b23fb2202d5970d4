//! Dashboard configuration.
//!
//! Built from defaults, then an optional TOML file, then `DASHBOARD_*`
//! environment variables, then command-line overrides, and finally checked by
//! [`DashboardConfig::normalize`].

use crate::db::DEFAULT_DB_FILENAME;
use crate::error::AppError;
use crate::logs::types::{validate_history_limit, DEFAULT_HISTORY_LIMIT, LOG_BUFFER_CAPACITY};
use reqwest::Url;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_API_BASE: &str = "http://127.0.0.1:8000/api";
pub const DEFAULT_HISTORY_BASE: &str = "http://127.0.0.1:8000";
pub const DEFAULT_STREAM_BASE: &str = "ws://127.0.0.1:8000";
pub const DEFAULT_DATA_DIR: &str = ".dashboard";
pub const DEFAULT_LOG_LEVEL: &str = "info";

pub const ENV_API_BASE: &str = "DASHBOARD_API_BASE";
pub const ENV_HISTORY_BASE: &str = "DASHBOARD_HISTORY_BASE";
pub const ENV_STREAM_BASE: &str = "DASHBOARD_STREAM_BASE";
pub const ENV_DATA_DIR: &str = "DASHBOARD_DATA_DIR";
pub const ENV_DB_FILENAME: &str = "APP_DB_FILENAME";
pub const ENV_LOG_LEVEL: &str = "DASHBOARD_LOG_LEVEL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardConfig {
    pub api_base: String,
    pub history_base: String,
    pub stream_base: String,
    pub data_dir: PathBuf,
    pub db_filename: String,
    pub history_limit: u16,
    pub buffer_capacity: usize,
    pub log_level: String,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            history_base: DEFAULT_HISTORY_BASE.to_string(),
            stream_base: DEFAULT_STREAM_BASE.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            db_filename: DEFAULT_DB_FILENAME.to_string(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            buffer_capacity: LOG_BUFFER_CAPACITY,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

/// Command-line values; `None` keeps whatever the earlier layers produced.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub api_base: Option<String>,
    pub history_base: Option<String>,
    pub stream_base: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub history_limit: Option<u16>,
    pub log_level: Option<String>,
}

impl DashboardConfig {
    /// Full layering for the binary: file (if any), process environment,
    /// overrides, then validation.
    pub fn load(path: Option<&Path>, overrides: ConfigOverrides) -> Result<Self, AppError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.apply_overrides(overrides);
        config.normalize()
    }

    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, AppError> {
        let file: TomlConfig = toml::from_str(content)?;
        let mut config = Self::default();
        config.merge_file(file);
        Ok(config)
    }

    fn merge_file(&mut self, file: TomlConfig) {
        let TomlConfig {
            backend,
            storage,
            logs,
        } = file;

        if let Some(value) = backend.api_base {
            self.api_base = value;
        }
        if let Some(value) = backend.history_base {
            self.history_base = value;
        }
        if let Some(value) = backend.stream_base {
            self.stream_base = value;
        }
        if let Some(value) = storage.data_dir {
            self.data_dir = value;
        }
        if let Some(value) = storage.db_filename {
            self.db_filename = value;
        }
        if let Some(value) = logs.history_limit {
            self.history_limit = value;
        }
        if let Some(value) = logs.buffer_capacity {
            self.buffer_capacity = value;
        }
        if let Some(value) = logs.level {
            self.log_level = value;
        }
    }

    /// Applies environment overrides through `lookup`; blank values are
    /// ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = read(ENV_API_BASE) {
            self.api_base = value;
        }
        if let Some(value) = read(ENV_HISTORY_BASE) {
            self.history_base = value;
        }
        if let Some(value) = read(ENV_STREAM_BASE) {
            self.stream_base = value;
        }
        if let Some(value) = read(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(value);
        }
        if let Some(value) = read(ENV_DB_FILENAME) {
            self.db_filename = value;
        }
        if let Some(value) = read(ENV_LOG_LEVEL) {
            self.log_level = value;
        }
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(value) = overrides.api_base {
            self.api_base = value;
        }
        if let Some(value) = overrides.history_base {
            self.history_base = value;
        }
        if let Some(value) = overrides.stream_base {
            self.stream_base = value;
        }
        if let Some(value) = overrides.data_dir {
            self.data_dir = value;
        }
        if let Some(value) = overrides.history_limit {
            self.history_limit = value;
        }
        if let Some(value) = overrides.log_level {
            self.log_level = value;
        }
    }

    pub fn normalize(self) -> Result<Self, AppError> {
        let api_base = normalize_base("api_base", &self.api_base, &["http", "https"])?;
        let history_base = normalize_base("history_base", &self.history_base, &["http", "https"])?;
        let stream_base = normalize_base("stream_base", &self.stream_base, &["ws", "wss"])?;

        let db_filename = self.db_filename.trim().to_string();
        if db_filename.is_empty() || db_filename.contains(['/', '\\']) {
            return Err(AppError::InvalidArgument(
                "db_filename must be a bare, non-empty file name".to_string(),
            ));
        }

        let history_limit = validate_history_limit(self.history_limit)?;
        if self.buffer_capacity == 0 {
            return Err(AppError::InvalidArgument(
                "buffer_capacity must be greater than zero".to_string(),
            ));
        }

        let log_level = self.log_level.trim().to_ascii_lowercase();
        if log_level.is_empty() {
            return Err(AppError::InvalidArgument(
                "log level must not be empty".to_string(),
            ));
        }

        Ok(Self {
            api_base,
            history_base,
            stream_base,
            data_dir: self.data_dir,
            db_filename,
            history_limit,
            buffer_capacity: self.buffer_capacity,
            log_level,
        })
    }
}

fn normalize_base(field: &str, value: &str, schemes: &[&str]) -> Result<String, AppError> {
    let trimmed = value.trim().trim_end_matches('/');
    let url = Url::parse(trimmed)
        .map_err(|error| AppError::InvalidArgument(format!("{field} is not a valid url: {error}")))?;

    if !schemes.contains(&url.scheme()) {
        return Err(AppError::InvalidArgument(format!(
            "{field} must use one of: {}",
            schemes.join(", ")
        )));
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TomlConfig {
    backend: BackendToml,
    storage: StorageToml,
    logs: LogsToml,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BackendToml {
    api_base: Option<String>,
    history_base: Option<String>,
    stream_base: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StorageToml {
    data_dir: Option<PathBuf>,
    db_filename: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LogsToml {
    history_limit: Option<u16>,
    buffer_capacity: Option<usize>,
    level: Option<String>,
}
