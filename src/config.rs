//! Configuration for the gradebook core
//!
//! TOML format, by default at `<data dir>/config.toml`:
//!
//! ```toml
//! [storage]
//! data_dir = "/home/teacher/.local/share/gradebook"
//!
//! [manager]
//! recent_limit = 10
//! resume_window_days = 30
//! default_project_name = "My first project"
//!
//! [autosave]
//! enabled = true
//! interval_secs = 30
//! debounce_ms = 2000
//! ```
//!
//! Every key is optional. `GRADEBOOK_DATA_DIR` overrides `storage.data_dir`.

use crate::error::{GradebookError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the data directory
pub const DATA_DIR_ENV: &str = "GRADEBOOK_DATA_DIR";

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GradebookConfig {
    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub manager: ManagerSettings,

    #[serde(default)]
    pub autosave: AutoSaveSettings,
}

/// Where the project store lives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Project manager policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerSettings {
    /// Maximum length of the recent list
    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,

    /// Last open project is resumed only if touched within this many days
    #[serde(default = "default_resume_window_days")]
    pub resume_window_days: f64,

    /// Name of the project created when the collection is empty
    #[serde(default = "default_project_name")]
    pub default_project_name: String,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            recent_limit: default_recent_limit(),
            resume_window_days: default_resume_window_days(),
            default_project_name: default_project_name(),
        }
    }
}

/// Background saving of the open project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoSaveSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for AutoSaveSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval_secs(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl AutoSaveSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gradebook")
}

fn default_recent_limit() -> usize {
    10
}

fn default_resume_window_days() -> f64 {
    30.0
}

fn default_project_name() -> String {
    "My first project".to_string()
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    30
}

fn default_debounce_ms() -> u64 {
    2000
}

impl GradebookConfig {
    /// Load configuration from file, falling back to defaults if it is missing
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| {
                GradebookError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to read config file: {}", e),
                ))
            })?;
            let config: GradebookConfig = toml::from_str(&content)?;
            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found, using defaults: {:?}", path);
            Self::default()
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| GradebookError::Config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                GradebookError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to create config directory: {}", e),
                ))
            })?;
        }

        std::fs::write(path, content).map_err(|e| {
            GradebookError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to write config file: {}", e),
            ))
        })?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Default config path inside the default data directory
    pub fn default_path() -> PathBuf {
        default_data_dir().join("config.toml")
    }

    fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            if !dir.is_empty() {
                self.storage.data_dir = PathBuf::from(dir);
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.manager.recent_limit == 0 {
            return Err(GradebookError::Config(
                "manager.recent_limit must be at least 1".to_string(),
            ));
        }
        let window = self.manager.resume_window_days;
        if window.is_nan() || window < 0.0 {
            return Err(GradebookError::Config(
                "manager.resume_window_days must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}
