use std::env;
use std::fs;
use std::path::PathBuf;

use chrono::Duration;
use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};

use crate::autosave::DEFAULT_AUTOSAVE_DELAY_MS;
use crate::error::{LedgerError, Result};
use crate::store::{DEFAULT_HISTORY_LIMIT, StoreOptions};
use crate::voice::VoiceLanguage;

/// Overrides `data_root` from the settings file.
pub const DATA_ROOT_ENV: &str = "LEDGER_DATA_ROOT";
pub const DEFAULT_DATA_ROOT: &str = "~/Documents/Ledger";

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

fn default_autosave_delay_ms() -> i64 {
    DEFAULT_AUTOSAVE_DELAY_MS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    pub data_root: String,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_autosave_delay_ms")]
    pub autosave_delay_ms: i64,
    #[serde(default)]
    pub voice_language: VoiceLanguage,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            data_root: DEFAULT_DATA_ROOT.to_string(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            autosave_delay_ms: DEFAULT_AUTOSAVE_DELAY_MS,
            voice_language: VoiceLanguage::default(),
        }
    }
}

impl AppSettings {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| LedgerError::Settings(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| LedgerError::Settings(e.to_string()))
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            history_limit: self.history_limit.max(1),
            autosave_delay: Duration::milliseconds(self.autosave_delay_ms.max(0)),
        }
    }

    /// Data root with `~` expanded; `LEDGER_DATA_ROOT` wins when set.
    pub fn root(&self) -> PathBuf {
        let raw = env::var(DATA_ROOT_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| self.data_root.clone());
        PathBuf::from(expand_home_dir(&raw))
    }

    /// Directory holding the persisted key-value files.
    pub fn data_dir(&self) -> PathBuf {
        self.root().join("data")
    }

    pub fn export_dir(&self) -> PathBuf {
        self.root().join("exports")
    }
}

pub fn get_config_path() -> PathBuf {
    if let Some(proj_dirs) = ProjectDirs::from("com", "ledger-calc", "app") {
        let config_dir = proj_dirs.config_dir();
        if !config_dir.exists() {
            fs::create_dir_all(config_dir).ok();
        }
        return config_dir.join("settings.toml");
    }
    PathBuf::from("settings.toml")
}

/// `None` when no settings file exists yet.
pub fn load_settings() -> Result<Option<AppSettings>> {
    let path = get_config_path();
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    AppSettings::from_toml(&content).map(Some)
}

pub fn save_settings(settings: &AppSettings) -> Result<PathBuf> {
    let path = get_config_path();
    fs::write(&path, settings.to_toml()?)?;
    Ok(path)
}

pub fn expand_home_dir(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(base_dirs) = BaseDirs::new() {
            let home = base_dirs.home_dir().to_string_lossy();
            return path.replacen('~', &home, 1);
        }
    }
    path.to_string()
}
