use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::classifier::{Classifier, DuplicatePolicy};
use crate::error::{BudgieError, Result};
use crate::normalizer::AmountFormat;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub data_dir: String,
    #[serde(default = "default_user_name")]
    pub user_name: String,
    #[serde(default)]
    pub amount_format: AmountFormat,
    #[serde(default = "default_date_format")]
    pub date_format: String,
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
    /// Optional date window (days) for automatic candidate matching.
    #[serde(default)]
    pub match_window_days: Option<u32>,
}

fn default_user_name() -> String {
    "default".to_string()
}

fn default_date_format() -> String {
    "%Y-%m-%d".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir().to_string_lossy().to_string(),
            user_name: default_user_name(),
            amount_format: AmountFormat::default(),
            date_format: default_date_format(),
            duplicate_policy: DuplicatePolicy::default(),
            match_window_days: None,
        }
    }
}

impl Settings {
    pub fn classifier(&self) -> Classifier {
        Classifier {
            policy: self.duplicate_policy,
            window_days: self.match_window_days,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(crate::db::DB_FILE)
    }
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("budgie")
}

fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Documents")
        .join("budgie")
}

pub fn load_settings() -> Settings {
    let path = settings_path();
    if path.exists() {
        let content = std::fs::read_to_string(&path).unwrap_or_default();
        match serde_json::from_str(&content) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable settings file");
                Settings::default()
            }
        }
    } else {
        Settings::default()
    }
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir)?;
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| BudgieError::Settings(e.to_string()))?;
    std::fs::write(settings_path(), format!("{json}\n"))?;
    Ok(())
}

pub fn shellexpand_path(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| PathBuf::from(path))
        .to_string_lossy()
        .to_string()
}
