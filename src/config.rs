use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::storage::sqlite_store::{DEFAULT_BUFFER_SIZE, DEFAULT_POLL_INTERVAL};

pub const DEFAULT_CONFIG_PATH: &str = "config/chat.json";
pub const DATABASE_PATH_ENV: &str = "CHAT_DATABASE_PATH";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// SQLite file holding profiles, sessions and messages.
    pub database_path: String,
    /// Capacity of the UI <-> backend channels and of each change feed.
    pub channel_capacity: usize,
    /// How often the database is checked for rows written by other processes.
    pub poll_interval_ms: u64,
    pub window_title: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: "data/chat.db".to_string(),
            channel_capacity: DEFAULT_BUFFER_SIZE,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            window_title: "Chat App".to_string(),
        }
    }
}

impl AppConfig {
    /// Environment wins over the file (`.env` is loaded by `main`).
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(path) = std::env::var(DATABASE_PATH_ENV) {
            if !path.trim().is_empty() {
                log::info!("Using database path from {DATABASE_PATH_ENV}");
                self.database_path = path;
            }
        }
        self
    }
}

pub fn load_config(path: &str) -> AppConfig {
    let path = Path::new(path);
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                AppConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            AppConfig::default()
        }
    }
}

pub fn save_config(path: &str, config: &AppConfig) -> std::io::Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)
}
