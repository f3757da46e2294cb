//! Host configuration loaded from a JSON file plus environment overrides

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::BridgeResult;

pub const ENV_CONFIG_PATH: &str = "FSBRIDGE_CONFIG";
pub const ENV_SERVER_URL: &str = "FSBRIDGE_SERVER_URL";
pub const ENV_SERVER_PORT: &str = "FSBRIDGE_SERVER_PORT";

/// Upload read size (64 KB)
const DEFAULT_READ_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub server_url: String,
    pub server_port: u16,
    pub health_interval_secs: Option<u64>,
    pub read_chunk_size: usize,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost".to_string(),
            server_port: 5000,
            health_interval_secs: None,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load from an optional JSON file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> BridgeResult<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                serde_json::from_str(&raw)?
            }
            None => AppConfig::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_SERVER_URL) {
            self.server_url = url;
        }
        if let Some(port) = lookup(ENV_SERVER_PORT) {
            match port.parse() {
                Ok(port) => self.server_port = port,
                Err(_) => log::warn!("config: ignoring invalid {}={}", ENV_SERVER_PORT, port),
            }
        }
    }

    /// `{server_url}:{server_port}` without a trailing slash.
    pub fn base_url(&self) -> String {
        format!(
            "{}:{}",
            self.server_url.trim_end_matches('/'),
            self.server_port
        )
    }

    pub fn health_interval(&self) -> Option<Duration> {
        self.health_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}
