//! Engine configuration
//!
//! Every field has a default from [`crate::constants`], so a config file only
//! needs the values it overrides.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::errors::ConfigError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// External HTTP client used by the curl transport
    pub curl_binary: String,
    pub http_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub ws_timeout_secs: u64,
    pub ws_idle_close_ms: u64,
    pub script_timeout_ms: u64,
    pub script_memory_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            curl_binary: DEFAULT_CURL_BINARY.to_string(),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
            ws_timeout_secs: DEFAULT_WS_TIMEOUT_SECS,
            ws_idle_close_ms: DEFAULT_WS_IDLE_CLOSE_MS,
            script_timeout_ms: DEFAULT_SCRIPT_TIMEOUT_MS,
            script_memory_limit: DEFAULT_SCRIPT_MEMORY_LIMIT,
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load a YAML config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// `~/.courier/config.yaml`
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".courier")
            .join("config.yaml")
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn ws_timeout(&self) -> Duration {
        Duration::from_secs(self.ws_timeout_secs)
    }

    pub fn ws_idle_close(&self) -> Duration {
        Duration::from_millis(self.ws_idle_close_ms)
    }

    pub fn script_timeout(&self) -> Duration {
        Duration::from_millis(self.script_timeout_ms)
    }
}
