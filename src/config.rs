//! Static configuration read once at startup.
//!
//! Lookup order: explicit path, `./config.yaml`, then
//! `<config_dir>/securefill/config.yaml`. With no file at all the defaults
//! apply. The model credential may come from the environment instead of the
//! file (`SECUREFILL_API_KEY`, or `OPENAI_API_KEY` for the OpenAI provider).

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

pub const CONFIG_FILE: &str = "config.yaml";
const APP_DIR: &str = "securefill";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelProvider {
    /// Workspace chat endpoint: `POST {base_url}/workspace/{slug}/chat`.
    Workspace,
    /// OpenAI-compatible chat completions.
    #[serde(rename = "openai")]
    OpenAi,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub provider: ModelProvider,
    pub base_url: String,
    pub api_key: Option<String>,
    pub workspace_slug: String,
    pub model: String,
    pub temperature: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: ModelProvider::Workspace,
            base_url: "http://localhost:3001/api/v1".to_string(),
            api_key: None,
            workspace_slug: "securefill".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub enabled: bool,
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            top_k: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model: ModelConfig,
    /// Port the host relay accepts orchestrator commands on.
    pub host_port: u16,
    /// Port the orchestrator accepts scan results on.
    pub orchestrator_port: u16,
    /// First port tried for the local web UI.
    pub ui_port: u16,
    pub scan_timeout_secs: u64,
    pub prompt_timeout_secs: u64,
    pub error_grace_secs: u64,
    pub retrieval: RetrievalConfig,
    pub data_store: Option<PathBuf>,
    /// Static personal data always included in the prompt.
    pub primary_context: String,
    pub host_log: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            host_port: 6000,
            orchestrator_port: 6001,
            ui_port: 3000,
            scan_timeout_secs: 30,
            prompt_timeout_secs: 300,
            error_grace_secs: 3,
            retrieval: RetrievalConfig::default(),
            data_store: None,
            primary_context: String::new(),
            host_log: None,
        }
    }
}

impl Config {
    /// Load from `explicit`, or from the first config file found, or fall
    /// back to defaults. Environment overrides are applied last.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match Self::resolve_path(explicit) {
            Some(path) => Self::from_file(&path)?,
            None => {
                tracing::info!("no config file found, using defaults");
                Self::default()
            }
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = Self::from_yaml(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        tracing::info!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    /// The file [`Config::load`] reads for `explicit`; `None` means defaults.
    pub fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
        match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => Self::locate(),
        }
    }

    fn locate() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }
        let user = dirs::config_dir()?.join(APP_DIR).join(CONFIG_FILE);
        user.exists().then_some(user)
    }

    fn apply_env(&mut self) {
        let key_var = match self.model.provider {
            ModelProvider::Workspace => "SECUREFILL_API_KEY",
            ModelProvider::OpenAi => "OPENAI_API_KEY",
        };
        if let Ok(key) = std::env::var("SECUREFILL_API_KEY").or_else(|_| std::env::var(key_var)) {
            if !key.trim().is_empty() {
                self.model.api_key = Some(key);
            }
        }
    }

    pub fn host_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.host_port))
    }

    pub fn orchestrator_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.orchestrator_port))
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }

    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_secs(self.prompt_timeout_secs)
    }

    pub fn error_grace(&self) -> Duration {
        Duration::from_secs(self.error_grace_secs)
    }

    pub fn data_store_path(&self) -> PathBuf {
        self.data_store
            .clone()
            .unwrap_or_else(|| data_dir().join("datastore.json"))
    }

    pub fn host_log_path(&self) -> PathBuf {
        self.host_log
            .clone()
            .unwrap_or_else(|| data_dir().join("host.log"))
    }
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}
