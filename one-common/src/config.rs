//! Configuration management for the One bot services.
//!
//! Configuration lives in a single JSON file at `~/.onebot/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Explicit config file values
//! 2. Environment variables (ONE_* prefix)
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `ONE_BIND_ADDRESS` → server.bind
//! - `ONE_PORT` → server.port
//! - `ONE_LLM_BASE_URL` → llm.base_url
//! - `ONE_LLM_MODEL` → llm.model
//! - `DEEPSEEK_API_KEY` / `ONE_LLM_API_KEY` → llm.api_key
//! - `ONE_SESSION_DB` → session.db_path

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".onebot"),
        |dirs| dirs.home_dir().join(".onebot"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// LLM backend settings
    #[serde(default)]
    pub llm: LlmConfig,

    /// Session store settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Intent handling settings
    #[serde(default)]
    pub intent: IntentConfig,

    /// Observability settings
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address. Default: "127.0.0.1" (local only)
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind_address() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    4500
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
            port: default_port(),
        }
    }
}

/// LLM backend configuration (OpenAI-compatible endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// API key for the backend
    #[serde(default)]
    pub api_key: Option<String>,

    /// Base URL of the chat completions API
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Model identifier
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Per-call timeout in seconds. A timed-out call is treated as a
    /// generator failure, never surfaced raw.
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_llm_base_url() -> String {
    "https://api.deepseek.com".into()
}

fn default_llm_model() -> String {
    "deepseek-chat".into()
}

fn default_llm_timeout_secs() -> u64 {
    30
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

/// Session store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// SQLite database path. Default: `~/.onebot/sessions.db`
    #[serde(default)]
    pub db_path: Option<PathBuf>,

    /// Inactivity window after which a session's workflow state expires
    #[serde(default = "default_session_timeout_secs")]
    pub timeout_secs: u64,

    /// Number of recent turn records loaded into the context
    #[serde(default = "default_context_window")]
    pub context_window: usize,
}

fn default_session_timeout_secs() -> u64 {
    300
}

fn default_context_window() -> usize {
    10
}

impl SessionConfig {
    /// Resolve the database path, falling back to the config directory.
    pub fn resolve_db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| config_dir().join("sessions.db"))
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            timeout_secs: default_session_timeout_secs(),
            context_window: default_context_window(),
        }
    }
}

/// Intent handling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentConfig {
    /// Run the switch detector on turns that already have a live primary
    /// workflow. Off by default: every extra detection is one more LLM call
    /// per turn.
    #[serde(default)]
    pub switch_detection: bool,
}

#[allow(clippy::derivable_impls)]
impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            switch_detection: false,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Base log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Output format: "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from the default path with environment overrides.
    ///
    /// A missing config file is not an error — defaults are used.
    pub fn load() -> Result<Self> {
        let path = config_path();
        let mut config = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing config file {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply ONE_* environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(bind) = std::env::var("ONE_BIND_ADDRESS") {
            self.server.bind = bind;
        }
        if let Ok(port) = std::env::var("ONE_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Ok(url) = std::env::var("ONE_LLM_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Ok(model) = std::env::var("ONE_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Ok(key) = std::env::var("ONE_LLM_API_KEY") {
            self.llm.api_key = Some(key);
        } else if let Ok(key) = std::env::var("DEEPSEEK_API_KEY") {
            if self.llm.api_key.is_none() {
                self.llm.api_key = Some(key);
            }
        }
        if let Ok(db) = std::env::var("ONE_SESSION_DB") {
            self.session.db_path = Some(PathBuf::from(db));
        }
    }
}
