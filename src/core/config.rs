//! Configuration management for webpilot
//!
//! Values come from the TOML file when present, otherwise from
//! `WEBPILOT_*` environment variables and built-in defaults. The CLI
//! overrides a handful of them at startup.
//!
//! Config file location: ~/.config/webpilot/config.toml

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::error::{PilotError, Result};

/// Main configuration for webpilot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Reasoning oracle endpoint
    pub oracle: OracleConfig,
    /// DevTools endpoint and snapshot bounds
    pub browser: BrowserConfig,
    /// Orchestrator behaviour
    pub agent: AgentConfig,
    /// Internal request/response channel
    #[serde(default)]
    pub bridge: BridgeConfig,
}

/// OpenAI-compatible chat completion endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Full chat completions URL
    pub api_url: String,
    /// Bearer token, only ever read from the environment
    #[serde(skip)]
    pub api_key: Option<String>,
    /// Model identifier sent with every request
    pub model: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Sampling temperature for instruction requests
    pub temperature: f32,
    /// Completion token budget
    pub max_tokens: u32,
    /// Nucleus sampling
    pub top_p: f32,
}

/// DevTools endpoint and snapshot bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Host running Chrome with --remote-debugging-port
    pub host: String,
    /// Remote debugging port
    pub port: u16,
    /// Deadline for a single CDP command in ms
    pub command_timeout_ms: u64,
    /// Maximum characters of text kept per element
    pub text_limit: usize,
    /// Maximum characters kept per attribute value
    pub attribute_limit: usize,
    /// Maximum elements retained per snapshot
    pub max_nodes: usize,
    /// Maximum tree depth explored per snapshot
    pub max_depth: usize,
    /// Maximum characters returned by `extract`
    pub extract_limit: usize,
}

/// Orchestrator behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Ring buffer capacity for execution history
    /// Default: 100
    pub history_capacity: usize,
    /// Number of most recent records sent to the oracle
    /// Default: 10
    pub context_window: usize,
    /// Iteration cap; unbounded when unset
    #[serde(default)]
    pub max_iterations: Option<usize>,
    /// Consecutive failed steps tolerated before giving up; unbounded when unset
    #[serde(default)]
    pub max_consecutive_failures: Option<usize>,
    /// Duration used by `wait` when the instruction carries none
    pub default_wait_ms: u64,
    /// Pause after each action before re-sensing
    pub settle_ms: u64,
    /// Whether to log at debug level
    pub debug: bool,
}

/// Internal request/response channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Default reply deadline in seconds
    pub request_timeout_secs: u64,
    /// Pending request queue depth
    pub queue_depth: usize,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            api_url: env::var("WEBPILOT_API_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string()),
            api_key: env::var("WEBPILOT_API_KEY").ok().filter(|k| !k.is_empty()),
            model: env::var("WEBPILOT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            timeout_secs: 120,
            temperature: 0.7,
            max_tokens: 2048,
            top_p: 0.5,
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            host: env::var("WEBPILOT_CDP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("WEBPILOT_CDP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(9222),
            command_timeout_ms: 30_000,
            text_limit: 200,
            attribute_limit: 200,
            max_nodes: 1500,
            max_depth: 64,
            extract_limit: 2000,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            history_capacity: 100,
            context_window: 10,
            max_iterations: None,
            max_consecutive_failures: None,
            default_wait_ms: 1000,
            settle_ms: 500,
            debug: env::var("WEBPILOT_DEBUG")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            queue_depth: 32,
        }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("webpilot")
    }

    /// Get the config file path
    pub fn config_file() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load the default file, falling back to env-backed defaults
    /// Priority: CLI args > config file > env vars > defaults
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();

        Self::load_from_path(&Self::config_file()).unwrap_or_default()
    }

    /// Load configuration from a specific file
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PilotError::config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        let content = fs::read_to_string(path)
            .map_err(|e| PilotError::config(format!("Failed to read config: {}", e)))?;

        let mut config: Config = toml::from_str(&content)
            .map_err(|e| PilotError::config(format!("Failed to parse config: {}", e)))?;

        // The key is never stored on disk
        config.oracle.api_key = OracleConfig::default().api_key;
        Ok(config)
    }

    /// Save configuration to a specific file
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| PilotError::config(format!("Failed to create config dir: {}", e)))?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| PilotError::config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, content)
            .map_err(|e| PilotError::config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Save configuration to the default location and return the path
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_file();
        self.save_to_path(&path)?;
        Ok(path)
    }

    /// Check that the oracle can be reached with credentials
    pub fn validate(&self) -> Result<()> {
        if self.oracle.api_url.trim().is_empty() {
            return Err(PilotError::config("oracle.api_url is empty"));
        }
        if self.oracle.model.trim().is_empty() {
            return Err(PilotError::config("oracle.model is empty"));
        }
        if self.oracle.api_key.is_none() {
            return Err(PilotError::config("WEBPILOT_API_KEY is not set"));
        }
        if self.agent.history_capacity == 0 {
            return Err(PilotError::config("agent.history_capacity must be positive"));
        }
        Ok(())
    }

    /// Base URL of the DevTools HTTP endpoint
    pub fn devtools_url(&self) -> String {
        format!("http://{}:{}", self.browser.host, self.browser.port)
    }

    /// Default configuration rendered as TOML
    pub fn default_config_toml() -> String {
        toml::to_string_pretty(&Config::default())
            .unwrap_or_else(|_| String::from("# Error generating config"))
    }
}

impl BrowserConfig {
    /// Per-command deadline
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

impl AgentConfig {
    /// Wait used when `wait` carries no duration
    pub fn default_wait(&self) -> Duration {
        Duration::from_millis(self.default_wait_ms)
    }
}

impl BridgeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
