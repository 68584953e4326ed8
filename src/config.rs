//! Runtime configuration for the gateway.
//!
//! Configuration is loaded from a JSON file and then patched with any
//! command-line overrides. Missing fields fall back to defaults.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "jarvis-ai-gateway",
    about = "OpenAI-compatible gateway for a local Ollama server"
)]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// HTTP listen address, overrides the config file.
    #[arg(long)]
    pub listen: Option<String>,

    /// Ollama base URL, overrides the config file.
    #[arg(long)]
    pub backend_url: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,

    /// Backend (Ollama) configuration.
    pub backend: BackendConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "0.0.0.0:8000").
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8000".to_string(),
        }
    }
}

/// Inference backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the Ollama server.
    pub base_url: String,

    /// Timeout for non-streaming chat calls. Streaming calls are unbounded.
    pub chat_timeout_secs: u64,

    /// Timeout for the model listing endpoint.
    pub models_timeout_secs: u64,

    /// Timeout for the health probe.
    pub health_timeout_secs: u64,

    /// Longest streamed line accepted from the backend; longer lines are dropped.
    pub max_line_bytes: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            chat_timeout_secs: 60,
            models_timeout_secs: 10,
            health_timeout_secs: 5,
            max_line_bytes: 1024 * 1024, // 1 MiB
        }
    }
}

impl BackendConfig {
    pub fn chat_timeout(&self) -> Duration {
        Duration::from_secs(self.chat_timeout_secs)
    }

    pub fn models_timeout(&self) -> Duration {
        Duration::from_secs(self.models_timeout_secs)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Apply command-line overrides on top of the loaded file.
    pub fn apply_cli(mut self, cli: &Cli) -> Self {
        if let Some(listen) = &cli.listen {
            self.server.listen = listen.clone();
        }
        if let Some(url) = &cli.backend_url {
            self.backend.base_url = url.trim_end_matches('/').to_string();
        }
        self
    }
}
