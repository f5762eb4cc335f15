use crate::gateway::GatewayConfig;
use crate::generation::GenerationConfig;
use crate::transcription::TranscriptionConfig;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub gateway: GatewayConfig,
    pub persistence: PersistenceConfig,
    pub requests: RequestsConfig,
    pub transcription: TranscriptionConfig,
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "convo-assist".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub enabled: bool,
    /// Snapshot directory; `~` is expanded
    pub directory: String,
    pub max_persistence_hours: u64,
    pub cleanup_interval_minutes: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: "./sessions".to_string(),
            max_persistence_hours: 24,
            cleanup_interval_minutes: 60,
        }
    }
}

impl PersistenceConfig {
    pub fn resolved_directory(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.directory).into_owned())
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_persistence_hours * 3600)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_minutes.max(1) * 60)
    }
}

/// Retention of finished request bookkeeping
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RequestsConfig {
    pub retention_hours: i64,
    pub prune_interval_minutes: u64,
}

impl Default for RequestsConfig {
    fn default() -> Self {
        Self {
            retention_hours: 1,
            prune_interval_minutes: 10,
        }
    }
}

impl RequestsConfig {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.retention_hours)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_minutes.max(1) * 60)
    }
}

impl Config {
    /// Built-in defaults, then the optional file at `path`, then
    /// `CONVO_ASSIST__SECTION__KEY` environment variables
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("CONVO_ASSIST")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to load configuration from {}", path))?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }
}
