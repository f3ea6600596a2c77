//! Configuration loading for funnel.
//!
//! `FunnelConfig` is built once at startup and handed by reference to the
//! registry loader, the OpenAI backend and the dispatcher. Nothing in the
//! workspace reads configuration from globals.
//!
//! # Usage
//!
//! ```rust,no_run
//! use funnelconf::FunnelConfig;
//!
//! let config = FunnelConfig::load().expect("Failed to load config");
//!
//! println!("Operations: {}", config.registry.operations_dir.display());
//! println!("Chat model: {}", config.openai.function_calling_model);
//! println!("Default k: {}", config.dispatch.default_k);
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/funnel/config.toml` (system)
//! 2. `~/.config/funnel/config.toml` (user)
//! 3. `./funnel.toml` (local override, or the `--config` path)
//! 4. Environment variables (`FUNNEL_*`, then `OPENAI_API_KEY`)
//!
//! # Example Config
//!
//! ```toml
//! [openai]
//! base_url = "https://api.openai.com/v1"
//! function_calling_model = "gpt-3.5-turbo-0613"
//! embeddings_model = "text-embedding-ada-002"
//!
//! [registry]
//! operations_dir = "./functions"
//!
//! [dispatch]
//! default_k = 5
//! max_suggestions = 3
//!
//! [telemetry]
//! log_level = "info,funnel=debug"
//! ```

pub mod loader;
pub mod sections;

pub use loader::{discover_config_files_with_override, ConfigSources};
pub use sections::{DispatchConfig, OpenAiConfig, RegistryConfig, TelemetryConfig};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete funnel configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FunnelConfig {
    #[serde(default)]
    pub openai: OpenAiConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl FunnelConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration, letting `config_path` replace `./funnel.toml`.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and report where values came from.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::load_from_file(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let mut config = Self::from_table(merged)?;
        loader::apply_env_overrides(&mut config, &mut sources);
        config.validate()?;

        Ok((config, sources))
    }

    /// Deserialize a merged TOML table, filling in defaults.
    pub fn from_table(table: toml::Table) -> Result<Self, ConfigError> {
        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Invalid(e.to_string()))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.openai.function_calling_model.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "openai.function_calling_model must not be empty".to_string(),
            ));
        }
        if self.openai.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "openai.request_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Serialize config to TOML, leaving the API key out.
    pub fn to_toml(&self) -> String {
        let mut redacted = self.clone();
        redacted.openai.api_key = None;
        toml::to_string_pretty(&redacted).unwrap_or_default()
    }
}
