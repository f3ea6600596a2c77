//! Config sections, one struct per TOML table.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// OpenAI-compatible endpoint used for function calling and embeddings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// API key. Falls back to `OPENAI_API_KEY` when unset.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Base URL for the API.
    /// Default: https://api.openai.com/v1
    #[serde(default = "OpenAiConfig::default_base_url")]
    pub base_url: String,

    /// Model asked to pick an operation.
    /// Default: gpt-3.5-turbo-0613
    #[serde(default = "OpenAiConfig::default_function_calling_model")]
    pub function_calling_model: String,

    /// Model used to embed operations and queries.
    /// Default: text-embedding-ada-002
    #[serde(default = "OpenAiConfig::default_embeddings_model")]
    pub embeddings_model: String,

    /// Per-request HTTP timeout in seconds.
    #[serde(default = "OpenAiConfig::default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Sampling temperature for the function-calling model.
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl OpenAiConfig {
    fn default_base_url() -> String {
        "https://api.openai.com/v1".to_string()
    }

    fn default_function_calling_model() -> String {
        "gpt-3.5-turbo-0613".to_string()
    }

    fn default_embeddings_model() -> String {
        "text-embedding-ada-002".to_string()
    }

    fn default_request_timeout_secs() -> u64 {
        60
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: Self::default_base_url(),
            function_calling_model: Self::default_function_calling_model(),
            embeddings_model: Self::default_embeddings_model(),
            request_timeout_secs: Self::default_request_timeout_secs(),
            temperature: None,
        }
    }
}

/// Where operation manifests live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Root directory scanned for `operation.toml` manifests.
    /// Relative paths resolve against the config file that set them.
    #[serde(default = "RegistryConfig::default_operations_dir")]
    pub operations_dir: PathBuf,
}

impl RegistryConfig {
    fn default_operations_dir() -> PathBuf {
        PathBuf::from("functions")
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            operations_dir: Self::default_operations_dir(),
        }
    }
}

/// Dispatch tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Shortlist size used when the caller does not pass one.
    #[serde(default = "DispatchConfig::default_k")]
    pub default_k: usize,

    /// Cap on alternative operations reported alongside a result.
    #[serde(default = "DispatchConfig::default_max_suggestions")]
    pub max_suggestions: usize,
}

impl DispatchConfig {
    fn default_k() -> usize {
        5
    }

    fn default_max_suggestions() -> usize {
        3
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_k: Self::default_k(),
            max_suggestions: Self::default_max_suggestions(),
        }
    }
}

/// Logging and trace export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive.
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,

    /// OTLP gRPC endpoint (host:port). Trace export is off when unset.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            otlp_endpoint: None,
        }
    }
}
