//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, FunnelConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/funnel/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("funnel/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("funnel.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Load a TOML file as a raw table.
///
/// A relative `registry.operations_dir` is rewritten against the file's
/// directory so later merges don't change what it points at.
pub fn load_from_file(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut table = parse_toml(&contents, path)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    resolve_operations_dir(&mut table, base);
    Ok(table)
}

fn parse_toml(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn resolve_operations_dir(table: &mut toml::Table, base: &Path) {
    let Some(registry) = table.get_mut("registry").and_then(|v| v.as_table_mut()) else {
        return;
    };
    let Some(dir) = registry.get("operations_dir").and_then(|v| v.as_str()) else {
        return;
    };

    let expanded = expand_path(dir);
    let resolved = if expanded.is_relative() {
        base.join(expanded)
    } else {
        expanded
    };

    registry.insert(
        "operations_dir".to_string(),
        toml::Value::String(resolved.to_string_lossy().into_owned()),
    );
}

/// Deep-merge `overlay` into `base`. Tables merge key by key, everything
/// else is replaced.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut FunnelConfig, sources: &mut ConfigSources) {
    apply_overrides(config, sources, |key| env::var(key).ok());
}

/// Apply overrides from an arbitrary variable lookup.
pub fn apply_overrides<F>(config: &mut FunnelConfig, sources: &mut ConfigSources, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |key: &str| lookup(key).filter(|v| !v.is_empty());
    // Only variables that actually changed the config are reported
    let mut applied: Vec<&str> = Vec::new();

    // OpenAI
    if let Some(v) = read("FUNNEL_OPENAI_API_KEY") {
        config.openai.api_key = Some(v);
        applied.push("FUNNEL_OPENAI_API_KEY");
    }
    if let Some(v) = read("FUNNEL_OPENAI_BASE_URL") {
        config.openai.base_url = v;
        applied.push("FUNNEL_OPENAI_BASE_URL");
    }
    if let Some(v) = read("FUNNEL_FUNCTION_CALLING_MODEL") {
        config.openai.function_calling_model = v;
        applied.push("FUNNEL_FUNCTION_CALLING_MODEL");
    }
    if let Some(v) = read("FUNNEL_EMBEDDINGS_MODEL") {
        config.openai.embeddings_model = v;
        applied.push("FUNNEL_EMBEDDINGS_MODEL");
    }

    // Registry
    if let Some(v) = read("FUNNEL_OPERATIONS_DIR") {
        config.registry.operations_dir = expand_path(&v);
        applied.push("FUNNEL_OPERATIONS_DIR");
    }

    // Dispatch
    if let Some(k) = read("FUNNEL_DEFAULT_K").and_then(|v| v.trim().parse().ok()) {
        config.dispatch.default_k = k;
        applied.push("FUNNEL_DEFAULT_K");
    }

    // Telemetry
    if let Some(v) = read("FUNNEL_LOG_LEVEL") {
        config.telemetry.log_level = v;
        applied.push("FUNNEL_LOG_LEVEL");
    }
    if let Some(v) = read("FUNNEL_OTLP_ENDPOINT") {
        config.telemetry.otlp_endpoint = Some(v);
        applied.push("FUNNEL_OTLP_ENDPOINT");
    }

    // Standard OpenAI variable, only when nothing else set a key
    if config.openai.api_key.is_none() {
        if let Some(v) = read("OPENAI_API_KEY") {
            config.openai.api_key = Some(v);
            applied.push("OPENAI_API_KEY");
        }
    }

    sources
        .env_overrides
        .extend(applied.into_iter().map(str::to_string));
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            home.join(stripped)
        } else {
            PathBuf::from(path)
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        // $VAR/rest/of/path
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            if let Ok(var_value) = env::var(var_name) {
                PathBuf::from(var_value).join(&stripped[slash_pos + 1..])
            } else {
                PathBuf::from(path)
            }
        } else {
            env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path))
        }
    } else {
        PathBuf::from(path)
    }
}
