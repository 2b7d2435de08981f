//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, ContextConfig, ModulesConfig, SensoConfig, TelemetryConfig};
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

/// Discover config files in standard locations.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli), existing files only.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/sensorium/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("sensorium/config.toml");
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

    let local = PathBuf::from("sensorium.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Load config from a TOML file.
pub fn load_from_file(path: &Path) -> Result<SensoConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_toml(&contents, path)
}

/// Parse config from a TOML string.
fn parse_toml(contents: &str, path: &Path) -> Result<SensoConfig, ConfigError> {
    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut config = SensoConfig::default();

    if let Some(context) = table.get("context").and_then(|v| v.as_table()) {
        if let Some(v) = context.get("global_mirror") {
            let mirror = v.as_bool().ok_or_else(|| ConfigError::Parse {
                path: path.to_path_buf(),
                message: "context.global_mirror must be a boolean".to_string(),
            })?;
            config.context.global_mirror = Some(mirror);
        }
        if let Some(v) = context.get("wait_timeout_ms").and_then(|v| v.as_integer()) {
            config.context.wait_timeout_ms = v.max(0) as u64;
        }
        if let Some(v) = context.get("auto_name_start").and_then(|v| v.as_integer()) {
            config.context.auto_name_start = v.max(0) as u32;
        }
    }

    if let Some(telemetry) = table.get("telemetry").and_then(|v| v.as_table()) {
        if let Some(v) = telemetry.get("log_level").and_then(|v| v.as_str()) {
            config.telemetry.log_level = v.to_string();
        }
    }

    if let Some(modules) = table.get("modules").and_then(|v| v.as_table()) {
        if let Some(disabled) = modules.get("disabled").and_then(|v| v.as_array()) {
            config.modules.disabled = disabled
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect();
        }
    }

    Ok(config)
}

/// Merge two configs, with `overlay` taking precedence where it differs from defaults.
pub fn merge_configs(base: SensoConfig, overlay: SensoConfig) -> SensoConfig {
    let context_defaults = ContextConfig::default();
    let telemetry_defaults = TelemetryConfig::default();

    SensoConfig {
        context: ContextConfig {
            global_mirror: overlay.context.global_mirror.or(base.context.global_mirror),
            wait_timeout_ms: if overlay.context.wait_timeout_ms != context_defaults.wait_timeout_ms {
                overlay.context.wait_timeout_ms
            } else {
                base.context.wait_timeout_ms
            },
            auto_name_start: if overlay.context.auto_name_start != context_defaults.auto_name_start {
                overlay.context.auto_name_start
            } else {
                base.context.auto_name_start
            },
        },
        telemetry: TelemetryConfig {
            log_level: if overlay.telemetry.log_level != telemetry_defaults.log_level {
                overlay.telemetry.log_level
            } else {
                base.telemetry.log_level
            },
        },
        // Disabled lists accumulate across files
        modules: ModulesConfig {
            disabled: {
                let mut disabled = base.modules.disabled;
                for entry in overlay.modules.disabled {
                    if !disabled.contains(&entry) {
                        disabled.push(entry);
                    }
                }
                disabled
            },
        },
    }
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut SensoConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("SENSORIUM_GLOBAL_MIRROR") {
        if let Some(mirror) = parse_bool(&v) {
            config.context.global_mirror = Some(mirror);
            sources.env_overrides.push("SENSORIUM_GLOBAL_MIRROR".to_string());
        }
    }
    if let Ok(v) = env::var("SENSORIUM_WAIT_TIMEOUT_MS") {
        if let Ok(ms) = v.parse() {
            config.context.wait_timeout_ms = ms;
            sources.env_overrides.push("SENSORIUM_WAIT_TIMEOUT_MS".to_string());
        }
    }

    if let Ok(v) = env::var("SENSORIUM_LOG_LEVEL") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("SENSORIUM_LOG_LEVEL".to_string());
    }
    // RUST_LOG wins over everything
    if let Ok(v) = env::var("RUST_LOG") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Expand a leading `~` to the home directory.
///
/// Used for paths handed over on the command line, which may not have been
/// through a shell.
pub fn expand_path(path: &str) -> PathBuf {
    let home = || directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf());
    if path == "~" {
        return home().unwrap_or_else(|| PathBuf::from(path));
    }
    match path.strip_prefix("~/") {
        Some(rest) => home()
            .map(|h| h.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}
