//! Configuration loading for the sensorium node registry.
//!
//! The runtime itself is configured in code; this crate supplies the defaults
//! a context is built with, so deployments can change them without a rebuild.
//!
//! # Usage
//!
//! ```rust,no_run
//! use sensoconf::SensoConfig;
//!
//! let config = SensoConfig::load().expect("Failed to load config");
//! println!("wait timeout: {}ms", config.context.wait_timeout_ms);
//! println!("log level: {}", config.telemetry.log_level);
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/sensorium/config.toml` (system)
//! 2. `~/.config/sensorium/config.toml` (user)
//! 3. `./sensorium.toml` (local override)
//! 4. Environment variables (`SENSORIUM_*`, `RUST_LOG`)
//!
//! # Example Config
//!
//! ```toml
//! [context]
//! global_mirror = true
//! wait_timeout_ms = 5000
//! auto_name_start = 1
//!
//! [telemetry]
//! log_level = "debug"
//!
//! [modules]
//! disabled = ["Acme/SlowDepth"]
//! ```

pub mod loader;
pub mod sections;

pub use loader::{discover_config_files_with_override, expand_path, ConfigSources};
pub use sections::{ContextConfig, ModulesConfig, TelemetryConfig};

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
}

/// Complete sensorium configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensoConfig {
    #[serde(default)]
    pub context: ContextConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub modules: ModulesConfig,
}

impl SensoConfig {
    /// Load configuration from all sources.
    ///
    /// Load order (later wins):
    /// 1. Compiled defaults
    /// 2. `/etc/sensorium/config.toml`
    /// 3. `~/.config/sensorium/config.toml`
    /// 4. `./sensorium.toml`
    /// 5. Environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with `config_path` replacing the local override.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report which files and variables contributed.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = SensoConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            let file_config = loader::load_from_file(&path)?;
            config = loader::merge_configs(config, file_config);
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize config to a TOML string.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# sensorium configuration\n\n");

        output.push_str("[context]\n");
        if let Some(mirror) = self.context.global_mirror {
            output.push_str(&format!("global_mirror = {}\n", mirror));
        }
        output.push_str(&format!(
            "wait_timeout_ms = {}\n",
            self.context.wait_timeout_ms
        ));
        output.push_str(&format!(
            "auto_name_start = {}\n",
            self.context.auto_name_start
        ));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!(
            "log_level = \"{}\"\n",
            self.telemetry.log_level
        ));

        output.push_str("\n[modules]\n");
        output.push_str("disabled = [\n");
        for entry in &self.modules.disabled {
            output.push_str(&format!("    \"{}\",\n", entry));
        }
        output.push_str("]\n");

        output
    }
}
