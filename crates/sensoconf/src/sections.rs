//! Configuration sections: context defaults, telemetry, module filtering.

use serde::{Deserialize, Serialize};

/// Defaults applied to every context built from this configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Mirror state pushed to every mirror-capable node at creation.
    /// Default: unset (nodes keep their own mirror state)
    #[serde(default)]
    pub global_mirror: Option<bool>,

    /// Timeout for the wait-and-update family, in milliseconds.
    /// Default: 2000
    #[serde(default = "ContextConfig::default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,

    /// First integer tried when generating instance names (`Depth1`, ...).
    /// Default: 1
    #[serde(default = "ContextConfig::default_auto_name_start")]
    pub auto_name_start: u32,
}

impl ContextConfig {
    fn default_wait_timeout_ms() -> u64 {
        2000
    }

    fn default_auto_name_start() -> u32 {
        1
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            global_mirror: None,
            wait_timeout_ms: Self::default_wait_timeout_ms(),
            auto_name_start: Self::default_auto_name_start(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log filter (trace, debug, info, warn, error, or an env-filter directive).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
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
        }
    }
}

/// Which node factories a context should accept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModulesConfig {
    /// Factories to skip, as `"Vendor/Name"`.
    #[serde(default)]
    pub disabled: Vec<String>,
}

impl ModulesConfig {
    /// True if a factory with this vendor and name was disabled.
    pub fn is_disabled(&self, vendor: &str, name: &str) -> bool {
        self.disabled.iter().any(|entry| match entry.split_once('/') {
            Some((v, n)) => v == vendor && n == name,
            None => entry == vendor,
        })
    }
}
