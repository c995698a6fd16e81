//! Configuration management for evalbench.
//!
//! Configuration is loaded from multiple sources in priority order:
//! 1. Environment variables (EVALBENCH_REGISTER_MAP, etc.)
//! 2. Project-local config file (`./evalbench.toml`)
//! 3. User config file (`~/.config/evalbench/config.toml`)
//! 4. Built-in defaults
//!
//! # Config File Format
//!
//! ```toml
//! # evalbench.toml
//!
//! # Register map loaded when a run does not name one
//! register_map = "maps/pmic_rev3.toml"
//!
//! # Sample identifier stamped on measurements
//! sample_id = "lot7-s42"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

/// Global cached configuration.
static CONFIG: OnceLock<Config> = OnceLock::new();

/// evalbench configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Register map file used when the command line does not name one.
    pub register_map: Option<String>,

    /// Sample identifier stamped on every measurement.
    pub sample_id: Option<String>,

    /// Stop at the first failed action instead of continuing.
    pub halt_on_error: Option<bool>,

    /// Chamber stabilization poll interval, in milliseconds.
    pub chamber_poll_ms: Option<u64>,
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Project-local `evalbench.toml`
    /// 3. User config `~/.config/evalbench/config.toml`
    /// 4. Defaults
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load user config first (lowest priority of file configs)
        if let Some(user_config) = Self::load_user_config() {
            config.merge(user_config);
        }

        // Load project-local config (higher priority)
        if let Some(local_config) = Self::load_local_config() {
            config.merge(local_config);
        }

        // Environment variables override everything
        config.apply_env_overrides();

        config
    }

    /// Get the cached global configuration.
    ///
    /// Loads configuration on first call and caches it.
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(|| {
            let config = Self::load();
            log::debug!("Loaded configuration: {:?}", config);
            config
        })
    }

    /// Get the sample identifier, with fallback to default.
    pub fn sample_id(&self) -> String {
        self.sample_id
            .clone()
            .unwrap_or_else(|| "sample-0".to_string())
    }

    /// Whether a run stops at the first failed action. Defaults on.
    pub fn halt_on_error(&self) -> bool {
        self.halt_on_error.unwrap_or(true)
    }

    /// Chamber stabilization poll interval, with fallback to 2 s.
    pub fn chamber_poll(&self) -> Duration {
        Duration::from_millis(self.chamber_poll_ms.unwrap_or(2000))
    }

    /// Load user configuration from ~/.config/evalbench/config.toml
    fn load_user_config() -> Option<Self> {
        let config_dir = dirs::config_dir()?;
        let config_path = config_dir.join("evalbench").join("config.toml");
        Self::load_from_file(&config_path)
    }

    /// Load project-local configuration from ./evalbench.toml
    fn load_local_config() -> Option<Self> {
        // Try current directory
        let local_path = Path::new("evalbench.toml");
        if let Some(config) = Self::load_from_file(local_path) {
            return Some(config);
        }

        // Try to find project root by looking for Cargo.toml
        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
            let project_path = Path::new(&manifest_dir).join("evalbench.toml");
            if let Some(config) = Self::load_from_file(&project_path) {
                return Some(config);
            }
        }

        None
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    Some(config)
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Merge another config into this one.
    /// Only overrides fields that are Some in the other config.
    fn merge(&mut self, other: Self) {
        if other.register_map.is_some() {
            self.register_map = other.register_map;
        }
        if other.sample_id.is_some() {
            self.sample_id = other.sample_id;
        }
        if other.halt_on_error.is_some() {
            self.halt_on_error = other.halt_on_error;
        }
        if other.chamber_poll_ms.is_some() {
            self.chamber_poll_ms = other.chamber_poll_ms;
        }
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("EVALBENCH_REGISTER_MAP") {
            log::info!("Using EVALBENCH_REGISTER_MAP from environment: {}", path);
            self.register_map = Some(path);
        }
        if let Ok(id) = std::env::var("EVALBENCH_SAMPLE_ID") {
            log::info!("Using EVALBENCH_SAMPLE_ID from environment: {}", id);
            self.sample_id = Some(id);
        }
        if let Ok(raw) = std::env::var("EVALBENCH_HALT_ON_ERROR") {
            match parse_bool(&raw) {
                Some(halt) => self.halt_on_error = Some(halt),
                None => log::warn!("Ignoring EVALBENCH_HALT_ON_ERROR: '{}' is not a bool", raw),
            }
        }
        if let Ok(raw) = std::env::var("EVALBENCH_CHAMBER_POLL_MS") {
            match raw.parse::<u64>() {
                Ok(ms) => self.chamber_poll_ms = Some(ms),
                Err(_) => log::warn!(
                    "Ignoring EVALBENCH_CHAMBER_POLL_MS: '{}' is not a millisecond count",
                    raw
                ),
            }
        }
    }

    /// Get the path to the user config file (for display/creation).
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("evalbench").join("config.toml"))
    }

    /// Generate a sample config file content.
    pub fn sample_config() -> String {
        r#"# evalbench configuration
# Place this file at ~/.config/evalbench/config.toml or ./evalbench.toml

# Register map loaded when a run does not name one
register_map = "maps/pmic_rev3.toml"

# Sample identifier stamped on measurements (optional)
# sample_id = "lot7-s42"

# Stop at the first failed action (optional, defaults to true)
# halt_on_error = true

# Chamber stabilization poll interval in milliseconds (optional)
# chamber_poll_ms = 2000
"#
        .to_string()
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
