//! Configuration system for Settle
//!
//! Provides:
//! - Config file discovery (CLI flag, env var, standard paths)
//! - TOML parsing with serde
//! - Environment variable overrides
//! - Validation

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Complete SDK configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SettleConfig {
    /// SDK settings
    pub sdk: SdkSettings,

    /// Correlation engine settings
    pub engine: EngineSettings,

    /// URLs never to track
    pub exclusions: ExclusionSettings,

    /// Export settings
    pub export: ExportSettings,
}

/// SDK settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkSettings {
    /// Log level: trace, debug, info, warn, error
    pub log_level: String,
}

impl Default for SdkSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Correlation engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Idle/settle window for click and network-call events (ms)
    pub click_idle_timeout_ms: u64,

    /// Idle/settle window for navigation events (ms)
    pub navigation_idle_timeout_ms: u64,

    /// Grace period armed once when an event only sees uninteresting mutations (ms)
    pub uninteresting_mutation_timeout_ms: u64,

    /// Consecutive uninteresting mutation batches before the grace period is armed
    pub uninteresting_mutation_batches: u32,

    /// Backoff between hand-off attempts while the emit gate is closed (ms)
    pub emit_retry_ms: u64,

    /// How far a timeline entry may start before the recorded request start (ms)
    pub timeline_start_tolerance_ms: f64,

    /// Finalize every network call on its own instead of merging
    pub always_finalize_network_calls: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            click_idle_timeout_ms: 50,
            navigation_idle_timeout_ms: 1000,
            uninteresting_mutation_timeout_ms: 1000,
            uninteresting_mutation_batches: 1,
            emit_retry_ms: 500,
            timeline_start_tolerance_ms: 5.0,
            always_finalize_network_calls: false,
        }
    }
}

/// Exclusion policy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExclusionSettings {
    /// URL substrings never to track
    pub urls: Vec<String>,

    /// Regex patterns never to track
    pub patterns: Vec<String>,
}

/// Beacon output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// Raw timing records
    #[default]
    Beacon,
    /// APM network traces
    Apm,
}

/// Export settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// Output file path for JSONL export
    pub path: Option<String>,

    /// Append to existing file
    pub append: bool,

    /// Flush after each record
    pub flush_each: bool,

    /// Output format
    pub format: ExportFormat,

    /// Collector endpoint; always excluded from tracking
    pub collector_url: Option<String>,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            path: None,
            append: true,
            flush_each: true,
            format: ExportFormat::Beacon,
            collector_url: None,
        }
    }
}

impl SettleConfig {
    /// Exclusion policy including the collector endpoint
    pub fn effective_exclusions(&self) -> ExclusionSettings {
        let mut exclusions = self.exclusions.clone();
        if let Some(collector) = &self.export.collector_url {
            let collector = collector.split("//").last().unwrap_or(collector).to_string();
            if !collector.is_empty() && !exclusions.urls.contains(&collector) {
                exclusions.urls.push(collector);
            }
        }
        exclusions
    }
}

/// Configuration loader
pub struct ConfigLoader {
    /// Path to config file (if specified via CLI)
    cli_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader
    pub fn new() -> Self {
        Self { cli_path: None }
    }

    /// Set the config path from CLI argument
    pub fn with_cli_path(mut self, path: Option<PathBuf>) -> Self {
        self.cli_path = path;
        self
    }

    /// Load configuration with the following precedence:
    /// 1. CLI --config flag
    /// 2. SETTLE_CONFIG environment variable
    /// 3. ~/.config/settle/config.toml
    /// 4. /etc/settle/config.toml
    /// 5. Default values
    pub fn load(&self) -> ConfigResult<SettleConfig> {
        let config_path = self.find_config_file();

        let mut config = if let Some(path) = config_path {
            info!("Loading configuration from: {}", path.display());
            self.load_from_file(&path)?
        } else {
            debug!("No config file found, using defaults");
            SettleConfig::default()
        };

        self.apply_env_overrides(&mut config);
        self.validate(&config)?;

        Ok(config)
    }

    /// Find the config file to use
    fn find_config_file(&self) -> Option<PathBuf> {
        // 1. CLI --config flag
        if let Some(path) = &self.cli_path {
            if path.exists() {
                return Some(path.clone());
            }
            warn!("CLI config path does not exist: {}", path.display());
        }

        // 2. SETTLE_CONFIG environment variable
        if let Ok(env_path) = std::env::var("SETTLE_CONFIG") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
            warn!("SETTLE_CONFIG path does not exist: {}", env_path);
        }

        // 3. ~/.config/settle/config.toml
        if let Some(path) = Self::default_config_path() {
            if path.exists() {
                return Some(path);
            }
        }

        // 4. /etc/settle/config.toml (Unix only)
        #[cfg(unix)]
        {
            let path = PathBuf::from("/etc/settle/config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(&self, path: &Path) -> ConfigResult<SettleConfig> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: SettleConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&self, config: &mut SettleConfig) {
        if let Ok(val) = std::env::var("SETTLE_LOG_LEVEL") {
            config.sdk.log_level = val;
        }

        if let Ok(val) = std::env::var("SETTLE_CLICK_IDLE_TIMEOUT_MS") {
            if let Ok(ms) = val.parse() {
                config.engine.click_idle_timeout_ms = ms;
            }
        }
        if let Ok(val) = std::env::var("SETTLE_NAVIGATION_IDLE_TIMEOUT_MS") {
            if let Ok(ms) = val.parse() {
                config.engine.navigation_idle_timeout_ms = ms;
            }
        }
        if let Ok(val) = std::env::var("SETTLE_ALWAYS_FINALIZE_NETWORK_CALLS") {
            config.engine.always_finalize_network_calls = val
                .parse()
                .unwrap_or(config.engine.always_finalize_network_calls);
        }

        if let Ok(val) = std::env::var("SETTLE_EXCLUDE_URLS") {
            config.exclusions.urls.extend(
                val.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from),
            );
        }

        if let Ok(val) = std::env::var("SETTLE_EXPORT_PATH") {
            config.export.path = Some(val);
        }
        if let Ok(val) = std::env::var("SETTLE_COLLECTOR_URL") {
            config.export.collector_url = Some(val);
        }
    }

    /// Validate configuration
    pub fn validate(&self, config: &SettleConfig) -> ConfigResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.sdk.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                config.sdk.log_level, valid_levels
            )));
        }

        let engine = &config.engine;
        if engine.click_idle_timeout_ms == 0 || engine.navigation_idle_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "Idle timeouts must be greater than 0".to_string(),
            ));
        }
        if engine.uninteresting_mutation_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "Uninteresting mutation timeout must be greater than 0".to_string(),
            ));
        }
        if engine.uninteresting_mutation_batches == 0 {
            return Err(ConfigError::ValidationError(
                "Uninteresting mutation batches must be at least 1".to_string(),
            ));
        }
        if engine.emit_retry_ms == 0 {
            return Err(ConfigError::ValidationError(
                "Emit retry backoff must be greater than 0".to_string(),
            ));
        }
        if !engine.timeline_start_tolerance_ms.is_finite() || engine.timeline_start_tolerance_ms < 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "Invalid timeline start tolerance: {}",
                engine.timeline_start_tolerance_ms
            )));
        }

        for pattern in &config.exclusions.patterns {
            if pattern.is_empty() {
                return Err(ConfigError::ValidationError(
                    "Exclusion patterns cannot be empty".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Save configuration to a file
    pub fn save(&self, config: &SettleConfig, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(config).map_err(|e| {
            ConfigError::ValidationError(format!("Failed to serialize config: {}", e))
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        info!("Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Get the default config file path for the current platform
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("settle").join("config.toml"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper module for platform-specific directories
mod dirs {
    use std::path::PathBuf;

    /// Get the user's config directory
    pub fn config_dir() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        }

        #[cfg(not(target_os = "windows"))]
        {
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".config"))
                })
        }
    }
}
