//! Configuration
//!
//! Configuration is resolved once at startup and handed to the components that need
//! it; nothing reads a global. Resolution order:
//! - Built-in defaults
//! - The first config file found (`usage-monitor.toml`, `.usage-monitor.toml`, then
//!   `<config dir>/usage-monitor/config.toml`)
//! - Environment variable overrides

use crate::gateway::circuit_breaker::CircuitBreakerConfig;
use crate::pricing::PricingTable;
use crate::recovery::{Backoff, RetryPolicy};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub paths: PathsConfig,
    pub processing: ProcessingConfig,
    pub dedup: DedupConfig,
    pub circuit_breaker: CircuitBreakerSettings,
    pub session: SessionConfig,
    pub metrics: MetricsConfig,
    pub retry: RetryConfig,
    pub pricing: PricingTable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "WARN".to_string(),
            format: "pretty".to_string(),
            output: "console".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory containing `projects/`
    pub claude_home: PathBuf,
    pub log_directory: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            claude_home: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".claude"),
            log_directory: PathBuf::from("logs"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Files read concurrently during a scan
    pub parallel_files: usize,
    pub max_file_size_mb: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            parallel_files: 8,
            max_file_size_mb: 256,
        }
    }
}

impl ProcessingConfig {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub enabled: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    /// Per-call timeout
    pub timeout_ms: u64,
    pub reset_timeout_secs: u64,
    pub failure_window_secs: Option<u64>,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_ms: 10_000,
            reset_timeout_secs: 30,
            failure_window_secs: Some(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub duration_hours: u32,
    pub refresh_interval_secs: u64,
    /// Overrides the token limit derived from past blocks
    pub token_limit: Option<u64>,
    pub daily_cost_threshold: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration_hours: 5,
            refresh_interval_secs: 30,
            token_limit: None,
            daily_cost_threshold: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub max_samples: usize,
    pub slow_threshold_ms: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_samples: 1000,
            slow_threshold_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            max_delay_ms: 5_000,
            multiplier: 2.0,
        }
    }
}

impl Config {
    /// Load configuration from file and environment on top of the defaults
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        let config_paths = [
            PathBuf::from("usage-monitor.toml"),
            PathBuf::from(".usage-monitor.toml"),
            dirs::config_dir()
                .map(|d| d.join("usage-monitor").join("config.toml"))
                .unwrap_or_default(),
        ];

        for path in &config_paths {
            if !path.as_os_str().is_empty() && path.exists() {
                info!(config_file = %path.display(), "Loading configuration from file");
                config = Self::load_from_file(path)?;
                break;
            }
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML file; missing keys keep their defaults
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| env::var(key).ok())
    }

    /// Apply overrides from any key lookup
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Some(val) = lookup("LOG_FORMAT") {
            self.logging.format = val;
        }
        if let Some(val) = lookup("LOG_OUTPUT") {
            self.logging.output = val;
        }

        if let Some(val) = lookup("CLAUDE_HOME") {
            self.paths.claude_home = PathBuf::from(val);
        }
        if let Some(val) = lookup("USAGE_MONITOR_LOG_DIR") {
            self.paths.log_directory = PathBuf::from(val);
        }

        if let Some(val) = lookup("USAGE_MONITOR_PARALLEL_FILES") {
            self.processing.parallel_files = val
                .parse()
                .context("Invalid USAGE_MONITOR_PARALLEL_FILES")?;
        }
        if let Some(val) = lookup("USAGE_MONITOR_DEDUP_ENABLED") {
            self.dedup.enabled = val.parse().context("Invalid USAGE_MONITOR_DEDUP_ENABLED")?;
        }

        if let Some(val) = lookup("USAGE_MONITOR_SESSION_HOURS") {
            self.session.duration_hours = val.parse().context("Invalid USAGE_MONITOR_SESSION_HOURS")?;
        }
        if let Some(val) = lookup("USAGE_MONITOR_REFRESH_SECS") {
            self.session.refresh_interval_secs =
                val.parse().context("Invalid USAGE_MONITOR_REFRESH_SECS")?;
        }
        if let Some(val) = lookup("USAGE_MONITOR_DAILY_COST_THRESHOLD") {
            self.session.daily_cost_threshold = val
                .parse()
                .context("Invalid USAGE_MONITOR_DAILY_COST_THRESHOLD")?;
        }
        if let Some(val) = lookup("USAGE_MONITOR_TOKEN_LIMIT") {
            self.session.token_limit = Some(val.parse().context("Invalid USAGE_MONITOR_TOKEN_LIMIT")?);
        }

        if let Some(val) = lookup("USAGE_MONITOR_METRICS_ENABLED") {
            self.metrics.enabled = val.parse().context("Invalid USAGE_MONITOR_METRICS_ENABLED")?;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.processing.parallel_files == 0 {
            return Err(anyhow::anyhow!("Parallel files must be greater than 0"));
        }
        if self.processing.parallel_files > 64 {
            warn!(
                parallel_files = self.processing.parallel_files,
                "Very high file concurrency, may exhaust file descriptors"
            );
        }
        if self.processing.max_file_size_mb == 0 {
            return Err(anyhow::anyhow!("Max file size must be greater than 0MB"));
        }

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(anyhow::anyhow!("Circuit breaker failure threshold must be greater than 0"));
        }
        if self.circuit_breaker.success_threshold == 0 {
            return Err(anyhow::anyhow!("Circuit breaker success threshold must be greater than 0"));
        }
        if self.circuit_breaker.timeout_ms == 0 {
            return Err(anyhow::anyhow!("Circuit breaker timeout must be greater than 0ms"));
        }

        if self.session.duration_hours == 0 || self.session.duration_hours > 24 {
            return Err(anyhow::anyhow!(
                "Session duration must be between 1 and 24 hours, got {}",
                self.session.duration_hours
            ));
        }
        if self.session.refresh_interval_secs == 0 {
            return Err(anyhow::anyhow!("Refresh interval must be greater than 0 seconds"));
        }
        if !self.session.daily_cost_threshold.is_finite() || self.session.daily_cost_threshold < 0.0 {
            return Err(anyhow::anyhow!(
                "Daily cost threshold must be a non-negative number, got {}",
                self.session.daily_cost_threshold
            ));
        }

        if self.metrics.max_samples == 0 {
            return Err(anyhow::anyhow!("Metrics max samples must be greater than 0"));
        }

        if self.retry.multiplier < 1.0 {
            return Err(anyhow::anyhow!(
                "Retry multiplier must be at least 1.0, got {}",
                self.retry.multiplier
            ));
        }

        for (model, pricing) in &self.pricing.models {
            let prices = [
                pricing.input_per_million,
                pricing.output_per_million,
                pricing.cache_write_per_million,
                pricing.cache_read_per_million,
            ];
            if prices.iter().any(|p| !p.is_finite() || *p < 0.0) {
                return Err(anyhow::anyhow!("Invalid pricing for model {model}"));
            }
        }

        Ok(())
    }

    /// Save current configuration to file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        info!(path = %path.display(), "Configuration saved to file");

        Ok(())
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        let cb = &self.circuit_breaker;
        CircuitBreakerConfig {
            failure_threshold: cb.failure_threshold,
            success_threshold: cb.success_threshold,
            timeout: Duration::from_millis(cb.timeout_ms),
            reset_timeout: Duration::from_secs(cb.reset_timeout_secs),
            failure_window: cb.failure_window_secs.map(Duration::from_secs),
        }
    }

    pub fn session_duration(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.session.duration_hours))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.session.refresh_interval_secs)
    }

    pub fn slow_threshold(&self) -> Duration {
        Duration::from_millis(self.metrics.slow_threshold_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            backoff: Backoff::Exponential {
                initial: Duration::from_millis(self.retry.initial_delay_ms),
                multiplier: self.retry.multiplier,
            },
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "WARN");
        assert_eq!(config.processing.parallel_files, 8);
        assert_eq!(config.session.duration_hours, 5);
        assert!(config.dedup.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_override() {
        let vars: HashMap<&str, &str> = [
            ("USAGE_MONITOR_PARALLEL_FILES", "20"),
            ("USAGE_MONITOR_TOKEN_LIMIT", "500000"),
            ("CLAUDE_HOME", "/tmp/claude"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides_from(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.processing.parallel_files, 20);
        assert_eq!(config.session.token_limit, Some(500_000));
        assert_eq!(config.paths.claude_home, PathBuf::from("/tmp/claude"));
    }

    #[test]
    fn test_invalid_env_value() {
        let mut config = Config::default();
        let result = config.apply_overrides_from(|key| {
            (key == "USAGE_MONITOR_SESSION_HOURS").then(|| "five".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.processing.parallel_files = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.session.duration_hours = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.session.daily_cost_threshold = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_circuit_breaker_config_conversion() {
        let config = Config::default();
        let cb = config.circuit_breaker_config();
        assert_eq!(cb.failure_threshold, 5);
        assert_eq!(cb.timeout, Duration::from_secs(10));
        assert_eq!(cb.failure_window, Some(Duration::from_secs(60)));
        assert_eq!(config.session_duration(), chrono::Duration::hours(5));
    }
}
