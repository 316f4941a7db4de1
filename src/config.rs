//! Production configuration system
//!
//! Provides centralized configuration management with:
//! - Config file loading (optional, first match wins)
//! - Environment variable overrides
//! - Runtime defaults
//! - Validation before anything runs
//!
//! Only the CLI reads configuration. The library takes resolved values
//! ([`crate::analyzer::AnalysisOptions`], [`BlockConfig`]).

use crate::aggregator::SortOrder;
use crate::blocks::{BlockConfig, BlockScope};
use crate::cost::{CostMode, UnknownModelPolicy};
use crate::pricing::LITELLM_PRICING_URL;
use anyhow::{anyhow, Context, Result};
use chrono::Duration;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const CONFIG_FILE_NAME: &str = "usage-ledger.toml";

/// Longest accepted block window (one week).
pub const MAX_SESSION_HOURS: f64 = 168.0;
/// Longest accepted idle gap (one week).
pub const MAX_GAP_MINUTES: i64 = 7 * 24 * 60;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub processing: ProcessingConfig,
    pub blocks: BlocksConfig,
    pub cost: CostConfig,
    pub report: ReportConfig,
    pub pricing: PricingConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty`, `compact` or `json`
    pub format: String,
    /// `console`, `file` or `both`
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub deduplicate: bool,
    /// Reader threads; 0 lets rayon decide.
    pub parallel_threads: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlocksConfig {
    pub session_length_hours: f64,
    pub gap_minutes: i64,
    pub per_session: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    pub mode: CostMode,
    pub unknown_model: UnknownModelPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub timezone: String,
    pub order: SortOrder,
    pub json_pretty: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub offline: bool,
    pub url: String,
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Comma separated data roots; replaces the default roots when set.
    pub claude_config_dir: Option<String>,
    pub log_directory: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: "pretty".to_string(),
            output: "console".to_string(),
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            deduplicate: true,
            parallel_threads: 0,
        }
    }
}

impl Default for BlocksConfig {
    fn default() -> Self {
        Self {
            session_length_hours: 5.0,
            gap_minutes: 300,
            per_session: false,
        }
    }
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            mode: CostMode::Auto,
            unknown_model: UnknownModelPolicy::Zero,
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            order: SortOrder::Asc,
            json_pretty: true,
        }
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            offline: false,
            url: LITELLM_PRICING_URL.to_string(),
            file: None,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            claude_config_dir: None,
            log_directory: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("usage-ledger")
                .join("logs"),
        }
    }
}

impl Config {
    /// Load configuration from defaults, the first config file found, and
    /// the environment, in that order.
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        let config_paths = [
            Some(PathBuf::from(CONFIG_FILE_NAME)),
            Some(PathBuf::from(format!(".{CONFIG_FILE_NAME}"))),
            dirs::config_dir().map(|dir| dir.join("usage-ledger").join("config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                info!(config_file = %path.display(), "Loading configuration from file");
                config = Self::load_from_file(path)?;
                break;
            }
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_with(|key| env::var(key).ok())
    }

    /// Apply overrides from any key lookup.
    pub fn apply_overrides_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Logging overrides
        if let Some(val) = lookup("LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Some(val) = lookup("LOG_FORMAT") {
            self.logging.format = val;
        }
        if let Some(val) = lookup("LOG_OUTPUT") {
            self.logging.output = val;
        }

        // Data roots
        if let Some(val) = lookup("CLAUDE_CONFIG_DIR") {
            if !val.trim().is_empty() {
                self.paths.claude_config_dir = Some(val);
            }
        }
        if let Some(val) = lookup("USAGE_LEDGER_LOG_DIR") {
            self.paths.log_directory = PathBuf::from(val);
        }

        // Run overrides
        if let Some(val) = lookup("USAGE_LEDGER_COST_MODE") {
            self.cost.mode = val
                .parse()
                .map_err(|e: String| anyhow!(e))
                .context("Invalid USAGE_LEDGER_COST_MODE")?;
        }
        if let Some(val) = lookup("USAGE_LEDGER_TIMEZONE") {
            self.report.timezone = val;
        }
        if let Some(val) = lookup("USAGE_LEDGER_BLOCK_HOURS") {
            self.blocks.session_length_hours = val
                .trim()
                .parse()
                .context("Invalid USAGE_LEDGER_BLOCK_HOURS")?;
        }
        if let Some(val) = lookup("USAGE_LEDGER_GAP_MINUTES") {
            self.blocks.gap_minutes = val
                .trim()
                .parse()
                .context("Invalid USAGE_LEDGER_GAP_MINUTES")?;
        }
        if let Some(val) = lookup("USAGE_LEDGER_OFFLINE") {
            self.pricing.offline = parse_flag(&val).context("Invalid USAGE_LEDGER_OFFLINE")?;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let hours = self.blocks.session_length_hours;
        if !hours.is_finite() || hours * 60.0 < 1.0 || hours > MAX_SESSION_HOURS {
            return Err(anyhow!(
                "Session length must be between 1 minute and {} hours, got {}",
                MAX_SESSION_HOURS,
                hours
            ));
        }

        if !(1..=MAX_GAP_MINUTES).contains(&self.blocks.gap_minutes) {
            return Err(anyhow!(
                "Gap threshold must be between 1 and {} minutes, got {}",
                MAX_GAP_MINUTES,
                self.blocks.gap_minutes
            ));
        }

        self.timezone()?;

        if !matches!(self.logging.output.to_lowercase().as_str(), "console" | "file" | "both") {
            return Err(anyhow!(
                "Invalid log output: {}. Must be one of: console, file, both",
                self.logging.output
            ));
        }

        if !matches!(self.logging.format.to_lowercase().as_str(), "pretty" | "compact" | "json") {
            return Err(anyhow!(
                "Invalid log format: {}. Must be one of: pretty, compact, json",
                self.logging.format
            ));
        }

        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz> {
        self.report
            .timezone
            .parse::<Tz>()
            .map_err(|_| anyhow!("Unknown timezone: {}", self.report.timezone))
    }

    pub fn block_config(&self) -> Result<BlockConfig> {
        let seconds = (self.blocks.session_length_hours * 3600.0).round() as i64;
        let duration = Duration::try_seconds(seconds)
            .filter(|duration| *duration > Duration::zero())
            .ok_or_else(|| anyhow!("Session length out of range: {} hours", self.blocks.session_length_hours))?;
        let gap = Duration::try_minutes(self.blocks.gap_minutes)
            .filter(|gap| *gap > Duration::zero())
            .ok_or_else(|| anyhow!("Gap threshold out of range: {} minutes", self.blocks.gap_minutes))?;
        Ok(BlockConfig::new(duration, gap))
    }

    pub fn block_scope(&self) -> BlockScope {
        if self.blocks.per_session {
            BlockScope::Session
        } else {
            BlockScope::Global
        }
    }

    /// Save current configuration to file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        info!(path = %path.display(), "Configuration saved to file");

        Ok(())
    }
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(anyhow!("expected a boolean, got {other}")),
    }
}
