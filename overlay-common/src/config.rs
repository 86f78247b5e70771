//! Configuration management for the overlay bot.
//!
//! The service reads a single configuration file at `~/.overlay-bot/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `TELEGRAM_BOT_TOKEN` → bot.token
//! - `REDIS_URL` → store.url (also selects the redis backend)
//! - `OVERLAY_STORE_BACKEND` → store.backend
//! - `OVERLAY_TEMP_DIR` → images.temp_dir
//! - `OVERLAY_LOG_LEVEL` → observability.log_level
//! - `OVERLAY_LOG_FORMAT` → observability.log_format
//! - `OVERLAY_BIND_ADDRESS` → health.host
//! - `PORT` → health.port

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".overlay-bot"),
        |dirs| dirs.home_dir().join(".overlay-bot"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Bot
// ============================================================================

/// Telegram bot settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Bot API token issued by @BotFather. Required.
    #[serde(default)]
    pub token: Option<String>,

    /// Usernames or numeric ids allowed to talk to the bot. `*` allows everyone.
    #[serde(default = "default_allowed_users")]
    pub allowed_users: Vec<String>,

    /// Long-poll timeout passed to `getUpdates`.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,

    /// How long a per-user worker waits for the next event before exiting.
    #[serde(default = "default_worker_idle")]
    pub worker_idle_secs: u64,

    /// Per-user backlog above which each further queued message logs a warning.
    #[serde(default = "default_backlog_warning")]
    pub backlog_warning: usize,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            token: None,
            allowed_users: default_allowed_users(),
            poll_timeout_secs: default_poll_timeout(),
            worker_idle_secs: default_worker_idle(),
            backlog_warning: default_backlog_warning(),
        }
    }
}

fn default_allowed_users() -> Vec<String> {
    vec!["*".into()]
}
fn default_poll_timeout() -> u64 {
    30
}
fn default_worker_idle() -> u64 {
    300
}
fn default_backlog_warning() -> usize {
    32
}

// ============================================================================
// Session Store
// ============================================================================

/// Session store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Redis (durable, shared between processes).
    #[default]
    Redis,
    /// Process-local map. Sessions are lost on restart.
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown store backend: {other}")),
        }
    }
}

/// Session store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis URL (redis://host:port/db). Required for the redis backend.
    #[serde(default)]
    pub url: Option<String>,

    /// Prefix prepended to every key. Empty by default.
    #[serde(default)]
    pub key_prefix: String,

    /// Connection timeout in seconds.
    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: None,
            key_prefix: String::new(),
            timeout_secs: default_store_timeout(),
        }
    }
}

fn default_store_timeout() -> u64 {
    5
}

// ============================================================================
// Images
// ============================================================================

/// Image processing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Smallest accepted output width/height.
    #[serde(default = "default_min_dimension")]
    pub min_dimension: u32,

    /// Largest accepted output width/height.
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,

    /// JPEG quality of composited output (1-100).
    #[serde(default = "default_output_quality")]
    pub output_quality: u8,

    /// Largest upload accepted, in megabytes.
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,

    /// Accepted input formats.
    #[serde(default = "default_supported_formats")]
    pub supported_formats: Vec<String>,

    /// Directory for temporary product images. `~` is expanded.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: String,

    /// Colour distance under which a pixel counts as background.
    #[serde(default = "default_background_tolerance")]
    pub background_tolerance: u8,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            min_dimension: default_min_dimension(),
            max_dimension: default_max_dimension(),
            output_quality: default_output_quality(),
            max_file_size_mb: default_max_file_size_mb(),
            supported_formats: default_supported_formats(),
            temp_dir: default_temp_dir(),
            background_tolerance: default_background_tolerance(),
        }
    }
}

impl ImageConfig {
    /// Maximum upload size in bytes, saturating at `u64::MAX`.
    pub const fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }

    /// Check if a format name (e.g. "jpeg", "PNG") is accepted.
    pub fn is_supported_format(&self, format_name: &str) -> bool {
        self.supported_formats
            .iter()
            .any(|f| f.eq_ignore_ascii_case(format_name))
    }

    /// Temp directory with `~` expanded.
    pub fn temp_dir_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.temp_dir).into_owned())
    }
}

fn default_min_dimension() -> u32 {
    50
}
fn default_max_dimension() -> u32 {
    2048
}
fn default_output_quality() -> u8 {
    95
}
fn default_max_file_size_mb() -> u64 {
    20
}
fn default_supported_formats() -> Vec<String> {
    vec!["JPEG".into(), "JPG".into(), "PNG".into(), "WEBP".into()]
}
fn default_temp_dir() -> String {
    "temp".into()
}
fn default_background_tolerance() -> u8 {
    40
}

// ============================================================================
// Health server
// ============================================================================

/// Liveness probe server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_host")]
    pub host: String,
    #[serde(default = "default_health_port")]
    pub port: u16,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            host: default_health_host(),
            port: default_health_port(),
        }
    }
}

fn default_health_host() -> String {
    "0.0.0.0".into()
}
fn default_health_port() -> u16 {
    8080
}

// ============================================================================
// Observability
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets to pin at `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Root
// ============================================================================

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub bot: BotConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub images: ImageConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path, falling back to defaults.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup (used by tests).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("TELEGRAM_BOT_TOKEN").filter(|t| !t.is_empty()) {
            self.bot.token = Some(token);
        }

        if let Some(url) = lookup("REDIS_URL").filter(|u| !u.is_empty()) {
            self.store.url = Some(url);
            self.store.backend = StoreBackend::Redis;
        }
        if let Some(backend) = lookup("OVERLAY_STORE_BACKEND") {
            match backend.parse() {
                Ok(b) => self.store.backend = b,
                Err(e) => tracing::warn!("Ignoring OVERLAY_STORE_BACKEND: {e}"),
            }
        }

        if let Some(dir) = lookup("OVERLAY_TEMP_DIR") {
            self.images.temp_dir = dir;
        }

        if let Some(level) = lookup("OVERLAY_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(format) = lookup("OVERLAY_LOG_FORMAT") {
            self.observability.log_format = format;
        }

        if let Some(bind) = lookup("OVERLAY_BIND_ADDRESS") {
            self.health.host = bind;
        }
        if let Some(port) = lookup("PORT") {
            if let Ok(p) = port.parse() {
                self.health.port = p;
            }
        }
    }

    /// Bot token, if configured and non-empty.
    pub fn bot_token(&self) -> Option<&str> {
        self.bot.token.as_deref().filter(|t| !t.is_empty())
    }

    /// Redis URL, if configured and non-empty.
    pub fn store_url(&self) -> Option<&str> {
        self.store.url.as_deref().filter(|u| !u.is_empty())
    }
}
