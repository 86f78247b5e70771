//! Configuration validation.
//!
//! Every section that can be misconfigured implements [`Validate`]; the
//! root [`Config::validate`] collects all failures so a broken deployment
//! reports everything at once instead of one field per restart.

use thiserror::Error;

use crate::config::{
    BotConfig, Config, ImageConfig, ObservabilityConfig, StoreBackend, StoreConfig,
};

/// Largest upload the Bot API can hand over, in megabytes.
const MAX_UPLOAD_MB: u64 = 2000;

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.bot.validate() {
            errors.push(e);
        }
        if let Err(e) = self.store.validate() {
            errors.push(e);
        }
        if let Err(e) = self.images.validate() {
            errors.push(e);
        }
        if let Err(e) = self.observability.validate() {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }

    /// Load, apply environment overrides and validate.
    pub fn load_and_validate() -> anyhow::Result<Self> {
        let config = Self::load_with_env()?;
        config.validate().map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(config)
    }
}

impl Validate for BotConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.token.as_deref().map_or(true, str::is_empty) {
            return Err(ValidationError::MissingField {
                field: "bot.token (or TELEGRAM_BOT_TOKEN)".into(),
            });
        }
        if self.backlog_warning == 0 {
            return Err(ValidationError::InvalidValue {
                field: "bot.backlog_warning".into(),
                reason: "must be greater than 0".into(),
            });
        }
        Ok(())
    }
}

impl Validate for StoreConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.backend == StoreBackend::Redis && self.url.as_deref().map_or(true, str::is_empty) {
            return Err(ValidationError::MissingField {
                field: "store.url (or REDIS_URL)".into(),
            });
        }
        Ok(())
    }
}

impl Validate for ImageConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.min_dimension == 0 || self.min_dimension > self.max_dimension {
            return Err(ValidationError::InvalidValue {
                field: "images.min_dimension".into(),
                reason: format!(
                    "must be between 1 and max_dimension ({})",
                    self.max_dimension
                ),
            });
        }
        if !(1..=100).contains(&self.output_quality) {
            return Err(ValidationError::InvalidValue {
                field: "images.output_quality".into(),
                reason: "must be between 1 and 100".into(),
            });
        }
        if !(1..=MAX_UPLOAD_MB).contains(&self.max_file_size_mb) {
            return Err(ValidationError::InvalidValue {
                field: "images.max_file_size_mb".into(),
                reason: format!("must be between 1 and {MAX_UPLOAD_MB}"),
            });
        }
        if self.supported_formats.is_empty() {
            return Err(ValidationError::MissingField {
                field: "images.supported_formats".into(),
            });
        }
        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            });
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            });
        }

        Ok(())
    }
}
