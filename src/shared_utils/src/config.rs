use std::path::PathBuf;

use thiserror::Error;

/// Errors related to application configuration.
///
/// Every variant is fatal and is reported before any storage access happens.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Cannot read configuration file {}: {source}", path.display())]
    Unreadable {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },

    /// The configuration file is not valid for its format.
    #[error("Malformed configuration: {0}")]
    Malformed(String),

    /// A required key is absent (or blank) in the given section.
    #[error("Missing required key `{key}` in section [{section}]")]
    MissingKey {
        /// Section name, e.g. `aws`.
        section: String,
        /// Key name, e.g. `access_key_id`.
        key: String,
    },

    /// A key is present but its value cannot be used.
    #[error("Invalid value for `{key}`: {message}")]
    InvalidValue {
        /// Key name.
        key: String,
        /// Why the value was rejected.
        message: String,
    },
}

impl ConfigError {
    /// Shorthand for [`ConfigError::MissingKey`].
    pub fn missing_key(section: &str, key: &str) -> Self {
        Self::MissingKey {
            section: section.to_string(),
            key: key.to_string(),
        }
    }

    /// Shorthand for [`ConfigError::InvalidValue`].
    pub fn invalid_value(key: &str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

/// Returns the trimmed value, or a [`ConfigError::MissingKey`] when it is absent or blank.
pub fn require_value(
    value: Option<&str>,
    section: &str,
    key: &str,
) -> Result<String, ConfigError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ConfigError::missing_key(section, key)),
    }
}
