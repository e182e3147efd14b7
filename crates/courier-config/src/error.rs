//! Configuration errors

use courier_types::Error as CourierError;
use std::path::PathBuf;
use thiserror::Error;

/// Failure while loading, validating or saving configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An explicitly requested configuration file does not exist
    #[error("Configuration file '{path}' not found")]
    NotFound {
        /// Requested path
        path: PathBuf,
    },

    /// Writing a configuration file failed
    #[error("Cannot write configuration file '{path}': {source}")]
    Write {
        /// Target path
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// A source could not be read or merged into the settings tree
    #[error("Cannot read configuration: {message}")]
    Source {
        /// Message from the layering library
        message: String,
    },

    /// Encoding the configuration for saving failed
    #[error("Cannot encode configuration as {format}: {message}")]
    Encode {
        /// Target format
        format: &'static str,
        /// Encoder message
        message: String,
    },

    /// A value is present but unusable
    #[error("Invalid value for '{field}': {message}")]
    Invalid {
        /// Dotted path of the offending key
        field: &'static str,
        /// What is wrong with it
        message: String,
    },
}

impl ConfigError {
    /// Reject the value at `field`
    pub fn invalid<S: Into<String>>(field: &'static str, message: S) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }

    fn encode(format: &'static str, error: impl std::fmt::Display) -> Self {
        Self::Encode {
            format,
            message: error.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(error: serde_yaml::Error) -> Self {
        Self::encode("YAML", error)
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(error: toml::ser::Error) -> Self {
        Self::encode("TOML", error)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(error: serde_json::Error) -> Self {
        Self::encode("JSON", error)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(error: config::ConfigError) -> Self {
        Self::Source {
            message: error.to_string(),
        }
    }
}

impl From<ConfigError> for CourierError {
    fn from(error: ConfigError) -> Self {
        CourierError::config(error.to_string())
    }
}

/// Result of configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;
    use courier_types::ErrorKind;

    #[test]
    fn test_converts_into_courier_error() {
        let error: CourierError = ConfigError::invalid("logging.level", "unknown level 'loud'").into();
        assert_eq!(error.kind(), ErrorKind::Config);
        assert!(error.to_string().contains("logging.level"));
    }
}
