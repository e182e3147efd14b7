//! Layered configuration: defaults, then files, then environment variables

use crate::{Config, ConfigError, ConfigResult};
use config::{Environment, File, FileFormat};
use std::path::{Path, PathBuf};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// One input merged into the final configuration, in insertion order
#[derive(Debug, Clone)]
enum Layer {
    Defaults,
    File(PathBuf),
    Env(String),
}

/// Collects configuration layers and merges them with the `config` crate
///
/// Later layers override earlier ones key by key. Files that do not exist are
/// skipped so optional locations can be listed unconditionally.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    layers: Vec<Layer>,
    separator: String,
}

impl ConfigBuilder {
    /// Start with no layers; built-in defaults always sit underneath
    pub fn new() -> Self {
        Self {
            layers: Vec::new(),
            separator: "__".to_string(),
        }
    }

    /// Re-apply the built-in defaults at this point of the stack
    pub fn add_defaults(mut self) -> Self {
        self.layers.push(Layer::Defaults);
        self
    }

    /// Merge a YAML, TOML or JSON file, chosen by extension (YAML otherwise)
    pub fn add_source_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.layers.push(Layer::File(path.as_ref().to_path_buf()));
        self
    }

    /// Merge `PREFIX__SECTION__KEY` environment variables
    pub fn add_env_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.layers.push(Layer::Env(prefix.into()));
        self
    }

    /// Separator between prefix, section and key in variable names
    pub fn env_separator<S: Into<String>>(mut self, separator: S) -> Self {
        self.separator = separator.into();
        self
    }

    /// Merge every layer, deserialize and validate
    pub fn build(self) -> ConfigResult<Config> {
        let defaults = config::Config::try_from(&Config::default())?;
        let mut merged = config::Config::builder().add_source(defaults.clone());

        for layer in self.layers {
            merged = match layer {
                Layer::Defaults => merged.add_source(defaults.clone()),
                Layer::File(path) if path.is_file() => {
                    let format = format_of(&path);
                    merged.add_source(File::from(path).format(format))
                }
                Layer::File(_) => merged,
                Layer::Env(prefix) => merged.add_source(
                    Environment::with_prefix(&prefix)
                        .prefix_separator(&self.separator)
                        .separator(&self.separator)
                        .try_parsing(true),
                ),
            };
        }

        let config: Config = merged.build()?.try_deserialize()?;
        validate(&config)?;
        Ok(config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn format_of(path: &Path) -> FileFormat {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => FileFormat::Toml,
        Some("json") => FileFormat::Json,
        _ => FileFormat::Yaml,
    }
}

/// Reject values that deserialize but can never work
pub fn validate(config: &Config) -> ConfigResult<()> {
    if !LOG_LEVELS.contains(&config.logging.level.as_str()) {
        return Err(ConfigError::invalid(
            "logging.level",
            format!(
                "'{}' is not one of {}",
                config.logging.level,
                LOG_LEVELS.join(", ")
            ),
        ));
    }

    let timeouts = &config.transfer.timeouts;
    if timeouts.connect_timeout.is_zero() {
        return Err(ConfigError::invalid(
            "transfer.timeouts.connect_timeout",
            "must be greater than 0",
        ));
    }
    if timeouts.read_timeout.is_zero() {
        return Err(ConfigError::invalid(
            "transfer.timeouts.read_timeout",
            "must be greater than 0",
        ));
    }

    if config.transfer.user_agent.trim().is_empty() {
        return Err(ConfigError::invalid("transfer.user_agent", "must not be empty"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_types::RetryLimit;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::Builder;

    #[test]
    fn test_builder_defaults() {
        let config = ConfigBuilder::new().add_defaults().build().unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_builder_yaml_file() {
        let mut temp_file = Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            temp_file,
            r#"
engine:
  worker_count: 8
  queue_capacity: 16
transfer:
  retry_limit: -1
  notify_interval: 500
"#
        )
        .unwrap();

        let config = ConfigBuilder::new()
            .add_defaults()
            .add_source_file(temp_file.path())
            .build()
            .unwrap();

        assert_eq!(config.engine.worker_count.get(), 8);
        assert_eq!(config.engine.queue_capacity, 16);
        assert_eq!(config.transfer.retry_limit, RetryLimit::Unlimited);
        assert_eq!(config.transfer.notify_interval, Duration::from_millis(500));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_builder_toml_file() {
        let mut temp_file = Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            temp_file,
            r#"
[transfer.timeouts]
connect_timeout = 250
read_timeout = 750
"#
        )
        .unwrap();

        let config = ConfigBuilder::new()
            .add_defaults()
            .add_source_file(temp_file.path())
            .build()
            .unwrap();

        assert_eq!(
            config.transfer.timeouts.connect_timeout,
            Duration::from_millis(250)
        );
        assert_eq!(config.transfer.timeouts.read_timeout, Duration::from_millis(750));
    }

    #[test]
    fn test_builder_validation() {
        let mut temp_file = Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(temp_file, "logging:\n  level: loud\n").unwrap();

        let result = ConfigBuilder::new()
            .add_defaults()
            .add_source_file(temp_file.path())
            .build();

        match result {
            Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, "logging.level"),
            other => panic!("expected an invalid level, got {:?}", other),
        }
    }

    #[test]
    fn test_builder_rejects_invalid_worker_count() {
        let mut temp_file = Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(temp_file, "engine:\n  worker_count: 0\n").unwrap();

        let result = ConfigBuilder::new()
            .add_defaults()
            .add_source_file(temp_file.path())
            .build();

        assert!(matches!(result, Err(ConfigError::Source { .. })));
    }

    #[test]
    fn test_zero_read_timeout_rejected() {
        let mut config = Config::default();
        config.transfer.timeouts.read_timeout = Duration::ZERO;
        assert!(matches!(
            validate(&config),
            Err(ConfigError::Invalid {
                field: "transfer.timeouts.read_timeout",
                ..
            })
        ));
    }

    #[test]
    fn test_missing_file_is_skipped() {
        let config = ConfigBuilder::new()
            .add_defaults()
            .add_source_file("/nonexistent/courier.yaml")
            .build()
            .unwrap();
        assert_eq!(config, Config::default());
    }
}
