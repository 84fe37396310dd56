//! Configuration loading and typed config structures for debug sessions.
//!
//! Every field has a default, so an empty document (or no document at all)
//! yields a working configuration. The YAML layout is:
//!
//! ```yaml
//! session:
//!   client_version: 0
//!   status_poll_interval_ms: 100
//! navigation:
//!   initial_step_femtos: 1
//!   step_growth_factor: 10
//!   max_step_growths: 30
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Environment variable overriding `session.status_poll_interval_ms`.
pub const STATUS_POLL_ENV: &str = "RTLDEBUG_STATUS_POLL_MS";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value parsed but is outside its allowed range.
    #[error("invalid config value: {message}")]
    Invalid {
        /// Which value is wrong and why.
        message: &'static str,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level session configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SessionConfig {
    /// Connection and status tracking settings.
    #[serde(default)]
    pub session: SessionSettings,

    /// Cursor navigation settings.
    #[serde(default)]
    pub navigation: NavigationConfig,
}

impl SessionConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// `RTLDEBUG_STATUS_POLL_MS` overrides `session.status_poll_interval_ms`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.session.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Check that every value keeps polling and step search productive.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending value.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        let message = if self.session.status_poll_interval_ms == 0 {
            "status_poll_interval_ms must be greater than 0"
        } else if self.navigation.initial_step_femtos == 0 {
            "initial_step_femtos must be greater than 0"
        } else if self.navigation.step_growth_factor < 2 {
            "step_growth_factor must be at least 2"
        } else {
            return Ok(());
        };
        Err(ConfigError::Invalid { message })
    }
}

/// Connection and status tracking settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionSettings {
    /// Protocol version sent in the client greeting.
    #[serde(default)]
    pub client_version: u32,

    /// Milliseconds between status polls while the simulation runs.
    #[serde(default = "default_status_poll_interval_ms")]
    pub status_poll_interval_ms: u64,
}

impl SessionSettings {
    /// Interval between status polls while the simulation runs.
    pub const fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }

    /// Apply environment variable overrides.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(STATUS_POLL_ENV) {
            match val.parse() {
                Ok(ms) => self.status_poll_interval_ms = ms,
                Err(_) => tracing::warn!(value = %val, "Ignoring invalid {STATUS_POLL_ENV}"),
            }
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            client_version: 0,
            status_poll_interval_ms: default_status_poll_interval_ms(),
        }
    }
}

/// Cursor navigation settings.
///
/// The forward step search starts at `initial_step_femtos` and multiplies
/// the step by `step_growth_factor` after every probe that finds no later
/// sample, at most `max_step_growths` times.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NavigationConfig {
    /// Width of the first probe, in femtoseconds.
    #[serde(default = "default_initial_step_femtos")]
    pub initial_step_femtos: u64,

    /// Factor applied to the probe width after each miss.
    #[serde(default = "default_step_growth_factor")]
    pub step_growth_factor: u64,

    /// Number of times the probe may grow before the search gives up.
    #[serde(default = "default_max_step_growths")]
    pub max_step_growths: u32,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            initial_step_femtos: default_initial_step_femtos(),
            step_growth_factor: default_step_growth_factor(),
            max_step_growths: default_max_step_growths(),
        }
    }
}

const fn default_status_poll_interval_ms() -> u64 {
    100
}

const fn default_initial_step_femtos() -> u64 {
    1
}

const fn default_step_growth_factor() -> u64 {
    10
}

const fn default_max_step_growths() -> u32 {
    30
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_values() {
        let config = SessionConfig::default();
        assert_eq!(config.session.client_version, 0);
        assert_eq!(config.session.status_poll_interval_ms, 100);
        assert_eq!(config.navigation.initial_step_femtos, 1);
        assert_eq!(config.navigation.step_growth_factor, 10);
        assert_eq!(config.navigation.max_step_growths, 30);
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r"
session:
  client_version: 0
  status_poll_interval_ms: 250
navigation:
  initial_step_femtos: 1000
  step_growth_factor: 2
  max_step_growths: 8
";
        let config: SessionConfig = serde_yml::from_str(yaml).unwrap();
        assert_eq!(config.session.status_poll_interval_ms, 250);
        assert_eq!(
            config.session.status_poll_interval(),
            Duration::from_millis(250)
        );
        assert_eq!(config.navigation.initial_step_femtos, 1000);
        assert_eq!(config.navigation.step_growth_factor, 2);
        assert_eq!(config.navigation.max_step_growths, 8);
    }

    #[test]
    fn partial_yaml_uses_defaults() {
        let yaml = r"
navigation:
  max_step_growths: 3
";
        let config: SessionConfig = serde_yml::from_str(yaml).unwrap();
        assert_eq!(config.navigation.max_step_growths, 3);
        assert_eq!(config.navigation.step_growth_factor, 10);
        assert_eq!(config.session, SessionSettings::default());
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let result = SessionConfig::parse("session:\n  status_poll_interval_ms: 0\n");
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                message: "status_poll_interval_ms must be greater than 0"
            })
        ));
    }

    #[test]
    fn step_must_be_able_to_grow() {
        for factor in [0, 1] {
            let yaml = format!("navigation:\n  step_growth_factor: {factor}\n");
            let result = SessionConfig::parse(&yaml);
            assert!(matches!(result, Err(ConfigError::Invalid { .. })));
        }
        let result = SessionConfig::parse("navigation:\n  initial_step_femtos: 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
        assert!(SessionConfig::parse("navigation:\n  step_growth_factor: 2\n").is_ok());
    }

    #[test]
    fn default_config_is_valid() {
        assert!(SessionConfig::default().validate().is_ok());
    }

    #[test]
    fn invalid_yaml_is_reported() {
        let result = SessionConfig::parse("session: [not, a, map]");
        assert!(matches!(result, Err(ConfigError::Yaml { .. })));
    }

    #[test]
    fn missing_file_is_reported() {
        let result = SessionConfig::from_file(Path::new("/nonexistent/rtldebug.yaml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
