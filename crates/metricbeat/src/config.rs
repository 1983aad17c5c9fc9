// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::errors::ConfigError;
use std::env;
use std::time::Duration;

const DEFAULT_MODULE: &str = "system";
const DEFAULT_METRICSETS: &str = "cpu";
const DEFAULT_PERIOD_SECS: u64 = 10;
const DEFAULT_QUEUE_SIZE: usize = 1000;

/// Configuration for the agent running a single module
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Module name (e.g., system)
    pub module: String,
    /// Metricsets to enable inside the module
    pub metricsets: Vec<String>,
    /// Interval between two fetches of a metricset
    pub period: Duration,
    /// Capacity of the module output and publisher queues
    pub queue_size: usize,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            module: DEFAULT_MODULE.to_string(),
            metricsets: parse_metricsets(DEFAULT_METRICSETS),
            period: Duration::from_secs(DEFAULT_PERIOD_SECS),
            queue_size: DEFAULT_QUEUE_SIZE,
            log_level: "info".to_string(),
        }
    }
}

impl AgentConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let module = env::var("MB_MODULE").unwrap_or_else(|_| DEFAULT_MODULE.to_string());
        let metricsets = env::var("MB_METRICSETS")
            .map(|val| parse_metricsets(&val))
            .unwrap_or_else(|_| parse_metricsets(DEFAULT_METRICSETS));
        let period = match env::var("MB_PERIOD_SECS") {
            Ok(val) => Duration::from_secs(val.trim().parse::<u64>().map_err(|e| {
                ConfigError::Invalid(format!("MB_PERIOD_SECS '{val}' is not a number: {e}"))
            })?),
            Err(_) => Duration::from_secs(DEFAULT_PERIOD_SECS),
        };
        let queue_size = match env::var("MB_QUEUE_SIZE") {
            Ok(val) => val.trim().parse::<usize>().map_err(|e| {
                ConfigError::Invalid(format!("MB_QUEUE_SIZE '{val}' is not a number: {e}"))
            })?,
            Err(_) => DEFAULT_QUEUE_SIZE,
        };
        let log_level = env::var("MB_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or_else(|_| "info".to_string());

        let config = Self {
            module,
            metricsets,
            period,
            queue_size,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.module.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "MB_MODULE cannot be empty".to_string(),
            ));
        }

        if self.metricsets.is_empty() {
            return Err(ConfigError::Invalid(
                "At least one metricset must be enabled".to_string(),
            ));
        }

        if self.period.is_zero() {
            return Err(ConfigError::Invalid(
                "MB_PERIOD_SECS must be greater than 0".to_string(),
            ));
        }

        if self.queue_size == 0 {
            return Err(ConfigError::Invalid(
                "MB_QUEUE_SIZE must be greater than 0".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }
}

fn parse_metricsets(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 5] = [
        "MB_MODULE",
        "MB_METRICSETS",
        "MB_PERIOD_SECS",
        "MB_QUEUE_SIZE",
        "MB_LOG_LEVEL",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = AgentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.metricsets, vec!["cpu"]);
    }

    #[test]
    fn test_validate_zero_period() {
        let config = AgentConfig {
            period: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_empty_module() {
        let config = AgentConfig {
            module: "  ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_no_metricsets() {
        let config = AgentConfig {
            metricsets: vec![],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let config = AgentConfig {
            log_level: "verbose".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_metricsets_skips_blanks() {
        assert_eq!(parse_metricsets(" cpu, ,memory,"), vec!["cpu", "memory"]);
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();
        let config = AgentConfig::from_env().expect("defaults are valid");
        assert_eq!(config.module, "system");
        assert_eq!(config.period, Duration::from_secs(10));
        assert_eq!(config.queue_size, 1000);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        env::set_var("MB_MODULE", "system");
        env::set_var("MB_METRICSETS", "cpu,memory");
        env::set_var("MB_PERIOD_SECS", "30");
        env::set_var("MB_QUEUE_SIZE", "64");
        env::set_var("MB_LOG_LEVEL", "DEBUG");

        let config = AgentConfig::from_env().expect("valid config");
        clear_env();

        assert_eq!(config.metricsets, vec!["cpu", "memory"]);
        assert_eq!(config.period, Duration::from_secs(30));
        assert_eq!(config.queue_size, 64);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_bad_period() {
        clear_env();
        env::set_var("MB_PERIOD_SECS", "soon");
        let result = AgentConfig::from_env();
        clear_env();

        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_bad_queue_size() {
        clear_env();
        env::set_var("MB_QUEUE_SIZE", "lots");
        let result = AgentConfig::from_env();
        clear_env();

        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
