//! Configuration management for runpack
//!
//! Settings come from environment variables with defaults matching the managed
//! container platform the images are built for.
//!
//! # Environment Variables
//!
//! - `RUNPACK_PLATFORM_PORT`: Port the platform routes traffic to - default: `PORT`, then "8080"
//! - `RUNPACK_PORT_ENV_VAR`: Variable the platform injects the port through - default: "PORT"
//! - `RUNPACK_STRICT_PORTS`: Fail validation when the bind port cannot be determined - default: "false"
//! - `RUNPACK_STARTUP_TIMEOUT`: Seconds a probed container may take to answer - default: "30"
//! - `RUNPACK_LOG_LEVEL`: Logging level - default: "info"
//!
//! The container engine connection follows bollard's local defaults (`DOCKER_HOST`
//! or the platform socket).

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_PLATFORM_PORT: u16 = 8080;
const DEFAULT_PORT_ENV_VAR: &str = "PORT";
const DEFAULT_STARTUP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Failed to parse {field}: {error}")]
    ParseError { field: String, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunpackConfig {
    pub platform_port: u16,
    pub port_env_var: String,
    pub strict_ports: bool,
    pub startup_timeout_secs: u64,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for RunpackConfig {
    /// Loads from environment variables, ignoring values that fail to parse
    fn default() -> Self {
        let platform_port = env::var("RUNPACK_PLATFORM_PORT")
            .or_else(|_| env::var("PORT"))
            .ok()
            .and_then(|v| v.trim().parse::<u16>().ok())
            .unwrap_or(DEFAULT_PLATFORM_PORT);

        let port_env_var = env::var("RUNPACK_PORT_ENV_VAR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PORT_ENV_VAR.to_string());

        let strict_ports = env::var("RUNPACK_STRICT_PORTS")
            .ok()
            .and_then(|v| parse_bool(&v))
            .unwrap_or(false);

        let startup_timeout_secs = env::var("RUNPACK_STARTUP_TIMEOUT")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_STARTUP_TIMEOUT_SECS);

        let log_level = env::var("RUNPACK_LOG_LEVEL")
            .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string())
            .to_lowercase();

        Self {
            platform_port,
            port_env_var,
            strict_ports,
            startup_timeout_secs,
            log_level,
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl RunpackConfig {
    /// Like `default()`, but malformed values are errors
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::default();

        for (field, value) in [
            ("RUNPACK_PLATFORM_PORT", env::var("RUNPACK_PLATFORM_PORT").ok()),
            ("RUNPACK_STARTUP_TIMEOUT", env::var("RUNPACK_STARTUP_TIMEOUT").ok()),
        ] {
            if let Some(value) = value {
                if value.trim().parse::<u64>().is_err() {
                    return Err(ConfigError::ParseError {
                        field: field.to_string(),
                        error: format!("'{}' is not a number", value),
                    });
                }
            }
        }
        if let Ok(value) = env::var("RUNPACK_PLATFORM_PORT") {
            if value.trim().parse::<u16>().is_err() {
                return Err(ConfigError::ParseError {
                    field: "RUNPACK_PLATFORM_PORT".to_string(),
                    error: format!("'{}' is out of range", value),
                });
            }
        }
        if let Ok(value) = env::var("RUNPACK_STRICT_PORTS") {
            if parse_bool(&value).is_none() {
                return Err(ConfigError::ParseError {
                    field: "RUNPACK_STRICT_PORTS".to_string(),
                    error: format!("'{}' is not a boolean", value),
                });
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.platform_port == 0 {
            return Err(ConfigError::ValidationFailed(
                "Platform port cannot be 0".to_string(),
            ));
        }

        if !self
            .port_env_var
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid port variable name: {}",
                self.port_env_var
            )));
        }

        if self.startup_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "Startup timeout must be at least 1 second".to_string(),
            ));
        }
        if self.startup_timeout_secs > 600 {
            return Err(ConfigError::ValidationFailed(
                "Startup timeout cannot exceed 10 minutes".to_string(),
            ));
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                    self.log_level
                )))
            }
        }

        Ok(())
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn to_display_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("platform_port".to_string(), self.platform_port.to_string());
        map.insert("port_env_var".to_string(), self.port_env_var.clone());
        map.insert("strict_ports".to_string(), self.strict_ports.to_string());
        map.insert(
            "startup_timeout_secs".to_string(),
            self.startup_timeout_secs.to_string(),
        );
        map.insert("log_level".to_string(), self.log_level.clone());
        map
    }
}

impl fmt::Display for RunpackConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Runpack Configuration:")?;
        writeln!(f, "  Platform Port: {}", self.platform_port)?;
        writeln!(f, "  Port Variable: {}", self.port_env_var)?;
        writeln!(f, "  Strict Ports: {}", self.strict_ports)?;
        writeln!(f, "  Startup Timeout: {}s", self.startup_timeout_secs)?;
        writeln!(f, "  Log Level: {}", self.log_level)?;
        Ok(())
    }
}
