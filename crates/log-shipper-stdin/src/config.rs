// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use log_shipper::http::DEFAULT_TIMEOUT;
use log_shipper::{HttpClientConfig, LoggerError};
use std::env;
use std::time::Duration;

/// Configuration for the stdin shipper, read from `LOG_SHIPPER_*` variables.
#[derive(Debug, Clone)]
pub struct StdinConfig {
    /// Base URL of the log service or a signing proxy in front of it
    pub endpoint: String,
    /// Log group the lines are shipped to
    pub log_group: String,
    /// Retention applied if the group is created. 0 leaves it unset
    pub retention_days: u32,
    /// HTTPS proxy URL
    pub https_proxy: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for StdinConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            log_group: String::new(),
            retention_days: 0,
            https_proxy: None,
            timeout: DEFAULT_TIMEOUT,
            log_level: "info".to_string(),
        }
    }
}

impl StdinConfig {
    pub fn from_env() -> Result<Self, LoggerError> {
        let endpoint = env::var("LOG_SHIPPER_ENDPOINT").unwrap_or_default();
        let log_group = env::var("LOG_SHIPPER_LOG_GROUP").unwrap_or_default();
        let retention_days = match env::var("LOG_SHIPPER_RETENTION_DAYS") {
            Ok(val) => val.trim().parse::<u32>().map_err(|e| {
                LoggerError::Config(format!("invalid LOG_SHIPPER_RETENTION_DAYS '{val}': {e}"))
            })?,
            Err(_) => 0,
        };
        let https_proxy = env::var("LOG_SHIPPER_HTTPS_PROXY")
            .or_else(|_| env::var("HTTPS_PROXY"))
            .ok();
        let timeout = env::var("LOG_SHIPPER_TIMEOUT_SECS")
            .ok()
            .and_then(|secs| secs.parse::<u64>().ok())
            .map_or(DEFAULT_TIMEOUT, Duration::from_secs);
        let log_level = env::var("LOG_SHIPPER_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or_else(|_| "info".to_string());

        let config = Self {
            endpoint,
            log_group,
            retention_days,
            https_proxy,
            timeout,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Checks what the library cannot: the group name and retention are
    /// validated again when the logger is built.
    pub fn validate(&self) -> Result<(), LoggerError> {
        if self.endpoint.trim().is_empty() {
            return Err(LoggerError::Config(
                "LOG_SHIPPER_ENDPOINT cannot be empty".to_string(),
            ));
        }

        if self.log_group.trim().is_empty() {
            return Err(LoggerError::Config(
                "LOG_SHIPPER_LOG_GROUP cannot be empty".to_string(),
            ));
        }

        if self.timeout.is_zero() {
            return Err(LoggerError::Config(
                "LOG_SHIPPER_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(LoggerError::Config(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            endpoint: self.endpoint.clone(),
            timeout: self.timeout,
            https_proxy: self.https_proxy.clone(),
        }
    }
}
