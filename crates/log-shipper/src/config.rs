// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use regex::Regex;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use crate::batcher::BatchLimits;
use crate::client::LogsClient;
use crate::constants::{MAX_LOG_GROUP_NAME_LEN, VALID_RETENTION_DAYS};
use crate::error::LoggerError;
use crate::reporter::ErrorReporter;

/// Delay applied before a throttled batch is dispatched again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryStrategy {
    /// Resubmit right away.
    #[default]
    Immediate,
    /// Wait `base * 2^(attempt - 1)`, capped at `max`.
    Backoff { base: Duration, max: Duration },
}

impl RetryStrategy {
    /// Delay before retry number `attempt` (starting at 1).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            RetryStrategy::Immediate => Duration::ZERO,
            RetryStrategy::Backoff { base, max } => {
                let factor = 1u32
                    .checked_shl(attempt.saturating_sub(1))
                    .unwrap_or(u32::MAX);
                base.saturating_mul(factor).min(max)
            }
        }
    }
}

/// Configuration for a [`crate::Logger`].
#[derive(Clone, Default)]
pub struct LoggerConfig {
    /// Client for the remote log service. Required.
    pub client: Option<Arc<dyn LogsClient>>,
    /// Log group every stream is created in. Required.
    pub log_group_name: String,
    /// Called once per dropped event or batch. Defaults to doing nothing.
    pub error_reporter: Option<ErrorReporter>,
    /// Retention applied when this logger creates the group. 0 means none.
    pub retention_days: u32,
    pub batch_limits: BatchLimits,
    pub retry_strategy: RetryStrategy,
    /// Attempts after which a throttled or out-of-sequence batch is dropped.
    /// `None` retries forever.
    pub max_retries: Option<u32>,
    /// Upper bound on the number of streams created under throttling.
    /// `None` lets the pool grow without limit.
    pub max_streams: Option<usize>,
}

impl LoggerConfig {
    pub fn new(client: Arc<dyn LogsClient>, log_group_name: impl Into<String>) -> Self {
        Self {
            client: Some(client),
            log_group_name: log_group_name.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), LoggerError> {
        if self.client.is_none() {
            return Err(LoggerError::Config(
                "config missing required client".to_string(),
            ));
        }

        if self.log_group_name.is_empty() {
            return Err(LoggerError::Config(
                "config missing required log group name".to_string(),
            ));
        }

        if self.log_group_name.len() > MAX_LOG_GROUP_NAME_LEN {
            return Err(LoggerError::Config(format!(
                "log group name is longer than {MAX_LOG_GROUP_NAME_LEN} characters"
            )));
        }

        let pattern = Regex::new(r"^[A-Za-z0-9._/#-]+$")
            .map_err(|e| LoggerError::Config(format!("invalid log group pattern: {e}")))?;
        if !pattern.is_match(&self.log_group_name) {
            return Err(LoggerError::Config(format!(
                "invalid log group name '{}': only ASCII alphanumerics and '._/#-' are allowed",
                self.log_group_name
            )));
        }

        if self.retention_days != 0 && !VALID_RETENTION_DAYS.contains(&self.retention_days) {
            return Err(LoggerError::Config(format!(
                "unsupported retention of {} days; must be one of {:?}",
                self.retention_days, VALID_RETENTION_DAYS
            )));
        }

        let limits = &self.batch_limits;
        if limits.max_events == 0 || limits.max_bytes == 0 || limits.max_span.is_zero() {
            return Err(LoggerError::Config(
                "batch limits must all be greater than 0".to_string(),
            ));
        }

        if self.max_streams == Some(0) {
            return Err(LoggerError::Config(
                "max streams must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Debug for LoggerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggerConfig")
            .field("client", &self.client.is_some())
            .field("log_group_name", &self.log_group_name)
            .field("error_reporter", &self.error_reporter.is_some())
            .field("retention_days", &self.retention_days)
            .field("batch_limits", &self.batch_limits)
            .field("retry_strategy", &self.retry_strategy)
            .field("max_retries", &self.max_retries)
            .field("max_streams", &self.max_streams)
            .finish()
    }
}
