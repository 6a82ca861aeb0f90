// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::constants::EVENT_OVERHEAD_BYTES;

/// A single log line as the remote service receives it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEvent {
    /// Milliseconds since the Unix epoch.
    #[serde(rename = "timestamp")]
    timestamp_millis: i64,
    message: String,
}

impl LogEvent {
    #[must_use]
    pub fn new(timestamp_millis: i64, message: impl Into<String>) -> Self {
        Self {
            timestamp_millis,
            message: message.into(),
        }
    }

    /// Builds an event from a wall clock time. Times before the epoch map to
    /// negative milliseconds.
    #[must_use]
    pub fn at(time: SystemTime, message: impl Into<String>) -> Self {
        let timestamp_millis = match time.duration_since(UNIX_EPOCH) {
            Ok(after) => i64::try_from(after.as_millis()).unwrap_or(i64::MAX),
            Err(before) => i64::try_from(before.duration().as_millis())
                .map(|millis| -millis)
                .unwrap_or(i64::MIN),
        };
        Self::new(timestamp_millis, message)
    }

    #[must_use]
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp_millis
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Size the remote service charges for this event against the batch limit.
    #[must_use]
    pub fn size(&self) -> usize {
        self.message.len() + EVENT_OVERHEAD_BYTES
    }
}
