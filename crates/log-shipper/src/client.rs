// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The remote log service as seen by the shipper.
//!
//! Only four calls are needed: creating the group, setting its retention,
//! creating a stream and putting a batch of events into a stream. Each call
//! fails with a [`ClientError`] whose variants mirror the error kinds the
//! service documents, so the stream pool can decide between retrying,
//! rotating to a new stream, or dropping the batch.

use async_trait::async_trait;

use crate::event::LogEvent;

/// Failure returned by a [`LogsClient`] call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("resource already exists: {0}")]
    ResourceAlreadyExists(String),

    #[error("invalid sequence token (expected {expected:?}): {message}")]
    InvalidSequenceToken {
        expected: Option<String>,
        message: String,
    },

    #[error("data already accepted (expected {expected:?}): {message}")]
    DataAlreadyAccepted {
        expected: Option<String>,
        message: String,
    },

    #[error("throttled: {0}")]
    Throttling(String),

    #[error("{kind}: {message}")]
    Service { kind: String, message: String },

    #[error("transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait LogsClient: Send + Sync {
    async fn create_log_group(&self, group: &str) -> Result<(), ClientError>;

    async fn put_retention_policy(&self, group: &str, days: u32) -> Result<(), ClientError>;

    async fn create_log_stream(&self, group: &str, stream: &str) -> Result<(), ClientError>;

    /// Submits `events` in order. On success returns the token the next call on
    /// this stream must present.
    async fn put_log_events(
        &self,
        group: &str,
        stream: &str,
        events: &[LogEvent],
        sequence_token: Option<&str>,
    ) -> Result<Option<String>, ClientError>;
}
