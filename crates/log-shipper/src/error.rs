// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::batcher::Batch;
use crate::client::ClientError;
use crate::event::LogEvent;
use crate::stream::SubmitError;

/// Errors returned synchronously while constructing a [`crate::Logger`].
#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("bootstrap failed: {context}: {source}")]
    Bootstrap {
        context: String,
        #[source]
        source: ClientError,
    },
}

/// Failure detail handed to the error reporter. Every variant means the
/// carried events were dropped for good.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("log event of {size} bytes exceeds the {limit} byte limit")]
    Oversize {
        event: LogEvent,
        size: usize,
        limit: usize,
    },

    #[error("batch of {} events rejected: {source}", .batch.len())]
    Rejected {
        batch: Batch,
        #[source]
        source: ClientError,
    },

    #[error("batch of {} events dropped after {attempts} attempts: {source}", .batch.len())]
    RetriesExhausted {
        batch: Batch,
        attempts: u32,
        #[source]
        source: SubmitError,
    },

    #[error("batch of {} events dropped: no stream left to deliver it", .batch.len())]
    Undeliverable { batch: Batch },
}

impl LogError {
    /// The batch that was dropped, if this failure concerns a whole batch.
    #[must_use]
    pub fn batch(&self) -> Option<&Batch> {
        match self {
            LogError::Oversize { .. } => None,
            LogError::Rejected { batch, .. }
            | LogError::RetriesExhausted { batch, .. }
            | LogError::Undeliverable { batch } => Some(batch),
        }
    }
}
