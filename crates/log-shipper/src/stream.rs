// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use tracing::{debug, warn};

use crate::batcher::Batch;
use crate::client::{ClientError, LogsClient};

/// Outcome of a failed [`LogStream::submit`], classified for the stream pool.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// The stream adopted the token the service expects; retry on this stream.
    #[error("invalid sequence token")]
    InvalidToken,

    /// The service already holds this batch; the stream adopted the expected token.
    #[error("batch already accepted")]
    AlreadyAccepted,

    /// Rate limited; route the batch elsewhere.
    #[error("throttled: {0}")]
    Throttled(ClientError),

    #[error(transparent)]
    Other(ClientError),
}

/// One named destination inside the log group.
///
/// The sequence token is only touched by `submit`, which takes `&mut self`;
/// the pool gives each stream to a single writer task so submissions on a
/// stream are serialized.
pub struct LogStream {
    group: Arc<str>,
    name: String,
    client: Arc<dyn LogsClient>,
    sequence_token: Option<String>,
}

impl LogStream {
    pub fn new(group: Arc<str>, name: String, client: Arc<dyn LogsClient>) -> Self {
        Self {
            group,
            name,
            client,
            sequence_token: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn sequence_token(&self) -> Option<&str> {
        self.sequence_token.as_deref()
    }

    pub async fn create(&self) -> Result<(), ClientError> {
        debug!("LOGS | Creating log stream {}", self.name);
        self.client
            .create_log_stream(&self.group, &self.name)
            .await
    }

    pub async fn submit(&mut self, batch: &Batch) -> Result<(), SubmitError> {
        debug!(
            "LOGS | Putting {} events ({} bytes) into {}",
            batch.len(),
            batch.size_bytes(),
            self.name
        );

        let result = self
            .client
            .put_log_events(
                &self.group,
                &self.name,
                batch.events(),
                self.sequence_token.as_deref(),
            )
            .await;

        match result {
            Ok(next_token) => {
                self.sequence_token = next_token;
                Ok(())
            }
            Err(ClientError::InvalidSequenceToken { expected, .. }) => {
                warn!("LOGS | Invalid sequence token on {}", self.name);
                self.adopt(expected);
                Err(SubmitError::InvalidToken)
            }
            Err(ClientError::DataAlreadyAccepted { expected, .. }) => {
                warn!("LOGS | Batch already accepted on {}", self.name);
                self.adopt(expected);
                Err(SubmitError::AlreadyAccepted)
            }
            Err(err @ ClientError::Throttling(_)) => Err(SubmitError::Throttled(err)),
            Err(err) => Err(SubmitError::Other(err)),
        }
    }

    fn adopt(&mut self, expected: Option<String>) {
        if expected.is_some() {
            self.sequence_token = expected;
        }
    }
}
