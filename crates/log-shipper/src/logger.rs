// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The public entry point: one [`Logger`] per log group and process.
//!
//! Construction bootstraps the group (creating it if needed and applying the
//! retention policy), creates the first stream and starts three tasks: the
//! batcher service, the stream pool coordinator and the forwarder that moves
//! sealed batches from one to the other. [`Logger::close`] drains all of them
//! in order.

use rand::RngCore;
use std::fmt::Write;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::batcher::Batch;
use crate::batcher_service::{BatcherHandle, BatcherService};
use crate::client::{ClientError, LogsClient};
use crate::config::LoggerConfig;
use crate::constants::SESSION_PREFIX_BYTES;
use crate::error::LoggerError;
use crate::event::LogEvent;
use crate::pool::{StreamPoolConfig, StreamPoolHandle, StreamPoolService};
use crate::reporter::Reporter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoggerState {
    Created,
    Bootstrapped,
    Running,
    Draining,
    Closed,
}

/// Dropping a `Logger` without calling [`Logger::close`] stops its tasks but
/// does not wait for pending batches, which may be lost.
pub struct Logger {
    group: Arc<str>,
    prefix: String,
    state: LoggerState,
    batcher: BatcherHandle,
    pool: StreamPoolHandle,
    forwarder: JoinHandle<()>,
    reporter: Reporter,
}

impl Logger {
    /// Validates `config`, bootstraps the log group and its first stream, and
    /// starts the pipeline. Must be called within a tokio runtime.
    pub async fn new(config: LoggerConfig) -> Result<Self, LoggerError> {
        config.validate()?;
        let LoggerConfig {
            client,
            log_group_name,
            error_reporter,
            retention_days,
            batch_limits,
            retry_strategy,
            max_retries,
            max_streams,
        } = config;
        let Some(client) = client else {
            return Err(LoggerError::Config(
                "config missing required client".to_string(),
            ));
        };

        let group: Arc<str> = Arc::from(log_group_name);
        let prefix = random_hex(SESSION_PREFIX_BYTES);
        let mut state = LoggerState::Created;
        debug!("LOGS | Logger for {group} created with session {prefix}");

        create_group_if_absent(client.as_ref(), &group, retention_days).await?;

        let reporter = Reporter::new(error_reporter);
        let (mut pool_service, pool) = StreamPoolService::new(
            StreamPoolConfig {
                group: Arc::clone(&group),
                prefix: prefix.clone(),
                retry_strategy,
                max_retries,
                max_streams,
            },
            client,
            reporter.clone(),
        );
        pool_service
            .add_stream()
            .await
            .map_err(|source| LoggerError::Bootstrap {
                context: format!("creating first log stream in {group:?}"),
                source,
            })?;
        transition(&mut state, LoggerState::Bootstrapped);

        let (batcher_service, batcher, batches) =
            BatcherService::new(batch_limits, reporter.clone());
        tokio::spawn(pool_service.run());
        tokio::spawn(batcher_service.run());
        let forwarder = tokio::spawn(forward(batches, pool.clone()));
        transition(&mut state, LoggerState::Running);

        Ok(Self {
            group,
            prefix,
            state,
            batcher,
            pool,
            forwarder,
            reporter,
        })
    }

    /// Enqueues a message stamped with `time`. Never blocks.
    ///
    /// Messages must be under the per-event limit; larger ones are dropped and
    /// reported. Time window rules of the service are not checked here; a batch
    /// the service refuses is reported through the error reporter.
    pub fn log(&self, time: SystemTime, message: impl Into<String>) {
        self.log_event(LogEvent::at(time, message));
    }

    pub fn log_event(&self, event: LogEvent) {
        if self.batcher.insert(event).is_err() {
            error!("LOGS | Log called on a logger whose batcher has stopped");
        }
    }

    #[must_use]
    pub fn log_group_name(&self) -> &str {
        &self.group
    }

    /// Random prefix shared by every stream this logger creates.
    #[must_use]
    pub fn session_prefix(&self) -> &str {
        &self.prefix
    }

    pub async fn stream_count(&self) -> Result<usize, String> {
        self.pool.stream_count().await
    }

    /// Drains every accepted message to the service and stops the pipeline.
    ///
    /// Returns once every batch is either delivered or handed to the error
    /// reporter, and every reporter call has returned.
    pub async fn close(mut self) {
        transition(&mut self.state, LoggerState::Draining);

        // Intake is a synchronous channel send, so everything logged so far is
        // already queued ahead of the flush command.
        if let Err(e) = self.batcher.flush().await {
            error!("LOGS | Failed to flush batcher: {e}");
        }
        if let Err(e) = self.forwarder.await {
            error!("LOGS | Batch forwarder failed: {e}");
        }
        if let Err(e) = self.pool.flush().await {
            error!("LOGS | Failed to flush stream pool: {e}");
        }
        if self.pool.shutdown().is_err() {
            debug!("LOGS | Stream pool already stopped");
        }
        self.reporter.wait().await;

        transition(&mut self.state, LoggerState::Closed);
        info!("LOGS | Logger for {} closed", self.group);
    }
}

async fn create_group_if_absent(
    client: &dyn LogsClient,
    group: &str,
    retention_days: u32,
) -> Result<(), LoggerError> {
    match client.create_log_group(group).await {
        Ok(()) => {}
        Err(ClientError::ResourceAlreadyExists(_)) => {
            debug!("LOGS | Log group {group} already exists");
            return Ok(());
        }
        Err(source) => {
            return Err(LoggerError::Bootstrap {
                context: format!("creating log group {group:?}"),
                source,
            })
        }
    }

    if retention_days != 0 {
        client
            .put_retention_policy(group, retention_days)
            .await
            .map_err(|source| LoggerError::Bootstrap {
                context: format!("setting {retention_days} day retention on {group:?}"),
                source,
            })?;
    }
    Ok(())
}

async fn forward(
    mut batches: tokio::sync::mpsc::UnboundedReceiver<Batch>,
    pool: StreamPoolHandle,
) {
    while let Some(batch) = batches.recv().await {
        let events = batch.len();
        if pool.write(batch).is_err() {
            error!("LOGS | Stream pool stopped, dropping batch of {events} events");
        }
    }
    debug!("LOGS | Batch forwarder finished");
}

fn transition(state: &mut LoggerState, next: LoggerState) {
    debug!("LOGS | Logger {state:?} -> {next:?}");
    *state = next;
}

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().fold(String::with_capacity(len * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}
