// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Actor owning the [`Batcher`].
//!
//! Any number of producers hold a cloned [`BatcherHandle`] and push events
//! through an unbounded channel, so intake never blocks the caller. A single
//! service task decides batch boundaries and emits completed batches, in
//! order, on the output channel returned by [`BatcherService::new`].
//!
//! ```text
//!   handles ──Insert──▶ service (owns Batcher) ──Batch──▶ output receiver
//! ```
//!
//! [`BatcherHandle::flush`] is the only way the output ends: the open batch
//! is sealed, emitted, and the output channel closes.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::batcher::{Batch, BatchLimits, Batcher};
use crate::event::LogEvent;
use crate::reporter::Reporter;

#[derive(Debug)]
pub enum BatcherCommand {
    Insert(LogEvent),
    Flush(oneshot::Sender<()>),
}

#[derive(Clone, Debug)]
pub struct BatcherHandle {
    tx: mpsc::UnboundedSender<BatcherCommand>,
}

impl BatcherHandle {
    pub fn insert(&self, event: LogEvent) -> Result<(), mpsc::error::SendError<BatcherCommand>> {
        self.tx.send(BatcherCommand::Insert(event))
    }

    /// Seals the open batch and stops the service. Resolves once the last
    /// batch has been handed to the output channel.
    pub async fn flush(&self) -> Result<(), String> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(BatcherCommand::Flush(response_tx))
            .map_err(|e| format!("Failed to send flush command: {e}"))?;

        response_rx
            .await
            .map_err(|e| format!("Failed to receive flush response: {e}"))
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub struct BatcherService {
    batcher: Batcher,
    rx: mpsc::UnboundedReceiver<BatcherCommand>,
    output: mpsc::UnboundedSender<Batch>,
    reporter: Reporter,
}

impl BatcherService {
    #[must_use]
    pub fn new(
        limits: BatchLimits,
        reporter: Reporter,
    ) -> (Self, BatcherHandle, mpsc::UnboundedReceiver<Batch>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (output, batches) = mpsc::unbounded_channel();

        let service = Self {
            batcher: Batcher::new(limits),
            rx,
            output,
            reporter,
        };

        (service, BatcherHandle { tx }, batches)
    }

    pub async fn run(mut self) {
        debug!("LOGS | Batcher service started");

        while let Some(command) = self.rx.recv().await {
            match command {
                BatcherCommand::Insert(event) => match self.batcher.push(event) {
                    Ok(Some(batch)) => self.emit(batch),
                    Ok(None) => {}
                    Err(err) => self.reporter.report(err),
                },
                BatcherCommand::Flush(response_tx) => {
                    if let Some(batch) = self.batcher.seal() {
                        self.emit(batch);
                    }
                    if response_tx.send(()).is_err() {
                        error!("LOGS | Failed to send batcher flush response - receiver dropped");
                    }
                    debug!("LOGS | Batcher service flushed and stopped");
                    return;
                }
            }
        }

        // Every handle is gone without a flush; ship what is left.
        if let Some(batch) = self.batcher.seal() {
            self.emit(batch);
        }
        debug!("LOGS | Batcher service stopped");
    }

    fn emit(&self, batch: Batch) {
        debug!("LOGS | Sealed batch of {} events", batch.len());
        if self.output.send(batch).is_err() {
            error!("LOGS | Batch output closed, dropping sealed batch");
        }
    }
}
