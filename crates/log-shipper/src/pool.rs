// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Coordinator that spreads batches over a growable set of log streams.
//!
//! ```text
//!   handle ──Write──▶ coordinator ──Pending──▶ writer 0 (owns LogStream 0)
//!                       ▲   │      ──Pending──▶ writer 1 (owns LogStream 1)
//!                       │   └── grows the pool on throttling
//!                       └────── Completed / Failed from writers
//! ```
//!
//! The coordinator task is the only place the stream list, the round-robin
//! cursor and the in-flight counter change. Each stream is owned by one
//! writer task that drains its queue in order, so submissions on a stream
//! are serialized and FIFO while different streams submit in parallel.
//!
//! Failure policy:
//! - throttled: add a stream, then dispatch the batch again round-robin
//! - invalid token / already accepted: submit again on the same stream, which
//!   has adopted the expected token, before anything queued behind it
//! - anything else: drop the batch and report it
//!
//! A writer that hits a failure waits for the coordinator's [`Verdict`]
//! before taking its next batch, so a stream never overtakes a batch it is
//! still recovering.
//!
//! A batch counts as in flight from [`StreamPoolHandle::write`] until it is
//! accepted or dropped; [`StreamPoolHandle::flush`] resolves when the count
//! is back to zero.
//!
//! Writers and delayed retries only hold weak senders, so the coordinator
//! stops once every [`StreamPoolHandle`] is dropped.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::batcher::Batch;
use crate::client::{ClientError, LogsClient};
use crate::config::RetryStrategy;
use crate::error::LogError;
use crate::reporter::Reporter;
use crate::stream::{LogStream, SubmitError};

/// A batch together with the number of failed attempts so far.
#[derive(Debug)]
pub struct Pending {
    batch: Batch,
    attempts: u32,
}

/// The coordinator's answer to a writer reporting a failed submission.
#[derive(Debug)]
pub enum Verdict {
    /// Submit this batch again before anything else queued on the stream.
    Retry(Pending),
    /// The batch was dropped or sent elsewhere; take the next one.
    Release,
}

#[derive(Debug)]
pub enum PoolCommand {
    Write(Batch),
    /// A batch whose backoff delay elapsed.
    Redispatch(Pending),
    Completed,
    Failed {
        stream: usize,
        pending: Pending,
        error: SubmitError,
        verdict: oneshot::Sender<Verdict>,
    },
    Flush(oneshot::Sender<()>),
    StreamCount(oneshot::Sender<usize>),
    Shutdown,
}

#[derive(Clone, Debug)]
pub struct StreamPoolHandle {
    tx: mpsc::UnboundedSender<PoolCommand>,
}

impl StreamPoolHandle {
    pub fn write(&self, batch: Batch) -> Result<(), mpsc::error::SendError<PoolCommand>> {
        self.tx.send(PoolCommand::Write(batch))
    }

    /// Resolves once every batch written so far is accepted or dropped.
    pub async fn flush(&self) -> Result<(), String> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(PoolCommand::Flush(response_tx))
            .map_err(|e| format!("Failed to send flush command: {e}"))?;

        response_rx
            .await
            .map_err(|e| format!("Failed to receive flush response: {e}"))
    }

    pub async fn stream_count(&self) -> Result<usize, String> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(PoolCommand::StreamCount(response_tx))
            .map_err(|e| format!("Failed to send stream count command: {e}"))?;

        response_rx
            .await
            .map_err(|e| format!("Failed to receive stream count response: {e}"))
    }

    pub fn shutdown(&self) -> Result<(), mpsc::error::SendError<PoolCommand>> {
        self.tx.send(PoolCommand::Shutdown)
    }
}

/// Settings the coordinator needs besides the remote client.
#[derive(Debug, Clone)]
pub struct StreamPoolConfig {
    pub group: Arc<str>,
    /// Stream names are `<prefix>.<index>`.
    pub prefix: String,
    pub retry_strategy: RetryStrategy,
    pub max_retries: Option<u32>,
    pub max_streams: Option<usize>,
}

pub struct StreamPoolService {
    config: StreamPoolConfig,
    client: Arc<dyn LogsClient>,
    reporter: Reporter,
    writers: Vec<mpsc::UnboundedSender<Pending>>,
    next: usize,
    in_flight: usize,
    flush_waiters: Vec<oneshot::Sender<()>>,
    tx: mpsc::WeakUnboundedSender<PoolCommand>,
    rx: mpsc::UnboundedReceiver<PoolCommand>,
}

impl StreamPoolService {
    #[must_use]
    pub fn new(
        config: StreamPoolConfig,
        client: Arc<dyn LogsClient>,
        reporter: Reporter,
    ) -> (Self, StreamPoolHandle) {
        let (tx, rx) = mpsc::unbounded_channel();

        let service = Self {
            config,
            client,
            reporter,
            writers: Vec::new(),
            next: 0,
            in_flight: 0,
            flush_waiters: Vec::new(),
            tx: tx.downgrade(),
            rx,
        };

        (service, StreamPoolHandle { tx })
    }

    /// Creates the next stream remotely and starts its writer.
    pub async fn add_stream(&mut self) -> Result<(), ClientError> {
        let index = self.writers.len();
        let name = format!("{}.{}", self.config.prefix, index);
        let stream = LogStream::new(
            Arc::clone(&self.config.group),
            name,
            Arc::clone(&self.client),
        );
        stream.create().await?;

        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(stream, index, writer_rx, self.tx.clone()));
        self.writers.push(writer_tx);
        debug!("LOGS | Stream pool now has {} streams", self.writers.len());
        Ok(())
    }

    pub async fn run(mut self) {
        debug!("LOGS | Stream pool service started");

        while let Some(command) = self.rx.recv().await {
            match command {
                PoolCommand::Write(batch) => {
                    self.in_flight += 1;
                    self.dispatch(Pending { batch, attempts: 0 });
                }
                PoolCommand::Redispatch(pending) => self.dispatch(pending),
                PoolCommand::Completed => self.settle(),
                PoolCommand::Failed {
                    stream,
                    pending,
                    error,
                    verdict,
                } => self.handle_failure(stream, pending, error, verdict).await,
                PoolCommand::Flush(response_tx) => {
                    if self.in_flight == 0 {
                        let _ = response_tx.send(());
                    } else {
                        debug!("LOGS | Waiting for {} batches in flight", self.in_flight);
                        self.flush_waiters.push(response_tx);
                    }
                }
                PoolCommand::StreamCount(response_tx) => {
                    if response_tx.send(self.writers.len()).is_err() {
                        error!("LOGS | Failed to send stream count response - receiver dropped");
                    }
                }
                PoolCommand::Shutdown => {
                    debug!("LOGS | Stream pool service shutting down");
                    break;
                }
            }
        }

        if self.in_flight > 0 {
            warn!(
                "LOGS | Stream pool stopped with {} batches in flight",
                self.in_flight
            );
        }
        debug!("LOGS | Stream pool service stopped");
    }

    fn dispatch(&mut self, pending: Pending) {
        if self.writers.is_empty() {
            self.drop_batch(LogError::Undeliverable {
                batch: pending.batch,
            });
            return;
        }
        self.next = (self.next + 1) % self.writers.len();
        self.send_to(self.next, pending);
    }

    fn send_to(&mut self, index: usize, pending: Pending) {
        if let Err(mpsc::error::SendError(pending)) = self.writers[index].send(pending) {
            error!("LOGS | Writer for stream {index} is gone");
            self.drop_batch(LogError::Undeliverable {
                batch: pending.batch,
            });
        }
    }

    async fn handle_failure(
        &mut self,
        stream: usize,
        mut pending: Pending,
        error: SubmitError,
        verdict: oneshot::Sender<Verdict>,
    ) {
        pending.attempts += 1;

        if let SubmitError::Other(source) = error {
            let _ = verdict.send(Verdict::Release);
            self.drop_batch(LogError::Rejected {
                batch: pending.batch,
                source,
            });
            return;
        }

        if let Some(max) = self.config.max_retries {
            if pending.attempts > max {
                let _ = verdict.send(Verdict::Release);
                self.drop_batch(LogError::RetriesExhausted {
                    batch: pending.batch,
                    attempts: pending.attempts,
                    source: error,
                });
                return;
            }
        }

        if let SubmitError::Throttled(_) = error {
            warn!(
                "LOGS | Throttled on stream {stream}, attempt {}",
                pending.attempts
            );
            let _ = verdict.send(Verdict::Release);
            self.grow().await;
            self.redispatch(pending);
            return;
        }

        debug!("LOGS | Resubmitting batch on stream {stream} after {error}");
        if let Err(Verdict::Retry(pending)) = verdict.send(Verdict::Retry(pending)) {
            error!("LOGS | Writer for stream {stream} is gone");
            self.drop_batch(LogError::Undeliverable {
                batch: pending.batch,
            });
        }
    }

    async fn grow(&mut self) {
        if let Some(max) = self.config.max_streams {
            if self.writers.len() >= max {
                debug!("LOGS | Stream pool already at its limit of {max} streams");
                return;
            }
        }
        if let Err(e) = self.add_stream().await {
            warn!("LOGS | Failed to add a log stream after throttling: {e}");
        }
    }

    fn redispatch(&mut self, pending: Pending) {
        let delay = self.config.retry_strategy.delay(pending.attempts);
        if delay.is_zero() {
            self.dispatch(pending);
            return;
        }

        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match tx.upgrade() {
                Some(tx) => {
                    let _ = tx.send(PoolCommand::Redispatch(pending));
                }
                None => debug!("LOGS | Stream pool stopped during backoff"),
            }
        });
    }

    fn drop_batch(&mut self, err: LogError) {
        self.reporter.report(err);
        self.settle();
    }

    fn settle(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
        if self.in_flight == 0 {
            for waiter in self.flush_waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }
}

async fn run_writer(
    mut stream: LogStream,
    index: usize,
    mut rx: mpsc::UnboundedReceiver<Pending>,
    coordinator: mpsc::WeakUnboundedSender<PoolCommand>,
) {
    'queue: while let Some(mut pending) = rx.recv().await {
        loop {
            let Some(tx) = coordinator.upgrade() else {
                break 'queue;
            };
            let error = match stream.submit(&pending.batch).await {
                Ok(()) => {
                    if tx.send(PoolCommand::Completed).is_err() {
                        break 'queue;
                    }
                    break;
                }
                Err(error) => error,
            };

            let (verdict_tx, verdict_rx) = oneshot::channel();
            let failed = PoolCommand::Failed {
                stream: index,
                pending,
                error,
                verdict: verdict_tx,
            };
            if tx.send(failed).is_err() {
                break 'queue;
            }
            drop(tx);
            match verdict_rx.await {
                Ok(Verdict::Retry(next)) => pending = next,
                Ok(Verdict::Release) => break,
                Err(_) => break 'queue,
            }
        }
    }
    debug!("LOGS | Writer for {} stopped", stream.name());
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::event::LogEvent;
    use crate::memory::{Call, InMemoryLogsClient};
    use std::sync::Mutex;
    use std::time::Duration;

    struct Harness {
        client: Arc<InMemoryLogsClient>,
        handle: StreamPoolHandle,
        reported: Arc<Mutex<Vec<LogError>>>,
        reporter: Reporter,
    }

    async fn start(config: StreamPoolConfig) -> Harness {
        let client = Arc::new(InMemoryLogsClient::new().with_existing_group("app"));
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reported);
        let reporter = Reporter::new(Some(Arc::new(move |err: LogError| {
            sink.lock().expect("lock poisoned").push(err);
        })));

        let (mut service, handle) = StreamPoolService::new(
            config,
            Arc::clone(&client) as Arc<dyn LogsClient>,
            reporter.clone(),
        );
        service.add_stream().await.unwrap();
        tokio::spawn(service.run());

        Harness {
            client,
            handle,
            reported,
            reporter,
        }
    }

    fn config() -> StreamPoolConfig {
        StreamPoolConfig {
            group: Arc::from("app"),
            prefix: "abc".to_string(),
            retry_strategy: RetryStrategy::Immediate,
            max_retries: None,
            max_streams: None,
        }
    }

    fn batch(tag: &str) -> Batch {
        Batch::from(vec![
            LogEvent::new(1, format!("{tag}-1")),
            LogEvent::new(2, format!("{tag}-2")),
        ])
    }

    fn put_streams(client: &InMemoryLogsClient) -> Vec<String> {
        client
            .put_calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::PutLogEvents { stream, .. } => Some(stream),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_writes_are_delivered_and_flush_waits() {
        let h = start(config()).await;
        for i in 0..5 {
            h.handle.write(batch(&format!("b{i}"))).unwrap();
        }
        h.handle.flush().await.unwrap();

        let events = h.client.accepted_events("app", "abc.0");
        assert_eq!(events.len(), 10);
        assert_eq!(events[0].message(), "b0-1");
        assert_eq!(events[9].message(), "b4-2");
        assert!(h.reported.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_flush_with_nothing_in_flight_returns() {
        let h = start(config()).await;
        h.handle.flush().await.unwrap();
        assert_eq!(h.handle.stream_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_throttling_grows_pool_and_resubmits() {
        let h = start(config()).await;
        h.client
            .fail_next_put(ClientError::Throttling("Rate exceeded".to_string()));

        h.handle.write(batch("t")).unwrap();
        h.handle.flush().await.unwrap();

        assert_eq!(h.handle.stream_count().await.unwrap(), 2);
        assert_eq!(h.client.streams("app"), vec!["abc.0", "abc.1"]);
        assert_eq!(h.client.all_accepted_events("app").len(), 2);
        assert_eq!(put_streams(&h.client).len(), 2);
        assert!(h.reported.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_round_robin_after_growth() {
        let h = start(config()).await;
        h.client
            .fail_next_put(ClientError::Throttling("Rate exceeded".to_string()));
        h.handle.write(batch("first")).unwrap();
        h.handle.flush().await.unwrap();

        for i in 0..4 {
            h.handle.write(batch(&format!("rr{i}"))).unwrap();
            h.handle.flush().await.unwrap();
        }

        let streams = put_streams(&h.client);
        // throttled on .0, retried on .1, then strict alternation
        assert_eq!(
            streams,
            vec!["abc.0", "abc.1", "abc.0", "abc.1", "abc.0", "abc.1"]
        );
    }

    #[tokio::test]
    async fn test_max_streams_caps_growth() {
        let h = start(StreamPoolConfig {
            max_streams: Some(1),
            ..config()
        })
        .await;
        h.client
            .fail_next_put(ClientError::Throttling("Rate exceeded".to_string()));

        h.handle.write(batch("t")).unwrap();
        h.handle.flush().await.unwrap();

        assert_eq!(h.handle.stream_count().await.unwrap(), 1);
        assert_eq!(h.client.accepted_events("app", "abc.0").len(), 2);
    }

    #[tokio::test]
    async fn test_failed_growth_still_resubmits() {
        let h = start(config()).await;
        h.client
            .fail_next_put(ClientError::Throttling("Rate exceeded".to_string()));
        h.client.fail_next_create_stream(ClientError::Service {
            kind: "LimitExceededException".to_string(),
            message: "too many streams".to_string(),
        });

        h.handle.write(batch("t")).unwrap();
        h.handle.flush().await.unwrap();

        assert_eq!(h.handle.stream_count().await.unwrap(), 1);
        assert_eq!(h.client.accepted_events("app", "abc.0").len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_token_retries_on_same_stream() {
        let h = start(config()).await;
        h.client
            .fail_next_put(ClientError::Throttling("Rate exceeded".to_string()));
        h.handle.write(batch("grow")).unwrap();
        h.handle.flush().await.unwrap();

        // next dispatch goes to abc.0
        h.client.set_expected_token("app", "abc.0", "T");
        h.handle.write(batch("seq")).unwrap();
        h.handle.flush().await.unwrap();

        let calls = h.client.put_calls();
        let last_two: Vec<(String, Option<String>)> = calls[calls.len() - 2..]
            .iter()
            .map(|call| match call {
                Call::PutLogEvents {
                    stream,
                    sequence_token,
                    ..
                } => (stream.clone(), sequence_token.clone()),
                other => panic!("unexpected call: {other:?}"),
            })
            .collect();
        assert_eq!(last_two[0].0, "abc.0");
        assert_eq!(last_two[1], ("abc.0".to_string(), Some("T".to_string())));
        assert!(h.reported.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_already_accepted_retries_on_same_stream() {
        let h = start(config()).await;
        h.client.fail_next_put(ClientError::DataAlreadyAccepted {
            expected: None,
            message: "seen".to_string(),
        });

        h.handle.write(batch("dup")).unwrap();
        h.handle.flush().await.unwrap();

        assert_eq!(put_streams(&h.client), vec!["abc.0", "abc.0"]);
        assert_eq!(h.handle.stream_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_token_recovery_keeps_stream_order() {
        let h = start(config()).await;
        h.client.set_expected_token("app", "abc.0", "T");

        h.handle.write(batch("A")).unwrap();
        h.handle.write(batch("B")).unwrap();
        h.handle.flush().await.unwrap();

        let accepted: Vec<String> = h
            .client
            .accepted_events("app", "abc.0")
            .iter()
            .map(|e| e.message().to_string())
            .collect();
        assert_eq!(accepted, vec!["A-1", "A-2", "B-1", "B-2"]);
        assert_eq!(put_streams(&h.client), vec!["abc.0", "abc.0", "abc.0"]);
        assert!(h.reported.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_service_stops_when_handles_are_dropped() {
        let client = Arc::new(InMemoryLogsClient::new().with_existing_group("app"));
        let (mut service, handle) = StreamPoolService::new(
            config(),
            Arc::clone(&client) as Arc<dyn LogsClient>,
            Reporter::new(None),
        );
        service.add_stream().await.unwrap();
        let task = tokio::spawn(service.run());

        handle.write(batch("last")).unwrap();
        drop(handle);

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("coordinator kept running without handles")
            .unwrap();
    }

    #[tokio::test]
    async fn test_other_failure_drops_and_reports_once() {
        let h = start(config()).await;
        h.client.fail_next_put(ClientError::Service {
            kind: "InvalidParameterException".to_string(),
            message: "events too old".to_string(),
        });

        h.handle.write(batch("bad")).unwrap();
        h.handle.write(batch("good")).unwrap();
        h.handle.flush().await.unwrap();
        h.reporter.wait().await;

        let reported = h.reported.lock().unwrap();
        assert_eq!(reported.len(), 1);
        match &reported[0] {
            LogError::Rejected { batch, source } => {
                assert_eq!(batch.events()[0].message(), "bad-1");
                assert!(matches!(source, ClientError::Service { .. }));
            }
            other => panic!("unexpected report: {other:?}"),
        }
        let accepted = h.client.accepted_events("app", "abc.0");
        assert_eq!(accepted.len(), 2);
        assert_eq!(accepted[0].message(), "good-1");
    }

    #[tokio::test]
    async fn test_retry_cap_drops_throttled_batch() {
        let h = start(StreamPoolConfig {
            max_retries: Some(1),
            max_streams: Some(1),
            ..config()
        })
        .await;
        for _ in 0..2 {
            h.client
                .fail_next_put(ClientError::Throttling("Rate exceeded".to_string()));
        }

        h.handle.write(batch("capped")).unwrap();
        h.handle.flush().await.unwrap();
        h.reporter.wait().await;

        let reported = h.reported.lock().unwrap();
        assert_eq!(reported.len(), 1);
        assert!(matches!(
            reported[0],
            LogError::RetriesExhausted { attempts: 2, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_delays_throttled_resubmission() {
        let h = start(StreamPoolConfig {
            retry_strategy: RetryStrategy::Backoff {
                base: Duration::from_secs(2),
                max: Duration::from_secs(10),
            },
            ..config()
        })
        .await;
        h.client
            .fail_next_put(ClientError::Throttling("Rate exceeded".to_string()));

        let started = tokio::time::Instant::now();
        h.handle.write(batch("slow")).unwrap();
        h.handle.flush().await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(h.client.all_accepted_events("app").len(), 2);
    }
}
