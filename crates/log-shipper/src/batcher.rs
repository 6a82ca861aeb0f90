// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Accumulation of individual log events into batches the remote service accepts.
//!
//! # Batching Strategy
//!
//! The batcher keeps one open batch. Each incoming event is checked against
//! the open batch before it is appended; the batch is sealed first if the
//! event would break any of:
//! 1. **Count limit**: events per call (10,000)
//! 2. **Size limit**: accounted bytes per call (1 MiB, 26 bytes overhead per event)
//! 3. **Span limit**: distance between oldest and newest event (24 hours)
//! 4. **Ordering**: an event older than its predecessor starts a new batch,
//!    so submission order is kept and every batch stays non-decreasing
//!
//! There is no timer. An open batch waits until a limit seals it or
//! [`Batcher::seal`] is called.
//!
//! Events larger than the size limit on their own are rejected with
//! [`LogError::Oversize`] and never reach a batch.

use std::time::Duration;

use crate::constants;
use crate::error::LogError;
use crate::event::LogEvent;

/// Per-call limits a batch must respect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_events: usize,
    pub max_bytes: usize,
    pub max_span: Duration,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_events: constants::MAX_BATCH_EVENTS,
            max_bytes: constants::MAX_BATCH_SIZE_BYTES,
            max_span: constants::MAX_BATCH_SPAN,
        }
    }
}

impl BatchLimits {
    /// Largest accounted event size that can still be shipped alone.
    #[must_use]
    pub fn max_event_bytes(&self) -> usize {
        self.max_bytes
    }

    fn max_span_millis(&self) -> i64 {
        i64::try_from(self.max_span.as_millis()).unwrap_or(i64::MAX)
    }
}

/// An ordered group of events submitted together in one call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    events: Vec<LogEvent>,
    size_bytes: usize,
}

impl Batch {
    #[must_use]
    pub fn events(&self) -> &[LogEvent] {
        &self.events
    }

    #[must_use]
    pub fn into_events(self) -> Vec<LogEvent> {
        self.events
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Accounted size, overhead included.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Milliseconds between the first and the last event.
    #[must_use]
    pub fn span_millis(&self) -> i64 {
        match (self.events.first(), self.events.last()) {
            (Some(first), Some(last)) => last
                .timestamp_millis()
                .saturating_sub(first.timestamp_millis()),
            _ => 0,
        }
    }

    fn push(&mut self, event: LogEvent) {
        self.size_bytes += event.size();
        self.events.push(event);
    }
}

#[cfg(test)]
impl From<Vec<LogEvent>> for Batch {
    fn from(events: Vec<LogEvent>) -> Self {
        let mut batch = Batch::default();
        for event in events {
            batch.push(event);
        }
        batch
    }
}

/// Single-owner batch builder. Not thread safe; the batcher service owns one.
#[derive(Debug, Default)]
pub struct Batcher {
    limits: BatchLimits,
    open: Batch,
}

impl Batcher {
    #[must_use]
    pub fn new(limits: BatchLimits) -> Self {
        Self {
            limits,
            open: Batch::default(),
        }
    }

    /// Adds an event to the open batch.
    ///
    /// Returns the previously open batch when `event` could not join it.
    pub fn push(&mut self, event: LogEvent) -> Result<Option<Batch>, LogError> {
        let size = event.size();
        if size > self.limits.max_event_bytes() {
            return Err(LogError::Oversize {
                event,
                size,
                limit: self.limits.max_event_bytes(),
            });
        }

        let sealed = if self.fits(&event) {
            None
        } else {
            self.seal()
        };
        self.open.push(event);
        Ok(sealed)
    }

    /// Seals the open batch. Returns `None` when nothing is pending.
    pub fn seal(&mut self) -> Option<Batch> {
        if self.open.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.open))
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.open.len()
    }

    fn fits(&self, event: &LogEvent) -> bool {
        let (Some(first), Some(last)) = (self.open.events.first(), self.open.events.last()) else {
            return true;
        };

        self.open.len() < self.limits.max_events
            && self.open.size_bytes + event.size() <= self.limits.max_bytes
            && event.timestamp_millis() >= last.timestamp_millis()
            && event
                .timestamp_millis()
                .saturating_sub(first.timestamp_millis())
                <= self.limits.max_span_millis()
    }
}
