// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Reliable log shipping to a remote log group.
//!
//! ```text
//!   Logger::log ─▶ batcher service ─▶ forwarder ─▶ stream pool ─▶ writer per stream ─▶ service
//! ```
//!
//! Events are batched within the service's per-call limits and spread over a
//! growing set of streams. Throttling grows the pool, sequence token conflicts
//! are retried on the same stream, and anything else drops the batch and hands
//! it to the configured error reporter.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod batcher;
pub mod batcher_service;
pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod http;
pub mod logger;
pub mod memory;
pub mod pool;
pub mod reporter;
pub mod stream;

pub use batcher::{Batch, BatchLimits};
pub use client::{ClientError, LogsClient};
pub use config::{LoggerConfig, RetryStrategy};
pub use error::{LogError, LoggerError};
pub use event::LogEvent;
pub use http::{HttpClientConfig, HttpLogsClient};
pub use logger::Logger;
pub use memory::InMemoryLogsClient;
pub use reporter::ErrorReporter;
