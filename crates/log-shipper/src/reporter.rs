// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Debug;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::error;

use crate::error::LogError;

/// Hook invoked once per permanently dropped event or batch.
///
/// It runs on a blocking worker, never on the task that dropped the data, and
/// may be invoked concurrently from several workers.
pub type ErrorReporter = Arc<dyn Fn(LogError) + Send + Sync>;

/// Dispatches failures to the configured [`ErrorReporter`] without blocking
/// the caller, and lets shutdown wait for every dispatched call.
#[derive(Clone)]
pub struct Reporter {
    hook: Option<ErrorReporter>,
    tracker: TaskTracker,
}

impl Reporter {
    pub fn new(hook: Option<ErrorReporter>) -> Self {
        Self {
            hook,
            tracker: TaskTracker::new(),
        }
    }

    pub fn report(&self, err: LogError) {
        error!("LOGS | Dropping log data: {err}");
        let Some(hook) = self.hook.clone() else {
            return;
        };
        self.tracker.spawn_blocking(move || hook(err));
    }

    /// Waits for every hook call reported so far. Reports made afterwards are
    /// still dispatched.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

impl Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter")
            .field("hook", &self.hook.is_some())
            .field("pending", &self.tracker.len())
            .finish()
    }
}
