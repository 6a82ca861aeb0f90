// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-process simulator of the remote log service.
//!
//! It validates sequence tokens the way the service does, journals every call
//! in arrival order, and can be scripted to fail upcoming calls. Hosts can use
//! it for dry runs; the test suites use it to drive recovery paths.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use crate::client::{ClientError, LogsClient};
use crate::event::LogEvent;

/// One call received by the simulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateLogGroup {
        group: String,
    },
    PutRetentionPolicy {
        group: String,
        days: u32,
    },
    CreateLogStream {
        group: String,
        stream: String,
    },
    PutLogEvents {
        group: String,
        stream: String,
        events: Vec<LogEvent>,
        sequence_token: Option<String>,
    },
}

#[derive(Debug, Default)]
struct StreamState {
    expected_token: Option<String>,
    events: Vec<LogEvent>,
}

#[derive(Debug, Default)]
struct State {
    groups: HashSet<String>,
    streams: HashMap<(String, String), StreamState>,
    calls: Vec<Call>,
    put_failures: VecDeque<ClientError>,
    create_group_failures: VecDeque<ClientError>,
    create_stream_failures: VecDeque<ClientError>,
    tokens_issued: u64,
}

#[derive(Debug, Default)]
pub struct InMemoryLogsClient {
    state: Mutex<State>,
}

impl InMemoryLogsClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretends `group` was created by someone else before this client was used.
    #[must_use]
    pub fn with_existing_group(self, group: &str) -> Self {
        self.lock().groups.insert(group.to_string());
        self
    }

    /// The next PutLogEvents call fails with `err` before any token check.
    pub fn fail_next_put(&self, err: ClientError) {
        self.lock().put_failures.push_back(err);
    }

    pub fn fail_next_create_group(&self, err: ClientError) {
        self.lock().create_group_failures.push_back(err);
    }

    pub fn fail_next_create_stream(&self, err: ClientError) {
        self.lock().create_stream_failures.push_back(err);
    }

    /// Changes the token the service expects next on `stream`, as if another
    /// writer had put events into it.
    pub fn set_expected_token(&self, group: &str, stream: &str, token: &str) {
        self.lock()
            .streams
            .entry((group.to_string(), stream.to_string()))
            .or_default()
            .expected_token = Some(token.to_string());
    }

    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Every PutLogEvents call, accepted or not, in arrival order.
    #[must_use]
    pub fn put_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, Call::PutLogEvents { .. }))
            .collect()
    }

    /// Stream names created in `group`, sorted.
    #[must_use]
    pub fn streams(&self, group: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock()
            .streams
            .keys()
            .filter(|(g, _)| g == group)
            .map(|(_, s)| s.clone())
            .collect();
        names.sort();
        names
    }

    /// Events accepted into one stream, in acceptance order.
    #[must_use]
    pub fn accepted_events(&self, group: &str, stream: &str) -> Vec<LogEvent> {
        self.lock()
            .streams
            .get(&(group.to_string(), stream.to_string()))
            .map(|s| s.events.clone())
            .unwrap_or_default()
    }

    /// Events accepted into any stream of `group`.
    #[must_use]
    pub fn all_accepted_events(&self, group: &str) -> Vec<LogEvent> {
        let state = self.lock();
        let mut keys: Vec<&(String, String)> =
            state.streams.keys().filter(|(g, _)| g == group).collect();
        keys.sort();
        keys.into_iter()
            .flat_map(|key| state.streams[key].events.clone())
            .collect()
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("lock poisoned")
    }
}

#[async_trait]
impl LogsClient for InMemoryLogsClient {
    async fn create_log_group(&self, group: &str) -> Result<(), ClientError> {
        let mut state = self.lock();
        state.calls.push(Call::CreateLogGroup {
            group: group.to_string(),
        });
        if let Some(err) = state.create_group_failures.pop_front() {
            return Err(err);
        }
        if !state.groups.insert(group.to_string()) {
            return Err(ClientError::ResourceAlreadyExists(format!(
                "The specified log group already exists: {group}"
            )));
        }
        Ok(())
    }

    async fn put_retention_policy(&self, group: &str, days: u32) -> Result<(), ClientError> {
        let mut state = self.lock();
        state.calls.push(Call::PutRetentionPolicy {
            group: group.to_string(),
            days,
        });
        if !state.groups.contains(group) {
            return Err(resource_not_found("log group", group));
        }
        Ok(())
    }

    async fn create_log_stream(&self, group: &str, stream: &str) -> Result<(), ClientError> {
        let mut state = self.lock();
        state.calls.push(Call::CreateLogStream {
            group: group.to_string(),
            stream: stream.to_string(),
        });
        if let Some(err) = state.create_stream_failures.pop_front() {
            return Err(err);
        }
        if !state.groups.contains(group) {
            return Err(resource_not_found("log group", group));
        }
        let key = (group.to_string(), stream.to_string());
        if state.streams.contains_key(&key) {
            return Err(ClientError::ResourceAlreadyExists(format!(
                "The specified log stream already exists: {stream}"
            )));
        }
        state.streams.insert(key, StreamState::default());
        Ok(())
    }

    async fn put_log_events(
        &self,
        group: &str,
        stream: &str,
        events: &[LogEvent],
        sequence_token: Option<&str>,
    ) -> Result<Option<String>, ClientError> {
        let mut state = self.lock();
        state.calls.push(Call::PutLogEvents {
            group: group.to_string(),
            stream: stream.to_string(),
            events: events.to_vec(),
            sequence_token: sequence_token.map(str::to_string),
        });
        if let Some(err) = state.put_failures.pop_front() {
            return Err(err);
        }

        state.tokens_issued += 1;
        let next_token = format!("{:056}", state.tokens_issued);
        let Some(target) = state
            .streams
            .get_mut(&(group.to_string(), stream.to_string()))
        else {
            return Err(resource_not_found("log stream", stream));
        };

        if target.expected_token.as_deref() != sequence_token {
            return Err(ClientError::InvalidSequenceToken {
                expected: target.expected_token.clone(),
                message: format!(
                    "The given sequenceToken is invalid. The next expected sequenceToken is: {}",
                    target.expected_token.as_deref().unwrap_or("null")
                ),
            });
        }

        target.events.extend_from_slice(events);
        target.expected_token = Some(next_token.clone());
        Ok(Some(next_token))
    }
}

fn resource_not_found(what: &str, name: &str) -> ClientError {
    ClientError::Service {
        kind: "ResourceNotFoundException".to_string(),
        message: format!("The specified {what} does not exist: {name}"),
    }
}
