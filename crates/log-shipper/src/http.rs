// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! [`LogsClient`] over the service's JSON 1.1 RPC protocol.
//!
//! Every operation is a `POST /` with an `X-Amz-Target` header naming it and
//! a JSON body. Failures come back as a non-2xx status with a `__type` field
//! (sometimes namespaced as `prefix#Name`, sometimes only present in the
//! `x-amzn-ErrorType` header) which is mapped onto [`ClientError`].
//!
//! Requests are not signed. Point the endpoint at a signing proxy or a local
//! emulator.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::client::{ClientError, LogsClient};
use crate::event::LogEvent;

const TARGET_PREFIX: &str = "Logs_20140328";
const CONTENT_TYPE_JSON_1_1: &str = "application/x-amz-json-1.1";
const ERROR_TYPE_HEADER: &str = "x-amzn-ErrorType";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Base URL, e.g. `https://logs.us-east-1.amazonaws.com`.
    pub endpoint: String,
    pub timeout: Duration,
    pub https_proxy: Option<String>,
}

impl HttpClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout: DEFAULT_TIMEOUT,
            https_proxy: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpLogsClient {
    client: reqwest::Client,
    url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GroupRequest<'a> {
    log_group_name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RetentionRequest<'a> {
    log_group_name: &'a str,
    retention_in_days: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StreamRequest<'a> {
    log_group_name: &'a str,
    log_stream_name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PutLogEventsRequest<'a> {
    log_group_name: &'a str,
    log_stream_name: &'a str,
    log_events: &'a [LogEvent],
    #[serde(skip_serializing_if = "Option::is_none")]
    sequence_token: Option<&'a str>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct PutLogEventsResponse {
    next_sequence_token: Option<String>,
    rejected_log_events_info: Option<RejectedLogEventsInfo>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RejectedLogEventsInfo {
    too_new_log_event_start_index: Option<i64>,
    too_old_log_event_end_index: Option<i64>,
    expired_log_event_end_index: Option<i64>,
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(rename = "__type")]
    kind: Option<String>,
    #[serde(alias = "Message")]
    message: Option<String>,
    #[serde(rename = "expectedSequenceToken")]
    expected_sequence_token: Option<String>,
}

impl HttpLogsClient {
    pub fn new(config: HttpClientConfig) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_JSON_1_1));

        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers);
        if let Some(proxy) = &config.https_proxy {
            let proxy = reqwest::Proxy::https(proxy)
                .map_err(|e| ClientError::Transport(format!("invalid proxy {proxy}: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| ClientError::Transport(format!("failed to build HTTP client: {e}")))?;

        let url = format!("{}/", config.endpoint.trim_end_matches('/'));
        Ok(Self { client, url })
    }

    async fn call<T: Serialize>(&self, operation: &str, body: &T) -> Result<Vec<u8>, ClientError> {
        let payload = serde_json::to_vec(body)
            .map_err(|e| ClientError::Transport(format!("failed to encode {operation}: {e}")))?;

        let resp = self
            .client
            .post(&self.url)
            .header("X-Amz-Target", format!("{TARGET_PREFIX}.{operation}"))
            .body(payload)
            .send()
            .await
            .map_err(|e| ClientError::Transport(format!("{operation}: {e}")))?;

        let status = resp.status();
        let error_type = resp
            .headers()
            .get(ERROR_TYPE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ClientError::Transport(format!("{operation}: {e}")))?;

        if status.is_success() {
            debug!("LOGS | {operation} succeeded with {status}");
            return Ok(bytes.to_vec());
        }

        Err(classify(status, error_type, &bytes))
    }
}

/// Maps an error response onto a [`ClientError`].
fn classify(status: reqwest::StatusCode, header_type: Option<String>, body: &[u8]) -> ClientError {
    let parsed: ErrorBody = serde_json::from_slice(body).unwrap_or_default();
    let raw_kind = parsed
        .kind
        .or(header_type)
        .unwrap_or_else(|| format!("HTTP {status}"));
    let kind = short_error_name(&raw_kind).to_string();
    let message = parsed
        .message
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned());
    let expected = parsed.expected_sequence_token;

    match kind.as_str() {
        "ResourceAlreadyExistsException" => ClientError::ResourceAlreadyExists(message),
        "InvalidSequenceTokenException" => ClientError::InvalidSequenceToken { expected, message },
        "DataAlreadyAcceptedException" => ClientError::DataAlreadyAccepted { expected, message },
        "ThrottlingException" => ClientError::Throttling(message),
        _ => ClientError::Service { kind, message },
    }
}

/// `com.amazonaws.logs#ThrottlingException:http://...` -> `ThrottlingException`
fn short_error_name(raw: &str) -> &str {
    let name = raw.rsplit('#').next().unwrap_or(raw);
    name.split(':').next().unwrap_or(name)
}

#[async_trait]
impl LogsClient for HttpLogsClient {
    async fn create_log_group(&self, group: &str) -> Result<(), ClientError> {
        self.call(
            "CreateLogGroup",
            &GroupRequest {
                log_group_name: group,
            },
        )
        .await
        .map(|_| ())
    }

    async fn put_retention_policy(&self, group: &str, days: u32) -> Result<(), ClientError> {
        self.call(
            "PutRetentionPolicy",
            &RetentionRequest {
                log_group_name: group,
                retention_in_days: days,
            },
        )
        .await
        .map(|_| ())
    }

    async fn create_log_stream(&self, group: &str, stream: &str) -> Result<(), ClientError> {
        self.call(
            "CreateLogStream",
            &StreamRequest {
                log_group_name: group,
                log_stream_name: stream,
            },
        )
        .await
        .map(|_| ())
    }

    async fn put_log_events(
        &self,
        group: &str,
        stream: &str,
        events: &[LogEvent],
        sequence_token: Option<&str>,
    ) -> Result<Option<String>, ClientError> {
        let body = self
            .call(
                "PutLogEvents",
                &PutLogEventsRequest {
                    log_group_name: group,
                    log_stream_name: stream,
                    log_events: events,
                    sequence_token,
                },
            )
            .await?;

        // The events are stored once the call succeeds. A body we cannot read
        // only costs the next token, which the following submit recovers.
        let response: PutLogEventsResponse = if body.is_empty() {
            PutLogEventsResponse::default()
        } else {
            match serde_json::from_slice(&body) {
                Ok(response) => response,
                Err(e) => {
                    warn!("LOGS | Unreadable PutLogEvents response for {stream}: {e}");
                    PutLogEventsResponse::default()
                }
            }
        };

        if let Some(rejected) = response.rejected_log_events_info {
            warn!("LOGS | Service rejected some events in {stream}: {rejected:?}");
        }
        Ok(response.next_sequence_token)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn client_for(server: &Server) -> HttpLogsClient {
        HttpLogsClient::new(HttpClientConfig::new(server.url())).unwrap()
    }

    #[test]
    fn test_short_error_name() {
        assert_eq!(
            short_error_name("com.amazonaws.logs#ThrottlingException"),
            "ThrottlingException"
        );
        assert_eq!(
            short_error_name("ThrottlingException:http://internal.amazon.com/"),
            "ThrottlingException"
        );
        assert_eq!(short_error_name("Plain"), "Plain");
    }

    #[test]
    fn test_classify_variants() {
        let status = reqwest::StatusCode::BAD_REQUEST;
        let body = json!({
            "__type": "InvalidSequenceTokenException",
            "message": "bad token",
            "expectedSequenceToken": "49590"
        })
        .to_string();
        assert_eq!(
            classify(status, None, body.as_bytes()),
            ClientError::InvalidSequenceToken {
                expected: Some("49590".to_string()),
                message: "bad token".to_string(),
            }
        );

        assert_eq!(
            classify(
                status,
                Some("DataAlreadyAcceptedException".to_string()),
                b"{}"
            ),
            ClientError::DataAlreadyAccepted {
                expected: None,
                message: "{}".to_string(),
            }
        );

        assert!(matches!(
            classify(
                reqwest::StatusCode::SERVICE_UNAVAILABLE,
                None,
                b"upstream down"
            ),
            ClientError::Service { ref kind, ref message }
                if kind == "HTTP 503 Service Unavailable" && message == "upstream down"
        ));
    }

    #[tokio::test]
    async fn test_put_log_events_sends_protocol_request() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_header("X-Amz-Target", "Logs_20140328.PutLogEvents")
            .match_header("Content-Type", CONTENT_TYPE_JSON_1_1)
            .match_body(Matcher::Json(json!({
                "logGroupName": "app",
                "logStreamName": "s.0",
                "logEvents": [
                    {"timestamp": 1, "message": "a"},
                    {"timestamp": 2, "message": "b"}
                ],
                "sequenceToken": "t0"
            })))
            .with_status(200)
            .with_body(r#"{"nextSequenceToken":"t1"}"#)
            .create_async()
            .await;

        let token = client_for(&server)
            .put_log_events(
                "app",
                "s.0",
                &[LogEvent::new(1, "a"), LogEvent::new(2, "b")],
                Some("t0"),
            )
            .await
            .unwrap();

        assert_eq!(token.as_deref(), Some("t1"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_first_put_omits_sequence_token() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_body(Matcher::Json(json!({
                "logGroupName": "app",
                "logStreamName": "s.0",
                "logEvents": [{"timestamp": 1, "message": "a"}]
            })))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let token = client_for(&server)
            .put_log_events("app", "s.0", &[LogEvent::new(1, "a")], None)
            .await
            .unwrap();
        assert!(token.is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unreadable_success_body_is_still_delivered() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_header("X-Amz-Target", "Logs_20140328.PutLogEvents")
            .with_status(200)
            .with_body("<html>ok</html>")
            .create_async()
            .await;

        let token = client_for(&server)
            .put_log_events("app", "s.0", &[LogEvent::new(1, "a")], Some("t0"))
            .await
            .unwrap();
        assert!(token.is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_errors_are_typed() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/")
            .match_header("X-Amz-Target", "Logs_20140328.CreateLogGroup")
            .with_status(400)
            .with_body(
                json!({
                    "__type": "com.amazonaws.logs#ResourceAlreadyExistsException",
                    "message": "The specified log group already exists"
                })
                .to_string(),
            )
            .create_async()
            .await;
        server
            .mock("POST", "/")
            .match_header("X-Amz-Target", "Logs_20140328.PutLogEvents")
            .with_status(400)
            .with_header(ERROR_TYPE_HEADER, "ThrottlingException")
            .with_body(r#"{"message":"Rate exceeded"}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        assert!(matches!(
            client.create_log_group("app").await,
            Err(ClientError::ResourceAlreadyExists(_))
        ));
        assert_eq!(
            client
                .put_log_events("app", "s.0", &[LogEvent::new(1, "a")], None)
                .await
                .unwrap_err(),
            ClientError::Throttling("Rate exceeded".to_string())
        );
    }

    #[tokio::test]
    async fn test_retention_request_body() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_header("X-Amz-Target", "Logs_20140328.PutRetentionPolicy")
            .match_body(Matcher::Json(json!({
                "logGroupName": "app",
                "retentionInDays": 14
            })))
            .with_status(200)
            .create_async()
            .await;

        client_for(&server)
            .put_retention_policy("app", 14)
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let client = HttpLogsClient::new(HttpClientConfig {
            timeout: Duration::from_millis(200),
            ..HttpClientConfig::new("http://127.0.0.1:1")
        })
        .unwrap();
        assert!(matches!(
            client.create_log_stream("app", "s.0").await,
            Err(ClientError::Transport(_))
        ));
    }
}
