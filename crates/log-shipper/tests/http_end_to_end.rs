// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use log_shipper::{HttpClientConfig, HttpLogsClient, LogError, Logger, LoggerConfig};
use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};

fn target(operation: &str) -> String {
    format!("Logs_20140328.{operation}")
}

async fn mock_ok(server: &mut ServerGuard, operation: &str, hits: usize) -> mockito::Mock {
    server
        .mock("POST", "/")
        .match_header("X-Amz-Target", target(operation).as_str())
        .with_status(200)
        .with_body("{}")
        .expect(hits)
        .create_async()
        .await
}

#[tokio::test]
async fn three_messages_become_one_put() {
    let mut server = Server::new_async().await;
    let create_group = mock_ok(&mut server, "CreateLogGroup", 1).await;
    let retention = mock_ok(&mut server, "PutRetentionPolicy", 0).await;
    let create_stream = server
        .mock("POST", "/")
        .match_header("X-Amz-Target", target("CreateLogStream").as_str())
        .match_body(Matcher::AllOf(vec![
            Matcher::PartialJson(json!({"logGroupName": "app"})),
            Matcher::Regex(r#""logStreamName":"[0-9a-f]{64}\.0""#.to_string()),
        ]))
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;
    let put = server
        .mock("POST", "/")
        .match_header("X-Amz-Target", target("PutLogEvents").as_str())
        .match_body(Matcher::PartialJson(json!({
            "logGroupName": "app",
            "logEvents": [
                {"timestamp": 1_700_000_000_000_i64, "message": "a"},
                {"timestamp": 1_700_000_000_001_i64, "message": "b"},
                {"timestamp": 1_700_000_000_002_i64, "message": "c"}
            ]
        })))
        .with_status(200)
        .with_body(r#"{"nextSequenceToken":"49590"}"#)
        .expect(1)
        .create_async()
        .await;

    let client = HttpLogsClient::new(HttpClientConfig::new(server.url())).expect("client");
    let logger = Logger::new(LoggerConfig::new(Arc::new(client), "app"))
        .await
        .expect("logger");
    let base = UNIX_EPOCH + Duration::from_millis(1_700_000_000_000);
    for (offset, message) in ["a", "b", "c"].into_iter().enumerate() {
        logger.log(base + Duration::from_millis(offset as u64), message);
    }
    logger.close().await;

    create_group.assert_async().await;
    retention.assert_async().await;
    create_stream.assert_async().await;
    put.assert_async().await;
}

#[tokio::test]
async fn existing_group_and_oversize_event() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/")
        .match_header("X-Amz-Target", target("CreateLogGroup").as_str())
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
    let retention = mock_ok(&mut server, "PutRetentionPolicy", 0).await;
    mock_ok(&mut server, "CreateLogStream", 1).await;
    let put = server
        .mock("POST", "/")
        .match_header("X-Amz-Target", target("PutLogEvents").as_str())
        .match_body(Matcher::PartialJson(json!({
            "logEvents": [{"timestamp": 5, "message": "fits"}]
        })))
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;

    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    let client = HttpLogsClient::new(HttpClientConfig::new(server.url())).expect("client");
    let logger = Logger::new(LoggerConfig {
        retention_days: 30,
        error_reporter: Some(Arc::new(move |err: LogError| {
            sink.lock().expect("lock poisoned").push(err);
        })),
        ..LoggerConfig::new(Arc::new(client), "app")
    })
    .await
    .expect("logger");

    let oversize = "x".repeat(log_shipper::constants::MAX_EVENT_MESSAGE_BYTES + 1);
    logger.log(UNIX_EPOCH + Duration::from_millis(4), oversize);
    logger.log(UNIX_EPOCH + Duration::from_millis(5), "fits");
    logger.close().await;

    retention.assert_async().await;
    put.assert_async().await;
    let errors = errors.lock().expect("lock poisoned");
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], LogError::Oversize { .. }));
}
