// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod config;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use log_shipper::{HttpLogsClient, LogError, Logger, LoggerConfig};

use crate::config::StdinConfig;

#[tokio::main]
pub async fn main() -> ExitCode {
    let config = match StdinConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error creating config on log shipper startup: {e}");
            return ExitCode::FAILURE;
        }
    };

    let env_filter = format!(
        "h2=off,hyper=off,rustls=off,reqwest=off,{}",
        config.log_level
    );

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .with_writer(std::io::stderr)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let client = match HttpLogsClient::new(config.http_client_config()) {
        Ok(c) => c,
        Err(e) => {
            error!("Error creating log service client: {e}");
            return ExitCode::FAILURE;
        }
    };

    let logger = match Logger::new(LoggerConfig {
        retention_days: config.retention_days,
        error_reporter: Some(Arc::new(|err: LogError| {
            error!("LOGS | Dropped: {err}");
        })),
        ..LoggerConfig::new(Arc::new(client), config.log_group.clone())
    })
    .await
    {
        Ok(l) => l,
        Err(e) => {
            error!("Error starting logger for {}: {e}", config.log_group);
            return ExitCode::FAILURE;
        }
    };
    info!(
        "Shipping stdin to {} under session {}",
        logger.log_group_name(),
        logger.session_prefix()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut shipped: u64 = 0;
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    logger.log(SystemTime::now(), line);
                    shipped += 1;
                }
                Ok(None) => {
                    debug!("Reached end of stdin");
                    break;
                }
                Err(e) => {
                    error!("Failed to read stdin: {e}");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, draining pending lines");
                break;
            }
        }
    }

    logger.close().await;
    info!("Shipped {shipped} lines");
    ExitCode::SUCCESS
}
