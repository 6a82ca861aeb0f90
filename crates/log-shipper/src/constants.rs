// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Hard limits enforced by the remote log service on a single PutLogEvents call.
//!
//! The service accounts every event as its UTF-8 message length plus a fixed
//! overhead. A batch is rejected outright if any of these limits is exceeded,
//! so the batcher never emits a batch that violates them.

use std::time::Duration;

/// Bytes the service adds to every event when computing a batch size.
pub const EVENT_OVERHEAD_BYTES: usize = 26;

/// Maximum accounted size of one PutLogEvents call (1 MiB).
pub const MAX_BATCH_SIZE_BYTES: usize = 1_048_576;

/// Largest message that fits in a call on its own: 1,048,550 bytes.
pub const MAX_EVENT_MESSAGE_BYTES: usize = MAX_BATCH_SIZE_BYTES - EVENT_OVERHEAD_BYTES;

/// Maximum number of events in one PutLogEvents call.
pub const MAX_BATCH_EVENTS: usize = 10_000;

/// Maximum distance between the oldest and newest event of a batch.
pub const MAX_BATCH_SPAN: Duration = Duration::from_secs(24 * 60 * 60);

/// Retention values (in days) accepted by PutRetentionPolicy.
pub const VALID_RETENTION_DAYS: [u32; 22] = [
    1, 3, 5, 7, 14, 30, 60, 90, 120, 150, 180, 365, 400, 545, 731, 1096, 1827, 2192, 2557, 2922,
    3288, 3653,
];

/// Length of the random session prefix in bytes, before hex encoding.
pub(crate) const SESSION_PREFIX_BYTES: usize = 32;

/// Upper bound on a log group name length.
pub(crate) const MAX_LOG_GROUP_NAME_LEN: usize = 512;
