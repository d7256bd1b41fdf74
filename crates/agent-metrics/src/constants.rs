// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Capacity of the channel shared by all sources during one collection tick.
pub const SAMPLE_BUFFER_CAPACITY: usize = 4096;

/// Added to the report interval so flushes never line up with collection ticks.
pub const REPORT_STAGGER: Duration = Duration::from_millis(5555);

pub const DEFAULT_COLLECTION_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_BULK_SIZE: usize = 20;
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

pub const METRICS_ENDPOINT_PATH: &str = "/api/v1/metrics";
