// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use tracing::{debug, info};

use crate::errors::SinkError;
use crate::report::MetricsReport;

/// Destination of finished reports. Callers log failures and move on.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn send(&self, reports: Vec<MetricsReport>) -> Result<(), SinkError>;
}

/// Writes every report to the log. Used when no server is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl Sink for LogSink {
    async fn send(&self, reports: Vec<MetricsReport>) -> Result<(), SinkError> {
        for report in &reports {
            info!(
                "{} report with {} entities at {}",
                report.report_type,
                report.entities.len(),
                report.timestamp
            );
            let payload = serde_json::to_string(report)
                .map_err(|e| SinkError::Payload(e.to_string()))?;
            debug!("{payload}");
        }
        Ok(())
    }
}
