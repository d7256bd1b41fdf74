// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Response;
use tracing::{debug, error};

use crate::constants::METRICS_ENDPOINT_PATH;
use crate::errors::SinkError;
use crate::report::MetricsReport;
use crate::sink::Sink;

pub struct FlusherConfig {
    pub url: String,
    pub timeout: Duration,
    pub compression_level: i32,
}

/// Ships report batches to the management server as zstd-compressed JSON.
///
/// A failed batch is reported to the caller and never retried.
#[derive(Clone)]
pub struct Flusher {
    client: reqwest::Client,
    endpoint: String,
    compression_level: i32,
}

impl Flusher {
    pub fn new(config: FlusherConfig) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SinkError::Transport(format!("failed to build http client: {e}")))?;

        Ok(Flusher {
            client,
            endpoint: format!(
                "{}{METRICS_ENDPOINT_PATH}",
                config.url.trim_end_matches('/')
            ),
            compression_level: config.compression_level,
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn encode(&self, reports: &[MetricsReport]) -> Result<Vec<u8>, SinkError> {
        let body = serde_json::to_vec(reports).map_err(|e| SinkError::Payload(e.to_string()))?;
        zstd::encode_all(body.as_slice(), self.compression_level)
            .map_err(|e| SinkError::Payload(format!("failed to compress payload: {e}")))
    }

    async fn ship(&self, reports: &[MetricsReport]) -> Result<Response, SinkError> {
        let body = self.encode(reports)?;
        self.client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("Content-Encoding", "zstd")
            .body(body)
            .send()
            .await
            .map_err(|e| match e.status() {
                Some(status) => SinkError::Destination(Some(status), e.to_string()),
                None => SinkError::Transport(e.to_string()),
            })
    }
}

#[async_trait]
impl Sink for Flusher {
    async fn send(&self, reports: Vec<MetricsReport>) -> Result<(), SinkError> {
        let n_reports = reports.len();
        debug!("Flushing {n_reports} reports to {}", self.endpoint);

        let resp = self.ship(&reports).await?;
        let status = resp.status();
        if status.is_success() {
            debug!("Successfully flushed {n_reports} reports");
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        error!("{status}: Failed to push reports: {body:?}");
        Err(SinkError::Destination(Some(status), body))
    }
}
