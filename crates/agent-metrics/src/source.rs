// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::MetricsConfig;
use crate::errors::SourceError;
use crate::sample::TypedSample;

/// Anything that can produce samples for a collection tick.
///
/// `collect` sends zero or more samples into `tx` and should return before
/// `deadline`. The scheduler drops any call still running at the deadline, so
/// an implementation never needs to enforce it itself.
///
/// `id` identifies the measured entity. Two sources with the same id are the
/// same source as far as membership updates are concerned.
#[async_trait]
pub trait Source: Send + Sync {
    fn id(&self) -> &str;

    async fn collect(
        &self,
        deadline: Instant,
        tx: mpsc::Sender<TypedSample>,
    ) -> Result<(), SourceError>;

    fn reconfigure(&self, _config: &MetricsConfig) {}

    fn stop(&self) {}
}
