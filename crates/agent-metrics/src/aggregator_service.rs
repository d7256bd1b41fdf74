// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::aggregator::Aggregator;
use crate::report::MetricsReport;
use crate::sample::{ReportType, Sample};

#[derive(Debug)]
pub enum AggregatorCommand {
    SaveBatch(ReportType, Vec<Sample>),
    Flush(oneshot::Sender<Vec<MetricsReport>>),
    Clear,
    Shutdown,
}

/// Cheap to clone; every clone talks to the same service.
#[derive(Clone)]
pub struct AggregatorHandle {
    tx: mpsc::UnboundedSender<AggregatorCommand>,
}

impl AggregatorHandle {
    pub fn save_batch(
        &self,
        report_type: ReportType,
        samples: Vec<Sample>,
    ) -> Result<(), mpsc::error::SendError<AggregatorCommand>> {
        self.tx
            .send(AggregatorCommand::SaveBatch(report_type, samples))
    }

    /// Reduces and resets every category with pending data.
    pub async fn flush(&self) -> Result<Vec<MetricsReport>, String> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(AggregatorCommand::Flush(response_tx))
            .map_err(|e| format!("Failed to send flush command: {e}"))?;

        response_rx
            .await
            .map_err(|e| format!("Failed to receive flush response: {e}"))
    }

    pub fn clear(&self) -> Result<(), mpsc::error::SendError<AggregatorCommand>> {
        self.tx.send(AggregatorCommand::Clear)
    }

    pub fn shutdown(&self) -> Result<(), mpsc::error::SendError<AggregatorCommand>> {
        self.tx.send(AggregatorCommand::Shutdown)
    }
}

/// Serializes every fold and reduction through a single command loop.
pub struct AggregatorService {
    aggregator: Aggregator,
    rx: mpsc::UnboundedReceiver<AggregatorCommand>,
}

impl AggregatorService {
    #[must_use]
    pub fn new() -> (Self, AggregatorHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = Self {
            aggregator: Aggregator::new(),
            rx,
        };
        (service, AggregatorHandle { tx })
    }

    pub async fn run(mut self) {
        debug!("Aggregator service started");

        while let Some(command) = self.rx.recv().await {
            match command {
                AggregatorCommand::SaveBatch(report_type, samples) => {
                    debug!(
                        "Saving {} samples into the {report_type} collection",
                        samples.len()
                    );
                    self.aggregator.save_batch(report_type, samples);
                }

                AggregatorCommand::Flush(response_tx) => {
                    let reports = self.aggregator.reduce_all();
                    if response_tx.send(reports).is_err() {
                        error!("Failed to send flush response - receiver dropped");
                    }
                }

                AggregatorCommand::Clear => {
                    self.aggregator.clear();
                }

                AggregatorCommand::Shutdown => {
                    debug!("Aggregator service shutting down");
                    break;
                }
            }
        }

        debug!("Aggregator service stopped");
    }
}
