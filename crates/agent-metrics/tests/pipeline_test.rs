// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_metrics::config::metrics_mode::MetricsMode;
use agent_metrics::config::MetricsConfig;
use agent_metrics::errors::{SinkError, SourceError};
use agent_metrics::pipeline::{MetricsPipeline, PipelineHandle};
use agent_metrics::report::MetricsReport;
use agent_metrics::sample::{Dimensions, ReportType, Sample, SimpleMetric, TypedSample};
use agent_metrics::sink::Sink;
use agent_metrics::source::Source;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

/// Emits `system.load.1` with values 5, 7, 9, ... on consecutive ticks.
#[derive(Default)]
struct LoadSource {
    collections: AtomicUsize,
    reconfigured: AtomicUsize,
    stopped: AtomicBool,
}

#[async_trait]
impl Source for LoadSource {
    fn id(&self) -> &str {
        "load"
    }

    async fn collect(
        &self,
        _deadline: Instant,
        tx: mpsc::Sender<TypedSample>,
    ) -> Result<(), SourceError> {
        let n = self.collections.fetch_add(1, Ordering::SeqCst);
        let value = 5.0 + 2.0 * n as f64;
        let sample = Sample::new(
            Dimensions::new([("hostname", "test-host")]),
            vec![SimpleMetric::new("system.load.1", value)],
        );
        tx.send(TypedSample::new(ReportType::System, sample))
            .await
            .map_err(|e| SourceError::Stopped(e.to_string()))
    }

    fn reconfigure(&self, _config: &MetricsConfig) {
        self.reconfigured.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct RecordingSink {
    batches: Mutex<Vec<Vec<MetricsReport>>>,
}

impl RecordingSink {
    fn batches(&self) -> Vec<Vec<MetricsReport>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    async fn send(&self, reports: Vec<MetricsReport>) -> Result<(), SinkError> {
        self.batches.lock().unwrap().push(reports);
        Ok(())
    }
}

fn load_value(report: &MetricsReport) -> Option<f64> {
    report
        .entity(&Dimensions::new([("hostname", "test-host")]))
        .and_then(|entity| entity.measurement("system.load.1"))
}

fn start(config: MetricsConfig, sink: Arc<RecordingSink>) -> (PipelineHandle, JoinHandle<()>) {
    let cancel = CancellationToken::new();
    let (pipeline, handle) = MetricsPipeline::new(&config, sink, &cancel);
    (handle, tokio::spawn(pipeline.run()))
}

fn config(mode: MetricsMode, bulk_size: usize) -> MetricsConfig {
    MetricsConfig {
        collection_interval: Duration::from_secs(10),
        report_interval: Duration::from_secs(20),
        bulk_size,
        mode,
    }
}

#[tokio::test(start_paused = true)]
async fn test_aggregated_pipeline_reports_average_per_period() {
    let sink = Arc::new(RecordingSink::default());
    let source = Arc::new(LoadSource::default());
    let (handle, task) = start(config(MetricsMode::Aggregated, 20), sink.clone());

    handle.sources_changed(vec![source.clone()]).unwrap();
    handle.handshake_completed().unwrap();

    // collections at 10s and 20s, report fires at 25.555s
    sleep(Duration::from_secs(25)).await;
    assert!(sink.batches().is_empty());
    assert_eq!(source.collections.load(Ordering::SeqCst), 2);

    sleep(Duration::from_secs(1)).await;
    let batches = sink.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 1);
    assert_eq!(batches[0][0].report_type, ReportType::System);
    assert_eq!(load_value(&batches[0][0]), Some(6.0));

    handle.shutdown().unwrap();
    task.await.unwrap();
    assert!(source.stopped.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_streaming_pipeline_sends_full_bulks() {
    let sink = Arc::new(RecordingSink::default());
    let source = Arc::new(LoadSource::default());
    let (handle, task) = start(config(MetricsMode::Streaming, 2), sink.clone());

    handle.sources_changed(vec![source.clone()]).unwrap();
    handle.handshake_completed().unwrap();

    sleep(Duration::from_secs(15)).await;
    assert!(sink.batches().is_empty());

    sleep(Duration::from_secs(6)).await;
    let batches = sink.batches();
    assert_eq!(batches.len(), 1);
    let values: Vec<_> = batches[0].iter().map(load_value).collect();
    assert_eq!(values, vec![Some(5.0), Some(7.0)]);

    handle.shutdown().unwrap();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_nothing_is_collected_before_handshake() {
    let sink = Arc::new(RecordingSink::default());
    let source = Arc::new(LoadSource::default());
    let (handle, task) = start(config(MetricsMode::Streaming, 1), sink.clone());

    handle.sources_changed(vec![source.clone()]).unwrap();
    sleep(Duration::from_secs(60)).await;
    assert_eq!(source.collections.load(Ordering::SeqCst), 0);
    assert!(sink.batches().is_empty());

    handle.handshake_completed().unwrap();
    sleep(Duration::from_millis(10_500)).await;
    assert_eq!(source.collections.load(Ordering::SeqCst), 1);
    assert_eq!(sink.batches().len(), 1);

    handle.shutdown().unwrap();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_nothing_is_collected_without_sources() {
    let sink = Arc::new(RecordingSink::default());
    let (handle, task) = start(config(MetricsMode::Streaming, 1), sink.clone());

    handle.handshake_completed().unwrap();
    sleep(Duration::from_secs(60)).await;
    assert!(sink.batches().is_empty());

    handle.shutdown().unwrap();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_config_change_applies_at_next_report_fire() {
    let sink = Arc::new(RecordingSink::default());
    let source = Arc::new(LoadSource::default());
    let (handle, task) = start(config(MetricsMode::Aggregated, 20), sink.clone());

    handle.sources_changed(vec![source.clone()]).unwrap();
    handle.handshake_completed().unwrap();
    handle
        .config_changed(MetricsConfig {
            collection_interval: Duration::from_secs(5),
            report_interval: Duration::from_secs(20),
            bulk_size: 1,
            mode: MetricsMode::Streaming,
        })
        .unwrap();

    // aggregated flush of 5 and 7 at 25.555s, then streaming every 5s
    sleep(Duration::from_secs(36)).await;
    let batches = sink.batches();
    assert_eq!(source.reconfigured.load(Ordering::SeqCst), 1);
    assert_eq!(batches.len(), 3);
    assert_eq!(load_value(&batches[0][0]), Some(6.0));
    assert_eq!(load_value(&batches[1][0]), Some(9.0));
    assert_eq!(load_value(&batches[2][0]), Some(11.0));

    handle.shutdown().unwrap();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_cancelling_owner_stops_without_flushing() {
    let sink = Arc::new(RecordingSink::default());
    let source = Arc::new(LoadSource::default());
    let cancel = CancellationToken::new();
    let (pipeline, handle) =
        MetricsPipeline::new(&config(MetricsMode::Aggregated, 20), sink.clone(), &cancel);
    let task = tokio::spawn(pipeline.run());

    handle.sources_changed(vec![source.clone()]).unwrap();
    handle.handshake_completed().unwrap();
    sleep(Duration::from_secs(21)).await;
    assert_eq!(source.collections.load(Ordering::SeqCst), 2);

    cancel.cancel();
    task.await.unwrap();
    assert!(sink.batches().is_empty());
    assert!(source.stopped.load(Ordering::SeqCst));
}
