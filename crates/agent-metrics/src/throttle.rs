// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Decides when finished reports leave the agent.
//!
//! In aggregated mode every incoming report is folded into the aggregator and
//! a timer, running at the report interval plus a fixed stagger, reduces and
//! sends one report per category. In streaming mode reports are buffered as
//! they are and the whole buffer is sent once it reaches the bulk size.
//!
//! Configuration changes are held until the next timer fire. The fire first
//! flushes under the settings it started with and only then switches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::aggregator_service::AggregatorHandle;
use crate::config::{metrics_mode::MetricsMode, MetricsConfig};
use crate::constants::REPORT_STAGGER;
use crate::report::MetricsReport;
use crate::sink::Sink;

#[must_use]
pub fn report_period(report_interval: Duration) -> Duration {
    report_interval + REPORT_STAGGER
}

struct ThrottleState {
    mode: MetricsMode,
    bulk_size: usize,
    report_interval: Duration,
    buffer: Vec<MetricsReport>,
    pending: Option<MetricsConfig>,
}

pub struct MetricsThrottle {
    state: Mutex<ThrottleState>,
    aggregator: AggregatorHandle,
    sink: Arc<dyn Sink>,
    reports_ready: AtomicBool,
    period: watch::Sender<Duration>,
    collection_interval: watch::Sender<Duration>,
    cancel: CancellationToken,
}

impl MetricsThrottle {
    #[must_use]
    pub fn new(config: &MetricsConfig, aggregator: AggregatorHandle, sink: Arc<dyn Sink>) -> Self {
        let mut config = config.clone();
        config.sanitize();
        let (period, _) = watch::channel(report_period(config.report_interval));
        let (collection_interval, _) = watch::channel(config.collection_interval);
        MetricsThrottle {
            state: Mutex::new(ThrottleState {
                mode: config.mode,
                bulk_size: config.bulk_size,
                report_interval: config.report_interval,
                buffer: Vec::new(),
                pending: None,
            }),
            aggregator,
            sink,
            reports_ready: AtomicBool::new(false),
            period,
            collection_interval,
            cancel: CancellationToken::new(),
        }
    }

    pub async fn mode(&self) -> MetricsMode {
        self.state.lock().await.mode
    }

    pub async fn bulk_size(&self) -> usize {
        self.state.lock().await.bulk_size
    }

    pub async fn buffered(&self) -> usize {
        self.state.lock().await.buffer.len()
    }

    /// Publishes the collection interval in effect. Updated when a pending
    /// configuration is applied.
    #[must_use]
    pub fn collection_interval(&self) -> watch::Receiver<Duration> {
        self.collection_interval.subscribe()
    }

    /// Handles the reports produced by one collection tick.
    pub async fn process(&self, bundle: Vec<MetricsReport>) {
        let mut state = self.state.lock().await;
        match state.mode {
            MetricsMode::Aggregated => {
                let mut saved = false;
                for report in bundle.into_iter().filter(|r| !r.is_empty()) {
                    let report_type = report.report_type;
                    match self
                        .aggregator
                        .save_batch(report_type, report.into_samples())
                    {
                        Ok(()) => {
                            debug!("Metrics collection saved [type: {report_type}]");
                            saved = true;
                        }
                        Err(e) => error!("Failed to save {report_type} collection: {e}"),
                    }
                }
                if saved {
                    self.reports_ready.store(true, Ordering::SeqCst);
                }
            }
            MetricsMode::Streaming => {
                state
                    .buffer
                    .extend(bundle.into_iter().filter(|r| !r.is_empty()));
                trace!(
                    "MetricsThrottle buffer size: {} of {}",
                    state.buffer.len(),
                    state.bulk_size
                );
                if state.buffer.len() >= state.bulk_size {
                    let batch = std::mem::take(&mut state.buffer);
                    info!("MetricsThrottle buffer flush of {} reports", batch.len());
                    self.send(batch).await;
                }
            }
        }
    }

    /// Stores `config` until the next timer fire.
    pub async fn config_changed(&self, config: MetricsConfig) {
        debug!("MetricsThrottle received new configuration {config:?}");
        self.state.lock().await.pending = Some(config);
    }

    /// Body of a timer fire: flush what aggregated mode accumulated, then apply
    /// any pending configuration.
    pub async fn on_timer(&self) {
        let mut state = self.state.lock().await;

        if state.mode == MetricsMode::Aggregated && self.reports_ready.swap(false, Ordering::SeqCst)
        {
            match self.aggregator.flush().await {
                Ok(reports) => {
                    for report in reports {
                        self.send(vec![report]).await;
                    }
                }
                Err(e) => error!("Failed to reduce collections: {e}"),
            }
        }

        if let Some(config) = state.pending.take() {
            self.apply(&mut state, config).await;
        }
    }

    async fn apply(&self, state: &mut ThrottleState, mut config: MetricsConfig) {
        config.sanitize();
        if config.mode != state.mode {
            match state.mode {
                MetricsMode::Aggregated => {
                    if let Err(e) = self.aggregator.clear() {
                        error!("Failed to clear collections: {e}");
                    }
                    self.reports_ready.store(false, Ordering::SeqCst);
                }
                MetricsMode::Streaming => {
                    if !state.buffer.is_empty() {
                        let batch = std::mem::take(&mut state.buffer);
                        self.send(batch).await;
                    }
                }
            }
            info!(
                "MetricsThrottle mode changed from {} to {}",
                state.mode, config.mode
            );
        }

        state.mode = config.mode;
        state.bulk_size = config.bulk_size;
        if config.report_interval != state.report_interval {
            state.report_interval = config.report_interval;
            self.period.send_replace(report_period(config.report_interval));
        }
        self.collection_interval
            .send_replace(config.collection_interval);
    }

    async fn send(&self, reports: Vec<MetricsReport>) {
        if let Err(e) = self.sink.send(reports).await {
            error!("Failed to send reports: {e}");
        }
    }

    /// Flush timer loop. Returns once [`MetricsThrottle::close`] is called.
    pub async fn run(self: Arc<Self>) {
        let mut period_rx = self.period.subscribe();
        let mut ticker = report_ticker(*period_rx.borrow_and_update());
        info!("MetricsThrottle started");

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    debug!("MetricsThrottle flush loop stopped");
                    break;
                }
                _ = ticker.tick() => {
                    self.on_timer().await;
                }
                Ok(()) = period_rx.changed() => {
                    let period = *period_rx.borrow_and_update();
                    debug!("MetricsThrottle report period is now {period:?}");
                    ticker = report_ticker(period);
                }
            }
        }
    }

    /// Stops the flush loop. Whatever is still pending is not flushed.
    pub fn close(&self) {
        info!("MetricsThrottle is wrapping up");
        self.cancel.cancel();
    }
}

fn report_ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
