// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::aggregator_service::{AggregatorHandle, AggregatorService};
use crate::config::MetricsConfig;
use crate::report::MetricsReport;
use crate::scheduler::CollectorScheduler;
use crate::sink::Sink;
use crate::source::Source;
use crate::throttle::MetricsThrottle;

/// Signals the pipeline reacts to. It never originates any of them.
pub enum PipelineEvent {
    /// The set of measured entities changed; carries the full desired set.
    SourcesChanged(Vec<Arc<dyn Source>>),
    ConfigChanged(MetricsConfig),
    /// The control connection is up; reports may be sent.
    HandshakeCompleted,
    Shutdown,
}

impl fmt::Debug for PipelineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineEvent::SourcesChanged(sources) => f
                .debug_tuple("SourcesChanged")
                .field(&sources.iter().map(|s| s.id()).collect::<Vec<_>>())
                .finish(),
            PipelineEvent::ConfigChanged(config) => {
                f.debug_tuple("ConfigChanged").field(config).finish()
            }
            PipelineEvent::HandshakeCompleted => f.write_str("HandshakeCompleted"),
            PipelineEvent::Shutdown => f.write_str("Shutdown"),
        }
    }
}

#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::UnboundedSender<PipelineEvent>,
}

impl PipelineHandle {
    pub fn sources_changed(
        &self,
        sources: Vec<Arc<dyn Source>>,
    ) -> Result<(), mpsc::error::SendError<PipelineEvent>> {
        self.tx.send(PipelineEvent::SourcesChanged(sources))
    }

    pub fn config_changed(
        &self,
        config: MetricsConfig,
    ) -> Result<(), mpsc::error::SendError<PipelineEvent>> {
        self.tx.send(PipelineEvent::ConfigChanged(config))
    }

    pub fn handshake_completed(&self) -> Result<(), mpsc::error::SendError<PipelineEvent>> {
        self.tx.send(PipelineEvent::HandshakeCompleted)
    }

    pub fn shutdown(&self) -> Result<(), mpsc::error::SendError<PipelineEvent>> {
        self.tx.send(PipelineEvent::Shutdown)
    }
}

/// Wires the scheduler, the aggregator service and the throttle together.
///
/// [`MetricsPipeline::run`] owns three long-lived tasks: the aggregator
/// service, the throttle's flush loop and the collection tick loop. The tick
/// loop does not start collecting until sources have been supplied and the
/// handshake completed.
pub struct MetricsPipeline {
    scheduler: Arc<CollectorScheduler>,
    throttle: Arc<MetricsThrottle>,
    aggregator_service: AggregatorService,
    aggregator: AggregatorHandle,
    rx: mpsc::UnboundedReceiver<PipelineEvent>,
    sources_ready: watch::Sender<bool>,
    handshake_ready: watch::Sender<bool>,
    cancel: CancellationToken,
}

impl MetricsPipeline {
    /// `cancel` is the owner's lifetime. Cancelling it stops the pipeline
    /// without flushing.
    #[must_use]
    pub fn new(
        config: &MetricsConfig,
        sink: Arc<dyn Sink>,
        cancel: &CancellationToken,
    ) -> (Self, PipelineHandle) {
        Self::with_scheduler(config, sink, CollectorScheduler::new(), cancel)
    }

    #[must_use]
    pub fn with_scheduler(
        config: &MetricsConfig,
        sink: Arc<dyn Sink>,
        scheduler: CollectorScheduler,
        cancel: &CancellationToken,
    ) -> (Self, PipelineHandle) {
        let mut config = config.clone();
        config.sanitize();

        let (aggregator_service, aggregator) = AggregatorService::new();
        let throttle = MetricsThrottle::new(&config, aggregator.clone(), sink);
        let (tx, rx) = mpsc::unbounded_channel();
        let (sources_ready, _) = watch::channel(false);
        let (handshake_ready, _) = watch::channel(false);

        let pipeline = MetricsPipeline {
            scheduler: Arc::new(scheduler),
            throttle: Arc::new(throttle),
            aggregator_service,
            aggregator,
            rx,
            sources_ready,
            handshake_ready,
            cancel: cancel.child_token(),
        };
        (pipeline, PipelineHandle { tx })
    }

    pub async fn run(self) {
        let MetricsPipeline {
            scheduler,
            throttle,
            aggregator_service,
            aggregator,
            mut rx,
            sources_ready,
            handshake_ready,
            cancel,
        } = self;

        let aggregator_task = tokio::spawn(aggregator_service.run());
        let flush_task = tokio::spawn(Arc::clone(&throttle).run());
        let tick_task = tokio::spawn(tick_loop(
            Arc::clone(&scheduler),
            Arc::clone(&throttle),
            Readiness {
                sources: sources_ready.subscribe(),
                handshake: handshake_ready.subscribe(),
            },
            cancel.clone(),
        ));
        info!("Metrics pipeline started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(PipelineEvent::SourcesChanged(sources)) => {
                        scheduler.sync_sources(sources).await;
                        sources_ready.send_replace(true);
                    }
                    Some(PipelineEvent::ConfigChanged(mut config)) => {
                        config.sanitize();
                        scheduler.reconfigure(&config).await;
                        throttle.config_changed(config).await;
                    }
                    Some(PipelineEvent::HandshakeCompleted) => {
                        info!("Handshake completed, metrics reporting enabled");
                        handshake_ready.send_replace(true);
                    }
                    Some(PipelineEvent::Shutdown) | None => break,
                },
            }
        }

        cancel.cancel();
        throttle.close();
        if let Err(e) = tick_task.await {
            error!("Collection loop failed: {e}");
        }
        if let Err(e) = flush_task.await {
            error!("Flush loop failed: {e}");
        }
        scheduler.stop_all().await;
        if let Err(e) = aggregator.shutdown() {
            debug!("Aggregator service already stopped: {e}");
        }
        if let Err(e) = aggregator_task.await {
            error!("Aggregator service failed: {e}");
        }
        info!("Metrics pipeline stopped");
    }
}

struct Readiness {
    sources: watch::Receiver<bool>,
    handshake: watch::Receiver<bool>,
}

impl Readiness {
    /// Resolves once both flags are set. `false` means a sender went away first.
    async fn wait(&mut self) -> bool {
        self.sources.wait_for(|ready| *ready).await.is_ok()
            && self.handshake.wait_for(|ready| *ready).await.is_ok()
    }
}

async fn tick_loop(
    scheduler: Arc<CollectorScheduler>,
    throttle: Arc<MetricsThrottle>,
    mut readiness: Readiness,
    cancel: CancellationToken,
) {
    tokio::select! {
        () = cancel.cancelled() => return,
        ready = readiness.wait() => {
            if !ready {
                return;
            }
        }
    }

    let mut interval_rx = throttle.collection_interval();
    let mut collection_interval = *interval_rx.borrow_and_update();
    let mut ticker = collection_ticker(collection_interval);
    info!("Collecting metrics every {collection_interval:?}");

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    batch = scheduler.collect(collection_interval) => {
                        throttle.process(MetricsReport::bundle(batch)).await;
                    }
                }
            }
            Ok(()) = interval_rx.changed() => {
                let updated = *interval_rx.borrow_and_update();
                if updated != collection_interval {
                    info!("Collection interval changed from {collection_interval:?} to {updated:?}");
                    collection_interval = updated;
                    ticker = collection_ticker(updated);
                }
            }
        }
    }
    debug!("Collection loop stopped");
}

fn collection_ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
