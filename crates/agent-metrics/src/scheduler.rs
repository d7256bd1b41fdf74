// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::config::MetricsConfig;
use crate::constants::SAMPLE_BUFFER_CAPACITY;
use crate::sample::TypedSample;
use crate::source::Source;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MembershipChange {
    pub added: usize,
    pub removed: usize,
}

/// Runs every registered source once per tick and gathers what they produced.
///
/// The source list sits behind a read/write lock: a tick holds the read side
/// until its batch is drained, membership changes take the write side.
pub struct CollectorScheduler {
    sources: RwLock<Vec<Arc<dyn Source>>>,
    tx: mpsc::Sender<TypedSample>,
    rx: Mutex<mpsc::Receiver<TypedSample>>,
    capacity: usize,
}

impl Default for CollectorScheduler {
    fn default() -> Self {
        Self::with_capacity(SAMPLE_BUFFER_CAPACITY)
    }
}

impl CollectorScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        CollectorScheduler {
            sources: RwLock::new(Vec::new()),
            tx,
            rx: Mutex::new(rx),
            capacity,
        }
    }

    pub async fn len(&self) -> usize {
        self.sources.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sources.read().await.is_empty()
    }

    pub async fn ids(&self) -> Vec<String> {
        self.sources
            .read()
            .await
            .iter()
            .map(|s| s.id().to_string())
            .collect()
    }

    /// Adds every source whose id is not registered yet.
    pub async fn register(&self, new_sources: Vec<Arc<dyn Source>>) -> usize {
        let mut sources = self.sources.write().await;
        append_unknown(&mut sources, new_sources)
    }

    /// Makes the registered set match `desired`. Sources missing from `desired`
    /// are stopped and removed, unknown ones are appended, and a source whose
    /// id is already registered is kept as is.
    pub async fn sync_sources(&self, desired: Vec<Arc<dyn Source>>) -> MembershipChange {
        let mut sources = self.sources.write().await;

        let desired_ids: HashSet<String> = desired.iter().map(|s| s.id().to_string()).collect();
        let before = sources.len();
        sources.retain(|source| {
            if desired_ids.contains(source.id()) {
                return true;
            }
            debug!("Stopping source {}", source.id());
            source.stop();
            false
        });
        let removed = before - sources.len();
        let added = append_unknown(&mut sources, desired);

        if added > 0 || removed > 0 {
            info!(
                "Sources updated: {added} added, {removed} removed, {} active",
                sources.len()
            );
        }
        MembershipChange { added, removed }
    }

    pub async fn reconfigure(&self, config: &MetricsConfig) {
        for source in self.sources.read().await.iter() {
            source.reconfigure(config);
        }
    }

    pub async fn stop_all(&self) {
        let mut sources = self.sources.write().await;
        for source in sources.drain(..) {
            source.stop();
        }
    }

    /// Runs one collection tick.
    ///
    /// Every source runs concurrently with a deadline of half the interval.
    /// Once all of them returned or hit the deadline, the channel is drained
    /// without blocking. A source that fails or times out contributes nothing.
    pub async fn collect(&self, interval: Duration) -> Vec<TypedSample> {
        let deadline = Instant::now() + interval / 2;
        let sources = self.sources.read().await;

        let mut tasks = JoinSet::new();
        for source in sources.iter() {
            let source = Arc::clone(source);
            let tx = self.tx.clone();
            tasks.spawn(async move {
                match timeout_at(deadline, source.collect(deadline, tx)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!("Failed to collect from {}: {e}", source.id()),
                    Err(_) => warn!(
                        "Source {} did not finish before the collection deadline",
                        source.id()
                    ),
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Collection task failed: {e}");
            }
        }

        let batch = self.drain().await;
        drop(sources);

        debug!("Collected {} samples", batch.len());
        batch
    }

    async fn drain(&self) -> Vec<TypedSample> {
        let mut rx = self.rx.lock().await;
        let mut batch = Vec::new();
        while batch.len() < self.capacity {
            match rx.try_recv() {
                Ok(sample) => batch.push(sample),
                Err(_) => break,
            }
        }
        batch
    }
}

fn append_unknown(sources: &mut Vec<Arc<dyn Source>>, candidates: Vec<Arc<dyn Source>>) -> usize {
    let mut added = 0;
    for candidate in candidates {
        if sources.iter().any(|s| s.id() == candidate.id()) {
            continue;
        }
        debug!("Adding source {}", candidate.id());
        sources.push(candidate);
        added += 1;
    }
    added
}
