// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod logger;
mod sources;

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use agent_metrics::config::{self, Config};
use agent_metrics::flusher::{Flusher, FlusherConfig};
use agent_metrics::pipeline::{MetricsPipeline, PipelineHandle};
use agent_metrics::sink::{LogSink, Sink};
use agent_metrics::source::Source;

use crate::sources::{LoadAverageSource, MemorySource, NginxStatusSource, PROC_ROOT};

const CONFIG_DIR_ENV: &str = "NGINX_AGENT_CONFIG_DIR";
const DEFAULT_CONFIG_DIR: &str = "/etc/nginx-agent";

#[tokio::main]
pub async fn main() {
    let config_dir = config_directory();
    let config = config::get_config(&config_dir);

    let env_filter = format!(
        "h2=off,hyper=off,rustls=off,{}",
        config.log_level.as_level_filter()
    );
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(env_filter)),
        )
        .with_ansi(false)
        .event_format(logger::Formatter)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install log subscriber: {e}");
        return;
    }
    debug!("Logging subsystem enabled");

    let Some(sink) = build_sink(&config) else {
        return;
    };

    let cancel = CancellationToken::new();
    let (pipeline, handle) = MetricsPipeline::new(&config.metrics, sink, &cancel);
    let pipeline_task = tokio::spawn(pipeline.run());

    let proc_root = Path::new(PROC_ROOT);
    let hostname = sources::hostname(proc_root);
    let host_sources: Vec<Arc<dyn Source>> = vec![
        Arc::new(LoadAverageSource::new(proc_root, &hostname)),
        Arc::new(MemorySource::new(proc_root, &hostname)),
        Arc::new(NginxStatusSource::new(proc_root, &hostname)),
    ];
    info!("Starting nginx agent on {hostname}");
    if let Err(e) = handle.sources_changed(host_sources) {
        error!("Failed to register sources: {e}");
    }
    // standalone mode has no control plane to wait for
    if let Err(e) = handle.handshake_completed() {
        error!("Failed to enable reporting: {e}");
    }

    wait_for_shutdown(&config_dir, &handle).await;

    if let Err(e) = handle.shutdown() {
        debug!("Pipeline already stopped: {e}");
    }
    if let Err(e) = pipeline_task.await {
        error!("Metrics pipeline failed: {e}");
    }
    info!("Nginx agent stopped");
}

fn config_directory() -> PathBuf {
    env::var(CONFIG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_DIR))
}

fn build_sink(config: &Config) -> Option<Arc<dyn Sink>> {
    let Some(url) = &config.server_url else {
        info!("No server url configured, reports will be logged");
        return Some(Arc::new(LogSink));
    };

    match Flusher::new(FlusherConfig {
        url: url.clone(),
        timeout: config.flush_timeout,
        compression_level: config.compression_level,
    }) {
        Ok(flusher) => {
            info!("Reporting metrics to {}", flusher.endpoint());
            Some(Arc::new(flusher))
        }
        Err(e) => {
            error!("Failed to create flusher: {e}");
            None
        }
    }
}

/// Waits for SIGINT or SIGTERM. SIGHUP reloads the metrics settings.
#[cfg(unix)]
async fn wait_for_shutdown(config_dir: &Path, handle: &PipelineHandle) {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut terminate, mut hangup) =
        match (signal(SignalKind::terminate()), signal(SignalKind::hangup())) {
            (Ok(terminate), Ok(hangup)) => (terminate, hangup),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {e}");
                wait_for_ctrl_c().await;
                return;
            }
        };

    loop {
        tokio::select! {
            () = wait_for_ctrl_c() => return,
            _ = terminate.recv() => {
                info!("Received SIGTERM, shutting down");
                return;
            }
            _ = hangup.recv() => {
                info!("Received SIGHUP, reloading metrics configuration");
                let config = config::get_config(config_dir);
                if let Err(e) = handle.config_changed(config.metrics) {
                    error!("Failed to apply configuration: {e}");
                    return;
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_config_dir: &Path, _handle: &PipelineHandle) {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received interrupt, shutting down"),
        Err(e) => error!("Failed to listen for interrupt: {e}"),
    }
}
