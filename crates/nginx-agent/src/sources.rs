// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Host sources read from procfs.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use agent_metrics::errors::SourceError;
use agent_metrics::sample::{Dimensions, ReportType, Sample, SimpleMetric, TypedSample};
use agent_metrics::source::Source;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

pub const PROC_ROOT: &str = "/proc";
const HOSTNAME_PATH: &str = "sys/kernel/hostname";
const LOADAVG_PATH: &str = "loadavg";
const MEMINFO_PATH: &str = "meminfo";
const UNKNOWN_HOSTNAME: &str = "unknown";

/// Reads the kernel hostname, falling back to `unknown`.
pub fn hostname(proc_root: &Path) -> String {
    let path = proc_root.join(HOSTNAME_PATH);
    match fs::read_to_string(&path) {
        Ok(contents) if !contents.trim().is_empty() => contents.trim().to_string(),
        _ => {
            debug!("Could not read hostname from {}", path.display());
            UNKNOWN_HOSTNAME.to_string()
        }
    }
}

/// Runs a procfs read on the blocking pool. A stalled read stays there while
/// the collection tick moves on.
async fn read_blocking<T, F>(id: &str, read: F) -> Result<T, SourceError>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(read)
        .await
        .map_err(|e| SourceError::Collection {
            id: id.to_string(),
            reason: e.to_string(),
        })?
        .map_err(SourceError::from)
}

fn host_dimensions(hostname: &str) -> Dimensions {
    Dimensions::new([("hostname", hostname)])
}

async fn emit(
    id: &str,
    tx: &mpsc::Sender<TypedSample>,
    report_type: ReportType,
    sample: Sample,
) -> Result<(), SourceError> {
    tx.send(TypedSample::new(report_type, sample))
        .await
        .map_err(|_| SourceError::Stopped(id.to_string()))
}

pub struct LoadAverageSource {
    path: PathBuf,
    dimensions: Dimensions,
}

impl LoadAverageSource {
    pub fn new(proc_root: &Path, hostname: &str) -> Self {
        LoadAverageSource {
            path: proc_root.join(LOADAVG_PATH),
            dimensions: host_dimensions(hostname),
        }
    }
}

/// Parses the first three fields of `/proc/loadavg`.
pub fn parse_loadavg(contents: &str) -> Option<[f64; 3]> {
    let mut fields = contents.split_whitespace().map(str::parse::<f64>);
    let one = fields.next()?.ok()?;
    let five = fields.next()?.ok()?;
    let fifteen = fields.next()?.ok()?;
    Some([one, five, fifteen])
}

#[async_trait]
impl Source for LoadAverageSource {
    fn id(&self) -> &str {
        "system.load"
    }

    async fn collect(
        &self,
        _deadline: Instant,
        tx: mpsc::Sender<TypedSample>,
    ) -> Result<(), SourceError> {
        let path = self.path.clone();
        let contents = read_blocking(self.id(), move || fs::read_to_string(path)).await?;
        let [one, five, fifteen] =
            parse_loadavg(&contents).ok_or_else(|| SourceError::Collection {
                id: self.id().to_string(),
                reason: format!("malformed {}", self.path.display()),
            })?;

        let sample = Sample::new(
            self.dimensions.clone(),
            vec![
                SimpleMetric::new("system.load.1", one),
                SimpleMetric::new("system.load.5", five),
                SimpleMetric::new("system.load.15", fifteen),
            ],
        );
        emit(self.id(), &tx, ReportType::System, sample).await
    }
}

/// Memory figures from `/proc/meminfo`, in bytes.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct MemInfo {
    pub total: f64,
    pub free: f64,
    pub available: f64,
    pub buffered: f64,
    pub cached: f64,
    pub shared: f64,
}

impl MemInfo {
    pub fn used(&self) -> f64 {
        (self.total - self.free - self.buffered - self.cached).max(0.0)
    }

    pub fn pct_used(&self) -> f64 {
        if self.total == 0.0 {
            return 0.0;
        }
        (self.total - self.available) / self.total * 100.0
    }

    fn into_metrics(self) -> Vec<SimpleMetric> {
        vec![
            SimpleMetric::new("system.mem.total", self.total),
            SimpleMetric::new("system.mem.free", self.free),
            SimpleMetric::new("system.mem.available", self.available),
            SimpleMetric::new("system.mem.buffered", self.buffered),
            SimpleMetric::new("system.mem.cached", self.cached),
            SimpleMetric::new("system.mem.shared", self.shared),
            SimpleMetric::new("system.mem.used", self.used()),
            SimpleMetric::new("system.mem.pct_used", self.pct_used()),
        ]
    }
}

/// Parses `/proc/meminfo`. Returns `None` when `MemTotal` is missing.
pub fn parse_meminfo(contents: &str) -> Option<MemInfo> {
    let mut info = MemInfo::default();
    let mut has_total = false;

    for line in contents.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let Some(kib) = rest
            .split_whitespace()
            .next()
            .and_then(|v| v.parse::<f64>().ok())
        else {
            continue;
        };
        let bytes = kib * 1024.0;
        match key.trim() {
            "MemTotal" => {
                info.total = bytes;
                has_total = true;
            }
            "MemFree" => info.free = bytes,
            "MemAvailable" => info.available = bytes,
            "Buffers" => info.buffered = bytes,
            "Cached" => info.cached = bytes,
            "Shmem" => info.shared = bytes,
            _ => {}
        }
    }

    has_total.then_some(info)
}

pub struct MemorySource {
    path: PathBuf,
    dimensions: Dimensions,
}

impl MemorySource {
    pub fn new(proc_root: &Path, hostname: &str) -> Self {
        MemorySource {
            path: proc_root.join(MEMINFO_PATH),
            dimensions: host_dimensions(hostname),
        }
    }
}

#[async_trait]
impl Source for MemorySource {
    fn id(&self) -> &str {
        "system.mem"
    }

    async fn collect(
        &self,
        _deadline: Instant,
        tx: mpsc::Sender<TypedSample>,
    ) -> Result<(), SourceError> {
        let path = self.path.clone();
        let contents = read_blocking(self.id(), move || fs::read_to_string(path)).await?;
        let info = parse_meminfo(&contents).ok_or_else(|| SourceError::Collection {
            id: self.id().to_string(),
            reason: format!("no MemTotal in {}", self.path.display()),
        })?;

        let sample = Sample::new(self.dimensions.clone(), info.into_metrics());
        emit(self.id(), &tx, ReportType::System, sample).await
    }
}

/// Reports `nginx.status` 1 while any process named `nginx` is running.
pub struct NginxStatusSource {
    proc_root: PathBuf,
    dimensions: Dimensions,
}

impl NginxStatusSource {
    pub fn new(proc_root: &Path, hostname: &str) -> Self {
        NginxStatusSource {
            proc_root: proc_root.to_path_buf(),
            dimensions: host_dimensions(hostname),
        }
    }
}

/// Whether any process under `proc_root` has the command name `nginx`.
fn nginx_running(proc_root: &Path) -> io::Result<bool> {
    for entry in fs::read_dir(proc_root)? {
        let Ok(entry) = entry else {
            continue;
        };
        let is_pid = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.bytes().all(|b| b.is_ascii_digit()));
        if !is_pid {
            continue;
        }
        // processes can exit between listing and reading
        if let Ok(comm) = fs::read_to_string(entry.path().join("comm")) {
            if comm.trim() == "nginx" {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

#[async_trait]
impl Source for NginxStatusSource {
    fn id(&self) -> &str {
        "nginx.status"
    }

    async fn collect(
        &self,
        _deadline: Instant,
        tx: mpsc::Sender<TypedSample>,
    ) -> Result<(), SourceError> {
        let proc_root = self.proc_root.clone();
        let running = read_blocking(self.id(), move || nginx_running(&proc_root)).await?;
        let status = if running { 1.0 } else { 0.0 };
        let sample = Sample::new(
            self.dimensions.clone(),
            vec![SimpleMetric::new("nginx.status", status)],
        );
        emit(self.id(), &tx, ReportType::Instance, sample).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_metrics::scheduler::CollectorScheduler;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    const MEMINFO: &str = "MemTotal:        1000 kB
MemFree:          200 kB
MemAvailable:     600 kB
Buffers:          100 kB
Cached:           300 kB
SwapCached:         0 kB
Shmem:             50 kB
";

    fn proc_root() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("sys/kernel")).unwrap();
        fs::write(dir.path().join(HOSTNAME_PATH), "web-1\n").unwrap();
        fs::write(dir.path().join(LOADAVG_PATH), "0.50 0.75 1.25 2/345 6789\n").unwrap();
        fs::write(dir.path().join(MEMINFO_PATH), MEMINFO).unwrap();
        dir
    }

    fn spawn_process(root: &Path, pid: u32, comm: &str) {
        let dir = root.join(pid.to_string());
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("comm"), format!("{comm}\n")).unwrap();
    }

    async fn collect_one(source: &dyn Source) -> TypedSample {
        let (tx, mut rx) = mpsc::channel(4);
        source
            .collect(Instant::now() + Duration::from_secs(1), tx)
            .await
            .unwrap();
        rx.recv().await.unwrap()
    }

    #[test]
    fn test_parse_loadavg() {
        assert_eq!(
            parse_loadavg("0.50 0.75 1.25 2/345 6789"),
            Some([0.5, 0.75, 1.25])
        );
        assert_eq!(parse_loadavg("0.50 oops"), None);
        assert_eq!(parse_loadavg(""), None);
    }

    #[test]
    fn test_parse_meminfo() {
        let info = parse_meminfo(MEMINFO).unwrap();
        assert_eq!(info.total, 1000.0 * 1024.0);
        assert_eq!(info.shared, 50.0 * 1024.0);
        assert_eq!(info.used(), 400.0 * 1024.0);
        assert_eq!(info.pct_used(), 40.0);
    }

    #[test]
    fn test_parse_meminfo_requires_total() {
        assert_eq!(parse_meminfo("MemFree: 200 kB\n"), None);
    }

    #[test]
    fn test_hostname_falls_back_to_unknown() {
        let dir = TempDir::new().unwrap();
        assert_eq!(hostname(dir.path()), "unknown");
        assert_eq!(hostname(proc_root().path()), "web-1");
    }

    #[tokio::test]
    async fn test_load_average_source() {
        let root = proc_root();
        let source = LoadAverageSource::new(root.path(), "web-1");
        let typed = collect_one(&source).await;

        assert_eq!(typed.report_type, ReportType::System);
        assert_eq!(
            typed.sample.dimensions.get("hostname").map(|v| v.as_str().to_string()),
            Some("web-1".to_string())
        );
        let names: Vec<_> = typed
            .sample
            .measurements
            .iter()
            .map(|m| m.name.as_str())
            .collect();
        assert_eq!(names, vec!["system.load.1", "system.load.5", "system.load.15"]);
    }

    #[tokio::test]
    async fn test_memory_source() {
        let root = proc_root();
        let typed = collect_one(&MemorySource::new(root.path(), "web-1")).await;
        assert_eq!(typed.report_type, ReportType::System);
        assert_eq!(typed.sample.measurements.len(), 8);
    }

    #[tokio::test]
    async fn test_missing_file_is_an_io_error() {
        let dir = TempDir::new().unwrap();
        let (tx, _rx) = mpsc::channel(4);
        let result = LoadAverageSource::new(dir.path(), "web-1")
            .collect(Instant::now(), tx)
            .await;
        assert!(matches!(result, Err(SourceError::Io(_))));
    }

    #[tokio::test]
    async fn test_nginx_status_follows_process_table() {
        let root = proc_root();
        spawn_process(root.path(), 1, "systemd");
        let source = NginxStatusSource::new(root.path(), "web-1");

        let typed = collect_one(&source).await;
        assert_eq!(typed.report_type, ReportType::Instance);
        assert_eq!(typed.sample.measurements[0].value, 0.0);

        spawn_process(root.path(), 4242, "nginx");
        let typed = collect_one(&source).await;
        assert_eq!(typed.sample.measurements[0].value, 1.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stalled_read_does_not_hold_the_tick() {
        let root = proc_root();
        let fifo = root.path().join(LOADAVG_PATH);
        fs::remove_file(&fifo).unwrap();
        let created = std::process::Command::new("mkfifo")
            .arg(&fifo)
            .status()
            .unwrap();
        assert!(created.success());

        let scheduler = CollectorScheduler::new();
        let sources: Vec<Arc<dyn Source>> =
            vec![Arc::new(LoadAverageSource::new(root.path(), "web-1"))];
        assert_eq!(scheduler.register(sources).await, 1);

        let started = std::time::Instant::now();
        let batch = scheduler.collect(Duration::from_millis(200)).await;
        assert!(batch.is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));

        // a writer releases the read still parked on the blocking pool
        fs::write(&fifo, "0.10 0.20 0.30 1/1 1\n").unwrap();
    }
}
