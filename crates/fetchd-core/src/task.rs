//! Task Controller: owns one download's lifecycle (Idle/Running/Stopped/
//! Completed/Failed), exposing the embedding API used by a GUI or CLI.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::assembler;
use crate::checkpoint::{self, Checkpoint};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::planner::{self, Plan};
use crate::probe::{self, ProbeResult};
use crate::proxy::{resolve_proxies, ProxyMode};
use crate::retry::{RetryPolicy, SegmentError};
use crate::worker;

/// A unit of work: one source URL downloaded to one destination directory.
/// Immutable once constructed; consumed by exactly one [`Task`].
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub url: String,
    pub download_dir: PathBuf,
    pub chunk_size_bytes: u64,
    pub worker_count: usize,
    pub proxy_mode: ProxyMode,
    pub proxies: Option<HashMap<String, String>>,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
}

impl DownloadTask {
    /// Builds a task, falling back to `config`'s defaults for chunk size,
    /// worker count, and connect/idle timeouts when the caller doesn't
    /// override them.
    pub fn new(url: impl Into<String>, download_dir: impl Into<PathBuf>, config: &EngineConfig) -> Self {
        Self {
            url: url.into(),
            download_dir: download_dir.into(),
            chunk_size_bytes: config.default_chunk_size_bytes,
            worker_count: config.default_worker_count,
            proxy_mode: ProxyMode::System,
            proxies: None,
            connect_timeout: config.connect_timeout(),
            idle_timeout: config.idle_timeout(),
        }
    }

    pub fn with_chunk_size_bytes(mut self, bytes: u64) -> Self {
        self.chunk_size_bytes = bytes;
        self
    }

    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    pub fn with_proxy_mode(mut self, mode: ProxyMode) -> Self {
        self.proxy_mode = mode;
        self
    }

    pub fn with_proxies(mut self, proxies: HashMap<String, String>) -> Self {
        self.proxies = Some(proxies);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Running,
    Stopped,
    Completed,
    Failed,
}

/// Progress at a point in time. `eta_seconds` is `-1` when unknown (no
/// probe yet, or the transfer rate hasn't been observed).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub downloaded_bytes: i64,
    pub total_bytes: i64,
    pub eta_seconds: i64,
}

impl ProgressSnapshot {
    fn unknown() -> Self {
        Self { downloaded_bytes: -1, total_bytes: -1, eta_seconds: -1 }
    }
}

struct RateTracker {
    last_sample_at: Instant,
    last_bytes: u64,
    /// Exponential moving average of bytes/sec.
    ema_rate: f64,
}

/// Smoothing factor for the transfer-rate EMA: higher reacts faster to
/// recent throughput, lower rides out bursts. 0.3 is a common default for
/// this kind of short-horizon rate estimate.
const EMA_ALPHA: f64 = 0.3;

/// Owns the mutable state of one in-flight (or completed) download and
/// coordinates the probe -> plan -> worker pool -> assembler pipeline.
pub struct Task {
    task: DownloadTask,
    retry_policy: RetryPolicy,
    state: Mutex<TaskState>,
    stop_flag: Arc<AtomicBool>,
    downloaded: Arc<AtomicU64>,
    total_size: Arc<Mutex<Option<u64>>>,
    rate: Mutex<Option<RateTracker>>,
    driver: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl Task {
    /// Constructs a controller for `task`. Does not start the driver thread;
    /// call [`Task::start`] to begin.
    pub fn construct(task: DownloadTask, retry_policy: RetryPolicy) -> Arc<Task> {
        Arc::new(Task {
            task,
            retry_policy,
            state: Mutex::new(TaskState::Idle),
            stop_flag: Arc::new(AtomicBool::new(false)),
            downloaded: Arc::new(AtomicU64::new(0)),
            total_size: Arc::new(Mutex::new(None)),
            rate: Mutex::new(None),
            driver: Mutex::new(None),
        })
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock().unwrap()
    }

    pub fn is_completed(&self) -> bool {
        self.state() == TaskState::Completed
    }

    /// Starts (or restarts) the driver thread. Idempotent while already
    /// `Running`.
    pub fn start(self: &Arc<Self>) {
        let mut state = self.state.lock().unwrap();
        if *state == TaskState::Running {
            return;
        }
        self.stop_flag.store(false, Ordering::Relaxed);
        *state = TaskState::Running;
        drop(state);

        let this = Arc::clone(self);
        let handle = std::thread::spawn(move || this.drive());
        *self.driver.lock().unwrap() = Some(handle);
    }

    /// `stop(true)` requests graceful cancellation and blocks until the
    /// driver thread has drained (bounded by a generous join timeout since
    /// the driver itself enforces per-request timeouts). `stop(false)`
    /// clears the flag, allowing a subsequent `start()` to resume.
    pub fn stop(&self, flag: bool) {
        if flag {
            self.stop_flag.store(true, Ordering::Relaxed);
            if let Some(handle) = self.driver.lock().unwrap().take() {
                let _ = handle.join();
            }
        } else {
            self.stop_flag.store(false, Ordering::Relaxed);
        }
    }

    /// Non-blocking read of current progress. Reads atomics and a small
    /// mutex-guarded rate tracker only — never touches the network or disk.
    pub fn progress_snapshot(&self) -> ProgressSnapshot {
        let total = match *self.total_size.lock().unwrap() {
            Some(t) => t,
            None => return ProgressSnapshot::unknown(),
        };
        let downloaded = self.downloaded.load(Ordering::Relaxed).min(total);

        let mut rate_guard = self.rate.lock().unwrap();
        let now = Instant::now();
        let eta = match rate_guard.as_mut() {
            None => {
                *rate_guard = Some(RateTracker { last_sample_at: now, last_bytes: downloaded, ema_rate: 0.0 });
                -1
            }
            Some(tracker) => {
                let elapsed = now.duration_since(tracker.last_sample_at).as_secs_f64();
                if elapsed > 0.0 {
                    let delta = downloaded.saturating_sub(tracker.last_bytes) as f64;
                    let instantaneous = delta / elapsed;
                    tracker.ema_rate = if tracker.ema_rate <= 0.0 {
                        instantaneous
                    } else {
                        EMA_ALPHA * instantaneous + (1.0 - EMA_ALPHA) * tracker.ema_rate
                    };
                    tracker.last_sample_at = now;
                    tracker.last_bytes = downloaded;
                }
                let remaining = total.saturating_sub(downloaded);
                if remaining == 0 {
                    0
                } else if tracker.ema_rate > 0.0 {
                    (remaining as f64 / tracker.ema_rate).ceil() as i64
                } else {
                    -1
                }
            }
        };

        ProgressSnapshot {
            downloaded_bytes: downloaded as i64,
            total_bytes: total as i64,
            eta_seconds: eta,
        }
    }

    fn drive(self: Arc<Self>) {
        match self.run_once() {
            Ok(()) => {
                *self.state.lock().unwrap() = TaskState::Completed;
            }
            Err(EngineError::Cancelled) => {
                *self.state.lock().unwrap() = TaskState::Stopped;
            }
            Err(e) => {
                tracing::warn!(url = %self.task.url, error = %e, "download failed");
                *self.state.lock().unwrap() = TaskState::Failed;
            }
        }
    }

    fn run_once(&self) -> Result<(), EngineError> {
        let headers: HashMap<String, String> = HashMap::new();
        let proxies = resolve_proxies(self.task.proxy_mode, self.task.proxies.as_ref());

        let probe_result = probe::probe(
            &self.task.url,
            &headers,
            &proxies,
            self.task.connect_timeout,
            self.task.idle_timeout,
            &self.retry_policy,
        )
        .map_err(|e| EngineError::Probe { url: self.task.url.clone(), reason: e.to_string() })?;
        tracing::info!(url = %probe_result.final_url, filename = %probe_result.filename, "probed");

        let filename = probe_result.filename.clone();
        let stem = std::path::Path::new(&filename)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| filename.clone());
        let scratch_dir = self.task.download_dir.join(&stem);
        let destination = self.task.download_dir.join(&filename);

        if destination.exists() && !scratch_dir.exists() {
            // Property 3: resume idempotence — a prior successful run left
            // only the final file behind.
            *self.total_size.lock().unwrap() = probe_result.total_size;
            if let Some(total) = probe_result.total_size {
                self.downloaded.store(total, Ordering::Relaxed);
            }
            return Ok(());
        }

        if self.stop_flag.load(Ordering::Relaxed) {
            return Err(EngineError::Cancelled);
        }

        match (probe_result.accepts_ranges, probe_result.total_size) {
            (true, Some(total_size)) => {
                self.run_ranged(&headers, &proxies, &probe_result, &scratch_dir, total_size, &destination)
            }
            _ => self.run_single_stream(&headers, &proxies, &probe_result, &destination),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run_ranged(
        &self,
        headers: &HashMap<String, String>,
        proxies: &Option<HashMap<String, String>>,
        probe_result: &ProbeResult,
        scratch_dir: &std::path::Path,
        total_size: u64,
        destination: &std::path::Path,
    ) -> Result<(), EngineError> {
        *self.total_size.lock().unwrap() = Some(total_size);

        let checkpoint_path = checkpoint::checkpoint_path(scratch_dir, &probe_result.filename);
        let existing = checkpoint::load(&checkpoint_path).ok().flatten();

        let (chunk_size_bytes, worker_count) = match &existing {
            Some(cp) => (cp.chunk_size_bytes, cp.max_workers),
            None => (self.task.chunk_size_bytes, self.task.worker_count),
        };

        if existing.is_none() {
            let cp = Checkpoint {
                url: self.task.url.clone(),
                chunk_size_bytes,
                max_workers: worker_count,
            };
            let _ = checkpoint::save(&checkpoint_path, &cp);
        }

        let plan: Plan = planner::plan_chunks(total_size, chunk_size_bytes, worker_count);

        let already: u64 = plan
            .chunks
            .iter()
            .map(|c| crate::storage::part_size_on_disk(&crate::storage::part_path(scratch_dir, &probe_result.filename, c.index)).min(c.len()))
            .sum();
        self.downloaded.store(already, Ordering::Relaxed);

        let result = worker::run_pool(
            &probe_result.final_url,
            headers,
            scratch_dir,
            &probe_result.filename,
            &plan,
            worker_count,
            self.retry_policy,
            proxies,
            self.task.connect_timeout,
            self.task.idle_timeout,
            Arc::clone(&self.stop_flag),
            Arc::clone(&self.downloaded),
        );

        if let Err(e) = result {
            if self.stop_flag.load(Ordering::Relaxed) {
                return Err(EngineError::Cancelled);
            }
            return Err(e);
        }

        if self.stop_flag.load(Ordering::Relaxed) {
            return Err(EngineError::Cancelled);
        }

        assembler::assemble(scratch_dir, &probe_result.filename, &plan, destination, &self.stop_flag).map_err(
            |e| EngineError::Assembly(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())),
        )?;

        self.downloaded.store(total_size, Ordering::Relaxed);
        Ok(())
    }

    fn run_single_stream(
        &self,
        headers: &HashMap<String, String>,
        proxies: &Option<HashMap<String, String>>,
        probe_result: &ProbeResult,
        destination: &std::path::Path,
    ) -> Result<(), EngineError> {
        *self.total_size.lock().unwrap() = probe_result.total_size;

        single_stream_download(
            &probe_result.final_url,
            headers,
            proxies,
            self.task.connect_timeout,
            self.task.idle_timeout,
            destination,
            &self.stop_flag,
            &self.downloaded,
        )
        .map_err(|e| {
            if self.stop_flag.load(Ordering::Relaxed) {
                EngineError::Cancelled
            } else {
                EngineError::ChunkTransport {
                    index: 0,
                    source: SegmentError::Storage(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())),
                }
            }
        })?;

        if let Some(total) = probe_result.total_size {
            self.downloaded.store(total, Ordering::Relaxed);
        }
        Ok(())
    }
}

/// Non-ranged fallback: used when the server doesn't support byte ranges or
/// the total size is unknown. No part files are created — the response body
/// streams directly into the destination file.
#[allow(clippy::too_many_arguments)]
fn single_stream_download(
    url: &str,
    custom_headers: &HashMap<String, String>,
    proxies: &Option<HashMap<String, String>>,
    connect_timeout: Duration,
    idle_timeout: Duration,
    destination: &std::path::Path,
    stop_flag: &Arc<AtomicBool>,
    downloaded: &Arc<AtomicU64>,
) -> anyhow::Result<()> {
    use std::io::Write;

    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::File::create(destination)?;

    let mut easy = curl::easy::Easy::new();
    easy.url(url)?;
    easy.follow_location(true)?;
    easy.connect_timeout(connect_timeout)?;
    easy.timeout(idle_timeout)?;
    crate::proxy::apply_to_easy(&mut easy, proxies, url)?;

    let mut list = curl::easy::List::new();
    for (k, v) in custom_headers {
        list.append(&format!("{}: {}", k.trim(), v.trim()))?;
    }
    if !custom_headers.is_empty() {
        easy.http_headers(list)?;
    }

    let write_err: std::cell::RefCell<Option<std::io::Error>> = std::cell::RefCell::new(None);
    {
        let mut transfer = easy.transfer();
        transfer.write_function(|data| {
            if stop_flag.load(Ordering::Relaxed) {
                return Ok(0);
            }
            match file.write_all(data) {
                Ok(()) => {
                    downloaded.fetch_add(data.len() as u64, Ordering::Relaxed);
                    Ok(data.len())
                }
                Err(e) => {
                    *write_err.borrow_mut() = Some(e);
                    Ok(0)
                }
            }
        })?;
        transfer.perform()?;
    }
    if let Some(e) = write_err.into_inner() {
        anyhow::bail!("storage write failed: {}", e);
    }
    if stop_flag.load(Ordering::Relaxed) {
        anyhow::bail!("cancelled");
    }

    let code = easy.response_code()?;
    if !(200..300).contains(&code) {
        anyhow::bail!("HTTP {}", code);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_snapshot_unknown_before_probe() {
        let task = DownloadTask {
            url: "https://example.com/file.bin".to_string(),
            download_dir: PathBuf::from("/tmp"),
            chunk_size_bytes: 1024,
            worker_count: 2,
            proxy_mode: ProxyMode::System,
            proxies: None,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
        };
        let controller = Task::construct(task, RetryPolicy::default());
        let snap = controller.progress_snapshot();
        assert_eq!(snap, ProgressSnapshot::unknown());
    }

    #[test]
    fn initial_state_is_idle() {
        let task = DownloadTask {
            url: "https://example.com/file.bin".to_string(),
            download_dir: PathBuf::from("/tmp"),
            chunk_size_bytes: 1024,
            worker_count: 2,
            proxy_mode: ProxyMode::System,
            proxies: None,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
        };
        let controller = Task::construct(task, RetryPolicy::default());
        assert_eq!(controller.state(), TaskState::Idle);
        assert!(!controller.is_completed());
    }
}
