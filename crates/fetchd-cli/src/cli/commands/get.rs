//! `fetchd get` - construct and drive a single [`fetchd_core::Task`] to
//! completion, printing a refreshed progress line until it finishes.

use anyhow::{bail, Result};
use fetchd_core::config::EngineConfig;
use fetchd_core::proxy::ProxyMode;
use fetchd_core::task::{DownloadTask, Task, TaskState};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct GetArgs {
    pub url: String,
    pub download_dir: PathBuf,
    pub chunk_size_mb: Option<u64>,
    pub workers: Option<usize>,
    pub proxy_mode: String,
    pub proxies: Vec<String>,
}

fn parse_proxy_mode(mode: &str) -> Result<ProxyMode> {
    match mode {
        "system" => Ok(ProxyMode::System),
        "manual" => Ok(ProxyMode::Manual),
        other => bail!("invalid --proxy-mode {:?}, expected \"system\" or \"manual\"", other),
    }
}

pub fn run_get(cfg: &EngineConfig, args: GetArgs) -> Result<()> {
    let mut task = DownloadTask::new(args.url, args.download_dir, cfg);
    if let Some(mb) = args.chunk_size_mb {
        task = task.with_chunk_size_bytes(mb * 1024 * 1024);
    }
    if let Some(workers) = args.workers {
        task = task.with_worker_count(workers);
    }
    task = task.with_proxy_mode(parse_proxy_mode(&args.proxy_mode)?);
    if !args.proxies.is_empty() {
        task = task.with_proxies(parse_proxy_pairs(&args.proxies)?);
    }

    let controller = Task::construct(task, cfg.retry_policy());

    let ctrlc_task = Arc::clone(&controller);
    ctrlc::set_handler(move || {
        eprintln!("\nreceived interrupt, stopping gracefully...");
        ctrlc_task.stop(true);
    })?;

    controller.start();

    loop {
        let snapshot = controller.progress_snapshot();
        if snapshot.total_bytes >= 0 {
            let done_mib = snapshot.downloaded_bytes as f64 / 1_048_576.0;
            let total_mib = snapshot.total_bytes as f64 / 1_048_576.0;
            let pct = if snapshot.total_bytes > 0 {
                snapshot.downloaded_bytes as f64 / snapshot.total_bytes as f64 * 100.0
            } else {
                0.0
            };
            let eta = if snapshot.eta_seconds >= 0 {
                format!("{}s", snapshot.eta_seconds)
            } else {
                "?".to_string()
            };
            print!("\r  {:.1} / {:.1} MiB ({:.1}%)  ETA {}   ", done_mib, total_mib, pct, eta);
            use std::io::Write;
            let _ = std::io::stdout().flush();
        }

        match controller.state() {
            TaskState::Running | TaskState::Idle => {
                std::thread::sleep(POLL_INTERVAL);
            }
            TaskState::Completed => {
                println!();
                println!("done.");
                return Ok(());
            }
            TaskState::Stopped => {
                println!();
                bail!("download stopped before completion; rerun the same command to resume");
            }
            TaskState::Failed => {
                println!();
                bail!("download failed");
            }
        }
    }
}

fn parse_proxy_pairs(pairs: &[String]) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    for pair in pairs {
        match pair.split_once('=') {
            Some((scheme, url)) if !scheme.is_empty() && !url.is_empty() => {
                map.insert(scheme.to_string(), url.to_string());
            }
            _ => bail!("invalid --proxy value {:?}, expected scheme=url (e.g. http=host:3128)", pair),
        }
    }
    Ok(map)
}
