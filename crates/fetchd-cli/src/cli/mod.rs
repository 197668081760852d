//! CLI for the fetchd downloader engine.

mod commands;

use anyhow::Result;
use clap::Parser;
use fetchd_core::config;
use std::path::PathBuf;

use commands::{run_get, GetArgs};

/// Download a single URL, resuming automatically if run again against the
/// same destination directory while a prior attempt's scratch state is
/// still present.
#[derive(Debug, Parser)]
#[command(name = "fetchd")]
#[command(about = "fetchd: resumable, multi-connection HTTP file downloader", long_about = None)]
pub struct Cli {
    /// Direct HTTP/HTTPS URL to download.
    pub url: String,

    /// Directory where the file will be saved (default: current directory).
    #[arg(long, value_name = "DIR")]
    pub dir: Option<PathBuf>,

    /// Size of each downloaded chunk, in MiB (default: from config).
    #[arg(long, value_name = "N")]
    pub chunk_size_mb: Option<u64>,

    /// Number of concurrent range workers (default: from config).
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// "system" (consult HTTP_PROXY/HTTPS_PROXY/ALL_PROXY) or "manual" (use only --proxy).
    #[arg(long, value_name = "MODE", default_value = "system")]
    pub proxy_mode: String,

    /// Explicit proxy mapping entry, scheme=url (e.g. http=http://localhost:3128). Repeatable.
    #[arg(long = "proxy", value_name = "SCHEME=URL")]
    pub proxies: Vec<String>,
}

impl Cli {
    pub fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        let download_dir = match cli.dir {
            Some(dir) => dir,
            None => std::env::current_dir()?,
        };

        run_get(
            &cfg,
            GetArgs {
                url: cli.url,
                download_dir,
                chunk_size_mb: cli.chunk_size_mb,
                workers: cli.workers,
                proxy_mode: cli.proxy_mode,
                proxies: cli.proxies,
            },
        )
    }
}
