//! Range worker pool: downloads every incomplete chunk with bounded
//! concurrency, retrying transient failures and honoring cooperative
//! cancellation.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use crate::error::EngineError;
use crate::planner::{Chunk, Plan};
use crate::proxy::apply_to_easy;
use crate::retry::{run_with_retry, RetryPolicy, SegmentError};
use crate::storage::{part_path, part_size_on_disk, PartFileWriter};

/// Shared cancellation flag. `true` means every worker should stop at its
/// next suspension point.
pub type StopFlag = Arc<AtomicBool>;
/// Shared monotonic counter of bytes written across all chunks, used for
/// non-blocking progress snapshots.
pub type ProgressCounter = Arc<AtomicU64>;

/// Per-chunk outcome reported back to the driver.
pub enum ChunkOutcome {
    Completed,
    Cancelled,
    Failed(usize, SegmentError),
}

/// Runs every incomplete chunk in `plan` with at most `worker_count`
/// concurrent downloads. Returns `Ok(())` only if every chunk completed or
/// was already complete on disk; a chunk failure short-circuits remaining
/// queued work but lets in-flight chunks finish.
#[allow(clippy::too_many_arguments)]
pub fn run_pool(
    url: &str,
    custom_headers: &HashMap<String, String>,
    scratch_dir: &Path,
    filename: &str,
    plan: &Plan,
    worker_count: usize,
    retry_policy: RetryPolicy,
    proxies: &Option<HashMap<String, String>>,
    connect_timeout: Duration,
    idle_timeout: Duration,
    stop_flag: StopFlag,
    progress: ProgressCounter,
) -> Result<(), EngineError> {
    let incomplete: Vec<Chunk> = plan
        .chunks
        .iter()
        .copied()
        .filter(|c| {
            let path = part_path(scratch_dir, filename, c.index);
            let done = part_size_on_disk(&path);
            if done > 0 {
                progress.fetch_add(done.min(c.len()), Ordering::Relaxed);
            }
            done < c.len()
        })
        .collect();

    if incomplete.is_empty() {
        return Ok(());
    }

    let work: Arc<std::sync::Mutex<VecDeque<Chunk>>> =
        Arc::new(std::sync::Mutex::new(incomplete.into_iter().collect()));
    let num_workers = worker_count.min(work.lock().unwrap().len()).max(1);
    let (tx, rx) = mpsc::channel::<ChunkOutcome>();
    let fatal = Arc::new(AtomicBool::new(false));

    let mut handles = Vec::with_capacity(num_workers);
    for _ in 0..num_workers {
        let work = Arc::clone(&work);
        let tx = tx.clone();
        let stop_flag = Arc::clone(&stop_flag);
        let progress = Arc::clone(&progress);
        let fatal = Arc::clone(&fatal);
        let url = url.to_string();
        let headers = custom_headers.clone();
        let proxies = proxies.clone();
        let scratch_dir = scratch_dir.to_path_buf();
        let filename = filename.to_string();

        handles.push(std::thread::spawn(move || loop {
            if stop_flag.load(Ordering::Relaxed) || fatal.load(Ordering::Relaxed) {
                break;
            }
            let chunk = match work.lock().unwrap().pop_front() {
                Some(c) => c,
                None => break,
            };
            if stop_flag.load(Ordering::Relaxed) {
                let _ = tx.send(ChunkOutcome::Cancelled);
                break;
            }

            let index = chunk.index;
            let part = part_path(&scratch_dir, &filename, index);
            let result = run_with_retry(&retry_policy, || {
                download_chunk(&url, &headers, chunk, &part, &proxies, connect_timeout, idle_timeout, &stop_flag, &progress)
            });

            match result {
                Ok(()) => {
                    let _ = tx.send(ChunkOutcome::Completed);
                }
                Err(SegmentError::Storage(e)) if e.kind() == std::io::ErrorKind::Interrupted => {
                    let _ = tx.send(ChunkOutcome::Cancelled);
                }
                Err(e) => {
                    fatal.store(true, Ordering::Relaxed);
                    let _ = tx.send(ChunkOutcome::Failed(index, e));
                }
            }
        }));
    }
    drop(tx);

    let mut first_error: Option<EngineError> = None;
    let mut cancelled = false;
    for outcome in rx {
        match outcome {
            ChunkOutcome::Completed => {}
            ChunkOutcome::Cancelled => cancelled = true,
            ChunkOutcome::Failed(index, e) => {
                if first_error.is_none() {
                    first_error = Some(match e {
                        SegmentError::PartialTransfer { expected, received } => {
                            EngineError::ChunkIntegrity { index, expected, received }
                        }
                        other => EngineError::ChunkTransport { index, source: other },
                    });
                }
            }
        }
    }

    for h in handles {
        let _ = h.join();
    }

    if let Some(e) = first_error {
        return Err(e);
    }
    if cancelled || stop_flag.load(Ordering::Relaxed) {
        return Err(EngineError::Cancelled);
    }
    Ok(())
}

/// Downloads (or resumes) a single chunk. Re-reads the part file's on-disk
/// size at the top of every attempt, so a retry naturally continues from
/// wherever the previous attempt left off.
#[allow(clippy::too_many_arguments)]
fn download_chunk(
    url: &str,
    custom_headers: &HashMap<String, String>,
    chunk: Chunk,
    part_file_path: &Path,
    proxies: &Option<HashMap<String, String>>,
    connect_timeout: Duration,
    idle_timeout: Duration,
    stop_flag: &StopFlag,
    progress: &ProgressCounter,
) -> Result<(), SegmentError> {
    let already = part_size_on_disk(part_file_path);
    let remaining = chunk.len().saturating_sub(already);
    if remaining == 0 {
        return Ok(());
    }
    let range_start = chunk.start + already;
    let range_end = chunk.end;

    let mut writer = PartFileWriter::open_for_append(part_file_path, remaining).map_err(|e| {
        SegmentError::Storage(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
    })?;

    let mut easy = curl::easy::Easy::new();
    easy.url(url).map_err(SegmentError::Curl)?;
    easy.follow_location(false).map_err(SegmentError::Curl)?;
    easy.connect_timeout(connect_timeout).map_err(SegmentError::Curl)?;
    easy.low_speed_limit(1024).map_err(SegmentError::Curl)?;
    easy.low_speed_time(idle_timeout).map_err(SegmentError::Curl)?;
    easy.timeout(Duration::from_secs(3600)).map_err(SegmentError::Curl)?;
    easy.range(&format!("{}-{}", range_start, range_end)).map_err(SegmentError::Curl)?;
    apply_to_easy(&mut easy, proxies, url).map_err(SegmentError::Curl)?;

    let mut list = curl::easy::List::new();
    for (k, v) in custom_headers {
        list.append(&format!("{}: {}", k.trim(), v.trim())).map_err(SegmentError::Curl)?;
    }
    if !custom_headers.is_empty() {
        easy.http_headers(list).map_err(SegmentError::Curl)?;
    }

    let mut written_this_attempt = 0u64;
    let write_error: std::cell::RefCell<Option<std::io::Error>> = std::cell::RefCell::new(None);

    {
        let mut transfer = easy.transfer();
        transfer
            .write_function(|data| {
                if stop_flag.load(Ordering::Relaxed) {
                    return Ok(0);
                }
                // Never write past this chunk's end byte, even if the server
                // ignored the Range request and sent more.
                let budget = remaining - written_this_attempt;
                let slice = if data.len() as u64 > budget {
                    &data[..budget as usize]
                } else {
                    data
                };
                if slice.is_empty() {
                    return Ok(data.len());
                }
                match writer.write_all(slice) {
                    Ok(()) => {
                        written_this_attempt += slice.len() as u64;
                        progress.fetch_add(slice.len() as u64, Ordering::Relaxed);
                        Ok(data.len())
                    }
                    Err(e) => {
                        *write_error.borrow_mut() = Some(e);
                        Ok(0)
                    }
                }
            })
            .map_err(SegmentError::Curl)?;

        if let Err(e) = transfer.perform() {
            if let Some(err) = write_error.into_inner() {
                return Err(SegmentError::Storage(err));
            }
            if stop_flag.load(Ordering::Relaxed) {
                return Err(SegmentError::Storage(std::io::Error::new(
                    std::io::ErrorKind::Interrupted,
                    "stop flag observed mid-transfer",
                )));
            }
            return Err(SegmentError::Curl(e));
        }
    }

    if let Some(err) = write_error.into_inner() {
        return Err(SegmentError::Storage(err));
    }

    let code = easy.response_code().map_err(SegmentError::Curl)? as u32;
    if code != 206 && code != 200 {
        return Err(SegmentError::Http(code));
    }

    let total_on_disk = part_size_on_disk(part_file_path);
    if total_on_disk != chunk.len() {
        return Err(SegmentError::PartialTransfer {
            expected: chunk.len(),
            received: total_on_disk,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn already_complete_chunk_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let chunk = Chunk { index: 0, start: 0, end: 4 };
        let p = part_path(dir.path(), "f.bin", 0);
        std::fs::write(&p, b"hello").unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let progress = Arc::new(AtomicU64::new(0));
        let result = download_chunk(
            "http://unused.invalid",
            &HashMap::new(),
            chunk,
            &p,
            &None,
            Duration::from_secs(30),
            Duration::from_secs(60),
            &stop,
            &progress,
        );
        assert!(result.is_ok());
    }

    /// A bare-bones range server: every GET is answered with the requested
    /// byte range (or the whole body, if no Range header is present). No
    /// HEAD support — `run_pool` only ever issues ranged GETs.
    fn start_test_range_server(body: Vec<u8>) -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().unwrap().port();
        let body = Arc::new(body);
        std::thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let body = Arc::clone(&body);
                std::thread::spawn(move || serve_test_range_request(stream, &body));
            }
        });
        format!("http://127.0.0.1:{}/", port)
    }

    fn serve_test_range_request(mut stream: std::net::TcpStream, body: &[u8]) {
        use std::io::{Read, Write};
        let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
        let mut buf = [0u8; 8192];
        let n = match stream.read(&mut buf) {
            Ok(n) if n > 0 => n,
            _ => return,
        };
        let request = match std::str::from_utf8(&buf[..n]) {
            Ok(s) => s,
            Err(_) => return,
        };
        let total = body.len() as u64;
        let mut range = None;
        for line in request.lines() {
            if let Some((name, value)) = line.split_once(':') {
                if name.trim().eq_ignore_ascii_case("range") {
                    let lower = value.trim().to_lowercase();
                    if let Some(rest) = lower.strip_prefix("bytes=") {
                        if let Some((a, b)) = rest.split_once('-') {
                            let start = a.trim().parse::<u64>().unwrap_or(0);
                            let end = b.trim().parse::<u64>().unwrap_or(total.saturating_sub(1));
                            range = Some((start, end));
                        }
                    }
                }
            }
        }
        let (start, end_incl) = range.unwrap_or((0, total.saturating_sub(1)));
        let start = start.min(total);
        let end_incl = end_incl.min(total.saturating_sub(1));
        let slice = if start > end_incl { &body[0..0] } else { &body[start as usize..=end_incl as usize] };
        let response = format!(
            "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {}-{}/{}\r\n\r\n",
            slice.len(),
            start,
            end_incl,
            total
        );
        let _ = stream.write_all(response.as_bytes());
        let _ = stream.write_all(slice);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]
        #[test]
        fn progress_counter_never_decreases_across_chunks(
            total_size in 8usize * 1024..64usize * 1024,
            worker_count in 2usize..6usize,
        ) {
            let body: Vec<u8> = (0u8..250).cycle().take(total_size).collect();
            let url = start_test_range_server(body);
            let dir = tempfile::tempdir().unwrap();
            let plan = crate::planner::plan_chunks(total_size as u64, 4096, worker_count);

            let progress: ProgressCounter = Arc::new(AtomicU64::new(0));
            let stop: StopFlag = Arc::new(AtomicBool::new(false));
            let done = Arc::new(AtomicBool::new(false));
            let samples: Arc<std::sync::Mutex<Vec<u64>>> = Arc::new(std::sync::Mutex::new(Vec::new()));

            let sampler_progress = Arc::clone(&progress);
            let sampler_done = Arc::clone(&done);
            let sampler_samples = Arc::clone(&samples);
            let sampler = std::thread::spawn(move || {
                while !sampler_done.load(Ordering::Relaxed) {
                    sampler_samples.lock().unwrap().push(sampler_progress.load(Ordering::Relaxed));
                    std::thread::sleep(Duration::from_micros(200));
                }
                sampler_samples.lock().unwrap().push(sampler_progress.load(Ordering::Relaxed));
            });

            let result = run_pool(
                &url,
                &HashMap::new(),
                dir.path(),
                "f.bin",
                &plan,
                worker_count,
                RetryPolicy::default(),
                &None,
                Duration::from_secs(5),
                Duration::from_secs(5),
                Arc::clone(&stop),
                Arc::clone(&progress),
            );

            done.store(true, Ordering::Relaxed);
            sampler.join().unwrap();

            prop_assert!(result.is_ok());
            let seq = samples.lock().unwrap().clone();
            for w in seq.windows(2) {
                prop_assert!(w[1] >= w[0]);
            }
        }
    }
}
