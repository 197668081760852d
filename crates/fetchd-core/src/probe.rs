//! Metadata probe: resolve the final URL, filename, size, and range support
//! before planning a download.

use anyhow::Result;
use std::collections::HashMap;
use std::str;
use std::time::Duration;

use crate::filename::derive_filename;
use crate::proxy::apply_to_easy;
use crate::retry::{run_with_retry, RetryPolicy, SegmentError};

/// Outcome of probing a URL.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub final_url: String,
    pub filename: String,
    /// `None` means the length could not be determined (single-stream
    /// fallback only).
    pub total_size: Option<u64>,
    pub accepts_ranges: bool,
}

/// Probes `url`: issues a HEAD with redirects followed; if that fails or
/// returns no usable length, falls back to a ranged GET of `bytes=0-1` whose
/// `206` status both confirms range support and yields the total length via
/// `Content-Range`. Each attempt is retried under `retry_policy` before the
/// other is tried, matching the configured retry budget.
#[allow(clippy::too_many_arguments)]
pub fn probe(
    url: &str,
    custom_headers: &HashMap<String, String>,
    proxies: &Option<HashMap<String, String>>,
    connect_timeout: Duration,
    idle_timeout: Duration,
    retry_policy: &RetryPolicy,
) -> Result<ProbeResult> {
    let head = run_with_retry(retry_policy, || {
        probe_head(url, custom_headers, proxies, connect_timeout, idle_timeout)
    });

    match head {
        Ok(head) if head.content_length.is_some() => Ok(ProbeResult {
            final_url: head.final_url.clone(),
            filename: derive_filename(&head.final_url, head.content_disposition.as_deref()),
            total_size: head.content_length,
            accepts_ranges: head.accept_ranges,
        }),
        _ => run_with_retry(retry_policy, || {
            probe_range_fallback(url, custom_headers, proxies, connect_timeout, idle_timeout)
        })
        .map_err(|e| anyhow::anyhow!("probing {} failed after retries: {}", url, e)),
    }
}

struct HeadOutcome {
    final_url: String,
    content_length: Option<u64>,
    accept_ranges: bool,
    content_disposition: Option<String>,
}

fn probe_head(
    url: &str,
    custom_headers: &HashMap<String, String>,
    proxies: &Option<HashMap<String, String>>,
    connect_timeout: Duration,
    idle_timeout: Duration,
) -> Result<HeadOutcome, SegmentError> {
    let mut headers: Vec<String> = Vec::new();

    let mut easy = curl::easy::Easy::new();
    easy.url(url).map_err(SegmentError::Curl)?;
    easy.nobody(true).map_err(SegmentError::Curl)?;
    easy.follow_location(true).map_err(SegmentError::Curl)?;
    easy.connect_timeout(connect_timeout).map_err(SegmentError::Curl)?;
    easy.timeout(idle_timeout).map_err(SegmentError::Curl)?;
    apply_to_easy(&mut easy, proxies, url).map_err(SegmentError::Curl)?;

    let mut list = curl::easy::List::new();
    for (k, v) in custom_headers {
        list.append(&format!("{}: {}", k.trim(), v.trim())).map_err(SegmentError::Curl)?;
    }
    if !custom_headers.is_empty() {
        easy.http_headers(list).map_err(SegmentError::Curl)?;
    }

    {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|data| {
                if let Ok(s) = str::from_utf8(data) {
                    headers.push(s.trim_end().to_string());
                }
                true
            })
            .map_err(SegmentError::Curl)?;
        transfer.perform().map_err(SegmentError::Curl)?;
    }

    let code = easy.response_code().map_err(SegmentError::Curl)?;
    if !(200..300).contains(&code) {
        return Err(SegmentError::Http(code));
    }

    let final_url =
        easy.effective_url().map_err(SegmentError::Curl)?.map(str::to_string).unwrap_or_else(|| url.to_string());
    let parsed = parse_headers(&headers);
    Ok(HeadOutcome {
        final_url,
        content_length: parsed.content_length,
        accept_ranges: parsed.accept_ranges,
        content_disposition: parsed.content_disposition,
    })
}

fn probe_range_fallback(
    url: &str,
    custom_headers: &HashMap<String, String>,
    proxies: &Option<HashMap<String, String>>,
    connect_timeout: Duration,
    idle_timeout: Duration,
) -> Result<ProbeResult, SegmentError> {
    let mut headers: Vec<String> = Vec::new();

    let mut easy = curl::easy::Easy::new();
    easy.url(url).map_err(SegmentError::Curl)?;
    easy.follow_location(true).map_err(SegmentError::Curl)?;
    easy.connect_timeout(connect_timeout).map_err(SegmentError::Curl)?;
    easy.timeout(idle_timeout).map_err(SegmentError::Curl)?;
    easy.range("0-1").map_err(SegmentError::Curl)?;
    apply_to_easy(&mut easy, proxies, url).map_err(SegmentError::Curl)?;

    let mut list = curl::easy::List::new();
    for (k, v) in custom_headers {
        list.append(&format!("{}: {}", k.trim(), v.trim())).map_err(SegmentError::Curl)?;
    }
    if !custom_headers.is_empty() {
        easy.http_headers(list).map_err(SegmentError::Curl)?;
    }

    {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|data| {
                if let Ok(s) = str::from_utf8(data) {
                    headers.push(s.trim_end().to_string());
                }
                true
            })
            .map_err(SegmentError::Curl)?;
        transfer.write_function(|data| Ok(data.len())).map_err(SegmentError::Curl)?;
        transfer.perform().map_err(SegmentError::Curl)?;
    }

    let code = easy.response_code().map_err(SegmentError::Curl)?;
    let final_url =
        easy.effective_url().map_err(SegmentError::Curl)?.map(str::to_string).unwrap_or_else(|| url.to_string());
    let parsed = parse_headers(&headers);

    let accepts_ranges = code == 206 || parsed.accept_ranges;
    let total_size = if code == 206 { parsed.content_range_total.or(parsed.content_length) } else { parsed.content_length };

    if !(200..300).contains(&code) {
        return Err(SegmentError::Http(code));
    }

    Ok(ProbeResult {
        filename: derive_filename(&final_url, parsed.content_disposition.as_deref()),
        final_url,
        total_size,
        accepts_ranges,
    })
}

#[derive(Debug, Default)]
struct ParsedHeaders {
    content_length: Option<u64>,
    accept_ranges: bool,
    content_disposition: Option<String>,
    content_range_total: Option<u64>,
}

fn parse_headers(lines: &[String]) -> ParsedHeaders {
    let mut out = ParsedHeaders::default();
    for line in lines {
        let line = line.trim();
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            out.content_length = value.parse::<u64>().ok();
        } else if name.eq_ignore_ascii_case("accept-ranges") {
            out.accept_ranges = value.eq_ignore_ascii_case("bytes");
        } else if name.eq_ignore_ascii_case("content-disposition") {
            out.content_disposition = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("content-range") {
            // "bytes 0-1/12345"
            if let Some(total) = value.rsplit('/').next() {
                out.content_range_total = total.trim().parse::<u64>().ok();
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_headers_content_length_and_ranges() {
        let lines = vec![
            "HTTP/1.1 200 OK".to_string(),
            "Content-Length: 12345".to_string(),
            "Accept-Ranges: bytes".to_string(),
        ];
        let r = parse_headers(&lines);
        assert_eq!(r.content_length, Some(12345));
        assert!(r.accept_ranges);
    }

    #[test]
    fn parse_headers_content_range_total() {
        let lines = vec!["Content-Range: bytes 0-1/998877".to_string()];
        let r = parse_headers(&lines);
        assert_eq!(r.content_range_total, Some(998877));
    }

    #[test]
    fn parse_headers_no_ranges() {
        let lines = vec!["Content-Length: 999".to_string(), "Accept-Ranges: none".to_string()];
        let r = parse_headers(&lines);
        assert_eq!(r.content_length, Some(999));
        assert!(!r.accept_ranges);
    }

    #[test]
    fn parse_headers_content_disposition() {
        let lines = vec!["Content-Disposition: attachment; filename=\"report.pdf\"".to_string()];
        let r = parse_headers(&lines);
        assert!(r.content_disposition.unwrap().contains("report.pdf"));
    }
}
