//! Chunk planning: maps a total size and task configuration to a list of
//! non-overlapping byte ranges.

/// A single chunk: inclusive byte range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub start: u64,
    /// Inclusive end offset.
    pub end: u64,
}

impl Chunk {
    /// Number of bytes covered by this chunk.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Range` header value for this chunk: `bytes=start-end`.
    pub fn range_header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// A complete plan: every chunk needed to cover `total_size` bytes.
#[derive(Debug, Clone)]
pub struct Plan {
    pub total_size: u64,
    pub chunks: Vec<Chunk>,
}

/// Builds a plan for `total_size` bytes given a target `chunk_size_bytes` and
/// `worker_count`.
///
/// - If `chunk_size_bytes * worker_count >= total_size`, produces exactly
///   `worker_count` roughly-equal chunks (so small files still use every
///   worker).
/// - Otherwise produces `ceil(total_size / chunk_size_bytes)` chunks of
///   `chunk_size_bytes`, with a possibly-shorter final chunk.
///
/// Returns a single chunk covering the whole file if `total_size` is 0 (an
/// empty plan would have no work for the assembler to do; the caller's
/// probe step should reject a zero-length file before planning).
pub fn plan_chunks(total_size: u64, chunk_size_bytes: u64, worker_count: usize) -> Plan {
    assert!(chunk_size_bytes > 0, "chunk_size_bytes must be positive");
    assert!(worker_count > 0, "worker_count must be positive");

    if total_size == 0 {
        return Plan {
            total_size: 0,
            chunks: vec![Chunk { index: 0, start: 0, end: 0 }],
        };
    }

    let chunks = if chunk_size_bytes.saturating_mul(worker_count as u64) >= total_size {
        equal_split(total_size, worker_count)
    } else {
        fixed_size_split(total_size, chunk_size_bytes)
    };

    Plan { total_size, chunks }
}

fn equal_split(total_size: u64, worker_count: usize) -> Vec<Chunk> {
    let n = worker_count as u64;
    let base = total_size / n;
    let mut chunks = Vec::with_capacity(worker_count);
    let mut offset = 0u64;
    for i in 0..worker_count {
        let is_last = i + 1 == worker_count;
        let end = if is_last { total_size - 1 } else { offset + base - 1 };
        chunks.push(Chunk { index: i, start: offset, end });
        offset = end + 1;
    }
    chunks
}

fn fixed_size_split(total_size: u64, chunk_size_bytes: u64) -> Vec<Chunk> {
    let count = total_size.div_ceil(chunk_size_bytes) as usize;
    let mut chunks = Vec::with_capacity(count);
    let mut offset = 0u64;
    for i in 0..count {
        let end = (offset + chunk_size_bytes - 1).min(total_size - 1);
        chunks.push(Chunk { index: i, start: offset, end });
        offset = end + 1;
    }
    chunks
}
