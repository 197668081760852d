//! Error taxonomy for the downloader engine.

use thiserror::Error;

/// Errors surfaced by the public engine API.
///
/// Transient network errors are recovered locally by the retry loop in
/// [`crate::retry`] and never reach this type; these variants are what
/// remains once the retry budget for a step is exhausted.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("probing {url} failed: {reason}")]
    Probe { url: String, reason: String },

    #[error("cannot plan chunks: {reason}")]
    Plan { reason: String },

    #[error("chunk {index} transport failed after retries: {source}")]
    ChunkTransport {
        index: usize,
        #[source]
        source: crate::retry::SegmentError,
    },

    #[error("chunk {index} integrity check failed: expected {expected} bytes, got {received}")]
    ChunkIntegrity {
        index: usize,
        expected: u64,
        received: u64,
    },

    #[error("assembling final file failed: {0}")]
    Assembly(#[source] std::io::Error),

    /// Not a hard failure: the stop flag was observed. The task transitions
    /// to `Stopped`, not `Failed`, when this is returned internally.
    #[error("cancelled")]
    Cancelled,
}
