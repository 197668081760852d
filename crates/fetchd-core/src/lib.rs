//! Resumable, multi-connection HTTP file downloader engine.
//!
//! The public surface is [`task::Task`] / [`task::DownloadTask`] (construct,
//! start, stop, progress) plus [`filename::parse_filename_from_headers`] for
//! preflighting a filename without downloading.

pub mod assembler;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod filename;
pub mod logging;
pub mod planner;
pub mod probe;
pub mod proxy;
pub mod retry;
pub mod storage;
pub mod task;
pub mod worker;

pub use error::EngineError;
pub use filename::parse_filename_from_headers;
pub use task::{DownloadTask, ProgressSnapshot, Task, TaskState};
