//! Per-chunk part file storage.
//!
//! Unlike a single shared preallocated file, each chunk owns exactly one part
//! file (`F.part<i>`) for the lifetime of a download. Progress for a chunk is
//! the on-disk size of its part file — there is no separate completion
//! index to keep in sync with the bytes actually written.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Path of part file `index` inside `scratch_dir`, named after the target
/// filename: `D/S/F.part<i>`.
pub fn part_path(scratch_dir: &Path, filename: &str, index: usize) -> PathBuf {
    scratch_dir.join(format!("{}.part{}", filename, index))
}

/// Bytes already written for a chunk's part file. Returns 0 if the file does
/// not exist yet — this is the sole source of truth for chunk progress.
pub fn part_size_on_disk(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// An open handle appending to one chunk's part file.
///
/// Not shared across threads: each chunk is downloaded by exactly one
/// worker, so there is no need for the concurrent `pwrite` pattern a
/// shared-file design would require.
pub struct PartFileWriter {
    file: File,
}

impl PartFileWriter {
    /// Opens `path` for appending, creating it if absent, and preallocates
    /// `remaining_len` bytes beyond whatever is already on disk (a fresh
    /// chunk's full length, or what's left of one being resumed). Used both
    /// for a fresh chunk and for resuming one with existing bytes on disk.
    pub fn open_for_append(path: &Path, remaining_len: u64) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("create dir: {}", parent.display()))?;
        }
        let file = File::options()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open part file: {}", path.display()))?;
        let writer = Self { file };
        writer.try_preallocate(remaining_len);
        Ok(writer)
    }

    /// Appends `data` to the part file.
    pub fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.file.write_all(data)
    }

    /// Flushes buffered writes and asks the OS to persist them.
    pub fn sync(&self) -> std::io::Result<()> {
        self.file.sync_all()
    }

    /// Preallocates `additional` bytes beyond the current length, best
    /// effort, to reduce fragmentation on large chunks. Never considered an
    /// error if it fails: part files grow correctly via plain appends
    /// regardless.
    fn try_preallocate(&self, additional: u64) {
        #[cfg(unix)]
        {
            let fd = self.file.as_raw_fd();
            let current_len = self.file.metadata().map(|m| m.len()).unwrap_or(0);
            unsafe {
                let _ = libc::posix_fallocate(fd, current_len as libc::off_t, additional as libc::off_t);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = additional;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_path_naming() {
        let dir = Path::new("/tmp/scratch");
        assert_eq!(part_path(dir, "file.iso", 3), PathBuf::from("/tmp/scratch/file.iso.part3"));
    }

    #[test]
    fn size_on_disk_absent_file_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("missing.part0");
        assert_eq!(part_size_on_disk(&p), 0);
    }

    #[test]
    fn write_and_resume_append() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("out.part0");

        {
            let mut w = PartFileWriter::open_for_append(&p, 5).unwrap();
            w.write_all(b"hello").unwrap();
            w.sync().unwrap();
        }
        assert_eq!(part_size_on_disk(&p), 5);

        {
            let mut w = PartFileWriter::open_for_append(&p, 5).unwrap();
            w.write_all(b"world").unwrap();
            w.sync().unwrap();
        }
        assert_eq!(part_size_on_disk(&p), 10);

        let contents = std::fs::read(&p).unwrap();
        assert_eq!(&contents, b"helloworld");
    }
}
