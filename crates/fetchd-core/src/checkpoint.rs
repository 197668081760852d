//! Checkpoint sidecar: the plan parameters used to produce the current set
//! of part files, so a resumed run stays aligned with chunk boundaries
//! already written to disk.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub url: String,
    pub chunk_size_bytes: u64,
    pub max_workers: usize,
}

/// Path of the checkpoint sidecar for a scratch directory, named after the
/// target filename with a `.state` suffix: `D/S/F.state`.
pub fn checkpoint_path(scratch_dir: &Path, filename: &str) -> PathBuf {
    scratch_dir.join(format!("{}.state", filename))
}

/// Loads the checkpoint at `path`, if present.
///
/// Unknown fields are ignored by `serde_json` by default. A missing file
/// returns `Ok(None)`; a corrupt file is also treated as absent, since a
/// checkpoint is advisory and the caller can always fall back to fresh
/// task configuration.
pub fn load(path: &Path) -> Result<Option<Checkpoint>> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("read checkpoint: {}", path.display())),
    };
    match serde_json::from_slice(&bytes) {
        Ok(cp) => Ok(Some(cp)),
        Err(_) => Ok(None),
    }
}

/// Writes the checkpoint to `path` using write-then-rename so a crash never
/// leaves a truncated sidecar in place.
pub fn save(path: &Path, checkpoint: &Checkpoint) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("create dir: {}", parent.display()))?;
    }
    let json = serde_json::to_vec_pretty(checkpoint).context("serialize checkpoint")?;
    let tmp_path = path.with_extension("state.tmp");
    std::fs::write(&tmp_path, json).with_context(|| format!("write {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("rename {} to {}", tmp_path.display(), path.display()))?;
    Ok(())
}

/// Removes the checkpoint file, if present. Used by the assembler after a
/// successful run.
pub fn remove(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("remove checkpoint: {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = checkpoint_path(dir.path(), "file.iso");
        assert!(load(&path).unwrap().is_none());
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = checkpoint_path(dir.path(), "file.iso");
        let cp = Checkpoint {
            url: "https://example.com/file.iso".to_string(),
            chunk_size_bytes: 20 * 1024 * 1024,
            max_workers: 8,
        };
        save(&path, &cp).unwrap();
        let loaded = load(&path).unwrap().unwrap();
        assert_eq!(loaded, cp);
    }

    #[test]
    fn corrupt_checkpoint_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = checkpoint_path(dir.path(), "file.iso");
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(&path, b"not json").unwrap();
        assert!(load(&path).unwrap().is_none());
    }

    #[test]
    fn remove_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let path = checkpoint_path(dir.path(), "file.iso");
        assert!(remove(&path).is_ok());
    }

    #[test]
    fn save_overwrites_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = checkpoint_path(dir.path(), "file.iso");
        let cp1 = Checkpoint { url: "https://a".to_string(), chunk_size_bytes: 1, max_workers: 1 };
        let cp2 = Checkpoint { url: "https://b".to_string(), chunk_size_bytes: 2, max_workers: 2 };
        save(&path, &cp1).unwrap();
        save(&path, &cp2).unwrap();
        assert_eq!(load(&path).unwrap().unwrap(), cp2);
    }
}
