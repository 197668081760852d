//! Assembles completed part files into the final artifact and cleans up
//! scratch state.

use anyhow::{Context, Result};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::checkpoint;
use crate::planner::Plan;
use crate::storage::part_path;

/// Concatenates every chunk's part file, in plan order, into `destination`,
/// deleting each part file as soon as it has been copied. On success,
/// removes `scratch_dir` entirely (including the checkpoint sidecar).
///
/// If `stop_flag` becomes set mid-copy, aborts before touching the next part
/// file; the destination (partially written) and the remaining parts are
/// left in place so a later run can resume.
pub fn assemble(
    scratch_dir: &Path,
    filename: &str,
    plan: &Plan,
    destination: &Path,
    stop_flag: &Arc<AtomicBool>,
) -> Result<()> {
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("create dir: {}", parent.display()))?;
    }

    let mut out = std::fs::File::create(destination)
        .with_context(|| format!("create destination: {}", destination.display()))?;

    for chunk in &plan.chunks {
        if stop_flag.load(Ordering::Relaxed) {
            anyhow::bail!("assembly cancelled before chunk {}", chunk.index);
        }
        let part = part_path(scratch_dir, filename, chunk.index);
        let mut part_file = std::fs::File::open(&part)
            .with_context(|| format!("open part file: {}", part.display()))?;
        std::io::copy(&mut part_file, &mut out)
            .with_context(|| format!("copy part file: {}", part.display()))?;
        drop(part_file);
        std::fs::remove_file(&part).with_context(|| format!("remove part file: {}", part.display()))?;
    }

    out.flush().context("flush destination")?;
    drop(out);

    let checkpoint_path = checkpoint::checkpoint_path(scratch_dir, filename);
    checkpoint::remove(&checkpoint_path)?;

    // Scratch dir should be empty now; ignore failure if something else is
    // still in it (best-effort cleanup, not required for correctness).
    let _ = std::fs::remove_dir(scratch_dir);

    Ok(())
}
