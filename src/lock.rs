//! File-based locking for single-writer-per-group safety.
//!
//! Cross-platform (fs2) advisory locks on `<group dir>/LOCK`:
//! - Exclusive: the one process allowed to write and finalize a group.
//! - Shared: read-only access to a sealed group from another process.
//!
//! The lock is released on Drop.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;

use crate::consts::LOCK_FILE;

#[derive(Debug, Clone, Copy)]
pub enum LockMode {
    Shared,
    Exclusive,
}

pub struct LockGuard {
    file: std::fs::File,
    path: PathBuf,
    mode: LockMode,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // fs2 unlock errors on drop are ignored deliberately.
        let _ = self.file.unlock();
    }
}

fn open_lock_file(dir: &Path) -> Result<(std::fs::File, PathBuf)> {
    let path = dir.join(LOCK_FILE);
    let f = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&path)
        .with_context(|| format!("open lock file {}", path.display()))?;
    Ok((f, path))
}

/// Try to acquire the group lock without blocking. Errors if already held
/// in a conflicting mode.
pub fn try_acquire_lock(dir: &Path, mode: LockMode) -> Result<LockGuard> {
    let (file, path) = open_lock_file(dir)?;
    match mode {
        LockMode::Shared => file
            .try_lock_shared()
            .with_context(|| format!("try_lock_shared failed: {}", path.display()))?,
        LockMode::Exclusive => file
            .try_lock_exclusive()
            .with_context(|| format!("try_lock_exclusive failed: {}", path.display()))?,
    }
    Ok(LockGuard { file, path, mode })
}

pub fn try_acquire_exclusive_lock(dir: &Path) -> Result<LockGuard> {
    try_acquire_lock(dir, LockMode::Exclusive)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusive_lock_conflicts_and_releases() {
        let td = tempfile::tempdir().unwrap();
        let g = try_acquire_exclusive_lock(td.path()).unwrap();
        assert!(try_acquire_exclusive_lock(td.path()).is_err());
        drop(g);
        assert!(try_acquire_exclusive_lock(td.path()).is_ok());
    }
}
