//! One shard's scoped temporary directory.
//!
//! Grounded on `original_source/psubprocess/utils.py::NamedTemporaryDir`:
//! eager creation, idempotent `close`, a `Drop` fallback instead of relying
//! on the garbage collector.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::Result;

/// A per-shard working directory. Permission mode is copied from the
/// process's current directory, so the shard inherits the caller's ambient
/// umask rather than whatever default `tempfile` would otherwise apply
/// (spec.md §4.5).
pub struct ShardWorkspace {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl ShardWorkspace {
    /// Creates a new workspace under `parent` (or the system temp directory
    /// if `None`), copying `parent`'s — or the current directory's —
    /// permission bits onto it.
    pub fn create(parent: Option<&Path>) -> Result<Self> {
        let dir = match parent {
            Some(p) => tempfile::Builder::new().prefix("shard-").tempdir_in(p)?,
            None => tempfile::Builder::new().prefix("shard-").tempdir()?,
        };
        let path = dir.path().to_path_buf();

        let reference = std::env::current_dir()?;
        if let Ok(meta) = fs::metadata(&reference) {
            fs::set_permissions(&path, fs::Permissions::from_mode(meta.permissions().mode()))?;
        }

        Ok(ShardWorkspace {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deletes the workspace directory. Idempotent: calling this twice, or
    /// calling it and then letting the value drop, is not an error.
    pub fn close(&mut self) {
        self.dir.take();
    }
}

impl Drop for ShardWorkspace {
    fn drop(&mut self) {
        // `TempDir`'s own Drop does the removal; this is just documenting
        // that Drop is the safety net, not the primary cleanup path — the
        // dispatcher calls `close` explicitly after join (spec.md §4.5).
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_makes_a_directory_that_exists() {
        let ws = ShardWorkspace::create(None).unwrap();
        assert!(ws.path().is_dir());
    }

    #[test]
    fn close_is_idempotent_and_removes_the_directory() {
        let mut ws = ShardWorkspace::create(None).unwrap();
        let path = ws.path().to_path_buf();
        ws.close();
        assert!(!path.exists());
        ws.close();
    }

    #[test]
    fn drop_without_explicit_close_still_removes_the_directory() {
        let path = {
            let ws = ShardWorkspace::create(None).unwrap();
            ws.path().to_path_buf()
        };
        assert!(!path.exists());
    }
}
