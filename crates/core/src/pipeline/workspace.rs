//! Per-run scratch directory.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, info, warn};

/// A `rebaiser-*` directory that is removed when dropped, including
/// during a panic, unless artifacts are kept.
#[derive(Debug)]
pub struct WorkDir {
    dir: Option<TempDir>,
    path: PathBuf,
    keep: bool,
}

impl WorkDir {
    pub fn create(root: &Path, keep: bool) -> io::Result<Self> {
        std::fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new()
            .prefix("rebaiser-")
            .tempdir_in(root)?;
        let path = dir.path().to_path_buf();
        info!(path = %path.display(), "created working directory");
        Ok(Self {
            dir: Some(dir),
            path,
            keep,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        if self.keep {
            let kept = dir.keep();
            info!(path = %kept.display(), "keeping artifacts, skipping cleanup");
            return;
        }
        match dir.close() {
            Ok(()) => debug!(path = %self.path.display(), "removed working directory"),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to remove working directory")
            }
        }
    }
}
