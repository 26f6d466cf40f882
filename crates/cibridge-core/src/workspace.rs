//! Private, disposable working copies.

use std::path::Path;

use tempfile::TempDir;
use tracing::{debug, warn};

/// A freshly created directory owned by one mirror run.
///
/// The directory and everything cloned into it is removed when the value is
/// dropped, on success and failure paths alike. Use [`WorkingCopy::close`]
/// to observe removal errors instead of ignoring them.
#[derive(Debug)]
pub struct WorkingCopy {
    dir: TempDir,
}

impl WorkingCopy {
    /// Create a new empty directory under the system temp dir.
    pub fn create(prefix: &str) -> std::io::Result<Self> {
        let dir = tempfile::Builder::new().prefix(prefix).tempdir()?;
        debug!(path = %dir.path().display(), "Created working copy");
        Ok(WorkingCopy { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the directory now, logging instead of failing on error.
    pub fn close(self) {
        let path = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => debug!(path = %path.display(), "Removed working copy"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove working copy"),
        }
    }
}
