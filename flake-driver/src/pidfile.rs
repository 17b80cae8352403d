//! Pid file for external process supervisors.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use flake::{FlakeError, Result};
use tracing::{debug, warn};

/// Removes the file on drop
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Write the current pid to `path`, unless running as pid 1 where no
    /// external supervisor needs it.
    pub fn create_unless_init<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let pid = process::id();
        if pid == 1 {
            debug!("running as init, skipping pid file");
            return Ok(None);
        }
        Self::create_with_pid(path, pid).map(Some)
    }

    pub fn create_with_pid<P: AsRef<Path>>(path: P, pid: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::write(&path, pid.to_string())
            .map_err(|source| FlakeError::PidFile { path: path.clone(), source })?;
        debug!(path = %path.display(), pid, "pid file written");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove pid file");
        }
    }
}
