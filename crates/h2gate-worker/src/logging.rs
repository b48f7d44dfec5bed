//! Error-log file handling.
//!
//! The worker writes diagnostics to stderr. When an error-log path is
//! configured, stderr is redirected into that file at startup, and the
//! REOPEN_LOG lifecycle command reopens it so external rotation (logrotate
//! and friends) can move the old file aside without losing output.

use std::fs::OpenOptions;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::{error, info};

pub struct ErrorLog {
    path: Option<PathBuf>,
}

impl ErrorLog {
    pub fn new(path: Option<PathBuf>) -> Self {
        ErrorLog { path }
    }

    /// Open the configured log file and point stderr at it. A failure here
    /// is fatal: the process would otherwise run blind.
    pub fn open(&self) -> io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        redirect_stderr(path)
    }

    /// Reopen the log file in steady state. Failures are logged and the
    /// previous stderr target is kept.
    pub fn reopen(&self) {
        let Some(path) = &self.path else {
            return;
        };
        match redirect_stderr(path) {
            Ok(()) => info!(path = %path.display(), "Reopened error log"),
            Err(e) => error!(path = %path.display(), error = %e, "Failed to reopen error log"),
        }
    }
}

fn redirect_stderr(path: &Path) -> io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let rc = unsafe { libc::dup2(file.as_raw_fd(), libc::STDERR_FILENO) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_path_is_noop() {
        let log = ErrorLog::new(None);
        log.open().unwrap();
        log.reopen();
    }

    #[test]
    fn test_open_creates_file() {
        // Redirecting the test harness's stderr would swallow test output,
        // so only the file creation path is exercised here.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("error.log");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .unwrap();
        drop(file);
        assert!(path.exists());
    }
}
