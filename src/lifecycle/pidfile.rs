//! PID file guard.
//!
//! Records the process id at startup and removes the file at shutdown. With no
//! path configured the guard does nothing at all.

use std::fs;
use std::path::{Path, PathBuf};

use crate::lifecycle::startup::StartupError;

#[derive(Debug, Default)]
pub struct PidFileGuard {
    path: Option<PathBuf>,
    held: bool,
}

impl PidFileGuard {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path, held: false }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether this guard wrote the file and has not removed it yet.
    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Write the current process id.
    pub fn acquire(&mut self) -> Result<(), StartupError> {
        self.acquire_as(std::process::id())
    }

    /// Write `pid` as the file's single line.
    pub fn acquire_as(&mut self, pid: u32) -> Result<(), StartupError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        fs::write(path, format!("{pid}\n")).map_err(|source| StartupError::CannotWritePidFile {
            path: path.clone(),
            source,
        })?;
        self.held = true;
        tracing::info!(path = %path.display(), pid, "PID file written");
        Ok(())
    }

    /// Remove the file. Failure is logged and otherwise ignored.
    pub fn release(&mut self) {
        if !std::mem::take(&mut self.held) {
            return;
        }
        let Some(path) = &self.path else {
            return;
        };
        match fs::remove_file(path) {
            Ok(()) => tracing::info!(path = %path.display(), "PID file removed"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove PID file"),
        }
    }
}
