//! Hook gate: a marker file meaning "automation in progress".
//!
//! Commits and merges made by the reconciliation workflow fire the same git
//! hooks that started it. Every hook entry point checks [`HookGate::is_held`]
//! first and does nothing when the marker exists. There is no owner tracking
//! and no expiry; the marker is a cooperative convention.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

/// Location of the gate marker.
#[derive(Debug, Clone)]
pub struct HookGate {
    marker: PathBuf,
}

impl HookGate {
    pub fn new(marker: impl Into<PathBuf>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    pub fn marker_path(&self) -> &Path {
        &self.marker
    }

    pub fn is_held(&self) -> bool {
        self.marker.exists()
    }

    /// Create the marker. Creating an existing marker is not an error.
    pub fn acquire(&self) -> io::Result<()> {
        if let Some(parent) = self.marker.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.marker)?;
        debug!(path = %self.marker.display(), "hook gate acquired");
        Ok(())
    }

    /// Remove the marker. Removing an absent marker is not an error.
    pub fn release(&self) -> io::Result<()> {
        match fs::remove_file(&self.marker) {
            Ok(()) => {
                debug!(path = %self.marker.display(), "hook gate released");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Acquire the gate for the lifetime of the returned token.
    pub fn hold(&self) -> io::Result<HookGateToken<'_>> {
        self.acquire()?;
        info!(path = %self.marker.display(), "hooks disabled");
        Ok(HookGateToken { gate: self })
    }
}

/// RAII guard that releases the gate when dropped, including on early
/// return, `?` propagation and unwinding.
#[derive(Debug)]
pub struct HookGateToken<'a> {
    gate: &'a HookGate,
}

impl Drop for HookGateToken<'_> {
    fn drop(&mut self) {
        match self.gate.release() {
            Ok(()) => info!(path = %self.gate.marker.display(), "hooks re-enabled"),
            Err(e) => warn!(
                path = %self.gate.marker.display(),
                error = %e,
                "failed to remove hook gate marker"
            ),
        }
    }
}
