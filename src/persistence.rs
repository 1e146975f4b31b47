//! Status persistence.
//!
//! A [`StatusStore`] receives a snapshot every time a step saves its ledger:
//! once at start, once per committed chunk and once at the end. Store errors
//! are wrapped by the ledger into [`BatchError::Persistence`](crate::BatchError).

use crate::status::StepStatus;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Destination for step status snapshots.
pub trait StatusStore: Send + Sync {
    /// Persist the snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot could not be stored.
    fn save(&self, status: &StepStatus) -> Result<()>;
}

/// Default store: emits each snapshot as a `debug` event and never fails.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogStatusStore;

impl StatusStore for LogStatusStore {
    fn save(&self, status: &StepStatus) -> Result<()> {
        debug!(step = %status.name(), state = %status.state(), "persisting state: {status}");
        Ok(())
    }
}

/// Writes the latest snapshot of a step to a JSON file, replacing the previous one.
#[derive(Clone, Debug)]
pub struct JsonFileStatusStore {
    path: PathBuf,
}

impl JsonFileStatusStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StatusStore for JsonFileStatusStore {
    fn save(&self, status: &StepStatus) -> Result<()> {
        let formatted = serde_json::to_string_pretty(&status.to_json())?;
        let mut file = File::create(&self.path)
            .with_context(|| format!("failed to create status file {}", self.path.display()))?;
        file.write_all(formatted.as_bytes())
            .context("failed to write status file")?;
        file.sync_all().context("failed to sync status file")?;
        Ok(())
    }
}
