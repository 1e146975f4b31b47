//! Step state machine and the immutable status snapshot returned by a step.

use crate::error::BatchError;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lifecycle state of one step execution.
///
/// `Starting` → `Executing` → one of `Completed`, `Failed` or `CriticalFailed`.
/// `CriticalFailed` means the failure itself could not be persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepState {
    Starting,
    Executing,
    Completed,
    Failed,
    CriticalFailed,
}

impl StepState {
    /// Whether this state should be surfaced to the caller as a failure.
    #[must_use]
    pub const fn is_failed(self) -> bool {
        matches!(self, Self::Failed | Self::CriticalFailed)
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::CriticalFailed)
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Starting => "Starting",
            Self::Executing => "Executing",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::CriticalFailed => "CriticalFailed",
        };
        f.write_str(s)
    }
}

/// Point-in-time copy of a step's ledger.
///
/// Counters are cumulative across every chunk of the execution. Failures are
/// shared with the ledger, so cloning a snapshot is cheap.
#[derive(Clone, Debug)]
pub struct StepStatus {
    pub(crate) name: String,
    pub(crate) state: StepState,
    pub(crate) init_time: Option<Instant>,
    pub(crate) end_time: Option<Instant>,
    pub(crate) last_elapsed: Duration,
    pub(crate) read: u64,
    pub(crate) skipped: u64,
    pub(crate) written: u64,
    pub(crate) committed: u64,
    pub(crate) failures: Vec<Arc<BatchError>>,
}

impl StepStatus {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn state(&self) -> StepState {
        self.state
    }

    /// When the execution started, if it did.
    #[must_use]
    pub fn init_time(&self) -> Option<Instant> {
        self.init_time
    }

    /// When the execution reached a terminal state, if it did.
    #[must_use]
    pub fn end_time(&self) -> Option<Instant> {
        self.end_time
    }

    /// Wall time between start and end, zero while either is unset.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        match (self.init_time, self.end_time) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            _ => Duration::ZERO,
        }
    }

    /// Duration of the last closed chunk window.
    #[must_use]
    pub fn last_elapsed(&self) -> Duration {
        self.last_elapsed
    }

    #[must_use]
    pub fn read(&self) -> u64 {
        self.read
    }

    #[must_use]
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    #[must_use]
    pub fn written(&self) -> u64 {
        self.written
    }

    #[must_use]
    pub fn committed(&self) -> u64 {
        self.committed
    }

    /// Every failure recorded during the execution, in recording order.
    #[must_use]
    pub fn failures(&self) -> &[Arc<BatchError>] {
        &self.failures
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.state.is_failed()
    }

    /// Render the snapshot as a JSON object.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let failures: Vec<String> = self.failures.iter().map(|e| e.to_string()).collect();
        json!({
            "name": self.name,
            "state": self.state,
            "elapsed_ms": self.elapsed().as_millis(),
            "last_elapsed_ms": self.last_elapsed.as_millis(),
            "read": self.read,
            "skipped": self.skipped,
            "written": self.written,
            "committed": self.committed,
            "failures": failures,
        })
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "name [{}] state [{}] elapsed [{:?}] last_elapsed [{:?}] read [{}] skipped [{}] written [{}] committed [{}] failures [{}]",
            self.name,
            self.state,
            self.elapsed(),
            self.last_elapsed,
            self.read,
            self.skipped,
            self.written,
            self.committed,
            self.failures.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_states() {
        assert!(!StepState::Starting.is_failed());
        assert!(!StepState::Executing.is_failed());
        assert!(!StepState::Completed.is_failed());
        assert!(StepState::Failed.is_failed());
        assert!(StepState::CriticalFailed.is_failed());
        assert!(!StepState::Executing.is_terminal());
    }

    #[test]
    fn state_serializes_by_name() {
        assert_eq!(serde_json::to_value(StepState::CriticalFailed).unwrap(), json!("CriticalFailed"));
    }
}
