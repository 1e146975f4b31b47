//! The contract shared by every executable step.

use crate::error::BatchError;
use crate::ledger::ChunkLedger;
use crate::status::StepStatus;
use tracing::{info, warn};

/// A unit of batch work.
///
/// `execute` runs the step from scratch: the ledger of a previous execution
/// is discarded at entry. Failures inside the step never escape as panics or
/// early returns; they are recorded on the returned status. A step built
/// with `throw_errors` returns its failed status wrapped in
/// [`BatchError::StepExecution`] instead.
pub trait Step: Send {
    fn name(&self) -> &str;

    /// # Errors
    ///
    /// Returns [`BatchError::StepExecution`] when the execution ended in a
    /// failed state and the step is configured to surface failures.
    fn execute(&mut self) -> Result<StepStatus, BatchError>;

    /// Snapshot of the latest (or current) execution.
    fn status(&self) -> StepStatus;
}

/// Log the outcome of an execution and decide how to return it.
pub(crate) fn finish_execution(ledger: &ChunkLedger, throw_errors: bool) -> Result<StepStatus, BatchError> {
    let status = ledger.snapshot();
    if status.is_failed() {
        warn!(
            step = %status.name(),
            state = %status.state(),
            failures = status.failures().len(),
            "step finished with failures"
        );
        if throw_errors {
            return Err(BatchError::StepExecution(Box::new(status)));
        }
    } else {
        info!(
            step = %status.name(),
            read = status.read(),
            written = status.written(),
            committed = status.committed(),
            elapsed_ms = status.elapsed().as_millis() as u64,
            "step completed"
        );
    }
    Ok(status)
}
