//! Accounting ledger shared by everything that runs on behalf of one step.
//!
//! The ledger tracks the step state, timing, cumulative item counters and the
//! failure log. Counters are updated optimistically: a chunk's skip, write
//! and commit deltas are applied to the totals before its transaction is
//! durable, and kept in a per-participant pending buffer until the outcome is
//! known. [`ChunkLedger::consolidate`] drops the buffer once the chunk is
//! durable; [`ChunkLedger::undo`] subtracts it again when the chunk failed.
//!
//! Each participant (slot) holds at most one pending delta. The
//! single-threaded executor uses [`SINGLE_SLOT`]; fan-out consumers use their
//! own index, so their deltas are consolidated and undone independently.
//!
//! Every method takes `&self` and is safe to call from any thread.

use crate::error::BatchError;
use crate::persistence::{LogStatusStore, StatusStore};
use crate::status::{StepState, StepStatus};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::error;

/// Slot used by executors with a single participant.
pub const SINGLE_SLOT: usize = 0;

#[derive(Clone)]
pub struct ChunkLedger {
    inner: Arc<Mutex<LedgerInner>>,
    store: Arc<dyn StatusStore>,
}

struct LedgerInner {
    name: String,
    state: StepState,
    init_time: Option<Instant>,
    end_time: Option<Instant>,
    chunk_start: Option<Instant>,
    last_elapsed: Duration,
    read: u64,
    skipped: u64,
    written: u64,
    committed: u64,
    pending: HashMap<usize, PendingDelta>,
    failures: Vec<Arc<BatchError>>,
}

/// Deltas applied to the totals but not yet durable.
#[derive(Default, Debug)]
struct PendingDelta {
    skipped: u64,
    written: u64,
    commit: bool,
}

impl LedgerInner {
    fn new(name: String) -> Self {
        Self {
            name,
            state: StepState::Starting,
            init_time: None,
            end_time: None,
            chunk_start: None,
            last_elapsed: Duration::ZERO,
            read: 0,
            skipped: 0,
            written: 0,
            committed: 0,
            pending: HashMap::new(),
            failures: Vec::new(),
        }
    }

    fn close_chunk(&mut self, at: Instant) {
        if let Some(start) = self.chunk_start.take() {
            self.last_elapsed = at.saturating_duration_since(start);
        }
    }

    fn finish(&mut self, state: StepState) {
        if self.end_time.is_none() {
            self.end_time = Some(Instant::now());
        }
        self.state = state;
    }

    fn snapshot(&self) -> StepStatus {
        StepStatus {
            name: self.name.clone(),
            state: self.state,
            init_time: self.init_time,
            end_time: self.end_time,
            last_elapsed: self.last_elapsed,
            read: self.read,
            skipped: self.skipped,
            written: self.written,
            committed: self.committed,
            failures: self.failures.clone(),
        }
    }
}

impl ChunkLedger {
    /// Ledger persisting through [`LogStatusStore`].
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_store(name, Arc::new(LogStatusStore))
    }

    pub fn with_store(name: impl Into<String>, store: Arc<dyn StatusStore>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LedgerInner::new(name.into()))),
            store,
        }
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.inner.lock().name.clone()
    }

    #[must_use]
    pub fn state(&self) -> StepState {
        self.inner.lock().state
    }

    #[must_use]
    pub fn snapshot(&self) -> StepStatus {
        self.inner.lock().snapshot()
    }

    /// Forget everything but the name. Called at the top of every execution.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let name = std::mem::take(&mut inner.name);
        *inner = LedgerInner::new(name);
    }

    pub fn start(&self) {
        let mut inner = self.inner.lock();
        inner.init_time = Some(Instant::now());
        inner.state = StepState::Executing;
    }

    /// Normal end of the execution.
    pub fn complete(&self) {
        self.inner.lock().finish(StepState::Completed);
    }

    /// Record a failure and move the step to `Failed`.
    ///
    /// An open chunk window is closed at the time of the failure; the end
    /// time is only set by the first terminal transition.
    pub fn fail(&self, failure: BatchError) {
        let failure = Arc::new(failure);
        let mut inner = self.inner.lock();
        error!(step = %inner.name, error = %failure, "step failure recorded");
        inner.close_chunk(Instant::now());
        inner.finish(StepState::Failed);
        inner.failures.push(failure);
    }

    fn fail_critical(&self, failure: BatchError) {
        let mut inner = self.inner.lock();
        error!(step = %inner.name, error = %failure, "failure could not be persisted");
        inner.finish(StepState::CriticalFailed);
        inner.failures.push(Arc::new(failure));
    }

    pub fn start_chunk(&self) {
        self.inner.lock().chunk_start = Some(Instant::now());
    }

    /// Close the current chunk window, if one is open.
    pub fn stop_chunk(&self) {
        self.inner.lock().close_chunk(Instant::now());
    }

    /// Add to the read counter. Reads are never undone.
    pub fn read(&self, count: usize) {
        self.inner.lock().read += count as u64;
    }

    pub fn skip(&self, slot: usize, count: usize) {
        if count == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        inner.skipped += count as u64;
        inner.pending.entry(slot).or_default().skipped += count as u64;
    }

    pub fn write(&self, slot: usize, count: usize) {
        if count == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        inner.written += count as u64;
        inner.pending.entry(slot).or_default().written += count as u64;
    }

    /// Count one committed chunk for `slot`.
    pub fn commit(&self, slot: usize) {
        let mut inner = self.inner.lock();
        inner.committed += 1;
        inner.pending.entry(slot).or_default().commit = true;
    }

    /// Subtract the pending delta of `slot` from the totals.
    ///
    /// A no-op when the slot has nothing pending, so undoing twice never
    /// reaches into older, consolidated chunks.
    pub fn undo(&self, slot: usize) {
        let mut inner = self.inner.lock();
        if let Some(delta) = inner.pending.remove(&slot) {
            inner.skipped = inner.skipped.saturating_sub(delta.skipped);
            inner.written = inner.written.saturating_sub(delta.written);
            if delta.commit {
                inner.committed = inner.committed.saturating_sub(1);
            }
        }
    }

    /// Mark the pending delta of `slot` as durable.
    pub fn consolidate(&self, slot: usize) {
        self.inner.lock().pending.remove(&slot);
    }

    #[must_use]
    pub fn has_pending(&self, slot: usize) -> bool {
        self.inner.lock().pending.contains_key(&slot)
    }

    /// Persist the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Persistence`] if the store rejects the snapshot.
    pub fn save(&self) -> Result<(), BatchError> {
        let snapshot = self.snapshot();
        self.store.save(&snapshot).map_err(|source| {
            error!(step = %snapshot.name(), error = %source, "error persisting step state");
            BatchError::Persistence {
                step: snapshot.name().to_string(),
                source,
            }
        })
    }

    /// Best-effort save that never fails.
    ///
    /// A previous `CriticalFailed` is downgraded to `Failed` before trying;
    /// if this save fails too, the persistence error is recorded and the
    /// state escalates to `CriticalFailed`.
    pub fn save_protected(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.state == StepState::CriticalFailed {
                inner.state = StepState::Failed;
            }
        }
        if let Err(e) = self.save() {
            self.fail_critical(e);
        }
    }
}

impl std::fmt::Debug for ChunkLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ChunkLedger({})", self.snapshot())
    }
}
