//! Scripted infrastructure fixtures: transactions, status stores and
//! resources whose hooks fail on demand.

use crate::persistence::StatusStore;
use crate::resource::{ItemReader, ItemWriter, Lifecycle, Tasklet};
use crate::status::{StepState, StepStatus};
use crate::transaction::Transaction;
use anyhow::{Result, bail};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Default, Debug)]
struct TxCounters {
    begins: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

/// Transaction that counts its calls across every clone.
///
/// Failures are scripted by call number, counted over all clones, which is
/// what a fan-out step sees since each consumer gets its own clone.
#[derive(Clone, Debug, Default)]
pub struct ScriptedTransaction {
    counters: Arc<TxCounters>,
    fail_begin: Option<usize>,
    fail_commit: Option<usize>,
    fail_rollback: Option<usize>,
    begin_delay: Option<Duration>,
}

impl ScriptedTransaction {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn fail_begin_at(mut self, n: usize) -> Self {
        self.fail_begin = Some(n);
        self
    }

    #[must_use]
    pub fn fail_commit_at(mut self, n: usize) -> Self {
        self.fail_commit = Some(n);
        self
    }

    #[must_use]
    pub fn fail_rollback_at(mut self, n: usize) -> Self {
        self.fail_rollback = Some(n);
        self
    }

    /// Sleep before every `begin` issued through this clone.
    #[must_use]
    pub fn begin_delay(mut self, delay: Duration) -> Self {
        self.begin_delay = Some(delay);
        self
    }

    #[must_use]
    pub fn begins(&self) -> usize {
        self.counters.begins.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn commits(&self) -> usize {
        self.counters.commits.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn rollbacks(&self) -> usize {
        self.counters.rollbacks.load(Ordering::SeqCst)
    }
}

impl Transaction for ScriptedTransaction {
    fn begin(&mut self) -> Result<()> {
        if let Some(delay) = self.begin_delay {
            std::thread::sleep(delay);
        }
        let n = self.counters.begins.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_begin == Some(n) {
            bail!("fail on begin transaction [{n}]");
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let n = self.counters.commits.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_commit == Some(n) {
            bail!("fail on commit [{n}]");
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        let n = self.counters.rollbacks.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_rollback == Some(n) {
            bail!("fail on rollback [{n}]");
        }
        Ok(())
    }
}

#[derive(Default)]
struct Saves {
    attempts: usize,
    snapshots: Vec<StepStatus>,
}

/// Status store keeping every successfully saved snapshot.
#[derive(Clone, Default)]
pub struct ScriptedStore {
    saves: Arc<Mutex<Saves>>,
    fail_at: Vec<usize>,
    fail_from: Option<usize>,
}

impl ScriptedStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the `n`-th save attempt (1-based). May be called repeatedly.
    #[must_use]
    pub fn fail_at(mut self, n: usize) -> Self {
        self.fail_at.push(n);
        self
    }

    /// Fail the `n`-th save attempt and every one after it.
    #[must_use]
    pub fn fail_from(mut self, n: usize) -> Self {
        self.fail_from = Some(n);
        self
    }

    #[must_use]
    pub fn attempts(&self) -> usize {
        self.saves.lock().attempts
    }

    #[must_use]
    pub fn snapshots(&self) -> Vec<StepStatus> {
        self.saves.lock().snapshots.clone()
    }

    /// State of the last snapshot that was stored.
    #[must_use]
    pub fn last_state(&self) -> Option<StepState> {
        self.saves.lock().snapshots.last().map(StepStatus::state)
    }
}

impl StatusStore for ScriptedStore {
    fn save(&self, status: &StepStatus) -> Result<()> {
        let mut saves = self.saves.lock();
        saves.attempts += 1;
        let n = saves.attempts;
        if self.fail_at.contains(&n) || self.fail_from.is_some_and(|from| n >= from) {
            bail!("fail on save [{n}]");
        }
        saves.snapshots.push(status.clone());
        Ok(())
    }
}

#[derive(Default, Debug)]
struct HookCounters {
    opens: AtomicUsize,
    closes: AtomicUsize,
    executions: AtomicUsize,
}

/// Resource doing nothing but counting its hooks, each of which can be made
/// to fail. Usable as a reader (always exhausted), a writer or a tasklet.
#[derive(Clone, Debug, Default)]
pub struct FailingResource {
    counters: Arc<HookCounters>,
    fail_open: bool,
    fail_close: bool,
    fail_execute: bool,
}

impl FailingResource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn fail_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    #[must_use]
    pub fn fail_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    /// Fail `execute` when used as a tasklet, `write` when used as a writer.
    #[must_use]
    pub fn fail_execute(mut self) -> Self {
        self.fail_execute = true;
        self
    }

    #[must_use]
    pub fn opens(&self) -> usize {
        self.counters.opens.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn closes(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn executions(&self) -> usize {
        self.counters.executions.load(Ordering::SeqCst)
    }
}

impl Lifecycle for FailingResource {
    fn open(&mut self) -> Result<()> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open {
            bail!("fail on open");
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            bail!("fail on close");
        }
        Ok(())
    }
}

impl Tasklet for FailingResource {
    fn execute(&mut self) -> Result<()> {
        self.counters.executions.fetch_add(1, Ordering::SeqCst);
        if self.fail_execute {
            bail!("fail on execute");
        }
        Ok(())
    }
}

impl<T> ItemReader<T> for FailingResource {
    fn read(&mut self) -> Result<Option<T>> {
        Ok(None)
    }
}

impl<K> ItemWriter<K> for FailingResource {
    fn write(&mut self, _items: Vec<K>) -> Result<()> {
        self.counters.executions.fetch_add(1, Ordering::SeqCst);
        if self.fail_execute {
            bail!("fail on write");
        }
        Ok(())
    }
}
