//! Step that runs a single [`Tasklet`] once.
//!
//! In transactional mode (the default) the whole run is bracketed by one
//! transaction and counts as one committed unit. A non-transactional
//! tasklet never touches a transaction and always reports zero commits.
//! The status's `last_elapsed` covers the whole run.

use crate::config::StepConfig;
use crate::error::BatchError;
use crate::ledger::{ChunkLedger, SINGLE_SLOT};
use crate::persistence::{LogStatusStore, StatusStore};
use crate::resource::{Managed, Tasklet};
use crate::status::StepStatus;
use crate::step::{Step, finish_execution};
use crate::transaction::{NoopTransaction, Transaction};
use std::sync::Arc;
use tracing::{error, info};

pub struct TaskletStep {
    config: StepConfig,
    ledger: ChunkLedger,
    tasklet: Managed<dyn Tasklet + Send>,
    transaction: Option<Box<dyn Transaction>>,
}

impl TaskletStep {
    #[must_use]
    pub fn builder() -> TaskletStepBuilder {
        TaskletStepBuilder::new()
    }

    #[must_use]
    pub fn is_transactional(&self) -> bool {
        self.transaction.is_some()
    }

    fn run_tasklet(&mut self) -> Result<(), BatchError> {
        self.tasklet.open()?;
        self.tasklet
            .get_mut()
            .execute()
            .map_err(|e| BatchError::resource(self.tasklet.kind(), e))?;
        self.tasklet.close()
    }

    fn execute_without_tx(&mut self) {
        let result = self.ledger.save().and_then(|()| self.run_tasklet());
        let result = result.and_then(|()| {
            self.ledger.stop_chunk();
            self.ledger.complete();
            self.ledger.save()
        });
        if let Err(e) = result {
            error!(step = %self.config.name, error = %e, "error executing step");
            self.ledger.fail(e);
            self.tasklet.try_close(&self.ledger);
            self.ledger.save_protected();
        }
    }

    fn execute_with_tx(&mut self, transaction: &mut dyn Transaction) {
        let started = self.ledger.save().and_then(|()| {
            transaction
                .begin()
                .map_err(|e| BatchError::transaction("begin", e))
        });
        if let Err(e) = started {
            error!(step = %self.config.name, error = %e, "error starting step");
            self.ledger.fail(e);
            self.ledger.save_protected();
            return;
        }

        let result = self.run_tasklet().and_then(|()| {
            self.ledger.stop_chunk();
            self.ledger.complete();
            self.ledger.commit(SINGLE_SLOT);
            self.ledger.save()?;
            transaction
                .commit()
                .map_err(|e| BatchError::transaction("commit", e))
        });
        match result {
            Ok(()) => self.ledger.consolidate(SINGLE_SLOT),
            Err(e) => {
                error!(step = %self.config.name, error = %e, "error executing step");
                self.ledger.fail(e);
                self.ledger.undo(SINGLE_SLOT);
                self.tasklet.try_close(&self.ledger);
                if let Err(e) = transaction.rollback() {
                    error!(step = %self.config.name, error = %e, "error rolling back step");
                    self.ledger.fail(BatchError::transaction("rollback", e));
                }
                self.ledger.save_protected();
            }
        }
    }
}

impl Step for TaskletStep {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn execute(&mut self) -> Result<StepStatus, BatchError> {
        self.ledger.reset();
        info!(step = %self.config.name, transactional = self.is_transactional(), "starting tasklet step");
        self.ledger.start();
        self.ledger.start_chunk();
        match self.transaction.take() {
            Some(mut transaction) => {
                self.execute_with_tx(transaction.as_mut());
                self.transaction = Some(transaction);
            }
            None => self.execute_without_tx(),
        }
        finish_execution(&self.ledger, self.config.throw_errors)
    }

    fn status(&self) -> StepStatus {
        self.ledger.snapshot()
    }
}

pub struct TaskletStepBuilder {
    config: StepConfig,
    tasklet: Option<Box<dyn Tasklet + Send>>,
    transactional: bool,
    transaction: Option<Box<dyn Transaction>>,
    store: Option<Arc<dyn StatusStore>>,
}

impl Default for TaskletStepBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskletStepBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::from_config(StepConfig::default())
    }

    #[must_use]
    pub fn from_config(config: StepConfig) -> Self {
        Self {
            config,
            tasklet: None,
            transactional: true,
            transaction: None,
            store: None,
        }
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    #[must_use]
    pub fn throw_errors(mut self, throw_errors: bool) -> Self {
        self.config.throw_errors = throw_errors;
        self
    }

    #[must_use]
    pub fn tasklet<X: Tasklet + Send + 'static>(mut self, tasklet: X) -> Self {
        self.tasklet = Some(Box::new(tasklet));
        self
    }

    #[must_use]
    pub fn transactional(mut self, transactional: bool) -> Self {
        self.transactional = transactional;
        self
    }

    #[must_use]
    pub fn transaction<X: Transaction + 'static>(mut self, transaction: X) -> Self {
        self.transaction = Some(Box::new(transaction));
        self
    }

    #[must_use]
    pub fn store<S: StatusStore + 'static>(mut self, store: S) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// # Errors
    ///
    /// Returns [`BatchError::Validation`] when the name is blank, the tasklet
    /// is missing, or a transaction was supplied to a non-transactional step.
    pub fn build(self) -> Result<TaskletStep, BatchError> {
        if self.config.name.trim().is_empty() {
            return Err(BatchError::validation("the step must have a name"));
        }
        let tasklet = self
            .tasklet
            .ok_or_else(|| BatchError::validation("the tasklet cannot be missing"))?;
        if !self.transactional && self.transaction.is_some() {
            return Err(BatchError::validation("the tasklet is not transactional"));
        }
        let transaction = if self.transactional {
            Some(self.transaction.unwrap_or_else(|| Box::new(NoopTransaction)))
        } else {
            None
        };
        let store = self.store.unwrap_or_else(|| Arc::new(LogStatusStore));
        Ok(TaskletStep {
            ledger: ChunkLedger::with_store(self.config.name.clone(), store),
            config: self.config,
            tasklet: Managed::new("tasklet", tasklet),
            transaction,
        })
    }
}
