//! Single-threaded chunk executor.
//!
//! Each iteration reads up to `commit_interval` items, processes and writes
//! them inside one transaction, and commits. The loop stops after the first
//! short (or empty) read; an empty final chunk is still committed.
//!
//! A failure while processing, writing or persisting a chunk rolls that
//! chunk back and ends the execution. A failure reading a chunk, opening a
//! resource or driving the transaction aborts the execution directly.

use crate::config::StepConfig;
use crate::error::BatchError;
use crate::ledger::{ChunkLedger, SINGLE_SLOT};
use crate::persistence::{LogStatusStore, StatusStore};
use crate::resource::{ItemProcessor, ItemReader, ItemWriter, Managed, PassThrough};
use crate::status::{StepState, StepStatus};
use crate::step::{Step, finish_execution};
use crate::transaction::{NoopTransaction, Transaction};
use std::sync::Arc;
use tracing::{debug, error, info};

pub struct ChunkStep<T, K> {
    config: StepConfig,
    ledger: ChunkLedger,
    reader: Managed<dyn ItemReader<T> + Send>,
    processor: Managed<dyn ItemProcessor<T, K> + Send>,
    writer: Managed<dyn ItemWriter<K> + Send>,
    transaction: Box<dyn Transaction>,
}

impl<T: 'static, K: 'static> ChunkStep<T, K> {
    #[must_use]
    pub fn builder() -> ChunkStepBuilder<T, K> {
        ChunkStepBuilder::new()
    }

    #[must_use]
    pub fn commit_interval(&self) -> usize {
        self.config.commit_interval
    }

    fn run(&mut self) -> Result<(), BatchError> {
        self.ledger.save()?;
        self.reader.open()?;
        self.processor.open()?;
        self.writer.open()?;

        let commit_interval = self.config.commit_interval;
        loop {
            self.ledger.start_chunk();
            let items = self
                .reader
                .get_mut()
                .read_chunk(commit_interval)
                .map_err(BatchError::Item)?;
            let read = items.len();
            self.ledger.read(read);

            self.transaction
                .begin()
                .map_err(|e| BatchError::transaction("begin", e))?;
            if let Err(e) = self.chunk(items) {
                self.ledger.fail(e);
                self.ledger.undo(SINGLE_SLOT);
                self.transaction
                    .rollback()
                    .map_err(|e| BatchError::transaction("rollback", e))?;
                self.ledger.save_protected();
                break;
            }
            self.transaction
                .commit()
                .map_err(|e| BatchError::transaction("commit", e))?;
            self.ledger.consolidate(SINGLE_SLOT);
            debug!(read, "chunk committed");

            if read < commit_interval {
                break;
            }
        }

        self.reader.close()?;
        self.processor.close()?;
        self.writer.close()?;

        if self.ledger.state() == StepState::Executing {
            self.ledger.complete();
            self.ledger.save()?;
        }
        Ok(())
    }

    /// Process and write one chunk, then count and persist it.
    fn chunk(&mut self, items: Vec<T>) -> Result<(), BatchError> {
        let read = items.len();
        if read > 0 {
            let processed = self
                .processor
                .get_mut()
                .process_chunk(items)
                .map_err(BatchError::Item)?;
            let written = processed.len();
            self.ledger.skip(SINGLE_SLOT, read - written);
            if written > 0 {
                self.writer.get_mut().write(processed).map_err(BatchError::Item)?;
            }
            self.ledger.write(SINGLE_SLOT, written);
        }
        self.ledger.stop_chunk();
        self.ledger.commit(SINGLE_SLOT);
        self.ledger.save()
    }
}

impl<T: 'static, K: 'static> Step for ChunkStep<T, K> {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn execute(&mut self) -> Result<StepStatus, BatchError> {
        self.ledger.reset();
        info!(step = %self.config.name, commit_interval = self.config.commit_interval, "starting chunk step");
        self.ledger.start();
        if let Err(e) = self.run() {
            error!(step = %self.config.name, error = %e, "error executing step");
            self.ledger.fail(e);
            self.ledger.undo(SINGLE_SLOT);
            self.reader.try_close(&self.ledger);
            self.processor.try_close(&self.ledger);
            self.writer.try_close(&self.ledger);
            self.ledger.save_protected();
        }
        finish_execution(&self.ledger, self.config.throw_errors)
    }

    fn status(&self) -> StepStatus {
        self.ledger.snapshot()
    }
}

type ProcessorFactory<T, K> = fn() -> Box<dyn ItemProcessor<T, K> + Send>;

fn pass_through_processor<T: Into<K>, K>() -> Box<dyn ItemProcessor<T, K> + Send> {
    Box::new(PassThrough)
}

/// Builder for [`ChunkStep`]. The consumer count of the configuration is
/// ignored.
pub struct ChunkStepBuilder<T, K> {
    config: StepConfig,
    reader: Option<Box<dyn ItemReader<T> + Send>>,
    processor: Option<Box<dyn ItemProcessor<T, K> + Send>>,
    pass_through: Option<ProcessorFactory<T, K>>,
    writer: Option<Box<dyn ItemWriter<K> + Send>>,
    transaction: Option<Box<dyn Transaction>>,
    store: Option<Arc<dyn StatusStore>>,
}

impl<T: 'static, K: 'static> Default for ChunkStepBuilder<T, K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static, K: 'static> ChunkStepBuilder<T, K> {
    #[must_use]
    pub fn new() -> Self {
        Self::from_config(StepConfig::default())
    }

    #[must_use]
    pub fn from_config(config: StepConfig) -> Self {
        Self {
            config,
            reader: None,
            processor: None,
            pass_through: None,
            writer: None,
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
    pub fn commit_interval(mut self, commit_interval: usize) -> Self {
        self.config.commit_interval = commit_interval;
        self
    }

    #[must_use]
    pub fn throw_errors(mut self, throw_errors: bool) -> Self {
        self.config.throw_errors = throw_errors;
        self
    }

    #[must_use]
    pub fn reader<R: ItemReader<T> + Send + 'static>(mut self, reader: R) -> Self {
        self.reader = Some(Box::new(reader));
        self
    }

    #[must_use]
    pub fn processor<P: ItemProcessor<T, K> + Send + 'static>(mut self, processor: P) -> Self {
        self.processor = Some(Box::new(processor));
        self
    }

    /// Forward items unchanged when no processor is supplied.
    #[must_use]
    pub fn pass_through(mut self) -> Self
    where
        T: Into<K>,
    {
        self.pass_through = Some(pass_through_processor::<T, K>);
        self
    }

    #[must_use]
    pub fn writer<W: ItemWriter<K> + Send + 'static>(mut self, writer: W) -> Self {
        self.writer = Some(Box::new(writer));
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
    /// Returns [`BatchError::Validation`] when the name is blank, the commit
    /// interval is zero, the reader or the writer is missing, or neither a
    /// processor nor pass-through was configured.
    pub fn build(self) -> Result<ChunkStep<T, K>, BatchError> {
        self.config.validate()?;
        let reader = self
            .reader
            .ok_or_else(|| BatchError::validation("the reader cannot be missing"))?;
        let writer = self
            .writer
            .ok_or_else(|| BatchError::validation("the writer cannot be missing"))?;
        let processor = match (self.processor, self.pass_through) {
            (Some(processor), None) => processor,
            (None, Some(factory)) => factory(),
            (Some(_), Some(_)) => {
                return Err(BatchError::validation("pass_through() cannot be combined with a processor"));
            }
            (None, None) => {
                return Err(BatchError::validation(
                    "the step has no processor; use pass_through() to forward items unchanged",
                ));
            }
        };
        let store = self.store.unwrap_or_else(|| Arc::new(LogStatusStore));
        Ok(ChunkStep {
            ledger: ChunkLedger::with_store(self.config.name.clone(), store),
            config: self.config,
            reader: Managed::new("reader", reader),
            processor: Managed::new("processor", processor),
            writer: Managed::new("writer", writer),
            transaction: self.transaction.unwrap_or_else(|| Box::new(NoopTransaction)),
        })
    }
}
