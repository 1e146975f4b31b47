use super::{ConsumerPipeline, MultiChunkStep};
use crate::config::StepConfig;
use crate::error::BatchError;
use crate::ledger::ChunkLedger;
use crate::persistence::{LogStatusStore, StatusStore};
use crate::resource::{ItemProcessor, ItemReader, ItemWriter, Managed, PassThrough};
use crate::transaction::{NoopTransaction, Transaction};
use std::sync::Arc;

type TransactionFactory = Box<dyn Fn(usize) -> Box<dyn Transaction>>;
type ProcessorFactory<T, K> = fn() -> Box<dyn ItemProcessor<T, K> + Send>;

fn pass_through_processor<T: Into<K>, K>() -> Box<dyn ItemProcessor<T, K> + Send> {
    Box::new(PassThrough)
}

/// Builder for [`MultiChunkStep`].
///
/// Processors and writers are assigned to consumers in the order they are
/// added: the n-th processor and the n-th writer belong to consumer n.
///
/// ```
/// use ironbatch::multi::MultiChunkStep;
/// use ironbatch::resource::{IterReader, writer_fn};
/// use ironbatch::step::Step;
///
/// let mut step = MultiChunkStep::<u32, u32>::builder()
///     .name("copy")
///     .consumers(2)
///     .commit_interval(10)
///     .reader(IterReader::new(1..=100u32))
///     .writer(writer_fn(|_items: Vec<u32>| Ok(())))
///     .writer(writer_fn(|_items: Vec<u32>| Ok(())))
///     .pass_through()
///     .build()
///     .unwrap();
/// let status = step.execute().unwrap();
/// assert_eq!(status.written(), 100);
/// ```
pub struct MultiChunkStepBuilder<T, K> {
    config: StepConfig,
    reader: Option<Box<dyn ItemReader<T> + Send>>,
    processors: Vec<Box<dyn ItemProcessor<T, K> + Send>>,
    writers: Vec<Box<dyn ItemWriter<K> + Send>>,
    transactions: Option<TransactionFactory>,
    store: Option<Arc<dyn StatusStore>>,
    pass_through: Option<ProcessorFactory<T, K>>,
}

impl<T: Send + 'static, K: Send + 'static> Default for MultiChunkStepBuilder<T, K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static, K: Send + 'static> MultiChunkStepBuilder<T, K> {
    #[must_use]
    pub fn new() -> Self {
        Self::from_config(StepConfig::default())
    }

    /// Start from a loaded configuration.
    #[must_use]
    pub fn from_config(config: StepConfig) -> Self {
        Self {
            config,
            reader: None,
            processors: Vec::new(),
            writers: Vec::new(),
            transactions: None,
            store: None,
            pass_through: None,
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
    pub fn consumers(mut self, consumers: usize) -> Self {
        self.config.consumers = consumers;
        self
    }

    /// Seconds a worker waits at a handshake; 0 waits forever.
    #[must_use]
    pub fn wait_timeout_secs(mut self, secs: u64) -> Self {
        self.config.wait_timeout_secs = secs;
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
        self.processors.push(Box::new(processor));
        self
    }

    #[must_use]
    pub fn writer<W: ItemWriter<K> + Send + 'static>(mut self, writer: W) -> Self {
        self.writers.push(Box::new(writer));
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

    /// Give every consumer its own clone of `transaction`.
    #[must_use]
    pub fn transaction<X: Transaction + Clone + 'static>(mut self, transaction: X) -> Self {
        self.transactions = Some(Box::new(move |_: usize| -> Box<dyn Transaction> {
            Box::new(transaction.clone())
        }));
        self
    }

    /// Build the transaction of each consumer from its index.
    #[must_use]
    pub fn transaction_with<X, F>(mut self, factory: F) -> Self
    where
        X: Transaction + 'static,
        F: Fn(usize) -> X + 'static,
    {
        self.transactions = Some(Box::new(move |index: usize| -> Box<dyn Transaction> {
            Box::new(factory(index))
        }));
        self
    }

    #[must_use]
    pub fn store<S: StatusStore + 'static>(mut self, store: S) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Validate the configuration and assemble the step.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Validation`] when the name is blank, the commit
    /// interval or the consumer count is zero, a round would hold more than
    /// `usize::MAX` items, the reader is missing, or the processors or
    /// writers do not line up with the consumers.
    pub fn build(self) -> Result<MultiChunkStep<T, K>, BatchError> {
        self.config.validate()?;
        let consumers = self.config.consumers;
        if self.config.round_size().is_none() {
            return Err(BatchError::validation(format!(
                "the commit interval [{}] times the consumers [{consumers}] exceeds the maximum round size",
                self.config.commit_interval
            )));
        }
        let reader = self
            .reader
            .ok_or_else(|| BatchError::validation("the step must have a reader"))?;
        if self.writers.len() != consumers {
            return Err(BatchError::validation(format!(
                "the number of writers [{}] must match the number of consumers [{consumers}]",
                self.writers.len()
            )));
        }
        let processors = match (self.processors.len(), self.pass_through) {
            (0, Some(factory)) => (0..consumers).map(|_| factory()).collect(),
            (0, None) => {
                return Err(BatchError::validation(
                    "the step has no processors; use pass_through() to forward items unchanged",
                ));
            }
            (_, Some(_)) => {
                return Err(BatchError::validation("pass_through() cannot be combined with processors"));
            }
            (n, None) if n != consumers => {
                return Err(BatchError::validation(format!(
                    "the number of processors [{n}] must match the number of consumers [{consumers}]"
                )));
            }
            (_, None) => self.processors,
        };

        let transactions = self
            .transactions
            .unwrap_or_else(|| Box::new(|_: usize| -> Box<dyn Transaction> { Box::new(NoopTransaction) }));
        let pipelines = processors
            .into_iter()
            .zip(self.writers)
            .enumerate()
            .map(|(index, (processor, writer))| ConsumerPipeline {
                processor: Managed::new("processor", processor),
                writer: Managed::new("writer", writer),
                transaction: transactions(index),
            })
            .collect();

        let store = self.store.unwrap_or_else(|| Arc::new(LogStatusStore));
        Ok(MultiChunkStep {
            ledger: ChunkLedger::with_store(self.config.name.clone(), store),
            config: self.config,
            reader: Managed::new("reader", reader),
            pipelines,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{IterReader, writer_fn};

    fn discard() -> impl ItemWriter<u32> + Send {
        writer_fn(|_: Vec<u32>| Ok(()))
    }

    #[test]
    fn writers_must_match_consumers() {
        let result = MultiChunkStepBuilder::<u32, u32>::new()
            .name("s")
            .consumers(2)
            .reader(IterReader::new(0..1u32))
            .writer(discard())
            .pass_through()
            .build();
        assert!(matches!(result, Err(BatchError::Validation(_))));
    }

    #[test]
    fn processors_are_required_without_pass_through() {
        let result = MultiChunkStepBuilder::<u32, u32>::new()
            .name("s")
            .consumers(1)
            .reader(IterReader::new(0..1u32))
            .writer(discard())
            .build();
        assert!(matches!(result, Err(BatchError::Validation(_))));
    }

    #[test]
    fn pass_through_fills_every_consumer() {
        let step = MultiChunkStepBuilder::<u32, u64>::new()
            .name("s")
            .consumers(3)
            .reader(IterReader::new(0..1u32))
            .writer(writer_fn(|_: Vec<u64>| Ok(())))
            .writer(writer_fn(|_: Vec<u64>| Ok(())))
            .writer(writer_fn(|_: Vec<u64>| Ok(())))
            .pass_through()
            .build()
            .unwrap();
        assert_eq!(step.consumers(), 3);
    }
}
