//! Fan-out chunk executor.
//!
//! One producer worker reads a round of up to `consumers * commit_interval`
//! items and splits it into one batch per consumer. Each consumer worker
//! owns its own processor, writer and transaction, and processes its batch
//! in parallel with the others. The orchestrator, running on the thread
//! that called [`Step::execute`], decides whether each batch commits or
//! rolls back, one consumer at a time and in index order.
//!
//! Workers talk to the orchestrator exclusively through handshakes; see
//! [`crate::handshake`]. All workers are joined before `execute` returns.
//!
//! A failure in one consumer rolls back every consumer of the round that
//! has not committed yet and stops the step after the round. Batches
//! committed earlier in the same round are not undone.

mod builder;
mod consumer;
mod exchange;
mod orchestrator;
mod producer;

pub use builder::MultiChunkStepBuilder;
pub use exchange::ConsumerPhase;

use crate::config::StepConfig;
use crate::error::BatchError;
use crate::ledger::ChunkLedger;
use crate::resource::{ItemProcessor, ItemReader, ItemWriter, Managed};
use crate::status::{StepState, StepStatus};
use crate::step::{Step, finish_execution};
use crate::transaction::Transaction;
use consumer::Consumer;
use exchange::{consumer_link, producer_link};
use orchestrator::{Orchestrator, Outcome};
use producer::Producer;
use rayon::ThreadPoolBuilder;
use tracing::info;

/// Resources owned by one consumer.
pub(crate) struct ConsumerPipeline<T, K> {
    pub(crate) processor: Managed<dyn ItemProcessor<T, K> + Send>,
    pub(crate) writer: Managed<dyn ItemWriter<K> + Send>,
    pub(crate) transaction: Box<dyn Transaction>,
}

pub struct MultiChunkStep<T, K> {
    config: StepConfig,
    ledger: ChunkLedger,
    reader: Managed<dyn ItemReader<T> + Send>,
    pipelines: Vec<ConsumerPipeline<T, K>>,
}

impl<T: Send + 'static, K: Send + 'static> MultiChunkStep<T, K> {
    #[must_use]
    pub fn builder() -> MultiChunkStepBuilder<T, K> {
        MultiChunkStepBuilder::new()
    }

    #[must_use]
    pub fn consumers(&self) -> usize {
        self.pipelines.len()
    }

    #[must_use]
    pub fn commit_interval(&self) -> usize {
        self.config.commit_interval
    }

    fn open_all(&mut self) -> Result<(), BatchError> {
        self.reader.open()?;
        for pipeline in &mut self.pipelines {
            pipeline.processor.open()?;
            pipeline.writer.open()?;
        }
        Ok(())
    }

    fn close_all(&mut self) {
        self.reader.try_close(&self.ledger);
        for pipeline in &mut self.pipelines {
            pipeline.processor.try_close(&self.ledger);
            pipeline.writer.try_close(&self.ledger);
        }
    }

    fn run(&mut self) -> Result<(), BatchError> {
        self.ledger.save()?;
        self.open_all()?;
        let outcome = self.run_rounds()?;
        self.close_all();
        match outcome {
            Outcome::ProducerFailed => self.ledger.fail(BatchError::Pipeline("the producer has failed".into())),
            Outcome::ConsumersFailed => {
                self.ledger.fail(BatchError::Pipeline("one or more consumers have failed".into()));
            }
            Outcome::Completed => {
                if self.ledger.state() == StepState::Executing {
                    self.ledger.complete();
                }
            }
        }
        if let Err(e) = self.ledger.save() {
            self.ledger.fail(e);
            self.ledger.save_protected();
        }
        Ok(())
    }

    /// Spawn the workers on a dedicated pool and drive the rounds until the
    /// source is exhausted or something fails.
    fn run_rounds(&mut self) -> Result<Outcome, BatchError> {
        let consumers = self.pipelines.len();
        let commit_interval = self.config.commit_interval;
        let round_size = self
            .config
            .round_size()
            .ok_or_else(|| BatchError::validation("the round size overflows"))?;
        let timeout = self.config.wait_timeout();
        let pool = ThreadPoolBuilder::new()
            .num_threads(consumers + 1)
            .thread_name(|i| format!("ironbatch-worker-{i}"))
            .build()
            .map_err(|e| BatchError::resource("worker pool", e.into()))?;

        let ledger = &self.ledger;
        let reader = &mut self.reader;
        let pipelines = &mut self.pipelines;

        let outcome = pool.in_place_scope(|scope| {
            // owned by the scope body so an unwinding orchestrator drops them
            // and breaks every pair
            let (mut producer, producer_side) = producer_link(ledger, timeout);
            let (mut controls, links): (Vec<_>, Vec<_>) =
                (0..consumers).map(|index| consumer_link(index, ledger, timeout)).unzip();
            let worker = Producer::new(reader, producer_side, ledger.clone(), consumers, commit_interval, round_size);
            scope.spawn(move |_| worker.run());
            for (pipeline, link) in pipelines.iter_mut().zip(links) {
                let worker = Consumer::new(pipeline, link, ledger.clone());
                scope.spawn(move |_| worker.run());
            }
            Orchestrator {
                producer: &mut producer,
                consumers: &mut controls,
                ledger,
                round_size,
            }
            .run()
        });
        Ok(outcome)
    }
}

impl<T: Send + 'static, K: Send + 'static> Step for MultiChunkStep<T, K> {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn execute(&mut self) -> Result<StepStatus, BatchError> {
        self.ledger.reset();
        info!(
            step = %self.config.name,
            consumers = self.pipelines.len(),
            commit_interval = self.config.commit_interval,
            "starting fan-out step"
        );
        self.ledger.start();
        if let Err(e) = self.run() {
            self.ledger.fail(e);
            self.close_all();
            self.ledger.save_protected();
        }
        finish_execution(&self.ledger, self.config.throw_errors)
    }

    fn status(&self) -> StepStatus {
        self.ledger.snapshot()
    }
}
