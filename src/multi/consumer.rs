//! Consumer worker: processes, writes and resolves one batch per round.

use super::ConsumerPipeline;
use super::exchange::{ConsumerLink, ConsumerPhase, Order};
use crate::error::BatchError;
use crate::ledger::ChunkLedger;
use anyhow::anyhow;
use tracing::{debug, debug_span};

/// Skip and write counts of a processed batch, not yet applied to the ledger.
#[derive(Clone, Copy, Debug, Default)]
struct RoundCounts {
    skipped: usize,
    written: usize,
}

pub(crate) struct Consumer<'a, T, K> {
    pipeline: &'a mut ConsumerPipeline<T, K>,
    link: ConsumerLink<T>,
    ledger: ChunkLedger,
}

impl<'a, T, K> Consumer<'a, T, K> {
    pub(crate) fn new(pipeline: &'a mut ConsumerPipeline<T, K>, link: ConsumerLink<T>, ledger: ChunkLedger) -> Self {
        Self { pipeline, link, ledger }
    }

    pub(crate) fn run(mut self) {
        let _span = debug_span!("consumer", index = self.link.index()).entered();
        while let Some(items) = self.link.wait_for_data() {
            self.link.set_phase(ConsumerPhase::Preprocess);
            let mut counts = RoundCounts::default();
            let tx_pending = match self.pipeline.transaction.begin() {
                Ok(()) => true,
                Err(e) => {
                    self.link.fail(BatchError::transaction("begin", e).into());
                    false
                }
            };
            if tx_pending {
                self.link.set_phase(ConsumerPhase::Process);
                match self.process(items) {
                    Ok(processed) => counts = processed,
                    Err(e) => self.link.fail(e),
                }
            }
            self.link.finish_processing();

            match self.link.wait_for_order() {
                Order::Commit { close_chunk } => self.commit(counts, close_chunk, tx_pending),
                Order::Rollback => self.rollback(tx_pending),
            }
            self.link.finish_resolution();
        }
        self.link.set_phase(ConsumerPhase::Finished);
        debug!(broken = self.link.is_broken(), "consumer finished");
    }

    fn process(&mut self, items: Vec<T>) -> anyhow::Result<RoundCounts> {
        let read = items.len();
        let processed = self.pipeline.processor.get_mut().process_chunk(items)?;
        let written = processed.len();
        if written > 0 {
            self.pipeline.writer.get_mut().write(processed)?;
        }
        Ok(RoundCounts {
            skipped: read - written,
            written,
        })
    }

    fn commit(&mut self, counts: RoundCounts, close_chunk: bool, tx_pending: bool) {
        self.link.set_phase(ConsumerPhase::Commit);
        if !tx_pending {
            self.link.fail(anyhow!("the transaction was already rolled back"));
            return;
        }
        if let Err(e) = self.apply_commit(counts, close_chunk) {
            self.link.fail(e);
            self.ledger.undo(self.link.index());
            if let Err(e) = self.pipeline.transaction.rollback() {
                self.link.fail(BatchError::transaction("rollback", e).into());
            }
        }
    }

    /// Count the batch, persist the ledger, then make the transaction durable.
    fn apply_commit(&mut self, counts: RoundCounts, close_chunk: bool) -> anyhow::Result<()> {
        let slot = self.link.index();
        self.ledger.skip(slot, counts.skipped);
        self.ledger.write(slot, counts.written);
        self.ledger.commit(slot);
        if close_chunk {
            self.ledger.stop_chunk();
        }
        self.ledger.save()?;
        self.pipeline
            .transaction
            .commit()
            .map_err(|e| BatchError::transaction("commit", e))?;
        self.ledger.consolidate(slot);
        Ok(())
    }

    fn rollback(&mut self, tx_pending: bool) {
        self.link.set_phase(ConsumerPhase::Rollback);
        if !tx_pending {
            return;
        }
        if let Err(e) = self.pipeline.transaction.rollback() {
            self.link.fail(BatchError::transaction("rollback", e).into());
            self.ledger.undo(self.link.index());
        }
        debug!(phase = %self.link.phase(), "batch rolled back");
    }
}
