//! Round loop driven from the caller's thread.
//!
//! Every round the orchestrator orders one read, hands each consumer its
//! batch, then visits the active consumers in index order: wait for the
//! batch to be processed, order a commit (or a rollback once anything in
//! the round failed) and wait for the resolution. Consumers committed
//! before a failure in the same round stay committed.

use super::exchange::{ConsumerControl, ProducerControl};
use crate::ledger::ChunkLedger;
use tracing::{debug, debug_span};

/// How the round loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    Completed,
    ProducerFailed,
    ConsumersFailed,
}

pub(crate) struct Orchestrator<'a, T> {
    pub(crate) producer: &'a mut ProducerControl<T>,
    pub(crate) consumers: &'a mut [ConsumerControl<T>],
    pub(crate) ledger: &'a ChunkLedger,
    /// Items read per round: consumers times the commit interval.
    pub(crate) round_size: usize,
}

impl<T> Orchestrator<'_, T> {
    pub(crate) fn run(mut self) -> Outcome {
        let mut round: u64 = 0;
        loop {
            round += 1;
            let _span = debug_span!("round", round).entered();
            self.ledger.start_chunk();
            self.producer.start_read();
            self.producer.wait_for_data();
            let (batches, read) = self.producer.take();
            if self.producer.is_error() {
                self.finish_all();
                return Outcome::ProducerFailed;
            }
            if read == 0 {
                debug!("source exhausted");
                self.finish_all();
                return Outcome::Completed;
            }
            let last_round = read < self.round_size;

            let mut active = Vec::with_capacity(self.consumers.len());
            for (index, (consumer, batch)) in self.consumers.iter_mut().zip(batches).enumerate() {
                if batch.is_empty() {
                    consumer.finish();
                } else {
                    consumer.data_ready(batch);
                    active.push(index);
                }
            }

            let mut errored = false;
            let last_active = active.len().saturating_sub(1);
            for (position, &index) in active.iter().enumerate() {
                let consumer = &mut self.consumers[index];
                consumer.wait_for_processing();
                errored |= consumer.is_error();
                if errored {
                    consumer.rollback();
                } else {
                    consumer.commit(position == last_active);
                }
                consumer.wait_for_resolution();
                errored |= consumer.is_error();
                if errored || last_round {
                    consumer.finish();
                }
            }

            if errored {
                self.finish_all();
                return Outcome::ConsumersFailed;
            }
            if last_round {
                debug!(read, "last round");
                self.finish_all();
                return Outcome::Completed;
            }
        }
    }

    fn finish_all(&mut self) {
        self.producer.finish();
        for consumer in self.consumers.iter_mut() {
            consumer.finish();
        }
    }
}
