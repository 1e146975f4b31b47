//! Producer worker: reads one round of items per order and splits them into
//! per-consumer batches.

use super::exchange::ProducerLink;
use crate::ledger::ChunkLedger;
use crate::resource::{ItemReader, Managed};
use tracing::{debug, debug_span, error};

pub(crate) struct Producer<'a, T> {
    reader: &'a mut Managed<dyn ItemReader<T> + Send>,
    link: ProducerLink<T>,
    ledger: ChunkLedger,
    consumers: usize,
    commit_interval: usize,
    round_size: usize,
}

impl<'a, T> Producer<'a, T> {
    pub(crate) fn new(
        reader: &'a mut Managed<dyn ItemReader<T> + Send>,
        link: ProducerLink<T>,
        ledger: ChunkLedger,
        consumers: usize,
        commit_interval: usize,
        round_size: usize,
    ) -> Self {
        Self {
            reader,
            link,
            ledger,
            consumers,
            commit_interval,
            round_size,
        }
    }

    pub(crate) fn run(mut self) {
        let _span = debug_span!("producer").entered();
        while self.link.wait_for_query() {
            match self.reader.get_mut().read_chunk(self.round_size) {
                Ok(items) => {
                    let read = items.len();
                    debug!(read, "round read");
                    self.ledger.read(read);
                    self.link.put(split(items, self.consumers, self.commit_interval), read);
                }
                Err(e) => {
                    error!(error = %e, "error reading items");
                    self.link.fail(e);
                }
            }
            self.link.data_ready();
        }
        debug!("producer finished");
    }
}

/// Split `items` into exactly `consumers` batches of at most `size` items,
/// in order. Trailing batches may be empty.
pub(crate) fn split<T>(items: Vec<T>, consumers: usize, size: usize) -> Vec<Vec<T>> {
    let mut items = items.into_iter();
    (0..consumers)
        .map(|_| items.by_ref().take(size).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::split;

    #[test]
    fn split_fills_batches_in_order() {
        let batches = split((1..=13).collect(), 3, 5);
        assert_eq!(batches, vec![vec![1, 2, 3, 4, 5], vec![6, 7, 8, 9, 10], vec![11, 12, 13]]);
    }

    #[test]
    fn split_leaves_trailing_batches_empty() {
        let batches = split(vec![1, 2], 3, 5);
        assert_eq!(batches, vec![vec![1, 2], vec![], vec![]]);
    }
}
