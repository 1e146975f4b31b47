//! Item fixtures: a numeric reader, a filtering processor and a recording writer.

use crate::resource::{ItemProcessor, ItemReader, ItemWriter, Lifecycle};
use anyhow::{Result, bail};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Reads the numbers `1..=max`, then reports exhaustion. Opening the reader
/// starts over from 1, so every execution sees the same source.
#[derive(Clone, Debug)]
pub struct NumberReader {
    max: u32,
    reads: u32,
    fail_at: Option<u32>,
}

impl NumberReader {
    #[must_use]
    pub fn new(max: u32) -> Self {
        Self {
            max,
            reads: 0,
            fail_at: None,
        }
    }

    /// Fail the `n`-th call to `read` (1-based).
    #[must_use]
    pub fn fail_at_read(mut self, n: u32) -> Self {
        self.fail_at = Some(n);
        self
    }
}

impl Lifecycle for NumberReader {
    fn open(&mut self) -> Result<()> {
        self.reads = 0;
        Ok(())
    }
}

impl ItemReader<u32> for NumberReader {
    fn read(&mut self) -> Result<Option<u32>> {
        self.reads += 1;
        if self.fail_at == Some(self.reads) {
            bail!("error reading element [{}]", self.reads);
        }
        Ok((self.reads <= self.max).then_some(self.reads))
    }
}

/// Drops multiples of `modulo` and renders the rest as strings.
#[derive(Clone, Debug)]
pub struct ModuloFilter {
    modulo: u32,
    calls: u32,
    fail_at: Option<u32>,
}

impl ModuloFilter {
    /// A `modulo` of 0 keeps every item.
    #[must_use]
    pub fn new(modulo: u32) -> Self {
        Self {
            modulo,
            calls: 0,
            fail_at: None,
        }
    }

    /// Fail the `n`-th processed item (1-based).
    #[must_use]
    pub fn fail_at_call(mut self, n: u32) -> Self {
        self.fail_at = Some(n);
        self
    }
}

impl Lifecycle for ModuloFilter {}

impl ItemProcessor<u32, String> for ModuloFilter {
    fn process(&mut self, item: u32) -> Result<Option<String>> {
        self.calls += 1;
        if self.fail_at == Some(self.calls) {
            bail!("error processing element [{item}]");
        }
        if self.modulo > 0 && item % self.modulo == 0 {
            return Ok(None);
        }
        Ok(Some(item.to_string()))
    }
}

#[derive(Default)]
struct Recorded {
    items: Vec<String>,
    attempts: u32,
}

/// Collects every written item. Clones write into the same sink.
#[derive(Clone, Default)]
pub struct RecordingWriter {
    sink: Arc<Mutex<Recorded>>,
    fail_at: Option<u32>,
    item_delay: Option<Duration>,
}

impl RecordingWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail when writing the `n`-th item (1-based, counted across batches).
    #[must_use]
    pub fn fail_at_item(mut self, n: u32) -> Self {
        self.fail_at = Some(n);
        self
    }

    /// Sleep before writing each item.
    #[must_use]
    pub fn item_delay(mut self, delay: Duration) -> Self {
        self.item_delay = Some(delay);
        self
    }

    /// Items written so far, in write order.
    #[must_use]
    pub fn items(&self) -> Vec<String> {
        self.sink.lock().items.clone()
    }
}

impl Lifecycle for RecordingWriter {}

impl<K: ToString> ItemWriter<K> for RecordingWriter {
    fn write(&mut self, items: Vec<K>) -> Result<()> {
        for item in items {
            if let Some(delay) = self.item_delay {
                std::thread::sleep(delay);
            }
            let mut sink = self.sink.lock();
            sink.attempts += 1;
            if self.fail_at == Some(sink.attempts) {
                bail!("error writing element [{}]", item.to_string());
            }
            sink.items.push(item.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_counts_reads_past_the_end() {
        let mut reader = NumberReader::new(2).fail_at_read(4);
        assert_eq!(reader.read().unwrap(), Some(1));
        assert_eq!(reader.read().unwrap(), Some(2));
        assert_eq!(reader.read().unwrap(), None);
        assert!(reader.read().is_err());
    }

    #[test]
    fn reader_restarts_when_opened() {
        let mut reader = NumberReader::new(2);
        assert_eq!(reader.read_chunk(5).unwrap(), vec![1, 2]);
        reader.open().unwrap();
        assert_eq!(reader.read_chunk(5).unwrap(), vec![1, 2]);
    }

    #[test]
    fn filter_drops_multiples() {
        let mut filter = ModuloFilter::new(3);
        let out = filter.process_chunk(vec![1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(out, vec!["1", "2", "4", "5"]);
    }
}
