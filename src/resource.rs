//! Item-level contracts consumed by the executors.
//!
//! A step is assembled from a reader, zero or more processors and one or more
//! writers. All of them share the [`Lifecycle`] hooks, which the executors
//! call once before the first chunk and once after the last one.

use crate::error::BatchError;
use crate::ledger::ChunkLedger;
use anyhow::Result;
use std::marker::PhantomData;
use tracing::error;

/// Upper bound on the capacity reserved up front by [`ItemReader::read_chunk`].
const MAX_PREALLOCATED_ITEMS: usize = 1024;

/// Open/close hooks. Both default to no-ops.
pub trait Lifecycle {
    /// # Errors
    ///
    /// Returns an error if the resource cannot be opened.
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the resource cannot be released cleanly.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Source of items. `Ok(None)` signals exhaustion.
pub trait ItemReader<T>: Lifecycle {
    /// # Errors
    ///
    /// Returns an error if the next item cannot be read.
    fn read(&mut self) -> Result<Option<T>>;

    /// Read up to `max` items, stopping early when the source is exhausted.
    ///
    /// # Errors
    ///
    /// Propagates the first read failure; items read before it are dropped.
    fn read_chunk(&mut self, max: usize) -> Result<Vec<T>> {
        let mut items = Vec::with_capacity(max.min(MAX_PREALLOCATED_ITEMS));
        while items.len() < max {
            match self.read()? {
                Some(item) => items.push(item),
                None => break,
            }
        }
        Ok(items)
    }
}

/// Maps one item to zero or one output items. `Ok(None)` filters the item out.
pub trait ItemProcessor<T, K>: Lifecycle {
    /// # Errors
    ///
    /// Returns an error if the item cannot be transformed.
    fn process(&mut self, item: T) -> Result<Option<K>>;

    /// Transform a batch, keeping only the items that survive.
    ///
    /// # Errors
    ///
    /// Propagates the first processing failure.
    fn process_chunk(&mut self, items: Vec<T>) -> Result<Vec<K>> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            if let Some(processed) = self.process(item)? {
                out.push(processed);
            }
        }
        Ok(out)
    }
}

/// Sink for processed items. Never called with an empty batch.
pub trait ItemWriter<K>: Lifecycle {
    /// # Errors
    ///
    /// Returns an error if the batch cannot be written.
    fn write(&mut self, items: Vec<K>) -> Result<()>;
}

/// A unit of work executed once by a tasklet step.
pub trait Tasklet: Lifecycle {
    /// # Errors
    ///
    /// Returns an error if the work fails.
    fn execute(&mut self) -> Result<()>;
}

/// Processor that forwards every item, converting it with `Into`.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassThrough;

impl Lifecycle for PassThrough {}

impl<T: Into<K>, K> ItemProcessor<T, K> for PassThrough {
    fn process(&mut self, item: T) -> Result<Option<K>> {
        Ok(Some(item.into()))
    }

    fn process_chunk(&mut self, items: Vec<T>) -> Result<Vec<K>> {
        Ok(items.into_iter().map(Into::into).collect())
    }
}

/// Reader over any iterator.
pub struct IterReader<I> {
    iter: I,
}

impl<I: Iterator> IterReader<I> {
    pub fn new<C: IntoIterator<IntoIter = I>>(items: C) -> Self {
        Self {
            iter: items.into_iter(),
        }
    }
}

impl<I> Lifecycle for IterReader<I> {}

impl<I: Iterator> ItemReader<I::Item> for IterReader<I> {
    fn read(&mut self) -> Result<Option<I::Item>> {
        Ok(self.iter.next())
    }
}

/// Processor backed by a closure.
pub struct FnProcessor<F, T> {
    f: F,
    _in: PhantomData<fn(T)>,
}

pub fn processor_fn<T, K, F>(f: F) -> FnProcessor<F, T>
where
    F: FnMut(T) -> Result<Option<K>>,
{
    FnProcessor { f, _in: PhantomData }
}

impl<F, T> Lifecycle for FnProcessor<F, T> {}

impl<T, K, F> ItemProcessor<T, K> for FnProcessor<F, T>
where
    F: FnMut(T) -> Result<Option<K>>,
{
    fn process(&mut self, item: T) -> Result<Option<K>> {
        (self.f)(item)
    }
}

/// Writer backed by a closure.
pub struct FnWriter<F, K> {
    f: F,
    _in: PhantomData<fn(K)>,
}

pub fn writer_fn<K, F>(f: F) -> FnWriter<F, K>
where
    F: FnMut(Vec<K>) -> Result<()>,
{
    FnWriter { f, _in: PhantomData }
}

impl<F, K> Lifecycle for FnWriter<F, K> {}

impl<K, F> ItemWriter<K> for FnWriter<F, K>
where
    F: FnMut(Vec<K>) -> Result<()>,
{
    fn write(&mut self, items: Vec<K>) -> Result<()> {
        (self.f)(items)
    }
}

/// Owns a resource and remembers whether it is open, so that opening and
/// closing are idempotent across the normal and the failure paths.
pub struct Managed<R: ?Sized> {
    kind: &'static str,
    open: bool,
    inner: Box<R>,
}

impl<R: ?Sized + Lifecycle> Managed<R> {
    pub(crate) fn new(kind: &'static str, inner: Box<R>) -> Self {
        Self {
            kind,
            open: false,
            inner,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        self.kind
    }

    pub(crate) fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub(crate) fn open(&mut self) -> Result<(), BatchError> {
        if !self.open {
            self.inner
                .open()
                .map_err(|e| BatchError::resource(self.kind, e))?;
            self.open = true;
        }
        Ok(())
    }

    pub(crate) fn close(&mut self) -> Result<(), BatchError> {
        if self.open {
            // a failed close still counts as closed
            self.open = false;
            self.inner
                .close()
                .map_err(|e| BatchError::resource(self.kind, e))?;
        }
        Ok(())
    }

    /// Close, recording a failure on the ledger instead of returning it.
    pub(crate) fn try_close(&mut self, ledger: &ChunkLedger) {
        if let Err(e) = self.close() {
            error!(resource = self.kind, error = %e, "error closing resource");
            ledger.fail(e);
        }
    }
}
