//! # Ironbatch
//!
//! A **chunk-oriented batch step engine** for Rust. A step reads items from a
//! source, transforms and filters them, writes the survivors to a sink, and
//! commits the work in fixed-size chunks, each inside its own transaction.
//! Progress and failures are accounted on a ledger that is persisted after
//! every chunk.
//!
//! ## Key Features
//!
//! - **Single-threaded executor** - one read, process, write, commit loop ([`ChunkStep`])
//! - **Fan-out executor** - one producer, N consumers and an orchestrator deciding every
//!   commit ([`MultiChunkStep`])
//! - **Tasklet steps** - run one unit of work, optionally inside a transaction ([`TaskletStep`])
//! - **Optimistic accounting** - counters are applied before a chunk is durable and undone
//!   when it is not
//! - **Failures as data** - errors are recorded on the returned [`StepStatus`] instead of
//!   unwinding through the caller
//! - **Pluggable persistence** - every snapshot goes through a [`StatusStore`]
//!
//! ## Quick Start
//!
//! ```
//! use ironbatch::*;
//! use ironbatch::resource::{IterReader, processor_fn, writer_fn};
//! # use anyhow::Result;
//!
//! # fn main() -> Result<()> {
//! let mut step = ChunkStep::builder()
//!     .name("evens")
//!     .commit_interval(10)
//!     .reader(IterReader::new(1..=95u32))
//!     .processor(processor_fn(|n: u32| Ok((n % 2 == 0).then_some(n))))
//!     .writer(writer_fn(|_batch: Vec<u32>| Ok(())))
//!     .build()?;
//!
//! let status = step.execute()?;
//! assert_eq!(status.state(), StepState::Completed);
//! assert_eq!(status.read(), 95);
//! assert_eq!(status.written(), 47);
//! assert_eq!(status.committed(), 10);
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Steps
//!
//! Every executor implements [`Step`]. `execute` resets the step's ledger,
//! runs to a terminal state and returns the final [`StepStatus`]. Steps
//! built with `throw_errors(true)` (the default) return a failed status as
//! [`BatchError::StepExecution`] instead.
//!
//! ### Items
//!
//! Items flow through an [`ItemReader`], an [`ItemProcessor`] and an
//! [`ItemWriter`]. A processor drops an item by returning `Ok(None)`; dropped
//! items are counted as skipped.
//!
//! ### Transactions and the ledger
//!
//! Each chunk runs between [`Transaction::begin`] and either `commit` or
//! `rollback`. The [`ChunkLedger`] applies the chunk's skip, write and commit
//! counts first and keeps them in an undo buffer until the transaction is
//! durable. A chunk whose transaction fails is subtracted again, so the
//! final counters only reflect committed chunks.
//!
//! ### States
//!
//! `Starting` → `Executing` → `Completed`, `Failed` or `CriticalFailed`.
//! `CriticalFailed` means that even persisting the failure failed.
//!
//! ## Feature Flags
//!
//! - `logging` (default) - [`logging::init_logging`], a `tracing-subscriber` setup helper.
//!   The engine itself always emits `tracing` events.

pub mod chunk;
pub mod config;
pub mod error;
pub mod handshake;
pub mod job;
pub mod ledger;
#[cfg(feature = "logging")]
pub mod logging;
pub mod multi;
pub mod persistence;
pub mod resource;
pub mod status;
pub mod step;
pub mod tasklet;
pub mod testing;
pub mod transaction;

pub use chunk::{ChunkStep, ChunkStepBuilder};
pub use config::StepConfig;
pub use error::{BatchError, Result};
pub use job::{Job, JobOutcome, JobReport, JobRunner, StepsJob};
pub use ledger::{ChunkLedger, SINGLE_SLOT};
pub use multi::{ConsumerPhase, MultiChunkStep, MultiChunkStepBuilder};
pub use persistence::{JsonFileStatusStore, LogStatusStore, StatusStore};
pub use resource::{ItemProcessor, ItemReader, ItemWriter, Lifecycle, PassThrough, Tasklet};
pub use status::{StepState, StepStatus};
pub use step::Step;
pub use tasklet::{TaskletStep, TaskletStepBuilder};
pub use transaction::{NoopTransaction, Transaction};
