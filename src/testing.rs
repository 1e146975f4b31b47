//! Deterministic fixtures for exercising steps in tests.
//!
//! Every fixture counts its calls and can be scripted to fail on a given
//! call, which makes failure paths reproducible:
//!
//! - [`NumberReader`]: yields `1..=max`, optionally failing the n-th read
//! - [`ModuloFilter`]: drops multiples of a modulo, optionally failing the n-th call
//! - [`RecordingWriter`]: collects written items, optionally failing the n-th item
//! - [`ScriptedTransaction`]: counts begins, commits and rollbacks; any of them can fail
//! - [`ScriptedStore`]: keeps every saved snapshot; chosen saves fail
//! - [`FailingResource`]: a reader, writer or tasklet whose hooks can fail
//!
//! Fixtures that hold shared state (`RecordingWriter`, `ScriptedTransaction`,
//! `ScriptedStore`, `FailingResource`) share it between clones, so a test can
//! hand a clone to a step and inspect the original afterwards.
//!
//! ```
//! use ironbatch::chunk::ChunkStep;
//! use ironbatch::step::Step;
//! use ironbatch::testing::*;
//!
//! let writer = RecordingWriter::new();
//! let mut step = ChunkStep::builder()
//!     .name("numbers")
//!     .commit_interval(5)
//!     .reader(NumberReader::new(12))
//!     .processor(ModuloFilter::new(4))
//!     .writer(writer.clone())
//!     .build()
//!     .unwrap();
//! let status = step.execute().unwrap();
//! assert_eq!(status.written(), 9);
//! assert_eq!(writer.items().len(), 9);
//! ```

pub mod fixtures;
pub mod scripted;

pub use fixtures::*;
pub use scripted::*;
