//! State exchanged between the orchestrator and one worker.
//!
//! Each worker pairs with the orchestrator through one handshake and one
//! slot. The handshake alternates who may touch the slot, so the slot mutex
//! is never contended; it only makes the hand-over visible across threads.
//!
//! Both halves record the first handshake failure they observe on the
//! ledger and stay quiet afterwards: once a pair is broken every later
//! rendezvous fails immediately, and the orchestrator only needs to learn
//! that the worker is unusable.

use crate::error::BatchError;
use crate::handshake::{self, HandshakeEnd};
use crate::ledger::ChunkLedger;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Where a consumer is in its per-round protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConsumerPhase {
    WaitForData,
    Preprocess,
    Process,
    WaitForCommitOrRollback,
    Commit,
    Rollback,
    WaitForFinish,
    Finished,
}

impl fmt::Display for ConsumerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::WaitForData => "waiting for data",
            Self::Preprocess => "pre-processing",
            Self::Process => "processing",
            Self::WaitForCommitOrRollback => "waiting for commit or rollback",
            Self::Commit => "committing",
            Self::Rollback => "rolling back",
            Self::WaitForFinish => "waiting for finish",
            Self::Finished => "finished",
        };
        f.write_str(s)
    }
}

/// Resolution ordered by the orchestrator for the current round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Order {
    /// Commit; `close_chunk` is set for the last active consumer of the round.
    Commit { close_chunk: bool },
    Rollback,
}

const ORCHESTRATOR: &str = "orchestrator";

/// Handshake bookkeeping shared by every link half.
struct Rendezvous {
    handshake: HandshakeEnd,
    ledger: ChunkLedger,
    failed: bool,
}

impl Rendezvous {
    fn new(handshake: HandshakeEnd, ledger: ChunkLedger) -> Self {
        Self {
            handshake,
            ledger,
            failed: false,
        }
    }

    /// Meet the peer; `false` if the pair is (now) broken.
    fn meet(&mut self) -> bool {
        match self.handshake.await_peer() {
            Ok(()) => true,
            Err(e) => {
                if !self.failed {
                    self.failed = true;
                    warn!(peer = self.handshake.peer(), error = %e, "handshake failed");
                    self.ledger.fail(e);
                }
                false
            }
        }
    }
}

struct ConsumerSlot<T> {
    items: Vec<T>,
    phase: ConsumerPhase,
    error: bool,
    finish: bool,
    commit: bool,
    close_chunk: bool,
}

/// Create the orchestrator half and the consumer half of consumer `index`.
pub(crate) fn consumer_link<T>(
    index: usize,
    ledger: &ChunkLedger,
    timeout: Option<Duration>,
) -> (ConsumerControl<T>, ConsumerLink<T>) {
    let name = format!("consumer-{index}");
    let (ours, theirs) = handshake::pair(ORCHESTRATOR, &name, timeout);
    let slot = Arc::new(Mutex::new(ConsumerSlot {
        items: Vec::new(),
        phase: ConsumerPhase::WaitForData,
        error: false,
        finish: false,
        commit: false,
        close_chunk: false,
    }));
    let control = ConsumerControl {
        index,
        slot: Arc::clone(&slot),
        rendezvous: Rendezvous::new(ours, ledger.clone()),
        finished: false,
    };
    let link = ConsumerLink {
        index,
        slot,
        rendezvous: Rendezvous::new(theirs, ledger.clone()),
    };
    (control, link)
}

/// Orchestrator half of a consumer pair.
pub(crate) struct ConsumerControl<T> {
    index: usize,
    slot: Arc<Mutex<ConsumerSlot<T>>>,
    rendezvous: Rendezvous,
    finished: bool,
}

impl<T> ConsumerControl<T> {
    /// Whether the consumer reported an error or the pair broke.
    pub(crate) fn is_error(&self) -> bool {
        self.rendezvous.failed || self.rendezvous.handshake.is_broken() || self.slot.lock().error
    }

    pub(crate) fn data_ready(&mut self, items: Vec<T>) {
        debug!(consumer = self.index, items = items.len(), "data ready");
        self.slot.lock().items = items;
        self.rendezvous.meet();
    }

    pub(crate) fn wait_for_processing(&mut self) {
        debug!(consumer = self.index, "waiting for processing");
        if !self.rendezvous.meet() {
            debug!(consumer = self.index, phase = %self.slot.lock().phase, "consumer unreachable");
        }
    }

    pub(crate) fn commit(&mut self, close_chunk: bool) {
        debug!(consumer = self.index, close_chunk, "ordering commit");
        {
            let mut slot = self.slot.lock();
            slot.commit = true;
            slot.close_chunk = close_chunk;
        }
        self.rendezvous.meet();
    }

    pub(crate) fn rollback(&mut self) {
        debug!(consumer = self.index, "ordering rollback");
        self.slot.lock().commit = false;
        self.rendezvous.meet();
    }

    pub(crate) fn wait_for_resolution(&mut self) {
        debug!(consumer = self.index, "waiting for resolution");
        self.rendezvous.meet();
    }

    /// Tell the consumer to leave its loop. Only the first call signals.
    pub(crate) fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        debug!(consumer = self.index, "ordering consumer to finish");
        self.slot.lock().finish = true;
        self.rendezvous.meet();
    }
}

/// Consumer half of a consumer pair.
pub(crate) struct ConsumerLink<T> {
    index: usize,
    slot: Arc<Mutex<ConsumerSlot<T>>>,
    rendezvous: Rendezvous,
}

impl<T> ConsumerLink<T> {
    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn phase(&self) -> ConsumerPhase {
        self.slot.lock().phase
    }

    pub(crate) fn set_phase(&self, phase: ConsumerPhase) {
        debug!(consumer = self.index, %phase, "phase");
        self.slot.lock().phase = phase;
    }

    pub(crate) fn is_broken(&self) -> bool {
        self.rendezvous.handshake.is_broken()
    }

    /// Record a failure raised in the current phase.
    pub(crate) fn fail(&self, source: anyhow::Error) {
        let phase = {
            let mut slot = self.slot.lock();
            slot.error = true;
            slot.phase
        };
        self.rendezvous.ledger.fail(BatchError::Consumer {
            index: self.index,
            phase,
            source,
        });
    }

    fn meet(&mut self) -> bool {
        let met = self.rendezvous.meet();
        if !met {
            self.slot.lock().error = true;
        }
        met
    }

    /// Wait for the next batch; `None` once finished or disconnected.
    pub(crate) fn wait_for_data(&mut self) -> Option<Vec<T>> {
        self.set_phase(ConsumerPhase::WaitForData);
        if !self.meet() {
            return None;
        }
        let mut slot = self.slot.lock();
        if slot.finish {
            None
        } else {
            Some(std::mem::take(&mut slot.items))
        }
    }

    pub(crate) fn finish_processing(&mut self) {
        debug!(consumer = self.index, "finished processing");
        self.meet();
    }

    /// Wait for the orchestrator's verdict. A broken pair always rolls back.
    pub(crate) fn wait_for_order(&mut self) -> Order {
        self.set_phase(ConsumerPhase::WaitForCommitOrRollback);
        if !self.meet() {
            return Order::Rollback;
        }
        let slot = self.slot.lock();
        if slot.commit {
            Order::Commit {
                close_chunk: slot.close_chunk,
            }
        } else {
            Order::Rollback
        }
    }

    pub(crate) fn finish_resolution(&mut self) {
        debug!(consumer = self.index, "finished resolution");
        self.slot.lock().commit = false;
        self.meet();
    }
}

struct ProducerSlot<T> {
    batches: Vec<Vec<T>>,
    read: usize,
    error: bool,
    finish: bool,
}

pub(crate) fn producer_link<T>(ledger: &ChunkLedger, timeout: Option<Duration>) -> (ProducerControl<T>, ProducerLink<T>) {
    let (ours, theirs) = handshake::pair(ORCHESTRATOR, "producer", timeout);
    let slot = Arc::new(Mutex::new(ProducerSlot {
        batches: Vec::new(),
        read: 0,
        error: false,
        finish: false,
    }));
    let control = ProducerControl {
        slot: Arc::clone(&slot),
        rendezvous: Rendezvous::new(ours, ledger.clone()),
        finished: false,
    };
    let link = ProducerLink {
        slot,
        rendezvous: Rendezvous::new(theirs, ledger.clone()),
    };
    (control, link)
}

/// Orchestrator half of the producer pair.
pub(crate) struct ProducerControl<T> {
    slot: Arc<Mutex<ProducerSlot<T>>>,
    rendezvous: Rendezvous,
    finished: bool,
}

impl<T> ProducerControl<T> {
    pub(crate) fn is_error(&self) -> bool {
        self.rendezvous.failed || self.rendezvous.handshake.is_broken() || self.slot.lock().error
    }

    pub(crate) fn start_read(&mut self) {
        debug!("ordering producer to read");
        self.rendezvous.meet();
    }

    pub(crate) fn wait_for_data(&mut self) {
        debug!("waiting for data");
        self.rendezvous.meet();
    }

    /// Take the batches of the round and the total number of items read.
    pub(crate) fn take(&mut self) -> (Vec<Vec<T>>, usize) {
        let mut slot = self.slot.lock();
        let read = std::mem::take(&mut slot.read);
        (std::mem::take(&mut slot.batches), read)
    }

    pub(crate) fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        debug!("ordering producer to finish");
        self.slot.lock().finish = true;
        self.rendezvous.meet();
    }
}

/// Producer half of the producer pair.
pub(crate) struct ProducerLink<T> {
    slot: Arc<Mutex<ProducerSlot<T>>>,
    rendezvous: Rendezvous,
}

impl<T> ProducerLink<T> {
    /// Wait for the next read order; `false` once finished or disconnected.
    pub(crate) fn wait_for_query(&mut self) -> bool {
        debug!("waiting for read order");
        let met = self.rendezvous.meet();
        if !met {
            self.slot.lock().error = true;
        }
        met && !self.slot.lock().finish
    }

    pub(crate) fn put(&self, batches: Vec<Vec<T>>, read: usize) {
        let mut slot = self.slot.lock();
        slot.batches = batches;
        slot.read = read;
    }

    pub(crate) fn fail(&self, source: anyhow::Error) {
        self.slot.lock().error = true;
        self.rendezvous.ledger.fail(BatchError::Producer(source));
    }

    pub(crate) fn data_ready(&mut self) {
        debug!("data ready");
        if !self.rendezvous.meet() {
            self.slot.lock().error = true;
        }
    }
}
