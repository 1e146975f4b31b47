//! Two-party rendezvous.
//!
//! [`pair`] returns the two ends of a handshake. Each call to
//! [`HandshakeEnd::await_peer`] returns once the other end has made its
//! matching call, so the n-th call on one side always meets the n-th call on
//! the other side. Each end posts a token into the peer's inbox and then
//! waits for the peer's token in its own inbox.
//!
//! A failure is terminal for the pair. The end that times out (or finds the
//! peer gone) raises the shared `broken` flag and posts a break token, which
//! wakes a peer blocked without a timeout. From then on every call on either
//! end fails immediately with [`BatchError::HandshakeBroken`].

use crate::error::BatchError;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Arrived,
    Break,
}

pub struct HandshakeEnd {
    peer: String,
    to_peer: Sender<Token>,
    from_peer: Receiver<Token>,
    broken: Arc<AtomicBool>,
    timeout: Option<Duration>,
}

/// Create both ends of a handshake. `a_name`/`b_name` identify the owner of
/// each end in errors and logs; `timeout` of `None` waits forever.
#[must_use]
pub fn pair(a_name: &str, b_name: &str, timeout: Option<Duration>) -> (HandshakeEnd, HandshakeEnd) {
    let (to_b, b_inbox) = unbounded();
    let (to_a, a_inbox) = unbounded();
    let broken = Arc::new(AtomicBool::new(false));
    let a = HandshakeEnd {
        peer: b_name.to_string(),
        to_peer: to_b,
        from_peer: a_inbox,
        broken: Arc::clone(&broken),
        timeout,
    };
    let b = HandshakeEnd {
        peer: a_name.to_string(),
        to_peer: to_a,
        from_peer: b_inbox,
        broken,
        timeout,
    };
    (a, b)
}

impl HandshakeEnd {
    /// Name of the party on the other end.
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    /// Block until the peer reaches its matching call.
    ///
    /// # Errors
    ///
    /// - [`BatchError::HandshakeTimeout`] if the peer did not arrive in time;
    ///   the pair is broken as a consequence.
    /// - [`BatchError::HandshakeBroken`] if the pair was already broken, the
    ///   peer broke it while we waited, or the peer end was dropped.
    pub fn await_peer(&self) -> Result<(), BatchError> {
        if self.is_broken() {
            return Err(self.broken_error());
        }
        if self.to_peer.send(Token::Arrived).is_err() {
            self.break_pair();
            return Err(self.broken_error());
        }
        trace!(peer = %self.peer, "waiting for peer");
        let received = match self.timeout {
            Some(timeout) => self.from_peer.recv_timeout(timeout).map_err(|e| match e {
                RecvTimeoutError::Timeout => BatchError::HandshakeTimeout {
                    peer: self.peer.clone(),
                    after: timeout,
                },
                RecvTimeoutError::Disconnected => self.broken_error(),
            }),
            None => self.from_peer.recv().map_err(|_| self.broken_error()),
        };
        match received {
            Ok(Token::Arrived) => Ok(()),
            Ok(Token::Break) => {
                self.broken.store(true, Ordering::Release);
                Err(self.broken_error())
            }
            Err(e) => {
                self.break_pair();
                Err(e)
            }
        }
    }

    /// Break the pair and wake the peer if it is waiting.
    pub fn break_pair(&self) {
        if !self.broken.swap(true, Ordering::AcqRel) {
            // The peer may already be gone, in which case nobody needs waking.
            let _ = self.to_peer.send(Token::Break);
        }
    }

    fn broken_error(&self) -> BatchError {
        BatchError::HandshakeBroken {
            peer: self.peer.clone(),
        }
    }
}

impl std::fmt::Debug for HandshakeEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeEnd")
            .field("peer", &self.peer)
            .field("broken", &self.is_broken())
            .field("timeout", &self.timeout)
            .finish()
    }
}
