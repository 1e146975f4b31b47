//! Transaction resource contract.
//!
//! Every chunk is bracketed by `begin` and either `commit` or `rollback`.
//! In the fan-out executor each consumer works against its own clone of the
//! configured resource; there is no coordination between those clones.

use anyhow::Result;
use tracing::trace;

pub trait Transaction: Send {
    /// # Errors
    ///
    /// Returns an error if a transaction cannot be started.
    fn begin(&mut self) -> Result<()>;

    /// # Errors
    ///
    /// Returns an error if the open transaction cannot be made durable.
    fn commit(&mut self) -> Result<()>;

    /// # Errors
    ///
    /// Returns an error if the open transaction cannot be discarded.
    fn rollback(&mut self) -> Result<()>;
}

/// Transaction resource that does nothing. Used when none is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTransaction;

impl Transaction for NoopTransaction {
    fn begin(&mut self) -> Result<()> {
        trace!("begin");
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        trace!("commit");
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        trace!("rollback");
        Ok(())
    }
}

impl<X: Transaction + ?Sized> Transaction for Box<X> {
    fn begin(&mut self) -> Result<()> {
        (**self).begin()
    }

    fn commit(&mut self) -> Result<()> {
        (**self).commit()
    }

    fn rollback(&mut self) -> Result<()> {
        (**self).rollback()
    }
}
