//! Blocking connection interface implemented by drivers.

use crate::error::Result;
use crate::handler::{DropHandler, ResultHandler};
use crate::opts::Opts;
use crate::query::Query;

/// One physical connection owned by a single worker thread.
///
/// The driver performs all wire I/O; the pool only calls these methods from
/// the connection's own worker.
pub trait Connection: Send {
    /// Run every statement of `query`, reporting results to `handler`.
    ///
    /// The driver must call [`ResultHandler::execution_finished`] exactly once
    /// when the connection is ready for another query. If a hook returns
    /// `Err`, stop at the next point where the connection is still usable,
    /// call `execution_finished`, and return `Ok`. Return `Err` without
    /// finishing only when that is impossible; the connection is then replaced.
    fn execute(&mut self, query: &Query, handler: &mut dyn ResultHandler) -> Result<()>;

    /// Check the connection is alive.
    fn ping(&mut self) -> Result<()> {
        let mut handler = DropHandler::new();
        self.execute(&Query::new("SELECT 1"), &mut handler)?;
        handler.into_result().map(|_| ())
    }

    /// Returns true if the connection is known to be unusable.
    fn is_broken(&self) -> bool {
        false
    }

    /// Close the connection gracefully.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<C: Connection + ?Sized> Connection for Box<C> {
    fn execute(&mut self, query: &Query, handler: &mut dyn ResultHandler) -> Result<()> {
        (**self).execute(query, handler)
    }

    fn ping(&mut self) -> Result<()> {
        (**self).ping()
    }

    fn is_broken(&self) -> bool {
        (**self).is_broken()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Opens physical connections for pool slots.
pub trait Connect: Send + Sync + 'static {
    type Conn: Connection + 'static;

    /// Open a new connection.
    fn connect(&self, opts: &Opts) -> Result<Self::Conn>;
}

impl<F, C> Connect for F
where
    F: Fn(&Opts) -> Result<C> + Send + Sync + 'static,
    C: Connection + 'static,
{
    type Conn = C;

    fn connect(&self, opts: &Opts) -> Result<C> {
        self(opts)
    }
}
