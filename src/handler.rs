//! Protocol callback hooks.
//!
//! A driver executing a [`Query`](crate::query::Query) reports what the
//! server sent through a [`ResultHandler`].
//!
//! Callback patterns by statement type:
//! - SELECT (any row count): `rows`
//! - INSERT/UPDATE/DELETE/DDL: `command_complete`
//! - server notices: `warning`, at any point
//! - failure of a statement: `error`, followed by no results for later statements
//!
//! For multi-statement queries like `"SELECT 1; UPDATE foo SET x=1"`:
//! ```text
//! rows                 // SELECT 1
//! command_complete     // UPDATE
//! execution_finished
//! ```
//!
//! `execution_finished` is called exactly once, after which the connection is
//! ready for the next query.

use crate::error::{Error, ErrorFields, Result};
use crate::event::Field;
use crate::row::Row;

/// Receiver of raw per-statement protocol events.
///
/// Hooks returning `Err` ask the driver to stop executing at its next safe
/// point and then call [`execution_finished`](ResultHandler::execution_finished).
pub trait ResultHandler {
    /// A statement produced a result set. Delivered fully materialized.
    ///
    /// `cursor` is true when the rows came from a server-side portal that
    /// still has unfetched rows.
    fn rows(&mut self, fields: &[Field], tuples: Vec<Row>, cursor: bool) -> Result<()>;

    /// A statement without a result set completed.
    fn command_complete(
        &mut self,
        tag: &str,
        update_count: u64,
        inserted_id: Option<u32>,
    ) -> Result<()>;

    /// The server sent a notice.
    fn warning(&mut self, notice: ErrorFields) -> Result<()> {
        let _ = notice;
        Ok(())
    }

    /// The connection reached a checkpoint.
    fn progress(&mut self) -> Result<()> {
        Ok(())
    }

    /// The server (or the driver) reported an error for the current statement.
    fn error(&mut self, err: Error);

    /// Execution ended. `last_error` is a failure not already passed to `error`.
    fn execution_finished(&mut self, last_error: Option<Error>);
}

/// A handler that discards all results and remembers the first error.
#[derive(Debug, Default)]
pub struct DropHandler {
    rows_affected: u64,
    error: Option<Error>,
    finished: bool,
}

impl DropHandler {
    /// Create a new drop handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total rows affected or returned across all statements.
    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    /// `Ok` if execution finished without errors.
    pub fn into_result(self) -> Result<u64> {
        match self.error {
            Some(err) => Err(err),
            None if !self.finished => Err(Error::Protocol(
                "execution did not finish".into(),
            )),
            None => Ok(self.rows_affected),
        }
    }
}

impl ResultHandler for DropHandler {
    fn rows(&mut self, _fields: &[Field], tuples: Vec<Row>, _cursor: bool) -> Result<()> {
        self.rows_affected += tuples.len() as u64;
        Ok(())
    }

    fn command_complete(
        &mut self,
        _tag: &str,
        update_count: u64,
        _inserted_id: Option<u32>,
    ) -> Result<()> {
        self.rows_affected += update_count;
        Ok(())
    }

    fn error(&mut self, err: Error) {
        self.error.get_or_insert(err);
    }

    fn execution_finished(&mut self, last_error: Option<Error>) {
        if let Some(err) = last_error {
            self.error.get_or_insert(err);
        }
        self.finished = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_handler_counts_and_keeps_first_error() {
        let mut h = DropHandler::new();
        h.rows(&[], vec![Row::default(), Row::default()], false).unwrap();
        h.command_complete("UPDATE", 3, None).unwrap();
        assert_eq!(h.rows_affected(), 5);

        h.error(Error::Protocol("first".into()));
        h.error(Error::Protocol("second".into()));
        h.execution_finished(None);
        match h.into_result() {
            Err(Error::Protocol(msg)) => assert_eq!(msg, "first"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn drop_handler_requires_finish() {
        assert!(DropHandler::new().into_result().is_err());
        let mut h = DropHandler::new();
        h.execution_finished(None);
        assert_eq!(h.into_result().unwrap(), 0);
    }
}
