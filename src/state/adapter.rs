//! Result-stream adapter.
//!
//! Turns the protocol callbacks of one query execution into the ordered,
//! batched [`ResultEvent`] sequence of that query's [`ResultStream`].

use std::sync::Arc;

use crate::error::{Error, ErrorFields, Result};
use crate::event::{
    CommandStatus, Field, Progress, QueryError, ResultEvent, RowBatch, StatementIndex, Warning,
};
use crate::handler::ResultHandler;
use crate::query::Query;
use crate::row::Row;
use crate::stream::{Emitter, ResultStream, channel};

/// Maximum rows per emitted [`RowBatch`].
pub const ROW_BATCH_SIZE: usize = 5000;

/// Adapter state for one query on one connection.
///
/// Not shared across threads; every hook runs on the executing worker and
/// may block there until the consumer signals demand.
#[derive(Debug)]
pub struct ResultAdapter {
    query: Query,
    emitter: Emitter,
    statement_index: StatementIndex,
    total_rows: u64,
    /// First error reported during execution.
    error: Option<QueryError>,
    finished: bool,
    cancelled: bool,
    reset_connection: bool,
}

impl ResultAdapter {
    /// Create an adapter for `query` and the stream it feeds.
    pub fn new(query: Query) -> (Self, ResultStream) {
        let (emitter, stream) = channel();
        (Self::with_emitter(query, emitter), stream)
    }

    pub(crate) fn with_emitter(query: Query, emitter: Emitter) -> Self {
        Self {
            query,
            emitter,
            statement_index: 0,
            total_rows: 0,
            error: None,
            finished: false,
            cancelled: false,
            reset_connection: false,
        }
    }

    /// Index of the statement currently producing results.
    pub fn statement_index(&self) -> StatementIndex {
        self.statement_index
    }

    /// Returns true once a terminal signal was delivered.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Returns true if the connection must not run another query.
    pub fn needs_reset(&self) -> bool {
        self.reset_connection
    }

    /// Reconcile the driver's return value with the callbacks received.
    ///
    /// Returns true if the connection is in a known state and can be reused.
    pub fn settle(&mut self, outcome: Result<()>) -> bool {
        match outcome {
            Ok(()) if self.finished => {}
            Ok(()) => self.abort(Error::Protocol(
                "driver returned without finishing execution".into(),
            )),
            Err(err) if !self.finished => self.abort(err),
            Err(err) => {
                if err.is_connection_broken() {
                    self.reset_connection = true;
                }
            }
        }
        !self.reset_connection
    }

    /// Terminate the stream after execution stopped outside a safe point.
    pub fn abort(&mut self, err: Error) {
        self.reset_connection = true;
        if self.finished {
            return;
        }
        self.finished = true;
        if matches!(err, Error::Cancelled) && self.cancelled {
            tracing::debug!(statement = self.statement_index, "query cancelled mid-statement");
            self.emitter.complete();
            return;
        }
        let err = self.error.take().unwrap_or_else(|| self.query_error(err));
        tracing::debug!(statement = err.statement_index, "query aborted: {}", err.message);
        self.emitter.fail(err);
    }

    fn query_error(&self, err: Error) -> QueryError {
        QueryError::from_error(
            self.query.statement(self.statement_index),
            self.statement_index,
            err,
        )
    }

    fn send(&mut self, event: ResultEvent) -> Result<()> {
        if self.error.is_some() {
            tracing::trace!(
                statement = self.statement_index,
                kind = event.kind(),
                "event after error suppressed"
            );
            return Ok(());
        }
        match self.emitter.emit(event) {
            Ok(()) => Ok(()),
            Err(Error::Cancelled) => {
                self.cancelled = true;
                Err(Error::Cancelled)
            }
            // Interrupted by shutdown: the consumer is still there and must
            // learn the query did not run to completion.
            Err(err) => {
                tracing::debug!(statement = self.statement_index, "emission refused: {}", err);
                self.error = Some(self.query_error(err.clone()));
                Err(err)
            }
        }
    }

    fn send_rows(&mut self, fields: &[Field], tuples: Vec<Row>) -> Result<()> {
        let fields: Arc<[Field]> = Arc::from(fields);
        let statement_index = self.statement_index;

        if tuples.is_empty() {
            return self.send(ResultEvent::RowBatch(RowBatch {
                statement_index,
                fields,
                rows: Vec::new(),
                last: true,
            }));
        }

        self.total_rows += tuples.len() as u64;

        // Drivers hand over complete result sets; chunk them anyway so each
        // event stays bounded and the consumer can pace the producer.
        let mut remaining = tuples.into_iter();
        while remaining.len() > 0 {
            let rows: Vec<Row> = remaining.by_ref().take(ROW_BATCH_SIZE).collect();
            self.send(ResultEvent::RowBatch(RowBatch {
                statement_index,
                fields: Arc::clone(&fields),
                rows,
                last: remaining.len() == 0,
            }))?;
        }
        Ok(())
    }
}

impl ResultHandler for ResultAdapter {
    fn rows(&mut self, fields: &[Field], tuples: Vec<Row>, cursor: bool) -> Result<()> {
        if cursor {
            tracing::error!(
                statement = self.statement_index,
                "cursor-backed result sets are not supported; failing query"
            );
            self.reset_connection = true;
            self.error(Error::Unsupported(
                "cursor-backed result sets".into(),
            ));
        } else {
            self.send_rows(fields, tuples)?;
        }
        self.statement_index += 1;
        Ok(())
    }

    fn command_complete(
        &mut self,
        tag: &str,
        update_count: u64,
        inserted_id: Option<u32>,
    ) -> Result<()> {
        let status = CommandStatus {
            statement_index: self.statement_index,
            tag: tag.to_string(),
            update_count,
            inserted_id,
        };
        tracing::trace!("{}", status);
        self.statement_index += 1;
        self.send(ResultEvent::CommandStatus(status))
    }

    fn warning(&mut self, notice: ErrorFields) -> Result<()> {
        tracing::debug!(
            statement = self.statement_index,
            "SQL warning: {}",
            notice
        );
        let warning = Warning {
            statement_index: self.statement_index,
            severity: notice.severity().unwrap_or("WARNING").to_string(),
            message: notice.message().to_string(),
            fields: notice,
        };
        self.send(ResultEvent::Warning(warning))
    }

    fn progress(&mut self) -> Result<()> {
        tracing::debug!(statement = self.statement_index, "secured progress");
        self.send(ResultEvent::Progress(Progress {
            statement_index: self.statement_index,
        }))
    }

    fn error(&mut self, err: Error) {
        if err.is_connection_broken() {
            self.reset_connection = true;
        }
        if self.error.is_some() {
            tracing::trace!(statement = self.statement_index, "additional error: {}", err);
            return;
        }
        let err = self.query_error(err);
        tracing::trace!(statement = err.statement_index, "SQL error received: {}", err.message);
        self.error = Some(err);
    }

    fn execution_finished(&mut self, last_error: Option<Error>) {
        if self.finished {
            return;
        }
        self.finished = true;
        tracing::debug!(
            rows = self.total_rows,
            statements = self.statement_index,
            failed = self.error.is_some(),
            "finished query"
        );

        if let Some(err) = &last_error {
            if err.is_connection_broken() {
                self.reset_connection = true;
            }
        }

        if let Some(err) = self.error.take() {
            self.emitter.fail(err);
            return;
        }
        match last_error {
            // The driver drained the connection after our hook refused an
            // event; the consumer is gone, so just close.
            Some(Error::Cancelled) if self.cancelled => {
                self.emitter.complete();
            }
            Some(err) => {
                let err = self.query_error(err);
                self.emitter.fail(err);
            }
            None => {
                self.emitter.complete();
            }
        }
    }
}

impl Drop for ResultAdapter {
    fn drop(&mut self) {
        if !self.finished {
            self.abort(Error::ConnectionBroken(
                "query execution aborted before completion".into(),
            ));
        }
    }
}
