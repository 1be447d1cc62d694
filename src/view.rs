//! Narrow projections over a result stream.
//!
//! Each function takes anything that yields [`ResultEvent`]s, usually a
//! [`ResultStream`](crate::stream::ResultStream), and consumes it lazily.

use crate::error::{Error, Result};
use crate::event::{CommandStatus, ResultEvent, Warning};
use crate::row::Row;

/// Expect exactly one [`CommandStatus`] and a clean completion.
///
/// Warnings and progress notices are skipped. A row batch, a second status,
/// or an `Error` event fails the projection.
pub fn status<I>(events: I) -> Result<CommandStatus>
where
    I: IntoIterator<Item = ResultEvent>,
{
    let mut found = None;
    for event in events {
        match event {
            ResultEvent::CommandStatus(status) if found.is_none() => found = Some(status),
            ResultEvent::CommandStatus(status) => {
                return Err(Error::UnexpectedEvent(format!(
                    "second command status for statement {}",
                    status.statement_index
                )));
            }
            ResultEvent::Warning(_) | ResultEvent::Progress(_) => {}
            ResultEvent::RowBatch(batch) => {
                return Err(Error::UnexpectedEvent(format!(
                    "row batch for statement {} where a command status was expected",
                    batch.statement_index
                )));
            }
            ResultEvent::Error(err) => return Err(err.into()),
        }
    }
    found.ok_or_else(|| Error::UnexpectedEvent("stream completed without a command status".into()))
}

/// Flatten row batches into individual rows.
///
/// Statuses and progress notices are dropped; warnings are logged at info
/// and dropped. An `Error` event is yielded once as `Err`, after which the
/// iterator is exhausted.
pub fn rows<I>(events: I) -> Rows<I::IntoIter>
where
    I: IntoIterator<Item = ResultEvent>,
{
    Rows {
        events: events.into_iter(),
        current: Vec::new().into_iter(),
        done: false,
    }
}

/// Iterator returned by [`rows`].
#[derive(Debug)]
pub struct Rows<I> {
    events: I,
    current: std::vec::IntoIter<Row>,
    done: bool,
}

impl<I: Iterator<Item = ResultEvent>> Iterator for Rows<I> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Result<Row>> {
        loop {
            if let Some(row) = self.current.next() {
                return Some(Ok(row));
            }
            if self.done {
                return None;
            }
            match self.events.next() {
                None => {
                    self.done = true;
                    return None;
                }
                Some(ResultEvent::RowBatch(batch)) => self.current = batch.rows.into_iter(),
                Some(ResultEvent::Warning(w)) => {
                    tracing::info!(statement = w.statement_index, "{}: {}", w.severity, w.message);
                }
                Some(ResultEvent::CommandStatus(_)) | Some(ResultEvent::Progress(_)) => {}
                Some(ResultEvent::Error(err)) => {
                    self.done = true;
                    return Some(Err(err.into()));
                }
            }
        }
    }
}

/// Concatenate the text-array column `column` of every row.
pub fn flat_array<I>(rows: I, column: usize) -> Result<Vec<Option<String>>>
where
    I: IntoIterator<Item = Row>,
{
    let mut out = Vec::new();
    for row in rows {
        out.extend(row.text_array(column)?);
    }
    Ok(out)
}

/// Render one event through `tracing` at a severity matching its kind.
pub fn log_event(event: &ResultEvent) {
    match event {
        ResultEvent::RowBatch(batch) => tracing::debug!(
            statement = batch.statement_index,
            rows = batch.len(),
            last = batch.last,
            "row batch"
        ),
        ResultEvent::CommandStatus(status) => log_status(status),
        ResultEvent::Warning(warning) => log_warning(warning),
        ResultEvent::Progress(p) => tracing::trace!(statement = p.statement_index, "progress"),
        ResultEvent::Error(err) => tracing::error!(
            statement = err.statement_index,
            sql_state = err.sql_state.as_deref(),
            "{}",
            err
        ),
    }
}

fn log_status(status: &CommandStatus) {
    match status.tag.as_str() {
        "BEGIN" | "COMMIT" => tracing::debug!("{}", status),
        tag if status.update_count == 0 => {
            tracing::debug!(statement = status.statement_index, "{}", tag)
        }
        tag => tracing::debug!(
            statement = status.statement_index,
            "{} ({} rows)",
            tag,
            status.update_count
        ),
    }
}

fn log_warning(warning: &Warning) {
    if warning.severity == "NOTICE" {
        tracing::debug!(statement = warning.statement_index, "{}", warning.message);
    } else {
        tracing::warn!(
            statement = warning.statement_index,
            severity = %warning.severity,
            "{}",
            warning.message
        );
    }
}

/// Pass events through unchanged, logging each one.
pub fn logged<I>(events: I) -> Logged<I::IntoIter>
where
    I: IntoIterator<Item = ResultEvent>,
{
    Logged {
        events: events.into_iter(),
    }
}

/// Iterator returned by [`logged`].
#[derive(Debug)]
pub struct Logged<I> {
    events: I,
}

impl<I: Iterator<Item = ResultEvent>> Iterator for Logged<I> {
    type Item = ResultEvent;

    fn next(&mut self) -> Option<ResultEvent> {
        let event = self.events.next()?;
        log_event(&event);
        Some(event)
    }
}

/// Consume a stream, logging every event. Returns the terminal error, if any.
pub fn log<I>(events: I) -> Result<()>
where
    I: IntoIterator<Item = ResultEvent>,
{
    for event in logged(events) {
        if let ResultEvent::Error(err) = event {
            return Err(err.into());
        }
    }
    Ok(())
}
