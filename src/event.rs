//! Result events delivered on a query's result stream.
//!
//! Event order for a multi-statement query like `"SELECT 1; UPDATE foo SET x=1"`:
//! ```text
//! RowBatch(0, last)          // SELECT 1
//! CommandStatus(1, "UPDATE") // UPDATE
//! <completion>
//! ```
//!
//! Warnings and progress notices share the index of the statement during
//! which they arrived. A stream ends either with completion (the iterator
//! returns `None`) or with exactly one [`ResultEvent::Error`].

use std::sync::Arc;

use crate::error::{Error, ErrorFields};
use crate::row::Row;

/// Zero-based ordinal of a statement result within one query.
pub type StatementIndex = usize;

/// PostgreSQL Object Identifier (OID)
pub type Oid = u32;

/// Data format code of a result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u16)]
pub enum FormatCode {
    /// Text format (human-readable)
    #[default]
    Text = 0,
    /// Binary format (type-specific packed representation)
    Binary = 1,
}

impl From<u16> for FormatCode {
    fn from(value: u16) -> Self {
        match value {
            1 => FormatCode::Binary,
            _ => FormatCode::Text,
        }
    }
}

/// Column metadata of a result set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Field {
    /// Column name
    pub name: String,
    /// Table OID (0 if not a table column)
    pub table_oid: Oid,
    /// Column attribute number (0 if not a table column)
    pub column_id: i16,
    /// Data type OID
    pub type_oid: Oid,
    /// Type size (-1 for variable, -2 for null-terminated)
    pub type_size: i16,
    /// Type modifier (type-specific)
    pub type_modifier: i32,
    /// Value format
    pub format: FormatCode,
}

impl Field {
    /// Create a text-format field with the given name and type.
    pub fn new(name: impl Into<String>, type_oid: Oid) -> Self {
        Self {
            name: name.into(),
            type_oid,
            type_size: -1,
            ..Default::default()
        }
    }
}

/// A chunk of one statement's rows.
#[derive(Debug, Clone, PartialEq)]
pub struct RowBatch {
    pub statement_index: StatementIndex,
    pub fields: Arc<[Field]>,
    pub rows: Vec<Row>,
    /// True for the final batch of this statement.
    pub last: bool,
}

impl RowBatch {
    /// Number of rows in this batch.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if this batch carries no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of the column named `name`.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// Completion of a non-row-returning statement (INSERT, UPDATE, DDL, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStatus {
    pub statement_index: StatementIndex,
    /// Command tag verb, e.g. `INSERT`, `BEGIN`, `CREATE TABLE`.
    pub tag: String,
    pub update_count: u64,
    /// OID of the inserted row for single-row inserts into tables with OIDs.
    pub inserted_id: Option<u32>,
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {} {}", self.statement_index, self.tag, self.update_count)?;
        if let Some(oid) = self.inserted_id {
            write!(f, " (oid {})", oid)?;
        }
        Ok(())
    }
}

/// Non-fatal notice raised by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub statement_index: StatementIndex,
    pub severity: String,
    pub message: String,
    /// All notice fields as sent by the server.
    pub fields: ErrorFields,
}

/// Connection-level checkpoint notice. Carries no payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub statement_index: StatementIndex,
}

/// Terminal failure of a query.
#[derive(Debug, Clone)]
pub struct QueryError {
    /// Text of the statement that failed, if it could be identified.
    pub statement: Option<String>,
    pub statement_index: StatementIndex,
    pub message: String,
    /// SQLSTATE code reported by the server
    pub sql_state: Option<String>,
    /// Structured server error fields
    pub detail: Option<ErrorFields>,
    /// Underlying error, set for connection faults and driver failures
    pub cause: Option<Arc<Error>>,
}

impl QueryError {
    /// Build from an error raised while executing statement `statement_index`.
    pub fn from_error(
        statement: Option<&str>,
        statement_index: StatementIndex,
        err: Error,
    ) -> Self {
        match err {
            Error::Server(fields) => Self {
                statement: statement.map(str::to_string),
                statement_index,
                message: fields.message().to_string(),
                sql_state: fields.code.clone(),
                detail: Some(fields),
                cause: None,
            },
            other => Self {
                statement: statement.map(str::to_string),
                statement_index,
                message: other.to_string(),
                sql_state: None,
                detail: None,
                cause: Some(Arc::new(other)),
            },
        }
    }

    /// Returns true if this failure invalidated the connection.
    pub fn is_connection_fault(&self) -> bool {
        let fatal = self
            .detail
            .as_ref()
            .is_some_and(|d| matches!(d.severity(), Some("FATAL") | Some("PANIC")));
        fatal || self.cause.as_ref().is_some_and(|c| c.is_connection_broken())
    }
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "statement {} failed: {}", self.statement_index, self.message)?;
        if let Some(code) = &self.sql_state {
            write!(f, " (SQLSTATE {})", code)?;
        }
        if let Some(sql) = &self.statement {
            write!(f, "\nSTATEMENT: {}", sql)?;
        }
        Ok(())
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// One message on a query's result stream.
#[derive(Debug, Clone)]
pub enum ResultEvent {
    RowBatch(RowBatch),
    CommandStatus(CommandStatus),
    Warning(Warning),
    Progress(Progress),
    /// Always the last event of its stream.
    Error(QueryError),
}

impl ResultEvent {
    /// Index of the statement this event belongs to.
    pub fn statement_index(&self) -> StatementIndex {
        match self {
            ResultEvent::RowBatch(b) => b.statement_index,
            ResultEvent::CommandStatus(c) => c.statement_index,
            ResultEvent::Warning(w) => w.statement_index,
            ResultEvent::Progress(p) => p.statement_index,
            ResultEvent::Error(e) => e.statement_index,
        }
    }

    /// Returns true for the `Error` variant.
    pub fn is_error(&self) -> bool {
        matches!(self, ResultEvent::Error(_))
    }

    /// Short variant name, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            ResultEvent::RowBatch(_) => "RowBatch",
            ResultEvent::CommandStatus(_) => "CommandStatus",
            ResultEvent::Warning(_) => "Warning",
            ResultEvent::Progress(_) => "Progress",
            ResultEvent::Error(_) => "Error",
        }
    }
}
