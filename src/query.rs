//! Submitted units of work.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::event::StatementIndex;

/// One SQL statement with its text-format parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    /// Bound parameters (`None` = SQL NULL), referenced as `$1`, `$2`, ...
    pub params: Vec<Option<String>>,
}

impl Statement {
    /// Create a statement without parameters.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }
}

/// An immutable query: one or more statements executed in one round trip.
///
/// Cloning is cheap; the statements are shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    statements: Arc<[Statement]>,
}

impl Query {
    /// A query with a single statement.
    ///
    /// The text may itself contain several `;`-separated statements; their
    /// results are indexed in order but only index 0 has known text.
    /// The text is not checked here; [`validate`](Self::validate) and
    /// [`Pool::submit`](crate::sync::Pool::submit) reject a blank statement.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            statements: Arc::from([Statement::new(sql)]),
        }
    }

    /// A batch of parameterless statements.
    pub fn batch<I, S>(statements: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut builder = Self::builder();
        for sql in statements {
            builder = builder.statement(sql);
        }
        builder.build()
    }

    /// Start building a query statement by statement.
    pub fn builder() -> QueryBuilder {
        QueryBuilder::default()
    }

    /// All statements in submission order.
    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    /// Text of statement `index`, if known.
    pub fn statement(&self, index: StatementIndex) -> Option<&str> {
        self.statements.get(index).map(|s| s.sql.as_str())
    }

    /// Number of statements.
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    /// Always false for a built query; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Statements joined into one simple-protocol query string.
    pub fn sql(&self) -> String {
        self.statements
            .iter()
            .map(|s| s.sql.trim().trim_end_matches(';'))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Check that there is at least one statement and none is blank.
    pub fn validate(&self) -> Result<()> {
        validate(&self.statements)
    }

    /// Returns true if any statement has bound parameters.
    pub fn has_params(&self) -> bool {
        self.statements.iter().any(|s| !s.params.is_empty())
    }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.sql())
    }
}

/// Builder for [`Query`].
#[derive(Debug, Default)]
pub struct QueryBuilder {
    statements: Vec<Statement>,
}

impl QueryBuilder {
    /// Append a statement.
    pub fn statement(mut self, sql: impl Into<String>) -> Self {
        self.statements.push(Statement::new(sql));
        self
    }

    /// Bind the next parameter of the most recently added statement.
    pub fn bind<V: ToString>(mut self, value: Option<V>) -> Self {
        if let Some(stmt) = self.statements.last_mut() {
            stmt.params.push(value.map(|v| v.to_string()));
        }
        self
    }

    /// Finish the query. Fails if no statement was added or one is blank.
    pub fn build(self) -> Result<Query> {
        validate(&self.statements)?;
        Ok(Query {
            statements: self.statements.into(),
        })
    }
}

fn validate(statements: &[Statement]) -> Result<()> {
    if statements.is_empty() {
        return Err(Error::InvalidUsage("query has no statements".into()));
    }
    if let Some(pos) = statements.iter().position(|s| s.sql.trim().is_empty()) {
        return Err(Error::InvalidUsage(format!("statement {} is empty", pos)));
    }
    Ok(())
}

impl From<&str> for Query {
    fn from(sql: &str) -> Self {
        Self::new(sql)
    }
}

impl From<String> for Query {
    fn from(sql: String) -> Self {
        Self::new(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_lookup() {
        let query = Query::batch(["BEGIN", "UPDATE t SET x = 1", "COMMIT"]).unwrap();
        assert_eq!(query.len(), 3);
        assert_eq!(query.statement(1), Some("UPDATE t SET x = 1"));
        assert_eq!(query.statement(3), None);
        assert_eq!(query.sql(), "BEGIN; UPDATE t SET x = 1; COMMIT");
    }

    #[test]
    fn bind_attaches_to_last_statement() {
        let query = Query::builder()
            .statement("SELECT 1")
            .statement("INSERT INTO t VALUES ($1, $2)")
            .bind(Some(7))
            .bind(None::<&str>)
            .build()
            .unwrap();
        assert!(query.statements()[0].params.is_empty());
        assert_eq!(
            query.statements()[1].params,
            vec![Some("7".to_string()), None]
        );
        assert!(query.has_params());
    }

    #[test]
    fn rejects_empty_queries() {
        assert!(Query::builder().build().is_err());
        assert!(Query::batch(["SELECT 1", "  "]).is_err());
    }

    #[test]
    fn unchecked_constructor_validates_like_builder() {
        assert!(matches!(Query::new("").validate(), Err(Error::InvalidUsage(_))));
        assert!(matches!(Query::from("  ").validate(), Err(Error::InvalidUsage(_))));
        Query::new("SELECT 1").validate().unwrap();
    }
}
