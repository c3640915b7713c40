//! Storage capability interface.
//!
//! The repository only ever talks to a [`Session`]. A session executes typed
//! [`Statement`]s in three ways:
//! - `query`: returns a [`RowCursor`] over result rows in clustering order
//! - `execute_batch`: submits a [`Batch`] of writes as one logged unit
//! - `execute_cas`: runs a conditional write and reports whether it applied
//!
//! Connection bootstrapping and retries belong to whoever builds the session.

use async_trait::async_trait;

use super::row::Row;
use super::statement::Statement;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Statement {kind} cannot be used with {operation}")]
    UnsupportedStatement {
        operation: &'static str,
        kind: &'static str,
    },

    #[error("Column {index} missing from row")]
    MissingColumn { index: usize },

    #[error("Column {index} is not {expected}")]
    ColumnType { index: usize, expected: &'static str },

    #[error("Value {value} out of range for column {column}")]
    OutOfRange { column: &'static str, value: i64 },

    #[error("Invalid stored timestamp: {0}")]
    InvalidTimestamp(i64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Forward-only cursor over query results.
///
/// Mirrors a driver iterator: `next_row` yields `None` both on exhaustion
/// and on failure, and the failure is only reported by `close`. Callers must
/// always close the cursor, even after consuming every row.
#[async_trait]
pub trait RowCursor: Send {
    /// Advance to the next row.
    async fn next_row(&mut self) -> Option<Row>;

    /// Release the cursor and surface any deferred scan or connection error.
    async fn close(&mut self) -> Result<()>;
}

/// Builder for a logged batch of write statements.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    statements: Vec<Statement>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a statement to the batch.
    pub fn add(&mut self, statement: Statement) {
        self.statements.push(statement);
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn into_statements(self) -> Vec<Statement> {
        self.statements
    }
}

/// Abstract storage capability.
///
/// Implementations:
/// - `MockSession`: in-memory wide-column store for tests and local runs
/// - `SqliteSession`: SQLite storage
///
/// Batch atomicity is whatever the backend offers for a logged batch. It is
/// all-or-nothing per call on both bundled backends, but a distributed
/// wide-column store only guarantees that every statement is eventually
/// applied, not that readers never see a partial batch across partitions.
#[async_trait]
pub trait Session: Send + Sync {
    /// Execute a select statement.
    async fn query(&self, statement: Statement) -> Result<Box<dyn RowCursor>>;

    /// Execute every statement in the batch as one unit.
    async fn execute_batch(&self, batch: Batch) -> Result<()>;

    /// Execute a conditional write. Returns `false` when the guarded row did
    /// not exist and nothing was changed.
    async fn execute_cas(&self, statement: Statement) -> Result<bool>;
}

/// Cursor over rows that were already materialized.
///
/// Used by backends that fetch a whole result set at once, and by tests that
/// need to feed the aggregators directly.
pub struct VecRowCursor {
    rows: std::vec::IntoIter<Row>,
    close_error: Option<StorageError>,
}

impl VecRowCursor {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows: rows.into_iter(),
            close_error: None,
        }
    }

    /// Make `close` fail with `error` after the rows have been handed out.
    pub fn with_close_error(mut self, error: StorageError) -> Self {
        self.close_error = Some(error);
        self
    }
}

#[async_trait]
impl RowCursor for VecRowCursor {
    async fn next_row(&mut self) -> Option<Row> {
        self.rows.next()
    }

    async fn close(&mut self) -> Result<()> {
        match self.close_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
