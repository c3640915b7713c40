//! SQLite Session implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use sea_query::{Expr, OnConflict, Order, Query, SelectStatement, SqliteQueryBuilder};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row as _, SqliteConnection, SqlitePool};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::storage::schema::{EmployeeTrips, Operations, Routes, UnsyncedTrips, CREATE_TABLES};
use crate::storage::{
    Batch, ItemKey, Result, Row, RowCursor, Session, Statement, StorageError, TripPartition,
    Value,
};

/// Decoded rows buffered ahead of the consumer.
const CURSOR_BUFFER: usize = 64;

/// SQLite implementation of Session.
///
/// Batches run inside a single `BEGIN IMMEDIATE` transaction, so they are
/// all-or-nothing. Conditional writes use the affected row count as the
/// applied flag. Query results are streamed, so a reader that stops early
/// never materializes the rest of the partition.
pub struct SqliteSession {
    pool: SqlitePool,
}

fn micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

fn timestamp(row: &SqliteRow, index: usize) -> Result<Value> {
    let raw: i64 = row.try_get(index)?;
    DateTime::from_timestamp_micros(raw)
        .map(Value::Timestamp)
        .ok_or(StorageError::InvalidTimestamp(raw))
}

fn text(row: &SqliteRow, index: usize) -> Result<Value> {
    Ok(Value::Text(row.try_get(index)?))
}

fn narrow<T: TryFrom<i64>>(row: &SqliteRow, index: usize, column: &'static str) -> Result<T> {
    let raw: i64 = row.try_get(index)?;
    T::try_from(raw).map_err(|_| StorageError::OutOfRange { column, value: raw })
}

fn where_partition(query: &mut SelectStatement, partition: &TripPartition) {
    query
        .and_where(Expr::col(Operations::RouteId).eq(partition.route_id.as_str()))
        .and_where(Expr::col(Operations::Year).eq(partition.year.as_str()))
        .and_where(Expr::col(Operations::StartTime).eq(micros(partition.start_time)));
}

fn clustering_order(query: &mut SelectStatement) {
    query
        .order_by(Operations::EmployeeId, Order::Asc)
        .order_by(Operations::OperationTime, Order::Desc)
        .order_by(Operations::ProductId, Order::Asc);
}

fn item_key_conditions(key: &ItemKey) -> [sea_query::SimpleExpr; 6] {
    [
        Expr::col(Operations::RouteId).eq(key.partition.route_id.as_str()),
        Expr::col(Operations::Year).eq(key.partition.year.as_str()),
        Expr::col(Operations::StartTime).eq(micros(key.partition.start_time)),
        Expr::col(Operations::EmployeeId).eq(key.employee_id.as_str()),
        Expr::col(Operations::OperationTime).eq(micros(key.operation_time)),
        Expr::col(Operations::ProductId).eq(key.product_id),
    ]
}

impl SqliteSession {
    /// Wrap an existing pool. Call [`SqliteSession::init`] before use.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `path` and create the schema.
    ///
    /// `:memory:` opens a private in-memory database on a single connection.
    pub async fn connect(path: &str) -> Result<Self> {
        let pool = if path == ":memory:" {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect("sqlite::memory:")
                .await?
        } else {
            if let Some(parent) = std::path::Path::new(path).parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StorageError::Unavailable(e.to_string()))?;
            }
            SqlitePool::connect(&format!("sqlite:{}?mode=rwc", path)).await?
        };

        let session = Self::new(pool);
        session.init().await?;
        Ok(session)
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        for ddl in CREATE_TABLES {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn insert_sql(statement: &Statement) -> Result<String> {
        let sql = match statement {
            Statement::InsertOperation(row) => Query::insert()
                .into_table(Operations::Table)
                .columns([
                    Operations::RouteId,
                    Operations::Year,
                    Operations::StartTime,
                    Operations::EndTime,
                    Operations::CarriageId,
                    Operations::EmployeeId,
                    Operations::OperationType,
                    Operations::OperationTime,
                    Operations::ProductId,
                    Operations::Quantity,
                    Operations::Price,
                ])
                .values_panic([
                    row.key.partition.route_id.as_str().into(),
                    row.key.partition.year.as_str().into(),
                    micros(row.key.partition.start_time).into(),
                    micros(row.end_time).into(),
                    row.carriage_id.into(),
                    row.key.employee_id.as_str().into(),
                    row.operation_type.into(),
                    micros(row.key.operation_time).into(),
                    row.key.product_id.into(),
                    row.quantity.into(),
                    row.price.into(),
                ])
                .on_conflict(
                    OnConflict::columns([
                        Operations::RouteId,
                        Operations::Year,
                        Operations::StartTime,
                        Operations::EmployeeId,
                        Operations::OperationTime,
                        Operations::ProductId,
                    ])
                    .update_columns([
                        Operations::EndTime,
                        Operations::CarriageId,
                        Operations::OperationType,
                        Operations::Quantity,
                        Operations::Price,
                    ])
                    .to_owned(),
                )
                .to_string(SqliteQueryBuilder),
            Statement::InsertEmployeeTrip(row) => Query::insert()
                .into_table(EmployeeTrips::Table)
                .columns([
                    EmployeeTrips::EmployeeId,
                    EmployeeTrips::Year,
                    EmployeeTrips::RouteId,
                    EmployeeTrips::StartTime,
                    EmployeeTrips::EndTime,
                ])
                .values_panic([
                    row.employee_id.as_str().into(),
                    row.year.as_str().into(),
                    row.route_id.as_str().into(),
                    micros(row.start_time).into(),
                    micros(row.end_time).into(),
                ])
                .on_conflict(
                    OnConflict::columns([
                        EmployeeTrips::EmployeeId,
                        EmployeeTrips::Year,
                        EmployeeTrips::StartTime,
                        EmployeeTrips::RouteId,
                    ])
                    .update_column(EmployeeTrips::EndTime)
                    .to_owned(),
                )
                .to_string(SqliteQueryBuilder),
            Statement::InsertUnsyncedTrip {
                route_id,
                start_time,
            } => Query::insert()
                .into_table(UnsyncedTrips::Table)
                .columns([UnsyncedTrips::RouteId, UnsyncedTrips::StartTime])
                .values_panic([route_id.as_str().into(), micros(*start_time).into()])
                .on_conflict(
                    OnConflict::columns([UnsyncedTrips::RouteId, UnsyncedTrips::StartTime])
                        .do_nothing()
                        .to_owned(),
                )
                .to_string(SqliteQueryBuilder),
            Statement::InsertRoute { route_id } => Query::insert()
                .into_table(Routes::Table)
                .columns([Routes::RouteId])
                .values_panic([route_id.as_str().into()])
                .on_conflict(OnConflict::column(Routes::RouteId).do_nothing().to_owned())
                .to_string(SqliteQueryBuilder),
            other => {
                return Err(StorageError::UnsupportedStatement {
                    operation: "execute_batch",
                    kind: other.kind(),
                })
            }
        };
        Ok(sql)
    }

    fn select_sql(statement: &Statement) -> Result<String> {
        let mut query = Query::select();
        match statement {
            Statement::SelectTripOperations(partition) => {
                query
                    .columns([
                        Operations::CarriageId,
                        Operations::EndTime,
                        Operations::EmployeeId,
                        Operations::OperationTime,
                        Operations::OperationType,
                        Operations::ProductId,
                        Operations::Quantity,
                        Operations::Price,
                    ])
                    .from(Operations::Table);
                where_partition(&mut query, partition);
                clustering_order(&mut query);
            }
            Statement::SelectEmployeeCarts {
                partition,
                employee_id,
                before,
            } => {
                query
                    .columns([
                        Operations::OperationTime,
                        Operations::OperationType,
                        Operations::ProductId,
                        Operations::Quantity,
                        Operations::Price,
                    ])
                    .from(Operations::Table);
                where_partition(&mut query, partition);
                query.and_where(Expr::col(Operations::EmployeeId).eq(employee_id.as_str()));
                if let Some(before) = before {
                    query.and_where(Expr::col(Operations::OperationTime).lt(micros(*before)));
                }
                clustering_order(&mut query);
            }
            Statement::SelectTripEmployees(partition) => {
                query
                    .distinct()
                    .column(Operations::EmployeeId)
                    .from(Operations::Table);
                where_partition(&mut query, partition);
                query.order_by(Operations::EmployeeId, Order::Asc);
            }
            Statement::SelectEmployeeTrips { employee_id, year } => {
                query
                    .columns([
                        EmployeeTrips::RouteId,
                        EmployeeTrips::StartTime,
                        EmployeeTrips::EndTime,
                    ])
                    .from(EmployeeTrips::Table)
                    .and_where(Expr::col(EmployeeTrips::EmployeeId).eq(employee_id.as_str()))
                    .and_where(Expr::col(EmployeeTrips::Year).eq(year.as_str()))
                    .order_by(EmployeeTrips::StartTime, Order::Desc)
                    .order_by(EmployeeTrips::RouteId, Order::Asc);
            }
            Statement::SelectUnsyncedTrips => {
                query
                    .columns([UnsyncedTrips::RouteId, UnsyncedTrips::StartTime])
                    .from(UnsyncedTrips::Table)
                    .order_by(UnsyncedTrips::RouteId, Order::Asc)
                    .order_by(UnsyncedTrips::StartTime, Order::Asc);
            }
            Statement::SelectRoutes => {
                query
                    .column(Routes::RouteId)
                    .from(Routes::Table)
                    .order_by(Routes::RouteId, Order::Asc);
            }
            other => {
                return Err(StorageError::UnsupportedStatement {
                    operation: "query",
                    kind: other.kind(),
                })
            }
        }
        Ok(query.to_string(SqliteQueryBuilder))
    }

    /// Convert a result row into positional values for `statement`.
    fn decode(statement: &Statement, row: &SqliteRow) -> Result<Row> {
        let values = match statement {
            Statement::SelectTripOperations(_) => vec![
                Value::TinyInt(narrow(row, 0, "carriage_id")?),
                timestamp(row, 1)?,
                text(row, 2)?,
                timestamp(row, 3)?,
                Value::TinyInt(narrow(row, 4, "operation_type")?),
                Value::Int(narrow(row, 5, "product_id")?),
                Value::SmallInt(narrow(row, 6, "quantity")?),
                Value::BigInt(row.try_get(7)?),
            ],
            Statement::SelectEmployeeCarts { .. } => vec![
                timestamp(row, 0)?,
                Value::TinyInt(narrow(row, 1, "operation_type")?),
                Value::Int(narrow(row, 2, "product_id")?),
                Value::SmallInt(narrow(row, 3, "quantity")?),
                Value::BigInt(row.try_get(4)?),
            ],
            Statement::SelectTripEmployees(_) | Statement::SelectRoutes => vec![text(row, 0)?],
            Statement::SelectEmployeeTrips { .. } => {
                vec![text(row, 0)?, timestamp(row, 1)?, timestamp(row, 2)?]
            }
            Statement::SelectUnsyncedTrips => vec![text(row, 0)?, timestamp(row, 1)?],
            other => {
                return Err(StorageError::UnsupportedStatement {
                    operation: "query",
                    kind: other.kind(),
                })
            }
        };
        Ok(Row::new(values))
    }

    fn conditional_sql(statement: &Statement) -> Result<String> {
        let sql = match statement {
            Statement::UpdateItemQuantity { key, quantity } => {
                let mut update = Query::update();
                update
                    .table(Operations::Table)
                    .value(Operations::Quantity, *quantity);
                for condition in item_key_conditions(key) {
                    update.and_where(condition);
                }
                update.to_string(SqliteQueryBuilder)
            }
            Statement::DeleteItem(key) => {
                let mut delete = Query::delete();
                delete.from_table(Operations::Table);
                for condition in item_key_conditions(key) {
                    delete.and_where(condition);
                }
                delete.to_string(SqliteQueryBuilder)
            }
            Statement::DeleteUnsyncedTrip {
                route_id,
                start_time,
            } => Query::delete()
                .from_table(UnsyncedTrips::Table)
                .and_where(Expr::col(UnsyncedTrips::RouteId).eq(route_id.as_str()))
                .and_where(Expr::col(UnsyncedTrips::StartTime).eq(micros(*start_time)))
                .to_string(SqliteQueryBuilder),
            other => {
                return Err(StorageError::UnsupportedStatement {
                    operation: "execute_cas",
                    kind: other.kind(),
                })
            }
        };
        Ok(sql)
    }

    /// One batch transaction from BEGIN to COMMIT or ROLLBACK.
    async fn run_batch(pool: SqlitePool, sqls: Vec<String>) -> Result<()> {
        let mut conn = pool.acquire().await?;
        // BEGIN IMMEDIATE acquires the write lock upfront, preventing deadlocks
        // when concurrent DEFERRED transactions race to upgrade from shared to exclusive.
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let outcome = match Self::apply_batch(&mut conn, &sqls).await {
            Ok(()) => sqlx::query("COMMIT")
                .execute(&mut *conn)
                .await
                .map(|_| ())
                .map_err(StorageError::from),
            Err(e) => Err(e),
        };

        if outcome.is_err() {
            if let Err(rollback) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                // A connection whose transaction state is unknown never goes back to the pool
                warn!(error = %rollback, "Rollback failed, dropping connection");
                drop(conn.detach());
            }
        }
        outcome
    }

    /// Run every batch statement on an already-started transaction.
    async fn apply_batch(conn: &mut SqliteConnection, sqls: &[String]) -> Result<()> {
        for sql in sqls {
            sqlx::query(sql).execute(&mut *conn).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Session for SqliteSession {
    async fn query(&self, statement: Statement) -> Result<Box<dyn RowCursor>> {
        let sql = Self::select_sql(&statement)?;
        debug!(kind = statement.kind(), "SQLite query");
        Ok(Box::new(SqliteRowCursor::spawn(
            self.pool.clone(),
            statement,
            sql,
        )))
    }

    async fn execute_batch(&self, batch: Batch) -> Result<()> {
        // Render everything first so an unsupported statement never opens a transaction
        let sqls = batch
            .statements()
            .iter()
            .map(Self::insert_sql)
            .collect::<Result<Vec<_>>>()?;

        // The transaction runs on its own task: if the caller stops waiting,
        // it still ends in COMMIT or ROLLBACK and the connection goes back
        // to the pool clean.
        tokio::spawn(Self::run_batch(self.pool.clone(), sqls))
            .await
            .map_err(|e| StorageError::Unavailable(format!("batch task failed: {e}")))?
    }

    async fn execute_cas(&self, statement: Statement) -> Result<bool> {
        let sql = Self::conditional_sql(&statement)?;
        let result = sqlx::query(&sql).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Streaming cursor over one select.
///
/// A background task walks the sqlx row stream and hands decoded rows over a
/// bounded channel. The first failure ends the stream and is reported by
/// `close`. Closing or dropping the cursor stops the task, which releases
/// its pooled connection.
struct SqliteRowCursor {
    rows: mpsc::Receiver<Result<Row>>,
    error: Option<StorageError>,
    task: JoinHandle<()>,
}

impl SqliteRowCursor {
    fn spawn(pool: SqlitePool, statement: Statement, sql: String) -> Self {
        let (tx, rx) = mpsc::channel(CURSOR_BUFFER);
        let task = tokio::spawn(async move {
            let mut stream = sqlx::query(&sql).fetch(&pool);
            loop {
                let next = match stream.try_next().await {
                    Ok(Some(row)) => SqliteSession::decode(&statement, &row),
                    Ok(None) => break,
                    Err(e) => Err(e.into()),
                };
                let failed = next.is_err();
                if tx.send(next).await.is_err() || failed {
                    break;
                }
            }
        });
        Self {
            rows: rx,
            error: None,
            task,
        }
    }
}

#[async_trait]
impl RowCursor for SqliteRowCursor {
    async fn next_row(&mut self) -> Option<Row> {
        if self.error.is_some() {
            return None;
        }
        match self.rows.recv().await? {
            Ok(row) => Some(row),
            Err(e) => {
                self.error = Some(e);
                None
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.rows.close();
        self.task.abort();
        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for SqliteRowCursor {
    fn drop(&mut self) {
        self.task.abort();
    }
}
