//! In-memory session for tests and local runs.
//!
//! Tables are ordered maps keyed exactly like the wide-column layout, so
//! selects come back in clustering order: employee ascending, operation
//! time descending, product ascending.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{
    Batch, ItemKey, Result, Row, RowCursor, Session, Statement, StorageError, TripPartition,
    Value, VecRowCursor,
};


type PartitionKey = (String, String, DateTime<Utc>);
/// (employee_id, operation_time DESC, product_id)
type OperationClustering = (String, Reverse<DateTime<Utc>>, i32);
/// (start_time DESC, route_id)
type EmployeeTripClustering = (Reverse<DateTime<Utc>>, String);

#[derive(Debug, Clone, Copy)]
struct OperationCells {
    end_time: DateTime<Utc>,
    carriage_id: i8,
    operation_type: i8,
    quantity: i16,
    price: i64,
}

#[derive(Default)]
struct Tables {
    operations: BTreeMap<PartitionKey, BTreeMap<OperationClustering, OperationCells>>,
    employee_trips: BTreeMap<(String, String), BTreeMap<EmployeeTripClustering, DateTime<Utc>>>,
    unsynced_trips: BTreeSet<(String, DateTime<Utc>)>,
    routes: BTreeSet<String>,
}

fn partition_key(p: &TripPartition) -> PartitionKey {
    (p.route_id.clone(), p.year.clone(), p.start_time)
}

fn clustering_key(key: &ItemKey) -> OperationClustering {
    (
        key.employee_id.clone(),
        Reverse(key.operation_time),
        key.product_id,
    )
}

impl Tables {
    fn apply_insert(&mut self, statement: Statement) {
        match statement {
            Statement::InsertOperation(row) => {
                self.operations
                    .entry(partition_key(&row.key.partition))
                    .or_default()
                    .insert(
                        clustering_key(&row.key),
                        OperationCells {
                            end_time: row.end_time,
                            carriage_id: row.carriage_id,
                            operation_type: row.operation_type,
                            quantity: row.quantity,
                            price: row.price,
                        },
                    );
            }
            Statement::InsertEmployeeTrip(row) => {
                self.employee_trips
                    .entry((row.employee_id, row.year))
                    .or_default()
                    .insert((Reverse(row.start_time), row.route_id), row.end_time);
            }
            Statement::InsertUnsyncedTrip {
                route_id,
                start_time,
            } => {
                self.unsynced_trips.insert((route_id, start_time));
            }
            Statement::InsertRoute { route_id } => {
                self.routes.insert(route_id);
            }
            _ => {}
        }
    }

    fn select(&self, statement: &Statement) -> Vec<Row> {
        match statement {
            Statement::SelectTripOperations(partition) => self
                .operations
                .get(&partition_key(partition))
                .map(|rows| {
                    rows.iter()
                        .map(|((employee, Reverse(op_time), product), cells)| {
                            Row::new(vec![
                                Value::TinyInt(cells.carriage_id),
                                Value::Timestamp(cells.end_time),
                                Value::Text(employee.clone()),
                                Value::Timestamp(*op_time),
                                Value::TinyInt(cells.operation_type),
                                Value::Int(*product),
                                Value::SmallInt(cells.quantity),
                                Value::BigInt(cells.price),
                            ])
                        })
                        .collect()
                })
                .unwrap_or_default(),
            Statement::SelectEmployeeCarts {
                partition,
                employee_id,
                before,
            } => self
                .operations
                .get(&partition_key(partition))
                .map(|rows| {
                    rows.iter()
                        .filter(|((employee, Reverse(op_time), _), _)| {
                            employee == employee_id && before.map_or(true, |b| *op_time < b)
                        })
                        .map(|((_, Reverse(op_time), product), cells)| {
                            Row::new(vec![
                                Value::Timestamp(*op_time),
                                Value::TinyInt(cells.operation_type),
                                Value::Int(*product),
                                Value::SmallInt(cells.quantity),
                                Value::BigInt(cells.price),
                            ])
                        })
                        .collect()
                })
                .unwrap_or_default(),
            Statement::SelectTripEmployees(partition) => self
                .operations
                .get(&partition_key(partition))
                .map(|rows| {
                    rows.keys()
                        .map(|(employee, _, _)| employee)
                        .collect::<BTreeSet<_>>()
                        .into_iter()
                        .map(|employee| Row::new(vec![Value::Text(employee.clone())]))
                        .collect()
                })
                .unwrap_or_default(),
            Statement::SelectEmployeeTrips { employee_id, year } => self
                .employee_trips
                .get(&(employee_id.clone(), year.clone()))
                .map(|rows| {
                    rows.iter()
                        .map(|((Reverse(start_time), route_id), end_time)| {
                            Row::new(vec![
                                Value::Text(route_id.clone()),
                                Value::Timestamp(*start_time),
                                Value::Timestamp(*end_time),
                            ])
                        })
                        .collect()
                })
                .unwrap_or_default(),
            Statement::SelectUnsyncedTrips => self
                .unsynced_trips
                .iter()
                .map(|(route_id, start_time)| {
                    Row::new(vec![
                        Value::Text(route_id.clone()),
                        Value::Timestamp(*start_time),
                    ])
                })
                .collect(),
            Statement::SelectRoutes => self
                .routes
                .iter()
                .map(|route_id| Row::new(vec![Value::Text(route_id.clone())]))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn apply_conditional(&mut self, statement: Statement) -> bool {
        match statement {
            Statement::UpdateItemQuantity { key, quantity } => self
                .operations
                .get_mut(&partition_key(&key.partition))
                .and_then(|rows| rows.get_mut(&clustering_key(&key)))
                .map(|cells| cells.quantity = quantity)
                .is_some(),
            Statement::DeleteItem(key) => {
                let pk = partition_key(&key.partition);
                let Some(rows) = self.operations.get_mut(&pk) else {
                    return false;
                };
                let removed = rows.remove(&clustering_key(&key)).is_some();
                if rows.is_empty() {
                    self.operations.remove(&pk);
                }
                removed
            }
            Statement::DeleteUnsyncedTrip {
                route_id,
                start_time,
            } => self.unsynced_trips.remove(&(route_id, start_time)),
            _ => false,
        }
    }
}

/// Mock session that stores rows in memory.
#[derive(Default)]
pub struct MockSession {
    tables: RwLock<Tables>,
    fail_on_query: RwLock<bool>,
    fail_on_close: RwLock<bool>,
    fail_on_batch: RwLock<bool>,
    fail_on_cas: RwLock<bool>,
    attempted_batches: RwLock<Vec<Batch>>,
    queries_issued: AtomicUsize,
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_query(&self, fail: bool) {
        *self.fail_on_query.write().await = fail;
    }

    /// Cursors still yield their rows but report an error on close.
    pub async fn set_fail_on_close(&self, fail: bool) {
        *self.fail_on_close.write().await = fail;
    }

    pub async fn set_fail_on_batch(&self, fail: bool) {
        *self.fail_on_batch.write().await = fail;
    }

    pub async fn set_fail_on_cas(&self, fail: bool) {
        *self.fail_on_cas.write().await = fail;
    }

    /// Every batch handed to `execute_batch`, including failed ones.
    pub async fn attempted_batches(&self) -> Vec<Batch> {
        self.attempted_batches.read().await.clone()
    }

    /// Number of `query` calls received.
    pub fn query_count(&self) -> usize {
        self.queries_issued.load(Ordering::SeqCst)
    }

    pub async fn operation_count(&self) -> usize {
        self.tables
            .read()
            .await
            .operations
            .values()
            .map(|rows| rows.len())
            .sum()
    }

    pub async fn employee_trip_count(&self) -> usize {
        self.tables
            .read()
            .await
            .employee_trips
            .values()
            .map(|rows| rows.len())
            .sum()
    }

    pub async fn unsynced_trip_count(&self) -> usize {
        self.tables.read().await.unsynced_trips.len()
    }

    pub async fn route_count(&self) -> usize {
        self.tables.read().await.routes.len()
    }
}

#[async_trait]
impl Session for MockSession {
    async fn query(&self, statement: Statement) -> Result<Box<dyn RowCursor>> {
        self.queries_issued.fetch_add(1, Ordering::SeqCst);
        if !statement.is_select() {
            return Err(StorageError::UnsupportedStatement {
                operation: "query",
                kind: statement.kind(),
            });
        }
        if *self.fail_on_query.read().await {
            return Err(StorageError::Unavailable("injected query failure".to_string()));
        }

        let rows = self.tables.read().await.select(&statement);
        let cursor = VecRowCursor::new(rows);
        if *self.fail_on_close.read().await {
            return Ok(Box::new(cursor.with_close_error(StorageError::Unavailable(
                "injected close failure".to_string(),
            ))));
        }
        Ok(Box::new(cursor))
    }

    async fn execute_batch(&self, batch: Batch) -> Result<()> {
        self.attempted_batches.write().await.push(batch.clone());

        if let Some(bad) = batch.statements().iter().find(|s| !s.is_insert()) {
            return Err(StorageError::UnsupportedStatement {
                operation: "execute_batch",
                kind: bad.kind(),
            });
        }
        if *self.fail_on_batch.read().await {
            return Err(StorageError::Unavailable("injected batch failure".to_string()));
        }

        let mut tables = self.tables.write().await;
        for statement in batch.into_statements() {
            tables.apply_insert(statement);
        }
        Ok(())
    }

    async fn execute_cas(&self, statement: Statement) -> Result<bool> {
        if !statement.is_conditional() {
            return Err(StorageError::UnsupportedStatement {
                operation: "execute_cas",
                kind: statement.kind(),
            });
        }
        if *self.fail_on_cas.read().await {
            return Err(StorageError::Unavailable("injected cas failure".to_string()));
        }
        Ok(self.tables.write().await.apply_conditional(statement))
    }
}
