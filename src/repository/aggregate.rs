//! Row aggregation: flat item rows back into carts, carriages and trips.
//!
//! Every row is one item. Rows sharing `(employee_id, operation_time)` form a
//! cart; the operation type of a cart is taken from the first row seen for
//! it. For whole-trip reads rows are additionally grouped by carriage, whose
//! end time is likewise taken from its first row. Later disagreeing values
//! are ignored.

use std::collections::{BTreeMap, HashMap};
use std::ops::ControlFlow;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use super::error::{RepositoryError, Result};
use crate::models::{Cart, CartId, CarriageReport, Item, OperationType, Trip, TripId};
use crate::storage::statement::columns;
use crate::storage::{self, Row, RowCursor};

/// One decoded `SelectEmployeeCarts` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartRow {
    pub operation_time: DateTime<Utc>,
    pub operation_type: OperationType,
    pub item: Item,
}

impl CartRow {
    pub fn decode(row: &Row) -> storage::Result<Self> {
        use columns::employee_cart::*;
        Ok(Self {
            operation_time: row.get(OPERATION_TIME)?,
            operation_type: OperationType(row.get(OPERATION_TYPE)?),
            item: Item {
                product_id: row.get(PRODUCT_ID)?,
                quantity: row.get(QUANTITY)?,
                price: row.get(PRICE)?,
            },
        })
    }
}

/// One decoded `SelectTripOperations` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripRow {
    pub carriage_id: i8,
    pub end_time: DateTime<Utc>,
    pub employee_id: String,
    pub cart: CartRow,
}

impl TripRow {
    pub fn decode(row: &Row) -> storage::Result<Self> {
        use columns::trip::*;
        Ok(Self {
            carriage_id: row.get(CARRIAGE_ID)?,
            end_time: row.get(END_TIME)?,
            employee_id: row.get(EMPLOYEE_ID)?,
            cart: CartRow {
                operation_time: row.get(OPERATION_TIME)?,
                operation_type: OperationType(row.get(OPERATION_TYPE)?),
                item: Item {
                    product_id: row.get(PRODUCT_ID)?,
                    quantity: row.get(QUANTITY)?,
                    price: row.get(PRICE)?,
                },
            },
        })
    }
}

/// Groups item rows into carts keyed by `(employee_id, operation_time)`.
///
/// Carts come out in first-seen order and items in arrival order; callers
/// must not rely on cart order.
#[derive(Debug, Default)]
pub struct CartAggregator {
    index: HashMap<(String, DateTime<Utc>), usize>,
    carts: Vec<Cart>,
}

impl CartAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, employee_id: &str, row: CartRow) {
        let key = (employee_id.to_string(), row.operation_time);
        match self.index.get(&key) {
            Some(&pos) => self.carts[pos].items.push(row.item),
            None => {
                self.index.insert(key, self.carts.len());
                self.carts.push(Cart {
                    cart_id: CartId::new(employee_id, row.operation_time),
                    operation_type: row.operation_type,
                    items: vec![row.item],
                });
            }
        }
    }

    pub fn len(&self) -> usize {
        self.carts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.carts.is_empty()
    }

    pub fn into_carts(self) -> Vec<Cart> {
        self.carts
    }
}

/// Groups trip rows into carriages, then carts within each carriage.
#[derive(Debug)]
pub struct TripAggregator {
    trip_id: TripId,
    carriages: BTreeMap<i8, (CarriageReport, CartAggregator)>,
}

impl TripAggregator {
    pub fn new(trip_id: TripId) -> Self {
        Self {
            trip_id,
            carriages: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, row: TripRow) {
        let (_, carts) = self.carriages.entry(row.carriage_id).or_insert_with(|| {
            (
                CarriageReport {
                    trip_id: self.trip_id.clone(),
                    end_time: row.end_time,
                    carriage_id: row.carriage_id,
                    carts: Vec::new(),
                },
                CartAggregator::new(),
            )
        });
        carts.push(&row.employee_id, row.cart);
    }

    pub fn into_trip(self) -> Trip {
        Trip {
            carriages: self
                .carriages
                .into_values()
                .map(|(mut report, carts)| {
                    report.carts = carts.into_carts();
                    report
                })
                .collect(),
        }
    }
}

/// Feed every row of `cursor` to `visit` until it breaks or rows run out,
/// then close the cursor.
///
/// Cancellation is checked before each row. Any failure (cancellation, a
/// row that does not decode, or an error reported by `close`) is returned
/// on its own so callers never hand out partially built results.
pub(crate) async fn drain<F>(
    cursor: &mut dyn RowCursor,
    cancel: &CancellationToken,
    mut visit: F,
) -> Result<()>
where
    F: FnMut(&Row) -> storage::Result<ControlFlow<()>>,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            row = cursor.next_row() => Some(row),
        };
        let Some(next) = next else {
            let _ = cursor.close().await;
            return Err(RepositoryError::Cancelled);
        };
        let Some(row) = next else {
            break;
        };
        match visit(&row) {
            Ok(ControlFlow::Continue(())) => {}
            Ok(ControlFlow::Break(())) => break,
            Err(e) => {
                let _ = cursor.close().await;
                return Err(RepositoryError::storage("failed to decode row", e));
            }
        }
    }

    cursor
        .close()
        .await
        .map_err(|e| RepositoryError::storage("failed to close iterator", e))
}
