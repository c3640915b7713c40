//! Sales repository.
//!
//! Writes carriage reports into every denormalized view in one atomic batch
//! and reads them back as carts, trips and index entries.

use std::collections::HashSet;
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::aggregate::{drain, CartAggregator, CartRow, TripAggregator, TripRow};
use super::cursor::{decode_cursor, CartPager};
use super::error::{RepositoryError, Result};
use super::validation::{
    validate_cart_id, validate_employee_id, validate_report, validate_trip_id, validate_year,
};
use crate::models::{Cart, CartId, CarriageReport, EmployeeTrip, Trip, TripId, UnsyncedTrip};
use crate::storage::statement::columns;
use crate::storage::{
    self, Batch, EmployeeTripRow, ItemKey, OperationRow, RowCursor, Session, Statement,
    TripPartition,
};

fn partition(trip_id: &TripId) -> TripPartition {
    TripPartition {
        route_id: trip_id.route_id.clone(),
        year: trip_id.year(),
        start_time: trip_id.start_time,
    }
}

fn item_key(trip_id: &TripId, cart_id: &CartId, product_id: i32) -> ItemKey {
    ItemKey {
        partition: partition(trip_id),
        employee_id: cart_id.employee_id.clone(),
        operation_time: cart_id.operation_time,
        product_id,
    }
}

/// Race a storage call against cancellation.
async fn cancellable<T, F>(
    cancel: &CancellationToken,
    operation: &'static str,
    call: F,
) -> Result<T>
where
    F: Future<Output = storage::Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RepositoryError::Cancelled),
        result = call => result.map_err(|e| RepositoryError::storage(operation, e)),
    }
}

/// Repository for carriage sales.
pub struct SalesRepository {
    session: Arc<dyn Session>,
}

impl SalesRepository {
    pub fn new(session: Arc<dyn Session>) -> Self {
        Self { session }
    }

    async fn open(
        &self,
        statement: Statement,
        operation: &'static str,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn RowCursor>> {
        cancellable(cancel, operation, self.session.query(statement)).await
    }

    /// Persist one carriage report.
    ///
    /// Every item becomes a fact row; each distinct employee gets an
    /// employee-trip index row; the trip is marked unsynced and its route
    /// registered. All of it goes out as one batch, so either every view is
    /// updated or none is. Re-inserting the same report overwrites the same
    /// keys. If cancellation interrupts the batch its outcome is unknown and
    /// retrying is safe.
    #[tracing::instrument(
        name = "sales.insert_data",
        skip_all,
        fields(route_id = %report.trip_id.route_id, carriage_id = report.carriage_id)
    )]
    pub async fn insert_data(
        &self,
        report: &CarriageReport,
        cancel: &CancellationToken,
    ) -> Result<()> {
        validate_report(report)?;

        let trip_id = &report.trip_id;
        let year = trip_id.year();
        let mut batch = Batch::new();
        let mut employees = Vec::new();

        for cart in &report.carts {
            let cart_id = &cart.cart_id;
            if !employees.contains(&cart_id.employee_id) {
                employees.push(cart_id.employee_id.clone());
            }
            for item in &cart.items {
                batch.add(Statement::InsertOperation(OperationRow {
                    key: item_key(trip_id, cart_id, item.product_id),
                    end_time: report.end_time,
                    carriage_id: report.carriage_id,
                    operation_type: cart.operation_type.0,
                    quantity: item.quantity,
                    price: item.price,
                }));
            }
        }

        for employee_id in employees {
            batch.add(Statement::InsertEmployeeTrip(EmployeeTripRow {
                employee_id,
                year: year.clone(),
                route_id: trip_id.route_id.clone(),
                start_time: trip_id.start_time,
                end_time: report.end_time,
            }));
        }
        batch.add(Statement::InsertUnsyncedTrip {
            route_id: trip_id.route_id.clone(),
            start_time: trip_id.start_time,
        });
        batch.add(Statement::InsertRoute {
            route_id: trip_id.route_id.clone(),
        });

        let statements = batch.len();
        debug!(statements, "Executing report batch");
        cancellable(
            cancel,
            "failed to execute batch",
            self.session.execute_batch(batch),
        )
        .await
        .inspect_err(|e| warn!(error = %e, "Report batch not applied"))?;

        info!(statements, carts = report.carts.len(), "Stored carriage report");
        Ok(())
    }

    /// Every carriage of a trip with its carts.
    #[tracing::instrument(name = "sales.get_trip", skip_all, fields(route_id = %trip_id.route_id))]
    pub async fn get_trip(&self, trip_id: &TripId, cancel: &CancellationToken) -> Result<Trip> {
        validate_trip_id(trip_id)?;

        let mut cursor = self
            .open(
                Statement::SelectTripOperations(partition(trip_id)),
                "failed to query trip",
                cancel,
            )
            .await?;

        let mut trip = TripAggregator::new(trip_id.clone());
        let mut rows = 0usize;
        drain(cursor.as_mut(), cancel, |row| {
            trip.push(TripRow::decode(row)?);
            rows += 1;
            Ok(ControlFlow::Continue(()))
        })
        .await?;

        let trip = trip.into_trip();
        debug!(rows, carriages = trip.carriages.len(), "Loaded trip");
        Ok(trip)
    }

    /// Every cart one employee rang up during a trip, in no particular order.
    #[tracing::instrument(
        name = "sales.get_employee_carts_in_trip",
        skip_all,
        fields(route_id = %trip_id.route_id, employee_id = %employee_id)
    )]
    pub async fn get_employee_carts_in_trip(
        &self,
        trip_id: &TripId,
        employee_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Cart>> {
        validate_trip_id(trip_id)?;
        validate_employee_id(employee_id)?;

        let mut cursor = self
            .open(
                Statement::SelectEmployeeCarts {
                    partition: partition(trip_id),
                    employee_id: employee_id.to_string(),
                    before: None,
                },
                "failed to query carts",
                cancel,
            )
            .await?;

        let mut carts = CartAggregator::new();
        drain(cursor.as_mut(), cancel, |row| {
            carts.push(employee_id, CartRow::decode(row)?);
            Ok(ControlFlow::Continue(()))
        })
        .await?;

        debug!(carts = carts.len(), "Loaded employee carts");
        Ok(carts.into_carts())
    }

    /// One page of an employee's carts, newest first.
    ///
    /// Pass an empty `cursor` for the first page and the returned cursor for
    /// each following page; an empty returned cursor means there are no
    /// more. A `cart_limit` of zero or less returns everything at once.
    #[tracing::instrument(
        name = "sales.get_employee_carts_paged",
        skip_all,
        fields(route_id = %trip_id.route_id, employee_id = %employee_id, cart_limit = cart_limit)
    )]
    pub async fn get_employee_carts_paged(
        &self,
        trip_id: &TripId,
        employee_id: &str,
        cart_limit: i64,
        cursor: &str,
        cancel: &CancellationToken,
    ) -> Result<(Vec<Cart>, String)> {
        validate_trip_id(trip_id)?;
        validate_employee_id(employee_id)?;
        let before = if cursor.is_empty() {
            None
        } else {
            Some(decode_cursor(cursor)?)
        };

        let mut rows = self
            .open(
                Statement::SelectEmployeeCarts {
                    partition: partition(trip_id),
                    employee_id: employee_id.to_string(),
                    before,
                },
                "failed to query carts",
                cancel,
            )
            .await?;

        let mut pager = CartPager::new(employee_id, cart_limit);
        let mut full = false;
        drain(rows.as_mut(), cancel, |row| {
            if pager.push(CartRow::decode(row)?) {
                full = true;
                return Ok(ControlFlow::Break(()));
            }
            Ok(ControlFlow::Continue(()))
        })
        .await?;

        let (carts, next) = if full {
            pager.into_page()
        } else {
            pager.into_last_page()
        };
        debug!(carts = carts.len(), more = !next.is_empty(), "Loaded cart page");
        Ok((carts, next))
    }

    /// Distinct employees with activity in a trip.
    #[tracing::instrument(
        name = "sales.get_employee_ids_by_trip",
        skip_all,
        fields(route_id = %trip_id.route_id)
    )]
    pub async fn get_employee_ids_by_trip(
        &self,
        trip_id: &TripId,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        validate_trip_id(trip_id)?;

        let mut cursor = self
            .open(
                Statement::SelectTripEmployees(partition(trip_id)),
                "failed to query trip employees",
                cancel,
            )
            .await?;

        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        drain(cursor.as_mut(), cancel, |row| {
            let id: String = row.get(0)?;
            if seen.insert(id.clone()) {
                ids.push(id);
            }
            Ok(ControlFlow::Continue(()))
        })
        .await?;
        Ok(ids)
    }

    /// Trips an employee worked in the given year, most recent first.
    #[tracing::instrument(
        name = "sales.get_employee_trips",
        skip_all,
        fields(employee_id = %employee_id, year = %year)
    )]
    pub async fn get_employee_trips(
        &self,
        employee_id: &str,
        year: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<EmployeeTrip>> {
        validate_employee_id(employee_id)?;
        validate_year(year)?;

        let mut cursor = self
            .open(
                Statement::SelectEmployeeTrips {
                    employee_id: employee_id.to_string(),
                    year: year.to_string(),
                },
                "failed to query employee trips",
                cancel,
            )
            .await?;

        let mut trips = Vec::new();
        drain(cursor.as_mut(), cancel, |row| {
            use columns::employee_trip::*;
            trips.push(EmployeeTrip {
                employee_id: employee_id.to_string(),
                trip_id: TripId::new(row.get::<String>(ROUTE_ID)?, row.get(START_TIME)?),
                end_time: row.get(END_TIME)?,
            });
            Ok(ControlFlow::Continue(()))
        })
        .await?;
        Ok(trips)
    }

    /// Set the quantity of an existing item.
    ///
    /// Fails with [`RepositoryError::ItemNotFound`] when the item is absent;
    /// nothing is created in that case.
    #[tracing::instrument(
        name = "sales.update_item_quantity",
        skip_all,
        fields(route_id = %trip_id.route_id, employee_id = %cart_id.employee_id, product_id = product_id)
    )]
    pub async fn update_item_quantity(
        &self,
        trip_id: &TripId,
        cart_id: &CartId,
        product_id: i32,
        new_quantity: i16,
        cancel: &CancellationToken,
    ) -> Result<()> {
        validate_trip_id(trip_id)?;
        validate_cart_id(cart_id)?;

        let statement = Statement::UpdateItemQuantity {
            key: item_key(trip_id, cart_id, product_id),
            quantity: new_quantity,
        };
        let applied = cancellable(
            cancel,
            "failed to update item quantity",
            self.session.execute_cas(statement),
        )
        .await?;
        if !applied {
            return Err(RepositoryError::ItemNotFound);
        }
        info!(new_quantity, "Updated item quantity");
        Ok(())
    }

    /// Remove one item from a cart.
    #[tracing::instrument(
        name = "sales.delete_item_from_cart",
        skip_all,
        fields(route_id = %trip_id.route_id, employee_id = %cart_id.employee_id, product_id = product_id)
    )]
    pub async fn delete_item_from_cart(
        &self,
        trip_id: &TripId,
        cart_id: &CartId,
        product_id: i32,
        cancel: &CancellationToken,
    ) -> Result<()> {
        validate_trip_id(trip_id)?;
        validate_cart_id(cart_id)?;

        let applied = cancellable(
            cancel,
            "failed to delete item",
            self.session
                .execute_cas(Statement::DeleteItem(item_key(trip_id, cart_id, product_id))),
        )
        .await?;
        if !applied {
            return Err(RepositoryError::ItemNotFound);
        }
        info!("Deleted item");
        Ok(())
    }

    /// Acknowledge a trip as synced downstream by removing its marker.
    #[tracing::instrument(
        name = "sales.delete_synced_trip",
        skip_all,
        fields(route_id = %trip_id.route_id)
    )]
    pub async fn delete_synced_trip(
        &self,
        trip_id: &TripId,
        cancel: &CancellationToken,
    ) -> Result<()> {
        validate_trip_id(trip_id)?;

        let statement = Statement::DeleteUnsyncedTrip {
            route_id: trip_id.route_id.clone(),
            start_time: trip_id.start_time,
        };
        let applied = cancellable(
            cancel,
            "failed to delete unsynced trip",
            self.session.execute_cas(statement),
        )
        .await?;
        if !applied {
            return Err(RepositoryError::TripNotFound);
        }
        info!("Trip marked as synced");
        Ok(())
    }

    /// Trips still waiting for downstream acknowledgment.
    #[tracing::instrument(name = "sales.get_unsynced_trips", skip_all)]
    pub async fn get_unsynced_trips(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<UnsyncedTrip>> {
        let mut cursor = self
            .open(
                Statement::SelectUnsyncedTrips,
                "failed to query unsynced trips",
                cancel,
            )
            .await?;

        let mut trips = Vec::new();
        drain(cursor.as_mut(), cancel, |row| {
            trips.push(UnsyncedTrip {
                trip_id: TripId::new(row.get::<String>(0)?, row.get(1)?),
            });
            Ok(ControlFlow::Continue(()))
        })
        .await?;
        debug!(trips = trips.len(), "Loaded unsynced trips");
        Ok(trips)
    }

    /// Every route that has received at least one report.
    #[tracing::instrument(name = "sales.get_route_ids", skip_all)]
    pub async fn get_route_ids(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        let mut cursor = self
            .open(Statement::SelectRoutes, "failed to query routes", cancel)
            .await?;

        let mut routes = Vec::new();
        drain(cursor.as_mut(), cancel, |row| {
            routes.push(row.get(0)?);
            Ok(ControlFlow::Continue(()))
        })
        .await?;
        Ok(routes)
    }
}
