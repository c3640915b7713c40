//! Typed statements over the logical persisted layout.
//!
//! ## operations (fact table)
//! - Partition: `(route_id, year, start_time)`
//! - Clustering: `employee_id ASC, operation_time DESC, product_id ASC`
//! - Cells: `end_time, carriage_id, operation_type, quantity, price`
//!
//! ## employee_trips
//! - Partition: `(employee_id, year)`
//! - Clustering: `start_time DESC, route_id ASC`
//! - Cells: `end_time`
//!
//! ## unsynced_trips
//! - Key: `(route_id, start_time)`
//!
//! ## routes
//! - Key: `route_id`

use chrono::{DateTime, Utc};

/// Partition key of the fact table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TripPartition {
    pub route_id: String,
    pub year: String,
    pub start_time: DateTime<Utc>,
}

/// Full primary key of one fact row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemKey {
    pub partition: TripPartition,
    pub employee_id: String,
    pub operation_time: DateTime<Utc>,
    pub product_id: i32,
}

/// One denormalized fact row: a single item of a single cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRow {
    pub key: ItemKey,
    pub end_time: DateTime<Utc>,
    pub carriage_id: i8,
    pub operation_type: i8,
    pub quantity: i16,
    pub price: i64,
}

/// One employee-trip index row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmployeeTripRow {
    pub employee_id: String,
    pub year: String,
    pub route_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Statement understood by every [`super::Session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// Upsert a fact row (last write wins on the full key).
    InsertOperation(OperationRow),
    /// Upsert an employee-trip index row.
    InsertEmployeeTrip(EmployeeTripRow),
    /// Idempotent unsynced marker insert.
    InsertUnsyncedTrip {
        route_id: String,
        start_time: DateTime<Utc>,
    },
    /// Idempotent route registry insert.
    InsertRoute { route_id: String },

    /// Every fact row of a trip. Columns: [`columns::trip`].
    SelectTripOperations(TripPartition),
    /// Fact rows of one employee in a trip, optionally restricted to
    /// `operation_time < before`. Columns: [`columns::employee_cart`].
    SelectEmployeeCarts {
        partition: TripPartition,
        employee_id: String,
        before: Option<DateTime<Utc>>,
    },
    /// Distinct employee ids of a trip, ascending. Columns: `[employee_id]`.
    SelectTripEmployees(TripPartition),
    /// Index rows of one employee partition. Columns: [`columns::employee_trip`].
    SelectEmployeeTrips { employee_id: String, year: String },
    /// Every unsynced marker. Columns: `[route_id, start_time]`.
    SelectUnsyncedTrips,
    /// Every registered route. Columns: `[route_id]`.
    SelectRoutes,

    /// `UPDATE operations SET quantity = ? WHERE <key> IF EXISTS`
    UpdateItemQuantity { key: ItemKey, quantity: i16 },
    /// `DELETE FROM operations WHERE <key> IF EXISTS`
    DeleteItem(ItemKey),
    /// `DELETE FROM unsynced_trips WHERE <key> IF EXISTS`
    DeleteUnsyncedTrip {
        route_id: String,
        start_time: DateTime<Utc>,
    },
}

impl Statement {
    /// Short name used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Statement::InsertOperation(_) => "insert_operation",
            Statement::InsertEmployeeTrip(_) => "insert_employee_trip",
            Statement::InsertUnsyncedTrip { .. } => "insert_unsynced_trip",
            Statement::InsertRoute { .. } => "insert_route",
            Statement::SelectTripOperations(_) => "select_trip_operations",
            Statement::SelectEmployeeCarts { .. } => "select_employee_carts",
            Statement::SelectTripEmployees(_) => "select_trip_employees",
            Statement::SelectEmployeeTrips { .. } => "select_employee_trips",
            Statement::SelectUnsyncedTrips => "select_unsynced_trips",
            Statement::SelectRoutes => "select_routes",
            Statement::UpdateItemQuantity { .. } => "update_item_quantity",
            Statement::DeleteItem(_) => "delete_item",
            Statement::DeleteUnsyncedTrip { .. } => "delete_unsynced_trip",
        }
    }

    pub fn is_select(&self) -> bool {
        matches!(
            self,
            Statement::SelectTripOperations(_)
                | Statement::SelectEmployeeCarts { .. }
                | Statement::SelectTripEmployees(_)
                | Statement::SelectEmployeeTrips { .. }
                | Statement::SelectUnsyncedTrips
                | Statement::SelectRoutes
        )
    }

    /// Unconditional writes, the only statements allowed in a batch.
    pub fn is_insert(&self) -> bool {
        matches!(
            self,
            Statement::InsertOperation(_)
                | Statement::InsertEmployeeTrip(_)
                | Statement::InsertUnsyncedTrip { .. }
                | Statement::InsertRoute { .. }
        )
    }

    pub fn is_conditional(&self) -> bool {
        matches!(
            self,
            Statement::UpdateItemQuantity { .. }
                | Statement::DeleteItem(_)
                | Statement::DeleteUnsyncedTrip { .. }
        )
    }
}

/// Column positions of select results.
pub mod columns {
    /// `SelectTripOperations`
    pub mod trip {
        pub const CARRIAGE_ID: usize = 0;
        pub const END_TIME: usize = 1;
        pub const EMPLOYEE_ID: usize = 2;
        pub const OPERATION_TIME: usize = 3;
        pub const OPERATION_TYPE: usize = 4;
        pub const PRODUCT_ID: usize = 5;
        pub const QUANTITY: usize = 6;
        pub const PRICE: usize = 7;
    }

    /// `SelectEmployeeCarts`
    pub mod employee_cart {
        pub const OPERATION_TIME: usize = 0;
        pub const OPERATION_TYPE: usize = 1;
        pub const PRODUCT_ID: usize = 2;
        pub const QUANTITY: usize = 3;
        pub const PRICE: usize = 4;
    }

    /// `SelectEmployeeTrips`
    pub mod employee_trip {
        pub const ROUTE_ID: usize = 0;
        pub const START_TIME: usize = 1;
        pub const END_TIME: usize = 2;
    }
}
