//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.
//! Timestamps are stored as microseconds since the Unix epoch so that integer
//! ordering matches time ordering.

use sea_query::Iden;

/// Fact table: one row per cart item.
#[derive(Iden, Clone, Copy)]
pub enum Operations {
    Table,
    #[iden = "route_id"]
    RouteId,
    #[iden = "year"]
    Year,
    #[iden = "start_time"]
    StartTime,
    #[iden = "end_time"]
    EndTime,
    #[iden = "carriage_id"]
    CarriageId,
    #[iden = "employee_id"]
    EmployeeId,
    #[iden = "operation_type"]
    OperationType,
    #[iden = "operation_time"]
    OperationTime,
    #[iden = "product_id"]
    ProductId,
    #[iden = "quantity"]
    Quantity,
    #[iden = "price"]
    Price,
}

/// Employee-trip index table.
#[derive(Iden, Clone, Copy)]
pub enum EmployeeTrips {
    Table,
    #[iden = "employee_id"]
    EmployeeId,
    #[iden = "year"]
    Year,
    #[iden = "route_id"]
    RouteId,
    #[iden = "start_time"]
    StartTime,
    #[iden = "end_time"]
    EndTime,
}

/// Trips awaiting downstream acknowledgment.
#[derive(Iden, Clone, Copy)]
pub enum UnsyncedTrips {
    Table,
    #[iden = "route_id"]
    RouteId,
    #[iden = "start_time"]
    StartTime,
}

/// Route registry.
#[derive(Iden, Clone, Copy)]
pub enum Routes {
    Table,
    #[iden = "route_id"]
    RouteId,
}

/// SQL for creating the operations table.
pub const CREATE_OPERATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS operations (
    route_id TEXT NOT NULL,
    year TEXT NOT NULL,
    start_time INTEGER NOT NULL,
    end_time INTEGER NOT NULL,
    carriage_id INTEGER NOT NULL,
    employee_id TEXT NOT NULL,
    operation_type INTEGER NOT NULL,
    operation_time INTEGER NOT NULL,
    product_id INTEGER NOT NULL,
    quantity INTEGER NOT NULL,
    price INTEGER NOT NULL,
    PRIMARY KEY (route_id, year, start_time, employee_id, operation_time, product_id)
)
"#;

/// SQL for creating the employee_trips table.
pub const CREATE_EMPLOYEE_TRIPS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS employee_trips (
    employee_id TEXT NOT NULL,
    year TEXT NOT NULL,
    route_id TEXT NOT NULL,
    start_time INTEGER NOT NULL,
    end_time INTEGER NOT NULL,
    PRIMARY KEY (employee_id, year, start_time, route_id)
)
"#;

/// SQL for creating the unsynced_trips table.
pub const CREATE_UNSYNCED_TRIPS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS unsynced_trips (
    route_id TEXT NOT NULL,
    start_time INTEGER NOT NULL,
    PRIMARY KEY (route_id, start_time)
)
"#;

/// SQL for creating the routes table.
pub const CREATE_ROUTES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS routes (
    route_id TEXT NOT NULL PRIMARY KEY
)
"#;

/// Every table, in creation order.
pub const CREATE_TABLES: [&str; 4] = [
    CREATE_OPERATIONS_TABLE,
    CREATE_EMPLOYEE_TRIPS_TABLE,
    CREATE_UNSYNCED_TRIPS_TABLE,
    CREATE_ROUTES_TABLE,
];
