//! Domain model for carriage sales reports.
//!
//! A trip is one run of a route. Each carriage in the trip reports the carts
//! its employees rang up; a cart is one checkout at one instant and holds
//! line items. The store keeps these flattened into one row per item, the
//! repository rebuilds this tree on read.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

/// Classification of a cart (sale, refund, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationType(pub i8);

impl OperationType {
    pub const SALE: OperationType = OperationType(1);
    pub const REFUND: OperationType = OperationType(2);
}

/// Identifies one trip instance.
///
/// The partition year is always derived from `start_time`, so it cannot
/// drift from the timestamp it is meant to bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TripId {
    pub route_id: String,
    pub start_time: DateTime<Utc>,
}

impl TripId {
    pub fn new(route_id: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            route_id: route_id.into(),
            start_time,
        }
    }

    /// Partition year of this trip.
    pub fn year(&self) -> String {
        self.start_time.year().to_string()
    }
}

/// A cart is unique per (employee, instant) within a carriage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CartId {
    pub employee_id: String,
    pub operation_time: DateTime<Utc>,
}

impl CartId {
    pub fn new(employee_id: impl Into<String>, operation_time: DateTime<Utc>) -> Self {
        Self {
            employee_id: employee_id.into(),
            operation_time,
        }
    }
}

/// One line of a cart. Price is in minor currency units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub product_id: i32,
    pub quantity: i16,
    pub price: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub cart_id: CartId,
    pub operation_type: OperationType,
    pub items: Vec<Item>,
}

/// One carriage's activity during a trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarriageReport {
    pub trip_id: TripId,
    pub end_time: DateTime<Utc>,
    pub carriage_id: i8,
    pub carts: Vec<Cart>,
}

/// Every carriage report recorded for a trip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trip {
    pub carriages: Vec<CarriageReport>,
}

/// Index entry: an employee worked this trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeTrip {
    pub employee_id: String,
    pub trip_id: TripId,
    pub end_time: DateTime<Utc>,
}

/// Marker for a trip not yet acknowledged by the downstream system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsyncedTrip {
    pub trip_id: TripId,
}
