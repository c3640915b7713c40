//! Argument checks run before any statement is issued.

use std::collections::HashSet;

use chrono::{DateTime, Timelike, Utc};

use super::error::{RepositoryError, Result};
use crate::models::{CarriageReport, CartId, TripId};

/// Stored timestamps keep microseconds; anything finer would make two
/// distinct keys collide once written.
pub fn is_whole_micros(ts: &DateTime<Utc>) -> bool {
    ts.nanosecond() % 1_000 == 0
}

fn validate_timestamp(field: &str, ts: &DateTime<Utc>) -> Result<()> {
    if !is_whole_micros(ts) {
        return Err(RepositoryError::invalid(format!(
            "{field} has sub-microsecond precision: {ts}"
        )));
    }
    Ok(())
}

pub fn validate_trip_id(trip_id: &TripId) -> Result<()> {
    if trip_id.route_id.is_empty() {
        return Err(RepositoryError::invalid("route_id must not be empty"));
    }
    validate_timestamp("start_time", &trip_id.start_time)
}

pub fn validate_cart_id(cart_id: &CartId) -> Result<()> {
    validate_employee_id(&cart_id.employee_id)?;
    validate_timestamp("operation_time", &cart_id.operation_time)
}

pub fn validate_employee_id(employee_id: &str) -> Result<()> {
    if employee_id.is_empty() {
        return Err(RepositoryError::invalid("employee_id must not be empty"));
    }
    Ok(())
}

/// Years are partition keys and must be four ASCII digits.
pub fn validate_year(year: &str) -> Result<()> {
    if year.len() != 4 || !year.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RepositoryError::invalid(format!(
            "year must be four digits, got {year:?}"
        )));
    }
    Ok(())
}

/// A report must describe at least one cart, every cart at least one item,
/// and neither carts nor items may collide on their keys.
pub fn validate_report(report: &CarriageReport) -> Result<()> {
    validate_trip_id(&report.trip_id)?;
    validate_timestamp("end_time", &report.end_time)?;
    if report.carriage_id < 0 {
        return Err(RepositoryError::invalid(format!(
            "carriage_id must not be negative, got {}",
            report.carriage_id
        )));
    }
    if report.carts.is_empty() {
        return Err(RepositoryError::invalid("report has no carts"));
    }

    let mut cart_ids = HashSet::new();
    for cart in &report.carts {
        let id = &cart.cart_id;
        validate_cart_id(id)?;
        if cart.items.is_empty() {
            return Err(RepositoryError::invalid(format!(
                "cart {}@{} has no items",
                id.employee_id, id.operation_time
            )));
        }
        if !cart_ids.insert(id) {
            return Err(RepositoryError::invalid(format!(
                "duplicate cart {}@{}",
                id.employee_id, id.operation_time
            )));
        }

        let mut products = HashSet::new();
        for item in &cart.items {
            if !products.insert(item.product_id) {
                return Err(RepositoryError::invalid(format!(
                    "cart {}@{} lists product {} twice",
                    id.employee_id, id.operation_time, item.product_id
                )));
            }
        }
    }
    Ok(())
}
