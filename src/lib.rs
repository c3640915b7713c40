//! Chaika - carriage sales reports
//!
//! Stores per-employee sales operations of train carriages in a wide-column
//! layout and reads them back as trips, carts and paged cart listings.

pub mod config;
pub mod models;
pub mod repository;
pub mod storage;
pub mod utils;

pub use models::{
    Cart, CartId, CarriageReport, EmployeeTrip, Item, OperationType, Trip, TripId, UnsyncedTrip,
};
pub use repository::{RepositoryError, SalesRepository};
