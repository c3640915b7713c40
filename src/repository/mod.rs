//! Domain repositories.

pub mod aggregate;
pub mod cursor;
mod error;
mod sales;
mod validation;

pub use error::{RepositoryError, Result};
pub use sales::SalesRepository;
