//! SQLite implementation of the storage session.

mod session;

pub use session::SqliteSession;
