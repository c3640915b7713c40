//! Storage capability and its implementations.

use std::sync::Arc;

use backon::Retryable;
use tracing::{error, info, warn};

use crate::config::{StorageConfig, StorageType};
use crate::utils::retry::connection_backoff;

pub mod mock;
pub mod row;
pub mod session;
pub mod statement;

#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use mock::MockSession;
pub use row::{FromValue, Row, Value};
pub use session::{Batch, Result, RowCursor, Session, StorageError, VecRowCursor};
pub use statement::{EmployeeTripRow, ItemKey, OperationRow, Statement, TripPartition};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteSession;

/// Initialize storage based on configuration.
///
/// Connecting is retried with exponential backoff per `storage.connect`.
pub async fn init_storage(config: &StorageConfig) -> Result<Arc<dyn Session>> {
    info!(storage_type = ?config.storage_type, "Initializing storage");

    match config.storage_type {
        StorageType::Memory => Ok(Arc::new(MockSession::new())),
        #[cfg(feature = "sqlite")]
        StorageType::Sqlite => {
            let path = config.sqlite.path.as_str();
            let connect = || async move { SqliteSession::connect(path).await };
            let session = connect
                .retry(connection_backoff(&config.connect))
                .notify(|e: &StorageError, delay| {
                    warn!(error = %e, ?delay, "Failed to open SQLite storage, retrying");
                })
                .await
                .inspect_err(|e| error!(error = %e, "Giving up on SQLite storage"))?;
            Ok(Arc::new(session))
        }
        #[cfg(not(feature = "sqlite"))]
        StorageType::Sqlite => {
            error!("SQLite storage requested but 'sqlite' feature is not enabled");
            Err(StorageError::Config("sqlite feature not enabled".to_string()))
        }
    }
}
