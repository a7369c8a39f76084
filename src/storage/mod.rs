// ============================================================================
// Storage - durable persistence of the Order aggregate
// ============================================================================

mod postgres;

pub use postgres::PgStorage;

use async_trait::async_trait;
use std::time::Duration;

use crate::lifecycle::Backend;
use crate::models::Order;
use crate::utils::IsTransient;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A uniqueness constraint rejected the insert: the order is already stored
    #[error("order already exists")]
    AlreadyExists,

    #[error("order not found")]
    NotFound,

    #[error("storage request timed out after {0:?}")]
    Timeout(Duration),

    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),

    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: Box<StorageError>,
    },

    #[error("storage is shutting down")]
    Cancelled,
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                tracing::debug!(
                    constraint = db_err.constraint().unwrap_or("unknown"),
                    "Insert violates unique constraint"
                );
                return StorageError::AlreadyExists;
            }
        }

        match err {
            sqlx::Error::RowNotFound => StorageError::NotFound,
            other => StorageError::Database(other),
        }
    }
}

impl IsTransient for StorageError {
    fn is_transient(&self) -> bool {
        matches!(self, StorageError::Timeout(_) | StorageError::Database(_))
    }
}

/// Capability set of an order store.
#[async_trait]
pub trait Storage: Backend {
    /// Persist the order and all of its sub-entities atomically.
    ///
    /// Returns [`StorageError::AlreadyExists`] without retrying when the
    /// order was stored before.
    async fn save_order(&self, order: &Order) -> Result<(), StorageError>;

    /// Load a stored order. Absence is [`StorageError::NotFound`], never a
    /// retry exhaustion.
    async fn get_order(&self, order_uid: &str) -> Result<Order, StorageError>;
}
