//! Error types for inventory adjustments.

use diesel_async::pooled_connection::PoolError;
use shared::UnknownTransactionType;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Failures raised by a storage adapter. The unit of work they occurred in
/// did not commit.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("timed out after {waited:?} waiting for lock on product {product_id}")]
    LockTimeout { product_id: Uuid, waited: Duration },

    #[error("product {0} was written without holding its row lock")]
    NotLocked(Uuid),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] bb8::RunError<PoolError>),
}

impl From<UnknownTransactionType> for StoreError {
    fn from(err: UnknownTransactionType) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

/// Outcome of a rejected request.
#[derive(Debug, Error)]
pub enum AdjustError {
    #[error("user not found: {0}")]
    UserNotFound(Uuid),

    #[error("product not found: {0}")]
    ProductNotFound(Uuid),

    #[error("insufficient quantity: current {current}, requested change {requested}")]
    InsufficientQuantity { current: i32, requested: i32 },

    #[error("quantity overflow: current {current}, requested change {requested}")]
    QuantityOverflow { current: i32, requested: i32 },

    #[error("invalid product: {0}")]
    InvalidProduct(String),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl AdjustError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AdjustError::UserNotFound(_) | AdjustError::ProductNotFound(_))
    }

    pub fn is_invalid_request(&self) -> bool {
        matches!(
            self,
            AdjustError::InsufficientQuantity { .. }
                | AdjustError::QuantityOverflow { .. }
                | AdjustError::InvalidProduct(_)
        )
    }

    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, AdjustError::Storage(StoreError::LockTimeout { .. }))
    }
}
