pub mod api;
pub mod error;
pub mod handlers;
pub mod models;
pub mod schema;
pub mod store;

pub use error::{AdjustError, StoreError};
pub use handlers::{Adjustment, AdjustmentHandler};
