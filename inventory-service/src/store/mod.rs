//! Storage seams consumed by the adjustment handler.
//!
//! An [`InventoryStore`] hands out units of work. Everything written through a
//! [`UnitOfWork`] becomes visible together on [`UnitOfWork::commit`], or not at
//! all. Dropping a unit of work without committing it rolls it back.

use async_trait::async_trait;
use shared::TransactionQuery;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{LedgerEntry, NewLedgerEntry, NewProduct, Product};

pub mod memory;
pub mod postgres;

pub use memory::{MemoryInventory, MemoryWork};
pub use postgres::{PgIdentity, PgInventory, PgWork};

/// Product rows as seen from inside a unit of work.
#[async_trait]
pub trait ProductStore: Send {
    /// Reads the product and holds an exclusive lock on its row until the
    /// unit of work ends. Blocks while another unit of work holds the lock.
    async fn lock_product(&mut self, id: Uuid) -> Result<Option<Product>, StoreError>;

    async fn save_product(&mut self, product: &Product) -> Result<(), StoreError>;
}

#[async_trait]
pub trait LedgerStore: Send {
    async fn append_entry(&mut self, entry: NewLedgerEntry) -> Result<LedgerEntry, StoreError>;
}

#[async_trait]
pub trait UnitOfWork: ProductStore + LedgerStore {
    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait InventoryStore: Send + Sync {
    type Work: UnitOfWork;

    async fn begin(&self) -> Result<Self::Work, StoreError>;

    /// Non-locking read of committed state.
    async fn find_product(&self, id: Uuid) -> Result<Option<Product>, StoreError>;

    async fn create_product(&self, product: NewProduct) -> Result<Product, StoreError>;

    /// Committed ledger entries matching `query`, newest first.
    async fn find_entries(&self, query: &TransactionQuery) -> Result<Vec<LedgerEntry>, StoreError>;
}

/// Resolves whether an acting user exists.
#[async_trait]
pub trait IdentityCheck: Send + Sync {
    async fn exists(&self, user_id: Uuid) -> Result<bool, StoreError>;
}
