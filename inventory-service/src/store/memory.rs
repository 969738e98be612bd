//! In-process inventory store.
//!
//! Committed rows live behind a single `RwLock`. Row locks are emulated with
//! one `tokio::sync::Mutex` per product, held by the owning [`MemoryWork`]
//! until it commits, rolls back or is dropped.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use shared::TransactionQuery;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};
use uuid::Uuid;

use super::{IdentityCheck, InventoryStore, LedgerStore, ProductStore, UnitOfWork};
use crate::error::StoreError;
use crate::models::{LedgerEntry, NewLedgerEntry, NewProduct, NewUser, Product};

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Tables {
    products: HashMap<Uuid, Product>,
    users: HashMap<Uuid, String>,
    ledger: Vec<LedgerEntry>,
}

struct Shared {
    tables: RwLock<Tables>,
    row_locks: Mutex<HashMap<Uuid, Arc<RowLock<()>>>>,
    lock_timeout: Duration,
}

#[derive(Clone)]
pub struct MemoryInventory {
    shared: Arc<Shared>,
}

impl MemoryInventory {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(Tables::default()),
                row_locks: Mutex::new(HashMap::new()),
                lock_timeout,
            }),
        }
    }

    pub fn insert_user(&self, user: NewUser) -> Uuid {
        let id = user.id;
        self.shared.tables.write().users.insert(id, user.username);
        id
    }

    pub fn insert_product(&self, product: NewProduct) -> Product {
        let now = Utc::now();
        let product = Product {
            id: product.id,
            name: product.name,
            price: product.price,
            quantity: product.quantity,
            description: product.description,
            created_at: now,
            updated_at: now,
        };
        self.shared
            .tables
            .write()
            .products
            .insert(product.id, product.clone());
        product
    }

    pub fn product(&self, id: Uuid) -> Option<Product> {
        self.shared.tables.read().products.get(&id).cloned()
    }

    /// Committed ledger entries for a product, in commit order.
    pub fn ledger_for(&self, product_id: Uuid) -> Vec<LedgerEntry> {
        self.shared
            .tables
            .read()
            .ledger
            .iter()
            .filter(|entry| entry.product_id == product_id)
            .cloned()
            .collect()
    }

    fn row_lock(&self, id: Uuid) -> Arc<RowLock<()>> {
        self.shared
            .row_locks
            .lock()
            .entry(id)
            .or_insert_with(|| Arc::new(RowLock::new(())))
            .clone()
    }
}

impl Default for MemoryInventory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InventoryStore for MemoryInventory {
    type Work = MemoryWork;

    async fn begin(&self) -> Result<MemoryWork, StoreError> {
        Ok(MemoryWork {
            store: self.clone(),
            guards: HashMap::new(),
            products: HashMap::new(),
            entries: Vec::new(),
        })
    }

    async fn find_product(&self, id: Uuid) -> Result<Option<Product>, StoreError> {
        Ok(self.product(id))
    }

    async fn create_product(&self, product: NewProduct) -> Result<Product, StoreError> {
        Ok(self.insert_product(product))
    }

    async fn find_entries(&self, query: &TransactionQuery) -> Result<Vec<LedgerEntry>, StoreError> {
        let kind = query.kind.map(|kind| kind.as_str());
        let tables = self.shared.tables.read();
        let entries = tables
            .ledger
            .iter()
            .rev()
            .filter(|entry| query.user_id.map_or(true, |id| entry.user_id == id))
            .filter(|entry| query.product_id.map_or(true, |id| entry.product_id == id))
            .filter(|entry| kind.map_or(true, |kind| entry.kind == kind))
            .cloned()
            .collect();
        Ok(entries)
    }
}

#[async_trait]
impl IdentityCheck for MemoryInventory {
    async fn exists(&self, user_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.shared.tables.read().users.contains_key(&user_id))
    }
}

/// Unit of work over a [`MemoryInventory`]. Writes are staged locally and
/// published on commit; dropping the value discards them and releases every
/// row lock it holds.
pub struct MemoryWork {
    store: MemoryInventory,
    guards: HashMap<Uuid, OwnedMutexGuard<()>>,
    products: HashMap<Uuid, Product>,
    entries: Vec<LedgerEntry>,
}

impl MemoryWork {
    pub fn holds_lock(&self, id: Uuid) -> bool {
        self.guards.contains_key(&id)
    }
}

#[async_trait]
impl ProductStore for MemoryWork {
    async fn lock_product(&mut self, id: Uuid) -> Result<Option<Product>, StoreError> {
        if !self.guards.contains_key(&id) {
            let known = self.store.shared.tables.read().products.contains_key(&id);
            if !known {
                return Ok(None);
            }

            let waited = self.store.shared.lock_timeout;
            let guard = tokio::time::timeout(waited, self.store.row_lock(id).lock_owned())
                .await
                .map_err(|_| StoreError::LockTimeout { product_id: id, waited })?;
            self.guards.insert(id, guard);
        }

        if let Some(staged) = self.products.get(&id) {
            return Ok(Some(staged.clone()));
        }
        Ok(self.store.product(id))
    }

    async fn save_product(&mut self, product: &Product) -> Result<(), StoreError> {
        if !self.holds_lock(product.id) {
            return Err(StoreError::NotLocked(product.id));
        }
        self.products.insert(product.id, product.clone());
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryWork {
    async fn append_entry(&mut self, entry: NewLedgerEntry) -> Result<LedgerEntry, StoreError> {
        let entry = LedgerEntry {
            id: entry.id,
            kind: entry.kind,
            quantity_change: entry.quantity_change,
            amount: entry.amount,
            reason: entry.reason,
            user_id: entry.user_id,
            product_id: entry.product_id,
            created_at: Utc::now(),
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }
}

#[async_trait]
impl UnitOfWork for MemoryWork {
    async fn commit(mut self) -> Result<(), StoreError> {
        {
            let mut tables = self.store.shared.tables.write();
            for (id, product) in self.products.drain() {
                tables.products.insert(id, product);
            }
            tables.ledger.append(&mut self.entries);
        }
        // Row locks are released only after the rows are published.
        drop(self);
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}
