use async_trait::async_trait;
use diesel::prelude::*;
use diesel::result::Error as DieselError;
use diesel_async::pooled_connection::bb8::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AnsiTransactionManager, AsyncPgConnection, RunQueryDsl, TransactionManager};
use shared::TransactionQuery;
use std::time::Duration;
use uuid::Uuid;

use super::{IdentityCheck, InventoryStore, LedgerStore, ProductStore, UnitOfWork};
use crate::error::StoreError;
use crate::models::{LedgerEntry, NewLedgerEntry, NewProduct, Product};
use crate::schema::*;

pub type DbPool = Pool<AsyncPgConnection>;

type OwnedConnection = bb8::PooledConnection<'static, AsyncDieselConnectionManager<AsyncPgConnection>>;

#[derive(Clone)]
pub struct PgInventory {
    pool: DbPool,
    lock_timeout: Duration,
}

impl PgInventory {
    pub fn new(pool: DbPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }
}

#[async_trait]
impl InventoryStore for PgInventory {
    type Work = PgWork;

    async fn begin(&self) -> Result<PgWork, StoreError> {
        let mut conn = self.pool.get_owned().await?;
        AnsiTransactionManager::begin_transaction(&mut *conn).await?;

        let mut work = PgWork {
            conn,
            lock_timeout: self.lock_timeout,
        };
        diesel::sql_query(format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        ))
        .execute(&mut *work.conn)
        .await?;

        Ok(work)
    }

    async fn find_product(&self, id: Uuid) -> Result<Option<Product>, StoreError> {
        let mut conn = self.pool.get().await?;
        let product = products::table
            .find(id)
            .first::<Product>(&mut conn)
            .await
            .optional()?;
        Ok(product)
    }

    async fn create_product(&self, product: NewProduct) -> Result<Product, StoreError> {
        let mut conn = self.pool.get().await?;
        let created = diesel::insert_into(products::table)
            .values(&product)
            .get_result::<Product>(&mut conn)
            .await?;
        Ok(created)
    }

    async fn find_entries(&self, query: &TransactionQuery) -> Result<Vec<LedgerEntry>, StoreError> {
        let mut conn = self.pool.get().await?;

        let mut select = transactions::table.into_boxed();
        if let Some(user_id) = query.user_id {
            select = select.filter(transactions::user_id.eq(user_id));
        }
        if let Some(product_id) = query.product_id {
            select = select.filter(transactions::product_id.eq(product_id));
        }
        if let Some(kind) = query.kind {
            select = select.filter(transactions::kind.eq(kind.as_str()));
        }

        let entries = select
            .order((transactions::created_at.desc(), transactions::id.desc()))
            .load::<LedgerEntry>(&mut conn)
            .await?;
        Ok(entries)
    }
}

/// A pooled connection with an open transaction.
///
/// If the value is dropped before `commit` or `rollback`, the pool sees the
/// connection still inside a transaction and discards it, which ends the
/// transaction on the server without applying it.
pub struct PgWork {
    conn: OwnedConnection,
    lock_timeout: Duration,
}

/// Maps a failed `FOR UPDATE` read to `LockTimeout` when Postgres cancelled it
/// for exceeding `lock_timeout`.
///
/// diesel reports SQLSTATE 55P03 (`lock_not_available`) only as
/// `DatabaseErrorKind::Unknown`, so the server message is matched instead.
/// This relies on `lc_messages` being English.
fn lock_error(product_id: Uuid, waited: Duration, err: DieselError) -> StoreError {
    match err {
        DieselError::DatabaseError(_, ref info) if info.message().contains("lock timeout") => {
            StoreError::LockTimeout { product_id, waited }
        }
        other => StoreError::Database(other),
    }
}

#[async_trait]
impl ProductStore for PgWork {
    async fn lock_product(&mut self, id: Uuid) -> Result<Option<Product>, StoreError> {
        let result = products::table
            .find(id)
            .for_update()
            .first::<Product>(&mut *self.conn)
            .await
            .optional();

        result.map_err(|err| lock_error(id, self.lock_timeout, err))
    }

    async fn save_product(&mut self, product: &Product) -> Result<(), StoreError> {
        let updated = diesel::update(products::table.find(product.id))
            .set((
                products::quantity.eq(product.quantity),
                products::updated_at.eq(product.updated_at),
            ))
            .execute(&mut *self.conn)
            .await?;

        if updated != 1 {
            return Err(StoreError::Corrupt(format!(
                "update of product {} touched {} rows",
                product.id, updated
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgWork {
    async fn append_entry(&mut self, entry: NewLedgerEntry) -> Result<LedgerEntry, StoreError> {
        let stored = diesel::insert_into(transactions::table)
            .values(&entry)
            .get_result::<LedgerEntry>(&mut *self.conn)
            .await?;
        Ok(stored)
    }
}

#[async_trait]
impl UnitOfWork for PgWork {
    async fn commit(mut self) -> Result<(), StoreError> {
        AnsiTransactionManager::commit_transaction(&mut *self.conn).await?;
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), StoreError> {
        AnsiTransactionManager::rollback_transaction(&mut *self.conn).await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgIdentity {
    pool: DbPool,
}

impl PgIdentity {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityCheck for PgIdentity {
    async fn exists(&self, user_id: Uuid) -> Result<bool, StoreError> {
        let mut conn = self.pool.get().await?;
        let found = diesel::select(diesel::dsl::exists(users::table.find(user_id)))
            .get_result::<bool>(&mut conn)
            .await?;
        Ok(found)
    }
}
