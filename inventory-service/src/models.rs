use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use shared::{ProductSnapshot, TransactionRecord, TransactionType, UnknownTransactionType};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::products)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub price: BigDecimal,
    pub quantity: i32,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::products)]
pub struct NewProduct {
    pub id: Uuid,
    pub name: String,
    pub price: BigDecimal,
    pub quantity: i32,
    pub description: Option<String>,
}

/// Persisted ledger row. `kind` holds the upper-case [`TransactionType`] name.
#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::transactions)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub kind: String,
    pub quantity_change: i32,
    pub amount: BigDecimal,
    pub reason: String,
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::transactions)]
pub struct NewLedgerEntry {
    pub id: Uuid,
    pub kind: String,
    pub quantity_change: i32,
    pub amount: BigDecimal,
    pub reason: String,
    pub user_id: Uuid,
    pub product_id: Uuid,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::users)]
pub struct NewUser {
    pub id: Uuid,
    pub username: String,
}

impl LedgerEntry {
    pub fn transaction_type(&self) -> Result<TransactionType, UnknownTransactionType> {
        self.kind.parse()
    }
}

impl NewLedgerEntry {
    /// Builds an `ADJUSTMENT` row valued at `abs(quantity_change) * price`.
    pub fn adjustment(product: &Product, quantity_change: i32, reason: String, user_id: Uuid) -> Self {
        let amount = (BigDecimal::from(quantity_change.unsigned_abs()) * &product.price).with_scale(2);

        Self {
            id: Uuid::new_v4(),
            kind: TransactionType::Adjustment.as_str().to_string(),
            quantity_change,
            amount,
            reason,
            user_id,
            product_id: product.id,
        }
    }
}

impl From<Product> for ProductSnapshot {
    fn from(product: Product) -> Self {
        Self {
            id: product.id,
            name: product.name,
            price: product.price,
            quantity: product.quantity,
            description: product.description,
            created_at: product.created_at,
            updated_at: product.updated_at,
        }
    }
}

impl TryFrom<LedgerEntry> for TransactionRecord {
    type Error = UnknownTransactionType;

    fn try_from(entry: LedgerEntry) -> Result<Self, Self::Error> {
        Ok(Self {
            kind: entry.transaction_type()?,
            id: entry.id,
            quantity_change: entry.quantity_change,
            amount: entry.amount,
            reason: entry.reason,
            user_id: entry.user_id,
            product_id: entry.product_id,
            created_at: entry.created_at,
        })
    }
}
