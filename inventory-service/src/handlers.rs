use bigdecimal::BigDecimal;
use chrono::Utc;
use shared::{
    CreateProductRequest, ProductSnapshot, TransactionQuery, TransactionRecord,
    DEFAULT_ADJUSTMENT_REASON,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{AdjustError, StoreError};
use crate::models::{NewLedgerEntry, NewProduct};
use crate::store::{IdentityCheck, InventoryStore, LedgerStore, ProductStore, UnitOfWork};

#[derive(Debug, Clone)]
pub struct Adjustment {
    pub product_id: Uuid,
    pub quantity_change: i32,
    pub reason: Option<String>,
    pub user_id: Uuid,
}

/// Applies stock adjustments. Each call locks the product row, writes the new
/// quantity and appends one ledger entry in a single unit of work.
pub struct AdjustmentHandler<S, I> {
    store: S,
    identity: I,
}

impl<S, I> AdjustmentHandler<S, I>
where
    S: InventoryStore,
    I: IdentityCheck,
{
    pub fn new(store: S, identity: I) -> Self {
        Self { store, identity }
    }

    pub async fn adjust(&self, adjustment: Adjustment) -> Result<ProductSnapshot, AdjustError> {
        let result = self.run(&adjustment).await;

        match &result {
            Ok(snapshot) => info!(
                "Adjusted product {} by {} to {}",
                adjustment.product_id, adjustment.quantity_change, snapshot.quantity
            ),
            Err(e) if e.is_invalid_request() || e.is_not_found() => {
                warn!("Adjustment of product {} rejected: {}", adjustment.product_id, e)
            }
            Err(e) => error!("Adjustment of product {} failed: {}", adjustment.product_id, e),
        }
        result
    }

    pub async fn create_product(&self, request: CreateProductRequest) -> Result<ProductSnapshot, AdjustError> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(AdjustError::InvalidProduct("name must not be empty".to_string()));
        }
        if request.price < BigDecimal::from(0) {
            return Err(AdjustError::InvalidProduct("price must not be negative".to_string()));
        }
        if request.price.normalized().as_bigint_and_exponent().1 > 2 {
            return Err(AdjustError::InvalidProduct(
                "price must have at most two decimal places".to_string(),
            ));
        }
        if request.quantity < 0 {
            return Err(AdjustError::InvalidProduct("quantity must not be negative".to_string()));
        }

        let product = self
            .store
            .create_product(NewProduct {
                id: Uuid::new_v4(),
                name: name.to_string(),
                price: request.price.with_scale(2),
                quantity: request.quantity,
                description: request.description,
            })
            .await?;
        info!("Created product {} with quantity {}", product.id, product.quantity);

        Ok(product.into())
    }

    /// Ledger history matching `query`, newest first.
    pub async fn transactions(&self, query: &TransactionQuery) -> Result<Vec<TransactionRecord>, AdjustError> {
        let entries = self.store.find_entries(query).await?;
        let records = entries
            .into_iter()
            .map(TransactionRecord::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::from)?;
        Ok(records)
    }

    /// Committed state of a product, read without taking its lock.
    pub async fn product(&self, product_id: Uuid) -> Result<ProductSnapshot, AdjustError> {
        let product = self
            .store
            .find_product(product_id)
            .await?
            .ok_or(AdjustError::ProductNotFound(product_id))?;
        Ok(product.into())
    }

    async fn run(&self, adjustment: &Adjustment) -> Result<ProductSnapshot, AdjustError> {
        // The lookup may need a connection of its own, so it must not run
        // while the unit of work holds one.
        if !self.identity.exists(adjustment.user_id).await? {
            return Err(AdjustError::UserNotFound(adjustment.user_id));
        }

        let mut work = self.store.begin().await?;
        match self.apply(&mut work, adjustment).await {
            Ok(snapshot) => {
                work.commit().await?;
                Ok(snapshot)
            }
            Err(e) => {
                if let Err(rollback) = work.rollback().await {
                    error!("Rollback failed for product {}: {}", adjustment.product_id, rollback);
                }
                Err(e)
            }
        }
    }

    async fn apply(&self, work: &mut S::Work, adjustment: &Adjustment) -> Result<ProductSnapshot, AdjustError> {
        let mut product = work
            .lock_product(adjustment.product_id)
            .await?
            .ok_or(AdjustError::ProductNotFound(adjustment.product_id))?;
        debug!("Locked product {} at quantity {}", product.id, product.quantity);

        let current = product.quantity;
        let requested = adjustment.quantity_change;
        let new_quantity = current
            .checked_add(requested)
            .ok_or(AdjustError::QuantityOverflow { current, requested })?;
        if new_quantity < 0 {
            return Err(AdjustError::InsufficientQuantity { current, requested });
        }

        if requested != 0 {
            product.quantity = new_quantity;
            product.updated_at = Utc::now();
            work.save_product(&product).await?;
        }

        let reason = adjustment
            .reason
            .clone()
            .filter(|reason| !reason.is_empty())
            .unwrap_or_else(|| DEFAULT_ADJUSTMENT_REASON.to_string());
        let entry = NewLedgerEntry::adjustment(&product, requested, reason, adjustment.user_id);
        work.append_entry(entry).await?;

        Ok(product.into())
    }
}
