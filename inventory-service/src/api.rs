use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use shared::*;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AdjustError;
use crate::handlers::{Adjustment, AdjustmentHandler};
use crate::store::{IdentityCheck, InventoryStore};

type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn create_router<S, I>(handler: Arc<AdjustmentHandler<S, I>>) -> Router
where
    S: InventoryStore + 'static,
    I: IdentityCheck + 'static,
{
    Router::new()
        .route("/products", post(create_product::<S, I>))
        .route("/products/:id", get(get_product::<S, I>))
        .route("/products/:id/adjustments", post(adjust_product::<S, I>))
        .route("/transactions", get(list_transactions::<S, I>))
        .route("/health", get(health_check))
        .with_state(handler)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn adjust_product<S, I>(
    State(handler): State<Arc<AdjustmentHandler<S, I>>>,
    Path(product_id): Path<Uuid>,
    Json(request): Json<AdjustInventoryRequest>,
) -> Result<Json<ProductSnapshot>, ApiError>
where
    S: InventoryStore,
    I: IdentityCheck,
{
    let adjustment = Adjustment {
        product_id,
        quantity_change: request.quantity_change,
        reason: request.reason,
        user_id: request.user_id,
    };

    handler.adjust(adjustment).await.map(Json).map_err(into_response)
}

pub async fn get_product<S, I>(
    State(handler): State<Arc<AdjustmentHandler<S, I>>>,
    Path(product_id): Path<Uuid>,
) -> Result<Json<ProductSnapshot>, ApiError>
where
    S: InventoryStore,
    I: IdentityCheck,
{
    handler.product(product_id).await.map(Json).map_err(into_response)
}

pub async fn create_product<S, I>(
    State(handler): State<Arc<AdjustmentHandler<S, I>>>,
    Json(request): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<ProductSnapshot>), ApiError>
where
    S: InventoryStore,
    I: IdentityCheck,
{
    let snapshot = handler.create_product(request).await.map_err(into_response)?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

pub async fn list_transactions<S, I>(
    State(handler): State<Arc<AdjustmentHandler<S, I>>>,
    Query(query): Query<TransactionQuery>,
) -> Result<Json<Vec<TransactionRecord>>, ApiError>
where
    S: InventoryStore,
    I: IdentityCheck,
{
    handler.transactions(&query).await.map(Json).map_err(into_response)
}

pub async fn health_check() -> &'static str {
    "OK"
}

fn into_response(e: AdjustError) -> ApiError {
    let status = if e.is_not_found() {
        StatusCode::NOT_FOUND
    } else if e.is_invalid_request() {
        StatusCode::BAD_REQUEST
    } else if e.is_lock_timeout() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };

    (status, Json(ErrorResponse { error: e.to_string() }))
}
