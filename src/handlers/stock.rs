use super::common::{ok, validate_input, PaginationParams};
use crate::{
    entities::{location_stock, stock_ledger_entry},
    errors::ServiceError,
    services::{
        distribution::GlobalUpdateOutcome,
        stock::{DeltaResponse, ItemStockView, ManualDelta},
        stock_ledger::MAX_DELTA,
    },
    AppState, PaginatedResponse,
};
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use validator::{Validate, ValidationError};

#[derive(Debug, Deserialize, Serialize, ToSchema, Validate)]
#[validate(schema(function = "validate_delta_bounds"))]
pub struct ApplyDeltaRequest {
    pub location_id: i64,
    /// Signed change; zero is accepted and only reports current quantities
    pub delta: i64,
    /// Audit label; defaults to `manual_api`
    #[validate(length(min = 1, max = 64))]
    pub source: Option<String>,
    #[validate(length(max = 255))]
    pub who: Option<String>,
}

fn validate_delta_bounds(request: &ApplyDeltaRequest) -> Result<(), ValidationError> {
    if request.delta.unsigned_abs() > MAX_DELTA.unsigned_abs() {
        let mut err = ValidationError::new("delta_range");
        err.message = Some(format!("delta must be between -{0} and {0}", MAX_DELTA).into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Deserialize, Serialize, ToSchema, Validate)]
pub struct GlobalUpdateRequest {
    #[validate(range(min = 0, max = 1_000_000_000_000))]
    pub requested_total_quantity: i64,
    #[validate(length(max = 255))]
    pub who: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, ToSchema, Validate)]
pub struct SetThresholdRequest {
    /// `null` falls back to the item threshold, then the service default
    #[validate(range(min = 0))]
    pub low_stock_threshold: Option<i64>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct LedgerQuery {
    pub location_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StockRowResponse {
    pub item_id: i64,
    pub location_id: i64,
    pub quantity: i64,
    pub low_stock_threshold: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

impl From<location_stock::Model> for StockRowResponse {
    fn from(model: location_stock::Model) -> Self {
        Self {
            item_id: model.item_id,
            location_id: model.location_id,
            quantity: model.quantity,
            low_stock_threshold: model.low_stock_threshold,
            updated_at: model.updated_at,
        }
    }
}

/// Per-location quantities and aggregate for an item
#[utoipa::path(
    get,
    path = "/api/v1/stock/{item_id}",
    params(("item_id" = i64, Path, description = "Item ID")),
    responses(
        (status = 200, description = "Current stock", body = ItemStockView),
        (status = 404, description = "Unknown item", body = crate::errors::ErrorResponse)
    ),
    tag = "stock"
)]
pub async fn get_item_stock(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
) -> Result<impl IntoResponse, ServiceError> {
    let view = state.stock_service().item_stock(item_id).await?;
    Ok(ok(view))
}

/// Apply a signed delta to one location of an item
#[utoipa::path(
    post,
    path = "/api/v1/stock/{item_id}/delta",
    params(("item_id" = i64, Path, description = "Item ID")),
    request_body = ApplyDeltaRequest,
    responses(
        (status = 200, description = "Delta applied", body = DeltaResponse),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown item or location", body = crate::errors::ErrorResponse),
        (status = 409, description = "Item not initialized", body = crate::errors::ErrorResponse)
    ),
    tag = "stock"
)]
pub async fn apply_delta(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
    Json(payload): Json<ApplyDeltaRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let response = state
        .stock_service()
        .apply_manual_delta(ManualDelta {
            item_id,
            location_id: payload.location_id,
            delta: payload.delta,
            source: payload.source,
            who: payload.who,
        })
        .await?;

    Ok(ok(response))
}

/// Set or clear the low-stock threshold of one stock row
#[utoipa::path(
    put,
    path = "/api/v1/stock/{item_id}/locations/{location_id}/threshold",
    params(
        ("item_id" = i64, Path, description = "Item ID"),
        ("location_id" = i64, Path, description = "Location ID")
    ),
    request_body = SetThresholdRequest,
    responses(
        (status = 200, description = "Threshold stored", body = StockRowResponse),
        (status = 400, description = "Invalid threshold", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown item or location", body = crate::errors::ErrorResponse)
    ),
    tag = "stock"
)]
pub async fn set_threshold(
    State(state): State<AppState>,
    Path((item_id, location_id)): Path<(i64, i64)>,
    Json(payload): Json<SetThresholdRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let row = state
        .stock_service()
        .set_low_stock_threshold(item_id, location_id, payload.low_stock_threshold)
        .await?;

    Ok(ok(StockRowResponse::from(row)))
}

/// Set an item's total quantity; the active distribution policy decides
/// which locations absorb the change
#[utoipa::path(
    post,
    path = "/api/v1/stock/{item_id}/global",
    params(("item_id" = i64, Path, description = "Item ID")),
    request_body = GlobalUpdateRequest,
    responses(
        (status = 200, description = "Applied, ignored or skipped", body = GlobalUpdateOutcome),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 422, description = "Global updates are rejected by policy", body = crate::errors::ErrorResponse),
        (status = 504, description = "Partially applied before the timeout", body = crate::errors::ErrorResponse)
    ),
    tag = "stock"
)]
pub async fn global_update(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
    Json(payload): Json<GlobalUpdateRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    state.services.catalog.get_item(item_id).await?;

    let outcome = state
        .distribution_engine()
        .apply_global_update(
            &state.distribution_policy,
            item_id,
            payload.requested_total_quantity,
            payload.who,
        )
        .await?;

    if let GlobalUpdateOutcome::Skipped { reason, .. } = &outcome {
        info!(item_id, reason = %reason, "global update skipped");
    }
    Ok(ok(outcome))
}

/// Ledger entries for an item, newest first
#[utoipa::path(
    get,
    path = "/api/v1/stock/{item_id}/ledger",
    params(
        ("item_id" = i64, Path, description = "Item ID"),
        LedgerQuery,
        PaginationParams
    ),
    responses(
        (status = 200, description = "Ledger page", body = PaginatedResponse<stock_ledger_entry::Model>)
    ),
    tag = "stock"
)]
pub async fn ledger_history(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
    Query(filter): Query<LedgerQuery>,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&pagination)?;

    let (entries, total) = state
        .stock_service()
        .ledger_history(item_id, filter.location_id, pagination.page, pagination.per_page)
        .await?;

    Ok(ok(PaginatedResponse::new(
        entries,
        total,
        pagination.page,
        pagination.per_page,
    )))
}
