use super::common::{ok, validate_input};
use crate::{
    entities::{
        catalog_item::{self, ItemKind, StockStatus},
        stock_location::{self, LocationKind},
    },
    errors::ServiceError,
    services::catalog::{ItemUpsert, LocationUpsert},
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

#[derive(Debug, Deserialize, Serialize, ToSchema, Validate)]
pub struct UpsertLocationRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub kind: LocationKind,
    #[serde(default = "default_true")]
    pub published: bool,
}

#[derive(Debug, Deserialize, Serialize, ToSchema, Validate)]
pub struct UpsertItemRequest {
    #[validate(range(min = 1))]
    pub parent_id: Option<i64>,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub allow_backorders: bool,
    #[validate(range(min = 0))]
    pub low_stock_threshold: Option<i64>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListLocationsQuery {
    /// Only locations items are expected to be stocked at
    #[serde(default)]
    pub published_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LocationResponse {
    pub id: i64,
    pub name: String,
    pub kind: LocationKind,
    pub published: bool,
    pub created_at: DateTime<Utc>,
}

impl From<stock_location::Model> for LocationResponse {
    fn from(model: stock_location::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            kind: model.kind,
            published: model.published,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ItemResponse {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub kind: ItemKind,
    pub name: String,
    pub active: bool,
    pub allow_backorders: bool,
    pub low_stock_threshold: Option<i64>,
    pub stock_status: StockStatus,
    pub updated_at: DateTime<Utc>,
}

impl From<catalog_item::Model> for ItemResponse {
    fn from(model: catalog_item::Model) -> Self {
        Self {
            id: model.id,
            parent_id: model.parent_id,
            kind: model.kind,
            name: model.name,
            active: model.active,
            allow_backorders: model.allow_backorders,
            low_stock_threshold: model.low_stock_threshold,
            stock_status: model.stock_status,
            updated_at: model.updated_at,
        }
    }
}

/// Create or update a stock location
#[utoipa::path(
    put,
    path = "/api/v1/locations/{id}",
    params(("id" = i64, Path, description = "Location ID")),
    request_body = UpsertLocationRequest,
    responses(
        (status = 200, description = "Location stored", body = LocationResponse),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse)
    ),
    tag = "catalog"
)]
pub async fn upsert_location(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<UpsertLocationRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let location = state
        .services
        .catalog
        .upsert_location(LocationUpsert {
            id,
            name: payload.name,
            kind: payload.kind,
            published: payload.published,
        })
        .await?;

    Ok(ok(LocationResponse::from(location)))
}

/// List stock locations
#[utoipa::path(
    get,
    path = "/api/v1/locations",
    params(ListLocationsQuery),
    responses(
        (status = 200, description = "Locations ordered by id", body = [LocationResponse])
    ),
    tag = "catalog"
)]
pub async fn list_locations(
    State(state): State<AppState>,
    Query(query): Query<ListLocationsQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let locations: Vec<LocationResponse> = state
        .services
        .catalog
        .list_locations(query.published_only)
        .await?
        .into_iter()
        .map(LocationResponse::from)
        .collect();

    Ok(ok(locations))
}

/// Create or update a catalog item; a parent makes it a variant
#[utoipa::path(
    put,
    path = "/api/v1/items/{id}",
    params(("id" = i64, Path, description = "Item ID")),
    request_body = UpsertItemRequest,
    responses(
        (status = 200, description = "Item stored", body = ItemResponse),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse)
    ),
    tag = "catalog"
)]
pub async fn upsert_item(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<UpsertItemRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let item = state
        .services
        .catalog
        .upsert_item(ItemUpsert {
            id,
            parent_id: payload.parent_id,
            name: payload.name,
            active: payload.active,
            allow_backorders: payload.allow_backorders,
            low_stock_threshold: payload.low_stock_threshold,
        })
        .await?;

    Ok(ok(ItemResponse::from(item)))
}
