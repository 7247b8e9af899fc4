use super::common::{ok, validate_input};
use crate::{
    errors::ServiceError,
    services::{
        backfill::{BackfillOutcome, BackfillStatus},
        reindex::ReindexReport,
        stock::PurgeReport,
    },
    ApiResponse, AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

#[derive(Debug, Default, Deserialize, Serialize, ToSchema, Validate)]
pub struct ReindexRequest {
    /// Items to rebuild; empty rebuilds every known item
    #[serde(default)]
    #[validate(length(max = 10000))]
    pub item_ids: Vec<i64>,
}

#[derive(Debug, Deserialize, IntoParams, Validate)]
pub struct BackfillParams {
    /// Rows per batch; defaults to the configured size
    #[validate(range(min = 1, max = 10000))]
    pub batch_size: Option<u64>,
    /// Return immediately and scan in the background
    #[serde(default)]
    pub background: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CancelResponse {
    /// A running scan was asked to stop after its current batch
    pub signalled: bool,
}

/// Rebuild aggregates and snapshots for a batch of items
#[utoipa::path(
    post,
    path = "/api/v1/admin/reindex",
    request_body = ReindexRequest,
    responses(
        (status = 200, description = "Reindex report; failed items are listed", body = ReindexReport)
    ),
    tag = "admin"
)]
pub async fn reindex(
    State(state): State<AppState>,
    Json(payload): Json<ReindexRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let reindexer = state.services.reindexer.clone();
    let item_ids = if payload.item_ids.is_empty() {
        reindexer.all_item_ids().await?
    } else {
        payload.item_ids
    };

    let report = reindexer.reindex_many(&item_ids).await;
    info!(
        reindexed = report.reindexed,
        failed = report.failed.len(),
        "admin reindex finished"
    );
    Ok(ok(report))
}

/// Create missing zero rows for every active item at every published location
#[utoipa::path(
    post,
    path = "/api/v1/admin/backfill",
    params(BackfillParams),
    responses(
        (status = 200, description = "Scan finished, was cancelled, or another scan is running", body = BackfillOutcome),
        (status = 202, description = "Scan started in the background")
    ),
    tag = "admin"
)]
pub async fn run_backfill(
    State(state): State<AppState>,
    Query(params): Query<BackfillParams>,
) -> Result<Response, ServiceError> {
    validate_input(&params)?;
    let batch_size = params
        .batch_size
        .unwrap_or(state.config.backfill.batch_size);
    let scanner = state.services.backfill.clone();

    if params.background {
        tokio::spawn(async move {
            match scanner.run(batch_size).await {
                Ok(outcome) => info!(?outcome, "background backfill finished"),
                Err(e) => error!(error = %e, "background backfill failed"),
            }
        });
        return Ok((
            StatusCode::ACCEPTED,
            Json(ApiResponse::<()>::accepted("backfill started")),
        )
            .into_response());
    }

    let outcome = scanner.run(batch_size).await?;
    Ok(ok(outcome).into_response())
}

/// Current state of the single-flight backfill lock
#[utoipa::path(
    get,
    path = "/api/v1/admin/backfill",
    responses(
        (status = 200, description = "Backfill status", body = BackfillStatus)
    ),
    tag = "admin"
)]
pub async fn backfill_status(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ServiceError> {
    let status = state.services.backfill.status().await?;
    Ok(ok(status))
}

/// Ask a running backfill to stop between batches
#[utoipa::path(
    post,
    path = "/api/v1/admin/backfill/cancel",
    responses(
        (status = 200, description = "Whether a running scan was signalled", body = CancelResponse)
    ),
    tag = "admin"
)]
pub async fn cancel_backfill(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ServiceError> {
    let signalled = state.services.backfill.cancel().await?;
    Ok(ok(CancelResponse { signalled }))
}

/// Remove every stock row of a location and rebuild the affected items
#[utoipa::path(
    delete,
    path = "/api/v1/admin/locations/{id}/stock",
    params(("id" = i64, Path, description = "Location ID")),
    responses(
        (status = 200, description = "Rows removed; ledger history is kept", body = PurgeReport)
    ),
    tag = "admin"
)]
pub async fn purge_location(
    State(state): State<AppState>,
    Path(location_id): Path<i64>,
) -> Result<impl IntoResponse, ServiceError> {
    let report = state.stock_service().purge_location(location_id).await?;
    Ok(ok(report))
}
