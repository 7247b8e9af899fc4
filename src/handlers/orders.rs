use super::common::{ok, validate_input};
use crate::{
    errors::ServiceError,
    services::order_sync::{Fulfillment, Order, OrderLine, OrderSyncOutcome},
    AppState,
};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

/// Order lifecycle callback raised by the host order system
#[derive(Debug, Deserialize, Serialize, ToSchema, Validate)]
pub struct OrderEventRequest {
    #[validate]
    pub lines: Vec<OrderLine>,
    pub fulfillment: Fulfillment,
}

impl OrderEventRequest {
    fn into_order(self, order_id: String) -> Result<Order, ServiceError> {
        if order_id.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "order id must not be empty".to_string(),
            ));
        }
        Ok(Order {
            id: order_id,
            lines: self.lines,
            fulfillment: self.fulfillment,
        })
    }
}

/// Order reached a fulfilled state; reduce stock once
#[utoipa::path(
    post,
    path = "/api/v1/orders/{order_id}/fulfilled",
    params(("order_id" = String, Path, description = "Order ID")),
    request_body = OrderEventRequest,
    responses(
        (status = 200, description = "Applied, already processed, or unresolved with a warning", body = OrderSyncOutcome),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse)
    ),
    tag = "orders"
)]
pub async fn order_fulfilled(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    Json(payload): Json<OrderEventRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let order = payload.into_order(order_id)?;

    let outcome = state.services.order_sync.on_order_fulfilled(&order).await?;
    Ok(ok(outcome))
}

/// Order was cancelled or refunded; restore stock once
#[utoipa::path(
    post,
    path = "/api/v1/orders/{order_id}/restored",
    params(("order_id" = String, Path, description = "Order ID")),
    request_body = OrderEventRequest,
    responses(
        (status = 200, description = "Applied, already processed, or never reduced", body = OrderSyncOutcome),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse)
    ),
    tag = "orders"
)]
pub async fn order_restored(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    Json(payload): Json<OrderEventRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let order = payload.into_order(order_id)?;

    let outcome = state
        .services
        .order_sync
        .on_order_cancelled_or_refunded(&order)
        .await?;
    Ok(ok(outcome))
}
