//! Stock Ledger API Library
//!
//! Multi-location inventory ledger: per-location stock rows, an audited delta
//! ledger, zero-row backfill, order lifecycle binding, global quantity
//! distribution and aggregate reindexing.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod openapi;
pub mod request_id;
pub mod services;

use axum::{
    extract::State,
    middleware,
    response::Json,
    routing::{delete, get, post, put},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use utoipa::{OpenApi, ToSchema};

use crate::services::{distribution::DistributionPolicy, order_sync::OrderRoutingPolicy};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    /// Built once from `config.distribution`; passed into every global update
    pub distribution_policy: Arc<DistributionPolicy>,
    pub services: handlers::AppServices,
}

impl AppState {
    /// Wires every service from configuration. Fails when the distribution
    /// section cannot be turned into a policy.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: events::EventSender,
    ) -> Result<Self, errors::ServiceError> {
        let distribution_policy = DistributionPolicy::try_from(&config.distribution)?;
        let routing = OrderRoutingPolicy::from(&config.order_sync);
        let services = handlers::AppServices::new(db.clone(), event_sender.clone(), &config, routing);

        Ok(Self {
            db,
            config,
            event_sender,
            distribution_policy: Arc::new(distribution_policy),
            services,
        })
    }

    pub fn stock_service(&self) -> Arc<services::stock::StockService> {
        self.services.stock.clone()
    }

    pub fn distribution_engine(&self) -> Arc<services::distribution::DistributionEngine> {
        self.services.distribution.clone()
    }
}

// Common response wrappers
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::request_id::current_request_id()
                .map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, total: u64, page: u64, per_page: u64) -> Self {
        let per_page = per_page.max(1);
        Self {
            items,
            total,
            page,
            per_page,
            total_pages: total.div_ceil(per_page),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    /// Work was accepted but has no result yet
    pub fn accepted(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: None,
            message: Some(message.into()),
            meta: Some(ResponseMeta::capture()),
        }
    }
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response = crate::request_id::scope_request_id(
            crate::request_id::RequestId::new("meta-123"),
            async { ApiResponse::success("ok") },
        )
        .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }

    #[test]
    fn accepted_outside_a_request_has_no_id() {
        let response = ApiResponse::<()>::accepted("queued");
        assert!(response.success);
        assert!(response.data.is_none());
        assert_eq!(response.message.as_deref(), Some("queued"));
        let meta = response.meta.expect("metadata expected");
        assert!(meta.request_id.is_none());
    }

    #[test]
    fn total_pages_rounds_up() {
        let page = PaginatedResponse::new(vec![1, 2, 3], 41, 1, 20);
        assert_eq!(page.total_pages, 3);
        let empty = PaginatedResponse::<i32>::new(vec![], 0, 1, 0);
        assert_eq!(empty.per_page, 1);
        assert_eq!(empty.total_pages, 0);
    }
}

/// Every versioned route; nested under `/api/v1` by [`build_router`].
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        // Catalog identities
        .route("/locations", get(handlers::catalog::list_locations))
        .route("/locations/:id", put(handlers::catalog::upsert_location))
        .route("/items/:id", put(handlers::catalog::upsert_item))
        // Stock
        .route("/stock/:item_id", get(handlers::stock::get_item_stock))
        .route("/stock/:item_id/delta", post(handlers::stock::apply_delta))
        .route(
            "/stock/:item_id/locations/:location_id/threshold",
            put(handlers::stock::set_threshold),
        )
        .route("/stock/:item_id/global", post(handlers::stock::global_update))
        .route("/stock/:item_id/ledger", get(handlers::stock::ledger_history))
        // Order lifecycle
        .route(
            "/orders/:order_id/fulfilled",
            post(handlers::orders::order_fulfilled),
        )
        .route(
            "/orders/:order_id/restored",
            post(handlers::orders::order_restored),
        )
        // Administration
        .route("/admin/reindex", post(handlers::admin::reindex))
        .route(
            "/admin/backfill",
            post(handlers::admin::run_backfill).get(handlers::admin::backfill_status),
        )
        .route("/admin/backfill/cancel", post(handlers::admin::cancel_backfill))
        .route(
            "/admin/locations/:id/stock",
            delete(handlers::admin::purge_location),
        )
}

/// Full application router with request ids, tracing and a request timeout.
pub fn build_router(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.request_timeout_secs.max(1));

    Router::new()
        .route("/health", get(health_check))
        .route("/api-docs/openapi.json", get(openapi_json))
        .nest("/api/v1", api_v1_routes())
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http().make_span_with(request_id::RequestSpanMaker))
        .layer(middleware::from_fn(request_id::request_id_middleware))
        .with_state(state)
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthStatus {
    pub status: String,
    pub database: String,
    pub version: String,
    pub timestamp: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service health", body = HealthStatus)
    ),
    tag = "health"
)]
pub async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<HealthStatus>> {
    let database = match db::check_connection(state.db.as_ref()).await {
        Ok(()) => "healthy",
        Err(e) => {
            tracing::warn!(error = %e, "health check: database unreachable");
            "unhealthy"
        }
    };

    Json(ApiResponse::success(HealthStatus {
        status: if database == "healthy" { "healthy" } else { "degraded" }.to_string(),
        database: database.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    }))
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(openapi::ApiDocV1::openapi())
}

pub mod prelude {
    pub use crate::config::AppConfig;
    pub use crate::db::*;
    pub use crate::errors::*;
    pub use crate::events::*;
    pub use crate::services::*;
    pub use crate::{build_router, ApiResponse, AppState};
}
