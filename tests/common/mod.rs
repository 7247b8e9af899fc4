#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::Value;
use stockledger_api::{
    config::AppConfig,
    db,
    entities::stock_location::LocationKind,
    events::{self, EventSender},
    services::{
        catalog::{ItemUpsert, LocationUpsert},
        location_stock::LocationStockStore,
    },
    AppState,
};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;

/// Application state and router backed by a fresh, migrated SQLite file.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _db_dir: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Builds the app after letting the caller adjust the configuration.
    pub async fn with_config(customize: impl FnOnce(&mut AppConfig)) -> Self {
        let db_dir = tempfile::tempdir().expect("create temp dir for sqlite");
        let db_path = db_dir.path().join("stockledger.db");
        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "127.0.0.1".to_string(),
            18080,
            "test".to_string(),
        );
        // A single connection keeps SQLite writers serialized.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.log_level = "warn".to_string();
        customize(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("connect test database");
        db::run_migrations(&pool).await.expect("run migrations");

        let (tx, rx) = mpsc::channel(cfg.event_channel_capacity);
        let event_task = tokio::spawn(events::process_events(rx));
        let state = AppState::new(Arc::new(pool), cfg, EventSender::new(tx))
            .expect("build application state");
        let router = stockledger_api::build_router(state.clone());

        Self {
            router,
            state,
            _db_dir: db_dir,
            _event_task: event_task,
        }
    }

    /// Send a request against the router.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Sends a request and returns the status with the decoded JSON body.
    pub async fn call(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let response = self.request(method, uri, body).await;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read response body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("response body is json")
        };
        (status, json)
    }

    pub async fn seed_location(&self, id: i64, name: &str, kind: LocationKind) {
        self.state
            .services
            .catalog
            .upsert_location(LocationUpsert {
                id,
                name: name.to_string(),
                kind,
                published: true,
            })
            .await
            .expect("seed location");
    }

    pub async fn seed_item(&self, id: i64) {
        self.state
            .services
            .catalog
            .upsert_item(ItemUpsert {
                id,
                parent_id: None,
                name: format!("Item {id}"),
                active: true,
                allow_backorders: false,
                low_stock_threshold: None,
            })
            .await
            .expect("seed item");
    }

    /// Seeds a store `A` (id 1) and a distribution center `B` (id 2) plus
    /// the given items, then backfills zero rows.
    pub async fn seed_two_locations(&self, items: &[i64]) {
        self.seed_location(1, "A", LocationKind::Store).await;
        self.seed_location(2, "B", LocationKind::DistributionCenter).await;
        for item in items {
            self.seed_item(*item).await;
        }
        self.state
            .services
            .backfill
            .run(100)
            .await
            .expect("backfill seeded items");
    }

    pub async fn quantity(&self, item_id: i64, location_id: i64) -> i64 {
        LocationStockStore::new(self.state.db.clone())
            .get(item_id, location_id)
            .await
            .expect("read quantity")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}
