mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;
use serde_json::json;

async fn app() -> TestApp {
    TestApp::with_config(|cfg| {
        cfg.distribution.strategy = "default_location_overwrite".to_string();
        cfg.distribution.default_location_id = Some(1);
    })
    .await
}

async fn register_catalog(app: &TestApp) {
    let (status, _) = app
        .call(
            Method::PUT,
            "/api/v1/locations/1",
            Some(json!({ "name": "A", "kind": "store" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app
        .call(
            Method::PUT,
            "/api/v1/locations/2",
            Some(json!({ "name": "B", "kind": "distribution_center" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = app
        .call(Method::PUT, "/api/v1/items/42", Some(json!({ "name": "X" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["kind"], "simple");
}

#[tokio::test]
async fn item_lifecycle_from_uninitialized_to_global_overwrite() {
    let app = app().await;
    register_catalog(&app).await;

    // Uninitialized items refuse per-location deltas.
    let (status, body) = app
        .call(
            Method::POST,
            "/api/v1/stock/42/delta",
            Some(json!({ "location_id": 1, "delta": 50 })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "uninitialized");

    let (status, body) = app.call(Method::POST, "/api/v1/admin/backfill", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"], "completed");
    assert_eq!(body["data"]["inserted"], 2);

    let (status, body) = app
        .call(
            Method::POST,
            "/api/v1/stock/42/delta",
            Some(json!({ "location_id": 1, "delta": 50 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let data = &body["data"];
    assert_eq!(data["applied_delta"], 50);
    assert_eq!(data["location_quantity_after"], 50);
    assert_eq!(data["total_quantity_after"], 50);
    assert_eq!(data["entry"]["source"], "manual_api");
    assert_eq!(data["snapshots"]["by_location_id"], json!({ "1": 50, "2": 0 }));
    assert_eq!(data["snapshots"]["by_location_name"], json!({ "A": 50, "B": 0 }));

    let (status, body) = app
        .call(
            Method::POST,
            "/api/v1/orders/o-1/fulfilled",
            Some(json!({
                "lines": [{ "item_id": 42, "quantity": 5 }],
                "fulfillment": { "method": "pickup", "store_id": 1 }
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"], "applied");

    let (_, body) = app.call(Method::GET, "/api/v1/stock/42", None).await;
    assert_eq!(body["data"]["initialized"], true);
    assert_eq!(body["data"]["stock"]["by_location_id"]["1"], 45);
    assert_eq!(body["data"]["stock"]["total"], 45);

    let (status, body) = app
        .call(
            Method::POST,
            "/api/v1/stock/42/global",
            Some(json!({ "requested_total_quantity": 100 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let data = &body["data"];
    assert_eq!(data["outcome"], "applied");
    assert_eq!(data["applied"][0]["location_id"], 1);
    assert_eq!(data["applied"][0]["delta"], 55);
    assert_eq!(data["summary"]["by_location_id"], json!({ "1": 100, "2": 0 }));
    assert_eq!(data["summary"]["total"], 100);
    assert_eq!(data["summary"]["stock_status"], "in_stock");

    let (_, body) = app.call(Method::GET, "/api/v1/stock/42/ledger", None).await;
    assert_eq!(body["data"]["total"], 3);
    let sources: Vec<&str> = body["data"]["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["source"].as_str().unwrap())
        .collect();
    assert_eq!(
        sources,
        vec!["erp_cd_global_overwrite", "order_reduce", "manual_api"]
    );
}

#[tokio::test]
async fn zero_delta_still_returns_quantities() {
    let app = app().await;
    register_catalog(&app).await;
    app.call(Method::POST, "/api/v1/admin/backfill", None).await;

    let (status, body) = app
        .call(
            Method::POST,
            "/api/v1/stock/42/delta",
            Some(json!({ "location_id": 2, "delta": 0 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["applied_delta"], 0);
    assert_eq!(body["data"]["entry"]["applied"], false);
    assert_eq!(body["data"]["snapshots"]["stock_status"], "out_of_stock");
}

#[tokio::test]
async fn invalid_requests_are_rejected_with_codes() {
    let app = app().await;
    register_catalog(&app).await;

    let (status, body) = app
        .call(
            Method::POST,
            "/api/v1/stock/42/delta",
            Some(json!({ "location_id": 1, "delta": 1, "source": "" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");

    let (status, body) = app.call(Method::GET, "/api/v1/stock/777", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");

    let (status, _) = app
        .call(
            Method::POST,
            "/api/v1/stock/42/global",
            Some(json!({ "requested_total_quantity": -4 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn rejected_global_updates_use_their_own_code() {
    let app = TestApp::with_config(|cfg| {
        cfg.distribution.default_location_id = Some(1);
        cfg.distribution.global_updates = "reject".to_string();
    })
    .await;
    register_catalog(&app).await;

    let (status, body) = app
        .call(
            Method::POST,
            "/api/v1/stock/42/global",
            Some(json!({ "requested_total_quantity": 10 })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "global_update_rejected");
}

#[tokio::test]
async fn order_for_unknown_store_is_a_warning_not_an_error() {
    let app = app().await;
    register_catalog(&app).await;

    let (status, body) = app
        .call(
            Method::POST,
            "/api/v1/orders/o-9/fulfilled",
            Some(json!({
                "lines": [{ "item_id": 42, "quantity": 1 }],
                "fulfillment": { "method": "pickup", "store_id": 55 }
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"], "unresolved");
    assert!(body["data"]["warning"].as_str().unwrap().contains("55"));
}

#[tokio::test]
async fn admin_endpoints_report_state() {
    let app = app().await;
    register_catalog(&app).await;

    let (_, body) = app.call(Method::GET, "/api/v1/admin/backfill", None).await;
    assert_eq!(body["data"]["state"], "idle");

    let (_, body) = app
        .call(Method::POST, "/api/v1/admin/backfill/cancel", None)
        .await;
    assert_eq!(body["data"]["signalled"], false);

    let (status, body) = app
        .call(Method::POST, "/api/v1/admin/reindex", Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["reindexed"], 1);

    app.call(Method::POST, "/api/v1/admin/backfill", None).await;
    let (status, body) = app
        .call(Method::DELETE, "/api/v1/admin/locations/2/stock", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["rows_removed"], 1);

    let (_, body) = app
        .call(
            Method::PUT,
            "/api/v1/stock/42/locations/1/threshold",
            Some(json!({ "low_stock_threshold": 3 })),
        )
        .await;
    assert_eq!(body["data"]["low_stock_threshold"], 3);
    assert_eq!(body["data"]["quantity"], 0);

    let (_, body) = app
        .call(Method::GET, "/api/v1/locations?published_only=true", None)
        .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn responses_carry_the_request_id() {
    let app = app().await;

    let response = app.request(Method::GET, "/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let (status, body) = app.call(Method::GET, "/api-docs/openapi.json", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/api/v1/stock/{item_id}/delta"].is_object());
}
