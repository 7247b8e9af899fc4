mod common;

use assert_matches::assert_matches;
use common::TestApp;
use sea_orm::{EntityTrait, PaginatorTrait};
use stockledger_api::{
    entities::order_stock_flag,
    services::{
        order_sync::{
            Fulfillment, Order, OrderLine, OrderSyncOutcome, SOURCE_ORDER_REDUCE,
            SOURCE_ORDER_RESTORE,
        },
        stock_ledger::DeltaRequest,
    },
};

async fn app() -> TestApp {
    let app = TestApp::with_config(|cfg| {
        cfg.order_sync.default_distribution_center_id = Some(2);
        cfg.order_sync
            .shipping_method_locations
            .insert("local_courier:7".to_string(), 1);
    })
    .await;
    app.seed_two_locations(&[100, 101]).await;
    for (location, quantity) in [(1, 10), (2, 30)] {
        for item in [100, 101] {
            app.state
                .services
                .ledger
                .apply_delta(DeltaRequest::new(item, location, quantity, "seed"))
                .await
                .unwrap();
        }
    }
    app
}

fn order(id: &str, fulfillment: Fulfillment) -> Order {
    Order {
        id: id.to_string(),
        lines: vec![
            OrderLine {
                item_id: 100,
                quantity: 3,
            },
            OrderLine {
                item_id: 101,
                quantity: 1,
            },
        ],
        fulfillment,
    }
}

#[tokio::test]
async fn pickup_reduces_at_the_store_exactly_once() {
    let app = app().await;
    let sync = app.state.services.order_sync.clone();
    let order = order("1001", Fulfillment::Pickup { store_id: 1 });

    let first = sync.on_order_fulfilled(&order).await.unwrap();
    assert_matches!(first, OrderSyncOutcome::Applied { location_id: Some(1), entries, reindexed_items } => {
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.source == SOURCE_ORDER_REDUCE));
        assert_eq!(reindexed_items, vec![100, 101]);
    });

    let second = sync.on_order_fulfilled(&order).await.unwrap();
    assert_eq!(second, OrderSyncOutcome::AlreadyProcessed);

    assert_eq!(app.quantity(100, 1).await, 7);
    assert_eq!(app.quantity(101, 1).await, 9);
    assert_eq!(app.quantity(100, 2).await, 30);
}

#[tokio::test]
async fn concurrent_duplicate_callbacks_apply_once() {
    let app = app().await;
    let sync = app.state.services.order_sync.clone();
    let order = order("1002", Fulfillment::Pickup { store_id: 1 });

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let sync = sync.clone();
            let order = order.clone();
            tokio::spawn(async move { sync.on_order_fulfilled(&order).await })
        })
        .collect();

    let mut applied = 0;
    for handle in handles {
        if let OrderSyncOutcome::Applied { .. } = handle.await.unwrap().unwrap() {
            applied += 1;
        }
    }
    assert_eq!(applied, 1);
    assert_eq!(app.quantity(100, 1).await, 7);
}

#[tokio::test]
async fn delivery_routes_by_shipping_method_then_default_center() {
    let app = app().await;
    let sync = app.state.services.order_sync.clone();

    let mapped = order(
        "2001",
        Fulfillment::Delivery {
            shipping_method_instance: Some("local_courier:7".into()),
        },
    );
    assert_matches!(
        sync.on_order_fulfilled(&mapped).await.unwrap(),
        OrderSyncOutcome::Applied { location_id: Some(1), .. }
    );

    let unmapped = order(
        "2002",
        Fulfillment::Delivery {
            shipping_method_instance: Some("flat_rate:1".into()),
        },
    );
    assert_matches!(
        sync.on_order_fulfilled(&unmapped).await.unwrap(),
        OrderSyncOutcome::Applied { location_id: Some(2), .. }
    );

    assert_eq!(app.quantity(100, 1).await, 7);
    assert_eq!(app.quantity(100, 2).await, 27);
}

#[tokio::test]
async fn restore_returns_what_was_taken_once() {
    let app = app().await;
    let sync = app.state.services.order_sync.clone();
    let order = order("3001", Fulfillment::Pickup { store_id: 1 });

    sync.on_order_fulfilled(&order).await.unwrap();
    assert_eq!(app.quantity(100, 1).await, 7);

    let restored = sync.on_order_cancelled_or_refunded(&order).await.unwrap();
    assert_matches!(restored, OrderSyncOutcome::Applied { entries, .. } => {
        assert!(entries.iter().all(|e| e.source == SOURCE_ORDER_RESTORE));
        assert_eq!(entries.iter().map(|e| e.delta).sum::<i64>(), 4);
    });
    assert_eq!(
        sync.on_order_cancelled_or_refunded(&order).await.unwrap(),
        OrderSyncOutcome::AlreadyProcessed
    );

    assert_eq!(app.quantity(100, 1).await, 10);
    assert_eq!(app.quantity(101, 1).await, 10);
}

#[tokio::test]
async fn restore_replays_the_original_location_even_if_routing_changed() {
    let app = app().await;
    let sync = app.state.services.order_sync.clone();

    sync.on_order_fulfilled(&order("3002", Fulfillment::Pickup { store_id: 1 }))
        .await
        .unwrap();
    // The refund callback carries a different fulfillment method.
    let refund = order(
        "3002",
        Fulfillment::Delivery {
            shipping_method_instance: None,
        },
    );
    sync.on_order_cancelled_or_refunded(&refund).await.unwrap();

    assert_eq!(app.quantity(100, 1).await, 10);
    assert_eq!(app.quantity(100, 2).await, 30);
}

#[tokio::test]
async fn cancelling_an_unfulfilled_order_restores_nothing() {
    let app = app().await;
    let sync = app.state.services.order_sync.clone();
    let pickup = Order {
        lines: vec![OrderLine {
            item_id: 100,
            quantity: 4,
        }],
        ..order("3003", Fulfillment::Pickup { store_id: 1 })
    };

    assert_eq!(
        sync.on_order_cancelled_or_refunded(&pickup).await.unwrap(),
        OrderSyncOutcome::NotReduced
    );
    assert_eq!(app.quantity(100, 1).await, 10);
    let flags = order_stock_flag::Entity::find()
        .count(app.state.db.as_ref())
        .await
        .unwrap();
    assert_eq!(flags, 0);

    // The order can still go through its normal lifecycle afterwards.
    sync.on_order_fulfilled(&pickup).await.unwrap();
    assert_eq!(app.quantity(100, 1).await, 6);
    assert_matches!(
        sync.on_order_cancelled_or_refunded(&pickup).await.unwrap(),
        OrderSyncOutcome::Applied { .. }
    );
    assert_eq!(app.quantity(100, 1).await, 10);
}

#[tokio::test]
async fn unknown_store_is_unresolved_and_records_nothing() {
    let app = app().await;
    let sync = app.state.services.order_sync.clone();
    let order = order("4001", Fulfillment::Pickup { store_id: 99 });

    let outcome = sync.on_order_fulfilled(&order).await.unwrap();
    assert_matches!(outcome, OrderSyncOutcome::Unresolved { warning } => {
        assert!(warning.contains("99"));
    });

    let flags = order_stock_flag::Entity::find()
        .count(app.state.db.as_ref())
        .await
        .unwrap();
    assert_eq!(flags, 0);
    assert_eq!(app.quantity(100, 1).await, 10);
}

#[tokio::test]
async fn delivery_without_any_route_is_unresolved() {
    let app = TestApp::new().await;
    app.seed_two_locations(&[100]).await;
    let order = order(
        "4002",
        Fulfillment::Delivery {
            shipping_method_instance: None,
        },
    );

    assert_matches!(
        app.state
            .services
            .order_sync
            .on_order_fulfilled(&order)
            .await
            .unwrap(),
        OrderSyncOutcome::Unresolved { .. }
    );
}
