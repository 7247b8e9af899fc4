pub mod admin;
pub mod catalog;
pub mod common;
pub mod orders;
pub mod stock;

use crate::{
    config::AppConfig,
    events::EventSender,
    services::{
        backfill::BackfillScanner,
        catalog::CatalogService,
        distribution::DistributionEngine,
        order_sync::{OrderRoutingPolicy, OrderStockSync},
        reindex::Reindexer,
        stock::StockService,
        stock_ledger::StockLedger,
    },
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

pub use crate::AppState;

/// Service container shared by every handler
#[derive(Clone)]
pub struct AppServices {
    pub catalog: Arc<CatalogService>,
    pub stock: Arc<StockService>,
    pub ledger: Arc<StockLedger>,
    pub reindexer: Arc<Reindexer>,
    pub backfill: Arc<BackfillScanner>,
    pub distribution: Arc<DistributionEngine>,
    pub order_sync: Arc<OrderStockSync>,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        config: &AppConfig,
        routing: OrderRoutingPolicy,
    ) -> Self {
        let catalog = CatalogService::new(db.clone());
        let reindexer = Reindexer::new(db.clone());
        let ledger = StockLedger::new(
            db.clone(),
            event_sender.clone(),
            config.default_low_stock_threshold,
        );

        let stock = StockService::new(
            db.clone(),
            catalog.clone(),
            ledger.clone(),
            reindexer.clone(),
        );
        let backfill = BackfillScanner::new(
            db.clone(),
            event_sender.clone(),
            config.backfill.lock_ttl_secs,
        );
        let distribution = DistributionEngine::new(
            db.clone(),
            ledger.clone(),
            reindexer.clone(),
            event_sender.clone(),
        );
        let order_sync = OrderStockSync::new(
            db,
            ledger.clone(),
            reindexer.clone(),
            event_sender,
            routing,
        );

        Self {
            catalog: Arc::new(catalog),
            stock: Arc::new(stock),
            ledger: Arc::new(ledger),
            reindexer: Arc::new(reindexer),
            backfill: Arc::new(backfill),
            distribution: Arc::new(distribution),
            order_sync: Arc::new(order_sync),
        }
    }
}
