use crate::{
    entities::{location_stock, stock_ledger_entry},
    errors::ServiceError,
    services::{
        catalog::CatalogService,
        in_transaction,
        location_stock::LocationStockStore,
        reindex::{ItemStockSummary, ReindexReport, Reindexer},
        stock_ledger::{DeltaOutcome, DeltaRequest, StockLedger},
    },
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use sea_orm::DatabaseConnection;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

pub const SOURCE_MANUAL_API: &str = "manual_api";

#[derive(Debug, Clone)]
pub struct ManualDelta {
    pub item_id: i64,
    pub location_id: i64,
    pub delta: i64,
    pub source: Option<String>,
    pub who: Option<String>,
}

/// What a manual delta did, plus enough state to reconcile without a re-read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct DeltaResponse {
    /// Change actually made after clamping at zero
    pub applied_delta: i64,
    pub location_quantity_after: i64,
    pub total_quantity_after: i64,
    pub entry: DeltaOutcome,
    pub snapshots: ItemStockSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ItemStockView {
    pub item_id: i64,
    /// Every published location has a row for this item
    pub initialized: bool,
    pub stock: ItemStockSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PurgeReport {
    pub location_id: i64,
    pub rows_removed: u64,
    pub reindex: ReindexReport,
}

#[derive(Clone)]
pub struct StockService {
    db: Arc<DatabaseConnection>,
    catalog: CatalogService,
    ledger: StockLedger,
    reindexer: Reindexer,
}

impl StockService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        catalog: CatalogService,
        ledger: StockLedger,
        reindexer: Reindexer,
    ) -> Self {
        Self {
            db,
            catalog,
            ledger,
            reindexer,
        }
    }

    /// An item is initialized once every published location has a row for it
    pub async fn is_initialized(&self, item_id: i64) -> Result<bool, ServiceError> {
        let published = self.catalog.published_location_ids().await?;
        let present: BTreeSet<i64> = LocationStockStore::get_all_on(self.db.as_ref(), item_id)
            .await?
            .into_keys()
            .collect();
        Ok(published.iter().all(|id| present.contains(id)))
    }

    /// Applies an externally requested per-location delta
    #[instrument(skip(self, request), fields(item_id = request.item_id, location_id = request.location_id, delta = request.delta))]
    pub async fn apply_manual_delta(
        &self,
        request: ManualDelta,
    ) -> Result<DeltaResponse, ServiceError> {
        self.catalog.get_item(request.item_id).await?;
        self.catalog.get_location(request.location_id).await?;

        if !self.is_initialized(request.item_id).await? {
            return Err(ServiceError::Uninitialized(format!(
                "Item {} is not initialized: run the backfill before applying per-location deltas",
                request.item_id
            )));
        }

        let source = request
            .source
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| SOURCE_MANUAL_API.to_string());
        let mut delta = DeltaRequest::new(request.item_id, request.location_id, request.delta, source);
        if let Some(who) = request.who {
            delta = delta.who(who);
        }

        let entry = self.ledger.apply_delta(delta).await?;
        let snapshots = self.reindexer.reindex(request.item_id).await?;

        Ok(DeltaResponse {
            applied_delta: entry.quantity_after - entry.quantity_before,
            location_quantity_after: entry.quantity_after,
            total_quantity_after: snapshots.total,
            entry,
            snapshots,
        })
    }

    /// Live per-location map and aggregate, read from the canonical rows
    pub async fn item_stock(&self, item_id: i64) -> Result<ItemStockView, ServiceError> {
        self.catalog.get_item(item_id).await?;
        let stock = self.reindexer.summary(item_id).await?;
        Ok(ItemStockView {
            item_id,
            initialized: self.is_initialized(item_id).await?,
            stock,
        })
    }

    pub async fn set_low_stock_threshold(
        &self,
        item_id: i64,
        location_id: i64,
        threshold: Option<i64>,
    ) -> Result<location_stock::Model, ServiceError> {
        if threshold.is_some_and(|t| t < 0) {
            return Err(ServiceError::ValidationError(
                "low stock threshold must not be negative".to_string(),
            ));
        }
        self.catalog.get_item(item_id).await?;
        self.catalog.get_location(location_id).await?;

        in_transaction(self.db.as_ref(), move |txn| {
            Box::pin(async move {
                LocationStockStore::set_threshold_on(txn, item_id, location_id, threshold).await?;
                LocationStockStore::row_on(txn, item_id, location_id)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::InternalError("stock row missing after threshold update".into())
                    })
            })
        })
        .await
    }

    pub async fn ledger_history(
        &self,
        item_id: i64,
        location_id: Option<i64>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<stock_ledger_entry::Model>, u64), ServiceError> {
        self.ledger
            .history(item_id, location_id, page, per_page)
            .await
    }

    /// Drops every stock row of a location, then rebuilds the affected
    /// aggregates. Ledger history is kept.
    #[instrument(skip(self))]
    pub async fn purge_location(&self, location_id: i64) -> Result<PurgeReport, ServiceError> {
        let item_ids = in_transaction(self.db.as_ref(), move |txn| {
            Box::pin(async move { LocationStockStore::purge_location_on(txn, location_id).await })
        })
        .await?;

        warn!(location_id, rows = item_ids.len(), "location stock purged");
        let reindex = self.reindexer.reindex_many(&item_ids).await;
        info!(location_id, reindexed = reindex.reindexed, "purge reindex finished");

        Ok(PurgeReport {
            location_id,
            rows_removed: item_ids.len() as u64,
            reindex,
        })
    }
}
