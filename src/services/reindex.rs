//! Derived aggregates. Everything written here can be rebuilt from
//! `location_stock` at any time.

use crate::{
    entities::{
        catalog_item::{self, Entity as CatalogItem, StockStatus},
        item_stock_snapshot::{self, Entity as ItemStockSnapshot},
        location_stock::{self, Entity as LocationStock},
        stock_location::{self, Entity as StockLocation},
    },
    errors::ServiceError,
    services::location_stock::LocationStockStore,
};
use chrono::Utc;
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ActiveEnum, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use utoipa::ToSchema;

/// Aggregate and display snapshots for one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ItemStockSummary {
    pub item_id: i64,
    pub total: i64,
    pub stock_status: StockStatus,
    /// Quantity keyed by location id
    pub by_location_id: BTreeMap<i64, i64>,
    /// Quantity keyed by location display name; colliding names are summed
    pub by_location_name: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct ReindexReport {
    pub reindexed: u64,
    pub failed: Vec<i64>,
}

pub fn stock_status_for(total: i64, allow_backorders: bool) -> StockStatus {
    if total > 0 {
        StockStatus::InStock
    } else if allow_backorders {
        StockStatus::OnBackorder
    } else {
        StockStatus::OutOfStock
    }
}

/// Builds the summary from raw rows. Locations without a known name are
/// labelled by id.
pub fn summarize(
    item_id: i64,
    rows: &[(i64, i64)],
    names: &HashMap<i64, String>,
    allow_backorders: bool,
) -> ItemStockSummary {
    let mut by_location_id = BTreeMap::new();
    let mut by_location_name: BTreeMap<String, i64> = BTreeMap::new();
    let mut total = 0i64;

    for &(location_id, quantity) in rows {
        total += quantity;
        *by_location_id.entry(location_id).or_insert(0) += quantity;
        let name = names
            .get(&location_id)
            .cloned()
            .unwrap_or_else(|| format!("location #{}", location_id));
        *by_location_name.entry(name).or_insert(0) += quantity;
    }

    ItemStockSummary {
        item_id,
        total,
        stock_status: stock_status_for(total, allow_backorders),
        by_location_id,
        by_location_name,
    }
}

#[derive(Clone)]
pub struct Reindexer {
    db: Arc<DatabaseConnection>,
}

impl Reindexer {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Recomputes and persists the aggregate for one item
    #[instrument(skip(self))]
    pub async fn reindex(&self, item_id: i64) -> Result<ItemStockSummary, ServiceError> {
        Self::reindex_on(self.db.as_ref(), item_id).await
    }

    /// Reads the live aggregate without persisting anything
    pub async fn summary(&self, item_id: i64) -> Result<ItemStockSummary, ServiceError> {
        Self::summary_on(self.db.as_ref(), item_id).await
    }

    pub async fn summary_on<C: ConnectionTrait>(
        conn: &C,
        item_id: i64,
    ) -> Result<ItemStockSummary, ServiceError> {
        let rows: Vec<(i64, i64)> = LocationStockStore::rows_for_item_on(conn, item_id)
            .await?
            .into_iter()
            .map(|row| (row.location_id, row.quantity))
            .collect();

        let location_ids: Vec<i64> = rows.iter().map(|(id, _)| *id).collect();
        let names: HashMap<i64, String> = if location_ids.is_empty() {
            HashMap::new()
        } else {
            StockLocation::find()
                .filter(stock_location::Column::Id.is_in(location_ids))
                .all(conn)
                .await
                .map_err(ServiceError::db_error)?
                .into_iter()
                .map(|location| (location.id, location.name))
                .collect()
        };

        let allow_backorders = CatalogItem::find_by_id(item_id)
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .map(|item| item.allow_backorders)
            .unwrap_or(false);

        Ok(summarize(item_id, &rows, &names, allow_backorders))
    }

    pub async fn reindex_on<C: ConnectionTrait>(
        conn: &C,
        item_id: i64,
    ) -> Result<ItemStockSummary, ServiceError> {
        let summary = Self::summary_on(conn, item_id).await?;
        let now = Utc::now();

        let snapshot = item_stock_snapshot::ActiveModel {
            item_id: Set(item_id),
            total: Set(summary.total),
            stock_status: Set(summary.stock_status),
            by_location_id: Set(serde_json::to_value(&summary.by_location_id)?),
            by_location_name: Set(serde_json::to_value(&summary.by_location_name)?),
            updated_at: Set(now),
        };
        ItemStockSnapshot::insert(snapshot)
            .on_conflict(
                OnConflict::column(item_stock_snapshot::Column::ItemId)
                    .update_columns([
                        item_stock_snapshot::Column::Total,
                        item_stock_snapshot::Column::StockStatus,
                        item_stock_snapshot::Column::ByLocationId,
                        item_stock_snapshot::Column::ByLocationName,
                        item_stock_snapshot::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await
            .map_err(ServiceError::db_error)?;

        CatalogItem::update_many()
            .col_expr(
                catalog_item::Column::StockStatus,
                Expr::value(summary.stock_status.to_value()),
            )
            .col_expr(catalog_item::Column::UpdatedAt, Expr::value(now))
            .filter(catalog_item::Column::Id.eq(item_id))
            .exec(conn)
            .await
            .map_err(ServiceError::db_error)?;

        debug!(item_id, total = summary.total, "item reindexed");
        Ok(summary)
    }

    /// Reindexes each item, continuing past failures so an interrupted batch
    /// can simply be re-run.
    pub async fn reindex_many(&self, item_ids: &[i64]) -> ReindexReport {
        let mut report = ReindexReport::default();
        let distinct: BTreeSet<i64> = item_ids.iter().copied().collect();

        for item_id in distinct {
            match self.reindex(item_id).await {
                Ok(_) => report.reindexed += 1,
                Err(e) => {
                    warn!(item_id, error = %e, "reindex failed");
                    report.failed.push(item_id);
                }
            }
        }

        metrics::counter!("stockledger.reindex.items", report.reindexed);
        report
    }

    /// Every item known to the catalog or holding stock rows
    pub async fn all_item_ids(&self) -> Result<Vec<i64>, ServiceError> {
        let db = self.db.as_ref();
        let mut ids: BTreeSet<i64> = CatalogItem::find()
            .select_only()
            .column(catalog_item::Column::Id)
            .order_by_asc(catalog_item::Column::Id)
            .into_tuple::<i64>()
            .all(db)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .collect();

        let stocked: Vec<i64> = LocationStock::find()
            .select_only()
            .column(location_stock::Column::ItemId)
            .distinct()
            .into_tuple::<i64>()
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        ids.extend(stocked);

        Ok(ids.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_and_names_are_aggregated() {
        let names = HashMap::from([
            (1, "Downtown".to_string()),
            (2, "Warehouse".to_string()),
            (3, "Downtown".to_string()),
        ]);
        let summary = summarize(7, &[(1, 5), (2, 10), (3, 2), (4, 1)], &names, false);

        assert_eq!(summary.total, 18);
        assert_eq!(summary.stock_status, StockStatus::InStock);
        assert_eq!(summary.by_location_id.get(&3), Some(&2));
        assert_eq!(summary.by_location_name.get("Downtown"), Some(&7));
        assert_eq!(summary.by_location_name.get("location #4"), Some(&1));
    }

    #[test]
    fn empty_item_is_out_of_stock_unless_backorders_allowed() {
        let names = HashMap::new();
        assert_eq!(
            summarize(1, &[(1, 0)], &names, false).stock_status,
            StockStatus::OutOfStock
        );
        assert_eq!(
            summarize(1, &[], &names, true).stock_status,
            StockStatus::OnBackorder
        );
    }
}
