//! Canonical `(item, location) -> quantity` store.
//!
//! `upsert_increment` is the only mutating primitive for balances. It is one
//! `INSERT .. ON CONFLICT DO UPDATE` statement, so concurrent deltas for the
//! same pair compose regardless of interleaving and never drive a balance
//! below zero.

use crate::{
    db::clamped_sum_sql,
    entities::location_stock::{self, Entity as LocationStock},
    errors::ServiceError,
    services::in_transaction,
};
use chrono::Utc;
use sea_orm::{
    sea_query::{Expr, OnConflict, Query},
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument};

#[derive(Clone)]
pub struct LocationStockStore {
    db: Arc<DatabaseConnection>,
}

impl LocationStockStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Quantity at one location; a missing row reads as zero.
    pub async fn get(&self, item_id: i64, location_id: i64) -> Result<i64, ServiceError> {
        Self::get_on(self.db.as_ref(), item_id, location_id).await
    }

    /// Every location balance for an item, keyed by location id.
    pub async fn get_all(&self, item_id: i64) -> Result<BTreeMap<i64, i64>, ServiceError> {
        Self::get_all_on(self.db.as_ref(), item_id).await
    }

    /// Adds `delta` to the pair, creating the row if needed, clamping at zero.
    /// Returns the quantity after the increment.
    pub async fn upsert_increment(
        &self,
        item_id: i64,
        location_id: i64,
        delta: i64,
    ) -> Result<i64, ServiceError> {
        // The row lock taken by the upsert is held until commit, so the
        // read-back inside the same transaction observes exactly our result.
        in_transaction(self.db.as_ref(), move |txn| {
            Box::pin(async move {
                Self::increment_on(txn, item_id, location_id, delta).await?;
                Self::get_on(txn, item_id, location_id).await
            })
        })
        .await
    }

    pub async fn get_on<C: ConnectionTrait>(
        conn: &C,
        item_id: i64,
        location_id: i64,
    ) -> Result<i64, ServiceError> {
        Ok(Self::row_on(conn, item_id, location_id)
            .await?
            .map(|row| row.quantity)
            .unwrap_or(0))
    }

    pub async fn row_on<C: ConnectionTrait>(
        conn: &C,
        item_id: i64,
        location_id: i64,
    ) -> Result<Option<location_stock::Model>, ServiceError> {
        LocationStock::find_by_id((item_id, location_id))
            .one(conn)
            .await
            .map_err(ServiceError::db_error)
    }

    pub async fn rows_for_item_on<C: ConnectionTrait>(
        conn: &C,
        item_id: i64,
    ) -> Result<Vec<location_stock::Model>, ServiceError> {
        LocationStock::find()
            .filter(location_stock::Column::ItemId.eq(item_id))
            .order_by_asc(location_stock::Column::LocationId)
            .all(conn)
            .await
            .map_err(ServiceError::db_error)
    }

    pub async fn get_all_on<C: ConnectionTrait>(
        conn: &C,
        item_id: i64,
    ) -> Result<BTreeMap<i64, i64>, ServiceError> {
        Ok(Self::rows_for_item_on(conn, item_id)
            .await?
            .into_iter()
            .map(|row| (row.location_id, row.quantity))
            .collect())
    }

    /// Issues the atomic clamped upsert. Callers that need the resulting
    /// quantity read it back on the same connection.
    #[instrument(skip(conn))]
    pub async fn increment_on<C: ConnectionTrait>(
        conn: &C,
        item_id: i64,
        location_id: i64,
        delta: i64,
    ) -> Result<(), ServiceError> {
        let backend = conn.get_database_backend();
        let now = Utc::now();

        let mut insert = Query::insert();
        insert.into_table(LocationStock).columns([
            location_stock::Column::ItemId,
            location_stock::Column::LocationId,
            location_stock::Column::Quantity,
            location_stock::Column::CreatedAt,
            location_stock::Column::UpdatedAt,
        ]);
        insert
            .values([
                item_id.into(),
                location_id.into(),
                delta.max(0).into(),
                now.into(),
                now.into(),
            ])
            .map_err(|e| ServiceError::InternalError(e.to_string()))?;
        insert.on_conflict(
            OnConflict::columns([
                location_stock::Column::ItemId,
                location_stock::Column::LocationId,
            ])
            .value(
                location_stock::Column::Quantity,
                Expr::cust_with_values(clamped_sum_sql(backend), [delta]),
            )
            .update_column(location_stock::Column::UpdatedAt)
            .to_owned(),
        );

        conn.execute(backend.build(&insert))
            .await
            .map_err(ServiceError::db_error)?;
        debug!("upsert-increment issued");
        Ok(())
    }

    /// Sets (or clears) the per-row low-stock threshold, creating a zero row
    /// if the pair has none. Quantity is never touched.
    pub async fn set_threshold_on<C: ConnectionTrait>(
        conn: &C,
        item_id: i64,
        location_id: i64,
        threshold: Option<i64>,
    ) -> Result<(), ServiceError> {
        let now = Utc::now();
        let row = location_stock::ActiveModel {
            item_id: sea_orm::Set(item_id),
            location_id: sea_orm::Set(location_id),
            quantity: sea_orm::Set(0),
            low_stock_threshold: sea_orm::Set(threshold),
            created_at: sea_orm::Set(now),
            updated_at: sea_orm::Set(now),
        };
        LocationStock::insert(row)
            .on_conflict(
                OnConflict::columns([
                    location_stock::Column::ItemId,
                    location_stock::Column::LocationId,
                ])
                .update_columns([
                    location_stock::Column::LowStockThreshold,
                    location_stock::Column::UpdatedAt,
                ])
                .to_owned(),
            )
            .exec_without_returning(conn)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(())
    }

    /// Removes every row held at a location. Returns the affected item ids.
    pub async fn purge_location_on<C: ConnectionTrait>(
        conn: &C,
        location_id: i64,
    ) -> Result<Vec<i64>, ServiceError> {
        let item_ids: Vec<i64> = LocationStock::find()
            .select_only()
            .column(location_stock::Column::ItemId)
            .filter(location_stock::Column::LocationId.eq(location_id))
            .order_by_asc(location_stock::Column::ItemId)
            .into_tuple()
            .all(conn)
            .await
            .map_err(ServiceError::db_error)?;

        LocationStock::delete_many()
            .filter(location_stock::Column::LocationId.eq(location_id))
            .exec(conn)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(item_ids)
    }
}

