use crate::{
    entities::{
        catalog_item::{self, Entity as CatalogItem, ItemKind, StockStatus},
        stock_location::{self, Entity as StockLocation, LocationKind},
    },
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::{
    sea_query::OnConflict, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use std::sync::Arc;
use tracing::{info, instrument};

/// Location identity pushed by the host catalog
#[derive(Debug, Clone)]
pub struct LocationUpsert {
    pub id: i64,
    pub name: String,
    pub kind: LocationKind,
    pub published: bool,
}

/// Item identity pushed by the host catalog
#[derive(Debug, Clone)]
pub struct ItemUpsert {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub name: String,
    pub active: bool,
    pub allow_backorders: bool,
    pub low_stock_threshold: Option<i64>,
}

/// Registry of the item and location identities the ledger refers to
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, location), fields(location_id = location.id))]
    pub async fn upsert_location(
        &self,
        location: LocationUpsert,
    ) -> Result<stock_location::Model, ServiceError> {
        if location.name.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "location name must not be empty".to_string(),
            ));
        }

        let model = stock_location::ActiveModel {
            id: Set(location.id),
            name: Set(location.name.trim().to_string()),
            kind: Set(location.kind),
            published: Set(location.published),
            created_at: Set(Utc::now()),
        };
        StockLocation::insert(model)
            .on_conflict(
                OnConflict::column(stock_location::Column::Id)
                    .update_columns([
                        stock_location::Column::Name,
                        stock_location::Column::Kind,
                        stock_location::Column::Published,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)?;

        info!(location_id = location.id, "location upserted");
        self.get_location(location.id).await
    }

    pub async fn get_location(&self, id: i64) -> Result<stock_location::Model, ServiceError> {
        StockLocation::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Location {} not found", id)))
    }

    pub async fn list_locations(
        &self,
        published_only: bool,
    ) -> Result<Vec<stock_location::Model>, ServiceError> {
        let mut query = StockLocation::find();
        if published_only {
            query = query.filter(stock_location::Column::Published.eq(true));
        }
        query
            .order_by_asc(stock_location::Column::Id)
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    /// Ids of the locations every item is expected to have a row at
    pub async fn published_location_ids(&self) -> Result<Vec<i64>, ServiceError> {
        Ok(self
            .list_locations(true)
            .await?
            .into_iter()
            .map(|location| location.id)
            .collect())
    }

    /// Creates or updates an item. The derived stock status is left to the
    /// reindexer.
    #[instrument(skip(self, item), fields(item_id = item.id))]
    pub async fn upsert_item(&self, item: ItemUpsert) -> Result<catalog_item::Model, ServiceError> {
        if item.parent_id == Some(item.id) {
            return Err(ServiceError::ValidationError(
                "an item cannot be its own parent".to_string(),
            ));
        }
        if let Some(parent_id) = item.parent_id {
            let parent = self.get_item(parent_id).await.map_err(|e| match e {
                ServiceError::NotFound(_) => {
                    ServiceError::ValidationError(format!("parent item {} does not exist", parent_id))
                }
                other => other,
            })?;
            if parent.kind == ItemKind::Variant {
                return Err(ServiceError::ValidationError(
                    "a variant cannot be the parent of another item".to_string(),
                ));
            }
        }

        let kind = if item.parent_id.is_some() {
            ItemKind::Variant
        } else {
            ItemKind::Simple
        };
        let model = catalog_item::ActiveModel {
            id: Set(item.id),
            parent_id: Set(item.parent_id),
            kind: Set(kind),
            name: Set(item.name),
            active: Set(item.active),
            allow_backorders: Set(item.allow_backorders),
            low_stock_threshold: Set(item.low_stock_threshold),
            stock_status: Set(StockStatus::OutOfStock),
            updated_at: Set(Utc::now()),
        };
        CatalogItem::insert(model)
            .on_conflict(
                OnConflict::column(catalog_item::Column::Id)
                    .update_columns([
                        catalog_item::Column::ParentId,
                        catalog_item::Column::Kind,
                        catalog_item::Column::Name,
                        catalog_item::Column::Active,
                        catalog_item::Column::AllowBackorders,
                        catalog_item::Column::LowStockThreshold,
                        catalog_item::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)?;

        self.get_item(item.id).await
    }

    pub async fn get_item(&self, id: i64) -> Result<catalog_item::Model, ServiceError> {
        CatalogItem::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Item {} not found", id)))
    }
}
