use super::catalog_item::StockStatus;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Display-only aggregate rebuilt by the reindexer; never a source of truth.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "item_stock_snapshots")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub item_id: i64,
    pub total: i64,
    pub stock_status: StockStatus,
    pub by_location_id: Json,
    pub by_location_name: Json,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
