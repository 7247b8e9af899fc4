use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Append-only audit record of one accepted delta. Never updated after insert.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "stock_ledger_entries")]
#[schema(as = LedgerEntry)]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub item_id: i64,
    pub location_id: i64,
    pub delta: i64,
    pub quantity_before: i64,
    pub quantity_after: i64,
    pub source: String,
    pub who: Option<String>,
    pub order_reference: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub meta: Option<Json>,
    #[schema(value_type = String, format = DateTime)]
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
