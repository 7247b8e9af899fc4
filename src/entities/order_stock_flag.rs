use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

pub const KIND_REDUCED: &str = "reduced";
pub const KIND_RESTORED: &str = "restored";

/// Exactly-once marker for an order lifecycle transition.
/// Presence of `(order_id, kind)` means the transition has been applied.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_stock_flags")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub order_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub kind: String,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
