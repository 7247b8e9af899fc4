use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Physical place holding stock
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum LocationKind {
    /// Can fulfil pickup and act as a delivery source
    #[sea_orm(string_value = "store")]
    Store,
    /// Delivery only
    #[sea_orm(string_value = "distribution_center")]
    DistributionCenter,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_locations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,
    pub name: String,
    pub kind: LocationKind,
    pub published: bool,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::location_stock::Entity")]
    LocationStock,
}

impl Related<super::location_stock::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LocationStock.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
