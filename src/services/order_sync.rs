//! Order lifecycle to ledger binding.
//!
//! Each transition is guarded by a row in `order_stock_flags`. Claiming the
//! flag is a conflicting insert inside the same transaction as the applies,
//! so a duplicated or retried callback either does everything or nothing.

use crate::{
    config::OrderSyncConfig,
    entities::{
        order_stock_flag::{self, Entity as OrderStockFlag, KIND_REDUCED, KIND_RESTORED},
        stock_location::Entity as StockLocation,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        in_transaction,
        reindex::Reindexer,
        stock_ledger::{DeltaOutcome, DeltaRequest, StockLedger},
    },
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::OnConflict, ConnectionTrait, DatabaseConnection, EntityTrait, Set,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use validator::Validate;

pub const SOURCE_ORDER_REDUCE: &str = "order_reduce";
pub const SOURCE_ORDER_RESTORE: &str = "order_restore";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, Validate)]
pub struct OrderLine {
    pub item_id: i64,
    #[validate(range(min = 0, max = 1_000_000_000_000))]
    pub quantity: i64,
}

/// How the shopper chose to receive the order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Fulfillment {
    /// Collected at the selected store
    Pickup { store_id: i64 },
    /// Shipped; the shipping method instance selects the source location
    Delivery {
        #[serde(default)]
        shipping_method_instance: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Order {
    pub id: String,
    pub lines: Vec<OrderLine>,
    pub fulfillment: Fulfillment,
}

/// Maps fulfillment methods to locations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderRoutingPolicy {
    pub default_distribution_center_id: Option<i64>,
    pub shipping_method_locations: HashMap<String, i64>,
}

impl From<&OrderSyncConfig> for OrderRoutingPolicy {
    fn from(cfg: &OrderSyncConfig) -> Self {
        Self {
            default_distribution_center_id: cfg.default_distribution_center_id,
            shipping_method_locations: cfg.shipping_method_locations.clone(),
        }
    }
}

impl OrderRoutingPolicy {
    /// The location implied by the fulfillment method, if any
    pub fn resolve(&self, fulfillment: &Fulfillment) -> Option<i64> {
        match fulfillment {
            Fulfillment::Pickup { store_id } => Some(*store_id),
            Fulfillment::Delivery {
                shipping_method_instance,
            } => shipping_method_instance
                .as_deref()
                .and_then(|instance| self.shipping_method_locations.get(instance).copied())
                .or(self.default_distribution_center_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OrderSyncOutcome {
    Applied {
        #[serde(skip_serializing_if = "Option::is_none")]
        location_id: Option<i64>,
        entries: Vec<DeltaOutcome>,
        reindexed_items: Vec<i64>,
    },
    /// The flag was already set; nothing was done
    AlreadyProcessed,
    /// A restore for an order whose stock was never reduced; nothing was done
    NotReduced,
    /// No fulfilling location could be determined; nothing was recorded
    Unresolved { warning: String },
}

#[derive(Clone)]
pub struct OrderStockSync {
    db: Arc<DatabaseConnection>,
    reindexer: Reindexer,
    ledger: StockLedger,
    event_sender: EventSender,
    routing: OrderRoutingPolicy,
}

impl OrderStockSync {
    pub fn new(
        db: Arc<DatabaseConnection>,
        ledger: StockLedger,
        reindexer: Reindexer,
        event_sender: EventSender,
        routing: OrderRoutingPolicy,
    ) -> Self {
        Self {
            db,
            reindexer,
            ledger,
            event_sender,
            routing,
        }
    }

    /// Reduces stock for every line at the fulfilling location, exactly once per order
    #[instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn on_order_fulfilled(&self, order: &Order) -> Result<OrderSyncOutcome, ServiceError> {
        let location_id = match self.resolve_location(order).await? {
            Ok(location_id) => location_id,
            Err(warning) => return Ok(self.unresolved(order, warning)),
        };

        let order_id = order.id.clone();
        let lines: Vec<OrderLine> = order
            .lines
            .iter()
            .filter(|line| line.quantity > 0)
            .cloned()
            .collect();

        let entries = in_transaction(self.db.as_ref(), move |txn| {
            Box::pin(async move {
                if !claim_flag(txn, &order_id, KIND_REDUCED).await? {
                    return Ok(None);
                }
                let mut entries = Vec::with_capacity(lines.len());
                for line in lines {
                    let request =
                        DeltaRequest::new(line.item_id, location_id, -line.quantity, SOURCE_ORDER_REDUCE)
                            .who("order_sync")
                            .order_reference(order_id.clone())
                            .meta(json!({ "ordered_quantity": line.quantity }));
                    entries.push(StockLedger::apply_on(txn, request).await?);
                }
                Ok(Some(entries))
            })
        })
        .await?;

        let Some(entries) = entries else {
            info!(order_id = %order.id, "order already reduced; skipping");
            counter!("stockledger.order_sync.duplicate", 1, "kind" => KIND_REDUCED);
            return Ok(OrderSyncOutcome::AlreadyProcessed);
        };

        self.ledger.publish_effects(&entries).await;
        let reindexed_items = self.reindex_touched(&entries).await;
        self.event_sender.publish(Event::OrderStockReduced {
            order_id: order.id.clone(),
            location_id,
            items: reindexed_items.len(),
        });
        info!(order_id = %order.id, location_id, lines = entries.len(), "order stock reduced");

        Ok(OrderSyncOutcome::Applied {
            location_id: Some(location_id),
            entries,
            reindexed_items,
        })
    }

    /// Puts back what the order took, exactly once per order.
    ///
    /// Only recorded reductions are replayed, at the locations they hit. An
    /// order that was never reduced restores nothing and leaves no flag, so a
    /// later fulfil and cancel still work.
    #[instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn on_order_cancelled_or_refunded(
        &self,
        order: &Order,
    ) -> Result<OrderSyncOutcome, ServiceError> {
        let order_id = order.id.clone();
        let restore = in_transaction(self.db.as_ref(), move |txn| {
            Box::pin(async move {
                let flag_key = (order_id.clone(), KIND_REDUCED.to_string());
                let reduced = OrderStockFlag::find_by_id(flag_key)
                    .one(txn)
                    .await
                    .map_err(ServiceError::db_error)?
                    .is_some();
                if !reduced {
                    return Ok(Restore::NotReduced);
                }

                let reductions =
                    StockLedger::entries_for_order_on(txn, &order_id, SOURCE_ORDER_REDUCE).await?;
                if !claim_flag(txn, &order_id, KIND_RESTORED).await? {
                    return Ok(Restore::AlreadyRestored);
                }

                let mut entries = Vec::with_capacity(reductions.len());
                for reduction in reductions.into_iter().filter(|entry| entry.delta < 0) {
                    let quantity = reduction.delta.saturating_neg();
                    let request = DeltaRequest::new(
                        reduction.item_id,
                        reduction.location_id,
                        quantity,
                        SOURCE_ORDER_RESTORE,
                    )
                    .who("order_sync")
                    .order_reference(order_id.clone())
                    .meta(json!({ "restored_quantity": quantity }));
                    entries.push(StockLedger::apply_on(txn, request).await?);
                }
                Ok(Restore::Applied(entries))
            })
        })
        .await?;

        let entries = match restore {
            Restore::Applied(entries) => entries,
            Restore::AlreadyRestored => {
                info!(order_id = %order.id, "order already restored; skipping");
                counter!("stockledger.order_sync.duplicate", 1, "kind" => KIND_RESTORED);
                return Ok(OrderSyncOutcome::AlreadyProcessed);
            }
            Restore::NotReduced => {
                info!(order_id = %order.id, "order was never reduced; nothing to restore");
                counter!("stockledger.order_sync.not_reduced", 1);
                return Ok(OrderSyncOutcome::NotReduced);
            }
        };

        self.ledger.publish_effects(&entries).await;
        let reindexed_items = self.reindex_touched(&entries).await;
        self.event_sender.publish(Event::OrderStockRestored {
            order_id: order.id.clone(),
            items: reindexed_items.len(),
        });
        info!(order_id = %order.id, lines = entries.len(), "order stock restored");

        Ok(OrderSyncOutcome::Applied {
            location_id: None,
            entries,
            reindexed_items,
        })
    }

    /// `Ok(Err(warning))` when no known location can be determined
    async fn resolve_location(&self, order: &Order) -> Result<Result<i64, String>, ServiceError> {
        let Some(location_id) = self.routing.resolve(&order.fulfillment) else {
            return Ok(Err(format!(
                "order {} has no resolvable fulfillment location",
                order.id
            )));
        };

        let known = StockLocation::find_by_id(location_id)
            .one(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)?
            .is_some();
        if known {
            Ok(Ok(location_id))
        } else {
            Ok(Err(format!(
                "order {} resolves to unknown location {}",
                order.id, location_id
            )))
        }
    }

    fn unresolved(&self, order: &Order, warning: String) -> OrderSyncOutcome {
        warn!(order_id = %order.id, %warning, "order stock not synced");
        counter!("stockledger.order_sync.unresolved", 1);
        OrderSyncOutcome::Unresolved { warning }
    }

    /// Reindexes each distinct item once. Failures are logged: the stock
    /// change has committed and the snapshot can be rebuilt later.
    async fn reindex_touched(&self, entries: &[DeltaOutcome]) -> Vec<i64> {
        let items: BTreeSet<i64> = entries.iter().map(|entry| entry.item_id).collect();
        for item_id in &items {
            if let Err(e) = self.reindexer.reindex(*item_id).await {
                warn!(item_id, error = %e, "reindex after order sync failed");
            }
        }
        items.into_iter().collect()
    }
}

enum Restore {
    Applied(Vec<DeltaOutcome>),
    AlreadyRestored,
    NotReduced,
}

/// Atomically claims a lifecycle flag. Returns false if it was already set.
async fn claim_flag<C: ConnectionTrait>(
    conn: &C,
    order_id: &str,
    kind: &str,
) -> Result<bool, ServiceError> {
    let flag = order_stock_flag::ActiveModel {
        order_id: Set(order_id.to_string()),
        kind: Set(kind.to_string()),
        created_at: Set(Utc::now()),
    };
    let rows = OrderStockFlag::insert(flag)
        .on_conflict(
            OnConflict::columns([
                order_stock_flag::Column::OrderId,
                order_stock_flag::Column::Kind,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec_without_returning(conn)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(rows == 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routing() -> OrderRoutingPolicy {
        OrderRoutingPolicy {
            default_distribution_center_id: Some(100),
            shipping_method_locations: HashMap::from([("flat_rate:3".to_string(), 7)]),
        }
    }

    #[test]
    fn pickup_uses_selected_store() {
        assert_eq!(routing().resolve(&Fulfillment::Pickup { store_id: 4 }), Some(4));
    }

    #[test]
    fn delivery_uses_mapping_then_default_center() {
        let policy = routing();
        assert_eq!(
            policy.resolve(&Fulfillment::Delivery {
                shipping_method_instance: Some("flat_rate:3".into())
            }),
            Some(7)
        );
        assert_eq!(
            policy.resolve(&Fulfillment::Delivery {
                shipping_method_instance: Some("free_shipping:1".into())
            }),
            Some(100)
        );
        assert_eq!(
            policy.resolve(&Fulfillment::Delivery {
                shipping_method_instance: None
            }),
            Some(100)
        );
    }

    #[test]
    fn delivery_without_any_mapping_is_unresolved() {
        let policy = OrderRoutingPolicy::default();
        assert_eq!(
            policy.resolve(&Fulfillment::Delivery {
                shipping_method_instance: Some("flat_rate:3".into())
            }),
            None
        );
    }

    #[test]
    fn fulfillment_wire_format() {
        let order: Order = serde_json::from_value(json!({
            "id": "1001",
            "lines": [{ "item_id": 5, "quantity": 2 }],
            "fulfillment": { "method": "pickup", "store_id": 3 }
        }))
        .unwrap();
        assert_eq!(order.fulfillment, Fulfillment::Pickup { store_id: 3 });
    }
}
