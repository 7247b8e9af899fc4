use crate::{
    entities::{
        catalog_item::Entity as CatalogItem,
        stock_ledger_entry::{self, Entity as StockLedgerEntry},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{in_transaction, location_stock::LocationStockStore},
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

/// Largest magnitude a single delta may have
pub const MAX_DELTA: i64 = 1_000_000_000_000;

/// One signed change to apply at a single location
#[derive(Debug, Clone)]
pub struct DeltaRequest {
    pub item_id: i64,
    pub location_id: i64,
    pub delta: i64,
    pub source: String,
    pub who: Option<String>,
    pub order_reference: Option<String>,
    pub meta: Option<serde_json::Value>,
}

impl DeltaRequest {
    pub fn new(item_id: i64, location_id: i64, delta: i64, source: impl Into<String>) -> Self {
        Self {
            item_id,
            location_id,
            delta,
            source: source.into(),
            who: None,
            order_reference: None,
            meta: None,
        }
    }

    pub fn who(mut self, who: impl Into<String>) -> Self {
        self.who = Some(who.into());
        self
    }

    pub fn order_reference(mut self, reference: impl Into<String>) -> Self {
        self.order_reference = Some(reference.into());
        self
    }

    pub fn meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// Result of a single apply. `applied` is false for zero deltas, which
/// report current state without writing a ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct DeltaOutcome {
    pub item_id: i64,
    pub location_id: i64,
    pub delta: i64,
    pub quantity_before: i64,
    pub quantity_after: i64,
    pub applied: bool,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger_entry_id: Option<i64>,
    #[serde(skip)]
    pub(crate) row_threshold: Option<i64>,
}

impl DeltaOutcome {
    /// True when the requested delta would have gone below zero
    pub fn clamped(&self) -> bool {
        self.applied && self.quantity_after != self.quantity_before.saturating_add(self.delta)
    }
}

/// Best-effort `quantity_before` for the audit trail.
///
/// A positive result pins the previous value exactly (`after - delta`). A
/// result of zero may have been clamped, so the pre-read is used, bounded to
/// the range of values that clamp to zero under `delta`.
pub fn derive_quantity_before(pre_read: i64, after: i64, delta: i64) -> i64 {
    if after > 0 {
        after.saturating_sub(delta).max(0)
    } else {
        let upper = delta.checked_neg().unwrap_or(i64::MAX).max(0);
        pre_read.clamp(0, upper)
    }
}

/// A location crosses into low stock when it moves from above the
/// threshold to at-or-below it.
pub fn crossed_low_stock(before: i64, after: i64, threshold: i64) -> bool {
    before > threshold && after <= threshold
}

#[derive(Clone)]
pub struct StockLedger {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    default_low_stock_threshold: i64,
}

impl StockLedger {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        default_low_stock_threshold: i64,
    ) -> Self {
        Self {
            db,
            event_sender,
            default_low_stock_threshold,
        }
    }

    /// Applies one delta: increment and ledger entry commit together or not at all.
    ///
    /// There is no idempotency here. Calling twice applies twice.
    #[instrument(skip(self, request), fields(item_id = request.item_id, location_id = request.location_id, delta = request.delta, source = %request.source))]
    pub async fn apply_delta(&self, request: DeltaRequest) -> Result<DeltaOutcome, ServiceError> {
        let outcome = in_transaction(self.db.as_ref(), move |txn| {
            Box::pin(async move { Self::apply_on(txn, request).await })
        })
        .await?;

        self.publish_effects(std::slice::from_ref(&outcome)).await;
        Ok(outcome)
    }

    /// Applies one delta on an existing connection or transaction. Callers
    /// batching several applies with other writes use this and then call
    /// [`StockLedger::publish_effects`] after commit.
    pub async fn apply_on<C: ConnectionTrait>(
        conn: &C,
        request: DeltaRequest,
    ) -> Result<DeltaOutcome, ServiceError> {
        if request.delta.unsigned_abs() > MAX_DELTA.unsigned_abs() {
            return Err(ServiceError::ValidationError(format!(
                "delta must be between -{0} and {0}",
                MAX_DELTA
            )));
        }

        let pre = LocationStockStore::row_on(conn, request.item_id, request.location_id).await?;
        let pre_quantity = pre.as_ref().map(|row| row.quantity).unwrap_or(0);

        if request.delta == 0 {
            return Ok(DeltaOutcome {
                item_id: request.item_id,
                location_id: request.location_id,
                delta: 0,
                quantity_before: pre_quantity,
                quantity_after: pre_quantity,
                applied: false,
                source: request.source,
                ledger_entry_id: None,
                row_threshold: pre.and_then(|row| row.low_stock_threshold),
            });
        }

        LocationStockStore::increment_on(conn, request.item_id, request.location_id, request.delta)
            .await?;

        let post = LocationStockStore::row_on(conn, request.item_id, request.location_id)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "stock row for item {} at location {} missing after upsert",
                    request.item_id, request.location_id
                ))
            })?;

        let quantity_after = post.quantity;
        let quantity_before = derive_quantity_before(pre_quantity, quantity_after, request.delta);

        let entry = stock_ledger_entry::ActiveModel {
            item_id: Set(request.item_id),
            location_id: Set(request.location_id),
            delta: Set(request.delta),
            quantity_before: Set(quantity_before),
            quantity_after: Set(quantity_after),
            source: Set(request.source.clone()),
            who: Set(request.who),
            order_reference: Set(request.order_reference),
            meta: Set(request.meta),
            created_at: Set(Utc::now()),
            ..Default::default()
        };
        let inserted = StockLedgerEntry::insert(entry)
            .exec(conn)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(DeltaOutcome {
            item_id: request.item_id,
            location_id: request.location_id,
            delta: request.delta,
            quantity_before,
            quantity_after,
            applied: true,
            source: request.source,
            ledger_entry_id: Some(inserted.last_insert_id),
            row_threshold: post.low_stock_threshold,
        })
    }

    /// Emits metrics and domain events for committed outcomes. Never fails:
    /// the stock change has already happened.
    pub async fn publish_effects(&self, outcomes: &[DeltaOutcome]) {
        let mut item_thresholds: HashMap<i64, Option<i64>> = HashMap::new();

        for outcome in outcomes.iter().filter(|o| o.applied) {
            counter!("stockledger.delta.applied", 1, "source" => outcome.source.clone());
            if outcome.clamped() {
                counter!("stockledger.delta.clamped", 1);
                warn!(
                    item_id = outcome.item_id,
                    location_id = outcome.location_id,
                    delta = outcome.delta,
                    quantity_before = outcome.quantity_before,
                    "delta clamped at zero"
                );
            }
            info!(
                item_id = outcome.item_id,
                location_id = outcome.location_id,
                delta = outcome.delta,
                quantity_after = outcome.quantity_after,
                source = %outcome.source,
                "delta applied"
            );

            self.event_sender.publish(Event::StockAdjusted {
                item_id: outcome.item_id,
                location_id: outcome.location_id,
                delta: outcome.delta,
                quantity_before: outcome.quantity_before,
                quantity_after: outcome.quantity_after,
                source: outcome.source.clone(),
            });

            if outcome.delta >= 0 {
                continue;
            }

            let threshold = match outcome.row_threshold {
                Some(threshold) => threshold,
                None => {
                    let item_threshold = match item_thresholds.get(&outcome.item_id) {
                        Some(cached) => *cached,
                        None => {
                            let looked_up = self.item_threshold(outcome.item_id).await;
                            item_thresholds.insert(outcome.item_id, looked_up);
                            looked_up
                        }
                    };
                    item_threshold.unwrap_or(self.default_low_stock_threshold)
                }
            };

            if crossed_low_stock(outcome.quantity_before, outcome.quantity_after, threshold) {
                counter!("stockledger.low_stock", 1);
                self.event_sender.publish(Event::LowStock {
                    item_id: outcome.item_id,
                    location_id: outcome.location_id,
                    quantity: outcome.quantity_after,
                    threshold,
                });
            }
        }
    }

    async fn item_threshold(&self, item_id: i64) -> Option<i64> {
        match CatalogItem::find_by_id(item_id).one(self.db.as_ref()).await {
            Ok(item) => item.and_then(|item| item.low_stock_threshold),
            Err(e) => {
                warn!(item_id, error = %e, "could not load item threshold");
                None
            }
        }
    }

    /// Ledger entries for an item, newest first
    pub async fn history(
        &self,
        item_id: i64,
        location_id: Option<i64>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<stock_ledger_entry::Model>, u64), ServiceError> {
        let mut query =
            StockLedgerEntry::find().filter(stock_ledger_entry::Column::ItemId.eq(item_id));
        if let Some(location_id) = location_id {
            query = query.filter(stock_ledger_entry::Column::LocationId.eq(location_id));
        }

        let paginator = query
            .order_by_desc(stock_ledger_entry::Column::Id)
            .paginate(self.db.as_ref(), per_page.max(1));
        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let entries = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::db_error)?;

        Ok((entries, total))
    }

    /// Entries written for an order under a given source, oldest first
    pub async fn entries_for_order_on<C: ConnectionTrait>(
        conn: &C,
        order_reference: &str,
        source: &str,
    ) -> Result<Vec<stock_ledger_entry::Model>, ServiceError> {
        StockLedgerEntry::find()
            .filter(stock_ledger_entry::Column::OrderReference.eq(order_reference))
            .filter(stock_ledger_entry::Column::Source.eq(source))
            .order_by_asc(stock_ledger_entry::Column::Id)
            .all(conn)
            .await
            .map_err(ServiceError::db_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn before_is_exact_when_result_is_positive() {
        assert_eq!(derive_quantity_before(0, 50, 50), 0);
        assert_eq!(derive_quantity_before(99, 45, -5), 50);
    }

    #[test]
    fn before_is_bounded_when_result_clamped() {
        // 3 on hand, -5 requested: clamps to zero
        assert_eq!(derive_quantity_before(3, 0, -5), 3);
        // a stale pre-read can never exceed what clamps to zero
        assert_eq!(derive_quantity_before(12, 0, -5), 5);
        assert_eq!(derive_quantity_before(-1, 0, -5), 0);
    }

    #[test]
    fn low_stock_crossing_is_edge_triggered() {
        assert!(crossed_low_stock(5, 2, 2));
        assert!(crossed_low_stock(3, 0, 2));
        assert!(!crossed_low_stock(2, 1, 2));
        assert!(!crossed_low_stock(10, 3, 2));
    }

    #[test]
    fn clamped_outcome_is_detected() {
        let outcome = DeltaOutcome {
            item_id: 1,
            location_id: 1,
            delta: -5,
            quantity_before: 3,
            quantity_after: 0,
            applied: true,
            source: "order_reduce".into(),
            ledger_entry_id: Some(1),
            row_threshold: None,
        };
        assert!(outcome.clamped());
        assert!(!DeltaOutcome {
            quantity_before: 8,
            quantity_after: 3,
            ..outcome
        }
        .clamped());
    }

    #[test]
    fn extreme_deltas_do_not_overflow() {
        assert_eq!(derive_quantity_before(5, 0, i64::MIN), 5);
        assert_eq!(derive_quantity_before(5, 1, i64::MIN), i64::MAX);
        assert_eq!(derive_quantity_before(0, i64::MAX, i64::MAX), 0);

        let outcome = DeltaOutcome {
            item_id: 1,
            location_id: 1,
            delta: i64::MIN,
            quantity_before: 5,
            quantity_after: 0,
            applied: true,
            source: "test".into(),
            ledger_entry_id: None,
            row_threshold: None,
        };
        assert!(outcome.clamped());
        assert!(!DeltaOutcome {
            delta: i64::MAX,
            quantity_before: 1,
            quantity_after: i64::MAX,
            ..outcome
        }
        .clamped());
    }

    proptest! {
        #[test]
        fn derived_before_never_panics(pre in any::<i64>(), after in 0i64.., delta in any::<i64>()) {
            prop_assert!(derive_quantity_before(pre, after, delta) >= 0);
        }

        #[test]
        fn derived_before_reproduces_after(before in 0i64..10_000, delta in -20_000i64..20_000) {
            let after = (before + delta).max(0);
            let derived = derive_quantity_before(before, after, delta);
            prop_assert!(derived >= 0);
            prop_assert_eq!((derived + delta).max(0), after);
        }
    }
}
