use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Publishes without waiting. Stock writes have already committed by the
    /// time events go out, so a full or closed channel only drops the event.
    pub fn publish(&self, event: Event) {
        if let Err(e) = self.sender.try_send(event) {
            warn!(error = %e, "Dropping domain event");
            metrics::counter!("stockledger.events.dropped", 1);
        }
    }
}

/// Domain events raised after stock state has changed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    StockAdjusted {
        item_id: i64,
        location_id: i64,
        delta: i64,
        quantity_before: i64,
        quantity_after: i64,
        source: String,
    },
    LowStock {
        item_id: i64,
        location_id: i64,
        quantity: i64,
        threshold: i64,
    },
    OrderStockReduced {
        order_id: String,
        location_id: i64,
        items: usize,
    },
    OrderStockRestored {
        order_id: String,
        items: usize,
    },
    GlobalUpdateApplied {
        item_id: i64,
        strategy: String,
        requested_total: i64,
        total_after: i64,
    },
    BackfillFinished {
        inserted: u64,
        batches: u64,
        cancelled: bool,
        finished_at: DateTime<Utc>,
    },
}

/// Drains the event channel, logging each event
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::StockAdjusted {
                item_id,
                location_id,
                delta,
                quantity_after,
                source,
                ..
            } => {
                info!(item_id, location_id, delta, quantity_after, %source, "stock adjusted");
            }
            Event::LowStock {
                item_id,
                location_id,
                quantity,
                threshold,
            } => {
                warn!(item_id, location_id, quantity, threshold, "stock at or below threshold");
            }
            Event::OrderStockReduced {
                order_id,
                location_id,
                items,
            } => {
                info!(%order_id, location_id, items, "order stock reduced");
            }
            Event::OrderStockRestored { order_id, items } => {
                info!(%order_id, items, "order stock restored");
            }
            Event::GlobalUpdateApplied {
                item_id,
                strategy,
                requested_total,
                total_after,
            } => {
                info!(item_id, %strategy, requested_total, total_after, "global update applied");
            }
            Event::BackfillFinished {
                inserted,
                batches,
                cancelled,
                ..
            } => {
                info!(inserted, batches, cancelled, "backfill finished");
            }
        }
    }

    info!("Event processing loop stopped");
}
