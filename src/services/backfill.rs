//! Zero-row backfill.
//!
//! Guarantees every active item has a row at every published location so a
//! missing row always means zero. Each batch re-queries what is still
//! missing, so an aborted or cancelled scan resumes by running again.
//! Single-flight is enforced through a time-bounded row in `job_locks`,
//! which also carries cancellation requests across processes.

use crate::{
    entities::{
        catalog_item::{self, Entity as CatalogItem},
        job_lock::{self, Entity as JobLock},
        location_stock::{self, Entity as LocationStock},
        stock_location::{self, Entity as StockLocation},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use sea_orm::{
    sea_query::{Expr, OnConflict, Query},
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

pub const BACKFILL_LOCK: &str = "stock_backfill";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BackfillOutcome {
    Completed { inserted: u64, batches: u64 },
    Cancelled { inserted: u64, batches: u64 },
    /// Another scan holds the lock; nothing was done
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BackfillStatus {
    Idle,
    Running {
        owner: String,
        started_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },
    Cancelling {
        owner: String,
        started_at: DateTime<Utc>,
    },
}

#[derive(Clone)]
pub struct BackfillScanner {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    lock_ttl: Duration,
}

impl BackfillScanner {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender, lock_ttl_secs: u64) -> Self {
        let lock_ttl = Duration::seconds(lock_ttl_secs.min(86_400) as i64);
        Self {
            db,
            event_sender,
            lock_ttl,
        }
    }

    /// Runs one full scan across all published locations.
    #[instrument(skip(self))]
    pub async fn run(&self, batch_size: u64) -> Result<BackfillOutcome, ServiceError> {
        if batch_size == 0 {
            return Err(ServiceError::ValidationError(
                "batch_size must be at least 1".to_string(),
            ));
        }

        let owner = Uuid::new_v4().to_string();
        if !self.acquire_lock(&owner).await? {
            info!("backfill already running; skipping");
            return Ok(BackfillOutcome::AlreadyRunning);
        }

        let result = self.scan(&owner, batch_size).await;

        if let Err(e) = self.release_lock(&owner).await {
            error!(error = %e, "failed to release backfill lock; it will expire");
        }

        match result {
            Ok(outcome) => {
                let (inserted, batches, cancelled) = match &outcome {
                    BackfillOutcome::Completed { inserted, batches } => (*inserted, *batches, false),
                    BackfillOutcome::Cancelled { inserted, batches } => (*inserted, *batches, true),
                    BackfillOutcome::AlreadyRunning => (0, 0, false),
                };
                info!(inserted, batches, cancelled, "backfill finished");
                self.event_sender.publish(Event::BackfillFinished {
                    inserted,
                    batches,
                    cancelled,
                    finished_at: Utc::now(),
                });
                Ok(outcome)
            }
            Err(e) => {
                error!(error = %e, "backfill batch failed; scan aborted");
                Err(e)
            }
        }
    }

    async fn scan(&self, owner: &str, batch_size: u64) -> Result<BackfillOutcome, ServiceError> {
        let db = self.db.as_ref();
        let location_ids: Vec<i64> = StockLocation::find()
            .select_only()
            .column(stock_location::Column::Id)
            .filter(stock_location::Column::Published.eq(true))
            .order_by_asc(stock_location::Column::Id)
            .into_tuple()
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut inserted = 0u64;
        let mut batches = 0u64;

        for location_id in location_ids {
            loop {
                if self.cancel_requested(owner).await? {
                    info!(inserted, batches, "backfill cancelled between batches");
                    return Ok(BackfillOutcome::Cancelled { inserted, batches });
                }

                let missing = self.missing_items(location_id, batch_size).await?;
                if missing.is_empty() {
                    break;
                }

                let rows = self.insert_zero_rows(location_id, &missing).await?;
                inserted += rows;
                batches += 1;
                counter!("stockledger.backfill.rows_inserted", rows);
                info!(location_id, candidates = missing.len(), rows, "backfill batch inserted");

                self.refresh_lock(owner).await?;

                // Rows created concurrently by live deltas are skipped by the
                // insert; the re-query then no longer returns them.
                if (missing.len() as u64) < batch_size {
                    break;
                }
            }
        }

        Ok(BackfillOutcome::Completed { inserted, batches })
    }

    /// Active items without a row at the location, lowest ids first
    async fn missing_items(&self, location_id: i64, limit: u64) -> Result<Vec<i64>, ServiceError> {
        let has_row = Query::select()
            .expr(Expr::val(1))
            .from(LocationStock)
            .and_where(
                Expr::col((LocationStock, location_stock::Column::ItemId))
                    .equals((CatalogItem, catalog_item::Column::Id)),
            )
            .and_where(Expr::col((LocationStock, location_stock::Column::LocationId)).eq(location_id))
            .to_owned();

        CatalogItem::find()
            .select_only()
            .column(catalog_item::Column::Id)
            .filter(catalog_item::Column::Active.eq(true))
            .filter(Expr::exists(has_row).not())
            .order_by_asc(catalog_item::Column::Id)
            .limit(limit)
            .into_tuple()
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    async fn insert_zero_rows(&self, location_id: i64, item_ids: &[i64]) -> Result<u64, ServiceError> {
        let now = Utc::now();
        let rows = item_ids.iter().map(|item_id| location_stock::ActiveModel {
            item_id: Set(*item_id),
            location_id: Set(location_id),
            quantity: Set(0),
            low_stock_threshold: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        });

        LocationStock::insert_many(rows)
            .on_conflict(
                OnConflict::columns([
                    location_stock::Column::ItemId,
                    location_stock::Column::LocationId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    async fn acquire_lock(&self, owner: &str) -> Result<bool, ServiceError> {
        let db = self.db.as_ref();
        let now = Utc::now();

        JobLock::delete_many()
            .filter(job_lock::Column::Name.eq(BACKFILL_LOCK))
            .filter(job_lock::Column::ExpiresAt.lt(now))
            .exec(db)
            .await
            .map_err(ServiceError::db_error)?;

        let lock = job_lock::ActiveModel {
            name: Set(BACKFILL_LOCK.to_string()),
            owner: Set(owner.to_string()),
            acquired_at: Set(now),
            expires_at: Set(now + self.lock_ttl),
            cancel_requested: Set(false),
        };
        let rows = JobLock::insert(lock)
            .on_conflict(
                OnConflict::column(job_lock::Column::Name)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(db)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(rows == 1)
    }

    async fn refresh_lock(&self, owner: &str) -> Result<(), ServiceError> {
        let result = JobLock::update_many()
            .col_expr(
                job_lock::Column::ExpiresAt,
                Expr::value(Utc::now() + self.lock_ttl),
            )
            .filter(job_lock::Column::Name.eq(BACKFILL_LOCK))
            .filter(job_lock::Column::Owner.eq(owner))
            .exec(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)?;

        if result.rows_affected == 0 {
            warn!(owner, "backfill lock lost to another scan");
            return Err(ServiceError::Conflict(
                "backfill lock expired and was taken over".to_string(),
            ));
        }
        Ok(())
    }

    async fn release_lock(&self, owner: &str) -> Result<(), ServiceError> {
        JobLock::delete_many()
            .filter(job_lock::Column::Name.eq(BACKFILL_LOCK))
            .filter(job_lock::Column::Owner.eq(owner))
            .exec(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)?;
        Ok(())
    }

    async fn cancel_requested(&self, owner: &str) -> Result<bool, ServiceError> {
        Ok(JobLock::find_by_id(BACKFILL_LOCK.to_string())
            .one(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)?
            .map(|lock| lock.owner == owner && lock.cancel_requested)
            .unwrap_or(false))
    }

    /// Asks a running scan to stop after its current batch. Returns whether
    /// a live scan was signalled.
    pub async fn cancel(&self) -> Result<bool, ServiceError> {
        let result = JobLock::update_many()
            .col_expr(job_lock::Column::CancelRequested, Expr::value(true))
            .filter(job_lock::Column::Name.eq(BACKFILL_LOCK))
            .filter(job_lock::Column::ExpiresAt.gte(Utc::now()))
            .exec(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)?;
        Ok(result.rows_affected > 0)
    }

    pub async fn status(&self) -> Result<BackfillStatus, ServiceError> {
        let lock = JobLock::find_by_id(BACKFILL_LOCK.to_string())
            .one(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)?;

        Ok(match lock {
            Some(lock) if lock.expires_at >= Utc::now() => {
                if lock.cancel_requested {
                    BackfillStatus::Cancelling {
                        owner: lock.owner,
                        started_at: lock.acquired_at,
                    }
                } else {
                    BackfillStatus::Running {
                        owner: lock.owner,
                        started_at: lock.acquired_at,
                        expires_at: lock.expires_at,
                    }
                }
            }
            _ => BackfillStatus::Idle,
        })
    }
}
