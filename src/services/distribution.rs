//! Global-quantity distribution.
//!
//! An external system says "this item now has N units in total"; the engine
//! turns that into per-location deltas under a [`DistributionPolicy`] and
//! submits them through the ledger one by one. Planning is pure and works on
//! a snapshot of balances. Applying is not atomic across locations: a
//! concurrent order between snapshot and apply only skews proportions, since
//! each individual delta is still applied atomically.

use crate::{
    config::DistributionConfig,
    entities::stock_location::{self, Entity as StockLocation},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        location_stock::LocationStockStore,
        reindex::{ItemStockSummary, Reindexer},
        stock_ledger::{DeltaOutcome, DeltaRequest, StockLedger},
    },
};
use metrics::{counter, histogram};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QuerySelect};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use strum::{AsRefStr, Display, EnumString};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

pub const SOURCE_CD_OVERWRITE: &str = "erp_cd_global_overwrite";
pub const SOURCE_CD_DELTA: &str = "erp_cd_global_delta";
pub const SOURCE_PROPORTIONAL: &str = "erp_proportional";
pub const SOURCE_OVERWRITE_ALL: &str = "erp_overwrite_all";
pub const SOURCE_NEGATIVE_FALLBACK: &str = "erp_negative_fallback";

/// Largest total quantity a global update may request
pub const MAX_REQUESTED_TOTAL: i64 = 1_000_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema, Display, EnumString, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Strategy {
    /// Set the default location so it alone absorbs the difference to its own balance
    DefaultLocationOverwrite,
    /// Move the difference between requested and current totals into or out of the default location
    DefaultLocationDelta,
    /// Scale every holding location to its current share of the requested total
    Proportional,
    /// Zero every other location and put the whole total at the default location
    OverwriteAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum GlobalUpdateMode {
    Apply,
    Ignore,
    Reject,
}

/// Typed distribution configuration, passed explicitly to every global update
#[derive(Debug, Clone, PartialEq)]
pub struct DistributionPolicy {
    pub strategy: Strategy,
    pub default_location_id: Option<i64>,
    pub negative_fallback: bool,
    pub weights: BTreeMap<i64, u32>,
    pub global_updates: GlobalUpdateMode,
    pub timeout: Duration,
}

impl Default for DistributionPolicy {
    fn default() -> Self {
        Self {
            strategy: Strategy::DefaultLocationOverwrite,
            default_location_id: None,
            negative_fallback: false,
            weights: BTreeMap::new(),
            global_updates: GlobalUpdateMode::Apply,
            timeout: Duration::from_secs(30),
        }
    }
}

impl TryFrom<&DistributionConfig> for DistributionPolicy {
    type Error = ServiceError;

    fn try_from(cfg: &DistributionConfig) -> Result<Self, Self::Error> {
        let strategy = cfg.strategy.parse::<Strategy>().map_err(|_| {
            ServiceError::PolicyError(format!("unknown distribution strategy '{}'", cfg.strategy))
        })?;
        let global_updates = cfg.global_updates.parse::<GlobalUpdateMode>().map_err(|_| {
            ServiceError::PolicyError(format!(
                "unknown global update mode '{}'",
                cfg.global_updates
            ))
        })?;
        let weights = cfg
            .weights
            .iter()
            .map(|(location, weight)| {
                location
                    .trim()
                    .parse::<i64>()
                    .map(|id| (id, *weight))
                    .map_err(|_| {
                        ServiceError::PolicyError(format!(
                            "weight key '{}' is not a location id",
                            location
                        ))
                    })
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        Ok(Self {
            strategy,
            default_location_id: cfg.default_location_id,
            negative_fallback: cfg.negative_fallback,
            weights,
            global_updates,
            timeout: Duration::from_secs(cfg.timeout_secs),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PlannedDelta {
    pub location_id: i64,
    pub delta: i64,
    #[schema(value_type = String)]
    pub source: &'static str,
    #[schema(value_type = Object)]
    pub meta: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct DistributionPlan {
    pub strategy: Strategy,
    pub requested_total: i64,
    pub previous_total: i64,
    pub deltas: Vec<PlannedDelta>,
    /// Units of a requested reduction that no location could absorb
    pub shortfall: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("no default location is configured")]
    DefaultLocationMissing,
    #[error("item has no locations to distribute across")]
    NoLocations,
    #[error("requested total must not be negative")]
    NegativeTotal,
}

/// Rounds `numerator / denominator` half away from zero. `denominator` > 0.
fn div_round(numerator: i128, denominator: i128) -> i128 {
    let quotient = numerator / denominator;
    let remainder = numerator % denominator;
    if remainder.abs() * 2 >= denominator {
        quotient + numerator.signum()
    } else {
        quotient
    }
}

fn saturate(value: i128) -> i64 {
    i64::try_from(value).unwrap_or(if value < 0 { i64::MIN } else { i64::MAX })
}

/// Splits `requested` evenly: floor per location, remainder one unit each to
/// the lowest location ids.
pub fn split_even(requested: i64, location_ids: &[i64]) -> BTreeMap<i64, i64> {
    let mut ids = location_ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    if ids.is_empty() {
        return BTreeMap::new();
    }
    let n = ids.len() as i64;
    let base = requested / n;
    let remainder = requested % n;
    ids.into_iter()
        .enumerate()
        .map(|(i, id)| (id, base + i64::from((i as i64) < remainder)))
        .collect()
}

/// Splits `requested` by weight: floor per location, remainder one unit each
/// to the lowest weighted location ids. Zero weights receive nothing.
pub fn split_weighted(requested: i64, weights: &BTreeMap<i64, u32>) -> BTreeMap<i64, i64> {
    let weight_sum: i128 = weights.values().map(|w| i128::from(*w)).sum();
    if weight_sum == 0 {
        return BTreeMap::new();
    }
    let mut split: BTreeMap<i64, i64> = weights
        .iter()
        .map(|(id, w)| (*id, saturate(i128::from(requested) * i128::from(*w) / weight_sum)))
        .collect();

    let mut remainder = i128::from(requested) - split.values().map(|q| i128::from(*q)).sum::<i128>();
    for (id, w) in weights {
        if remainder == 0 {
            break;
        }
        if *w > 0 {
            if let Some(q) = split.get_mut(id) {
                *q += 1;
                remainder -= 1;
            }
        }
    }
    split
}

/// Scales each holding location to `round(requested * current / total)`.
/// Rounding residue is settled one unit at a time in ascending location id
/// order, never taking a location below zero.
pub fn split_proportional(requested: i64, balances: &BTreeMap<i64, i64>) -> BTreeMap<i64, i64> {
    let holders: BTreeMap<i64, i64> = balances
        .iter()
        .filter(|(_, q)| **q > 0)
        .map(|(id, q)| (*id, *q))
        .collect();
    let total: i128 = holders.values().map(|q| i128::from(*q)).sum();
    if total == 0 {
        return BTreeMap::new();
    }

    let mut split: BTreeMap<i64, i64> = holders
        .iter()
        .map(|(id, q)| (*id, saturate(div_round(i128::from(requested) * i128::from(*q), total))))
        .collect();

    let mut residual =
        i128::from(requested) - split.values().map(|q| i128::from(*q)).sum::<i128>();
    while residual != 0 {
        let before = residual;
        for quantity in split.values_mut() {
            if residual > 0 && *quantity < i64::MAX {
                *quantity += 1;
                residual -= 1;
            } else if residual < 0 && *quantity > 0 {
                *quantity -= 1;
                residual += 1;
            }
            if residual == 0 {
                break;
            }
        }
        if residual == before {
            break;
        }
    }
    split
}

/// Computes the deltas a global update needs, without touching storage.
///
/// `balances` must contain every location the item can be distributed
/// across, including zero balances.
pub fn plan_distribution(
    policy: &DistributionPolicy,
    balances: &BTreeMap<i64, i64>,
    requested_total: i64,
) -> Result<DistributionPlan, PlanError> {
    if requested_total < 0 {
        return Err(PlanError::NegativeTotal);
    }
    let previous_sum: i128 = balances.values().map(|q| i128::from(*q)).sum();
    let previous_total = saturate(previous_sum);
    let base_meta = |extra: serde_json::Value| {
        let mut meta = json!({
            "strategy": policy.strategy.as_ref(),
            "requested_total": requested_total,
            "previous_total": previous_total,
        });
        if let (Some(target), serde_json::Value::Object(extra)) = (meta.as_object_mut(), extra) {
            target.extend(extra);
        }
        meta
    };

    let mut deltas = Vec::new();
    let mut shortfall = 0;

    match policy.strategy {
        Strategy::DefaultLocationOverwrite => {
            let default_id = policy
                .default_location_id
                .ok_or(PlanError::DefaultLocationMissing)?;
            let current = balances.get(&default_id).copied().unwrap_or(0);
            deltas.push(PlannedDelta {
                location_id: default_id,
                delta: requested_total.saturating_sub(current),
                source: SOURCE_CD_OVERWRITE,
                meta: base_meta(json!({ "previous_quantity": current })),
            });
        }
        Strategy::DefaultLocationDelta => {
            let default_id = policy
                .default_location_id
                .ok_or(PlanError::DefaultLocationMissing)?;
            let default_qty = balances.get(&default_id).copied().unwrap_or(0);
            let difference_wide = i128::from(requested_total) - previous_sum;
            let difference = saturate(difference_wide);

            if difference_wide >= 0 {
                deltas.push(PlannedDelta {
                    location_id: default_id,
                    delta: difference,
                    source: SOURCE_CD_DELTA,
                    meta: base_meta(json!({ "difference": difference })),
                });
            } else {
                let removal = -difference_wide;
                let from_default = saturate(removal.min(i128::from(default_qty.max(0))));
                if from_default > 0 {
                    deltas.push(PlannedDelta {
                        location_id: default_id,
                        delta: -from_default,
                        source: SOURCE_CD_DELTA,
                        meta: base_meta(json!({ "difference": difference })),
                    });
                }

                let mut remaining = removal - i128::from(from_default);
                if remaining > 0 && policy.negative_fallback {
                    let mut others: Vec<(i64, i64)> = balances
                        .iter()
                        .filter(|(id, q)| **id != default_id && **q > 0)
                        .map(|(id, q)| (*id, *q))
                        .collect();
                    // largest balance first, ties by ascending id
                    others.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

                    for (location_id, balance) in others {
                        if remaining == 0 {
                            break;
                        }
                        let take = saturate(remaining.min(i128::from(balance)));
                        remaining -= i128::from(take);
                        deltas.push(PlannedDelta {
                            location_id,
                            delta: -take,
                            source: SOURCE_NEGATIVE_FALLBACK,
                            meta: base_meta(json!({
                                "difference": difference,
                                "fallback_from": default_id,
                            })),
                        });
                    }
                }
                shortfall = saturate(remaining);
            }
        }
        Strategy::Proportional => {
            if balances.is_empty() {
                return Err(PlanError::NoLocations);
            }
            let (targets, basis) = if previous_total > 0 {
                (split_proportional(requested_total, balances), "current_share")
            } else {
                let weighted: BTreeMap<i64, u32> = policy
                    .weights
                    .iter()
                    .filter(|(id, w)| balances.contains_key(id) && **w > 0)
                    .map(|(id, w)| (*id, *w))
                    .collect();
                if weighted.is_empty() {
                    let ids: Vec<i64> = balances.keys().copied().collect();
                    (split_even(requested_total, &ids), "even")
                } else {
                    (split_weighted(requested_total, &weighted), "weights")
                }
            };

            for (location_id, current) in balances {
                let target = targets.get(location_id).copied().unwrap_or(0);
                let delta = target.saturating_sub(*current);
                if delta != 0 {
                    deltas.push(PlannedDelta {
                        location_id: *location_id,
                        delta,
                        source: SOURCE_PROPORTIONAL,
                        meta: base_meta(json!({
                            "basis": basis,
                            "previous_quantity": current,
                            "target_quantity": target,
                        })),
                    });
                }
            }
        }
        Strategy::OverwriteAll => {
            let default_id = policy
                .default_location_id
                .ok_or(PlanError::DefaultLocationMissing)?;
            for (location_id, current) in balances {
                if *location_id != default_id && *current > 0 {
                    deltas.push(PlannedDelta {
                        location_id: *location_id,
                        delta: current.saturating_neg(),
                        source: SOURCE_OVERWRITE_ALL,
                        meta: base_meta(json!({ "previous_quantity": current })),
                    });
                }
            }
            let current = balances.get(&default_id).copied().unwrap_or(0);
            deltas.push(PlannedDelta {
                location_id: default_id,
                delta: requested_total.saturating_sub(current),
                source: SOURCE_OVERWRITE_ALL,
                meta: base_meta(json!({ "previous_quantity": current })),
            });
        }
    }

    deltas.retain(|d| d.delta != 0);

    Ok(DistributionPlan {
        strategy: policy.strategy,
        requested_total,
        previous_total,
        deltas,
        shortfall,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GlobalUpdateOutcome {
    Applied {
        plan: DistributionPlan,
        applied: Vec<DeltaOutcome>,
        summary: ItemStockSummary,
    },
    /// Global updates are configured to be dropped silently
    Ignored { summary: ItemStockSummary },
    /// Policy could not be evaluated for this item; nothing was applied
    Skipped {
        reason: String,
        summary: ItemStockSummary,
    },
}

#[derive(Clone)]
pub struct DistributionEngine {
    db: Arc<DatabaseConnection>,
    ledger: StockLedger,
    reindexer: Reindexer,
    event_sender: EventSender,
}

impl DistributionEngine {
    pub fn new(
        db: Arc<DatabaseConnection>,
        ledger: StockLedger,
        reindexer: Reindexer,
        event_sender: EventSender,
    ) -> Self {
        Self {
            db,
            ledger,
            reindexer,
            event_sender,
        }
    }

    /// Evaluates a "set total quantity" request against `policy`.
    ///
    /// A timeout stops further applies; deltas already applied stay applied
    /// and reissuing the same request converges.
    #[instrument(skip(self, policy), fields(strategy = %policy.strategy))]
    pub async fn apply_global_update(
        &self,
        policy: &DistributionPolicy,
        item_id: i64,
        requested_total: i64,
        who: Option<String>,
    ) -> Result<GlobalUpdateOutcome, ServiceError> {
        if !(0..=MAX_REQUESTED_TOTAL).contains(&requested_total) {
            return Err(ServiceError::ValidationError(format!(
                "requested_total must be between 0 and {}",
                MAX_REQUESTED_TOTAL
            )));
        }

        match policy.global_updates {
            GlobalUpdateMode::Apply => {}
            GlobalUpdateMode::Ignore => {
                info!(item_id, requested_total, "global update ignored by policy");
                counter!("stockledger.global_update.ignored", 1);
                return Ok(GlobalUpdateOutcome::Ignored {
                    summary: self.reindexer.summary(item_id).await?,
                });
            }
            GlobalUpdateMode::Reject => {
                counter!("stockledger.global_update.rejected", 1);
                return Err(ServiceError::GlobalUpdateRejected(format!(
                    "global quantity updates are disabled; item {} was not changed",
                    item_id
                )));
            }
        }

        let started = Instant::now();
        let work = self.plan_and_apply(policy, item_id, requested_total, who);
        let result = match tokio::time::timeout(policy.timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                warn!(item_id, timeout = ?policy.timeout, "global update timed out; partially applied");
                counter!("stockledger.global_update.timeout", 1);
                if let Err(e) = self.reindexer.reindex(item_id).await {
                    warn!(item_id, error = %e, "reindex after timeout failed");
                }
                return Err(ServiceError::Timeout(format!(
                    "global update for item {} exceeded {:?}",
                    item_id, policy.timeout
                )));
            }
        };
        histogram!("stockledger.global_update.duration", started.elapsed());

        let outcome = match result? {
            Planned::Skipped(reason) => {
                warn!(item_id, %reason, "global update skipped");
                counter!("stockledger.global_update.skipped", 1);
                GlobalUpdateOutcome::Skipped {
                    reason,
                    summary: self.reindexer.reindex(item_id).await?,
                }
            }
            Planned::Applied { plan, applied } => {
                let summary = self.reindexer.reindex(item_id).await?;
                self.event_sender.publish(Event::GlobalUpdateApplied {
                    item_id,
                    strategy: plan.strategy.to_string(),
                    requested_total,
                    total_after: summary.total,
                });
                if plan.shortfall > 0 {
                    warn!(
                        item_id,
                        shortfall = plan.shortfall,
                        "reduction exceeded the default location balance and fallback is disabled"
                    );
                }
                GlobalUpdateOutcome::Applied {
                    plan,
                    applied,
                    summary,
                }
            }
        };

        Ok(outcome)
    }

    async fn plan_and_apply(
        &self,
        policy: &DistributionPolicy,
        item_id: i64,
        requested_total: i64,
        who: Option<String>,
    ) -> Result<Planned, ServiceError> {
        let balances = self.snapshot(item_id).await?;

        let plan = match plan_distribution(policy, &balances, requested_total) {
            Ok(plan) => plan,
            Err(PlanError::NegativeTotal) => {
                return Err(ServiceError::ValidationError(
                    PlanError::NegativeTotal.to_string(),
                ))
            }
            Err(e) => return Ok(Planned::Skipped(e.to_string())),
        };

        if let Some(default_id) = policy.default_location_id {
            if !balances.contains_key(&default_id)
                && !self.location_exists(default_id).await?
            {
                return Ok(Planned::Skipped(format!(
                    "default location {} does not exist",
                    default_id
                )));
            }
        }

        let mut applied = Vec::with_capacity(plan.deltas.len());
        for planned in &plan.deltas {
            let mut meta = planned.meta.clone();
            if plan.shortfall > 0 {
                if let Some(object) = meta.as_object_mut() {
                    object.insert("shortfall".to_string(), json!(plan.shortfall));
                }
            }
            let mut request =
                DeltaRequest::new(item_id, planned.location_id, planned.delta, planned.source)
                    .meta(meta);
            if let Some(who) = &who {
                request = request.who(who.clone());
            }
            applied.push(self.ledger.apply_delta(request).await?);
        }

        info!(
            item_id,
            requested_total,
            deltas = applied.len(),
            shortfall = plan.shortfall,
            "global update applied"
        );
        Ok(Planned::Applied { plan, applied })
    }

    /// Current balances plus every published location at zero
    async fn snapshot(&self, item_id: i64) -> Result<BTreeMap<i64, i64>, ServiceError> {
        let db = self.db.as_ref();
        let mut balances = LocationStockStore::get_all_on(db, item_id).await?;
        let published: Vec<i64> = StockLocation::find()
            .select_only()
            .column(stock_location::Column::Id)
            .filter(stock_location::Column::Published.eq(true))
            .into_tuple()
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        for location_id in published {
            balances.entry(location_id).or_insert(0);
        }
        Ok(balances)
    }

    async fn location_exists(&self, location_id: i64) -> Result<bool, ServiceError> {
        Ok(StockLocation::find_by_id(location_id)
            .one(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)?
            .is_some())
    }
}

enum Planned {
    Applied {
        plan: DistributionPlan,
        applied: Vec<DeltaOutcome>,
    },
    Skipped(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::Strategy;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    fn balances(pairs: &[(i64, i64)]) -> BTreeMap<i64, i64> {
        pairs.iter().copied().collect()
    }

    fn policy(strategy: Strategy, default_location_id: Option<i64>) -> DistributionPolicy {
        DistributionPolicy {
            strategy,
            default_location_id,
            ..Default::default()
        }
    }

    fn apply(plan: &DistributionPlan, start: &BTreeMap<i64, i64>) -> BTreeMap<i64, i64> {
        let mut end = start.clone();
        for d in &plan.deltas {
            let q = end.entry(d.location_id).or_insert(0);
            *q = (*q + d.delta).max(0);
        }
        end
    }

    #[test]
    fn proportional_split_is_exact_when_divisible() {
        let start = balances(&[(1, 20), (2, 40)]);
        let plan = plan_distribution(&policy(Strategy::Proportional, None), &start, 90).unwrap();
        assert_eq!(apply(&plan, &start), balances(&[(1, 30), (2, 60)]));
        assert!(plan.deltas.iter().all(|d| d.source == SOURCE_PROPORTIONAL));
    }

    #[test]
    fn empty_stock_splits_evenly_with_remainder_to_lowest_id() {
        let start = balances(&[(5, 0), (9, 0)]);
        let plan = plan_distribution(&policy(Strategy::Proportional, None), &start, 7).unwrap();
        assert_eq!(apply(&plan, &start), balances(&[(5, 4), (9, 3)]));
    }

    #[test]
    fn empty_stock_uses_weights_when_configured() {
        let start = balances(&[(1, 0), (2, 0), (3, 0)]);
        let mut p = policy(Strategy::Proportional, None);
        p.weights = BTreeMap::from([(1, 1), (2, 3)]);
        let plan = plan_distribution(&p, &start, 9).unwrap();
        // 9 * 1/4 = 2.25 -> 2, 9 * 3/4 = 6.75 -> 6, remainder 1 to location 1
        assert_eq!(apply(&plan, &start), balances(&[(1, 3), (2, 6), (3, 0)]));
    }

    #[test]
    fn proportional_rounding_residue_goes_to_lowest_ids() {
        // thirds of 10: 3.33 each rounds to 3, residue 1 lands on location 1
        let start = balances(&[(1, 1), (2, 1), (3, 1)]);
        let plan = plan_distribution(&policy(Strategy::Proportional, None), &start, 10).unwrap();
        assert_eq!(apply(&plan, &start), balances(&[(1, 4), (2, 3), (3, 3)]));

        // halves of 5 round up to 3 + 3, residue -1 taken from location 1
        let start = balances(&[(1, 1), (2, 1)]);
        let plan = plan_distribution(&policy(Strategy::Proportional, None), &start, 5).unwrap();
        assert_eq!(apply(&plan, &start), balances(&[(1, 2), (2, 3)]));
    }

    #[test]
    fn proportional_leaves_empty_locations_alone_when_others_hold_stock() {
        let start = balances(&[(1, 10), (2, 0)]);
        let plan = plan_distribution(&policy(Strategy::Proportional, None), &start, 4).unwrap();
        assert_eq!(apply(&plan, &start), balances(&[(1, 4), (2, 0)]));
    }

    #[test]
    fn default_overwrite_touches_only_the_default_location() {
        let start = balances(&[(1, 45), (2, 7)]);
        let plan = plan_distribution(
            &policy(Strategy::DefaultLocationOverwrite, Some(1)),
            &start,
            100,
        )
        .unwrap();
        assert_eq!(plan.deltas.len(), 1);
        assert_eq!(plan.deltas[0].location_id, 1);
        assert_eq!(plan.deltas[0].delta, 55);
        assert_eq!(plan.deltas[0].source, SOURCE_CD_OVERWRITE);
    }

    #[test]
    fn default_strategies_need_a_default_location() {
        let start = balances(&[(1, 1)]);
        for strategy in [
            Strategy::DefaultLocationOverwrite,
            Strategy::DefaultLocationDelta,
            Strategy::OverwriteAll,
        ] {
            assert_matches!(
                plan_distribution(&policy(strategy, None), &start, 3),
                Err(PlanError::DefaultLocationMissing)
            );
        }
    }

    #[test]
    fn delta_mode_adds_increase_to_default() {
        let start = balances(&[(1, 10), (2, 15)]);
        let plan =
            plan_distribution(&policy(Strategy::DefaultLocationDelta, Some(1)), &start, 40).unwrap();
        assert_eq!(apply(&plan, &start), balances(&[(1, 25), (2, 15)]));
    }

    #[test]
    fn negative_fallback_spills_onto_other_locations() {
        let start = balances(&[(1, 10), (2, 15)]);
        let mut p = policy(Strategy::DefaultLocationDelta, Some(1));
        p.negative_fallback = true;
        // total 25 -> 5 is a net decrease of 20
        let plan = plan_distribution(&p, &start, 5).unwrap();
        assert_eq!(apply(&plan, &start), balances(&[(1, 0), (2, 5)]));
        assert_eq!(plan.shortfall, 0);
        assert_eq!(plan.deltas[1].source, SOURCE_NEGATIVE_FALLBACK);
    }

    #[test]
    fn fallback_takes_largest_balance_first() {
        let start = balances(&[(1, 2), (2, 3), (3, 9), (4, 9)]);
        let mut p = policy(Strategy::DefaultLocationDelta, Some(1));
        p.negative_fallback = true;
        // total 23 -> 8: remove 15, 2 from default, then 9 from #3, 4 from #4
        let plan = plan_distribution(&p, &start, 8).unwrap();
        assert_eq!(
            apply(&plan, &start),
            balances(&[(1, 0), (2, 3), (3, 0), (4, 5)])
        );
    }

    #[test]
    fn without_fallback_the_shortfall_is_reported() {
        let start = balances(&[(1, 10), (2, 15)]);
        let plan =
            plan_distribution(&policy(Strategy::DefaultLocationDelta, Some(1)), &start, 5).unwrap();
        assert_eq!(apply(&plan, &start), balances(&[(1, 0), (2, 15)]));
        assert_eq!(plan.shortfall, 10);
    }

    #[test]
    fn overwrite_all_zeroes_everything_but_default() {
        let start = balances(&[(1, 4), (2, 15), (3, 0)]);
        let plan = plan_distribution(&policy(Strategy::OverwriteAll, Some(1)), &start, 30).unwrap();
        assert_eq!(apply(&plan, &start), balances(&[(1, 30), (2, 0), (3, 0)]));
    }

    #[test]
    fn negative_totals_are_rejected() {
        assert_matches!(
            plan_distribution(&policy(Strategy::Proportional, None), &balances(&[(1, 1)]), -1),
            Err(PlanError::NegativeTotal)
        );
    }

    #[test]
    fn huge_totals_do_not_overflow_the_planner() {
        let start = balances(&[(1, 1), (2, 1)]);
        let plan =
            plan_distribution(&policy(Strategy::Proportional, None), &start, i64::MAX).unwrap();
        let targets: i128 = plan
            .deltas
            .iter()
            .map(|d| i128::from(d.delta))
            .sum::<i128>()
            + 2;
        assert_eq!(targets, i128::from(i64::MAX));

        let start = balances(&[(1, i64::MAX), (2, i64::MAX)]);
        let mut p = policy(Strategy::DefaultLocationDelta, Some(1));
        p.negative_fallback = true;
        let plan = plan_distribution(&p, &start, 0).unwrap();
        assert_eq!(plan.previous_total, i64::MAX);
        assert_eq!(plan.shortfall, 0);
        assert_eq!(plan.deltas.len(), 2);
    }

    #[test]
    fn policy_from_config() {
        let mut cfg = DistributionConfig::default();
        cfg.strategy = "Proportional".into();
        cfg.global_updates = "reject".into();
        cfg.weights.insert(" 7 ".into(), 2);
        let policy = DistributionPolicy::try_from(&cfg).unwrap();
        assert_eq!(policy.strategy, Strategy::Proportional);
        assert_eq!(policy.global_updates, GlobalUpdateMode::Reject);
        assert_eq!(policy.weights.get(&7), Some(&2));

        cfg.strategy = "random".into();
        assert_matches!(
            DistributionPolicy::try_from(&cfg),
            Err(ServiceError::PolicyError(_))
        );
    }

    fn any_strategy() -> impl proptest::strategy::Strategy<Value = Strategy> {
        prop_oneof![
            Just(Strategy::DefaultLocationOverwrite),
            Just(Strategy::DefaultLocationDelta),
            Just(Strategy::Proportional),
            Just(Strategy::OverwriteAll),
        ]
    }

    proptest! {
        #[test]
        fn planning_never_overflows_across_the_full_range(
            quantities in proptest::collection::vec(0i64..=i64::MAX, 1..5),
            requested in 0i64..=i64::MAX,
            strategy in any_strategy(),
            negative_fallback in any::<bool>(),
        ) {
            let start: BTreeMap<i64, i64> =
                quantities.iter().enumerate().map(|(i, q)| (i as i64 + 1, *q)).collect();
            let mut p = policy(strategy, Some(1));
            p.negative_fallback = negative_fallback;
            let plan = plan_distribution(&p, &start, requested).unwrap();
            prop_assert!(plan.shortfall >= 0);
            if strategy == Strategy::Proportional {
                let before: i128 = start.values().map(|q| i128::from(*q)).sum();
                let moved: i128 = plan.deltas.iter().map(|d| i128::from(d.delta)).sum();
                prop_assert_eq!(before + moved, i128::from(requested));
            }
        }

        #[test]
        fn proportional_conserves_requested_total(
            quantities in proptest::collection::vec(0i64..500, 1..8),
            requested in 0i64..5_000,
        ) {
            let start: BTreeMap<i64, i64> =
                quantities.iter().enumerate().map(|(i, q)| (i as i64 + 1, *q)).collect();
            let plan = plan_distribution(&policy(Strategy::Proportional, None), &start, requested).unwrap();
            let end = apply(&plan, &start);
            prop_assert_eq!(end.values().sum::<i64>(), requested);
            prop_assert!(end.values().all(|q| *q >= 0));
        }

        #[test]
        fn delta_mode_with_fallback_reaches_requested_total(
            quantities in proptest::collection::vec(0i64..500, 1..8),
            requested in 0i64..5_000,
        ) {
            let start: BTreeMap<i64, i64> =
                quantities.iter().enumerate().map(|(i, q)| (i as i64 + 1, *q)).collect();
            let mut p = policy(Strategy::DefaultLocationDelta, Some(1));
            p.negative_fallback = true;
            let plan = plan_distribution(&p, &start, requested).unwrap();
            let end = apply(&plan, &start);
            prop_assert_eq!(plan.shortfall, 0);
            prop_assert_eq!(end.values().sum::<i64>(), requested);
            prop_assert!(end.values().all(|q| *q >= 0));
        }
    }
}
