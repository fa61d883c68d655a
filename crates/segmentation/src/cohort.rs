//! Cohort-level NES median — the population normalization anchor, persisted
//! per cohort key and refreshed whenever cohort composition changes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use insight_core::types::{days_between, CohortStatistics, CustomerAggregate};
use insight_core::InsightResult;
use insight_store::DerivedStore;
use tracing::{info, warn};

/// Median of `recency / inter_purchase_time` across the cohort. Returns `None`
/// for an empty population; persisting a NaN median would poison every reader.
pub fn compute_cohort_median(
    aggregates: &[CustomerAggregate],
    cohort_key: &str,
    reference_time: DateTime<Utc>,
) -> Option<CohortStatistics> {
    let mut ratios = Vec::with_capacity(aggregates.len());
    let mut excluded: u64 = 0;

    for customer in aggregates {
        let ratio =
            days_between(reference_time, customer.last_purchase) / customer.inter_purchase_time;
        if ratio.is_finite() {
            ratios.push(ratio);
        } else {
            excluded += 1;
            warn!(
                customer_id = %customer.customer_id,
                ipt = customer.inter_purchase_time,
                "non-finite NES ratio excluded from cohort median"
            );
        }
    }

    let nes_median = crate::quantile::median(&ratios)?;

    Some(CohortStatistics {
        cohort_key: cohort_key.to_string(),
        nes_median,
        customers: ratios.len() as u64,
        excluded,
        computed_at: Utc::now(),
    })
}

/// Keeps the persisted per-cohort median current. The store's upsert-by-key is
/// atomic, so concurrent refreshes of different cohorts never interfere.
pub struct CohortMedianEstimator<S: DerivedStore> {
    store: Arc<S>,
}

impl<S: DerivedStore> CohortMedianEstimator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Recompute and persist the cohort median. Skips the write for an empty
    /// population and returns `None`.
    pub fn refresh(
        &self,
        aggregates: &[CustomerAggregate],
        cohort_key: &str,
        reference_time: DateTime<Utc>,
    ) -> InsightResult<Option<CohortStatistics>> {
        let Some(stats) = compute_cohort_median(aggregates, cohort_key, reference_time) else {
            return Ok(None);
        };

        self.store.upsert_cohort_statistics(stats.clone())?;
        info!(
            cohort = %cohort_key,
            nes_median = stats.nes_median,
            customers = stats.customers,
            "cohort median refreshed"
        );
        Ok(Some(stats))
    }

    /// Last persisted value, without recomputation. Classification callers use
    /// this unless they explicitly request a refresh.
    pub fn latest(&self, cohort_key: &str) -> InsightResult<Option<CohortStatistics>> {
        self.store.cohort_statistics(cohort_key)
    }
}
