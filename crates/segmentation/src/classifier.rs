//! Lifecycle classification — fixed recency thresholds or cohort-style NES
//! ratio breaks, plus population-relative value and activity bands.

use insight_core::config::ClassificationParams;
use insight_core::types::{
    BandLevel, ClassificationMode, ClassifiedCustomer, CustomerAggregate, RecencyStage,
};
use insight_core::InsightResult;
use tracing::warn;

use crate::quantile::quantile_sorted;

/// Classification output plus the defect counters the caller must see.
#[derive(Debug, Clone)]
pub struct Classified {
    pub customers: Vec<ClassifiedCustomer>,
    /// Customers with a non-finite NES ratio, excluded rather than mislabeled.
    pub skipped: u64,
    pub degenerate_value_bands: bool,
    pub degenerate_activity_bands: bool,
}

/// Assigns each customer exactly one lifecycle stage and one value/activity
/// band. Breakpoints are validated once at construction; a classifier with
/// undefined break semantics never exists.
pub struct LifecycleClassifier {
    params: ClassificationParams,
}

impl LifecycleClassifier {
    pub fn new(params: ClassificationParams) -> InsightResult<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn classify(
        &self,
        aggregates: &[CustomerAggregate],
        mode: ClassificationMode,
    ) -> InsightResult<Classified> {
        let mut included: Vec<(&CustomerAggregate, f64, String)> =
            Vec::with_capacity(aggregates.len());
        let mut skipped: u64 = 0;

        for customer in aggregates {
            let nes_ratio = customer.recency_days / customer.inter_purchase_time;
            if !nes_ratio.is_finite() {
                skipped += 1;
                warn!(
                    customer_id = %customer.customer_id,
                    "non-finite NES ratio, customer skipped"
                );
                continue;
            }

            let lifecycle_stage = match mode {
                ClassificationMode::RecencyThreshold => {
                    self.recency_stage(customer.recency_days).label().to_string()
                }
                ClassificationMode::NesRatioBreaks => self.nes_label(nes_ratio).to_string(),
            };

            included.push((customer, nes_ratio, lifecycle_stage));
        }

        // Band boundaries are recomputed over this call's population every
        // time; they are never persisted constants.
        let mut mvalues: Vec<f64> = included.iter().map(|(c, _, _)| c.monetary_value).collect();
        mvalues.sort_by(|a, b| a.total_cmp(b));
        let mut counts: Vec<f64> = included
            .iter()
            .map(|(c, _, _)| c.purchase_count as f64)
            .collect();
        counts.sort_by(|a, b| a.total_cmp(b));

        let value_bounds = self.band_bounds(&mvalues);
        let activity_bounds = self.band_bounds(&counts);
        let degenerate_value_bands = is_degenerate(value_bounds);
        let degenerate_activity_bands = is_degenerate(activity_bounds);
        if degenerate_value_bands {
            warn!("degenerate monetary-value quantile boundaries; ties go to the higher band");
        }
        if degenerate_activity_bands {
            warn!("degenerate purchase-count quantile boundaries; ties go to the higher band");
        }

        let customers = included
            .into_iter()
            .map(|(customer, nes_ratio, lifecycle_stage)| ClassifiedCustomer {
                customer: customer.clone(),
                nes_ratio,
                lifecycle_stage,
                value_level: band(customer.monetary_value, value_bounds),
                activity_level: band(customer.purchase_count as f64, activity_bounds),
            })
            .collect::<Vec<_>>();

        metrics::counter!("segmentation.customers_classified").increment(customers.len() as u64);

        Ok(Classified {
            customers,
            skipped,
            degenerate_value_bands,
            degenerate_activity_bands,
        })
    }

    /// First threshold at or above the recency wins; beyond the last cutoff
    /// the customer is dormant.
    fn recency_stage(&self, recency_days: f64) -> RecencyStage {
        let stages = RecencyStage::ordered();
        for (threshold, stage) in self.params.recency_thresholds.iter().zip(stages.iter()) {
            if recency_days <= *threshold {
                return *stage;
            }
        }
        RecencyStage::Dormant
    }

    /// Right-closed intervals: a ratio exactly on a break belongs to the lower
    /// bucket, so 1.0 lands in (0, 1] and 0.0 in the first bucket.
    fn nes_label(&self, nes_ratio: f64) -> &str {
        for (break_point, label) in self
            .params
            .nes_ratio_breaks
            .iter()
            .zip(&self.params.nes_labels)
        {
            if nes_ratio <= *break_point {
                return label;
            }
        }
        // Unreachable with a validated infinite terminal break.
        self.params.nes_labels.last().expect("labels are non-empty")
    }

    fn band_bounds(&self, sorted: &[f64]) -> Option<(f64, f64)> {
        let [lo, hi] = self.params.value_quantiles;
        Some((quantile_sorted(sorted, lo)?, quantile_sorted(sorted, hi)?))
    }
}

fn is_degenerate(bounds: Option<(f64, f64)>) -> bool {
    matches!(bounds, Some((lo, hi)) if lo == hi)
}

/// At or above the upper boundary is high, at or above the lower is mid; ties
/// on a shared boundary deliberately go up.
fn band(value: f64, bounds: Option<(f64, f64)>) -> BandLevel {
    match bounds {
        Some((_, hi)) if value >= hi => BandLevel::High,
        Some((lo, _)) if value >= lo => BandLevel::Mid,
        _ => BandLevel::Low,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use insight_core::InsightError;
    use std::collections::HashMap;

    fn aggregate(id: &str, recency_days: f64, ipt: f64, monetary: f64, ni: u32) -> CustomerAggregate {
        let last_purchase = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        CustomerAggregate {
            customer_id: id.to_string(),
            lifetime_total: monetary * ni as f64,
            lifetime_count: ni,
            first_purchase: last_purchase,
            last_purchase,
            inter_purchase_time: ipt,
            purchase_count: ni,
            recency_days,
            monetary_value: monetary,
            attrs: HashMap::new(),
        }
    }

    fn classifier() -> LifecycleClassifier {
        LifecycleClassifier::new(ClassificationParams::default()).unwrap()
    }

    #[test]
    fn test_recency_threshold_stages() {
        let aggregates = vec![
            aggregate("c1", 10.0, 5.0, 10.0, 2),
            aggregate("c2", 45.0, 5.0, 20.0, 3),
            aggregate("c3", 120.0, 5.0, 30.0, 4),
            aggregate("c4", 400.0, 5.0, 40.0, 5),
        ];
        let result = classifier()
            .classify(&aggregates, ClassificationMode::RecencyThreshold)
            .unwrap();

        let stages: Vec<&str> = result
            .customers
            .iter()
            .map(|c| c.lifecycle_stage.as_str())
            .collect();
        assert_eq!(stages, vec!["active", "sleepy", "half_sleepy", "dormant"]);
    }

    #[test]
    fn test_recency_boundary_belongs_to_lower_stage() {
        let aggregates = vec![aggregate("c1", 30.0, 5.0, 10.0, 2)];
        let result = classifier()
            .classify(&aggregates, ClassificationMode::RecencyThreshold)
            .unwrap();
        assert_eq!(result.customers[0].lifecycle_stage, "active");
    }

    #[test]
    fn test_nes_ratio_right_closed_intervals() {
        // recency/ipt: 0.0, exactly 1.0, 1.5, exactly 2.5, 10.0
        let aggregates = vec![
            aggregate("c1", 0.0, 10.0, 10.0, 1),
            aggregate("c2", 10.0, 10.0, 20.0, 2),
            aggregate("c3", 15.0, 10.0, 30.0, 3),
            aggregate("c4", 25.0, 10.0, 40.0, 4),
            aggregate("c5", 100.0, 10.0, 50.0, 5),
        ];
        let result = classifier()
            .classify(&aggregates, ClassificationMode::NesRatioBreaks)
            .unwrap();

        let stages: Vec<&str> = result
            .customers
            .iter()
            .map(|c| c.lifecycle_stage.as_str())
            .collect();
        assert_eq!(stages, vec!["N", "E0", "S1", "S2", "S3"]);
    }

    #[test]
    fn test_every_customer_gets_exactly_one_stage_and_band() {
        let aggregates: Vec<CustomerAggregate> = (0..30)
            .map(|i| {
                aggregate(
                    &format!("c{i}"),
                    (i * 13 % 400) as f64,
                    7.0,
                    (i * 17 % 90) as f64 + 1.0,
                    (i % 9) as u32 + 1,
                )
            })
            .collect();

        let result = classifier()
            .classify(&aggregates, ClassificationMode::NesRatioBreaks)
            .unwrap();
        assert_eq!(result.customers.len(), 30);
        assert_eq!(result.skipped, 0);

        let low = result
            .customers
            .iter()
            .filter(|c| c.value_level == BandLevel::Low)
            .count();
        let mid = result
            .customers
            .iter()
            .filter(|c| c.value_level == BandLevel::Mid)
            .count();
        let high = result
            .customers
            .iter()
            .filter(|c| c.value_level == BandLevel::High)
            .count();
        assert_eq!(low + mid + high, 30);
        assert!(low > 0 && mid > 0 && high > 0);
    }

    #[test]
    fn test_bands_computed_in_recency_mode_too() {
        let aggregates = vec![
            aggregate("c1", 10.0, 5.0, 5.0, 1),
            aggregate("c2", 10.0, 5.0, 50.0, 5),
            aggregate("c3", 10.0, 5.0, 500.0, 9),
        ];
        let result = classifier()
            .classify(&aggregates, ClassificationMode::RecencyThreshold)
            .unwrap();

        assert_eq!(result.customers[0].value_level, BandLevel::Low);
        assert_eq!(result.customers[1].value_level, BandLevel::Mid);
        assert_eq!(result.customers[2].value_level, BandLevel::High);
        assert_eq!(result.customers[2].activity_level, BandLevel::High);
    }

    #[test]
    fn test_degenerate_boundaries_send_ties_up() {
        let aggregates = vec![
            aggregate("c1", 10.0, 5.0, 25.0, 3),
            aggregate("c2", 20.0, 5.0, 25.0, 3),
            aggregate("c3", 30.0, 5.0, 25.0, 3),
        ];
        let result = classifier()
            .classify(&aggregates, ClassificationMode::RecencyThreshold)
            .unwrap();

        assert!(result.degenerate_value_bands);
        assert!(result.degenerate_activity_bands);
        assert!(result
            .customers
            .iter()
            .all(|c| c.value_level == BandLevel::High));
    }

    #[test]
    fn test_non_finite_ratio_skipped_not_mislabeled() {
        let mut bad = aggregate("c2", 10.0, 5.0, 20.0, 2);
        bad.inter_purchase_time = 0.0;
        let aggregates = vec![aggregate("c1", 10.0, 5.0, 10.0, 1), bad];

        let result = classifier()
            .classify(&aggregates, ClassificationMode::NesRatioBreaks)
            .unwrap();
        assert_eq!(result.customers.len(), 1);
        assert_eq!(result.skipped, 1);
    }

    #[test]
    fn test_invalid_params_rejected_at_construction() {
        let params = ClassificationParams {
            nes_ratio_breaks: vec![2.0, 1.0, 0.0, 2.5, f64::INFINITY],
            ..Default::default()
        };
        assert!(matches!(
            LifecycleClassifier::new(params),
            Err(InsightError::Config(_))
        ));
    }

    #[test]
    fn test_empty_population() {
        let result = classifier()
            .classify(&[], ClassificationMode::NesRatioBreaks)
            .unwrap();
        assert!(result.customers.is_empty());
        assert_eq!(result.skipped, 0);
        assert!(!result.degenerate_value_bands);
    }
}
