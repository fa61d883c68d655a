//! Trend table construction over classified customers.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use insight_core::types::{
    ClassifiedCustomer, TimeGranularity, TimeWindow, TrendBucket, TrendFilter,
};
use tracing::debug;

/// Buckets classified customers by time period and lifecycle label, per
/// dimension filter. Output replaces prior rows for the same
/// (filter, granularity) key wholesale; there is no incremental merge.
pub struct TrendAggregator {
    trailing_window_days: i64,
}

impl TrendAggregator {
    pub fn new(trailing_window_days: i64) -> Self {
        Self {
            trailing_window_days,
        }
    }

    pub fn aggregate(
        &self,
        classified: &[ClassifiedCustomer],
        filter: &TrendFilter,
        granularity: TimeGranularity,
    ) -> Vec<TrendBucket> {
        // The trailing window is anchored at the population's max purchase
        // timestamp, not at the wall clock, so replays of historical data
        // produce identical tables.
        let cutoff: Option<DateTime<Utc>> = match filter.window {
            TimeWindow::AllTime => None,
            TimeWindow::TrailingYear => classified
                .iter()
                .map(|c| c.customer.last_purchase)
                .max()
                .map(|max| max - Duration::days(self.trailing_window_days)),
        };

        let selected: Vec<&ClassifiedCustomer> = classified
            .iter()
            .filter(|c| {
                if let Some(cutoff) = cutoff {
                    if c.customer.last_purchase < cutoff {
                        return false;
                    }
                }
                attr_matches(c, "source", filter.source.as_deref())
                    && attr_matches(c, "state", filter.state.as_deref())
                    && attr_matches(c, "product_line", filter.product_line.as_deref())
            })
            .collect();

        let mut slice_totals: BTreeMap<NaiveDate, u64> = BTreeMap::new();
        let mut groups: BTreeMap<(NaiveDate, String), (u64, f64)> = BTreeMap::new();

        for customer in &selected {
            let bucket = time_bucket(customer.customer.last_purchase, granularity);
            *slice_totals.entry(bucket).or_insert(0) += 1;
            let entry = groups
                .entry((bucket, customer.lifecycle_stage.clone()))
                .or_insert((0, 0.0));
            entry.0 += 1;
            entry.1 += customer.customer.monetary_value;
        }

        let rows: Vec<TrendBucket> = groups
            .into_iter()
            .map(|((bucket, lifecycle_stage), (nes_count, nes_mvalue))| {
                let num_customers = slice_totals[&bucket];
                TrendBucket {
                    filter: filter.clone(),
                    granularity,
                    bucket,
                    lifecycle_stage,
                    num_customers,
                    nes_count,
                    nes_prop: nes_count as f64 / num_customers as f64,
                    nes_mvalue,
                    nes_mmean: nes_mvalue / nes_count as f64,
                }
            })
            .collect();

        debug!(
            filter = %filter.storage_key(),
            customers = selected.len(),
            rows = rows.len(),
            "trend aggregation complete"
        );
        metrics::counter!("reporting.trend_rows").increment(rows.len() as u64);

        rows
    }
}

fn attr_matches(customer: &ClassifiedCustomer, key: &str, expected: Option<&str>) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    // A filtered dimension missing from the customer's attrs excludes them.
    customer
        .customer
        .attrs
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v == expected)
        .unwrap_or(false)
}

fn time_bucket(timestamp: DateTime<Utc>, granularity: TimeGranularity) -> NaiveDate {
    let date = timestamp.date_naive();
    match granularity {
        TimeGranularity::Day => date,
        TimeGranularity::Month => date.with_day(1).expect("day 1 exists in every month"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use insight_core::types::{BandLevel, CustomerAggregate};
    use std::collections::HashMap;

    fn customer(id: &str, last_purchase: &str, stage: &str, monetary: f64) -> ClassifiedCustomer {
        let last_purchase: DateTime<Utc> = last_purchase.parse().unwrap();
        ClassifiedCustomer {
            customer: CustomerAggregate {
                customer_id: id.to_string(),
                lifetime_total: monetary * 2.0,
                lifetime_count: 2,
                first_purchase: last_purchase - Duration::days(30),
                last_purchase,
                inter_purchase_time: 30.0,
                purchase_count: 2,
                recency_days: 10.0,
                monetary_value: monetary,
                attrs: HashMap::new(),
            },
            nes_ratio: 0.5,
            lifecycle_stage: stage.to_string(),
            value_level: BandLevel::Mid,
            activity_level: BandLevel::Mid,
        }
    }

    fn with_attr(mut c: ClassifiedCustomer, key: &str, value: &str) -> ClassifiedCustomer {
        c.customer
            .attrs
            .insert(key.to_string(), serde_json::json!(value));
        c
    }

    #[test]
    fn test_label_counts_sum_to_slice_total() {
        let classified = vec![
            customer("c1", "2024-03-05T10:00:00Z", "N", 10.0),
            customer("c2", "2024-03-12T10:00:00Z", "E0", 20.0),
            customer("c3", "2024-03-20T10:00:00Z", "E0", 30.0),
            customer("c4", "2024-04-02T10:00:00Z", "S1", 40.0),
        ];

        let rows = TrendAggregator::new(365).aggregate(
            &classified,
            &TrendFilter::default(),
            TimeGranularity::Month,
        );

        let march: Vec<&TrendBucket> = rows
            .iter()
            .filter(|r| r.bucket == "2024-03-01".parse::<NaiveDate>().unwrap())
            .collect();
        let count_sum: u64 = march.iter().map(|r| r.nes_count).sum();
        assert_eq!(count_sum, 3);
        assert!(march.iter().all(|r| r.num_customers == 3));

        let e0 = march.iter().find(|r| r.lifecycle_stage == "E0").unwrap();
        assert_eq!(e0.nes_count, 2);
        assert!((e0.nes_prop - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(e0.nes_mvalue, 50.0);
        assert_eq!(e0.nes_mmean, 25.0);
    }

    #[test]
    fn test_day_granularity_keeps_calendar_days() {
        let classified = vec![
            customer("c1", "2024-03-05T08:00:00Z", "N", 10.0),
            customer("c2", "2024-03-05T22:00:00Z", "N", 20.0),
            customer("c3", "2024-03-06T01:00:00Z", "N", 30.0),
        ];

        let rows = TrendAggregator::new(365).aggregate(
            &classified,
            &TrendFilter::default(),
            TimeGranularity::Day,
        );
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].nes_count, 2);
        assert_eq!(rows[1].nes_count, 1);
    }

    #[test]
    fn test_dimension_filter_excludes_missing_attr() {
        let classified = vec![
            with_attr(customer("c1", "2024-03-05T10:00:00Z", "N", 10.0), "state", "WA"),
            with_attr(customer("c2", "2024-03-06T10:00:00Z", "N", 20.0), "state", "OR"),
            // No state attr at all.
            customer("c3", "2024-03-07T10:00:00Z", "N", 30.0),
        ];

        let filter = TrendFilter {
            state: Some("WA".to_string()),
            ..Default::default()
        };
        let rows = TrendAggregator::new(365).aggregate(&classified, &filter, TimeGranularity::Month);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].num_customers, 1);
        assert_eq!(rows[0].nes_mvalue, 10.0);
    }

    #[test]
    fn test_trailing_year_cutoff_uses_population_max() {
        // All data is years in the past; a wall-clock cutoff would drop it all.
        let classified = vec![
            customer("c1", "2020-06-01T10:00:00Z", "N", 10.0),
            customer("c2", "2020-01-01T10:00:00Z", "E0", 20.0),
            // 18 months before the population max.
            customer("c3", "2018-12-01T10:00:00Z", "S3", 30.0),
        ];

        let filter = TrendFilter {
            window: TimeWindow::TrailingYear,
            ..Default::default()
        };
        let rows = TrendAggregator::new(365).aggregate(&classified, &filter, TimeGranularity::Month);

        let total: u64 = rows.iter().map(|r| r.nes_count).sum();
        assert_eq!(total, 2);
        assert!(rows.iter().all(|r| r.lifecycle_stage != "S3"));
    }

    #[test]
    fn test_empty_input() {
        let rows = TrendAggregator::new(365).aggregate(
            &[],
            &TrendFilter::default(),
            TimeGranularity::Day,
        );
        assert!(rows.is_empty());
    }
}
