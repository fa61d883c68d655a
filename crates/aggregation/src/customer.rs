//! Customer lifetime aggregation — one RFM row per customer.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use insight_core::types::{days_between, CustomerAggregate, DateBucket};
use insight_core::{InsightError, InsightResult};
use tracing::warn;

/// Collapses date buckets into lifetime aggregates (recency, frequency,
/// monetary value, inter-purchase time).
pub struct CustomerAggregator;

impl CustomerAggregator {
    pub fn new() -> Self {
        Self
    }

    /// `reference_time` anchors recency; it defaults to now but must be pinned
    /// by callers that need reproducible output.
    pub fn aggregate(
        &self,
        buckets: &[DateBucket],
        reference_time: Option<DateTime<Utc>>,
    ) -> InsightResult<Vec<CustomerAggregate>> {
        let reference_time = reference_time.unwrap_or_else(Utc::now);

        let mut groups: BTreeMap<&str, Vec<&DateBucket>> = BTreeMap::new();
        for bucket in buckets {
            if bucket.daily_count == 0 {
                return Err(InsightError::DataIntegrity(format!(
                    "empty date bucket for customer '{}' on {}",
                    bucket.customer_id, bucket.date
                )));
            }
            groups.entry(&bucket.customer_id).or_default().push(bucket);
        }

        let mut aggregates = Vec::with_capacity(groups.len());
        let mut clamped: u64 = 0;

        for (customer_id, mut group) in groups {
            group.sort_by_key(|b| b.bucket_sequence);

            let lifetime_total: f64 = group.iter().map(|b| b.daily_total).sum();
            let lifetime_count: u32 = group.iter().map(|b| b.daily_count).sum();
            let first_purchase = group
                .iter()
                .map(|b| b.first_timestamp)
                .min()
                .ok_or_else(|| {
                    InsightError::DataIntegrity(format!(
                        "customer '{customer_id}' has no date buckets"
                    ))
                })?;
            let last_purchase = group.iter().map(|b| b.first_timestamp).max().ok_or_else(
                || {
                    InsightError::DataIntegrity(format!(
                        "customer '{customer_id}' has no date buckets"
                    ))
                },
            )?;

            // First observed inter-purchase interval in bucket order; single-
            // bucket customers get a 1-day floor so ratios never divide by zero.
            let inter_purchase_time = group
                .iter()
                .find_map(|b| b.inter_purchase_time)
                .unwrap_or_else(|| days_between(last_purchase, first_purchase).max(1.0));

            let purchase_count = group.len() as u32;
            let raw_recency = days_between(reference_time, last_purchase);
            if raw_recency < 0.0 {
                clamped += 1;
            }
            let recency_days = raw_recency.max(0.0);

            let mut attrs = std::collections::HashMap::new();
            for bucket in &group {
                for (key, value) in &bucket.attrs {
                    attrs.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }

            aggregates.push(CustomerAggregate {
                customer_id: customer_id.to_string(),
                lifetime_total,
                lifetime_count,
                first_purchase,
                last_purchase,
                inter_purchase_time,
                purchase_count,
                recency_days,
                monetary_value: lifetime_total / purchase_count as f64,
                attrs,
            });
        }

        if clamped > 0 {
            warn!(
                customers = clamped,
                "reference time precedes last purchase; recency clamped to 0"
            );
        }
        metrics::counter!("aggregation.customers").increment(aggregates.len() as u64);

        Ok(aggregates)
    }
}

impl Default for CustomerAggregator {
    fn default() -> Self {
        Self::new()
    }
}
