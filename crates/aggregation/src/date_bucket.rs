//! Date bucket aggregation — one row per (customer, calendar day).

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use insight_core::types::{days_between, DateBucket, Transaction};
use tracing::warn;

/// Date bucket output plus the count of invalid input rows excluded from it.
#[derive(Debug, Clone)]
pub struct Bucketized {
    pub buckets: Vec<DateBucket>,
    pub dropped_rows: u64,
}

/// Collapses raw transactions into one bucket per (customer, day), carrying
/// configured dimension fields through with first-occurrence semantics.
pub struct DateBucketAggregator {
    carry_fields: BTreeSet<String>,
}

struct Group {
    daily_total: f64,
    daily_count: u32,
    first_timestamp: DateTime<Utc>,
    attrs: HashMap<String, serde_json::Value>,
}

impl DateBucketAggregator {
    pub fn new(carry_fields: BTreeSet<String>) -> Self {
        Self { carry_fields }
    }

    /// Group transactions by (customer, day). Rows missing `customer_id`,
    /// `timestamp`, or `amount` are dropped and counted rather than grouped
    /// under a null key; a NaN or negative amount counts as missing because it
    /// would poison every downstream sum.
    pub fn aggregate(&self, transactions: &[Transaction]) -> Bucketized {
        let mut groups: BTreeMap<(String, NaiveDate), Group> = BTreeMap::new();
        let mut dropped_rows: u64 = 0;

        for tx in transactions {
            let (customer_id, timestamp, amount) = match (&tx.customer_id, tx.timestamp, tx.amount)
            {
                (Some(id), Some(ts), Some(amt)) if !id.is_empty() && amt.is_finite() && amt >= 0.0 => {
                    (id.clone(), ts, amt)
                }
                _ => {
                    dropped_rows += 1;
                    continue;
                }
            };

            let entry = groups
                .entry((customer_id, timestamp.date_naive()))
                .or_insert_with(|| Group {
                    daily_total: 0.0,
                    daily_count: 0,
                    first_timestamp: timestamp,
                    attrs: HashMap::new(),
                });

            entry.daily_total += amount;
            entry.daily_count += 1;
            // Earliest time of day, not latest: inter-purchase time downstream
            // measures first contact of the day.
            if timestamp < entry.first_timestamp {
                entry.first_timestamp = timestamp;
            }
            for field in &self.carry_fields {
                if entry.attrs.contains_key(field) {
                    continue;
                }
                match tx.attrs.get(field) {
                    Some(value) if !value.is_null() => {
                        entry.attrs.insert(field.clone(), value.clone());
                    }
                    _ => {}
                }
            }
        }

        if dropped_rows > 0 {
            warn!(dropped = dropped_rows, "excluded invalid transaction rows");
        }
        metrics::counter!("aggregation.rows_dropped").increment(dropped_rows);

        // BTreeMap iteration yields (customer, date) in ascending order, so one
        // forward pass assigns per-customer sequence and inter-purchase fields.
        let mut buckets: Vec<DateBucket> = Vec::with_capacity(groups.len());
        let mut customer_start = 0usize;
        let mut prev: Option<(String, DateTime<Utc>)> = None;

        for ((customer_id, date), group) in groups {
            let (sequence, inter_purchase_time) = match &prev {
                Some((prev_id, prev_ts)) if *prev_id == customer_id => {
                    let seq = buckets.last().map(|b| b.bucket_sequence + 1).unwrap_or(1);
                    (seq, Some(days_between(group.first_timestamp, *prev_ts)))
                }
                _ => {
                    Self::backfill_lifetime_count(&mut buckets, customer_start);
                    customer_start = buckets.len();
                    (1, None)
                }
            };
            prev = Some((customer_id.clone(), group.first_timestamp));

            buckets.push(DateBucket {
                customer_id,
                date,
                daily_total: group.daily_total,
                daily_count: group.daily_count,
                first_timestamp: group.first_timestamp,
                attrs: group.attrs,
                lifetime_count: 0,
                bucket_sequence: sequence,
                inter_purchase_time,
            });
        }
        Self::backfill_lifetime_count(&mut buckets, customer_start);

        metrics::counter!("aggregation.date_buckets").increment(buckets.len() as u64);

        Bucketized {
            buckets,
            dropped_rows,
        }
    }

    fn backfill_lifetime_count(buckets: &mut [DateBucket], start: usize) {
        let count = (buckets.len() - start) as u32;
        for bucket in &mut buckets[start..] {
            bucket.lifetime_count = count;
        }
    }
}
