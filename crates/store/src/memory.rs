//! In-memory reference store. Backs the CLI runner and serves as the test
//! double for database-backed implementations.

use dashmap::DashMap;
use insight_core::types::{
    ClassifiedCustomer, CohortStatistics, DateBucket, TimeGranularity, Transaction, TrendBucket,
    TrendFilter,
};
use insight_core::InsightResult;
use tracing::debug;

use crate::sink::DerivedStore;
use crate::source::{TransactionQuery, TransactionSource};

/// DashMap-backed store. Every table is keyed, and `DashMap::insert` replaces
/// a whole entry atomically, which is exactly the transactional upsert the
/// pipeline's replace-by-key writes require.
pub struct MemoryStore {
    transactions: DashMap<String, Vec<Transaction>>,
    date_buckets: DashMap<String, Vec<DateBucket>>,
    customers: DashMap<String, Vec<ClassifiedCustomer>>,
    cohort_stats: DashMap<String, CohortStatistics>,
    trend: DashMap<String, Vec<TrendBucket>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            transactions: DashMap::new(),
            date_buckets: DashMap::new(),
            customers: DashMap::new(),
            cohort_stats: DashMap::new(),
            trend: DashMap::new(),
        }
    }

    /// Load raw transaction rows under a source key, replacing any prior rows
    /// for that key.
    pub fn load_transactions(&self, source: &str, rows: Vec<Transaction>) {
        debug!(source = %source, rows = rows.len(), "loaded transactions");
        self.transactions.insert(source.to_string(), rows);
    }

    pub fn date_buckets(&self, cohort_key: &str) -> Option<Vec<DateBucket>> {
        self.date_buckets.get(cohort_key).map(|e| e.value().clone())
    }

    pub fn customers(&self, cohort_key: &str) -> Option<Vec<ClassifiedCustomer>> {
        self.customers.get(cohort_key).map(|e| e.value().clone())
    }

    pub fn trend(
        &self,
        filter: &TrendFilter,
        granularity: TimeGranularity,
    ) -> Option<Vec<TrendBucket>> {
        self.trend
            .get(&trend_key(filter, granularity))
            .map(|e| e.value().clone())
    }
}

fn trend_key(filter: &TrendFilter, granularity: TimeGranularity) -> String {
    let granularity = match granularity {
        TimeGranularity::Day => "day",
        TimeGranularity::Month => "month",
    };
    format!("{}|{}", filter.storage_key(), granularity)
}

impl TransactionSource for MemoryStore {
    fn fetch(&self, query: &TransactionQuery) -> InsightResult<Vec<Transaction>> {
        let mut rows: Vec<Transaction> = match &query.source {
            Some(source) => self
                .transactions
                .get(source)
                .map(|e| e.value().clone())
                .unwrap_or_default(),
            None => self
                .transactions
                .iter()
                .flat_map(|e| e.value().clone())
                .collect(),
        };

        rows.retain(|tx| {
            if let (Some(from), Some(ts)) = (query.from, tx.timestamp) {
                if ts < from {
                    return false;
                }
            }
            if let (Some(to), Some(ts)) = (query.to, tx.timestamp) {
                if ts > to {
                    return false;
                }
            }
            if !query.customer_ids.is_empty() {
                match &tx.customer_id {
                    Some(id) if query.customer_ids.contains(id) => {}
                    _ => return false,
                }
            }
            query.dimensions.iter().all(|(key, expected)| {
                tx.attrs
                    .get(key)
                    .and_then(|v| v.as_str())
                    .map(|v| v == expected)
                    .unwrap_or(false)
            })
        });

        Ok(rows)
    }
}

impl DerivedStore for MemoryStore {
    fn replace_date_buckets(
        &self,
        cohort_key: &str,
        buckets: Vec<DateBucket>,
    ) -> InsightResult<()> {
        self.date_buckets.insert(cohort_key.to_string(), buckets);
        Ok(())
    }

    fn replace_customers(
        &self,
        cohort_key: &str,
        customers: Vec<ClassifiedCustomer>,
    ) -> InsightResult<()> {
        self.customers.insert(cohort_key.to_string(), customers);
        Ok(())
    }

    fn upsert_cohort_statistics(&self, stats: CohortStatistics) -> InsightResult<()> {
        debug!(
            cohort = %stats.cohort_key,
            nes_median = stats.nes_median,
            "upserted cohort statistics"
        );
        self.cohort_stats.insert(stats.cohort_key.clone(), stats);
        Ok(())
    }

    fn cohort_statistics(&self, cohort_key: &str) -> InsightResult<Option<CohortStatistics>> {
        Ok(self.cohort_stats.get(cohort_key).map(|e| e.value().clone()))
    }

    fn replace_trend(
        &self,
        filter: &TrendFilter,
        granularity: TimeGranularity,
        rows: Vec<TrendBucket>,
    ) -> InsightResult<()> {
        self.trend.insert(trend_key(filter, granularity), rows);
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    fn tx(customer: &str, ts: &str, amount: f64, state: &str) -> Transaction {
        Transaction {
            customer_id: Some(customer.to_string()),
            timestamp: Some(ts.parse().unwrap()),
            amount: Some(amount),
            attrs: HashMap::from([(
                "state".to_string(),
                serde_json::json!(state),
            )]),
        }
    }

    #[test]
    fn test_fetch_filters_by_source_and_dimension() {
        let store = MemoryStore::new();
        store.load_transactions(
            "amazon",
            vec![
                tx("c1", "2024-01-01T00:00:00Z", 1.0, "WA"),
                tx("c2", "2024-01-02T00:00:00Z", 2.0, "OR"),
            ],
        );
        store.load_transactions("ebay", vec![tx("c3", "2024-01-03T00:00:00Z", 3.0, "WA")]);

        let all = store.fetch(&TransactionQuery::default()).unwrap();
        assert_eq!(all.len(), 3);

        let amazon_only = store
            .fetch(&TransactionQuery {
                source: Some("amazon".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(amazon_only.len(), 2);

        let wa_only = store
            .fetch(&TransactionQuery {
                dimensions: HashMap::from([("state".to_string(), "WA".to_string())]),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(wa_only.len(), 2);
    }

    #[test]
    fn test_fetch_date_range() {
        let store = MemoryStore::new();
        store.load_transactions(
            "amazon",
            vec![
                tx("c1", "2024-01-01T00:00:00Z", 1.0, "WA"),
                tx("c1", "2024-06-01T00:00:00Z", 2.0, "WA"),
            ],
        );

        let rows = store
            .fetch(&TransactionQuery {
                from: Some("2024-03-01T00:00:00Z".parse().unwrap()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].amount, Some(2.0));
    }

    #[test]
    fn test_cohort_statistics_upsert_replaces() {
        let store = MemoryStore::new();
        let stats = |median: f64| CohortStatistics {
            cohort_key: "amazon".to_string(),
            nes_median: median,
            customers: 10,
            excluded: 0,
            computed_at: Utc::now(),
        };

        store.upsert_cohort_statistics(stats(1.0)).unwrap();
        store.upsert_cohort_statistics(stats(2.5)).unwrap();

        let latest = store.cohort_statistics("amazon").unwrap().unwrap();
        assert_eq!(latest.nes_median, 2.5);
        assert!(store.cohort_statistics("ebay").unwrap().is_none());
    }

    #[test]
    fn test_trend_replace_is_full_overwrite() {
        let store = MemoryStore::new();
        let filter = TrendFilter::default();
        let row = |stage: &str| TrendBucket {
            filter: filter.clone(),
            granularity: TimeGranularity::Month,
            bucket: "2024-01-01".parse().unwrap(),
            lifecycle_stage: stage.to_string(),
            num_customers: 1,
            nes_count: 1,
            nes_prop: 1.0,
            nes_mvalue: 10.0,
            nes_mmean: 10.0,
        };

        store
            .replace_trend(&filter, TimeGranularity::Month, vec![row("N"), row("E0")])
            .unwrap();
        store
            .replace_trend(&filter, TimeGranularity::Month, vec![row("S1")])
            .unwrap();

        let rows = store.trend(&filter, TimeGranularity::Month).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].lifecycle_stage, "S1");
        // Keys are per granularity.
        assert!(store.trend(&filter, TimeGranularity::Day).is_none());
    }
}
