//! Write interface for derived tables.

use insight_core::types::{
    ClassifiedCustomer, CohortStatistics, DateBucket, TimeGranularity, TrendBucket, TrendFilter,
};
use insight_core::InsightResult;

/// Persistence sink for pipeline output. Every write is replace-by-key, never
/// an incremental patch: each pipeline run fully regenerates its own tables.
/// Failures surface as [`insight_core::InsightError::Persistence`]; retry
/// policy belongs to the implementation, not the callers.
pub trait DerivedStore: Send + Sync {
    /// Replace the date bucket table for one cohort.
    fn replace_date_buckets(
        &self,
        cohort_key: &str,
        buckets: Vec<DateBucket>,
    ) -> InsightResult<()>;

    /// Replace the classified customer table for one cohort.
    fn replace_customers(
        &self,
        cohort_key: &str,
        customers: Vec<ClassifiedCustomer>,
    ) -> InsightResult<()>;

    /// Single-row upsert keyed by `cohort_key`: any prior row for that key is
    /// replaced as one atomic unit, never left as a duplicate.
    fn upsert_cohort_statistics(&self, stats: CohortStatistics) -> InsightResult<()>;

    /// Last persisted statistics for a cohort, without recomputation.
    fn cohort_statistics(&self, cohort_key: &str) -> InsightResult<Option<CohortStatistics>>;

    /// Batch overwrite of all trend rows for one (filter, granularity) key.
    fn replace_trend(
        &self,
        filter: &TrendFilter,
        granularity: TimeGranularity,
        rows: Vec<TrendBucket>,
    ) -> InsightResult<()>;
}
