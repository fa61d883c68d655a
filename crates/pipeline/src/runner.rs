//! Cohort pipeline runner.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use insight_aggregation::{CustomerAggregator, DateBucketAggregator};
use insight_core::config::AppConfig;
use insight_core::types::{ClassificationMode, TimeGranularity, TrendFilter};
use insight_core::{InsightError, InsightResult};
use insight_reporting::TrendAggregator;
use insight_segmentation::{CohortMedianEstimator, LifecycleClassifier};
use insight_store::{DerivedStore, TransactionQuery, TransactionSource};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// One cohort analysis: which rows to fetch, how to classify them, and which
/// trend slices to produce. Pin `reference_time` for reproducible output.
#[derive(Debug, Clone)]
pub struct CohortJob {
    pub cohort_key: String,
    pub query: TransactionQuery,
    pub mode: ClassificationMode,
    pub granularity: TimeGranularity,
    /// Extra trend slices beyond the unfiltered overall one.
    pub trend_filters: Vec<TrendFilter>,
    pub reference_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// The batch finished, but some rows were dropped or customers skipped.
    PartialSuccess,
}

/// Outcome of one cohort run, with per-stage row counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohortRunReport {
    pub run_id: Uuid,
    pub cohort_key: String,
    pub status: RunStatus,
    pub fetched_rows: u64,
    pub dropped_rows: u64,
    pub date_buckets: u64,
    pub customers: u64,
    pub skipped_customers: u64,
    pub nes_median: Option<f64>,
    pub trend_rows: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Strict staged batch pipeline. Each stage is a pure transformation consuming
/// its upstream stage's complete output; the injected store is the only
/// persistence touchpoint.
pub struct DnaPipeline<S, D> {
    source: Arc<S>,
    store: Arc<D>,
    config: AppConfig,
}

impl<S, D> DnaPipeline<S, D>
where
    S: TransactionSource + 'static,
    D: DerivedStore + 'static,
{
    pub fn new(source: Arc<S>, store: Arc<D>, config: AppConfig) -> Self {
        Self {
            source,
            store,
            config,
        }
    }

    /// Run one cohort end to end. An empty transaction set completes with
    /// all-zero counts rather than erroring.
    pub fn run_cohort(&self, job: &CohortJob) -> InsightResult<CohortRunReport> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let reference_time = job.reference_time.unwrap_or(started_at);

        info!(run_id = %run_id, cohort = %job.cohort_key, "cohort run started");

        let transactions = self.source.fetch(&job.query)?;
        let fetched_rows = transactions.len() as u64;

        let bucketizer = DateBucketAggregator::new(
            self.config.pipeline.carry_fields.iter().cloned().collect(),
        );
        let bucketized = bucketizer.aggregate(&transactions);
        let date_buckets = bucketized.buckets.len() as u64;
        self.store
            .replace_date_buckets(&job.cohort_key, bucketized.buckets.clone())?;

        let aggregates =
            CustomerAggregator::new().aggregate(&bucketized.buckets, Some(reference_time))?;

        let estimator = CohortMedianEstimator::new(self.store.clone());
        let stats = estimator.refresh(&aggregates, &job.cohort_key, reference_time)?;
        let nes_median = stats.map(|s| s.nes_median);

        let classifier = LifecycleClassifier::new(self.config.classification.clone())?;
        let classified = classifier.classify(&aggregates, job.mode)?;
        let customers = classified.customers.len() as u64;
        self.store
            .replace_customers(&job.cohort_key, classified.customers.clone())?;

        let trender = TrendAggregator::new(self.config.trend.trailing_window_days);
        let mut trend_rows: u64 = 0;
        let overall = TrendFilter::default();
        for filter in std::iter::once(&overall).chain(&job.trend_filters) {
            let rows = trender.aggregate(&classified.customers, filter, job.granularity);
            trend_rows += rows.len() as u64;
            self.store.replace_trend(filter, job.granularity, rows)?;
        }

        let status = if bucketized.dropped_rows > 0 || classified.skipped > 0 {
            RunStatus::PartialSuccess
        } else {
            RunStatus::Completed
        };

        let completed_at = Utc::now();
        metrics::histogram!("pipeline.run_ms")
            .record((completed_at - started_at).num_milliseconds() as f64);
        info!(
            run_id = %run_id,
            cohort = %job.cohort_key,
            status = ?status,
            customers = customers,
            trend_rows = trend_rows,
            "cohort run finished"
        );

        Ok(CohortRunReport {
            run_id,
            cohort_key: job.cohort_key.clone(),
            status,
            fetched_rows,
            dropped_rows: bucketized.dropped_rows,
            date_buckets,
            customers,
            skipped_customers: classified.skipped,
            nes_median,
            trend_rows,
            started_at,
            completed_at,
        })
    }

    /// Run independent cohort jobs on the blocking pool, at most
    /// `pipeline.max_parallel_cohorts` at a time. Each job writes only its own
    /// cohort/filter keys, so the store's atomic upsert is the only shared
    /// touchpoint. Results come back in submission order.
    pub async fn run_cohorts(
        self: &Arc<Self>,
        jobs: Vec<CohortJob>,
    ) -> Vec<InsightResult<CohortRunReport>> {
        let max_parallel = self.config.pipeline.max_parallel_cohorts.max(1);
        let mut results = Vec::with_capacity(jobs.len());

        for chunk in jobs.chunks(max_parallel) {
            let handles: Vec<_> = chunk
                .iter()
                .cloned()
                .map(|job| {
                    let pipeline = Arc::clone(self);
                    tokio::task::spawn_blocking(move || pipeline.run_cohort(&job))
                })
                .collect();

            for handle in handles {
                results.push(match handle.await {
                    Ok(result) => result,
                    Err(e) => Err(InsightError::Internal(anyhow::anyhow!(
                        "cohort task panicked: {e}"
                    ))),
                });
            }
        }

        results
    }
}
