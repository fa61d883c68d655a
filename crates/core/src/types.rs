use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A raw sales row as supplied by the transaction source. Required fields are
/// optional at this boundary because upstream feeds carry nulls; the date
/// bucket aggregation drops and counts invalid rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub customer_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub amount: Option<f64>,
    /// Dimension fields (state, zip, product_line, lat/lng, …) carried through
    /// the pipeline unchanged with first-occurrence semantics.
    #[serde(default)]
    pub attrs: HashMap<String, serde_json::Value>,
}

/// One row per customer per calendar day with at least one transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DateBucket {
    pub customer_id: String,
    pub date: NaiveDate,
    pub daily_total: f64,
    pub daily_count: u32,
    /// Earliest transaction timestamp of the day. Retained so inter-purchase
    /// time reflects first contact of the day.
    pub first_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub attrs: HashMap<String, serde_json::Value>,
    /// Total bucket count for this customer, repeated on every row.
    pub lifetime_count: u32,
    /// 1-based rank of this bucket by date within the customer.
    pub bucket_sequence: u32,
    /// Fractional days since the customer's previous bucket; None on the first.
    pub inter_purchase_time: Option<f64>,
}

/// Lifetime RFM aggregate, one row per customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerAggregate {
    pub customer_id: String,
    pub lifetime_total: f64,
    pub lifetime_count: u32,
    pub first_purchase: DateTime<Utc>,
    pub last_purchase: DateTime<Utc>,
    /// Representative inter-purchase interval in days, floored at 1 for
    /// single-bucket customers so downstream ratios never divide by zero.
    pub inter_purchase_time: f64,
    /// Number of distinct date buckets (frequency proxy, `ni`).
    pub purchase_count: u32,
    pub recency_days: f64,
    pub monetary_value: f64,
    #[serde(default)]
    pub attrs: HashMap<String, serde_json::Value>,
}

/// Persisted population statistics for one cohort, keyed by `cohort_key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohortStatistics {
    pub cohort_key: String,
    /// Median of `recency_days / inter_purchase_time` across the cohort.
    pub nes_median: f64,
    pub customers: u64,
    /// Non-finite ratios excluded from the median.
    pub excluded: u64,
    pub computed_at: DateTime<Utc>,
}

/// A customer with lifecycle, value-band, and activity-band labels attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedCustomer {
    #[serde(flatten)]
    pub customer: CustomerAggregate,
    pub nes_ratio: f64,
    pub lifecycle_stage: String,
    pub value_level: BandLevel,
    pub activity_level: BandLevel,
}

/// Population-relative tercile band. Serializes with the labels the trend
/// tables have always used.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BandLevel {
    #[serde(rename = "低")]
    Low,
    #[serde(rename = "中")]
    Mid,
    #[serde(rename = "高")]
    High,
}

/// Lifecycle labels for recency-threshold mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecencyStage {
    Active,
    Sleepy,
    HalfSleepy,
    Dormant,
}

impl RecencyStage {
    pub fn label(&self) -> &'static str {
        match self {
            RecencyStage::Active => "active",
            RecencyStage::Sleepy => "sleepy",
            RecencyStage::HalfSleepy => "half_sleepy",
            RecencyStage::Dormant => "dormant",
        }
    }

    /// Labels in ascending threshold order; the last is the terminal stage.
    pub fn ordered() -> [RecencyStage; 4] {
        [
            RecencyStage::Active,
            RecencyStage::Sleepy,
            RecencyStage::HalfSleepy,
            RecencyStage::Dormant,
        ]
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationMode {
    RecencyThreshold,
    NesRatioBreaks,
}

impl std::str::FromStr for ClassificationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recency_threshold" => Ok(ClassificationMode::RecencyThreshold),
            "nes_ratio_breaks" => Ok(ClassificationMode::NesRatioBreaks),
            other => Err(format!("unknown classification mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimeGranularity {
    Day,
    Month,
}

impl std::str::FromStr for TimeGranularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" => Ok(TimeGranularity::Day),
            "month" => Ok(TimeGranularity::Month),
            other => Err(format!("unknown time granularity '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimeWindow {
    #[default]
    AllTime,
    TrailingYear,
}

/// Dimension slice for trend aggregation. `None` means "do not restrict".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TrendFilter {
    pub source: Option<String>,
    pub state: Option<String>,
    pub product_line: Option<String>,
    #[serde(default)]
    pub window: TimeWindow,
}

impl TrendFilter {
    /// Stable storage key for replace-by-key trend persistence.
    pub fn storage_key(&self) -> String {
        [
            self.source.as_deref().unwrap_or("ALL"),
            self.state.as_deref().unwrap_or("ALL"),
            self.product_line.as_deref().unwrap_or("ALL"),
            match self.window {
                TimeWindow::AllTime => "all_time",
                TimeWindow::TrailingYear => "trailing_year",
            },
        ]
        .join("|")
    }
}

/// One row per (filter, time bucket, lifecycle label) in the trend table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendBucket {
    pub filter: TrendFilter,
    pub granularity: TimeGranularity,
    pub bucket: NaiveDate,
    pub lifecycle_stage: String,
    /// Distinct customers in the (filter, bucket) slice, across all labels.
    pub num_customers: u64,
    pub nes_count: u64,
    pub nes_prop: f64,
    /// Sum of monetary value for this label.
    pub nes_mvalue: f64,
    /// Mean monetary value for this label.
    pub nes_mmean: f64,
}

/// Signed difference `later - earlier` in fractional days.
pub fn days_between(later: DateTime<Utc>, earlier: DateTime<Utc>) -> f64 {
    (later - earlier).num_milliseconds() as f64 / 86_400_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_days_between_fractional() {
        let a = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap();
        assert!((days_between(b, a) - 1.5).abs() < 1e-9);
        assert!((days_between(a, b) + 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_band_level_serializes_to_cjk_labels() {
        assert_eq!(serde_json::to_string(&BandLevel::Low).unwrap(), "\"低\"");
        assert_eq!(serde_json::to_string(&BandLevel::Mid).unwrap(), "\"中\"");
        assert_eq!(serde_json::to_string(&BandLevel::High).unwrap(), "\"高\"");
    }

    #[test]
    fn test_trend_filter_storage_key() {
        let filter = TrendFilter {
            source: Some("amazon".to_string()),
            state: None,
            product_line: Some("books".to_string()),
            window: TimeWindow::TrailingYear,
        };
        assert_eq!(filter.storage_key(), "amazon|ALL|books|trailing_year");
        assert_eq!(TrendFilter::default().storage_key(), "ALL|ALL|ALL|all_time");
    }
}
