use serde::Deserialize;

use crate::error::{InsightError, InsightResult};

/// Root application configuration. Loaded from environment variables
/// with the prefix `INSIGHT_FORGE__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub classification: ClassificationParams,
    #[serde(default)]
    pub trend: TrendConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Breakpoints and labels for the lifecycle classifier. Passed explicitly into
/// every classification call; there is no process-wide mutable configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassificationParams {
    /// Ascending day-count cutoffs for recency-threshold mode
    /// (active / sleepy / half_sleepy, beyond the last → dormant).
    #[serde(default = "default_recency_thresholds")]
    pub recency_thresholds: Vec<f64>,
    /// Right-closed interval upper bounds for NES-ratio mode. The terminal
    /// break must be infinite so every ratio lands in a bucket.
    #[serde(default = "default_nes_ratio_breaks")]
    pub nes_ratio_breaks: Vec<f64>,
    /// One label per break, in break order.
    #[serde(default = "default_nes_labels")]
    pub nes_labels: Vec<String>,
    /// Lower and upper population quantiles for the value/activity bands.
    #[serde(default = "default_value_quantiles")]
    pub value_quantiles: [f64; 2],
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrendConfig {
    /// Length of the trailing time-window filter, anchored at the population's
    /// max purchase timestamp rather than the wall clock.
    #[serde(default = "default_trailing_window_days")]
    pub trailing_window_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Dimension fields carried from transactions into the derived tables
    /// with first-occurrence semantics.
    #[serde(default = "default_carry_fields")]
    pub carry_fields: Vec<String>,
    #[serde(default = "default_max_parallel_cohorts")]
    pub max_parallel_cohorts: usize,
}

// Default functions
fn default_recency_thresholds() -> Vec<f64> {
    vec![30.0, 90.0, 180.0]
}
fn default_nes_ratio_breaks() -> Vec<f64> {
    vec![0.0, 1.0, 2.0, 2.5, f64::INFINITY]
}
fn default_nes_labels() -> Vec<String> {
    ["N", "E0", "S1", "S2", "S3"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_value_quantiles() -> [f64; 2] {
    [0.33, 0.67]
}
fn default_trailing_window_days() -> i64 {
    365
}
fn default_carry_fields() -> Vec<String> {
    ["source", "state", "zip", "product_line"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_max_parallel_cohorts() -> usize {
    4
}

impl Default for ClassificationParams {
    fn default() -> Self {
        Self {
            recency_thresholds: default_recency_thresholds(),
            nes_ratio_breaks: default_nes_ratio_breaks(),
            nes_labels: default_nes_labels(),
            value_quantiles: default_value_quantiles(),
        }
    }
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            trailing_window_days: default_trailing_window_days(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            carry_fields: default_carry_fields(),
            max_parallel_cohorts: default_max_parallel_cohorts(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            classification: ClassificationParams::default(),
            trend: TrendConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl ClassificationParams {
    /// Reject malformed breakpoints before any classification runs; results
    /// against non-monotonic breaks would be undefined.
    pub fn validate(&self) -> InsightResult<()> {
        if self.recency_thresholds.len() != 3 {
            return Err(InsightError::Config(format!(
                "recency_thresholds needs exactly 3 cutoffs (active/sleepy/half_sleepy), got {}",
                self.recency_thresholds.len()
            )));
        }
        if !is_strictly_increasing(&self.recency_thresholds) {
            return Err(InsightError::Config(format!(
                "recency_thresholds must be strictly increasing: {:?}",
                self.recency_thresholds
            )));
        }
        if self.nes_ratio_breaks.len() != self.nes_labels.len() {
            return Err(InsightError::Config(format!(
                "nes_ratio_breaks ({}) and nes_labels ({}) must have the same length",
                self.nes_ratio_breaks.len(),
                self.nes_labels.len()
            )));
        }
        if !is_strictly_increasing(&self.nes_ratio_breaks) {
            return Err(InsightError::Config(format!(
                "nes_ratio_breaks must be strictly increasing: {:?}",
                self.nes_ratio_breaks
            )));
        }
        match self.nes_ratio_breaks.last() {
            Some(last) if last.is_infinite() => {}
            _ => {
                return Err(InsightError::Config(
                    "the terminal NES ratio break must be infinite".to_string(),
                ))
            }
        }
        let [lo, hi] = self.value_quantiles;
        if !(0.0..=1.0).contains(&lo) || !(0.0..=1.0).contains(&hi) || lo >= hi {
            return Err(InsightError::Config(format!(
                "value_quantiles must satisfy 0 <= lo < hi <= 1, got [{lo}, {hi}]"
            )));
        }
        Ok(())
    }
}

fn is_strictly_increasing(values: &[f64]) -> bool {
    values.windows(2).all(|w| w[0] < w[1])
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("INSIGHT_FORGE")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
