//! Customer segmentation — cohort-level NES median estimation and lifecycle,
//! value-band, and activity-band classification.

pub mod classifier;
pub mod cohort;
pub mod quantile;

pub use classifier::{Classified, LifecycleClassifier};
pub use cohort::{compute_cohort_median, CohortMedianEstimator};
