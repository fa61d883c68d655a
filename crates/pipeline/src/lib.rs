//! Staged batch pipeline: transactions → date buckets → customer aggregates →
//! cohort median → classification → trend tables.

pub mod runner;

pub use runner::{CohortJob, CohortRunReport, DnaPipeline, RunStatus};
