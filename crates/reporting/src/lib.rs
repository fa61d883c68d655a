//! Trend reporting — per-segment counts, proportions, and monetary summaries
//! bucketed by day or month.

pub mod trend;

pub use trend::TrendAggregator;
