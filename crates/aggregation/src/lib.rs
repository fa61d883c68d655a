//! Transaction aggregation — collapses raw sales rows into per-customer-per-day
//! date buckets and then into lifetime RFM aggregates.

pub mod customer;
pub mod date_bucket;

pub use customer::CustomerAggregator;
pub use date_bucket::{Bucketized, DateBucketAggregator};
