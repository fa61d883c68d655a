//! Read interface over raw transaction rows.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use insight_core::types::Transaction;
use insight_core::InsightResult;
use serde::{Deserialize, Serialize};

/// Filter applied when fetching transactions from a source.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TransactionQuery {
    /// Sales platform key (e.g. `amazon`, `ebay`, `official`). `None` fetches
    /// every source.
    pub source: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Restrict to specific customers; empty means all.
    #[serde(default)]
    pub customer_ids: Vec<String>,
    /// Dimension equality filters matched against transaction attrs.
    #[serde(default)]
    pub dimensions: HashMap<String, String>,
}

/// Supplies raw transaction rows. Implementations own all I/O; the pipeline
/// core never retries or times out on its behalf.
pub trait TransactionSource: Send + Sync {
    fn fetch(&self, query: &TransactionQuery) -> InsightResult<Vec<Transaction>>;
}
