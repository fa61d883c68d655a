pub mod config;
pub mod error;
pub mod types;

pub use config::{AppConfig, ClassificationParams};
pub use error::{InsightError, InsightResult};
