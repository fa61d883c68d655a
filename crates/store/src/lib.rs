//! Collaborator interfaces for the segmentation pipeline — the transaction
//! read side, the derived-table write side, and an in-memory reference
//! implementation of both.

pub mod memory;
pub mod sink;
pub mod source;

pub use memory::MemoryStore;
pub use sink::DerivedStore;
pub use source::{TransactionQuery, TransactionSource};
