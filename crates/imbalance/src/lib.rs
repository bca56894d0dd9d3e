//! Order imbalance aggregation for the cdx-imbalance system.
//!
//! This crate handles:
//! - Bucket grid arithmetic
//! - Per-(instrument, bucket) buy/sell/indeterminate notional
//! - Snapshots, finalization and merging of partial aggregations

pub mod aggregator;
pub mod bucket;

pub use aggregator::{ImbalanceAggregator, ImbalanceSnapshot};
pub use bucket::{BucketKey, BucketWidth};
