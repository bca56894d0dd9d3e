//! Pipeline driver for the cdx-imbalance system.
//!
//! This crate provides:
//! - The normalize / classify / aggregate run loop
//! - Run reports with cross-bucket statistics
//! - Logging setup for the `cdx-imbalance` binary

pub mod logging;
pub mod pipeline;
pub mod report;

pub use logging::init_logging;
pub use pipeline::Pipeline;
pub use report::{BucketRef, ImbalanceSummary, RunCounts, RunReport};
