//! Core types and configuration for the cdx-imbalance system.
//!
//! This crate provides shared types used across all other crates:
//! - Trade records at each pipeline stage (raw, normalized, classified)
//! - Imbalance bucket summaries
//! - Configuration structures
//! - Common error types

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{ConversionError, Error, Result};
pub use types::*;
