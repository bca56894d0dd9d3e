//! Data ingestion and normalization for the cdx-imbalance system.
//!
//! This crate handles:
//! - DTCC repository records (parsing, amendments, product filtering)
//! - Spread / price / upfront conversion
//! - Reference level lookup
//! - Trade initiator inference

pub mod classifier;
pub mod dtcc;
pub mod economics;
pub mod normalize;
pub mod reference;

pub use classifier::{classify_spread, ClassificationStats, TradeClassifier};
pub use dtcc::{resolve_amendments, ActionType, DtccReader, DtccRecord, ProductFilter};
pub use economics::{InstrumentTerms, Maturity};
pub use normalize::{Normalizer, TermsBook};
pub use reference::{
    load_reference_csv, ConstantReference, NoReference, ReferenceProvider, ReferenceQuote,
    ReferenceSeries,
};
