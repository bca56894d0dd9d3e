//! PyO3 bindings for cdx-imbalance Rust components.
//!
//! Exposes the Rust implementations to Python reporting code:
//! - Spread / price / upfront conversions
//! - Trade classification
//! - Incremental imbalance pipeline with bucket snapshots

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use cdx_core::{
    ClassifiedTrade as RustClassifiedTrade, Config as RustConfig, CounterpartyFlags,
    ImbalanceBucket as RustImbalanceBucket, QuoteNotation, RawQuote, RawTrade,
    TradeLabel as RustTradeLabel, TradeSide,
};
use cdx_ingestion::economics::{self, InstrumentTerms, Maturity};
use cdx_ingestion::{Normalizer, ReferenceQuote, ReferenceSeries, TradeClassifier};
use cdx_pipeline::Pipeline;

fn value_error(e: impl std::fmt::Display) -> PyErr {
    PyValueError::new_err(e.to_string())
}

// ============================================================================
// Python-exposed Types
// ============================================================================

/// Inferred trade initiator.
#[pyclass(eq, eq_int)]
#[derive(Clone, Copy, PartialEq)]
pub enum TradeLabel {
    BuyerInitiated = 1,
    SellerInitiated = -1,
    Indeterminate = 0,
}

#[pymethods]
impl TradeLabel {
    #[getter]
    fn sign(&self) -> i8 {
        *self as i8
    }
}

impl From<RustTradeLabel> for TradeLabel {
    fn from(label: RustTradeLabel) -> Self {
        match label {
            RustTradeLabel::BuyerInitiated => TradeLabel::BuyerInitiated,
            RustTradeLabel::SellerInitiated => TradeLabel::SellerInitiated,
            RustTradeLabel::Indeterminate => TradeLabel::Indeterminate,
        }
    }
}

/// A public trade report.
#[pyclass]
#[derive(Clone)]
pub struct Trade {
    #[pyo3(get, set)]
    pub ts_ms: i64,
    #[pyo3(get, set)]
    pub instrument_id: String,
    #[pyo3(get, set)]
    pub notional: f64,
    /// Reported quote value.
    #[pyo3(get, set)]
    pub value: f64,
    /// "spread", "price" or "upfront".
    #[pyo3(get, set)]
    pub kind: String,
    /// "bps", "decimal" or "percentage".
    #[pyo3(get, set)]
    pub notation: String,
    #[pyo3(get, set)]
    pub dissemination_id: String,
    /// "buy", "sell" or None.
    #[pyo3(get, set)]
    pub side: Option<String>,
}

#[pymethods]
impl Trade {
    #[new]
    #[pyo3(signature = (ts_ms, instrument_id, notional, value, kind="spread", notation="bps", dissemination_id="", side=None))]
    #[allow(clippy::too_many_arguments)]
    fn new(
        ts_ms: i64,
        instrument_id: String,
        notional: f64,
        value: f64,
        kind: &str,
        notation: &str,
        dissemination_id: &str,
        side: Option<String>,
    ) -> Self {
        Trade {
            ts_ms,
            instrument_id,
            notional,
            value,
            kind: kind.to_string(),
            notation: notation.to_string(),
            dissemination_id: dissemination_id.to_string(),
            side,
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "Trade(ts_ms={}, instrument_id={:?}, notional={}, {}={} {})",
            self.ts_ms, self.instrument_id, self.notional, self.kind, self.value, self.notation
        )
    }
}

impl TryFrom<&Trade> for RawTrade {
    type Error = PyErr;

    fn try_from(t: &Trade) -> PyResult<Self> {
        let notation = QuoteNotation::parse(&t.notation)
            .ok_or_else(|| value_error(format!("unknown notation {:?}", t.notation)))?;
        let quote = match t.kind.to_ascii_lowercase().as_str() {
            "spread" => RawQuote::Spread { value: t.value, notation },
            "price" => RawQuote::Price { value: t.value, notation },
            "upfront" => RawQuote::Upfront { value: t.value, notation },
            other => return Err(value_error(format!("unknown quote kind {other:?}"))),
        };
        let side = match t.side.as_deref() {
            None => None,
            Some(s) => Some(
                TradeSide::parse(s).ok_or_else(|| value_error(format!("unknown side {s:?}")))?,
            ),
        };
        Ok(RawTrade {
            ts_ms: t.ts_ms,
            dissemination_id: t.dissemination_id.clone(),
            instrument_id: t.instrument_id.clone(),
            notional: t.notional,
            currency: None,
            quote,
            flags: CounterpartyFlags::default(),
            side,
        })
    }
}

/// A normalized trade with its inferred label.
#[pyclass]
#[derive(Clone)]
pub struct ClassifiedTrade {
    #[pyo3(get)]
    pub ts_ms: i64,
    #[pyo3(get)]
    pub instrument_id: String,
    #[pyo3(get)]
    pub notional: f64,
    #[pyo3(get)]
    pub spread_bps: f64,
    #[pyo3(get)]
    pub price: f64,
    #[pyo3(get)]
    pub risky_dv01: f64,
    #[pyo3(get)]
    pub label: TradeLabel,
    #[pyo3(get)]
    pub confidence: f64,
    #[pyo3(get)]
    pub reference_bps: Option<f64>,
}

#[pymethods]
impl ClassifiedTrade {
    #[getter]
    fn signed_notional(&self) -> f64 {
        self.notional * self.label.sign() as f64
    }

    fn __repr__(&self) -> String {
        format!(
            "ClassifiedTrade(ts_ms={}, instrument_id={:?}, spread_bps={:.4}, label={})",
            self.ts_ms,
            self.instrument_id,
            self.spread_bps,
            self.label.sign()
        )
    }
}

impl From<RustClassifiedTrade> for ClassifiedTrade {
    fn from(ct: RustClassifiedTrade) -> Self {
        ClassifiedTrade {
            ts_ms: ct.ts_ms(),
            instrument_id: ct.instrument_id().to_string(),
            notional: ct.notional(),
            spread_bps: ct.trade.spread_bps,
            price: ct.trade.price,
            risky_dv01: ct.trade.risky_dv01,
            label: ct.label.into(),
            confidence: ct.confidence,
            reference_bps: ct.reference_bps,
        }
    }
}

/// Imbalance for one (instrument, bucket).
#[pyclass]
#[derive(Clone)]
pub struct ImbalanceBucket {
    #[pyo3(get)]
    pub instrument_id: String,
    #[pyo3(get)]
    pub bucket_start_ms: i64,
    #[pyo3(get)]
    pub bucket_end_ms: i64,
    #[pyo3(get)]
    pub buy_notional: f64,
    #[pyo3(get)]
    pub sell_notional: f64,
    #[pyo3(get)]
    pub indeterminate_notional: f64,
    #[pyo3(get)]
    pub net_imbalance: f64,
    #[pyo3(get)]
    pub total_notional: f64,
    #[pyo3(get)]
    pub trade_count: u64,
    #[pyo3(get)]
    pub net_dv01: f64,
    #[pyo3(get)]
    pub avg_spread_bps: Option<f64>,
}

#[pymethods]
impl ImbalanceBucket {
    #[getter]
    fn imbalance_ratio(&self) -> f64 {
        let directional = self.buy_notional + self.sell_notional;
        if directional > 0.0 {
            self.net_imbalance / directional
        } else {
            0.0
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "ImbalanceBucket(instrument_id={:?}, start={}, buy={}, sell={}, net={}, trades={})",
            self.instrument_id,
            self.bucket_start_ms,
            self.buy_notional,
            self.sell_notional,
            self.net_imbalance,
            self.trade_count
        )
    }
}

impl From<RustImbalanceBucket> for ImbalanceBucket {
    fn from(b: RustImbalanceBucket) -> Self {
        ImbalanceBucket {
            instrument_id: b.instrument_id,
            bucket_start_ms: b.bucket_start_ms,
            bucket_end_ms: b.bucket_end_ms,
            buy_notional: b.buy_notional,
            sell_notional: b.sell_notional,
            indeterminate_notional: b.indeterminate_notional,
            net_imbalance: b.net_imbalance,
            total_notional: b.total_notional,
            trade_count: b.trade_count,
            net_dv01: b.net_dv01,
            avg_spread_bps: b.avg_spread_bps,
        }
    }
}

// ============================================================================
// Conversion Functions
// ============================================================================

/// Terms for a constant tenor. Rejects a tenor the conversions cannot price.
fn terms(coupon_bps: f64, recovery_rate: f64, discount_rate: f64, years: f64) -> PyResult<InstrumentTerms> {
    economics::check_years(years).map_err(value_error)?;
    Ok(InstrumentTerms {
        coupon_bps,
        recovery_rate,
        discount_rate,
        maturity: Maturity::Tenor(years),
        ..InstrumentTerms::standard(years)
    })
}

/// Price (percent of par) for a running spread.
#[pyfunction]
#[pyo3(signature = (spread_bps, years=5.0, coupon_bps=100.0, recovery_rate=0.4, discount_rate=0.0))]
fn spread_to_price(spread_bps: f64, years: f64, coupon_bps: f64, recovery_rate: f64, discount_rate: f64) -> PyResult<f64> {
    let terms = terms(coupon_bps, recovery_rate, discount_rate, years)?;
    Ok(economics::spread_to_price(spread_bps, years, &terms))
}

/// Running spread (bps) for a price.
#[pyfunction]
#[pyo3(signature = (price, years=5.0, coupon_bps=100.0, recovery_rate=0.4, discount_rate=0.0))]
fn price_to_spread(price: f64, years: f64, coupon_bps: f64, recovery_rate: f64, discount_rate: f64) -> PyResult<f64> {
    let terms = terms(coupon_bps, recovery_rate, discount_rate, years)?;
    economics::price_to_spread(price, years, &terms).map_err(value_error)
}

/// Upfront (fraction of notional) for a running spread.
#[pyfunction]
#[pyo3(signature = (spread_bps, years=5.0, coupon_bps=100.0, recovery_rate=0.4, discount_rate=0.0))]
fn spread_to_upfront(spread_bps: f64, years: f64, coupon_bps: f64, recovery_rate: f64, discount_rate: f64) -> PyResult<f64> {
    let terms = terms(coupon_bps, recovery_rate, discount_rate, years)?;
    Ok(economics::spread_to_upfront(spread_bps, years, &terms))
}

/// Running spread (bps) for an upfront fraction.
#[pyfunction]
#[pyo3(signature = (upfront, years=5.0, coupon_bps=100.0, recovery_rate=0.4, discount_rate=0.0))]
fn upfront_to_spread(upfront: f64, years: f64, coupon_bps: f64, recovery_rate: f64, discount_rate: f64) -> PyResult<f64> {
    let terms = terms(coupon_bps, recovery_rate, discount_rate, years)?;
    economics::upfront_to_spread(upfront, years, &terms).map_err(value_error)
}

/// Label a spread against a reference. Returns (label, confidence).
#[pyfunction]
#[pyo3(signature = (spread_bps, reference_bps, threshold_bps=0.25))]
fn classify_spread(spread_bps: f64, reference_bps: Option<f64>, threshold_bps: f64) -> (TradeLabel, f64) {
    let (label, _, confidence) = cdx_ingestion::classify_spread(spread_bps, reference_bps, threshold_bps);
    (label.into(), confidence)
}

// ============================================================================
// Python-exposed Engine Classes
// ============================================================================

/// Trade classifier with default economic terms.
#[pyclass]
pub struct PyTradeClassifier {
    normalizer: Normalizer,
    inner: TradeClassifier,
}

#[pymethods]
impl PyTradeClassifier {
    #[new]
    #[pyo3(signature = (threshold_bps=0.25, trust_explicit_side=true))]
    fn new(threshold_bps: f64, trust_explicit_side: bool) -> Self {
        PyTradeClassifier {
            normalizer: Normalizer::from_config(&RustConfig::default()),
            inner: TradeClassifier::new(threshold_bps, trust_explicit_side),
        }
    }

    /// Normalize and classify a single trade against a reference level.
    #[pyo3(signature = (trade, reference_bps=None))]
    fn classify(&mut self, trade: &Trade, reference_bps: Option<f64>) -> PyResult<ClassifiedTrade> {
        let raw = RawTrade::try_from(trade)?;
        let ts_ms = raw.ts_ms;
        let normalized = self.normalizer.normalize(raw).map_err(value_error)?;
        let reference = reference_bps.map(|level_bps| ReferenceQuote { ts_ms, level_bps });
        Ok(self.inner.classify(normalized, reference).into())
    }

    /// Get classification statistics (total, buyer, seller, indeterminate).
    fn stats(&self) -> (u64, u64, u64, u64) {
        let s = self.inner.stats();
        (s.total_trades, s.buyer_initiated, s.seller_initiated, s.indeterminate)
    }

    /// Reset statistics.
    fn reset_stats(&mut self) {
        self.inner.reset_stats();
    }
}

/// Incremental normalize / classify / aggregate pipeline.
#[pyclass]
pub struct PyImbalancePipeline {
    inner: Pipeline<ReferenceSeries>,
}

#[pymethods]
impl PyImbalancePipeline {
    #[new]
    #[pyo3(signature = (config_json=None, threshold_bps=None, bucket_minutes=None))]
    fn new(config_json: Option<&str>, threshold_bps: Option<f64>, bucket_minutes: Option<u32>) -> PyResult<Self> {
        let mut config = match config_json {
            Some(json) => RustConfig::from_json_str(json).map_err(value_error)?,
            None => RustConfig::default(),
        };
        if let Some(threshold) = threshold_bps {
            config.classifier.threshold_bps = threshold;
        }
        if let Some(minutes) = bucket_minutes {
            config.aggregation.bucket_width_minutes = minutes;
        }
        let series = ReferenceSeries::from_config(&config.classifier);
        Ok(PyImbalancePipeline {
            inner: Pipeline::new(&config, series).map_err(value_error)?,
        })
    }

    /// Add a reference mid level (bps). Returns False for non-finite levels.
    fn add_reference(&mut self, instrument_id: &str, ts_ms: i64, level_bps: f64) -> bool {
        self.inner.provider_mut().add_level(instrument_id, ts_ms, level_bps)
    }

    /// Process one trade. Returns None if its economics were rejected.
    fn process(&mut self, trade: &Trade) -> PyResult<Option<ClassifiedTrade>> {
        let raw = RawTrade::try_from(trade)?;
        Ok(self.inner.process(raw).map(Into::into))
    }

    /// Copy of every open bucket.
    fn snapshot(&self) -> Vec<ImbalanceBucket> {
        self.inner.snapshot().into_buckets().into_iter().map(Into::into).collect()
    }

    /// Remove and return buckets ending at or before `ts_ms`.
    fn finalize_before(&mut self, ts_ms: i64) -> Vec<ImbalanceBucket> {
        self.inner
            .aggregator_mut()
            .finalize_before(ts_ms)
            .into_iter()
            .map(Into::into)
            .collect()
    }

    /// (seen, processed, skipped)
    fn counts(&self) -> (u64, u64, u64) {
        let c = self.inner.counts();
        (c.records_seen, c.processed, c.skipped())
    }

    /// Full run report as JSON.
    fn report_json(&self) -> PyResult<String> {
        self.inner.report().to_json_pretty().map_err(value_error)
    }
}

// ============================================================================
// Module Definition
// ============================================================================

/// CDX Imbalance Core - Rust components for Python.
#[pymodule]
fn cdx_imbalance_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Types
    m.add_class::<TradeLabel>()?;
    m.add_class::<Trade>()?;
    m.add_class::<ClassifiedTrade>()?;
    m.add_class::<ImbalanceBucket>()?;

    // Conversions
    m.add_function(wrap_pyfunction!(spread_to_price, m)?)?;
    m.add_function(wrap_pyfunction!(price_to_spread, m)?)?;
    m.add_function(wrap_pyfunction!(spread_to_upfront, m)?)?;
    m.add_function(wrap_pyfunction!(upfront_to_spread, m)?)?;
    m.add_function(wrap_pyfunction!(classify_spread, m)?)?;

    // Engine classes
    m.add_class::<PyTradeClassifier>()?;
    m.add_class::<PyImbalancePipeline>()?;

    Ok(())
}
