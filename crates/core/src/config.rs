//! Configuration structures for the cdx-imbalance system.
//!
//! Every component receives its section explicitly; nothing here is global.

use crate::error::{Error, Result};
use crate::types::{QuoteBasis, QuoteNotation};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Longest tenor the conversion utility accepts, in years.
pub const MAX_TENOR_YEARS: f64 = 50.0;

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Raw record source configuration.
    pub source: SourceConfig,
    /// Default economic terms.
    pub conversion: ConversionConfig,
    /// Per-instrument overrides.
    pub instruments: Vec<InstrumentConfig>,
    /// Trade classification configuration.
    pub classifier: ClassifierConfig,
    /// Bucketing configuration.
    pub aggregation: AggregationConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Config {
    /// Parse a JSON document. Missing sections take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    /// Look up instrument overrides by id or ticker.
    pub fn instrument(&self, id: &str) -> Option<&InstrumentConfig> {
        self.instruments
            .iter()
            .find(|i| i.id == id || i.ticker.as_deref() == Some(id))
    }

    /// Check value ranges across all sections.
    pub fn validate(&self) -> Result<()> {
        let c = &self.classifier;
        if !c.threshold_bps.is_finite() || c.threshold_bps < 0.0 {
            return Err(Error::config(format!(
                "classifier.threshold_bps must be finite and >= 0, got {}",
                c.threshold_bps
            )));
        }
        if c.latency_window_ms < 0 {
            return Err(Error::config("classifier.latency_window_ms must be >= 0"));
        }

        let a = &self.aggregation;
        if a.bucket_width_minutes == 0 {
            return Err(Error::config("aggregation.bucket_width_minutes must be > 0"));
        }
        if !a.consistency_tolerance.is_finite() || a.consistency_tolerance < 0.0 {
            return Err(Error::config("aggregation.consistency_tolerance must be >= 0"));
        }

        check_terms("conversion", Some(self.conversion.coupon_bps), Some(self.conversion.recovery_rate))?;
        if !self.conversion.discount_rate.is_finite() {
            return Err(Error::config("conversion.discount_rate must be finite"));
        }
        check_tenor("conversion", self.conversion.tenor_years)?;

        for inst in &self.instruments {
            if inst.id.trim().is_empty() {
                return Err(Error::config("instrument id must not be empty"));
            }
            check_terms(&inst.id, inst.coupon_bps, inst.recovery_rate)?;
            check_tenor(&inst.id, inst.tenor_years)?;
        }
        Ok(())
    }
}

fn check_tenor(section: &str, tenor_years: Option<f64>) -> Result<()> {
    match tenor_years {
        Some(tenor) if !(tenor > 0.0 && tenor <= MAX_TENOR_YEARS) => Err(Error::config(format!(
            "{section}: tenor_years must be in (0, {MAX_TENOR_YEARS}], got {tenor}"
        ))),
        _ => Ok(()),
    }
}

fn check_terms(section: &str, coupon_bps: Option<f64>, recovery_rate: Option<f64>) -> Result<()> {
    if let Some(coupon) = coupon_bps {
        if !coupon.is_finite() || coupon < 0.0 {
            return Err(Error::config(format!("{section}: coupon_bps must be >= 0")));
        }
    }
    if let Some(recovery) = recovery_rate {
        if !(0.0..1.0).contains(&recovery) {
            return Err(Error::config(format!("{section}: recovery_rate must be in [0, 1)")));
        }
    }
    Ok(())
}

/// Raw record source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Base URL of the end-of-day cumulative files.
    pub eod_base_url: String,
    /// Base URL of the intraday slice files.
    pub slice_base_url: String,
    /// Asset class segment of the file names.
    pub asset_class: String,
    /// Regex a product name must match (e.g. `CDX\.NA\.IG\.S\d+`).
    pub product_pattern: Option<String>,
    /// UPIs to keep. Empty keeps everything the pattern admits.
    pub upi_allow_list: Vec<String>,
    /// Collapse corrections and drop cancels before processing.
    pub resolve_amendments: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            eod_base_url: "https://kgc0418-tdw-data-0.s3.amazonaws.com/cftc/eod/".to_string(),
            slice_base_url: "https://pddata.dtcc.com/ppd/api/report/intraday/cftc/".to_string(),
            asset_class: "CREDITS".to_string(),
            product_pattern: None,
            upi_allow_list: Vec::new(),
            resolve_amendments: true,
        }
    }
}

/// Premium accrual day count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DayCount {
    /// Actual/360, the standard CDS convention.
    #[default]
    Act360,
    /// 30/360.
    Thirty360,
    /// Actual/365 fixed.
    Act365F,
}

/// Default economic terms, applied where an instrument has no override.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    /// Standard running coupon (bps).
    pub coupon_bps: f64,
    /// Assumed recovery rate.
    pub recovery_rate: f64,
    /// Flat continuously-compounded discount rate.
    pub discount_rate: f64,
    /// Tenor when no maturity date is configured. `None` means terms are missing.
    pub tenor_years: Option<f64>,
    /// Premium day count.
    pub day_count: DayCount,
    /// Apply these defaults to instruments without an override entry.
    pub use_default_terms: bool,
    /// Notation assumed when a spread arrives without one.
    pub default_spread_notation: QuoteNotation,
    /// Notation assumed when a price arrives without one.
    pub default_price_notation: QuoteNotation,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            coupon_bps: 100.0,
            recovery_rate: 0.4,
            discount_rate: 0.0,
            tenor_years: Some(5.0),
            day_count: DayCount::Act360,
            use_default_terms: true,
            default_spread_notation: QuoteNotation::Decimal,
            default_price_notation: QuoteNotation::Percentage,
        }
    }
}

/// Per-instrument overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentConfig {
    /// Instrument id (UPI or product name).
    pub id: String,
    /// Market data ticker (e.g. "CDXIG5 Curncy").
    pub ticker: Option<String>,
    pub coupon_bps: Option<f64>,
    pub recovery_rate: Option<f64>,
    /// Scheduled termination date.
    pub maturity: Option<NaiveDate>,
    pub tenor_years: Option<f64>,
    pub day_count: Option<DayCount>,
    /// How the reference feed quotes this instrument.
    pub reference_basis: QuoteBasis,
}

/// Trade classification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Minimum |spread - reference| (bps) for a directional label. Ties are indeterminate.
    pub threshold_bps: f64,
    /// Maximum distance between trade and reference tick (ms).
    pub latency_window_ms: i64,
    /// Allow reference ticks after the trade time.
    pub allow_lookahead: bool,
    /// Use an explicit side from the source when present.
    pub trust_explicit_side: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            threshold_bps: 0.25,
            latency_window_ms: 30_000,
            allow_lookahead: true,
            trust_explicit_side: true,
        }
    }
}

/// Bucketing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Bucket width in minutes.
    pub bucket_width_minutes: u32,
    /// Offset of the bucket grid from the Unix epoch, in minutes.
    pub anchor_offset_minutes: i32,
    /// Allowed drift between signed-notional sum and net imbalance, relative.
    pub consistency_tolerance: f64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            bucket_width_minutes: 1440,
            anchor_offset_minutes: 0,
            consistency_tolerance: 1e-9,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level filter (trace, debug, info, warn, error).
    pub level: String,
    /// Include module targets in log lines.
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_target: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.classifier.threshold_bps, 0.25);
        assert_eq!(config.classifier.latency_window_ms, 30_000);
        assert_eq!(config.aggregation.bucket_width_minutes, 1440);
        assert_eq!(config.conversion.coupon_bps, 100.0);
        assert_eq!(config.conversion.recovery_rate, 0.4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let json = r#"{
            "classifier": { "threshold_bps": 2.0 },
            "instruments": [
                { "id": "QZ0PH5HG4P9T", "ticker": "CDXIG5 Curncy", "maturity": "2030-06-20" }
            ]
        }"#;
        let config = Config::from_json_str(json).unwrap();
        assert_eq!(config.classifier.threshold_bps, 2.0);
        assert_eq!(config.classifier.latency_window_ms, 30_000);
        let inst = config.instrument("CDXIG5 Curncy").unwrap();
        assert_eq!(inst.id, "QZ0PH5HG4P9T");
        assert_eq!(inst.maturity, NaiveDate::from_ymd_opt(2030, 6, 20));
        assert_eq!(inst.reference_basis, QuoteBasis::Spread);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.classifier.threshold_bps = -1.0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.aggregation.bucket_width_minutes = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.instruments.push(InstrumentConfig {
            id: "X".to_string(),
            recovery_rate: Some(1.0),
            ..Default::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_caps_tenor() {
        let mut config = Config::default();
        config.conversion.tenor_years = Some(1e12);
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.conversion.tenor_years = Some(f64::NAN);
        assert!(config.validate().is_err());

        config.conversion.tenor_years = Some(MAX_TENOR_YEARS);
        assert!(config.validate().is_ok());

        config.instruments.push(InstrumentConfig {
            id: "X".to_string(),
            tenor_years: Some(MAX_TENOR_YEARS + 1.0),
            ..Default::default()
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("X: tenor_years"));
    }

    #[test]
    fn test_source_has_no_fetch_settings() {
        let json = serde_json::to_value(SourceConfig::default()).unwrap();
        let keys: Vec<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
        assert!(!keys.iter().any(|k| k.contains("timeout")));
        // Older files that still carry the key keep loading.
        let config = Config::from_json_str(r#"{ "source": { "request_timeout_secs": 30 } }"#).unwrap();
        assert!(config.source.resolve_amendments);
    }

    #[test]
    fn test_bad_json() {
        assert!(matches!(Config::from_json_str("{ nope"), Err(Error::Json(_))));
    }
}
