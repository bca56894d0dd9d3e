//! Reference (mid) spread levels for trade classification.
//!
//! A [`ReferenceProvider`] answers "what was the market for this instrument
//! around this time". Providers are read-only during classification.

use crate::dtcc::parse_timestamp;
use crate::normalize::Normalizer;
use cdx_core::{Config, Error, QuoteBasis, Result, TimestampMs};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;
use tracing::{debug, info, warn};

/// A reference level and the time it was observed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceQuote {
    pub ts_ms: TimestampMs,
    /// Mid spread in basis points.
    pub level_bps: f64,
}

/// Source of reference levels.
pub trait ReferenceProvider {
    /// Reference level for `instrument_id` at `ts_ms`, if one is usable.
    fn reference_level(&self, instrument_id: &str, ts_ms: TimestampMs) -> Option<ReferenceQuote>;
}

impl<T: ReferenceProvider + ?Sized> ReferenceProvider for &T {
    fn reference_level(&self, instrument_id: &str, ts_ms: TimestampMs) -> Option<ReferenceQuote> {
        (**self).reference_level(instrument_id, ts_ms)
    }
}

impl<T: ReferenceProvider + ?Sized> ReferenceProvider for Box<T> {
    fn reference_level(&self, instrument_id: &str, ts_ms: TimestampMs) -> Option<ReferenceQuote> {
        (**self).reference_level(instrument_id, ts_ms)
    }
}

/// Never has a reference. Every non-explicit trade is indeterminate.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReference;

impl ReferenceProvider for NoReference {
    fn reference_level(&self, _instrument_id: &str, _ts_ms: TimestampMs) -> Option<ReferenceQuote> {
        None
    }
}

/// Same level for every instrument at every time.
#[derive(Debug, Clone, Copy)]
pub struct ConstantReference {
    pub level_bps: f64,
}

impl ConstantReference {
    pub fn new(level_bps: f64) -> Self {
        Self { level_bps }
    }
}

impl ReferenceProvider for ConstantReference {
    fn reference_level(&self, _instrument_id: &str, ts_ms: TimestampMs) -> Option<ReferenceQuote> {
        self.level_bps.is_finite().then_some(ReferenceQuote {
            ts_ms,
            level_bps: self.level_bps,
        })
    }
}

/// Time series of reference ticks per instrument.
///
/// Lookup picks the tick closest to the trade within the latency window.
/// Equal distance prefers the earlier tick. With lookahead disabled only
/// ticks at or before the trade count.
#[derive(Debug, Clone)]
pub struct ReferenceSeries {
    latency_window_ms: i64,
    allow_lookahead: bool,
    /// Sorted by timestamp.
    ticks: HashMap<String, Vec<ReferenceQuote>>,
}

impl ReferenceSeries {
    pub fn new(latency_window_ms: i64, allow_lookahead: bool) -> Self {
        Self {
            latency_window_ms: latency_window_ms.max(0),
            allow_lookahead,
            ticks: HashMap::new(),
        }
    }

    pub fn from_config(config: &cdx_core::config::ClassifierConfig) -> Self {
        Self::new(config.latency_window_ms, config.allow_lookahead)
    }

    /// Add a mid level. Non-finite levels are rejected.
    pub fn add_level(&mut self, instrument_id: &str, ts_ms: TimestampMs, level_bps: f64) -> bool {
        if !level_bps.is_finite() {
            return false;
        }
        let series = self.ticks.entry(instrument_id.to_string()).or_default();
        let quote = ReferenceQuote { ts_ms, level_bps };
        // Ticks usually arrive in order.
        if series.last().map_or(true, |last| last.ts_ms <= ts_ms) {
            series.push(quote);
        } else {
            let idx = series.partition_point(|q| q.ts_ms <= ts_ms);
            series.insert(idx, quote);
        }
        true
    }

    /// Add a bid/ask pair as its mid.
    pub fn add_bid_ask(
        &mut self,
        instrument_id: &str,
        ts_ms: TimestampMs,
        bid_bps: f64,
        ask_bps: f64,
    ) -> bool {
        self.add_level(instrument_id, ts_ms, 0.5 * (bid_bps + ask_bps))
    }

    /// Total ticks across instruments.
    pub fn len(&self) -> usize {
        self.ticks.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.values().all(Vec::is_empty)
    }

    pub fn instrument_count(&self) -> usize {
        self.ticks.len()
    }

    pub fn latency_window_ms(&self) -> i64 {
        self.latency_window_ms
    }

    pub fn clear(&mut self) {
        self.ticks.clear();
    }
}

impl ReferenceProvider for ReferenceSeries {
    fn reference_level(&self, instrument_id: &str, ts_ms: TimestampMs) -> Option<ReferenceQuote> {
        let series = self.ticks.get(instrument_id)?;
        let idx = series.partition_point(|q| q.ts_ms <= ts_ms);

        let before = idx.checked_sub(1).map(|i| series[i]);
        let after = if self.allow_lookahead {
            series.get(idx).copied()
        } else {
            None
        };

        let best = match (before, after) {
            (Some(b), Some(a)) => {
                if a.ts_ms.abs_diff(ts_ms) < ts_ms.abs_diff(b.ts_ms) {
                    a
                } else {
                    b
                }
            }
            (Some(b), None) => b,
            (None, Some(a)) => a,
            (None, None) => return None,
        };
        (best.ts_ms.abs_diff(ts_ms) <= self.latency_window_ms.unsigned_abs()).then_some(best)
    }
}

fn header_key(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Load reference ticks from CSV into `series`.
///
/// Columns: `timestamp`, `instrument_id`, then either `level` or
/// `bid` + `ask`, and an optional `basis` (`spread` or `price`). Instrument
/// ids may be tickers; they are mapped to configured ids. Price-basis levels
/// are converted to spreads through the instrument's terms. Bad rows are
/// logged and skipped.
///
/// Returns the number of ticks added.
pub fn load_reference_csv<R: Read>(
    reader: R,
    series: &mut ReferenceSeries,
    normalizer: &Normalizer,
    config: &Config,
) -> Result<usize> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = rdr
        .headers()
        .map_err(|e| Error::data(format!("reference header: {e}")))?
        .clone();

    let find = |names: &[&str]| {
        headers
            .iter()
            .position(|h| names.contains(&header_key(h).as_str()))
    };
    let ts_col = find(&["timestamp", "ts", "time", "datetime"])
        .ok_or_else(|| Error::data("reference file has no timestamp column"))?;
    let id_col = find(&["instrumentid", "instrument", "ticker", "upi"])
        .ok_or_else(|| Error::data("reference file has no instrument column"))?;
    let level_col = find(&["level", "mid", "value", "levelbps"]);
    let bid_col = find(&["bid"]);
    let ask_col = find(&["ask"]);
    let basis_col = find(&["basis"]);
    if level_col.is_none() && (bid_col.is_none() || ask_col.is_none()) {
        return Err(Error::data("reference file needs a level column or bid and ask"));
    }

    let mut added = 0;
    for (line, row) in rdr.records().enumerate() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                warn!(line = line + 2, error = %e, "Skipping unreadable reference row");
                continue;
            }
        };
        let field = |col: Option<usize>| col.and_then(|c| row.get(c)).filter(|s| !s.is_empty());
        let number = |col: Option<usize>| field(col).and_then(|s| s.parse::<f64>().ok());

        let Some(ts_ms) = field(Some(ts_col)).and_then(parse_timestamp) else {
            warn!(line = line + 2, "Skipping reference row with bad timestamp");
            continue;
        };
        let Some(raw_id) = field(Some(id_col)) else {
            warn!(line = line + 2, "Skipping reference row without instrument");
            continue;
        };
        let inst = config.instrument(raw_id);
        let instrument_id = inst.map_or(raw_id, |i| i.id.as_str());

        let level = match (number(level_col), number(bid_col), number(ask_col)) {
            (Some(level), _, _) => level,
            (None, Some(bid), Some(ask)) => 0.5 * (bid + ask),
            _ => {
                warn!(line = line + 2, instrument_id, "Skipping reference row without level");
                continue;
            }
        };
        let basis = field(basis_col)
            .and_then(QuoteBasis::parse)
            .or_else(|| inst.map(|i| i.reference_basis))
            .unwrap_or_default();

        match normalizer.level_to_spread(instrument_id, ts_ms, level, basis) {
            Ok(level_bps) => {
                if series.add_level(instrument_id, ts_ms, level_bps) {
                    added += 1;
                }
            }
            Err(e) => {
                warn!(line = line + 2, instrument_id, error = %e, "Skipping unconvertible reference level");
            }
        }
    }

    debug!(instruments = series.instrument_count(), "Reference series loaded");
    info!(ticks = added, "Loaded reference levels");
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn series() -> ReferenceSeries {
        let mut s = ReferenceSeries::new(1_000, true);
        s.add_level("IG", 10_000, 50.0);
        s.add_level("IG", 12_000, 52.0);
        s.add_level("IG", 11_000, 51.0); // out of order
        s
    }

    #[test]
    fn test_exact_and_nearest() {
        let s = series();
        assert_eq!(s.reference_level("IG", 11_000).unwrap().level_bps, 51.0);
        assert_eq!(s.reference_level("IG", 11_400).unwrap().level_bps, 51.0);
        assert_eq!(s.reference_level("IG", 11_600).unwrap().level_bps, 52.0);
    }

    #[test]
    fn test_tie_prefers_earlier() {
        let s = series();
        let q = s.reference_level("IG", 11_500).unwrap();
        assert_eq!(q.ts_ms, 11_000);
    }

    #[test]
    fn test_window() {
        let s = series();
        assert!(s.reference_level("IG", 13_000).is_some());
        assert!(s.reference_level("IG", 13_001).is_none());
        assert!(s.reference_level("IG", 8_999).is_none());
        assert!(s.reference_level("HY", 11_000).is_none());
    }

    #[test]
    fn test_no_lookahead() {
        let mut s = ReferenceSeries::new(1_000, false);
        s.add_level("IG", 10_000, 50.0);
        s.add_level("IG", 10_100, 60.0);
        assert_eq!(s.reference_level("IG", 10_090).unwrap().level_bps, 50.0);
        assert!(s.reference_level("IG", 9_990).is_none());
    }

    #[test]
    fn test_extreme_timestamps() {
        let mut s = ReferenceSeries::new(1_000, true);
        s.add_level("IG", i64::MIN, 40.0);
        s.add_level("IG", i64::MAX, 60.0);
        assert!(s.reference_level("IG", 0).is_none());
        assert_eq!(s.reference_level("IG", i64::MAX - 500).unwrap().level_bps, 60.0);
        assert_eq!(s.reference_level("IG", i64::MIN + 500).unwrap().level_bps, 40.0);
    }

    #[test]
    fn test_rejects_non_finite() {
        let mut s = ReferenceSeries::new(1_000, true);
        assert!(!s.add_level("IG", 0, f64::NAN));
        assert!(s.add_bid_ask("IG", 0, 49.0, 51.0));
        assert_eq!(s.len(), 1);
        assert_eq!(s.reference_level("IG", 0).unwrap().level_bps, 50.0);
    }

    #[test]
    fn test_constant_and_none() {
        let c = ConstantReference::new(100.0);
        assert_eq!(c.reference_level("X", 5).unwrap().level_bps, 100.0);
        assert!(NoReference.reference_level("X", 5).is_none());
        let boxed: Box<dyn ReferenceProvider> = Box::new(c);
        assert!(boxed.reference_level("X", 5).is_some());
    }

    #[test]
    fn test_load_csv() {
        let csv = "timestamp,instrument_id,level,basis\n\
                   2024-01-02T09:00:00Z,CDXIG5 Curncy,55.5,\n\
                   2024-01-02T09:00:10Z,IG,100.0,price\n\
                   garbage,IG,1,\n\
                   2024-01-02T09:00:20Z,IG,,\n";
        let mut config = Config::default();
        config.instruments.push(cdx_core::config::InstrumentConfig {
            id: "IG".to_string(),
            ticker: Some("CDXIG5 Curncy".to_string()),
            ..Default::default()
        });
        let normalizer = Normalizer::from_config(&config);
        let mut series = ReferenceSeries::from_config(&config.classifier);
        let added = load_reference_csv(csv.as_bytes(), &mut series, &normalizer, &config).unwrap();
        assert_eq!(added, 2);

        let ts = parse_timestamp("2024-01-02T09:00:00Z").unwrap();
        assert_eq!(series.reference_level("IG", ts).unwrap().level_bps, 55.5);
        // Par price is a spread equal to the coupon.
        let q = series.reference_level("IG", ts + 10_000).unwrap();
        assert_relative_eq!(q.level_bps, 100.0, max_relative = 1e-9);
    }

    #[test]
    fn test_load_csv_bid_ask() {
        let csv = "ts,ticker,bid,ask\n2024-01-02 09:00:00,IG,54,56\n";
        let config = Config::default();
        let normalizer = Normalizer::from_config(&config);
        let mut series = ReferenceSeries::new(0, false);
        assert_eq!(load_reference_csv(csv.as_bytes(), &mut series, &normalizer, &config).unwrap(), 1);
        let ts = parse_timestamp("2024-01-02T09:00:00Z").unwrap();
        assert_eq!(series.reference_level("IG", ts).unwrap().level_bps, 55.0);
    }

    #[test]
    fn test_load_csv_missing_columns() {
        let config = Config::default();
        let normalizer = Normalizer::from_config(&config);
        let mut series = ReferenceSeries::new(0, false);
        let err = load_reference_csv("a,b\n1,2\n".as_bytes(), &mut series, &normalizer, &config);
        assert!(matches!(err, Err(Error::Data(_))));
    }
}
