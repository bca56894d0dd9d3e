//! Trade normalization: raw quote to canonical spread, price and DV01.

use crate::economics::{self, InstrumentTerms, Maturity};
use cdx_core::config::{ConversionConfig, InstrumentConfig};
use cdx_core::{
    Config, ConversionError, NormalizedTrade, QuoteBasis, RawQuote, RawTrade, TimestampMs,
};
use std::collections::HashMap;

/// Reference terms for every known instrument.
#[derive(Debug, Clone, Default)]
pub struct TermsBook {
    /// Applied to instruments without an override.
    defaults: Option<InstrumentTerms>,
    /// Keyed by instrument id and by ticker.
    overrides: HashMap<String, InstrumentTerms>,
}

impl TermsBook {
    /// Empty book. Every lookup fails until terms are inserted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from configuration.
    pub fn from_config(config: &Config) -> Self {
        let conversion = &config.conversion;
        let base = conversion.tenor_years.map(|tenor| base_terms(conversion, tenor));

        let mut book = Self {
            defaults: if conversion.use_default_terms { base } else { None },
            overrides: HashMap::new(),
        };
        for inst in &config.instruments {
            if let Some(terms) = override_terms(conversion, inst) {
                if let Some(ticker) = &inst.ticker {
                    book.overrides.insert(ticker.clone(), terms);
                }
                book.overrides.insert(inst.id.clone(), terms);
            }
        }
        book
    }

    /// Set terms for one instrument.
    pub fn insert(&mut self, instrument_id: impl Into<String>, terms: InstrumentTerms) {
        self.overrides.insert(instrument_id.into(), terms);
    }

    /// Set the fallback terms.
    pub fn set_defaults(&mut self, terms: Option<InstrumentTerms>) {
        self.defaults = terms;
    }

    /// Terms for an instrument, falling back to the defaults.
    pub fn terms_for(&self, instrument_id: &str) -> Result<&InstrumentTerms, ConversionError> {
        self.overrides
            .get(instrument_id)
            .or(self.defaults.as_ref())
            .ok_or_else(|| ConversionError::MissingTerms {
                instrument_id: instrument_id.to_string(),
            })
    }

    /// Number of instruments with explicit terms (ids and tickers).
    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }
}

fn base_terms(conversion: &ConversionConfig, tenor_years: f64) -> InstrumentTerms {
    InstrumentTerms {
        coupon_bps: conversion.coupon_bps,
        recovery_rate: conversion.recovery_rate,
        discount_rate: conversion.discount_rate,
        day_count: conversion.day_count,
        maturity: Maturity::Tenor(tenor_years),
    }
}

fn override_terms(conversion: &ConversionConfig, inst: &InstrumentConfig) -> Option<InstrumentTerms> {
    let maturity = match (inst.maturity, inst.tenor_years.or(conversion.tenor_years)) {
        (Some(date), _) => Maturity::Date(date),
        (None, Some(tenor)) => Maturity::Tenor(tenor),
        (None, None) => return None,
    };
    Some(InstrumentTerms {
        coupon_bps: inst.coupon_bps.unwrap_or(conversion.coupon_bps),
        recovery_rate: inst.recovery_rate.unwrap_or(conversion.recovery_rate),
        discount_rate: conversion.discount_rate,
        day_count: inst.day_count.unwrap_or(conversion.day_count),
        maturity,
    })
}

/// Converts raw trades to canonical economics.
///
/// Stateless apart from the terms book; the same input always yields the
/// same output.
#[derive(Debug, Clone)]
pub struct Normalizer {
    terms: TermsBook,
}

impl Normalizer {
    pub fn new(terms: TermsBook) -> Self {
        Self { terms }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(TermsBook::from_config(config))
    }

    pub fn terms(&self) -> &TermsBook {
        &self.terms
    }

    pub fn terms_mut(&mut self) -> &mut TermsBook {
        &mut self.terms
    }

    /// Normalize one trade.
    ///
    /// Fails on non-positive or non-finite notional, unknown terms, a matured
    /// instrument, or a quote the economics cannot invert.
    pub fn normalize(&self, raw: RawTrade) -> Result<NormalizedTrade, ConversionError> {
        if !raw.notional.is_finite() {
            return Err(ConversionError::NonFinite {
                field: "notional",
                value: raw.notional,
            });
        }
        if raw.notional <= 0.0 {
            return Err(ConversionError::InvalidNotional(raw.notional));
        }

        let (terms, years) = self.terms_at(&raw.instrument_id, raw.ts_ms)?;
        let spread_bps = economics::normalize_quote(&raw.quote, terms, years)?;
        let price = match raw.quote {
            RawQuote::Price { value, notation } => economics::price_to_points(value, notation)?,
            _ => economics::spread_to_price(spread_bps, years, terms),
        };
        let risky_dv01 =
            raw.notional * economics::risky_annuity(spread_bps, years, terms) / 10_000.0;

        Ok(NormalizedTrade {
            raw,
            spread_bps,
            price,
            risky_dv01,
        })
    }

    /// Convert a reference level to a spread in bps.
    ///
    /// Spread-basis levels are already bps; price-basis levels are percent
    /// of par and go through the instrument's terms.
    pub fn level_to_spread(
        &self,
        instrument_id: &str,
        ts_ms: TimestampMs,
        level: f64,
        basis: QuoteBasis,
    ) -> Result<f64, ConversionError> {
        match basis {
            QuoteBasis::Spread => {
                economics::spread_to_bps(level, cdx_core::QuoteNotation::BasisPoints)
            }
            QuoteBasis::Price => {
                let (terms, years) = self.terms_at(instrument_id, ts_ms)?;
                economics::price_to_spread(level, years, terms)
            }
        }
    }

    fn terms_at(
        &self,
        instrument_id: &str,
        ts_ms: TimestampMs,
    ) -> Result<(&InstrumentTerms, f64), ConversionError> {
        let terms = self.terms.terms_for(instrument_id)?;
        let years = terms
            .years_to_maturity(ts_ms)
            .ok_or_else(|| ConversionError::Matured {
                instrument_id: instrument_id.to_string(),
            })?;
        economics::check_years(years)?;
        Ok((terms, years))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cdx_core::{CounterpartyFlags, QuoteNotation};
    use chrono::NaiveDate;

    fn raw(instrument: &str, notional: f64, quote: RawQuote) -> RawTrade {
        RawTrade {
            ts_ms: 1_704_067_200_000,
            dissemination_id: "1".to_string(),
            instrument_id: instrument.to_string(),
            notional,
            currency: Some("USD".to_string()),
            quote,
            flags: CounterpartyFlags::default(),
            side: None,
        }
    }

    fn bps(value: f64) -> RawQuote {
        RawQuote::Spread {
            value,
            notation: QuoteNotation::BasisPoints,
        }
    }

    #[test]
    fn test_normalize_spread() {
        let normalizer = Normalizer::from_config(&Config::default());
        let trade = normalizer.normalize(raw("IG", 10_000_000.0, bps(100.0))).unwrap();
        assert_eq!(trade.spread_bps, 100.0);
        assert_relative_eq!(trade.price, 100.0, epsilon = 1e-12);
        assert!(trade.risky_dv01 > 0.0);
        // DV01 is linear in notional.
        let half = normalizer.normalize(raw("IG", 5_000_000.0, bps(100.0))).unwrap();
        assert_relative_eq!(half.risky_dv01 * 2.0, trade.risky_dv01, max_relative = 1e-12);
    }

    #[test]
    fn test_normalize_price_matches_spread() {
        let normalizer = Normalizer::from_config(&Config::default());
        let from_spread = normalizer.normalize(raw("IG", 1.0, bps(72.5))).unwrap();
        let quote = RawQuote::Price {
            value: from_spread.price,
            notation: QuoteNotation::Percentage,
        };
        let from_price = normalizer.normalize(raw("IG", 1.0, quote)).unwrap();
        assert_relative_eq!(from_price.spread_bps, 72.5, max_relative = 1e-9);
    }

    #[test]
    fn test_rejects_bad_notional() {
        let normalizer = Normalizer::from_config(&Config::default());
        assert_eq!(
            normalizer.normalize(raw("IG", 0.0, bps(50.0))),
            Err(ConversionError::InvalidNotional(0.0))
        );
        assert!(matches!(
            normalizer.normalize(raw("IG", f64::NAN, bps(50.0))),
            Err(ConversionError::NonFinite { field: "notional", .. })
        ));
    }

    #[test]
    fn test_missing_terms() {
        let mut config = Config::default();
        config.conversion.use_default_terms = false;
        let normalizer = Normalizer::from_config(&config);
        assert_eq!(
            normalizer.normalize(raw("HY", 1.0, bps(300.0))),
            Err(ConversionError::MissingTerms {
                instrument_id: "HY".to_string()
            })
        );
    }

    #[test]
    fn test_instrument_override() {
        let mut config = Config::default();
        config.instruments.push(InstrumentConfig {
            id: "HY".to_string(),
            ticker: Some("CDXHY5 Curncy".to_string()),
            coupon_bps: Some(500.0),
            recovery_rate: Some(0.3),
            ..Default::default()
        });
        let normalizer = Normalizer::from_config(&config);
        let terms = normalizer.terms().terms_for("CDXHY5 Curncy").unwrap();
        assert_eq!(terms.coupon_bps, 500.0);
        assert_eq!(terms.maturity, Maturity::Tenor(5.0));

        let trade = normalizer.normalize(raw("HY", 1.0, bps(500.0))).unwrap();
        assert_relative_eq!(trade.price, 100.0, epsilon = 1e-12);
    }

    #[test]
    fn test_matured_instrument() {
        let mut config = Config::default();
        config.instruments.push(InstrumentConfig {
            id: "OLD".to_string(),
            maturity: NaiveDate::from_ymd_opt(2020, 6, 20),
            ..Default::default()
        });
        let normalizer = Normalizer::from_config(&config);
        assert!(matches!(
            normalizer.normalize(raw("OLD", 1.0, bps(50.0))),
            Err(ConversionError::Matured { .. })
        ));
    }

    #[test]
    fn test_far_maturity_rejected() {
        let mut config = Config::default();
        config.instruments.push(InstrumentConfig {
            id: "FAR".to_string(),
            maturity: NaiveDate::from_ymd_opt(2999, 12, 20),
            ..Default::default()
        });
        let normalizer = Normalizer::from_config(&config);
        assert!(matches!(
            normalizer.normalize(raw("FAR", 1.0, bps(50.0))),
            Err(ConversionError::OutOfRange { field: "years", .. })
        ));
    }

    #[test]
    fn test_level_to_spread() {
        let normalizer = Normalizer::from_config(&Config::default());
        let ts = 1_704_067_200_000;
        assert_eq!(
            normalizer.level_to_spread("IG", ts, 61.0, QuoteBasis::Spread).unwrap(),
            61.0
        );
        let par = normalizer.level_to_spread("IG", ts, 100.0, QuoteBasis::Price).unwrap();
        assert_relative_eq!(par, 100.0, max_relative = 1e-9);
    }
}
