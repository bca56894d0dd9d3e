//! CDS economic conversions.
//!
//! Flat hazard rate model on a quarterly premium schedule:
//! - hazard `lambda = S / (1 - R)` (credit triangle)
//! - risky annuity with midpoint accrual-on-default
//! - upfront `U = (S - C) * RPV01(S)`, price `= 100 * (1 - U)`
//!
//! `U` is strictly increasing in `S`, so the inverse conversions are a
//! bracketed bisection.

use cdx_core::config::{DayCount, MAX_TENOR_YEARS};
use cdx_core::{ConversionError, QuoteNotation, RawQuote, TimestampMs, MS_PER_DAY};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Largest spread accepted anywhere (bps).
pub const MAX_SPREAD_BPS: f64 = 100_000.0;

/// Prices are percent of par and must fall strictly inside this range.
pub const PRICE_MIN: f64 = 0.0;
pub const PRICE_MAX: f64 = 200.0;

const PERIOD_YEARS: f64 = 0.25;
const MAX_BISECTIONS: usize = 200;

/// When an instrument stops paying premium.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Maturity {
    /// Scheduled termination date.
    Date(NaiveDate),
    /// Constant remaining tenor in years.
    Tenor(f64),
}

/// Reference terms of an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InstrumentTerms {
    /// Running coupon (bps).
    pub coupon_bps: f64,
    /// Recovery rate in [0, 1).
    pub recovery_rate: f64,
    /// Flat continuously-compounded discount rate.
    pub discount_rate: f64,
    /// Premium day count.
    pub day_count: DayCount,
    /// Maturity.
    pub maturity: Maturity,
}

impl InstrumentTerms {
    /// Standard CDX IG style terms: 100bp coupon, 40% recovery, Act/360.
    pub fn standard(tenor_years: f64) -> Self {
        Self {
            coupon_bps: 100.0,
            recovery_rate: 0.4,
            discount_rate: 0.0,
            day_count: DayCount::Act360,
            maturity: Maturity::Tenor(tenor_years),
        }
    }

    /// Remaining years (Act/365F) at `ts_ms`, `None` once matured.
    pub fn years_to_maturity(&self, ts_ms: TimestampMs) -> Option<f64> {
        let years = match self.maturity {
            Maturity::Tenor(years) => years,
            Maturity::Date(date) => {
                let maturity_ms = date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis();
                maturity_ms.saturating_sub(ts_ms) as f64 / (365.0 * MS_PER_DAY as f64)
            }
        };
        (years.is_finite() && years > 0.0).then_some(years)
    }
}

fn accrual_factor(day_count: DayCount, period_years: f64) -> f64 {
    match day_count {
        DayCount::Act360 => period_years * 365.0 / 360.0,
        DayCount::Thirty360 | DayCount::Act365F => period_years,
    }
}

/// Risky annuity (RPV01) per unit notional at the given spread.
///
/// Premium dates roll back quarterly from maturity; the first period is a
/// short stub when the tenor is not a whole number of quarters. NaN when
/// `years` is not finite or exceeds [`MAX_TENOR_YEARS`].
pub fn risky_annuity(spread_bps: f64, years: f64, terms: &InstrumentTerms) -> f64 {
    if !years.is_finite() || years > MAX_TENOR_YEARS {
        return f64::NAN;
    }
    let hazard = (spread_bps / 10_000.0) / (1.0 - terms.recovery_rate);
    let rate = terms.discount_rate;
    let periods = ((years / PERIOD_YEARS) - 1e-9).ceil().max(1.0) as usize;

    let mut annuity = 0.0;
    let mut prev_t = 0.0;
    for i in 1..=periods {
        let t = (years - (periods - i) as f64 * PERIOD_YEARS).max(0.0);
        if t <= prev_t {
            continue;
        }
        let accrual = accrual_factor(terms.day_count, t - prev_t);
        let survival_start = (-hazard * prev_t).exp();
        let survival_end = (-hazard * t).exp();
        let discount = (-rate * t).exp();
        annuity += accrual * discount * 0.5 * (survival_start + survival_end);
        prev_t = t;
    }
    annuity
}

/// Upfront as a fraction of notional, positive when the protection buyer pays.
pub fn spread_to_upfront(spread_bps: f64, years: f64, terms: &InstrumentTerms) -> f64 {
    (spread_bps - terms.coupon_bps) / 10_000.0 * risky_annuity(spread_bps, years, terms)
}

/// Price in percent of par.
pub fn spread_to_price(spread_bps: f64, years: f64, terms: &InstrumentTerms) -> f64 {
    100.0 * (1.0 - spread_to_upfront(spread_bps, years, terms))
}

/// Invert [`spread_to_upfront`].
pub fn upfront_to_spread(
    upfront: f64,
    years: f64,
    terms: &InstrumentTerms,
) -> Result<f64, ConversionError> {
    check_years(years)?;
    if !upfront.is_finite() {
        return Err(ConversionError::NonFinite {
            field: "upfront",
            value: upfront,
        });
    }

    let f = |s: f64| spread_to_upfront(s, years, terms) - upfront;
    let mut lo = 0.0;
    let mut hi = MAX_SPREAD_BPS;
    if f(lo) > 0.0 || f(hi) < 0.0 {
        return Err(ConversionError::NoSolution { upfront });
    }

    for _ in 0..MAX_BISECTIONS {
        let mid = 0.5 * (lo + hi);
        if f(mid) < 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo <= 1e-13 * hi.max(1.0) {
            break;
        }
    }
    Ok(0.5 * (lo + hi))
}

/// Invert [`spread_to_price`].
pub fn price_to_spread(
    price: f64,
    years: f64,
    terms: &InstrumentTerms,
) -> Result<f64, ConversionError> {
    check_years(years)?;
    check_price(price)?;
    upfront_to_spread((100.0 - price) / 100.0, years, terms)
}

fn check_finite(field: &'static str, value: f64) -> Result<(), ConversionError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConversionError::NonFinite { field, value })
    }
}

/// Remaining tenor must be finite and within `(0, MAX_TENOR_YEARS]`.
pub fn check_years(years: f64) -> Result<(), ConversionError> {
    check_finite("years", years)?;
    if years <= 0.0 || years > MAX_TENOR_YEARS {
        return Err(ConversionError::OutOfRange {
            field: "years",
            value: years,
            min: 0.0,
            max: MAX_TENOR_YEARS,
        });
    }
    Ok(())
}

fn check_price(price: f64) -> Result<(), ConversionError> {
    check_finite("price", price)?;
    if price <= PRICE_MIN || price >= PRICE_MAX {
        return Err(ConversionError::OutOfRange {
            field: "price",
            value: price,
            min: PRICE_MIN,
            max: PRICE_MAX,
        });
    }
    Ok(())
}

/// Scale a reported spread to basis points.
pub fn spread_to_bps(value: f64, notation: QuoteNotation) -> Result<f64, ConversionError> {
    check_finite("spread", value)?;
    let bps = match notation {
        QuoteNotation::BasisPoints => value,
        QuoteNotation::Decimal => value * 10_000.0,
        QuoteNotation::Percentage => value * 100.0,
    };
    if !(0.0..=MAX_SPREAD_BPS).contains(&bps) {
        return Err(ConversionError::OutOfRange {
            field: "spread_bps",
            value: bps,
            min: 0.0,
            max: MAX_SPREAD_BPS,
        });
    }
    Ok(bps)
}

/// Scale a reported price to percent of par.
pub fn price_to_points(value: f64, notation: QuoteNotation) -> Result<f64, ConversionError> {
    check_finite("price", value)?;
    let points = match notation {
        QuoteNotation::Decimal => value * 100.0,
        QuoteNotation::Percentage => value,
        QuoteNotation::BasisPoints => {
            return Err(ConversionError::UnsupportedNotation {
                kind: "price",
                notation: notation.as_str(),
            })
        }
    };
    check_price(points)?;
    Ok(points)
}

/// Scale a reported upfront to a fraction of notional.
pub fn upfront_to_fraction(value: f64, notation: QuoteNotation) -> Result<f64, ConversionError> {
    check_finite("upfront", value)?;
    let fraction = match notation {
        QuoteNotation::Decimal => value,
        QuoteNotation::Percentage => value / 100.0,
        QuoteNotation::BasisPoints => value / 10_000.0,
    };
    if fraction <= -1.0 || fraction >= 1.0 {
        return Err(ConversionError::OutOfRange {
            field: "upfront",
            value: fraction,
            min: -1.0,
            max: 1.0,
        });
    }
    Ok(fraction)
}

/// Canonical spread (bps) for any reported quote.
pub fn normalize_quote(
    quote: &RawQuote,
    terms: &InstrumentTerms,
    years: f64,
) -> Result<f64, ConversionError> {
    check_years(years)?;
    match *quote {
        RawQuote::Spread { value, notation } => spread_to_bps(value, notation),
        RawQuote::Price { value, notation } => {
            let points = price_to_points(value, notation)?;
            price_to_spread(points, years, terms)
        }
        RawQuote::Upfront { value, notation } => {
            let fraction = upfront_to_fraction(value, notation)?;
            upfront_to_spread(fraction, years, terms)
        }
    }
}
