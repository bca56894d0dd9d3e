//! Core data types for the cdx-imbalance system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp in milliseconds since Unix epoch (UTC).
pub type TimestampMs = i64;

/// Milliseconds in one minute.
pub const MS_PER_MINUTE: i64 = 60_000;

/// Milliseconds in one day.
pub const MS_PER_DAY: i64 = 86_400_000;

/// Convert a millisecond timestamp to a UTC datetime.
#[inline]
pub fn ts_to_datetime(ts_ms: TimestampMs) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ts_ms)
}

/// How a reported quote value is scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuoteNotation {
    /// Basis points (75.5 = 75.5bp).
    BasisPoints,
    /// Plain decimal (0.00755 = 75.5bp, 0.985 = 98.5% of par).
    Decimal,
    /// Percent / points (0.755 = 75.5bp, 98.5 = 98.5% of par).
    Percentage,
}

impl QuoteNotation {
    /// Parse a notation label as reported by the repository feed.
    ///
    /// Case, spaces, dashes and underscores are ignored.
    pub fn parse(label: &str) -> Option<Self> {
        let key: String = label
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_uppercase();
        match key.as_str() {
            "BP" | "BPS" | "BASISPOINT" | "BASISPOINTS" => Some(QuoteNotation::BasisPoints),
            "DECIMAL" => Some(QuoteNotation::Decimal),
            "PERCENT" | "PERCENTAGE" | "PERCENTAGEOFNOMINAL" | "POINTS" | "POINTSUPFRONT" => {
                Some(QuoteNotation::Percentage)
            }
            _ => None,
        }
    }

    /// Stable label.
    pub fn as_str(self) -> &'static str {
        match self {
            QuoteNotation::BasisPoints => "BPS",
            QuoteNotation::Decimal => "DECIMAL",
            QuoteNotation::Percentage => "PERCENTAGE",
        }
    }
}

/// Economic quote exactly as reported.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RawQuote {
    /// Running spread.
    Spread { value: f64, notation: QuoteNotation },
    /// Price as percent of par.
    Price { value: f64, notation: QuoteNotation },
    /// Upfront points paid by the protection buyer.
    Upfront { value: f64, notation: QuoteNotation },
}

impl RawQuote {
    /// The reported value, unscaled.
    pub fn value(&self) -> f64 {
        match *self {
            RawQuote::Spread { value, .. }
            | RawQuote::Price { value, .. }
            | RawQuote::Upfront { value, .. } => value,
        }
    }

    /// The reported notation.
    pub fn notation(&self) -> QuoteNotation {
        match *self {
            RawQuote::Spread { notation, .. }
            | RawQuote::Price { notation, .. }
            | RawQuote::Upfront { notation, .. } => notation,
        }
    }

    /// Quote kind label.
    pub fn kind(&self) -> &'static str {
        match self {
            RawQuote::Spread { .. } => "spread",
            RawQuote::Price { .. } => "price",
            RawQuote::Upfront { .. } => "upfront",
        }
    }
}

/// Whether a level is expressed as a spread or as a price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteBasis {
    #[default]
    Spread,
    Price,
}

impl QuoteBasis {
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "spread" | "s" => Some(QuoteBasis::Spread),
            "price" | "p" => Some(QuoteBasis::Price),
            _ => None,
        }
    }
}

/// Explicit protection side, when the source reports one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    /// Protection buyer.
    Buy,
    /// Protection seller.
    Sell,
}

impl TradeSide {
    /// Parse a side label ("BUY", "S", "protection seller", ...).
    pub fn parse(label: &str) -> Option<Self> {
        let key: String = label
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_ascii_uppercase();
        match key.as_str() {
            "B" | "BUY" | "BUYER" | "PROTECTIONBUYER" => Some(TradeSide::Buy),
            "S" | "SELL" | "SELLER" | "PROTECTIONSELLER" => Some(TradeSide::Sell),
            _ => None,
        }
    }
}

/// Reporting flags carried on a public trade report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterpartyFlags {
    /// Centrally cleared.
    pub cleared: bool,
    /// Block trade election.
    pub block_trade: bool,
    /// Reported notional is a cap ("100,000,000+"), true size is larger.
    pub notional_capped: bool,
}

/// A trade report as received from the source feed. Never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTrade {
    /// Execution timestamp in milliseconds.
    pub ts_ms: TimestampMs,
    /// Repository identifier of this report.
    pub dissemination_id: String,
    /// Instrument identifier (UPI or product name).
    pub instrument_id: String,
    /// Notional amount.
    pub notional: f64,
    /// Notional currency, if reported.
    pub currency: Option<String>,
    /// Reported quote.
    pub quote: RawQuote,
    /// Reporting flags.
    pub flags: CounterpartyFlags,
    /// Explicit side, if the source carries one.
    pub side: Option<TradeSide>,
}

/// A trade with canonical economics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTrade {
    /// Original report.
    pub raw: RawTrade,
    /// Canonical running spread in basis points.
    pub spread_bps: f64,
    /// Canonical price, percent of par.
    pub price: f64,
    /// Spread DV01 of the trade (currency per bp), direction neutral.
    pub risky_dv01: f64,
}

impl NormalizedTrade {
    #[inline]
    pub fn ts_ms(&self) -> TimestampMs {
        self.raw.ts_ms
    }

    #[inline]
    pub fn instrument_id(&self) -> &str {
        &self.raw.instrument_id
    }

    #[inline]
    pub fn notional(&self) -> f64 {
        self.raw.notional
    }
}

/// Inferred initiator of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i8)]
pub enum TradeLabel {
    /// Protection buyer lifted the market (spread printed above reference).
    BuyerInitiated = 1,
    /// Protection seller hit the market (spread printed below reference).
    SellerInitiated = -1,
    /// Within the threshold band, or no reference available.
    Indeterminate = 0,
}

impl TradeLabel {
    /// Get the sign as i8.
    #[inline]
    pub fn sign(self) -> i8 {
        self as i8
    }

    /// Get the sign as f64.
    #[inline]
    pub fn sign_f64(self) -> f64 {
        self.sign() as f64
    }

    #[inline]
    pub fn is_directional(self) -> bool {
        self != TradeLabel::Indeterminate
    }
}

impl From<TradeSide> for TradeLabel {
    fn from(side: TradeSide) -> Self {
        match side {
            TradeSide::Buy => TradeLabel::BuyerInitiated,
            TradeSide::Sell => TradeLabel::SellerInitiated,
        }
    }
}

/// Why a label was assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassificationBasis {
    /// Side reported by the source.
    ExplicitSide,
    /// Spread above reference by more than the threshold.
    AboveReference,
    /// Spread below reference by more than the threshold.
    BelowReference,
    /// Deviation inside the threshold band (inclusive).
    WithinThreshold,
    /// No usable reference level.
    NoReference,
}

/// A normalized trade with its inferred label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedTrade {
    /// Normalized trade.
    pub trade: NormalizedTrade,
    /// Inferred label.
    pub label: TradeLabel,
    /// Basis for the label.
    pub basis: ClassificationBasis,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Reference level used (bps), if any.
    pub reference_bps: Option<f64>,
    /// Trade time minus reference time (ms), if a reference was used.
    pub reference_lag_ms: Option<i64>,
}

impl ClassifiedTrade {
    #[inline]
    pub fn ts_ms(&self) -> TimestampMs {
        self.trade.ts_ms()
    }

    #[inline]
    pub fn instrument_id(&self) -> &str {
        self.trade.instrument_id()
    }

    #[inline]
    pub fn notional(&self) -> f64 {
        self.trade.notional()
    }

    /// Signed notional (positive buyer-initiated, negative seller-initiated, zero otherwise).
    #[inline]
    pub fn signed_notional(&self) -> f64 {
        self.notional() * self.label.sign_f64()
    }

    /// Signed spread DV01.
    #[inline]
    pub fn signed_dv01(&self) -> f64 {
        self.trade.risky_dv01 * self.label.sign_f64()
    }
}

/// Imbalance summary for one (instrument, time bucket).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImbalanceBucket {
    /// Instrument identifier.
    pub instrument_id: String,
    /// Bucket start (inclusive).
    pub bucket_start_ms: TimestampMs,
    /// Bucket end (exclusive).
    pub bucket_end_ms: TimestampMs,
    /// Buyer-initiated notional.
    pub buy_notional: f64,
    /// Seller-initiated notional.
    pub sell_notional: f64,
    /// Indeterminate notional (excluded from net imbalance).
    pub indeterminate_notional: f64,
    /// buy_notional - sell_notional.
    pub net_imbalance: f64,
    /// All notional in the bucket.
    pub total_notional: f64,
    pub buy_count: u64,
    pub sell_count: u64,
    pub indeterminate_count: u64,
    /// Number of trades.
    pub trade_count: u64,
    /// Buyer-initiated spread DV01.
    pub buy_dv01: f64,
    /// Seller-initiated spread DV01.
    pub sell_dv01: f64,
    /// buy_dv01 - sell_dv01.
    pub net_dv01: f64,
    /// Notional-weighted average spread (bps).
    pub avg_spread_bps: Option<f64>,
    pub min_spread_bps: Option<f64>,
    pub max_spread_bps: Option<f64>,
    /// Earliest trade in the bucket.
    pub first_trade_ms: Option<TimestampMs>,
    /// Latest trade in the bucket.
    pub last_trade_ms: Option<TimestampMs>,
}

impl ImbalanceBucket {
    /// Net imbalance over directional notional, in [-1, 1].
    pub fn imbalance_ratio(&self) -> f64 {
        let directional = self.buy_notional + self.sell_notional;
        if directional > 0.0 {
            self.net_imbalance / directional
        } else {
            0.0
        }
    }

    /// Fraction of notional that could not be classified.
    pub fn indeterminate_frac(&self) -> f64 {
        if self.total_notional > 0.0 {
            self.indeterminate_notional / self.total_notional
        } else {
            0.0
        }
    }
}
