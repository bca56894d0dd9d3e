//! Trade initiator inference from spread deviation.
//!
//! A trade printing above the reference spread is taken as lifted by a
//! protection buyer; below it, hit by a protection seller. Deviations inside
//! the threshold band, and trades without a usable reference, are
//! indeterminate.

use crate::reference::{ReferenceProvider, ReferenceQuote};
use cdx_core::config::ClassifierConfig;
use cdx_core::{ClassificationBasis, ClassifiedTrade, NormalizedTrade, TradeLabel};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Statistics about trade classification quality.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassificationStats {
    /// Total trades classified.
    pub total_trades: u64,
    /// Trades labeled buyer-initiated.
    pub buyer_initiated: u64,
    /// Trades labeled seller-initiated.
    pub seller_initiated: u64,
    /// Trades labeled indeterminate.
    pub indeterminate: u64,
    /// Labels taken from an explicit source side.
    pub explicit_side: u64,
    /// Trades without a usable reference.
    pub no_reference: u64,
    /// Trades inside the threshold band.
    pub within_threshold: u64,
    /// Total notional processed.
    pub total_notional: f64,
    pub buy_notional: f64,
    pub sell_notional: f64,
    pub indeterminate_notional: f64,
    /// Sum of |trade time - reference time| (ms) over referenced trades.
    pub total_reference_lag_ms: i64,
    /// Trades that had a reference level.
    pub referenced_trades: u64,
}

impl ClassificationStats {
    /// Get the fraction of indeterminate notional.
    pub fn indeterminate_frac(&self) -> f64 {
        if self.total_notional > 0.0 {
            self.indeterminate_notional / self.total_notional
        } else {
            0.0
        }
    }

    /// Get the average reference lag in ms.
    pub fn avg_reference_lag_ms(&self) -> f64 {
        if self.referenced_trades > 0 {
            self.total_reference_lag_ms as f64 / self.referenced_trades as f64
        } else {
            0.0
        }
    }

    /// Reset statistics.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn record(&mut self, trade: &ClassifiedTrade) {
        let notional = trade.notional();
        self.total_trades += 1;
        self.total_notional += notional;
        match trade.label {
            TradeLabel::BuyerInitiated => {
                self.buyer_initiated += 1;
                self.buy_notional += notional;
            }
            TradeLabel::SellerInitiated => {
                self.seller_initiated += 1;
                self.sell_notional += notional;
            }
            TradeLabel::Indeterminate => {
                self.indeterminate += 1;
                self.indeterminate_notional += notional;
            }
        }
        match trade.basis {
            ClassificationBasis::ExplicitSide => self.explicit_side += 1,
            ClassificationBasis::NoReference => self.no_reference += 1,
            ClassificationBasis::WithinThreshold => self.within_threshold += 1,
            ClassificationBasis::AboveReference | ClassificationBasis::BelowReference => {}
        }
        if let Some(lag) = trade.reference_lag_ms {
            self.referenced_trades += 1;
            self.total_reference_lag_ms = self.total_reference_lag_ms.saturating_add(lag.saturating_abs());
        }
    }
}

/// Label a spread against a reference level.
///
/// `spread - reference > threshold` is buyer-initiated, `< -threshold` is
/// seller-initiated; anything in between (boundary included) is
/// indeterminate. Returns the label, its basis, and a confidence in [0, 1].
pub fn classify_spread(
    spread_bps: f64,
    reference_bps: Option<f64>,
    threshold_bps: f64,
) -> (TradeLabel, ClassificationBasis, f64) {
    let reference = match reference_bps {
        Some(r) if r.is_finite() && spread_bps.is_finite() => r,
        _ => return (TradeLabel::Indeterminate, ClassificationBasis::NoReference, 0.0),
    };

    let deviation = spread_bps - reference;
    let confidence = |d: f64| (1.0 - threshold_bps / d.abs()).clamp(0.0, 1.0);
    if deviation > threshold_bps {
        (TradeLabel::BuyerInitiated, ClassificationBasis::AboveReference, confidence(deviation))
    } else if deviation < -threshold_bps {
        (TradeLabel::SellerInitiated, ClassificationBasis::BelowReference, confidence(deviation))
    } else {
        (TradeLabel::Indeterminate, ClassificationBasis::WithinThreshold, 0.0)
    }
}

/// Trade classifier comparing trade spreads to reference levels.
#[derive(Debug, Clone)]
pub struct TradeClassifier {
    /// Minimum |deviation| (bps) for a directional label.
    threshold_bps: f64,
    /// Whether a side reported by the source overrides inference.
    trust_explicit_side: bool,
    /// Classification statistics.
    stats: ClassificationStats,
}

impl TradeClassifier {
    /// Create a new trade classifier.
    pub fn new(threshold_bps: f64, trust_explicit_side: bool) -> Self {
        Self {
            threshold_bps: threshold_bps.max(0.0),
            trust_explicit_side,
            stats: ClassificationStats::default(),
        }
    }

    pub fn from_config(config: &ClassifierConfig) -> Self {
        Self::new(config.threshold_bps, config.trust_explicit_side)
    }

    /// Classify a single trade against an already looked-up reference.
    pub fn classify(
        &mut self,
        trade: NormalizedTrade,
        reference: Option<ReferenceQuote>,
    ) -> ClassifiedTrade {
        let explicit = if self.trust_explicit_side {
            trade.raw.side
        } else {
            None
        };

        let (label, basis, confidence) = match explicit {
            Some(side) => (TradeLabel::from(side), ClassificationBasis::ExplicitSide, 1.0),
            None => classify_spread(
                trade.spread_bps,
                reference.map(|r| r.level_bps),
                self.threshold_bps,
            ),
        };

        let classified = ClassifiedTrade {
            label,
            basis,
            confidence,
            reference_bps: reference.map(|r| r.level_bps),
            reference_lag_ms: reference.map(|r| trade.ts_ms().saturating_sub(r.ts_ms)),
            trade,
        };

        debug!(
            id = %classified.trade.raw.dissemination_id,
            instrument = classified.instrument_id(),
            spread_bps = classified.trade.spread_bps,
            reference_bps = ?classified.reference_bps,
            label = ?classified.label,
            "Classified trade"
        );
        self.stats.record(&classified);
        classified
    }

    /// Classify a trade, looking up its reference from `provider`.
    pub fn classify_with<P: ReferenceProvider + ?Sized>(
        &mut self,
        trade: NormalizedTrade,
        provider: &P,
    ) -> ClassifiedTrade {
        let reference = provider.reference_level(trade.instrument_id(), trade.ts_ms());
        self.classify(trade, reference)
    }

    /// Classify multiple trades in input order.
    pub fn classify_batch<P: ReferenceProvider + ?Sized>(
        &mut self,
        trades: Vec<NormalizedTrade>,
        provider: &P,
    ) -> Vec<ClassifiedTrade> {
        trades
            .into_iter()
            .map(|t| self.classify_with(t, provider))
            .collect()
    }

    pub fn threshold_bps(&self) -> f64 {
        self.threshold_bps
    }

    /// Get classification statistics.
    pub fn stats(&self) -> &ClassificationStats {
        &self.stats
    }

    /// Reset statistics.
    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }
}
