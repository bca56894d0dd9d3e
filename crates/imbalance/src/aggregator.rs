//! Order imbalance aggregation.
//!
//! Folds classified trades into per-(instrument, bucket) buy/sell notional.

use crate::bucket::{BucketKey, BucketWidth};
use cdx_core::config::AggregationConfig;
use cdx_core::{ClassifiedTrade, Error, ImbalanceBucket, Result, TimestampMs, TradeLabel};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

/// Accumulator for one (instrument, bucket).
#[derive(Debug, Clone, Default)]
struct BucketAccumulator {
    buy_notional: f64,
    sell_notional: f64,
    indeterminate_notional: f64,
    buy_count: u64,
    sell_count: u64,
    indeterminate_count: u64,
    buy_dv01: f64,
    sell_dv01: f64,
    /// Sum of signed notional, tracked independently of buy - sell.
    signed_notional_sum: f64,
    /// Sum of spread * notional, for the weighted average.
    spread_notional_sum: f64,
    min_spread_bps: Option<f64>,
    max_spread_bps: Option<f64>,
    first_trade_ms: Option<TimestampMs>,
    last_trade_ms: Option<TimestampMs>,
}

fn min_opt<T: PartialOrd + Copy>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(x), Some(y)) => Some(if y < x { y } else { x }),
        (x, None) => x,
        (None, y) => y,
    }
}

fn max_opt<T: PartialOrd + Copy>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(x), Some(y)) => Some(if y > x { y } else { x }),
        (x, None) => x,
        (None, y) => y,
    }
}

impl BucketAccumulator {
    fn add(&mut self, trade: &ClassifiedTrade) {
        let notional = trade.notional();
        let dv01 = trade.trade.risky_dv01;
        match trade.label {
            TradeLabel::BuyerInitiated => {
                self.buy_notional += notional;
                self.buy_count += 1;
                self.buy_dv01 += dv01;
            }
            TradeLabel::SellerInitiated => {
                self.sell_notional += notional;
                self.sell_count += 1;
                self.sell_dv01 += dv01;
            }
            TradeLabel::Indeterminate => {
                self.indeterminate_notional += notional;
                self.indeterminate_count += 1;
            }
        }
        self.signed_notional_sum += trade.signed_notional();

        let spread = trade.trade.spread_bps;
        self.spread_notional_sum += spread * notional;
        self.min_spread_bps = min_opt(self.min_spread_bps, Some(spread));
        self.max_spread_bps = max_opt(self.max_spread_bps, Some(spread));
        self.first_trade_ms = min_opt(self.first_trade_ms, Some(trade.ts_ms()));
        self.last_trade_ms = max_opt(self.last_trade_ms, Some(trade.ts_ms()));
    }

    fn merge(&mut self, other: &BucketAccumulator) {
        self.buy_notional += other.buy_notional;
        self.sell_notional += other.sell_notional;
        self.indeterminate_notional += other.indeterminate_notional;
        self.buy_count += other.buy_count;
        self.sell_count += other.sell_count;
        self.indeterminate_count += other.indeterminate_count;
        self.buy_dv01 += other.buy_dv01;
        self.sell_dv01 += other.sell_dv01;
        self.signed_notional_sum += other.signed_notional_sum;
        self.spread_notional_sum += other.spread_notional_sum;
        self.min_spread_bps = min_opt(self.min_spread_bps, other.min_spread_bps);
        self.max_spread_bps = max_opt(self.max_spread_bps, other.max_spread_bps);
        self.first_trade_ms = min_opt(self.first_trade_ms, other.first_trade_ms);
        self.last_trade_ms = max_opt(self.last_trade_ms, other.last_trade_ms);
    }

    fn total_notional(&self) -> f64 {
        self.buy_notional + self.sell_notional + self.indeterminate_notional
    }

    /// |signed sum - (buy - sell)| within `tolerance` relative to total notional.
    fn is_consistent(&self, tolerance: f64) -> bool {
        let gap = (self.signed_notional_sum - (self.buy_notional - self.sell_notional)).abs();
        gap <= tolerance * self.total_notional().max(1.0)
    }

    fn to_bucket(&self, key: &BucketKey, width: &BucketWidth) -> ImbalanceBucket {
        let total_notional = self.total_notional();
        let avg_spread_bps = if total_notional > 0.0 {
            Some(self.spread_notional_sum / total_notional)
        } else {
            None
        };

        ImbalanceBucket {
            instrument_id: key.instrument_id.clone(),
            bucket_start_ms: key.bucket_start_ms,
            bucket_end_ms: key.bucket_start_ms + width.width_ms(),
            buy_notional: self.buy_notional,
            sell_notional: self.sell_notional,
            indeterminate_notional: self.indeterminate_notional,
            net_imbalance: self.buy_notional - self.sell_notional,
            total_notional,
            buy_count: self.buy_count,
            sell_count: self.sell_count,
            indeterminate_count: self.indeterminate_count,
            trade_count: self.buy_count + self.sell_count + self.indeterminate_count,
            buy_dv01: self.buy_dv01,
            sell_dv01: self.sell_dv01,
            net_dv01: self.buy_dv01 - self.sell_dv01,
            avg_spread_bps,
            min_spread_bps: self.min_spread_bps,
            max_spread_bps: self.max_spread_bps,
            first_trade_ms: self.first_trade_ms,
            last_trade_ms: self.last_trade_ms,
        }
    }
}

/// Owned point-in-time copy of aggregated buckets.
///
/// Later additions to the aggregator do not affect a snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImbalanceSnapshot {
    buckets: BTreeMap<BucketKey, ImbalanceBucket>,
}

impl ImbalanceSnapshot {
    pub fn get(&self, instrument_id: &str, bucket_start_ms: TimestampMs) -> Option<&ImbalanceBucket> {
        self.buckets.get(&BucketKey::new(instrument_id, bucket_start_ms))
    }

    /// Buckets ordered by instrument, then start time.
    pub fn iter(&self) -> impl Iterator<Item = &ImbalanceBucket> {
        self.buckets.values()
    }

    /// Buckets of one instrument in time order.
    pub fn instrument<'a>(&'a self, instrument_id: &'a str) -> impl Iterator<Item = &'a ImbalanceBucket> + 'a {
        self.buckets
            .values()
            .filter(move |b| b.instrument_id == instrument_id)
    }

    /// Sum of net imbalance across all buckets of an instrument.
    pub fn total_net(&self, instrument_id: &str) -> f64 {
        self.instrument(instrument_id).map(|b| b.net_imbalance).sum()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn into_buckets(self) -> Vec<ImbalanceBucket> {
        self.buckets.into_values().collect()
    }
}

/// Aggregates classified trades into imbalance buckets.
///
/// Additions commute: the same set of trades yields the same buckets in any
/// order, up to floating point summation.
#[derive(Debug, Clone)]
pub struct ImbalanceAggregator {
    width: BucketWidth,
    /// Relative tolerance for the signed-sum consistency check.
    tolerance: f64,
    buckets: BTreeMap<BucketKey, BucketAccumulator>,
    /// Per instrument, the end of the latest finalized bucket.
    finalized_through: HashMap<String, TimestampMs>,
    trade_count: u64,
    late_trades: u64,
}

impl ImbalanceAggregator {
    /// Create a new aggregator.
    pub fn new(width: BucketWidth, tolerance: f64) -> Self {
        Self {
            width,
            tolerance: tolerance.max(0.0),
            buckets: BTreeMap::new(),
            finalized_through: HashMap::new(),
            trade_count: 0,
            late_trades: 0,
        }
    }

    pub fn from_config(config: &AggregationConfig) -> Result<Self> {
        Ok(Self::new(BucketWidth::from_config(config)?, config.consistency_tolerance))
    }

    /// Add a classified trade.
    ///
    /// Fails without touching any bucket when the trade's bucket does not fit
    /// in the timestamp range.
    ///
    /// # Panics
    /// If the notional is negative or not finite. Normalization never
    /// produces such a trade.
    pub fn add(&mut self, trade: &ClassifiedTrade) -> Result<()> {
        let notional = trade.notional();
        assert!(
            notional.is_finite() && notional >= 0.0,
            "classified trade with invalid notional {notional}"
        );

        let start = self.width.bucket_start(trade.ts_ms()).ok_or_else(|| {
            Error::data(format!(
                "timestamp {}ms of {} is outside the bucket grid",
                trade.ts_ms(),
                trade.trade.raw.dissemination_id
            ))
        })?;
        if let Some(&through) = self.finalized_through.get(trade.instrument_id()) {
            if start < through {
                self.late_trades += 1;
                warn!(
                    instrument = trade.instrument_id(),
                    bucket_start_ms = start,
                    "Trade for already finalized bucket"
                );
            }
        }

        let acc = self
            .buckets
            .entry(BucketKey::new(trade.instrument_id(), start))
            .or_default();
        acc.add(trade);
        debug_assert!(acc.is_consistent(self.tolerance.max(1e-9)));
        self.trade_count += 1;
        Ok(())
    }

    /// Add multiple trades, stopping at the first rejected one.
    pub fn add_trades<'a>(&mut self, trades: impl IntoIterator<Item = &'a ClassifiedTrade>) -> Result<()> {
        for trade in trades {
            self.add(trade)?;
        }
        Ok(())
    }

    /// Current state of one bucket.
    pub fn get(&self, instrument_id: &str, bucket_start_ms: TimestampMs) -> Option<ImbalanceBucket> {
        let key = BucketKey::new(instrument_id, bucket_start_ms);
        self.buckets.get(&key).map(|acc| acc.to_bucket(&key, &self.width))
    }

    /// Copy of every open bucket.
    pub fn snapshot(&self) -> ImbalanceSnapshot {
        self.snapshot_where(|_| true)
    }

    /// Copy of one instrument's open buckets.
    pub fn snapshot_instrument(&self, instrument_id: &str) -> ImbalanceSnapshot {
        self.snapshot_where(|key| key.instrument_id == instrument_id)
    }

    fn snapshot_where(&self, keep: impl Fn(&BucketKey) -> bool) -> ImbalanceSnapshot {
        let buckets = self
            .buckets
            .iter()
            .filter(|&(key, _)| keep(key))
            .map(|(key, acc)| (key.clone(), acc.to_bucket(key, &self.width)))
            .collect();
        ImbalanceSnapshot { buckets }
    }

    /// Remove and return every bucket ending at or before `ts_ms`.
    ///
    /// Trades arriving later for those buckets start a fresh bucket and are
    /// counted in [`late_trades`](Self::late_trades).
    pub fn finalize_before(&mut self, ts_ms: TimestampMs) -> Vec<ImbalanceBucket> {
        let width = self.width.width_ms();
        let ready: Vec<BucketKey> = self
            .buckets
            .keys()
            .filter(|key| key.bucket_start_ms + width <= ts_ms)
            .cloned()
            .collect();

        let mut out = Vec::with_capacity(ready.len());
        for key in ready {
            if let Some(acc) = self.buckets.remove(&key) {
                let bucket = acc.to_bucket(&key, &self.width);
                let through = self
                    .finalized_through
                    .entry(key.instrument_id.clone())
                    .or_insert(bucket.bucket_end_ms);
                *through = (*through).max(bucket.bucket_end_ms);
                out.push(bucket);
            }
        }
        debug!(count = out.len(), before_ms = ts_ms, "Finalized buckets");
        out
    }

    /// Remove and return every bucket.
    pub fn drain(&mut self) -> Vec<ImbalanceBucket> {
        self.finalize_before(TimestampMs::MAX)
    }

    /// Fold another aggregator's open buckets and finalization watermarks
    /// into this one.
    pub fn merge(&mut self, other: &ImbalanceAggregator) -> Result<()> {
        if other.width != self.width {
            return Err(Error::config(format!(
                "cannot merge aggregators with different grids ({:?} vs {:?})",
                self.width, other.width
            )));
        }
        for (key, acc) in &other.buckets {
            self.buckets.entry(key.clone()).or_default().merge(acc);
        }
        for (instrument, &through) in &other.finalized_through {
            let mine = self.finalized_through.entry(instrument.clone()).or_insert(through);
            *mine = (*mine).max(through);
        }
        self.trade_count += other.trade_count;
        self.late_trades += other.late_trades;
        Ok(())
    }

    /// Keys of buckets failing the signed-sum consistency check.
    pub fn inconsistent_buckets(&self) -> Vec<BucketKey> {
        self.buckets
            .iter()
            .filter(|(_, acc)| !acc.is_consistent(self.tolerance))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Instruments with open buckets.
    pub fn instruments(&self) -> BTreeSet<&str> {
        self.buckets.keys().map(|k| k.instrument_id.as_str()).collect()
    }

    pub fn width(&self) -> BucketWidth {
        self.width
    }

    /// Number of open buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Trades added since creation.
    pub fn trade_count(&self) -> u64 {
        self.trade_count
    }

    /// Trades that landed in an already finalized bucket.
    pub fn late_trades(&self) -> u64 {
        self.late_trades
    }

    /// Clear all data.
    pub fn clear(&mut self) {
        self.buckets.clear();
        self.finalized_through.clear();
        self.trade_count = 0;
        self.late_trades = 0;
    }
}
