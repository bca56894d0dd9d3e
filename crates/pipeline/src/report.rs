//! Run report.
//!
//! Everything a run produced, serializable to JSON.

use cdx_core::{ImbalanceBucket, Result, TimestampMs};
use cdx_ingestion::ClassificationStats;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::cmp::Reverse;
use std::collections::BTreeSet;

/// Number of buckets listed in [`ImbalanceSummary::largest`].
pub const DEFAULT_TOP_N: usize = 10;

/// Record accounting for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    /// Source rows read, good or bad.
    pub records_seen: u64,
    /// Trades that reached the aggregator.
    pub processed: u64,
    /// Rows excluded by the product filter.
    pub filtered: u64,
    /// Rows superseded or withdrawn by later amendments.
    pub superseded: u64,
    /// Rows that could not be parsed.
    pub skipped_malformed: u64,
    /// Trades dropped by the economic conversion.
    pub skipped_conversion: u64,
}

impl RunCounts {
    /// Rows dropped for any error.
    pub fn skipped(&self) -> u64 {
        self.skipped_malformed + self.skipped_conversion
    }
}

/// Reference to one bucket in a ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketRef {
    pub instrument_id: String,
    pub bucket_start_ms: TimestampMs,
    pub net_imbalance: f64,
}

/// Cross-bucket statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImbalanceSummary {
    pub bucket_count: usize,
    pub instrument_count: usize,
    pub total_notional: f64,
    pub net_imbalance: f64,
    /// Mean net imbalance per bucket. `None` without buckets.
    pub mean_net_imbalance: Option<f64>,
    /// Sample standard deviation of net imbalance. `None` below two buckets.
    pub std_net_imbalance: Option<f64>,
    /// Buckets with the largest |net imbalance|, largest first.
    pub largest: Vec<BucketRef>,
}

fn finite(x: f64) -> Option<f64> {
    x.is_finite().then_some(x)
}

impl ImbalanceSummary {
    pub fn from_buckets(buckets: &[ImbalanceBucket], top_n: usize) -> Self {
        let nets: Vec<f64> = buckets.iter().map(|b| b.net_imbalance).collect();
        let instruments: BTreeSet<&str> = buckets.iter().map(|b| b.instrument_id.as_str()).collect();

        let mut ranked: Vec<&ImbalanceBucket> = buckets.iter().collect();
        ranked.sort_by_key(|b| Reverse(OrderedFloat(b.net_imbalance.abs())));
        let largest = ranked
            .into_iter()
            .take(top_n)
            .map(|b| BucketRef {
                instrument_id: b.instrument_id.clone(),
                bucket_start_ms: b.bucket_start_ms,
                net_imbalance: b.net_imbalance,
            })
            .collect();

        Self {
            bucket_count: buckets.len(),
            instrument_count: instruments.len(),
            total_notional: buckets.iter().map(|b| b.total_notional).sum(),
            net_imbalance: nets.iter().sum(),
            mean_net_imbalance: finite(nets.iter().mean()),
            std_net_imbalance: if nets.len() > 1 {
                finite(nets.iter().std_dev())
            } else {
                None
            },
            largest,
        }
    }
}

/// Output of a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub counts: RunCounts,
    pub classification: ClassificationStats,
    /// Trades that arrived for an already finalized bucket.
    pub late_trades: u64,
    /// Buckets failing the signed-notional consistency check.
    pub inconsistent_buckets: usize,
    /// Buckets ordered by instrument, then start time.
    pub buckets: Vec<ImbalanceBucket>,
    pub summary: ImbalanceSummary,
}

impl RunReport {
    /// Look up one bucket.
    pub fn bucket(&self, instrument_id: &str, bucket_start_ms: TimestampMs) -> Option<&ImbalanceBucket> {
        self.buckets
            .iter()
            .find(|b| b.instrument_id == instrument_id && b.bucket_start_ms == bucket_start_ms)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn bucket(instrument: &str, start: i64, buy: f64, sell: f64) -> ImbalanceBucket {
        ImbalanceBucket {
            instrument_id: instrument.to_string(),
            bucket_start_ms: start,
            bucket_end_ms: start + 1,
            buy_notional: buy,
            sell_notional: sell,
            indeterminate_notional: 0.0,
            net_imbalance: buy - sell,
            total_notional: buy + sell,
            buy_count: 1,
            sell_count: 1,
            indeterminate_count: 0,
            trade_count: 2,
            buy_dv01: 0.0,
            sell_dv01: 0.0,
            net_dv01: 0.0,
            avg_spread_bps: None,
            min_spread_bps: None,
            max_spread_bps: None,
            first_trade_ms: None,
            last_trade_ms: None,
        }
    }

    #[test]
    fn test_summary_stats() {
        let buckets = vec![
            bucket("A", 0, 10.0, 5.0),  // +5
            bucket("A", 1, 1.0, 9.0),   // -8
            bucket("B", 0, 4.0, 1.0),   // +3
        ];
        let summary = ImbalanceSummary::from_buckets(&buckets, 2);
        assert_eq!(summary.bucket_count, 3);
        assert_eq!(summary.instrument_count, 2);
        assert_eq!(summary.net_imbalance, 0.0);
        assert_eq!(summary.total_notional, 30.0);
        assert_relative_eq!(summary.mean_net_imbalance.unwrap(), 0.0);
        // Sample variance of [5, -8, 3] = 49.
        assert_relative_eq!(summary.std_net_imbalance.unwrap(), 7.0, max_relative = 1e-12);

        assert_eq!(summary.largest.len(), 2);
        assert_eq!(summary.largest[0].net_imbalance, -8.0);
        assert_eq!(summary.largest[1].net_imbalance, 5.0);
    }

    #[test]
    fn test_summary_small() {
        let empty = ImbalanceSummary::from_buckets(&[], DEFAULT_TOP_N);
        assert_eq!(empty.bucket_count, 0);
        assert_eq!(empty.mean_net_imbalance, None);
        assert_eq!(empty.std_net_imbalance, None);

        let one = ImbalanceSummary::from_buckets(&[bucket("A", 0, 3.0, 1.0)], DEFAULT_TOP_N);
        assert_eq!(one.mean_net_imbalance, Some(2.0));
        assert_eq!(one.std_net_imbalance, None);
    }

    #[test]
    fn test_report_json() {
        let buckets = vec![bucket("A", 0, 10.0, 5.0)];
        let report = RunReport {
            counts: RunCounts {
                records_seen: 3,
                processed: 1,
                skipped_malformed: 1,
                skipped_conversion: 1,
                ..Default::default()
            },
            classification: ClassificationStats::default(),
            late_trades: 0,
            inconsistent_buckets: 0,
            summary: ImbalanceSummary::from_buckets(&buckets, DEFAULT_TOP_N),
            buckets,
        };
        assert_eq!(report.counts.skipped(), 2);

        let json = report.to_json_pretty().unwrap();
        assert!(json.contains("\"net_imbalance\": 5.0"));
        let back = RunReport::from_json(&json).unwrap();
        assert_eq!(back.bucket("A", 0).unwrap().buy_notional, 10.0);
        assert!(back.bucket("A", 1).is_none());
    }
}
