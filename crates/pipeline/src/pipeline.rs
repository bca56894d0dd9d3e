//! Single-pass pipeline: normalize, classify, aggregate.

use crate::report::{ImbalanceSummary, RunCounts, RunReport, DEFAULT_TOP_N};
use cdx_core::{ClassifiedTrade, Config, Error, RawTrade, Result};
use cdx_imbalance::{ImbalanceAggregator, ImbalanceSnapshot};
use cdx_ingestion::{
    resolve_amendments, ClassificationStats, DtccRecord, Normalizer, ProductFilter,
    ReferenceProvider, TradeClassifier,
};
use tracing::{debug, info, warn};

/// Drives raw trades through normalization, classification and aggregation.
///
/// A trade that fails conversion is logged, counted and dropped; the run
/// carries on.
pub struct Pipeline<P> {
    normalizer: Normalizer,
    classifier: TradeClassifier,
    aggregator: ImbalanceAggregator,
    provider: P,
    counts: RunCounts,
}

impl<P: ReferenceProvider> Pipeline<P> {
    /// Build every stage from configuration.
    pub fn new(config: &Config, provider: P) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            normalizer: Normalizer::from_config(config),
            classifier: TradeClassifier::from_config(&config.classifier),
            aggregator: ImbalanceAggregator::from_config(&config.aggregation)?,
            provider,
            counts: RunCounts::default(),
        })
    }

    /// Build from already constructed stages.
    pub fn from_parts(
        normalizer: Normalizer,
        classifier: TradeClassifier,
        aggregator: ImbalanceAggregator,
        provider: P,
    ) -> Self {
        Self {
            normalizer,
            classifier,
            aggregator,
            provider,
            counts: RunCounts::default(),
        }
    }

    /// Process one raw trade.
    ///
    /// Returns the classified trade, or `None` if it was rejected. A
    /// timestamp outside the bucket grid counts as malformed.
    pub fn process(&mut self, raw: RawTrade) -> Option<ClassifiedTrade> {
        self.counts.records_seen += 1;
        let id = raw.dissemination_id.clone();
        if self.aggregator.width().bucket_start(raw.ts_ms).is_none() {
            self.counts.skipped_malformed += 1;
            warn!(dissemination_id = %id, ts_ms = raw.ts_ms, "Skipping trade: timestamp outside bucket grid");
            return None;
        }
        let normalized = match self.normalizer.normalize(raw) {
            Ok(trade) => trade,
            Err(e) => {
                self.counts.skipped_conversion += 1;
                warn!(dissemination_id = %id, error = %e, "Skipping trade: conversion failed");
                return None;
            }
        };

        let classified = self.classifier.classify_with(normalized, &self.provider);
        if let Err(e) = self.aggregator.add(&classified) {
            self.counts.skipped_malformed += 1;
            warn!(dissemination_id = %id, error = %e, "Skipping trade: aggregation rejected it");
            return None;
        }
        self.counts.processed += 1;
        Some(classified)
    }

    /// Count a source row that could not be parsed.
    pub fn record_malformed(&mut self, err: &Error) {
        self.counts.records_seen += 1;
        self.counts.skipped_malformed += 1;
        warn!(error = %err, "Skipping malformed record");
    }

    /// Process a parsed-or-failed source row.
    pub fn process_result(&mut self, item: Result<RawTrade>) -> Option<ClassifiedTrade> {
        match item {
            Ok(raw) => self.process(raw),
            Err(e) => {
                self.record_malformed(&e);
                None
            }
        }
    }

    /// Process every trade and produce the report.
    pub fn run<I>(mut self, trades: I) -> RunReport
    where
        I: IntoIterator<Item = Result<RawTrade>>,
    {
        for item in trades {
            self.process_result(item);
        }
        self.finish()
    }

    /// Process repository records: filter by product, optionally resolve
    /// amendments, then run every surviving trade.
    pub fn run_records<I>(mut self, records: I, filter: &ProductFilter, amendments: bool) -> RunReport
    where
        I: IntoIterator<Item = Result<DtccRecord>>,
    {
        let mut kept = Vec::new();
        for item in records {
            let record = match item {
                Ok(record) => record,
                Err(e) => {
                    self.record_malformed(&e);
                    continue;
                }
            };
            if !filter.matches(&record) {
                self.counts.records_seen += 1;
                self.counts.filtered += 1;
                debug!(id = %record.trade.dissemination_id, "Filtered out by product");
                continue;
            }
            if amendments {
                kept.push(record);
            } else if !record.action.is_removal() {
                self.process(record.trade);
            } else {
                self.counts.records_seen += 1;
                self.counts.superseded += 1;
            }
        }

        if amendments {
            let before = kept.len();
            let resolved = resolve_amendments(kept);
            let superseded = (before - resolved.len()) as u64;
            self.counts.records_seen += superseded;
            self.counts.superseded += superseded;
            for record in resolved {
                self.process(record.trade);
            }
        }
        self.finish()
    }

    /// Copy of the current buckets.
    pub fn snapshot(&self) -> ImbalanceSnapshot {
        self.aggregator.snapshot()
    }

    pub fn counts(&self) -> &RunCounts {
        &self.counts
    }

    pub fn classification_stats(&self) -> &ClassificationStats {
        self.classifier.stats()
    }

    pub fn aggregator(&self) -> &ImbalanceAggregator {
        &self.aggregator
    }

    pub fn aggregator_mut(&mut self) -> &mut ImbalanceAggregator {
        &mut self.aggregator
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }

    /// Report on the current state without consuming the pipeline.
    pub fn report(&self) -> RunReport {
        let buckets = self.aggregator.snapshot().into_buckets();
        RunReport {
            counts: self.counts.clone(),
            classification: self.classifier.stats().clone(),
            late_trades: self.aggregator.late_trades(),
            inconsistent_buckets: self.aggregator.inconsistent_buckets().len(),
            summary: ImbalanceSummary::from_buckets(&buckets, DEFAULT_TOP_N),
            buckets,
        }
    }

    /// Final report.
    pub fn finish(self) -> RunReport {
        let report = self.report();
        if report.inconsistent_buckets > 0 {
            warn!(count = report.inconsistent_buckets, "Buckets failed the consistency check");
        }
        info!(
            seen = report.counts.records_seen,
            processed = report.counts.processed,
            filtered = report.counts.filtered,
            superseded = report.counts.superseded,
            malformed = report.counts.skipped_malformed,
            conversion = report.counts.skipped_conversion,
            buckets = report.summary.bucket_count,
            indeterminate_frac = report.classification.indeterminate_frac(),
            "Run complete"
        );
        report
    }
}
