//! CSV in, report out.

use cdx_core::Config;
use cdx_ingestion::{
    load_reference_csv, ConstantReference, DtccReader, Normalizer, ProductFilter, ReferenceSeries,
};
use cdx_pipeline::{Pipeline, RunReport};

const DAY: i64 = 1_704_153_600_000; // 2024-01-02T00:00:00Z

const TRADES: &str = "\
Dissemination Identifier,Original Dissemination Identifier,Action type,Event type,Execution Timestamp,Cleared,Block trade election indicator,Unique Product Identifier,Product name,Notional amount-Leg 1,Notional currency-Leg 1,Price,Price notation,Spread-Leg 1,Spread notation-Leg 1
1,,NEWT,TRAD,2024-01-02T09:00:00Z,C,N,,CDX.NA.IG.S41,10,USD,,,105,BPS
2,,NEWT,TRAD,2024-01-02T10:00:00Z,C,N,,CDX.NA.IG.S41,5,USD,,,95,BPS
";

fn run(config: &Config, trades: &str, amendments: bool) -> RunReport {
    let reader = DtccReader::new(trades.as_bytes(), &config.conversion).unwrap();
    let pipeline = Pipeline::new(config, ConstantReference::new(100.0)).unwrap();
    pipeline.run_records(reader, &ProductFilter::all(), amendments)
}

fn threshold(bps: f64) -> Config {
    let mut config = Config::default();
    config.classifier.threshold_bps = bps;
    config
}

#[test]
fn two_trades_against_constant_reference() {
    let report = run(&threshold(2.0), TRADES, true);

    let bucket = report.bucket("CDX.NA.IG.S41", DAY).unwrap();
    assert_eq!(bucket.buy_notional, 10.0);
    assert_eq!(bucket.sell_notional, 5.0);
    assert_eq!(bucket.net_imbalance, 5.0);
    assert_eq!(bucket.trade_count, 2);
    assert_eq!(report.counts.records_seen, 2);
    assert_eq!(report.counts.processed, 2);
    assert_eq!(report.summary.bucket_count, 1);
    assert_eq!(report.classification.buyer_initiated, 1);
    assert_eq!(report.classification.seller_initiated, 1);
}

#[test]
fn wide_threshold_leaves_everything_indeterminate() {
    let report = run(&threshold(10.0), TRADES, true);
    let bucket = report.bucket("CDX.NA.IG.S41", DAY).unwrap();
    assert_eq!(bucket.net_imbalance, 0.0);
    assert_eq!(bucket.indeterminate_notional, 15.0);
    assert_eq!(bucket.total_notional, 15.0);
}

#[test]
fn bad_rows_are_counted_not_fatal() {
    let trades = format!(
        "{TRADES}3,,NEWT,TRAD,garbage,C,N,,CDX.NA.IG.S41,5,USD,,,95,BPS\n\
         4,,NEWT,TRAD,2024-01-02T11:00:00Z,C,N,,CDX.NA.IG.S41,0,USD,,,95,BPS\n"
    );
    let report = run(&threshold(2.0), &trades, true);
    assert_eq!(report.counts.records_seen, 4);
    assert_eq!(report.counts.processed, 2);
    assert_eq!(report.counts.skipped_malformed, 1);
    assert_eq!(report.counts.skipped_conversion, 1);
    assert_eq!(report.bucket("CDX.NA.IG.S41", DAY).unwrap().net_imbalance, 5.0);
}

#[test]
fn cancels_and_corrections() {
    let trades = format!(
        "{TRADES}5,2,CANC,TRAD,2024-01-02T10:00:00Z,C,N,,CDX.NA.IG.S41,5,USD,,,95,BPS\n\
         6,1,CORR,TRAD,2024-01-02T09:00:00Z,C,N,,CDX.NA.IG.S41,20,USD,,,105,BPS\n"
    );
    let report = run(&threshold(2.0), &trades, true);
    let bucket = report.bucket("CDX.NA.IG.S41", DAY).unwrap();
    assert_eq!(bucket.buy_notional, 20.0);
    assert_eq!(bucket.sell_notional, 0.0);
    assert_eq!(report.counts.superseded, 3);
    assert_eq!(report.counts.records_seen, 4);
}

#[test]
fn product_filter_counts() {
    let mut config = threshold(2.0);
    config.source.product_pattern = Some(r"CDX\.NA\.HY".to_string());
    let reader = DtccReader::new(TRADES.as_bytes(), &config.conversion).unwrap();
    let filter = ProductFilter::from_config(&config.source).unwrap();
    let report = Pipeline::new(&config, ConstantReference::new(100.0))
        .unwrap()
        .run_records(reader, &filter, true);
    assert_eq!(report.counts.filtered, 2);
    assert!(report.buckets.is_empty());
    assert_eq!(report.summary.mean_net_imbalance, None);
}

#[test]
fn reference_series_from_csv() {
    let config = threshold(2.0);
    let reference = "timestamp,instrument_id,level\n\
                     2024-01-02T08:59:50Z,CDX.NA.IG.S41,100\n\
                     2024-01-02T10:00:05Z,CDX.NA.IG.S41,97\n";
    let mut series = ReferenceSeries::from_config(&config.classifier);
    let normalizer = Normalizer::from_config(&config);
    assert_eq!(load_reference_csv(reference.as_bytes(), &mut series, &normalizer, &config).unwrap(), 2);

    let reader = DtccReader::new(TRADES.as_bytes(), &config.conversion).unwrap();
    let report = Pipeline::new(&config, series)
        .unwrap()
        .run_records(reader, &ProductFilter::all(), true);
    let bucket = report.bucket("CDX.NA.IG.S41", DAY).unwrap();
    // 105 vs 100 is a buy; 95 vs 97 is inside the 2bp band.
    assert_eq!(bucket.buy_notional, 10.0);
    assert_eq!(bucket.indeterminate_notional, 5.0);
    assert_eq!(report.classification.avg_reference_lag_ms(), 7_500.0);
}

#[test]
fn report_round_trips_through_json() {
    let report = run(&threshold(2.0), TRADES, true);
    let json = report.to_json_pretty().unwrap();
    let back = RunReport::from_json(&json).unwrap();
    assert_eq!(back.counts, report.counts);
    assert_eq!(back.buckets.len(), 1);
    assert_eq!(back.bucket("CDX.NA.IG.S41", DAY).unwrap().net_imbalance, 5.0);
    assert_eq!(back.summary.largest[0].instrument_id, "CDX.NA.IG.S41");
}
