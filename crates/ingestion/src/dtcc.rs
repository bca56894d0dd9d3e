//! DTCC public swap data repository records.
//!
//! Parses the CFTC credit slice / cumulative CSV layout into [`DtccRecord`]s,
//! resolves corrections and cancellations, and builds the public file URLs.
//! Fetching and unzipping are left to the caller.

use cdx_core::config::{ConversionConfig, SourceConfig};
use cdx_core::{
    CounterpartyFlags, Error, QuoteNotation, RawQuote, RawTrade, Result, TimestampMs, TradeSide,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::{Regex, RegexBuilder};
use std::collections::{HashMap, HashSet};
use std::io::Read;
use tracing::{debug, info};

/// Lifecycle action of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    New,
    /// Modification or correction of an earlier report.
    Amend,
    Cancel,
    /// Report submitted in error.
    Error,
    Other,
}

impl ActionType {
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_uppercase().as_str() {
            "" | "NEW" | "NEWT" => ActionType::New,
            "MODI" | "MODIFY" | "CORR" | "CORRECT" | "AMEND" => ActionType::Amend,
            "CANC" | "CANCEL" => ActionType::Cancel,
            "EROR" | "ERROR" => ActionType::Error,
            _ => ActionType::Other,
        }
    }

    /// The report withdraws the trade.
    pub fn is_removal(self) -> bool {
        matches!(self, ActionType::Cancel | ActionType::Error)
    }
}

/// One parsed repository row.
#[derive(Debug, Clone, PartialEq)]
pub struct DtccRecord {
    pub trade: RawTrade,
    /// Identifier of the report this one amends or cancels.
    pub original_dissemination_id: Option<String>,
    pub action: ActionType,
    pub event_type: Option<String>,
    pub product_name: Option<String>,
    pub upi: Option<String>,
}

impl DtccRecord {
    /// Identifier shared by a report and all its amendments.
    pub fn lineage_id(&self) -> &str {
        self.original_dissemination_id
            .as_deref()
            .unwrap_or(&self.trade.dissemination_id)
    }
}

fn header_key(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Column positions resolved from the header row.
#[derive(Debug, Clone)]
struct Columns {
    execution_ts: usize,
    dissemination_id: usize,
    original_id: Option<usize>,
    action: Option<usize>,
    event: Option<usize>,
    upi: Option<usize>,
    product: Option<usize>,
    notional: usize,
    currency: Option<usize>,
    price: Option<usize>,
    price_notation: Option<usize>,
    spread: Option<usize>,
    spread_notation: Option<usize>,
    cleared: Option<usize>,
    block: Option<usize>,
    side: Option<usize>,
}

impl Columns {
    fn resolve(headers: &csv::StringRecord) -> Result<Self> {
        let keys: Vec<String> = headers.iter().map(header_key).collect();
        let find = |names: &[&str]| names.iter().find_map(|n| keys.iter().position(|k| k == n));
        let require = |what: &str, names: &[&str]| {
            find(names).ok_or_else(|| Error::data(format!("missing {what} column")))
        };

        let columns = Columns {
            execution_ts: require("execution timestamp", &["executiontimestamp", "executiontime"])?,
            dissemination_id: require(
                "dissemination identifier",
                &["disseminationidentifier", "disseminationid"],
            )?,
            original_id: find(&["originaldisseminationidentifier", "originaldisseminationid"]),
            action: find(&["actiontype", "action"]),
            event: find(&["eventtype", "event"]),
            upi: find(&["uniqueproductidentifier", "upi"]),
            product: find(&["productname", "uniqueproductidentifiershortname", "underlierid"]),
            notional: require(
                "notional",
                &["notionalamountleg1", "notionalamount", "roundednotionalamount1", "notional"],
            )?,
            currency: find(&["notionalcurrencyleg1", "notionalamountcurrencyleg1", "notionalcurrency"]),
            price: find(&["price", "pricevalue"]),
            price_notation: find(&["pricenotation", "pricenotationtype"]),
            spread: find(&["spreadleg1", "spreadvalue", "spread"]),
            spread_notation: find(&["spreadnotationleg1", "spreadnotation"]),
            cleared: find(&["cleared"]),
            block: find(&["blocktradeelectionindicator", "blocktrade"]),
            side: find(&["side", "direction"]),
        };
        if columns.upi.is_none() && columns.product.is_none() {
            return Err(Error::data("missing UPI or product name column"));
        }
        if columns.price.is_none() && columns.spread.is_none() {
            return Err(Error::data("missing price or spread column"));
        }
        Ok(columns)
    }
}

/// Parse an execution timestamp: RFC 3339, or naive date-time taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<TimestampMs> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
    ];
    let naive = s.trim_end_matches('Z');
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(naive, fmt).ok())
        .map(|dt| dt.and_utc().timestamp_millis())
}

/// Parse a reported notional. A trailing `+` marks a capped amount.
pub fn parse_notional(s: &str) -> Option<(f64, bool)> {
    let cleaned: String = s.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
    let (digits, capped) = match cleaned.strip_suffix('+') {
        Some(rest) => (rest, true),
        None => (cleaned.as_str(), false),
    };
    digits.parse::<f64>().ok().map(|v| (v, capped))
}

fn parse_flag(s: &str) -> bool {
    matches!(
        s.trim().to_ascii_uppercase().as_str(),
        "Y" | "YES" | "TRUE" | "C" | "1"
    )
}

/// Streaming reader over a repository CSV.
///
/// Yields one `Result` per row; a bad row does not stop the stream.
pub struct DtccReader<R: Read> {
    records: csv::StringRecordsIntoIter<R>,
    columns: Columns,
    spread_notation: QuoteNotation,
    price_notation: QuoteNotation,
    line: u64,
}

impl<R: Read> DtccReader<R> {
    /// Read the header row and resolve columns.
    pub fn new(reader: R, conversion: &ConversionConfig) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers = rdr
            .headers()
            .map_err(|e| Error::data(format!("DTCC header: {e}")))?
            .clone();
        let columns = Columns::resolve(&headers)?;
        debug!(?columns, "Resolved DTCC columns");

        Ok(Self {
            records: rdr.into_records(),
            columns,
            spread_notation: conversion.default_spread_notation,
            price_notation: conversion.default_price_notation,
            line: 1,
        })
    }

    fn parse_row(&self, row: &csv::StringRecord) -> Result<DtccRecord> {
        let c = &self.columns;
        let field = |col: Option<usize>| col.and_then(|i| row.get(i)).filter(|s| !s.is_empty());
        let line = self.line;

        let ts_raw = field(Some(c.execution_ts))
            .ok_or_else(|| Error::parse(format!("line {line}: missing execution timestamp")))?;
        let ts_ms = parse_timestamp(ts_raw)
            .ok_or_else(|| Error::parse(format!("line {line}: bad timestamp {ts_raw:?}")))?;
        let dissemination_id = field(Some(c.dissemination_id))
            .ok_or_else(|| Error::parse(format!("line {line}: missing dissemination id")))?
            .to_string();

        let upi = field(c.upi).map(str::to_string);
        let product_name = field(c.product).map(str::to_string);
        let instrument_id = upi
            .clone()
            .or_else(|| product_name.clone())
            .ok_or_else(|| Error::parse(format!("line {line}: no UPI or product name")))?;

        let notional_raw = field(Some(c.notional))
            .ok_or_else(|| Error::parse(format!("line {line}: missing notional")))?;
        let (notional, capped) = parse_notional(notional_raw)
            .ok_or_else(|| Error::parse(format!("line {line}: bad notional {notional_raw:?}")))?;

        let notation = |col: Option<usize>, default: QuoteNotation| {
            field(col).and_then(QuoteNotation::parse).unwrap_or(default)
        };
        // Spread wins when both are reported.
        let spread = field(c.spread).and_then(|s| s.parse::<f64>().ok());
        let price = field(c.price).and_then(|s| s.parse::<f64>().ok());
        let quote = match (spread, price) {
            (Some(value), _) => RawQuote::Spread {
                value,
                notation: notation(c.spread_notation, self.spread_notation),
            },
            (None, Some(value)) => RawQuote::Price {
                value,
                notation: notation(c.price_notation, self.price_notation),
            },
            (None, None) => {
                return Err(Error::parse(format!("line {line}: no price or spread")));
            }
        };

        Ok(DtccRecord {
            trade: RawTrade {
                ts_ms,
                dissemination_id,
                instrument_id,
                notional,
                currency: field(c.currency).map(str::to_string),
                quote,
                flags: CounterpartyFlags {
                    cleared: field(c.cleared).map_or(false, parse_flag),
                    block_trade: field(c.block).map_or(false, parse_flag),
                    notional_capped: capped,
                },
                side: field(c.side).and_then(TradeSide::parse),
            },
            original_dissemination_id: field(c.original_id).map(str::to_string),
            action: ActionType::parse(field(c.action).unwrap_or("")),
            event_type: field(c.event).map(str::to_string),
            product_name,
            upi,
        })
    }
}

impl<R: Read> Iterator for DtccReader<R> {
    type Item = Result<DtccRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.records.next()?;
        self.line += 1;
        Some(
            row.map_err(|e| Error::parse(format!("line {}: {e}", self.line)))
                .and_then(|row| self.parse_row(&row)),
        )
    }
}

/// Collapse each report lineage to its latest version.
///
/// A lineage whose latest report is a cancel or error is dropped. Output is
/// ordered by execution time, then input order.
pub fn resolve_amendments(records: Vec<DtccRecord>) -> Vec<DtccRecord> {
    let input = records.len();
    let mut latest: HashMap<String, (usize, DtccRecord)> = HashMap::new();
    for (idx, record) in records.into_iter().enumerate() {
        let key = record.lineage_id().to_string();
        // Later rows win; the feed is in dissemination order.
        latest.insert(key, (idx, record));
    }

    let mut kept: Vec<(usize, DtccRecord)> = latest
        .into_values()
        .filter(|(_, r)| !r.action.is_removal())
        .collect();
    kept.sort_by_key(|(idx, r)| (r.trade.ts_ms, *idx));

    info!(input, kept = kept.len(), "Resolved amendments");
    kept.into_iter().map(|(_, r)| r).collect()
}

/// Selects the products of interest.
///
/// A configured UPI list is definitive for records that carry a UPI. The
/// product-name pattern (case-insensitive, unanchored) applies only to
/// records without one. A record with neither a UPI nor a product name is
/// kept.
#[derive(Debug, Clone, Default)]
pub struct ProductFilter {
    pattern: Option<Regex>,
    upis: HashSet<String>,
}

impl ProductFilter {
    pub fn new(pattern: Option<&str>, upis: impl IntoIterator<Item = String>) -> Result<Self> {
        let pattern = pattern
            .map(|p| RegexBuilder::new(p).case_insensitive(true).build())
            .transpose()
            .map_err(|e| Error::config(format!("bad product pattern: {e}")))?;
        Ok(Self {
            pattern,
            upis: upis.into_iter().collect(),
        })
    }

    pub fn from_config(source: &SourceConfig) -> Result<Self> {
        Self::new(source.product_pattern.as_deref(), source.upi_allow_list.iter().cloned())
    }

    /// Keeps everything.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn matches(&self, record: &DtccRecord) -> bool {
        if !self.upis.is_empty() {
            if let Some(upi) = record.upi.as_deref() {
                return self.upis.contains(upi);
            }
        }
        match (&self.pattern, record.product_name.as_deref()) {
            (Some(re), Some(name)) => re.is_match(name),
            _ => true,
        }
    }
}

fn join_base(base: &str) -> String {
    if base.ends_with('/') {
        base.to_string()
    } else {
        format!("{base}/")
    }
}

/// URL of the end-of-day cumulative file for `date`.
pub fn eod_cumulative_url(base: &str, asset_class: &str, date: NaiveDate) -> String {
    format!(
        "{}CFTC_CUMULATIVE_{}_{}.zip",
        join_base(base),
        asset_class.to_ascii_uppercase(),
        date.format("%Y_%m_%d")
    )
}

/// URL of intraday slice `sequence` for `date`.
pub fn slice_url(base: &str, asset_class: &str, date: NaiveDate, sequence: u32) -> String {
    format!(
        "{}CFTC_SLICE_{}_{}_{}.zip",
        join_base(base),
        asset_class.to_ascii_uppercase(),
        date.format("%Y_%m_%d"),
        sequence
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "Dissemination Identifier,Original Dissemination Identifier,Action type,Event type,\
Execution Timestamp,Cleared,Block trade election indicator,Unique Product Identifier,Product name,\
Notional amount-Leg 1,Notional currency-Leg 1,Price,Price notation,Spread-Leg 1,Spread notation-Leg 1";

    fn read(rows: &[&str]) -> Vec<Result<DtccRecord>> {
        let text = std::iter::once(HEADER).chain(rows.iter().copied()).collect::<Vec<_>>().join("\n");
        DtccReader::new(text.as_bytes(), &ConversionConfig::default())
            .unwrap()
            .collect()
    }

    #[test]
    fn test_parse_spread_row() {
        let rows = read(&[
            "101,,NEWT,TRAD,2024-01-02T09:00:00Z,C,N,QZ0PH5HG4P9T,CDX.NA.IG.S41,\"100,000,000+\",USD,,,0.0055,Decimal",
        ]);
        let record = rows[0].as_ref().unwrap();
        assert_eq!(record.trade.dissemination_id, "101");
        assert_eq!(record.trade.instrument_id, "QZ0PH5HG4P9T");
        assert_eq!(record.trade.notional, 100_000_000.0);
        assert!(record.trade.flags.notional_capped);
        assert!(record.trade.flags.cleared);
        assert!(!record.trade.flags.block_trade);
        assert_eq!(
            record.trade.quote,
            RawQuote::Spread {
                value: 0.0055,
                notation: QuoteNotation::Decimal
            }
        );
        assert_eq!(record.action, ActionType::New);
        assert_eq!(record.product_name.as_deref(), Some("CDX.NA.IG.S41"));
    }

    #[test]
    fn test_price_fallback_and_bad_rows() {
        let rows = read(&[
            "102,,NEWT,TRAD,2024-01-02 09:05:00,N,Y,,CDX.NA.HY.S41,5000000,USD,101.25,Percentage,,",
            "103,,NEWT,TRAD,not-a-time,N,N,UPI,X,1000,USD,,,50,BPS",
            "104,,NEWT,TRAD,2024-01-02T09:06:00Z,N,N,UPI,X,1000,USD,,,,",
        ]);
        let record = rows[0].as_ref().unwrap();
        assert_eq!(record.trade.instrument_id, "CDX.NA.HY.S41");
        assert!(record.trade.flags.block_trade);
        assert_eq!(
            record.trade.quote,
            RawQuote::Price {
                value: 101.25,
                notation: QuoteNotation::Percentage
            }
        );
        assert_eq!(record.trade.ts_ms, parse_timestamp("2024-01-02T09:05:00Z").unwrap());
        assert!(matches!(rows[1], Err(Error::Parse(_))));
        assert!(matches!(rows[2], Err(Error::Parse(_))));
    }

    #[test]
    fn test_missing_columns() {
        let err = DtccReader::new("a,b\n1,2".as_bytes(), &ConversionConfig::default());
        assert!(matches!(err, Err(Error::Data(_))));
    }

    #[test]
    fn test_resolve_amendments() {
        let rows = read(&[
            "1,,NEWT,TRAD,2024-01-02T09:00:00Z,C,N,U,P,1000,USD,,,50,BPS",
            "2,,NEWT,TRAD,2024-01-02T09:01:00Z,C,N,U,P,2000,USD,,,51,BPS",
            "3,1,CORR,TRAD,2024-01-02T09:00:00Z,C,N,U,P,1500,USD,,,50,BPS",
            "4,2,CANC,TRAD,2024-01-02T09:01:00Z,C,N,U,P,2000,USD,,,51,BPS",
            "5,,NEWT,TRAD,2024-01-02T08:59:00Z,C,N,U,P,700,USD,,,49,BPS",
        ]);
        let records: Vec<DtccRecord> = rows.into_iter().map(|r| r.unwrap()).collect();
        let resolved = resolve_amendments(records);
        let ids: Vec<&str> = resolved.iter().map(|r| r.trade.dissemination_id.as_str()).collect();
        assert_eq!(ids, vec!["5", "3"]);
        assert_eq!(resolved[1].trade.notional, 1500.0);
    }

    #[test]
    fn test_product_filter() {
        let rows = read(&[
            "1,,NEWT,TRAD,2024-01-02T09:00:00Z,C,N,UPI-IG,CDX.NA.IG.S41,1000,USD,,,50,BPS",
            "2,,NEWT,TRAD,2024-01-02T09:00:00Z,C,N,UPI-HY,CDX.NA.HY.S41,1000,USD,,,50,BPS",
        ]);
        let records: Vec<DtccRecord> = rows.into_iter().map(|r| r.unwrap()).collect();

        let ig = ProductFilter::new(Some(r"CDX\.NA\.IG\.S\d+"), Vec::new()).unwrap();
        assert!(ig.matches(&records[0]));
        assert!(!ig.matches(&records[1]));

        let by_upi = ProductFilter::new(None, vec!["UPI-HY".to_string()]).unwrap();
        assert!(!by_upi.matches(&records[0]));
        assert!(by_upi.matches(&records[1]));

        assert!(ProductFilter::all().matches(&records[0]));
        assert!(matches!(ProductFilter::new(Some("("), Vec::new()), Err(Error::Config(_))));
    }

    #[test]
    fn test_upi_list_is_definitive() {
        let rows = read(&[
            "1,,NEWT,TRAD,2024-01-02T09:00:00Z,C,N,QZ0PH5HG4P9T,Credit:Index:CDX:CDXIG,1000,USD,,,50,BPS",
            "2,,NEWT,TRAD,2024-01-02T09:00:00Z,C,N,OTHERUPI,CDX.NA.IG.S41,1000,USD,,,50,BPS",
            "3,,NEWT,TRAD,2024-01-02T09:00:00Z,C,N,,CDX.NA.IG.S41,1000,USD,,,50,BPS",
            "4,,NEWT,TRAD,2024-01-02T09:00:00Z,C,N,,CDX.NA.HY.S41,1000,USD,,,50,BPS",
        ]);
        let records: Vec<DtccRecord> = rows.into_iter().map(|r| r.unwrap()).collect();
        let filter =
            ProductFilter::new(Some(r"CDX\.NA\.IG\.S\d+"), vec!["QZ0PH5HG4P9T".to_string()]).unwrap();

        // UPI decides, whatever the product name says.
        assert!(filter.matches(&records[0]));
        assert!(!filter.matches(&records[1]));
        // No UPI reported: fall back to the pattern.
        assert!(filter.matches(&records[2]));
        assert!(!filter.matches(&records[3]));
    }

    #[test]
    fn test_pattern_ignores_case() {
        let rows = read(&["1,,NEWT,TRAD,2024-01-02T09:00:00Z,C,N,UPI,cdx.na.ig.s41,1000,USD,,,50,BPS"]);
        let record = rows[0].as_ref().unwrap();
        let filter = ProductFilter::new(Some(r"CDX\.NA\.IG\.S\d+"), Vec::new()).unwrap();
        assert!(filter.matches(record));
    }

    #[test]
    fn test_missing_product_name_is_kept() {
        let rows = read(&["1,,NEWT,TRAD,2024-01-02T09:00:00Z,C,N,UPI-IG,,1000,USD,,,50,BPS"]);
        let record = rows[0].as_ref().unwrap();
        assert_eq!(record.product_name, None);
        let filter = ProductFilter::new(Some(r"CDX\.NA\.IG\.S\d+"), Vec::new()).unwrap();
        assert!(filter.matches(record));
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!(parse_notional("1,250,000"), Some((1_250_000.0, false)));
        assert_eq!(parse_notional("25000000+"), Some((25_000_000.0, true)));
        assert_eq!(parse_notional("lots"), None);
        assert_eq!(parse_timestamp("1970-01-01T00:00:01.5Z"), Some(1_500));
        assert_eq!(parse_timestamp("1970-01-01 00:00:02"), Some(2_000));
        assert_eq!(parse_timestamp("1970-01-01T00:00:00+01:00"), Some(-3_600_000));
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(ActionType::parse("EROR"), ActionType::Error);
        assert!(ActionType::parse("cancel").is_removal());
    }

    #[test]
    fn test_urls() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 3).unwrap();
        assert_eq!(
            eod_cumulative_url("https://host/cftc/eod", "credits", date),
            "https://host/cftc/eod/CFTC_CUMULATIVE_CREDITS_2025_06_03.zip"
        );
        assert_eq!(
            slice_url("https://host/intraday/", "CREDITS", date, 3),
            "https://host/intraday/CFTC_SLICE_CREDITS_2025_06_03_3.zip"
        );
    }
}
