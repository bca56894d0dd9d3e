//! Error types for the cdx-imbalance system.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the cdx-imbalance system.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data error (invalid or missing data).
    #[error("Data error: {0}")]
    Data(String),

    /// A source record could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Economic conversion failed for a single trade.
    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with message.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a data error.
    pub fn data(msg: impl Into<String>) -> Self {
        Error::Data(msg.into())
    }

    /// Create a parse error.
    pub fn parse(msg: impl Into<String>) -> Self {
        Error::Parse(msg.into())
    }
}

/// Malformed or out-of-range economic input.
///
/// Raised by the conversion utility. The offending trade is dropped from
/// aggregation; the batch carries on.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConversionError {
    /// No reference terms (coupon, maturity, ...) for the instrument.
    #[error("missing reference terms for instrument {instrument_id}")]
    MissingTerms { instrument_id: String },

    /// A required input was NaN or infinite.
    #[error("{field} is not finite ({value})")]
    NonFinite { field: &'static str, value: f64 },

    /// Notional must be strictly positive.
    #[error("notional must be positive, got {0}")]
    InvalidNotional(f64),

    /// Value outside the sane numeric range for its field.
    #[error("{field} {value} outside [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Instrument has matured at trade time.
    #[error("instrument {instrument_id} matured before trade time")]
    Matured { instrument_id: String },

    /// Notation that makes no sense for the quote kind.
    #[error("notation {notation} is not valid for a {kind} quote")]
    UnsupportedNotation {
        kind: &'static str,
        notation: &'static str,
    },

    /// Root finding could not bracket the target.
    #[error("no spread reproduces upfront {upfront}")]
    NoSolution { upfront: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_error_wraps() {
        let err: Error = ConversionError::InvalidNotional(-5.0).into();
        assert!(matches!(err, Error::Conversion(ConversionError::InvalidNotional(_))));
        assert_eq!(
            err.to_string(),
            "Conversion error: notional must be positive, got -5"
        );
    }

    #[test]
    fn test_out_of_range_message() {
        let err = ConversionError::OutOfRange {
            field: "price",
            value: 250.0,
            min: 0.0,
            max: 200.0,
        };
        assert_eq!(err.to_string(), "price 250 outside [0, 200]");
    }
}
