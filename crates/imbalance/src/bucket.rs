//! Time bucket grid.

use cdx_core::config::AggregationConfig;
use cdx_core::{Error, Result, TimestampMs, MS_PER_DAY, MS_PER_MINUTE};
use serde::{Deserialize, Serialize};

/// Fixed-width bucket grid anchored at `anchor_ms`.
///
/// Buckets are half-open `[start, start + width)`. Timestamps before the
/// anchor fall into buckets extending the grid backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketWidth {
    width_ms: i64,
    anchor_ms: TimestampMs,
}

impl BucketWidth {
    pub fn new(width_ms: i64, anchor_ms: TimestampMs) -> Result<Self> {
        if width_ms <= 0 {
            return Err(Error::config(format!("bucket width must be positive, got {width_ms}ms")));
        }
        Ok(Self { width_ms, anchor_ms })
    }

    /// UTC calendar days.
    pub fn daily() -> Self {
        Self {
            width_ms: MS_PER_DAY,
            anchor_ms: 0,
        }
    }

    pub fn from_config(config: &AggregationConfig) -> Result<Self> {
        Self::new(
            i64::from(config.bucket_width_minutes) * MS_PER_MINUTE,
            i64::from(config.anchor_offset_minutes) * MS_PER_MINUTE,
        )
    }

    pub fn width_ms(&self) -> i64 {
        self.width_ms
    }

    pub fn anchor_ms(&self) -> TimestampMs {
        self.anchor_ms
    }

    /// Start of the bucket containing `ts_ms`.
    ///
    /// `None` when the bucket's start or end is not representable, which
    /// only happens within one width of the `i64` limits.
    #[inline]
    pub fn bucket_start(&self, ts_ms: TimestampMs) -> Option<TimestampMs> {
        let start = ts_ms
            .checked_sub(self.anchor_ms)?
            .div_euclid(self.width_ms)
            .checked_mul(self.width_ms)?
            .checked_add(self.anchor_ms)?;
        start.checked_add(self.width_ms).map(|_| start)
    }

    /// Exclusive end of the bucket containing `ts_ms`.
    #[inline]
    pub fn bucket_end(&self, ts_ms: TimestampMs) -> Option<TimestampMs> {
        self.bucket_start(ts_ms)?.checked_add(self.width_ms)
    }
}

/// Identifies one (instrument, bucket).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BucketKey {
    pub instrument_id: String,
    pub bucket_start_ms: TimestampMs,
}

impl BucketKey {
    pub fn new(instrument_id: impl Into<String>, bucket_start_ms: TimestampMs) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            bucket_start_ms,
        }
    }
}
