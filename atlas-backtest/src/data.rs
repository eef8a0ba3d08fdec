//! Daily price history.
//!
//! A [`PriceSeries`] is validated once on construction and is read-only
//! afterwards; every other component borrows bars from it.

use chrono::{DateTime, Datelike, Duration, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::{BacktestError, Result};

/// One OHLCV observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    #[serde(alias = "Date", alias = "date", alias = "Timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(alias = "Open")]
    pub open: f64,
    #[serde(alias = "High")]
    pub high: f64,
    #[serde(alias = "Low")]
    pub low: f64,
    #[serde(alias = "Close")]
    pub close: f64,
    #[serde(alias = "Volume")]
    pub volume: f64,
}

impl PriceBar {
    fn check(&self) -> std::result::Result<(), String> {
        let fields = [self.open, self.high, self.low, self.close, self.volume];
        if fields.iter().any(|v| !v.is_finite()) {
            return Err("non-finite value".into());
        }
        if self.close <= 0.0 {
            return Err(format!("close must be positive, got {}", self.close));
        }
        if self.low > self.open.min(self.close) {
            return Err(format!(
                "low {} above open/close ({}, {})",
                self.low, self.open, self.close
            ));
        }
        if self.high < self.open.max(self.close) {
            return Err(format!(
                "high {} below open/close ({}, {})",
                self.high, self.open, self.close
            ));
        }
        if self.volume < 0.0 {
            return Err(format!("negative volume {}", self.volume));
        }
        Ok(())
    }
}

/// Time-ordered, validated price history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceSeries {
    bars: Vec<PriceBar>,
}

impl PriceSeries {
    /// Validate and wrap a list of bars.
    ///
    /// Requires strictly increasing timestamps, `low <= open,close <= high`,
    /// non-negative volume and a positive close.
    pub fn new(bars: Vec<PriceBar>) -> Result<Self> {
        for (index, bar) in bars.iter().enumerate() {
            bar.check()
                .map_err(|reason| BacktestError::InvalidPriceData { index, reason })?;
            if index > 0 && bars[index - 1].timestamp >= bar.timestamp {
                return Err(BacktestError::InvalidPriceData {
                    index,
                    reason: format!(
                        "timestamp {} is not after {}",
                        bar.timestamp,
                        bars[index - 1].timestamp
                    ),
                });
            }
        }
        Ok(Self { bars })
    }

    /// Parse a JSON array of bars and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let bars: Vec<PriceBar> = serde_json::from_str(json).map_err(|e| {
            BacktestError::InvalidPriceData {
                index: 0,
                reason: format!("malformed JSON: {e}"),
            }
        })?;
        Self::new(bars)
    }

    /// Build a flat-bar series on consecutive weekdays from a list of closes.
    ///
    /// Open, high and low equal the close; volume is constant. Intended for
    /// synthetic scenarios and tests.
    pub fn from_closes(start: DateTime<Utc>, closes: &[f64]) -> Result<Self> {
        let mut bars = Vec::with_capacity(closes.len());
        let mut day = start;
        for &close in closes {
            while matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
                day += Duration::days(1);
            }
            bars.push(PriceBar {
                timestamp: day,
                open: close,
                high: close,
                low: close,
                close,
                volume: 1_000_000.0,
            });
            day += Duration::days(1);
        }
        Self::new(bars)
    }

    pub fn bars(&self) -> &[PriceBar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.bars.first().map(|b| b.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.bars.last().map(|b| b.timestamp)
    }

    pub fn timestamp(&self, index: usize) -> Option<DateTime<Utc>> {
        self.bars.get(index).map(|b| b.timestamp)
    }

    /// Index of the first bar at or after `at`.
    pub fn first_at_or_after(&self, at: DateTime<Utc>) -> Option<usize> {
        let idx = self.bars.partition_point(|b| b.timestamp < at);
        (idx < self.bars.len()).then_some(idx)
    }

    /// Index of the first bar strictly after `at`.
    pub fn first_after(&self, at: DateTime<Utc>) -> Option<usize> {
        let idx = self.bars.partition_point(|b| b.timestamp <= at);
        (idx < self.bars.len()).then_some(idx)
    }

    /// Index of the last bar at or before `at`.
    pub fn last_at_or_before(&self, at: DateTime<Utc>) -> Option<usize> {
        self.bars.partition_point(|b| b.timestamp <= at).checked_sub(1)
    }

    /// Bars with `start <= timestamp <= end`.
    pub fn slice(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> &[PriceBar] {
        let lo = self.bars.partition_point(|b| b.timestamp < start);
        let hi = self.bars.partition_point(|b| b.timestamp <= end);
        if lo >= hi {
            &[]
        } else {
            &self.bars[lo..hi]
        }
    }

    pub fn closes(&self) -> Vec<f64> {
        closes(&self.bars)
    }
}

/// Close prices of a bar slice.
pub fn closes(bars: &[PriceBar]) -> Vec<f64> {
    bars.iter().map(|b| b.close).collect()
}

/// Trailing mean of volume over `window` bars; NaN until the window is full.
pub fn average_daily_volume(bars: &[PriceBar], window: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; bars.len()];
    if window == 0 {
        return out;
    }
    let mut sum = 0.0;
    for (i, bar) in bars.iter().enumerate() {
        sum += bar.volume;
        if i >= window {
            sum -= bars[i - window].volume;
        }
        if i + 1 >= window {
            out[i] = sum / window as f64;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn bar(ts: DateTime<Utc>, close: f64) -> PriceBar {
        PriceBar {
            timestamp: ts,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 100.0,
        }
    }

    // ========================================================================
    // Validation
    // ========================================================================

    #[test]
    fn test_rejects_unordered_timestamps() {
        let bars = vec![bar(day(2020, 1, 2), 10.0), bar(day(2020, 1, 2), 11.0)];
        let err = PriceSeries::new(bars).unwrap_err();
        assert!(matches!(err, BacktestError::InvalidPriceData { index: 1, .. }));
    }

    #[test]
    fn test_rejects_high_below_close() {
        let mut b = bar(day(2020, 1, 2), 10.0);
        b.high = 9.5;
        assert!(PriceSeries::new(vec![b]).is_err());
    }

    #[test]
    fn test_rejects_negative_volume() {
        let mut b = bar(day(2020, 1, 2), 10.0);
        b.volume = -1.0;
        assert!(PriceSeries::new(vec![b]).is_err());
    }

    #[test]
    fn test_from_closes_skips_weekends() {
        // 2021-01-01 is a Friday
        let series = PriceSeries::from_closes(day(2021, 1, 1), &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(series.timestamp(1), Some(day(2021, 1, 4)));
        assert_eq!(series.timestamp(2), Some(day(2021, 1, 5)));
    }

    #[test]
    fn test_from_json_accepts_capitalized_fields() {
        let json = r#"[
            {"Date": "2021-01-04T00:00:00Z", "Open": 1.0, "High": 2.0, "Low": 0.5, "Close": 1.5, "Volume": 10},
            {"timestamp": "2021-01-05T00:00:00Z", "open": 1.5, "high": 2.0, "low": 1.0, "close": 1.8, "volume": 12}
        ]"#;
        let series = PriceSeries::from_json(json).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.closes(), vec![1.5, 1.8]);
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    #[test]
    fn test_snapping_lookups() {
        let series = PriceSeries::from_closes(day(2021, 1, 4), &[1.0; 5]).unwrap();
        // Saturday between two weeks' bars
        let sat = day(2021, 1, 9);
        assert_eq!(series.first_at_or_after(day(2021, 1, 4)), Some(0));
        assert_eq!(series.first_after(day(2021, 1, 4)), Some(1));
        assert_eq!(series.last_at_or_before(sat), Some(4));
        assert_eq!(series.first_at_or_after(sat), None);
        assert_eq!(series.last_at_or_before(day(2020, 12, 31)), None);
    }

    #[test]
    fn test_slice_is_inclusive() {
        let series = PriceSeries::from_closes(day(2021, 1, 4), &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let slice = series.slice(day(2021, 1, 5), day(2021, 1, 6));
        assert_eq!(closes(slice), vec![2.0, 3.0]);
        assert!(series.slice(day(2021, 2, 1), day(2021, 3, 1)).is_empty());
    }

    #[test]
    fn test_average_daily_volume() {
        let mut bars: Vec<PriceBar> = (0..4).map(|i| bar(day(2021, 1, 4 + i), 10.0)).collect();
        bars[3].volume = 300.0;
        let adv = average_daily_volume(&bars, 2);
        assert!(adv[0].is_nan());
        assert_eq!(adv[1], 100.0);
        assert_eq!(adv[3], 200.0);
    }
}
