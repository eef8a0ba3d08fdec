//! Walk-forward window planning.
//!
//! Boundaries are computed with calendar arithmetic from a moving cursor and
//! then snapped onto the bars that actually exist, so every timestamp in a
//! [`Window`] is a real bar timestamp.

use atlas_common::{BacktestConfig, Span};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::data::PriceSeries;
use crate::error::{BacktestError, Result};

/// Sub-range of a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Train,
    Validation,
    Test,
}

impl Period {
    pub const ALL: [Period; 3] = [Period::Train, Period::Validation, Period::Test];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Validation => "validation",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One train/validation/test split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub index: usize,
    pub train_start: DateTime<Utc>,
    pub train_end: DateTime<Utc>,
    pub val_start: DateTime<Utc>,
    pub val_end: DateTime<Utc>,
    pub test_start: DateTime<Utc>,
    pub test_end: DateTime<Utc>,
}

impl Window {
    /// Inclusive `(start, end)` of a period.
    pub fn period(&self, period: Period) -> (DateTime<Utc>, DateTime<Utc>) {
        match period {
            Period::Train => (self.train_start, self.train_end),
            Period::Validation => (self.val_start, self.val_end),
            Period::Test => (self.test_start, self.test_end),
        }
    }

    pub fn is_strictly_ordered(&self) -> bool {
        self.train_start < self.train_end
            && self.train_end < self.val_start
            && self.val_start < self.val_end
            && self.val_end < self.test_start
            && self.test_start < self.test_end
    }
}

/// Produces walk-forward windows from calendar spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPlanner {
    train: Span,
    validation: Span,
    test: Span,
    roll: Span,
}

impl WindowPlanner {
    pub fn new(train: Span, validation: Span, test: Span, roll: Span) -> Result<Self> {
        for (name, span) in [
            ("train", train),
            ("validation", validation),
            ("test", test),
            ("roll", roll),
        ] {
            if span.is_zero() {
                return Err(BacktestError::InvalidConfig(format!(
                    "{name} span must be positive"
                )));
            }
        }
        Ok(Self {
            train,
            validation,
            test,
            roll,
        })
    }

    pub fn from_config(config: &BacktestConfig) -> Result<Self> {
        Self::new(
            config.train_span,
            config.validation_span,
            config.test_span,
            config.roll_span,
        )
    }

    /// Lazily plan windows over `prices`. Empty when not even one window fits.
    pub fn plan<'a>(&self, prices: &'a PriceSeries) -> WindowIter<'a> {
        WindowIter {
            planner: *self,
            prices,
            cursor: prices.first_timestamp(),
            next_index: 0,
        }
    }

    /// Boundaries for the window starting at `cursor`, or `None` once the
    /// test period would run past the data.
    fn snap(&self, prices: &PriceSeries, cursor: DateTime<Utc>) -> Snap {
        let data_end = match prices.last_timestamp() {
            Some(end) => end,
            None => return Snap::Exhausted,
        };
        let bounds = self
            .train
            .add_to(cursor)
            .and_then(|train_end| Some((train_end, self.validation.add_to(train_end)?)))
            .and_then(|(train_end, val_end)| Some((train_end, val_end, self.test.add_to(val_end)?)));
        let Some((train_end, val_end, test_end)) = bounds else {
            return Snap::Exhausted;
        };
        if test_end > data_end {
            return Snap::Exhausted;
        }

        let at = |i: Option<usize>| i.and_then(|i| prices.timestamp(i));
        let snapped = (|| {
            let train_start = at(prices.first_at_or_after(cursor))?;
            let train_end = at(prices.last_at_or_before(train_end))?;
            let val_start = at(prices.first_after(train_end))?;
            let val_end = at(prices.last_at_or_before(val_end))?;
            let test_start = at(prices.first_after(val_end))?;
            let test_end = at(prices.last_at_or_before(test_end))?;
            Some((train_start, train_end, val_start, val_end, test_start, test_end))
        })();

        match snapped {
            Some(bounds) => Snap::Window(bounds),
            None => Snap::Skipped,
        }
    }
}

type Bounds = (
    DateTime<Utc>,
    DateTime<Utc>,
    DateTime<Utc>,
    DateTime<Utc>,
    DateTime<Utc>,
    DateTime<Utc>,
);

enum Snap {
    Window(Bounds),
    Skipped,
    Exhausted,
}

/// Iterator returned by [`WindowPlanner::plan`].
pub struct WindowIter<'a> {
    planner: WindowPlanner,
    prices: &'a PriceSeries,
    cursor: Option<DateTime<Utc>>,
    next_index: usize,
}

impl Iterator for WindowIter<'_> {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        loop {
            let cursor = self.cursor?;
            let snap = self.planner.snap(self.prices, cursor);
            self.cursor = match snap {
                Snap::Exhausted => None,
                _ => self.planner.roll.add_to(cursor),
            };

            let (train_start, train_end, val_start, val_end, test_start, test_end) = match snap {
                Snap::Window(bounds) => bounds,
                Snap::Skipped => continue,
                Snap::Exhausted => return None,
            };
            let window = Window {
                index: self.next_index,
                train_start,
                train_end,
                val_start,
                val_end,
                test_start,
                test_end,
            };
            if !window.is_strictly_ordered() {
                tracing::debug!(cursor = %cursor, "Skipping degenerate window");
                continue;
            }
            self.next_index += 1;
            return Some(window);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap()
    }

    fn series(n: usize) -> PriceSeries {
        let closes: Vec<f64> = (0..n).map(|i| 100.0 + i as f64 * 0.1).collect();
        PriceSeries::from_closes(start(), &closes).unwrap()
    }

    fn planner(train: u32, val: u32, test: u32, roll: u32) -> WindowPlanner {
        WindowPlanner::new(
            Span::months(train),
            Span::months(val),
            Span::months(test),
            Span::months(roll),
        )
        .unwrap()
    }

    #[test]
    fn test_default_spans_over_four_years() {
        // ~4 years of weekdays: 36 + 6 + 1 months fits with room to roll
        let prices = series(1040);
        let windows: Vec<_> = planner(36, 6, 1, 1).plan(&prices).collect();
        assert!(windows.len() >= 5, "got {} windows", windows.len());
        assert_eq!(windows[0].train_start, prices.first_timestamp().unwrap());
        for (i, w) in windows.iter().enumerate() {
            assert_eq!(w.index, i);
            assert!(w.is_strictly_ordered());
            assert!(w.test_end <= prices.last_timestamp().unwrap());
        }
        assert!(windows.windows(2).all(|p| p[0].train_start < p[1].train_start));
    }

    #[test]
    fn test_boundaries_are_real_bars() {
        let prices = series(400);
        for w in planner(6, 3, 1, 2).plan(&prices) {
            for period in Period::ALL {
                let (s, e) = w.period(period);
                assert!(prices.first_at_or_after(s).and_then(|i| prices.timestamp(i)) == Some(s));
                assert!(prices.last_at_or_before(e).and_then(|i| prices.timestamp(i)) == Some(e));
            }
        }
    }

    #[test]
    fn test_insufficient_history_is_empty() {
        let prices = series(30);
        assert_eq!(planner(36, 6, 1, 1).plan(&prices).count(), 0);
    }

    #[test]
    fn test_zero_span_rejected() {
        let err = WindowPlanner::new(Span::months(1), Span::months(1), Span::months(1), Span::days(0))
            .unwrap_err();
        assert!(matches!(err, BacktestError::InvalidConfig(_)));
    }

    #[test]
    fn test_period_order_and_display() {
        assert!(Period::Train < Period::Validation && Period::Validation < Period::Test);
        assert_eq!(Period::Validation.to_string(), "validation");
        assert_eq!(serde_json::to_string(&Period::Test).unwrap(), "\"test\"");
    }

    proptest! {
        #[test]
        fn prop_windows_strictly_ordered(
            n in 60usize..900,
            train in 1u32..12,
            val in 1u32..4,
            test in 1u32..3,
            roll in 1u32..4,
        ) {
            let prices = series(n);
            let last = prices.last_timestamp().unwrap();
            for w in planner(train, val, test, roll).plan(&prices) {
                prop_assert!(w.is_strictly_ordered());
                prop_assert!(w.test_end <= last);
            }
        }
    }
}
