//! Calendar spans used to size walk-forward windows.
//!
//! A span is a count plus a calendar unit, written compactly as `36M`, `6M`,
//! `2w`, `30d` or `1y`. Month and year arithmetic follows the calendar and
//! clamps to the end of shorter months, so `Jan 31 + 1M` lands on the last day
//! of February.

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Calendar unit of a [`Span`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpanUnit {
    Days,
    Weeks,
    Months,
    Years,
}

impl SpanUnit {
    fn suffix(self) -> &'static str {
        match self {
            Self::Days => "d",
            Self::Weeks => "w",
            Self::Months => "M",
            Self::Years => "y",
        }
    }
}

/// A calendar offset such as "36 months".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Span {
    count: u32,
    unit: SpanUnit,
}

impl Span {
    pub const fn days(count: u32) -> Self {
        Self {
            count,
            unit: SpanUnit::Days,
        }
    }

    pub const fn weeks(count: u32) -> Self {
        Self {
            count,
            unit: SpanUnit::Weeks,
        }
    }

    pub const fn months(count: u32) -> Self {
        Self {
            count,
            unit: SpanUnit::Months,
        }
    }

    pub const fn years(count: u32) -> Self {
        Self {
            count,
            unit: SpanUnit::Years,
        }
    }

    pub const fn count(&self) -> u32 {
        self.count
    }

    pub const fn unit(&self) -> SpanUnit {
        self.unit
    }

    pub const fn is_zero(&self) -> bool {
        self.count == 0
    }

    /// Shift a timestamp forward by this span.
    ///
    /// Returns `None` when the result is outside chrono's representable range.
    pub fn add_to(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.unit {
            SpanUnit::Days => at.checked_add_signed(chrono::Duration::days(i64::from(self.count))),
            SpanUnit::Weeks => {
                at.checked_add_signed(chrono::Duration::weeks(i64::from(self.count)))
            }
            SpanUnit::Months => at.checked_add_months(Months::new(self.count)),
            SpanUnit::Years => at.checked_add_months(Months::new(self.count.checked_mul(12)?)),
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.count, self.unit.suffix())
    }
}

impl FromStr for Span {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("Empty span string".into());
        }

        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("Missing unit in span: {s}"))?;
        let (num_str, unit_str) = s.split_at(split);
        let count: u32 = num_str
            .parse()
            .map_err(|_| format!("Invalid number in span: {s}"))?;

        let unit = match unit_str {
            "d" | "D" | "days" => SpanUnit::Days,
            "w" | "W" | "weeks" => SpanUnit::Weeks,
            "M" | "mo" | "months" => SpanUnit::Months,
            "y" | "Y" | "years" => SpanUnit::Years,
            _ => return Err(format!("Unknown span unit: {unit_str}")),
        };

        Ok(Self { count, unit })
    }
}

impl TryFrom<String> for Span {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Span> for String {
    fn from(span: Span) -> Self {
        span.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use test_case::test_case;

    #[test_case("36M", Span::months(36) ; "months")]
    #[test_case("6mo", Span::months(6) ; "months long form")]
    #[test_case("30d", Span::days(30) ; "days")]
    #[test_case("2w", Span::weeks(2) ; "weeks")]
    #[test_case(" 1y ", Span::years(1) ; "years trimmed")]
    fn test_parse_span(input: &str, expected: Span) {
        assert_eq!(input.parse::<Span>().unwrap(), expected);
    }

    #[test_case("" ; "empty")]
    #[test_case("M" ; "no count")]
    #[test_case("12" ; "no unit")]
    #[test_case("5h" ; "hours unsupported")]
    #[test_case("-3M" ; "negative")]
    fn test_parse_span_rejects(input: &str) {
        assert!(input.parse::<Span>().is_err());
    }

    #[test]
    fn test_month_arithmetic_clamps_to_month_end() {
        let jan31 = Utc.with_ymd_and_hms(2021, 1, 31, 0, 0, 0).unwrap();
        let feb = Span::months(1).add_to(jan31).unwrap();
        assert_eq!(feb, Utc.with_ymd_and_hms(2021, 2, 28, 0, 0, 0).unwrap());

        let three_years = Span::years(3).add_to(jan31).unwrap();
        assert_eq!(three_years, Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_day_arithmetic() {
        let start = Utc.with_ymd_and_hms(2020, 12, 25, 0, 0, 0).unwrap();
        assert_eq!(
            Span::days(10).add_to(start).unwrap(),
            Utc.with_ymd_and_hms(2021, 1, 4, 0, 0, 0).unwrap()
        );
        assert_eq!(
            Span::weeks(1).add_to(start).unwrap(),
            Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&Span::months(36)).unwrap();
        assert_eq!(json, "\"36M\"");
        let back: Span = serde_json::from_str("\"1M\"").unwrap();
        assert_eq!(back, Span::months(1));
        assert!(serde_json::from_str::<Span>("\"bogus\"").is_err());
    }
}
