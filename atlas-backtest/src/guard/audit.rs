//! Advisory checks on the signals a strategy actually produced.
//!
//! Unlike the policy rules these never reject a run; their findings are
//! logged and attached to the period result.

use serde::{Deserialize, Serialize};

use crate::data::{average_daily_volume, PriceBar};
use crate::sandbox::SignalSeries;

/// Trailing window used for average daily volume.
pub const ADV_WINDOW: usize = 20;

/// Mean absolute daily position change above which turnover is flagged.
pub const MAX_AVERAGE_TURNOVER: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalAudit {
    pub raw_min: f64,
    pub raw_max: f64,
    pub average_turnover: f64,
    /// Peak absolute position relative to trailing ADV; `None` before the
    /// ADV window fills or when volume is zero throughout.
    pub peak_adv_fraction: Option<f64>,
    pub findings: Vec<String>,
}

impl SignalAudit {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

/// Inspect produced signals for range, turnover and exposure.
pub fn audit_signals(
    signals: &SignalSeries,
    bars: &[PriceBar],
    max_position_fraction: f64,
) -> SignalAudit {
    let mut findings = Vec::new();

    if signals.raw_min < -1.0 || signals.raw_max > 1.0 {
        findings.push(format!(
            "Signals outside [-1, 1] range: min={:.4}, max={:.4}",
            signals.raw_min, signals.raw_max
        ));
    }

    let values = &signals.values;
    let average_turnover = if values.len() > 1 {
        let total: f64 = values.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
        total / (values.len() - 1) as f64
    } else {
        0.0
    };
    if average_turnover > MAX_AVERAGE_TURNOVER {
        findings.push(format!(
            "Excessive turnover: {average_turnover:.3} average daily position change"
        ));
    }

    let adv = average_daily_volume(bars, ADV_WINDOW);
    let peak_adv_fraction = values
        .iter()
        .zip(&adv)
        .filter(|(_, adv)| adv.is_finite() && **adv > 0.0)
        .map(|(s, adv)| s.abs() / adv)
        .fold(None, |acc: Option<f64>, x| Some(acc.map_or(x, |a| a.max(x))));
    if let Some(peak) = peak_adv_fraction {
        if peak > max_position_fraction {
            findings.push(format!(
                "Position exposure {:.4}% of ADV exceeds maximum {:.2}%",
                peak * 100.0,
                max_position_fraction * 100.0
            ));
        }
    }

    SignalAudit {
        raw_min: signals.raw_min,
        raw_max: signals.raw_max,
        average_turnover,
        peak_adv_fraction,
        findings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::PriceSeries;
    use chrono::{TimeZone, Utc};

    fn bars(n: usize, volume: f64) -> Vec<PriceBar> {
        let start = Utc.with_ymd_and_hms(2021, 1, 4, 0, 0, 0).unwrap();
        let closes: Vec<f64> = (0..n).map(|i| 100.0 + i as f64).collect();
        let mut bars = PriceSeries::from_closes(start, &closes).unwrap().bars().to_vec();
        for bar in &mut bars {
            bar.volume = volume;
        }
        bars
    }

    fn series(values: Vec<f64>) -> SignalSeries {
        let raw_min = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let raw_max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        SignalSeries {
            values,
            raw_min,
            raw_max,
        }
    }

    #[test]
    fn test_steady_signal_is_clean() {
        let audit = audit_signals(&series(vec![1.0; 30]), &bars(30, 1e6), 0.05);
        assert!(audit.is_clean(), "{:?}", audit.findings);
        assert_eq!(audit.average_turnover, 0.0);
        assert!(audit.peak_adv_fraction.unwrap() < 1e-5);
    }

    #[test]
    fn test_out_of_range_raw_values_flagged() {
        let mut s = series(vec![0.5; 10]);
        s.raw_max = 3.0;
        let audit = audit_signals(&s, &bars(10, 1e6), 0.05);
        assert!(audit.findings[0].starts_with("Signals outside [-1, 1] range"));
    }

    #[test]
    fn test_flip_flop_turnover_flagged() {
        let values: Vec<f64> = (0..20).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let audit = audit_signals(&series(values), &bars(20, 1e6), 0.05);
        assert!((audit.average_turnover - 2.0).abs() < 1e-12);
        assert!(audit.findings.iter().any(|f| f.starts_with("Excessive turnover")));
    }

    #[test]
    fn test_thin_volume_exposure_flagged() {
        let audit = audit_signals(&series(vec![1.0; 25]), &bars(25, 10.0), 0.05);
        assert_eq!(audit.peak_adv_fraction, Some(0.1));
        assert!(audit.findings.iter().any(|f| f.starts_with("Position exposure")));
    }

    #[test]
    fn test_short_history_has_no_adv() {
        let audit = audit_signals(&series(vec![1.0; 5]), &bars(5, 1e6), 0.05);
        assert_eq!(audit.peak_adv_fraction, None);
    }
}
