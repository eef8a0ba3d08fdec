//! NaN-aware numeric kernels behind the series library.
//!
//! Reductions skip missing values. Window functions emit NaN until enough
//! valid observations are available.

/// Reduction applied to a whole series or to each rolling window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Reduction {
    Mean,
    Std { ddof: usize },
    Var { ddof: usize },
    Sum,
    Min,
    Max,
    Median,
    Count,
}

impl Reduction {
    pub(crate) fn from_method(name: &str, ddof: usize) -> Option<Self> {
        Some(match name {
            "mean" => Self::Mean,
            "std" => Self::Std { ddof },
            "var" => Self::Var { ddof },
            "sum" => Self::Sum,
            "min" => Self::Min,
            "max" => Self::Max,
            "median" => Self::Median,
            "count" => Self::Count,
            _ => return None,
        })
    }

    /// Value of the reduction over no valid observations.
    fn empty(self) -> f64 {
        match self {
            Self::Sum | Self::Count => 0.0,
            _ => f64::NAN,
        }
    }
}

fn variance(valid: &[f64], ddof: usize) -> f64 {
    let n = valid.len();
    if n <= ddof {
        return f64::NAN;
    }
    let mean = valid.iter().sum::<f64>() / n as f64;
    valid.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - ddof) as f64
}

fn median(valid: &mut [f64]) -> f64 {
    valid.sort_by(|a, b| a.total_cmp(b));
    let n = valid.len();
    if n % 2 == 1 {
        valid[n / 2]
    } else {
        (valid[n / 2 - 1] + valid[n / 2]) / 2.0
    }
}

/// Reduce the non-NaN values of `values`.
pub(crate) fn reduce(values: &[f64], reduction: Reduction) -> f64 {
    let mut valid: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if valid.is_empty() {
        return reduction.empty();
    }
    match reduction {
        Reduction::Mean => valid.iter().sum::<f64>() / valid.len() as f64,
        Reduction::Std { ddof } => variance(&valid, ddof).sqrt(),
        Reduction::Var { ddof } => variance(&valid, ddof),
        Reduction::Sum => valid.iter().sum(),
        Reduction::Min => valid.iter().copied().fold(f64::INFINITY, f64::min),
        Reduction::Max => valid.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Reduction::Median => median(&mut valid),
        Reduction::Count => valid.len() as f64,
    }
}

/// Trailing-window reduction; NaN where fewer than `min_periods` valid values.
pub(crate) fn rolling(values: &[f64], window: usize, min_periods: usize, reduction: Reduction) -> Vec<f64> {
    (0..values.len())
        .map(|i| {
            let lo = (i + 1).saturating_sub(window);
            let slice = &values[lo..=i];
            let valid = slice.iter().filter(|v| !v.is_nan()).count();
            if valid < min_periods.max(1) && reduction != Reduction::Count {
                f64::NAN
            } else {
                reduce(slice, reduction)
            }
        })
        .collect()
}

/// Exponentially weighted mean.
///
/// With `adjust` the weights are `(1 - alpha)^i` normalised over the observed
/// history; without it the classic recursion `y = (1 - alpha) y + alpha x` is
/// used. Missing inputs decay the history but add no weight.
pub(crate) fn ewm_mean(values: &[f64], alpha: f64, adjust: bool, min_periods: usize) -> Vec<f64> {
    let decay = 1.0 - alpha;
    let mut numerator = 0.0;
    let mut denominator = 0.0;
    let mut recursive: Option<f64> = None;
    let mut observed = 0usize;

    values
        .iter()
        .map(|&x| {
            if adjust {
                numerator *= decay;
                denominator *= decay;
                if !x.is_nan() {
                    numerator += x;
                    denominator += 1.0;
                    observed += 1;
                }
            } else if !x.is_nan() {
                observed += 1;
                recursive = Some(match recursive {
                    Some(prev) => decay * prev + alpha * x,
                    None => x,
                });
            }

            if observed == 0 || observed < min_periods {
                f64::NAN
            } else if adjust {
                numerator / denominator
            } else {
                recursive.unwrap_or(f64::NAN)
            }
        })
        .collect()
}

/// Lag by `periods` steps, filling the head with NaN.
pub(crate) fn shift(values: &[f64], periods: usize) -> Vec<f64> {
    let n = values.len();
    let periods = periods.min(n);
    let mut out = vec![f64::NAN; periods];
    out.extend_from_slice(&values[..n - periods]);
    out
}

pub(crate) fn diff(values: &[f64], periods: usize) -> Vec<f64> {
    (0..values.len())
        .map(|i| {
            if i < periods {
                f64::NAN
            } else {
                values[i] - values[i - periods]
            }
        })
        .collect()
}

pub(crate) fn pct_change(values: &[f64], periods: usize) -> Vec<f64> {
    (0..values.len())
        .map(|i| {
            if i < periods {
                f64::NAN
            } else {
                values[i] / values[i - periods] - 1.0
            }
        })
        .collect()
}

pub(crate) fn forward_fill(values: &[f64]) -> Vec<f64> {
    let mut last = f64::NAN;
    values
        .iter()
        .map(|&v| {
            if !v.is_nan() {
                last = v;
            }
            last
        })
        .collect()
}

pub(crate) fn backward_fill(values: &[f64]) -> Vec<f64> {
    let mut out = values.to_vec();
    out.reverse();
    let mut filled = forward_fill(&out);
    filled.reverse();
    filled
}

/// Running accumulation that leaves NaN positions as NaN and skips them.
pub(crate) fn accumulate(values: &[f64], init: f64, f: impl Fn(f64, f64) -> f64) -> Vec<f64> {
    let mut acc = init;
    values
        .iter()
        .map(|&v| {
            if v.is_nan() {
                f64::NAN
            } else {
                acc = f(acc, v);
                acc
            }
        })
        .collect()
}

/// Round half to even at `decimals` places.
pub(crate) fn round_half_even(x: f64, decimals: i32) -> f64 {
    if decimals == 0 {
        return x.round_ties_even();
    }
    let scale = 10f64.powi(decimals);
    (x * scale).round_ties_even() / scale
}
