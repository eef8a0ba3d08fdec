//! Per-period performance metrics.
//!
//! Everything here is a pure function of the position and price vectors of
//! one period, so repeated runs over the same inputs are bit-identical.

use serde::{Deserialize, Serialize};

use crate::cost::CostModel;

/// Trading days per year used for annualisation.
pub const TRADING_DAYS: f64 = 252.0;

/// Metrics for one (window, period) run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodMetrics {
    pub total_return: f64,
    /// Annualised standard deviation of net returns
    pub volatility: f64,
    pub sharpe_ratio: f64,
    /// Most negative drawdown, `<= 0`
    pub max_drawdown: f64,
    /// Mean absolute change in position per step
    pub turnover: f64,
    /// Sensitivity to the buy-and-hold return
    pub beta: f64,
    pub num_trades: usize,
    /// Fraction of trades with a positive net return
    pub win_rate: f64,
    /// Gross profit over gross loss; `+inf` when nothing lost
    #[serde(with = "unbounded")]
    pub profit_factor: f64,
    pub observations: usize,
    /// Sum of transaction costs in price units
    pub total_cost: f64,
}

/// One round trip reconstructed from the position series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Bar index of the entry decision
    pub entry: usize,
    /// Bar index the position was last held at
    pub exit: usize,
    /// `1.0` for long, `-1.0` for short
    pub side: f64,
    pub net_return: f64,
}

impl Trade {
    pub fn is_winner(&self) -> bool {
        self.net_return > 0.0
    }
}

/// Step-by-step return decomposition of a period.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodReturns {
    pub price_returns: Vec<f64>,
    /// Net of costs; index 0 is always 0
    pub net_returns: Vec<f64>,
    pub costs: Vec<f64>,
    /// Running product of `1 + net`, starting at 1
    pub equity: Vec<f64>,
}

impl PeriodReturns {
    pub fn compute(positions: &[f64], closes: &[f64], cost_model: &CostModel) -> Self {
        let n = positions.len().min(closes.len());
        let positions = &positions[..n];
        let closes = &closes[..n];

        let price_returns = pct_change(closes);
        let costs = cost_model.costs(positions, closes);
        let cost_returns = cost_model.cost_returns(positions, closes);

        let mut net_returns = vec![0.0; n];
        for t in 1..n {
            net_returns[t] = positions[t - 1] * price_returns[t] - cost_returns[t];
        }

        let mut equity = Vec::with_capacity(n);
        let mut value = 1.0;
        for r in &net_returns {
            value *= 1.0 + r;
            equity.push(value);
        }

        Self {
            price_returns,
            net_returns,
            costs,
            equity,
        }
    }
}

impl PeriodMetrics {
    /// Compute every metric for one period, annualised over [`TRADING_DAYS`].
    pub fn from_positions(positions: &[f64], closes: &[f64], cost_model: &CostModel) -> Self {
        Self::compute(positions, closes, cost_model, TRADING_DAYS)
    }

    pub fn compute(
        positions: &[f64],
        closes: &[f64],
        cost_model: &CostModel,
        periods_per_year: f64,
    ) -> Self {
        let returns = PeriodReturns::compute(positions, closes, cost_model);
        let n = returns.net_returns.len();
        let steps = |v: &[f64]| if n > 1 { v[1..].to_vec() } else { Vec::new() };
        let net = steps(&returns.net_returns);
        let market = steps(&returns.price_returns);

        let std = sample_std(&net);
        let annual_std = std * periods_per_year.sqrt();
        let sharpe_ratio = if annual_std > 0.0 {
            mean(&net) * periods_per_year / annual_std
        } else {
            0.0
        };

        let market_var = sample_variance(&market);
        let beta = if market_var > 0.0 {
            sample_covariance(&net, &market) / market_var
        } else {
            0.0
        };

        let turnover = if n > 1 {
            mean(
                &positions[..n]
                    .windows(2)
                    .map(|w| (w[1] - w[0]).abs())
                    .collect::<Vec<_>>(),
            )
        } else {
            0.0
        };

        let trades = reconstruct_trades(&positions[..n], &closes[..n], cost_model);
        let (win_rate, profit_factor) = trade_statistics(&trades);

        Self {
            total_return: returns.equity.last().map_or(0.0, |v| v - 1.0),
            volatility: annual_std,
            sharpe_ratio,
            max_drawdown: max_drawdown(&returns.equity),
            turnover,
            beta,
            num_trades: trades.len(),
            win_rate,
            profit_factor,
            observations: n,
            total_cost: returns.costs.iter().sum(),
        }
    }
}

/// Percentage change with the first element 0.
pub fn pct_change(values: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; values.len()];
    for t in 1..values.len() {
        out[t] = values[t] / values[t - 1] - 1.0;
    }
    out
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Sample variance (n - 1); 0 below two samples.
pub fn sample_variance(values: &[f64]) -> f64 {
    sample_covariance(values, values)
}

pub fn sample_std(values: &[f64]) -> f64 {
    sample_variance(values).sqrt()
}

pub fn sample_covariance(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let (a, b) = (&a[..n], &b[..n]);
    let (ma, mb) = (mean(a), mean(b));
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - ma) * (y - mb))
        .sum::<f64>()
        / (n - 1) as f64
}

/// Population standard deviation.
pub fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

/// Minimum of `(equity - running_max) / running_max`.
pub fn max_drawdown(equity: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut worst: f64 = 0.0;
    for &value in equity {
        peak = peak.max(value);
        if peak > 0.0 {
            worst = worst.min((value - peak) / peak);
        }
    }
    worst
}

/// Split positions into maximal runs of constant non-zero sign.
///
/// A run entered at bar `a` and last held at bar `b` earns
/// `position(t-1) * r(t)` for `t` in `a+1..=b+1`, clipped to the period end,
/// less the entry and exit cost attributable to its own exposure.
pub fn reconstruct_trades(positions: &[f64], closes: &[f64], cost_model: &CostModel) -> Vec<Trade> {
    let n = positions.len().min(closes.len());
    let side_of = |p: f64| if p > 0.0 { 1.0 } else if p < 0.0 { -1.0 } else { 0.0 };

    let mut trades = Vec::new();
    let mut t = 0;
    while t < n {
        let side = side_of(positions[t]);
        if side == 0.0 {
            t += 1;
            continue;
        }
        let entry = t;
        while t + 1 < n && side_of(positions[t + 1]) == side {
            t += 1;
        }
        let exit = t;

        let mut growth = 1.0;
        for step in entry + 1..=(exit + 1).min(n - 1) {
            growth *= 1.0 + positions[step - 1] * (closes[step] / closes[step - 1] - 1.0);
        }
        let entry_cost = if entry == 0 {
            0.0
        } else {
            cost_model.cost_of(positions[entry], closes[entry]) / closes[entry - 1]
        };
        let exit_cost = if exit + 1 < n {
            cost_model.cost_of(positions[exit], closes[exit + 1]) / closes[exit]
        } else {
            0.0
        };

        trades.push(Trade {
            entry,
            exit,
            side,
            net_return: growth - 1.0 - entry_cost - exit_cost,
        });
        t += 1;
    }
    trades
}

/// `(win_rate, profit_factor)` over reconstructed trades.
pub fn trade_statistics(trades: &[Trade]) -> (f64, f64) {
    if trades.is_empty() {
        return (0.0, 0.0);
    }
    let winners = trades.iter().filter(|t| t.is_winner()).count();
    let gross_profit: f64 = trades.iter().filter(|t| t.is_winner()).map(|t| t.net_return).sum();
    let gross_loss: f64 = trades
        .iter()
        .filter(|t| !t.is_winner())
        .map(|t| t.net_return.abs())
        .sum();

    let profit_factor = if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else if gross_profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };
    (winners as f64 / trades.len() as f64, profit_factor)
}

/// JSON has no infinity; an unbounded value is written as `null`.
pub(crate) mod unbounded {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
    }
}

// ============================================================================
// Tests
// ============================================================================
