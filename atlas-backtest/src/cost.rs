//! Transaction cost model.

use atlas_common::BacktestConfig;
use serde::{Deserialize, Serialize};

/// Proportional spread + slippage charged on every change of position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    pub spread_rate: f64,
    pub slippage_rate: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self::from(&BacktestConfig::default())
    }
}

impl From<&BacktestConfig> for CostModel {
    fn from(config: &BacktestConfig) -> Self {
        Self {
            spread_rate: config.spread_rate,
            slippage_rate: config.slippage_rate,
        }
    }
}

impl CostModel {
    pub fn new(spread_rate: f64, slippage_rate: f64) -> Self {
        Self {
            spread_rate,
            slippage_rate,
        }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0)
    }

    pub fn total_rate(&self) -> f64 {
        self.spread_rate + self.slippage_rate
    }

    /// Cost of trading `quantity` units of exposure at `price`.
    pub fn cost_of(&self, quantity: f64, price: f64) -> f64 {
        self.total_rate() * quantity.abs() * price
    }

    /// Per-step cost in price units. Step 0 has no prior position and costs 0.
    pub fn costs(&self, positions: &[f64], prices: &[f64]) -> Vec<f64> {
        let n = positions.len().min(prices.len());
        (0..n)
            .map(|t| {
                if t == 0 {
                    0.0
                } else {
                    self.cost_of(positions[t] - positions[t - 1], prices[t])
                }
            })
            .collect()
    }

    /// Per-step cost expressed as a return on the prior price.
    pub fn cost_returns(&self, positions: &[f64], prices: &[f64]) -> Vec<f64> {
        self.costs(positions, prices)
            .into_iter()
            .enumerate()
            .map(|(t, cost)| if t == 0 { 0.0 } else { cost / prices[t - 1] })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_rates() {
        let model = CostModel::default();
        assert!((model.total_rate() - 0.002).abs() < 1e-12);
    }

    #[test]
    fn test_cost_on_position_flip() {
        let model = CostModel::new(0.001, 0.001);
        let costs = model.costs(&[0.0, 1.0, 1.0, -1.0], &[100.0, 100.0, 110.0, 110.0]);
        assert_eq!(costs[0], 0.0);
        assert!((costs[1] - 0.2).abs() < 1e-12);
        assert_eq!(costs[2], 0.0);
        assert!((costs[3] - 0.44).abs() < 1e-12);

        let returns = model.cost_returns(&[0.0, 1.0], &[100.0, 50.0]);
        assert!((returns[1] - 0.001).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn prop_costs_non_negative_and_zero_when_unchanged(
            steps in prop::collection::vec((-1.0f64..=1.0, 1.0f64..500.0, any::<bool>()), 1..80)
        ) {
            let mut positions = Vec::with_capacity(steps.len());
            let mut prices = Vec::with_capacity(steps.len());
            for (i, (pos, price, hold)) in steps.iter().enumerate() {
                let pos = if *hold && i > 0 { positions[i - 1] } else { *pos };
                positions.push(pos);
                prices.push(*price);
            }
            let model = CostModel::default();
            let costs = model.costs(&positions, &prices);
            for t in 0..costs.len() {
                prop_assert!(costs[t] >= 0.0);
                if t > 0 && positions[t] == positions[t - 1] {
                    prop_assert_eq!(costs[t], 0.0);
                }
            }
        }
    }
}
