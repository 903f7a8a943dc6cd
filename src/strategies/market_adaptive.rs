use std::collections::HashMap;

use super::macd::MacdStrategy;
use super::sma::MeanReversionStrategy;
use super::{SignalContext, Strategy, StrategySignal};

/// Mean reversion while market breadth is bearish, MACD trend-following otherwise.
pub struct MarketAdaptiveStrategy {
    bearish: MeanReversionStrategy,
    bullish: MacdStrategy,
}

impl MarketAdaptiveStrategy {
    pub fn new(parameters: &HashMap<String, f64>) -> Self {
        Self {
            bearish: MeanReversionStrategy::new(parameters),
            bullish: MacdStrategy::new(parameters),
        }
    }
}

impl Strategy for MarketAdaptiveStrategy {
    fn name(&self) -> &str {
        "market_adaptive"
    }

    fn evaluate(&self, ctx: &SignalContext<'_>) -> StrategySignal {
        if ctx.breadth_bearish {
            self.bearish.evaluate(ctx)
        } else {
            self.bullish.evaluate(ctx)
        }
    }

    fn get_min_data_points(&self) -> usize {
        self.bearish
            .get_min_data_points()
            .min(self.bullish.get_min_data_points())
    }
}
