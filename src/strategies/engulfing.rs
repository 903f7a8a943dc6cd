use crate::indicators::{self, CandlePattern};
use crate::param_utils::get_param_usize;
use crate::strategy_utils::{buy_signal, hold_with, sell_signal};
use serde_json::json;
use std::collections::HashMap;

use super::{SignalContext, StrategySignal};

pub struct EngulfingStrategy {
    lookback_days: i64,
}

impl EngulfingStrategy {
    pub fn new(parameters: &HashMap<String, f64>) -> Self {
        Self {
            lookback_days: get_param_usize(parameters, "lookbackDays", 7).max(1) as i64,
        }
    }
}

impl super::Strategy for EngulfingStrategy {
    fn name(&self) -> &str {
        "engulfing"
    }

    fn evaluate(&self, ctx: &SignalContext<'_>) -> StrategySignal {
        let pattern = indicators::engulfing(ctx.history, ctx.as_of, self.lookback_days);
        let info = json!({ "pattern": pattern.as_str() });
        match pattern {
            CandlePattern::Bullish => buy_signal(1.0, info),
            CandlePattern::Bearish => sell_signal(1.0, info),
            CandlePattern::None => hold_with(info),
        }
    }

    fn get_min_data_points(&self) -> usize {
        2
    }
}
