use crate::indicators;
use crate::param_utils::get_param_usize;
use crate::strategy_utils::{buy_signal, hold_with, sell_signal};
use serde_json::json;
use std::collections::HashMap;

use super::{SignalContext, StrategySignal};

pub struct MacdStrategy {
    short_span: usize,
    mid_span: usize,
    long_span: usize,
}

impl MacdStrategy {
    pub fn new(parameters: &HashMap<String, f64>) -> Self {
        Self {
            short_span: get_param_usize(parameters, "shortSpan", 9).max(1),
            mid_span: get_param_usize(parameters, "midSpan", 12).max(1),
            long_span: get_param_usize(parameters, "longSpan", 26).max(2),
        }
    }
}

impl super::Strategy for MacdStrategy {
    fn name(&self) -> &str {
        "macd"
    }

    fn evaluate(&self, ctx: &SignalContext<'_>) -> StrategySignal {
        let crossover = indicators::macd_crossover(
            ctx.history,
            ctx.as_of,
            self.short_span,
            self.mid_span,
            self.long_span,
        );
        let info = json!({ "crossover": crossover });

        // Bullish crossover of the MACD line through its signal line
        if crossover > 0 {
            return buy_signal(1.0, info);
        }
        // Bearish crossover
        if crossover < 0 {
            return sell_signal(1.0, info);
        }
        hold_with(info)
    }

    fn get_min_data_points(&self) -> usize {
        self.long_span
    }
}
