use crate::indicators;
use crate::param_utils::{get_param_f64, get_param_usize};
use crate::strategy_utils::{buy_signal, distance_past, hold_signal, hold_with, sell_signal};
use serde_json::json;
use std::collections::HashMap;

use super::{SignalContext, StrategySignal};

pub struct RsiStrategy {
    window: usize,
    high: f64,
    low: f64,
}

impl RsiStrategy {
    pub fn new(parameters: &HashMap<String, f64>) -> Self {
        Self::with_window(parameters, 14)
    }

    pub(crate) fn with_window(parameters: &HashMap<String, f64>, default_window: usize) -> Self {
        Self {
            window: get_param_usize(parameters, "window", default_window).max(1),
            high: get_param_f64(parameters, "high", 70.0),
            low: get_param_f64(parameters, "low", 30.0),
        }
    }
}

impl super::Strategy for RsiStrategy {
    fn name(&self) -> &str {
        "rsi"
    }

    fn evaluate(&self, ctx: &SignalContext<'_>) -> StrategySignal {
        let Some(rsi) = indicators::rsi(ctx.history, ctx.as_of, self.window) else {
            return hold_signal();
        };
        let info = json!({ "rsi": rsi, "high": self.high, "low": self.low });

        // Overbought
        if rsi > self.high {
            return sell_signal(distance_past(rsi, self.high), info);
        }
        // Oversold
        if rsi < self.low {
            return buy_signal(distance_past(rsi, self.low), info);
        }
        hold_with(info)
    }

    fn get_min_data_points(&self) -> usize {
        self.window + 1
    }
}

/// RSI extremes first, then RSI against its midline in the direction of the SMA trend.
pub struct SmaRsiStrategy {
    rsi_window: usize,
    short_window: usize,
    long_window: usize,
    high: f64,
    low: f64,
    mid: f64,
}

impl SmaRsiStrategy {
    pub fn new(parameters: &HashMap<String, f64>) -> Self {
        Self {
            rsi_window: get_param_usize(parameters, "rsiWindow", 14).max(1),
            short_window: get_param_usize(parameters, "shortWindow", 50).max(1),
            long_window: get_param_usize(parameters, "longWindow", 200).max(1),
            high: get_param_f64(parameters, "high", 70.0),
            low: get_param_f64(parameters, "low", 30.0),
            mid: get_param_f64(parameters, "mid", 50.0),
        }
    }
}

impl super::Strategy for SmaRsiStrategy {
    fn name(&self) -> &str {
        "sma_rsi"
    }

    fn evaluate(&self, ctx: &SignalContext<'_>) -> StrategySignal {
        let rsi = indicators::rsi(ctx.history, ctx.as_of, self.rsi_window);
        let sma_short = indicators::sma(ctx.history, self.short_window);
        let sma_long = indicators::sma(ctx.history, self.long_window);
        let (Some(rsi), Some(sma_short), Some(sma_long)) = (rsi, sma_short, sma_long) else {
            return hold_signal();
        };
        let info = json!({
            "rsi": rsi,
            "smaShort": sma_short,
            "smaLong": sma_long,
        });

        if rsi > self.high {
            return sell_signal(distance_past(rsi, self.high), info);
        }
        if rsi < self.low {
            return buy_signal(distance_past(rsi, self.low), info);
        }
        if sma_short > sma_long && rsi >= self.mid {
            return buy_signal(distance_past(rsi, self.mid), info);
        }
        if sma_short < sma_long && rsi <= self.mid {
            return sell_signal(distance_past(rsi, self.mid), info);
        }
        hold_with(info)
    }

    fn get_min_data_points(&self) -> usize {
        self.long_window.max(self.short_window)
    }
}
