use crate::indicators;
use crate::param_utils::{get_param_f64, get_param_usize};
use crate::strategy_utils::{buy_signal, distance_past, hold_signal, hold_with, sell_signal};
use serde_json::json;
use std::collections::HashMap;

use super::{SignalContext, StrategySignal};

pub struct BollingerStrategy {
    window: usize,
    k: f64,
}

impl BollingerStrategy {
    pub fn new(parameters: &HashMap<String, f64>) -> Self {
        Self {
            window: get_param_usize(parameters, "window", 20).max(2),
            k: get_param_f64(parameters, "k", 2.0),
        }
    }
}

impl super::Strategy for BollingerStrategy {
    fn name(&self) -> &str {
        "bollinger"
    }

    fn evaluate(&self, ctx: &SignalContext<'_>) -> StrategySignal {
        let Some(reading) = indicators::bollinger(ctx.history, self.window, self.k) else {
            return hold_signal();
        };
        let info = json!({
            "mean": reading.mean,
            "upper": reading.upper,
            "lower": reading.lower,
        });
        match reading.signal {
            1 => buy_signal(distance_past(reading.last, reading.lower), info),
            -1 => sell_signal(distance_past(reading.last, reading.upper), info),
            _ => hold_with(info),
        }
    }

    fn get_min_data_points(&self) -> usize {
        self.window
    }
}

pub struct BreakoutStrategy {
    window: usize,
}

impl BreakoutStrategy {
    pub fn new(parameters: &HashMap<String, f64>) -> Self {
        Self {
            window: get_param_usize(parameters, "window", 20).max(1),
        }
    }
}

impl super::Strategy for BreakoutStrategy {
    fn name(&self) -> &str {
        "breakout"
    }

    fn evaluate(&self, ctx: &SignalContext<'_>) -> StrategySignal {
        let Some(reading) = indicators::breakout(ctx.history, self.window) else {
            return hold_signal();
        };
        let info = json!({
            "rangeHigh": reading.range_high,
            "rangeLow": reading.range_low,
        });
        match reading.signal {
            1 => buy_signal(distance_past(reading.close, reading.range_high), info),
            -1 => sell_signal(distance_past(reading.close, reading.range_low), info),
            _ => hold_with(info),
        }
    }

    fn get_min_data_points(&self) -> usize {
        self.window + 1
    }
}
