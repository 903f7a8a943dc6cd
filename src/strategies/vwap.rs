use crate::indicators;
use crate::param_utils::{get_param_f64, get_param_usize};
use crate::strategy_utils::{buy_signal, hold_signal, hold_with, sell_signal};
use serde_json::json;
use std::collections::HashMap;

use super::{SignalContext, StrategySignal};

/// Trades the last price against bands around the volume-weighted average close.
pub struct VwapStrategy {
    window_days: i64,
    high: f64,
    low: f64,
}

impl VwapStrategy {
    pub fn new(parameters: &HashMap<String, f64>) -> Self {
        Self {
            window_days: get_param_usize(parameters, "windowDays", 200).max(1) as i64,
            high: get_param_f64(parameters, "high", 1.02),
            low: get_param_f64(parameters, "low", 0.98),
        }
    }
}

impl super::Strategy for VwapStrategy {
    fn name(&self) -> &str {
        "vwap"
    }

    fn evaluate(&self, ctx: &SignalContext<'_>) -> StrategySignal {
        let Some(last) = ctx.last() else {
            return hold_signal();
        };
        let Some(vwap) = indicators::vwap(ctx.history, ctx.as_of, self.window_days) else {
            return hold_signal();
        };
        if vwap <= 0.0 {
            return hold_signal();
        }
        let strength = (last - vwap).abs() / vwap;
        let info = json!({ "vwap": vwap, "last": last });

        if last < vwap * self.low {
            buy_signal(strength, info)
        } else if last > vwap * self.high {
            sell_signal(strength, info)
        } else {
            hold_with(info)
        }
    }

    fn get_min_data_points(&self) -> usize {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{bars_from_closes, context, instrument};
    use super::super::Strategy;
    use super::*;
    use crate::models::SignalAction;

    #[test]
    fn vwap_bands() {
        let instrument = instrument();
        let strategy = VwapStrategy::new(&HashMap::new());

        let bars = bars_from_closes(&[100.0, 100.0, 100.0, 70.0]);
        let signal = strategy.evaluate(&context(&instrument, &bars, false));
        assert_eq!(signal.action, SignalAction::Buy);
        assert!((signal.strength - (92.5 - 70.0) / 92.5).abs() < 1e-9);

        let bars = bars_from_closes(&[100.0, 100.0, 100.0, 130.0]);
        assert_eq!(strategy.evaluate(&context(&instrument, &bars, false)).action, SignalAction::Sell);

        let bars = bars_from_closes(&[100.0, 100.0, 100.0, 101.0]);
        let signal = strategy.evaluate(&context(&instrument, &bars, false));
        assert_eq!(signal.action, SignalAction::Hold);
        assert_eq!(signal.strength, 0.0);
    }

    #[test]
    fn vwap_without_last_price_holds() {
        let instrument = instrument();
        let bars = bars_from_closes(&[100.0, 70.0]);
        let mut ctx = context(&instrument, &bars, false);
        ctx.last_price = None;
        let signal = VwapStrategy::new(&HashMap::new()).evaluate(&ctx);
        assert_eq!(signal.action, SignalAction::Hold);
        assert_eq!(signal.strength, 0.0);
    }
}
