use crate::indicators;
use crate::param_utils::{get_param_f64, get_param_usize};
use crate::strategy_utils::{buy_signal, hold_signal, hold_with, sell_signal};
use serde_json::json;
use std::collections::HashMap;

use super::{SignalContext, StrategySignal};

/// Buys while the last price sits above its simple moving average.
pub struct SmaBuyHoldStrategy {
    window: usize,
}

impl SmaBuyHoldStrategy {
    pub fn new(parameters: &HashMap<String, f64>) -> Self {
        Self {
            window: get_param_usize(parameters, "window", 50).max(1),
        }
    }
}

impl super::Strategy for SmaBuyHoldStrategy {
    fn name(&self) -> &str {
        "sma_buy_hold"
    }

    fn evaluate(&self, ctx: &SignalContext<'_>) -> StrategySignal {
        let (Some(sma), Some(last)) = (indicators::sma(ctx.history, self.window), ctx.last())
        else {
            return hold_signal();
        };
        let info = json!({ "sma": sma, "window": self.window });
        if last > sma && sma > 0.0 {
            buy_signal((last - sma) / sma, info)
        } else {
            hold_with(info)
        }
    }

    fn get_min_data_points(&self) -> usize {
        self.window
    }
}

/// Trades back toward the moving average once price leaves a band around it.
pub struct MeanReversionStrategy {
    period: usize,
    band: f64,
}

impl MeanReversionStrategy {
    pub fn new(parameters: &HashMap<String, f64>) -> Self {
        Self {
            period: get_param_usize(parameters, "period", 50).max(1),
            band: get_param_f64(parameters, "band", 0.05),
        }
    }
}

impl super::Strategy for MeanReversionStrategy {
    fn name(&self) -> &str {
        "mean_reversion"
    }

    fn evaluate(&self, ctx: &SignalContext<'_>) -> StrategySignal {
        let (Some(sma), Some(price)) = (indicators::sma(ctx.history, self.period), ctx.last())
        else {
            return hold_signal();
        };
        let high = sma * (1.0 + self.band);
        let low = sma * (1.0 - self.band);
        let info = json!({ "sma": sma, "high": high, "low": low });

        if price < low && low > 0.0 {
            buy_signal((price - low).abs() / low, info)
        } else if price > high && high > 0.0 {
            sell_signal((price - high).abs() / high, info)
        } else {
            hold_with(info)
        }
    }

    fn get_min_data_points(&self) -> usize {
        self.period
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{bars_from_closes, context, instrument};
    use super::super::Strategy;
    use super::*;
    use crate::models::SignalAction;

    #[test]
    fn sma_buy_hold_buys_above_average() {
        let instrument = instrument();
        let mut closes = vec![10.0; 49];
        closes.push(15.1);
        let bars = bars_from_closes(&closes);
        let strategy = SmaBuyHoldStrategy::new(&HashMap::new());
        let signal = strategy.evaluate(&context(&instrument, &bars, false));
        assert_eq!(signal.action, SignalAction::Buy);
        let sma = (49.0 * 10.0 + 15.1) / 50.0;
        assert!((signal.strength - (15.1 - sma) / sma).abs() < 1e-9);
    }

    #[test]
    fn sma_buy_hold_holds_with_short_history() {
        let instrument = instrument();
        let bars = bars_from_closes(&[10.0, 11.0]);
        let signal = SmaBuyHoldStrategy::new(&HashMap::new()).evaluate(&context(&instrument, &bars, false));
        assert_eq!(signal.action, SignalAction::Hold);
        assert_eq!(signal.strength, 0.0);
    }

    #[test]
    fn mean_reversion_buys_below_band_and_sells_above() {
        let instrument = instrument();
        let mut params = HashMap::new();
        params.insert("period".to_string(), 5.0);
        let strategy = MeanReversionStrategy::new(&params);

        let bars = bars_from_closes(&[100.0, 100.0, 100.0, 100.0, 80.0]);
        let signal = strategy.evaluate(&context(&instrument, &bars, false));
        assert_eq!(signal.action, SignalAction::Buy);
        let low: f64 = 96.0 * 0.95;
        assert!((signal.strength - (80.0 - low).abs() / low).abs() < 1e-9);

        let bars = bars_from_closes(&[100.0, 100.0, 100.0, 100.0, 130.0]);
        assert_eq!(strategy.evaluate(&context(&instrument, &bars, false)).action, SignalAction::Sell);

        let bars = bars_from_closes(&[100.0; 5]);
        let signal = strategy.evaluate(&context(&instrument, &bars, false));
        assert_eq!(signal.action, SignalAction::Hold);
        assert_eq!(signal.strength, 0.0);
    }
}
