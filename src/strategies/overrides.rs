//! Strategies that let a secondary signal turn the primary SMA decision into a SELL.

use crate::models::SignalAction;
use crate::param_utils::get_param_usize;
use serde_json::json;
use std::collections::HashMap;

use super::rsi::RsiStrategy;
use super::sma::SmaBuyHoldStrategy;
use super::vwap::VwapStrategy;
use super::{SignalContext, Strategy, StrategySignal};

fn override_with_sell(
    mut primary: StrategySignal,
    secondary: StrategySignal,
    overridable: &[SignalAction],
) -> StrategySignal {
    if overridable.contains(&primary.action) && secondary.action == SignalAction::Sell {
        primary.action = SignalAction::Sell;
        primary.strength = secondary.strength;
        primary.info = json!({ "primary": primary.info, "secondary": secondary.info });
    }
    primary
}

/// SMA decides entries, RSI may force an exit on an otherwise quiet day.
pub struct BuySmaSellRsiStrategy {
    sma: SmaBuyHoldStrategy,
    rsi: RsiStrategy,
    window: usize,
}

impl BuySmaSellRsiStrategy {
    pub fn new(parameters: &HashMap<String, f64>) -> Self {
        Self {
            sma: SmaBuyHoldStrategy::new(parameters),
            rsi: RsiStrategy::with_window(parameters, 50),
            window: get_param_usize(parameters, "window", 50).max(1),
        }
    }
}

impl Strategy for BuySmaSellRsiStrategy {
    fn name(&self) -> &str {
        "buy_sma_sell_rsi"
    }

    fn evaluate(&self, ctx: &SignalContext<'_>) -> StrategySignal {
        let secondary = self.rsi.evaluate(ctx);
        let primary = self.sma.evaluate(ctx);
        override_with_sell(primary, secondary, &[SignalAction::Hold])
    }

    fn get_min_data_points(&self) -> usize {
        self.window
    }
}

/// SMA decides entries, VWAP may force an exit even on a BUY day.
pub struct BuySmaSellVwapStrategy {
    sma: SmaBuyHoldStrategy,
    vwap: VwapStrategy,
}

impl BuySmaSellVwapStrategy {
    pub fn new(parameters: &HashMap<String, f64>) -> Self {
        Self {
            sma: SmaBuyHoldStrategy::new(parameters),
            vwap: VwapStrategy::new(parameters),
        }
    }
}

impl Strategy for BuySmaSellVwapStrategy {
    fn name(&self) -> &str {
        "buy_sma_sell_vwap"
    }

    fn evaluate(&self, ctx: &SignalContext<'_>) -> StrategySignal {
        let primary = self.sma.evaluate(ctx);
        let secondary = self.vwap.evaluate(ctx);
        override_with_sell(
            primary,
            secondary,
            &[SignalAction::Hold, SignalAction::Buy],
        )
    }

    fn get_min_data_points(&self) -> usize {
        self.vwap.get_min_data_points()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy_utils::{buy_signal, hold_signal, sell_signal};
    use serde_json::Value;

    #[test]
    fn hold_is_overridden_by_secondary_sell() {
        let result = override_with_sell(
            hold_signal(),
            sell_signal(0.4, Value::Null),
            &[SignalAction::Hold],
        );
        assert_eq!(result.action, SignalAction::Sell);
        assert_eq!(result.strength, 0.4);
    }

    #[test]
    fn buy_survives_unless_listed_as_overridable() {
        let result = override_with_sell(
            buy_signal(0.2, Value::Null),
            sell_signal(0.4, Value::Null),
            &[SignalAction::Hold],
        );
        assert_eq!(result.action, SignalAction::Buy);
        assert_eq!(result.strength, 0.2);

        let result = override_with_sell(
            buy_signal(0.2, Value::Null),
            sell_signal(0.4, Value::Null),
            &[SignalAction::Hold, SignalAction::Buy],
        );
        assert_eq!(result.action, SignalAction::Sell);
    }

    #[test]
    fn secondary_buy_never_overrides() {
        let result = override_with_sell(
            hold_signal(),
            buy_signal(0.9, Value::Null),
            &[SignalAction::Hold, SignalAction::Buy],
        );
        assert_eq!(result.action, SignalAction::Hold);
        assert_eq!(result.strength, 0.0);
    }
}
