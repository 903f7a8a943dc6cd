use crate::models::{SignalAction, StrategySignal};
use serde_json::Value;

/// Create a hold signal (default action when no trade signal is generated)
pub fn hold_signal() -> StrategySignal {
    hold_with(Value::Null)
}

/// Create a zero-strength hold signal carrying the indicator values behind it
pub fn hold_with(info: Value) -> StrategySignal {
    StrategySignal {
        action: SignalAction::Hold,
        strength: 0.0,
        info,
    }
}

/// Create a buy signal with the given strength
pub fn buy_signal(strength: f64, info: Value) -> StrategySignal {
    StrategySignal {
        action: SignalAction::Buy,
        strength: sanitize_strength(strength),
        info,
    }
}

/// Create a sell signal with the given strength
pub fn sell_signal(strength: f64, info: Value) -> StrategySignal {
    StrategySignal {
        action: SignalAction::Sell,
        strength: sanitize_strength(strength),
        info,
    }
}

/// Relative distance of `value` past `threshold`, normalized by the threshold.
pub fn distance_past(value: f64, threshold: f64) -> f64 {
    if threshold == 0.0 {
        return 0.0;
    }
    ((value - threshold) / threshold).abs()
}

fn sanitize_strength(strength: f64) -> f64 {
    if strength.is_finite() {
        strength.abs()
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strengths_are_non_negative_and_finite() {
        assert_eq!(buy_signal(-0.5, Value::Null).strength, 0.5);
        assert_eq!(sell_signal(f64::NAN, Value::Null).strength, 0.0);
        assert_eq!(hold_signal().strength, 0.0);
        assert_eq!(distance_past(75.0, 70.0), 5.0 / 70.0);
        assert_eq!(distance_past(1.0, 0.0), 0.0);
    }
}
