use crate::models::SignalAction;
use crate::param_utils::{get_param_f64, params_with_prefix};
use crate::strategy_utils::{buy_signal, hold_with, sell_signal};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

use super::bands::{BollingerStrategy, BreakoutStrategy};
use super::engulfing::EngulfingStrategy;
use super::macd::MacdStrategy;
use super::rsi::RsiStrategy;
use super::sma::MeanReversionStrategy;
use super::vwap::VwapStrategy;
use super::{SignalContext, Strategy, StrategyBox, StrategySignal};

const DEFAULT_WEIGHTS: [(&str, f64); 7] = [
    ("vwap", 0.2),
    ("breakout", 0.25),
    ("bollinger", 0.25),
    ("rsi", 0.15),
    ("macd", 0.1),
    ("mean_reversion", 0.1),
    ("engulfing", 0.1),
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vote {
    pub action: SignalAction,
    pub score: f64,
    pub threshold: f64,
}

/// Sums each weight signed by its action. BUY at or above twice the average weight,
/// SELL at or below its negation.
pub fn weighted_vote(votes: &[(f64, SignalAction)]) -> Vote {
    if votes.is_empty() {
        return Vote {
            action: SignalAction::Hold,
            score: 0.0,
            threshold: 0.0,
        };
    }
    let score: f64 = votes
        .iter()
        .map(|(weight, action)| weight * action.direction())
        .sum();
    let total_weight: f64 = votes.iter().map(|(weight, _)| weight).sum();
    let threshold = total_weight / votes.len() as f64 * 2.0;

    let action = if score >= threshold {
        SignalAction::Buy
    } else if score <= -threshold {
        SignalAction::Sell
    } else {
        SignalAction::Hold
    };
    Vote {
        action,
        score,
        threshold,
    }
}

struct WeightedComponent {
    name: &'static str,
    weight: f64,
    strategy: StrategyBox,
}

pub struct AdvancedStrategy {
    components: Vec<WeightedComponent>,
}

impl AdvancedStrategy {
    pub fn new(parameters: &HashMap<String, f64>) -> Self {
        let components = DEFAULT_WEIGHTS
            .iter()
            .filter_map(|(name, default_weight)| {
                let scoped = params_with_prefix(parameters, name);
                let weight = get_param_f64(&scoped, "weight", *default_weight);
                if weight <= 0.0 {
                    return None;
                }
                let strategy: StrategyBox = match *name {
                    "vwap" => Box::new(VwapStrategy::new(&scoped)),
                    "breakout" => Box::new(BreakoutStrategy::new(&scoped)),
                    "bollinger" => Box::new(BollingerStrategy::new(&scoped)),
                    "rsi" => Box::new(RsiStrategy::new(&scoped)),
                    "macd" => Box::new(MacdStrategy::new(&scoped)),
                    "mean_reversion" => Box::new(MeanReversionStrategy::new(&scoped)),
                    _ => Box::new(EngulfingStrategy::new(&scoped)),
                };
                Some(WeightedComponent {
                    name,
                    weight,
                    strategy,
                })
            })
            .collect();
        Self { components }
    }
}

impl Strategy for AdvancedStrategy {
    fn name(&self) -> &str {
        "advanced"
    }

    fn evaluate(&self, ctx: &SignalContext<'_>) -> StrategySignal {
        let mut votes = Vec::with_capacity(self.components.len());
        let mut actions = Map::new();
        for component in &self.components {
            let signal = component.strategy.evaluate(ctx);
            actions.insert(
                component.name.to_string(),
                Value::String(signal.action.as_str().to_string()),
            );
            votes.push((component.weight, signal.action));
        }

        let vote = weighted_vote(&votes);
        let info = json!({
            "score": vote.score,
            "threshold": vote.threshold,
            "signals": actions,
        });
        let strength = if vote.threshold > 0.0 {
            (vote.score.abs() - vote.threshold) / vote.threshold
        } else {
            0.0
        };
        match vote.action {
            SignalAction::Buy => buy_signal(strength, info),
            SignalAction::Sell => sell_signal(strength, info),
            SignalAction::Hold => hold_with(info),
        }
    }

    fn get_min_data_points(&self) -> usize {
        1
    }
}
