use crate::errors::SimulationError;
use crate::models::*;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};

use crate::indicators::to_f64;

/// Everything a strategy may look at for one instrument on one date.
pub struct SignalContext<'a> {
    pub instrument: &'a Instrument,
    pub as_of: NaiveDate,
    /// Bars dated on or before `as_of`, ascending.
    pub history: &'a [PriceBar],
    pub last_price: Option<Decimal>,
    /// Advance/decline line below its moving average.
    pub breadth_bearish: bool,
}

impl SignalContext<'_> {
    pub fn last(&self) -> Option<f64> {
        self.last_price.map(to_f64)
    }
}

pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;
    fn evaluate(&self, ctx: &SignalContext<'_>) -> StrategySignal;
    /// Bars required before the strategy can emit anything but HOLD.
    fn get_min_data_points(&self) -> usize;
}

#[path = "strategies/sma.rs"]
pub mod sma;

pub use sma::{MeanReversionStrategy, SmaBuyHoldStrategy};

#[path = "strategies/rsi.rs"]
pub mod rsi;

pub use rsi::{RsiStrategy, SmaRsiStrategy};

#[path = "strategies/vwap.rs"]
pub mod vwap;

pub use vwap::VwapStrategy;

#[path = "strategies/macd.rs"]
pub mod macd;

pub use macd::MacdStrategy;

#[path = "strategies/bands.rs"]
pub mod bands;

pub use bands::{BollingerStrategy, BreakoutStrategy};

#[path = "strategies/engulfing.rs"]
pub mod engulfing;

pub use engulfing::EngulfingStrategy;

#[path = "strategies/overrides.rs"]
pub mod overrides;

pub use overrides::{BuySmaSellRsiStrategy, BuySmaSellVwapStrategy};

#[path = "strategies/market_adaptive.rs"]
pub mod market_adaptive;

pub use market_adaptive::MarketAdaptiveStrategy;

#[path = "strategies/advanced.rs"]
pub mod advanced;

pub use advanced::AdvancedStrategy;

pub type StrategyBox = Box<dyn Strategy + Send + Sync>;
type StrategyFactory = fn(&HashMap<String, f64>) -> StrategyBox;

/// Named strategy constructors handed to the engine.
#[derive(Clone)]
pub struct StrategyRegistry {
    factories: BTreeMap<&'static str, StrategyFactory>,
}

impl StrategyRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("sma_buy_hold", |p| Box::new(SmaBuyHoldStrategy::new(p)));
        registry.register("mean_reversion", |p| Box::new(MeanReversionStrategy::new(p)));
        registry.register("rsi", |p| Box::new(RsiStrategy::new(p)));
        registry.register("sma_rsi", |p| Box::new(SmaRsiStrategy::new(p)));
        registry.register("vwap", |p| Box::new(VwapStrategy::new(p)));
        registry.register("macd", |p| Box::new(MacdStrategy::new(p)));
        registry.register("bollinger", |p| Box::new(BollingerStrategy::new(p)));
        registry.register("breakout", |p| Box::new(BreakoutStrategy::new(p)));
        registry.register("engulfing", |p| Box::new(EngulfingStrategy::new(p)));
        registry.register("buy_sma_sell_rsi", |p| Box::new(BuySmaSellRsiStrategy::new(p)));
        registry.register("buy_sma_sell_vwap", |p| Box::new(BuySmaSellVwapStrategy::new(p)));
        registry.register("market_adaptive", |p| Box::new(MarketAdaptiveStrategy::new(p)));
        registry.register("advanced", |p| Box::new(AdvancedStrategy::new(p)));
        registry
    }

    pub fn register(&mut self, name: &'static str, factory: StrategyFactory) {
        self.factories.insert(name, factory);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    pub fn create(
        &self,
        name: &str,
        parameters: &HashMap<String, f64>,
    ) -> Result<StrategyBox, SimulationError> {
        self.factories
            .get(name)
            .map(|factory| factory(parameters))
            .ok_or_else(|| SimulationError::UnknownStrategy(name.to_string()))
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

pub fn create_strategy(
    name: &str,
    parameters: &HashMap<String, f64>,
) -> Result<StrategyBox, SimulationError> {
    StrategyRegistry::with_defaults().create(name, parameters)
}
