use crate::cache::TtlCache;
use crate::config::{PortfolioConfig, SimulationSettings};
use crate::errors::SimulationError;
use crate::indicators::breadth_below_average;
use crate::models::*;
use crate::price_cache::PriceCache;
use crate::store::MarketDataSource;
use crate::strategy::{SignalContext, StrategyBox, StrategyRegistry};
use crate::strategy_utils::hold_with;
use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use log::debug;
use serde_json::json;
use std::collections::HashMap;

/// Period of the advance/decline moving average used as the regime gate.
pub const BREADTH_PERIOD: usize = 50;

type RecommendationKey = (String, i64, NaiveDate);

/// A strategy resolved for one portfolio, with the key its outputs are memoized under.
pub struct ResolvedStrategy {
    pub name: String,
    pub key: String,
    pub strategy: StrategyBox,
}

/// Turns price history into ranked recommendations for one portfolio's universe.
pub struct StrategyEngine {
    registry: StrategyRegistry,
    prices: PriceCache,
    memo: TtlCache<RecommendationKey, Recommendation>,
    max_history_days: i64,
    price_lookback_days: i64,
}

impl StrategyEngine {
    pub fn new(registry: StrategyRegistry, settings: &SimulationSettings) -> Self {
        Self {
            registry,
            prices: PriceCache::new(settings.price_cache_capacity),
            memo: TtlCache::new(
                settings.recommendation_ttl,
                settings.recommendation_cache_capacity,
            ),
            max_history_days: settings.max_history_days,
            price_lookback_days: settings.price_lookback_days,
        }
    }

    pub fn prices(&self) -> &PriceCache {
        &self.prices
    }

    /// Looks up `name` in the registry. Unknown names are fatal for the run.
    pub fn resolve(
        &self,
        name: &str,
        parameters: &HashMap<String, f64>,
    ) -> Result<ResolvedStrategy, SimulationError> {
        let strategy = self.registry.create(name, parameters)?;
        Ok(ResolvedStrategy {
            name: name.to_string(),
            key: strategy_key(name, parameters),
            strategy,
        })
    }

    /// One recommendation per instrument, ranked by strength then symbol.
    pub async fn recommend(
        &mut self,
        source: &dyn MarketDataSource,
        resolved: &ResolvedStrategy,
        instruments: &[Instrument],
        breadth: &[BreadthPoint],
        first_date: NaiveDate,
        date: NaiveDate,
    ) -> Result<Vec<Recommendation>> {
        let history_from = first_date - Duration::days(self.max_history_days);
        let breadth_bearish = breadth_below_average(breadth, date, BREADTH_PERIOD);

        let mut recommendations = Vec::with_capacity(instruments.len());
        for instrument in instruments {
            let key = (resolved.key.clone(), instrument.id, date);
            if let Some(cached) = self.memo.get(&key) {
                recommendations.push(cached);
                continue;
            }

            self.prices
                .ensure_loaded(source, instrument.id, history_from, date)
                .await
                .with_context(|| format!("failed to load history for {}", instrument.symbol))?;

            let history = self.prices.history(instrument.id, date);
            let last_price = self
                .prices
                .closing_price(instrument.id, date, self.price_lookback_days);
            let ctx = SignalContext {
                instrument,
                as_of: date,
                history,
                last_price,
                breadth_bearish,
            };

            let signal = if history.len() < resolved.strategy.get_min_data_points() {
                debug!(
                    "{}: {} bars, {} needs {}",
                    instrument.symbol,
                    history.len(),
                    resolved.name,
                    resolved.strategy.get_min_data_points()
                );
                hold_with(json!({ "bars": history.len() }))
            } else {
                resolved.strategy.evaluate(&ctx)
            };

            let recommendation = Recommendation {
                instrument_id: instrument.id,
                symbol: instrument.symbol.clone(),
                action: signal.action,
                last: last_price,
                strategy: resolved.name.clone(),
                strength: signal.strength,
                info: signal.info,
                as_of: date,
            };
            self.memo.insert(key, recommendation.clone());
            recommendations.push(recommendation);
        }

        rank_recommendations(&mut recommendations);
        Ok(recommendations)
    }
}

/// Strength descending; equal strengths fall back to symbol ascending.
pub fn rank_recommendations(recommendations: &mut [Recommendation]) {
    recommendations.sort_by(|a, b| {
        b.strength
            .total_cmp(&a.strength)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
}

/// Active instruments the portfolio may hold.
pub fn eligible_instruments(instruments: &[Instrument], config: &PortfolioConfig) -> Vec<Instrument> {
    instruments
        .iter()
        .filter(|instrument| instrument.is_active)
        .filter(|instrument| !config.dividend_only || instrument.pays_dividend())
        .filter(|instrument| config.allows_sector(instrument.sector.as_deref()))
        .cloned()
        .collect()
}

fn strategy_key(name: &str, parameters: &HashMap<String, f64>) -> String {
    let mut pairs: Vec<(&String, &f64)> = parameters.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    let mut key = name.to_string();
    for (param, value) in pairs {
        key.push_str(&format!(";{}={}", param, value));
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use serde_json::Value;

    fn date(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(offset)
    }

    fn instrument(id: i64, symbol: &str, sector: Option<&str>) -> Instrument {
        Instrument {
            id,
            symbol: symbol.to_string(),
            sector: sector.map(str::to_string),
            market: None,
            is_active: true,
            dividend_rate: None,
        }
    }

    fn bar(instrument_id: i64, offset: i64, close: Decimal) -> PriceBar {
        PriceBar {
            instrument_id,
            date: date(offset),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1_000,
        }
    }

    fn rec(symbol: &str, strength: f64) -> Recommendation {
        Recommendation {
            instrument_id: 0,
            symbol: symbol.to_string(),
            action: SignalAction::Buy,
            last: None,
            strategy: "test".to_string(),
            strength,
            info: Value::Null,
            as_of: date(0),
        }
    }

    #[test]
    fn ranking_breaks_ties_by_symbol() {
        let mut recs = vec![rec("MSFT", 0.2), rec("AAPL", 0.2), rec("TSLA", 0.9), rec("IBM", 0.0)];
        rank_recommendations(&mut recs);
        let symbols: Vec<&str> = recs.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["TSLA", "AAPL", "MSFT", "IBM"]);
    }

    #[test]
    fn eligibility_applies_activity_dividend_and_sector_rules() {
        let mut inactive = instrument(1, "OLD", None);
        inactive.is_active = false;
        let mut payer = instrument(2, "DIV", Some("Utilities"));
        payer.dividend_rate = Some(dec!(0.03));
        let coin = instrument(3, "BTC", Some("Cryptocurrency"));
        let plain = instrument(4, "TECH", Some("Technology"));
        let all = vec![inactive, payer, coin, plain];

        let mut config = PortfolioConfig::default();
        let ids = |list: Vec<Instrument>| list.iter().map(|i| i.id).collect::<Vec<_>>();
        assert_eq!(ids(eligible_instruments(&all, &config)), vec![2, 3, 4]);

        config.forbidden_sectors = vec!["Cryptocurrency".to_string()];
        assert_eq!(ids(eligible_instruments(&all, &config)), vec![2, 4]);

        config.dividend_only = true;
        assert_eq!(ids(eligible_instruments(&all, &config)), vec![2]);
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        let engine = StrategyEngine::new(StrategyRegistry::with_defaults(), &SimulationSettings::default());
        let err = engine.resolve("nope", &HashMap::new()).err().unwrap();
        assert!(matches!(err, SimulationError::UnknownStrategy(name) if name == "nope"));
    }

    #[test]
    fn strategy_key_is_order_independent() {
        let mut a = HashMap::new();
        a.insert("window".to_string(), 10.0);
        a.insert("high".to_string(), 1.5);
        let mut b = HashMap::new();
        b.insert("high".to_string(), 1.5);
        b.insert("window".to_string(), 10.0);
        assert_eq!(strategy_key("vwap", &a), strategy_key("vwap", &b));
        assert_ne!(strategy_key("vwap", &a), strategy_key("vwap", &HashMap::new()));
    }

    #[tokio::test]
    async fn recommends_with_last_price_and_short_history_holds() {
        let store = MemoryStore::new();
        store.add_instrument(instrument(1, "UP", None)).unwrap();
        store.add_instrument(instrument(2, "NEW", None)).unwrap();
        store
            .add_bars((0..10).map(|d| bar(1, d, Decimal::from(10 + d))).collect())
            .unwrap();
        store.add_bars(vec![bar(2, 9, dec!(5))]).unwrap();

        let mut params = HashMap::new();
        params.insert("window".to_string(), 5.0);
        let mut engine = StrategyEngine::new(StrategyRegistry::with_defaults(), &SimulationSettings::default());
        let resolved = engine.resolve("sma_buy_hold", &params).unwrap();
        let instruments = store.instruments().await.unwrap();

        let recs = engine
            .recommend(&store, &resolved, &instruments, &[], date(0), date(9))
            .await
            .unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].symbol, "UP");
        assert_eq!(recs[0].action, SignalAction::Buy);
        assert_eq!(recs[0].last, Some(dec!(19)));
        assert_eq!(recs[1].symbol, "NEW");
        assert_eq!(recs[1].action, SignalAction::Hold);
        assert_eq!(recs[1].strength, 0.0);
        assert_eq!(recs[1].last, Some(dec!(5)));
    }
}
