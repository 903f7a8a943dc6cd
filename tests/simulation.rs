use chrono::NaiveDate;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use simulator::config::{PortfolioConfig, SimulationSettings, SWEEP_DESCRIPTION};
use simulator::errors::SimulationError;
use simulator::memory_store::MemoryStore;
use simulator::models::*;
use simulator::simulation::{contribute, reset_portfolio, DriverState, SimulationDriver};
use simulator::store::{MarketDataSource, PortfolioStore};
use simulator::strategy::StrategyRegistry;
use std::collections::HashMap;

const AAA: i64 = 1;
const SPY: i64 = 2;

fn day(n: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, n).unwrap()
}

fn bar(instrument_id: i64, n: u32, close: f64) -> PriceBar {
    let close = Decimal::from_f64(close).unwrap();
    PriceBar {
        instrument_id,
        date: day(n),
        open: close,
        high: close,
        low: close,
        close,
        volume: 1_000,
    }
}

fn instrument(id: i64, symbol: &str, sector: &str, is_active: bool) -> Instrument {
    Instrument {
        id,
        symbol: symbol.to_string(),
        sector: Some(sector.to_string()),
        market: None,
        is_active,
        dividend_rate: None,
    }
}

fn config() -> PortfolioConfig {
    PortfolioConfig {
        rebalance_months: vec![6],
        reinvest_period_days: 3650,
        ..PortfolioConfig::default()
    }
}

/// One instrument that dips on day 2 and recovers on day 4, traded by mean reversion
/// over two bars: BUY 118 @ 8 on day 2, SELL 118 @ 10 on day 4.
async fn setup(strategy: &str, config: PortfolioConfig) -> (MemoryStore, i64) {
    let store = MemoryStore::new();
    store
        .add_instrument(instrument(AAA, "AAA", "Technology", true))
        .unwrap();
    store
        .add_bars(
            [10.0, 8.0, 8.0, 10.0, 10.0]
                .iter()
                .enumerate()
                .map(|(i, close)| bar(AAA, i as u32 + 1, *close))
                .collect(),
        )
        .unwrap();

    let mut parameters = HashMap::new();
    parameters.insert("period".to_string(), 2.0);
    parameters.insert("band".to_string(), 0.05);
    let portfolio = Portfolio {
        id: 0,
        name: "Reversion".to_string(),
        owner: None,
        strategy: strategy.to_string(),
        strategy_parameters: parameters,
        config,
        is_active: true,
        is_simulated: true,
    };
    let portfolio_id = store.save_portfolio(&portfolio).await.unwrap();
    contribute(&store, portfolio_id, dec!(1000), day(1)).await.unwrap();
    (store, portfolio_id)
}

fn driver<'a>(store: &'a MemoryStore, settings: SimulationSettings) -> SimulationDriver<'a> {
    SimulationDriver::new(store, store, settings, StrategyRegistry::with_defaults())
}

#[tokio::test]
async fn full_run_buys_the_dip_and_sells_the_recovery() {
    let (store, portfolio_id) = setup("mean_reversion", config()).await;
    let mut driver = driver(&store, SimulationSettings::default());
    assert_eq!(driver.state(), DriverState::Idle);

    let outcome = driver.run(portfolio_id, None).await.unwrap();
    assert_eq!(driver.state(), DriverState::Settled);
    assert_eq!(outcome.days.len(), 5);
    assert_eq!(outcome.remaining_dates, 0);

    let transactions = store.transactions(portfolio_id).await.unwrap();
    assert_eq!(transactions.len(), 2);
    assert_eq!(transactions[0].action, SignalAction::Buy);
    assert_eq!(transactions[0].quantity, dec!(118));
    assert_eq!(transactions[0].price, dec!(8));
    assert_eq!(transactions[0].date, day(2));
    assert_eq!(transactions[1].action, SignalAction::Sell);
    assert_eq!(transactions[1].quantity, dec!(118));
    assert_eq!(transactions[1].date, day(4));

    assert!(store.lots(portfolio_id).await.unwrap().is_empty());
    assert!(store.positions(portfolio_id).await.unwrap().is_empty());

    let totals = store.cash_totals(portfolio_id, day(5)).await.unwrap();
    assert_eq!(totals.cash, dec!(1236));
    assert_eq!(totals.invest, dec!(1000));

    let held = &outcome.days[2].snapshot;
    assert_eq!(held.cash, dec!(56));
    assert_eq!(held.position_value, dec!(944));
    assert_eq!(held.roi, Decimal::ZERO);

    let last = outcome.last_snapshot().unwrap();
    assert_eq!(last.roi, dec!(0.236));
    assert_eq!(last.benchmark_rating, 1);

    let checkpoint = outcome.checkpoint.unwrap();
    assert_eq!(checkpoint.first_date, day(1));
    assert_eq!(checkpoint.last_date, day(5));
    assert_eq!(checkpoint.run_length, 5);

    let recommendations = store.recommendations(portfolio_id).await.unwrap();
    assert_eq!(recommendations.len(), 1);
    assert_eq!(recommendations[0].as_of, day(5));
    assert_eq!(recommendations[0].action, SignalAction::Hold);

    assert_eq!(outcome.summary.trading_days, 5);
    assert_eq!(outcome.summary.final_roi, dec!(0.236));
    assert_eq!(store.performance_history(portfolio_id).await.unwrap().len(), 5);
}

#[tokio::test]
async fn capped_run_resumes_from_checkpoint() {
    let (store, portfolio_id) = setup("mean_reversion", config()).await;

    let first = driver(&store, SimulationSettings::default())
        .run(portfolio_id, Some(2))
        .await
        .unwrap();
    assert_eq!(first.days.len(), 2);
    assert_eq!(first.remaining_dates, 3);
    let checkpoint = first.checkpoint.unwrap();
    assert_eq!(checkpoint.last_date, day(2));
    assert_eq!(checkpoint.run_length, 2);

    let dates = driver(&store, SimulationSettings::default())
        .trading_dates(portfolio_id)
        .await
        .unwrap();
    assert_eq!(dates, vec![day(3), day(4), day(5)]);

    let second = driver(&store, SimulationSettings::default())
        .run(portfolio_id, None)
        .await
        .unwrap();
    assert_eq!(second.days.first().unwrap().date, day(3));
    let checkpoint = second.checkpoint.unwrap();
    assert_eq!(checkpoint.first_date, day(1));
    assert_eq!(checkpoint.run_length, 5);

    assert_eq!(store.transactions(portfolio_id).await.unwrap().len(), 2);
    let totals = store.cash_totals(portfolio_id, day(5)).await.unwrap();
    assert_eq!(totals.cash, dec!(1236));

    let idle = driver(&store, SimulationSettings::default())
        .run(portfolio_id, None)
        .await
        .unwrap();
    assert!(idle.days.is_empty());
    assert_eq!(idle.checkpoint.unwrap().last_date, day(5));
    assert_eq!(idle.summary.trading_days, 5);
}

#[tokio::test]
async fn fees_are_charged_on_both_sides() {
    let (store, portfolio_id) = setup("mean_reversion", config()).await;
    let settings = SimulationSettings {
        buy_fee: dec!(1),
        sell_fee: dec!(1),
        ..SimulationSettings::default()
    };
    driver(&store, settings).run(portfolio_id, None).await.unwrap();

    let entries = store.cash_entries(portfolio_id).await.unwrap();
    let fees: Vec<&CashEntry> = entries
        .iter()
        .filter(|e| e.description.contains("TX FEE"))
        .collect();
    assert_eq!(fees.len(), 2);
    assert!(fees.iter().all(|e| e.amount == dec!(-1)));

    let totals = store.cash_totals(portfolio_id, day(5)).await.unwrap();
    assert_eq!(totals.cash, dec!(1234));
}

#[tokio::test]
async fn failed_trade_writes_leave_the_day_running() {
    let (store, portfolio_id) = setup("mean_reversion", config()).await;
    store.set_fail_trade_writes(true);

    let outcome = driver(&store, SimulationSettings::default())
        .run(portfolio_id, None)
        .await
        .unwrap();

    assert_eq!(outcome.days.len(), 5);
    assert_eq!(outcome.days[1].planned, 1);
    assert_eq!(outcome.days[1].executed, 0);
    assert!(store.transactions(portfolio_id).await.unwrap().is_empty());
    assert!(store.lots(portfolio_id).await.unwrap().is_empty());
    assert_eq!(store.performance_history(portfolio_id).await.unwrap().len(), 5);
    let totals = store.cash_totals(portfolio_id, day(5)).await.unwrap();
    assert_eq!(totals.cash, dec!(1000));
    assert_eq!(outcome.checkpoint.unwrap().run_length, 5);
}

#[tokio::test]
async fn failed_recommendation_writes_do_not_block_trading() {
    let (store, portfolio_id) = setup("mean_reversion", config()).await;
    store.set_fail_recommendation_writes(true);

    driver(&store, SimulationSettings::default())
        .run(portfolio_id, None)
        .await
        .unwrap();

    assert!(store.recommendations(portfolio_id).await.unwrap().is_empty());
    assert_eq!(store.transactions(portfolio_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn profit_above_threshold_is_banked_once_per_period() {
    let config = PortfolioConfig {
        reinvest_period_days: 2,
        bank_threshold: dec!(10),
        bank_percent: dec!(50),
        ..config()
    };
    let (store, portfolio_id) = setup("mean_reversion", config).await;
    let outcome = driver(&store, SimulationSettings::default())
        .run(portfolio_id, None)
        .await
        .unwrap();

    let sweeps: Vec<CashEntry> = store
        .cash_entries(portfolio_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.description == SWEEP_DESCRIPTION)
        .collect();
    assert_eq!(sweeps.len(), 1);
    assert_eq!(sweeps[0].kind, CashEntryKind::Bank);
    assert_eq!(sweeps[0].amount, dec!(-610));
    assert_eq!(sweeps[0].date, day(4));

    let last = outcome.last_snapshot().unwrap();
    assert_eq!(last.cash, dec!(626));
    assert_eq!(last.banked, dec!(610));
    assert_eq!(last.roi, dec!(0.236));
}

#[tokio::test]
async fn benchmark_rating_tracks_the_index() {
    let (store, portfolio_id) = setup("mean_reversion", config()).await;
    store
        .add_instrument(instrument(SPY, "SPY", "Index", false))
        .unwrap();
    store
        .add_bars(
            [100.0, 100.0, 100.0, 100.0, 130.0]
                .iter()
                .enumerate()
                .map(|(i, close)| bar(SPY, i as u32 + 1, *close))
                .collect(),
        )
        .unwrap();
    let settings = SimulationSettings {
        benchmark_symbols: vec!["SPY".to_string()],
        ..SimulationSettings::default()
    };

    let outcome = driver(&store, settings).run(portfolio_id, None).await.unwrap();

    assert_eq!(outcome.days[3].snapshot.benchmark_rating, 1);
    assert_eq!(outcome.days[4].snapshot.benchmark_rating, -1);
    assert!(store.transactions(portfolio_id).await.unwrap().iter().all(|t| t.instrument_id == AAA));
}

#[tokio::test]
async fn unknown_benchmark_aborts_the_run() {
    let (store, portfolio_id) = setup("mean_reversion", config()).await;
    let settings = SimulationSettings {
        benchmark_symbols: vec!["NOPE".to_string()],
        ..SimulationSettings::default()
    };

    let err = driver(&store, settings).run(portfolio_id, None).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SimulationError>(),
        Some(SimulationError::MissingInstrument(symbol)) if symbol == "NOPE"
    ));
    assert!(store.performance_history(portfolio_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_strategy_aborts_the_run() {
    let (store, portfolio_id) = setup("moonshot", config()).await;

    let err = driver(&store, SimulationSettings::default())
        .run(portfolio_id, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SimulationError>(),
        Some(SimulationError::UnknownStrategy(name)) if name == "moonshot"
    ));
    assert!(store.checkpoint(portfolio_id).await.unwrap().is_none());
}

#[tokio::test]
async fn reset_keeps_the_initial_deposit_unless_full() {
    let (store, portfolio_id) = setup("mean_reversion", config()).await;
    driver(&store, SimulationSettings::default())
        .run(portfolio_id, None)
        .await
        .unwrap();

    reset_portfolio(&store, portfolio_id, false).await.unwrap();
    assert!(store.transactions(portfolio_id).await.unwrap().is_empty());
    assert!(store.performance_history(portfolio_id).await.unwrap().is_empty());
    assert!(store.checkpoint(portfolio_id).await.unwrap().is_none());
    let totals = store.cash_totals(portfolio_id, day(5)).await.unwrap();
    assert_eq!(totals.cash, dec!(1000));

    let rerun = driver(&store, SimulationSettings::default())
        .run(portfolio_id, None)
        .await
        .unwrap();
    assert_eq!(rerun.days.len(), 5);
    assert_eq!(rerun.last_snapshot().unwrap().roi, dec!(0.236));

    reset_portfolio(&store, portfolio_id, true).await.unwrap();
    assert!(store.cash_entries(portfolio_id).await.unwrap().is_empty());

    let err = reset_portfolio(&store, 999, false).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SimulationError>(),
        Some(SimulationError::MissingPortfolio(999))
    ));
}

#[tokio::test]
async fn later_contributions_are_not_initial_deposits() {
    let (store, portfolio_id) = setup("mean_reversion", config()).await;
    contribute(&store, portfolio_id, dec!(250), day(3)).await.unwrap();

    let entries = store.cash_entries(portfolio_id).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].description, "Initial deposit");
    assert_eq!(entries[1].description, "Capital contribution");
    let totals = store.cash_totals(portfolio_id, day(3)).await.unwrap();
    assert_eq!(totals.invest, dec!(1250));
}

#[tokio::test]
async fn crypto_only_dates_are_not_trading_days() {
    let store = MemoryStore::new();
    store
        .add_instrument(instrument(3, "BTC", "Cryptocurrency", true))
        .unwrap();
    store
        .add_bars(vec![bar(3, 6, 40_000.0), bar(3, 7, 41_000.0)])
        .unwrap();
    let dates = store
        .trading_dates(day(1), &SimulationSettings::default().non_tradeable_sectors)
        .await
        .unwrap();
    assert!(dates.is_empty());
}
