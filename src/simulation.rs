//! Day-stepped simulation of one portfolio.
//!
//! Each trading day runs the same fixed sequence: recommend, persist recommendations,
//! plan, execute, refresh positions, sweep, value, snapshot, checkpoint. Dates and
//! actions are processed strictly in order; nothing inside a run is concurrent.

use crate::config::{SimulationSettings, INITIAL_DEPOSIT_DESCRIPTION, SWEEP_DESCRIPTION};
use crate::engine::{eligible_instruments, ResolvedStrategy, StrategyEngine};
use crate::errors::SimulationError;
use crate::indicators::cumulative_return;
use crate::ledger::{position_value, LotLedger};
use crate::models::*;
use crate::performance::{PerformanceCalculator, RunSummary};
use crate::planner::{plan_trades, InstrumentState, PlanningContext};
use crate::store::{MarketDataSource, PortfolioStore};
use crate::strategy::StrategyRegistry;
use crate::wallet::{settlement_entries, take_profit, CashLedger};
use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, Utc};
use log::{info, warn};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Stepping(NaiveDate),
    Settled,
}

/// What one simulated day produced.
#[derive(Debug, Clone)]
pub struct DayReport {
    pub date: NaiveDate,
    pub planned: usize,
    pub executed: usize,
    pub snapshot: PerformanceSnapshot,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub portfolio_id: i64,
    pub days: Vec<DayReport>,
    /// Trading dates left after an iteration cap stopped the run.
    pub remaining_dates: usize,
    pub checkpoint: Option<SimulationCheckpoint>,
    /// Summary over the portfolio's whole stored history, not only this run.
    pub summary: RunSummary,
}

impl RunOutcome {
    pub fn last_snapshot(&self) -> Option<&PerformanceSnapshot> {
        self.days.last().map(|day| &day.snapshot)
    }
}

/// Everything fixed for the duration of one run.
struct RunSession {
    portfolio: Portfolio,
    strategy: ResolvedStrategy,
    catalog: HashMap<i64, Instrument>,
    eligible: Vec<Instrument>,
    benchmarks: Vec<Instrument>,
    breadth: Vec<BreadthPoint>,
    first_date: NaiveDate,
    checkpoint: Option<SimulationCheckpoint>,
}

pub struct SimulationDriver<'a> {
    market: &'a dyn MarketDataSource,
    store: &'a dyn PortfolioStore,
    settings: SimulationSettings,
    engine: StrategyEngine,
    state: DriverState,
}

impl<'a> SimulationDriver<'a> {
    pub fn new(
        market: &'a dyn MarketDataSource,
        store: &'a dyn PortfolioStore,
        settings: SimulationSettings,
        registry: StrategyRegistry,
    ) -> Self {
        let engine = StrategyEngine::new(registry, &settings);
        Self::with_engine(market, store, settings, engine)
    }

    /// Reuses an engine, and its caches, from an earlier driver.
    pub fn with_engine(
        market: &'a dyn MarketDataSource,
        store: &'a dyn PortfolioStore,
        settings: SimulationSettings,
        engine: StrategyEngine,
    ) -> Self {
        Self {
            market,
            store,
            settings,
            engine,
            state: DriverState::Idle,
        }
    }

    pub fn into_engine(self) -> StrategyEngine {
        self.engine
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Dates still to simulate: after the checkpoint, else from the first cash entry,
    /// else the last `max_history_days`.
    pub async fn trading_dates(&self, portfolio_id: i64) -> Result<Vec<NaiveDate>> {
        let after = match self.store.checkpoint(portfolio_id).await? {
            Some(checkpoint) => checkpoint.last_date,
            None => match self.store.first_cash_entry_date(portfolio_id).await? {
                Some(first) => first - Duration::days(1),
                None => Utc::now().date_naive() - Duration::days(self.settings.max_history_days),
            },
        };
        self.market
            .trading_dates(after, &self.settings.non_tradeable_sectors)
            .await
            .context("failed to load trading dates")
    }

    /// Simulates up to `max_steps` trading days (all remaining when `None`).
    pub async fn run(&mut self, portfolio_id: i64, max_steps: Option<usize>) -> Result<RunOutcome> {
        self.state = DriverState::Idle;
        let dates = self.trading_dates(portfolio_id).await?;
        let limit = max_steps.unwrap_or(dates.len()).min(dates.len());
        let mut outcome = RunOutcome {
            portfolio_id,
            days: Vec::with_capacity(limit),
            remaining_dates: dates.len() - limit,
            checkpoint: None,
            summary: PerformanceCalculator::summarize(portfolio_id, &[]),
        };
        if limit == 0 {
            self.state = DriverState::Settled;
            outcome.checkpoint = self.store.checkpoint(portfolio_id).await?;
            outcome.summary = self.summarize(portfolio_id).await?;
            return Ok(outcome);
        }

        let mut session = self.open_session(portfolio_id, &dates[..limit]).await?;
        info!(
            "Simulating {} of {} trading days for portfolio {} ({}) with {}",
            limit,
            dates.len(),
            portfolio_id,
            session.portfolio.name,
            session.strategy.name
        );

        for date in &dates[..limit] {
            self.state = DriverState::Stepping(*date);
            let report = self.run_day(&mut session, *date).await?;
            outcome.days.push(report);
        }

        self.state = DriverState::Settled;
        outcome.checkpoint = session.checkpoint;
        outcome.summary = self.summarize(portfolio_id).await?;
        if let Some(snapshot) = outcome.last_snapshot() {
            info!(
                "Portfolio {} settled on {}: ROI {:.2}%",
                portfolio_id,
                snapshot.date,
                snapshot.roi * dec!(100)
            );
        }
        Ok(outcome)
    }

    async fn summarize(&self, portfolio_id: i64) -> Result<RunSummary> {
        let history = self.store.performance_history(portfolio_id).await?;
        Ok(PerformanceCalculator::summarize(portfolio_id, &history))
    }

    async fn open_session(&mut self, portfolio_id: i64, dates: &[NaiveDate]) -> Result<RunSession> {
        let portfolio = self
            .store
            .portfolio(portfolio_id)
            .await?
            .ok_or(SimulationError::MissingPortfolio(portfolio_id))?;
        let strategy = self
            .engine
            .resolve(&portfolio.strategy, &portfolio.strategy_parameters)?;

        let instruments = self
            .market
            .instruments()
            .await
            .context("failed to load instrument catalog")?;
        let eligible = eligible_instruments(&instruments, &portfolio.config);

        let mut benchmarks = Vec::with_capacity(self.settings.benchmark_symbols.len());
        for symbol in &self.settings.benchmark_symbols {
            let instrument = self
                .market
                .instrument_by_symbol(symbol)
                .await?
                .ok_or_else(|| SimulationError::MissingInstrument(symbol.clone()))?;
            benchmarks.push(instrument);
        }

        let last_date = dates.last().copied().unwrap_or_else(|| Utc::now().date_naive());
        let breadth = self
            .market
            .advance_decline(last_date)
            .await
            .context("failed to load market breadth")?;

        let checkpoint = self.store.checkpoint(portfolio_id).await?;
        let first_date = checkpoint
            .map(|c| c.first_date)
            .or_else(|| dates.first().copied())
            .unwrap_or(last_date);

        Ok(RunSession {
            portfolio,
            strategy,
            catalog: instruments.into_iter().map(|i| (i.id, i)).collect(),
            eligible,
            benchmarks,
            breadth,
            first_date,
            checkpoint,
        })
    }

    async fn run_day(&mut self, session: &mut RunSession, date: NaiveDate) -> Result<DayReport> {
        let portfolio_id = session.portfolio.id;
        info!(
            "Processing {} {} for id={}: {}",
            date, session.strategy.name, portfolio_id, session.portfolio.name
        );

        let recommendations = self
            .engine
            .recommend(
                self.market,
                &session.strategy,
                &session.eligible,
                &session.breadth,
                session.first_date,
                date,
            )
            .await?;

        if let Err(err) = self
            .store
            .upsert_recommendations(portfolio_id, &recommendations)
            .await
        {
            warn!("Failed to record recommendations for {} on {}: {:#}", portfolio_id, date, err);
        }

        let ledger = LotLedger::new(self.store, portfolio_id);
        let wallet = CashLedger::new(self.store, portfolio_id);

        let mut last_prices: HashMap<i64, Decimal> = recommendations
            .iter()
            .filter_map(|rec| rec.last.map(|last| (rec.instrument_id, last)))
            .collect();
        let holdings = ledger.holdings().await?;
        for instrument_id in holdings.keys() {
            if last_prices.contains_key(instrument_id) {
                continue;
            }
            if let Some(price) = self
                .market
                .closing_price(*instrument_id, date, self.settings.max_history_days)
                .await?
            {
                last_prices.insert(*instrument_id, price);
            }
        }

        let mut states: HashMap<i64, InstrumentState> = HashMap::new();
        for rec in &recommendations {
            states.insert(rec.instrument_id, self.instrument_state(session, rec.instrument_id));
        }
        let mut held_value = Decimal::ZERO;
        for (instrument_id, holding) in &holdings {
            let price = last_prices.get(instrument_id).copied();
            held_value += price.unwrap_or_default() * holding.quantity;
            let state = states
                .entry(*instrument_id)
                .or_insert_with(|| self.instrument_state(session, *instrument_id));
            state.quantity = holding.quantity;
            state.last_price = price;
            state.holding_met =
                holding.meets_holding_period(date, self.settings.required_holding_days);
        }

        let cash = wallet.balance(date).await?;
        let ctx = PlanningContext {
            trade_date: date,
            cash,
            position_value: held_value,
            config: &session.portfolio.config,
            instruments: states,
        };
        let plan = plan_trades(&ctx, &recommendations);

        let mut executed = 0;
        for action in &plan.actions {
            if self.execute(session, &ledger, action, date).await {
                executed += 1;
            }
        }

        let positions = match ledger.refresh_positions(&last_prices).await {
            Ok(positions) => positions,
            Err(err) => {
                warn!("Failed to refresh positions for {} on {}: {:#}", portfolio_id, date, err);
                ledger.positions(&last_prices).await?
            }
        };
        let value = position_value(&positions);

        if let Err(err) = self.reinvest_or_bank(session, &wallet, value, date).await {
            warn!("Reinvest/bank failed for {} on {}: {:#}", portfolio_id, date, err);
        }

        let totals = wallet.totals(date).await?;
        let banked = totals.bank.abs();
        let roi = PerformanceCalculator::complete_roi(banked, value, totals.cash, totals.invest);
        let benchmark_rating = self.benchmark_rating(session, roi, date).await?;

        let snapshot = PerformanceSnapshot {
            portfolio_id,
            date,
            cash: totals.cash,
            banked,
            invested: totals.invest,
            position_value: value,
            roi,
            benchmark_rating,
        };
        if let Err(err) = self.store.append_performance(&snapshot).await {
            warn!("Failed to record performance for {} on {}: {:#}", portfolio_id, date, err);
        }

        let checkpoint = SimulationCheckpoint {
            portfolio_id,
            first_date: session.first_date,
            run_length: session.checkpoint.map(|c| c.run_length).unwrap_or(0) + 1,
            last_date: date,
        };
        self.store
            .save_checkpoint(&checkpoint)
            .await
            .with_context(|| format!("failed to save checkpoint for portfolio {}", portfolio_id))?;
        session.checkpoint = Some(checkpoint);

        Ok(DayReport {
            date,
            planned: plan.actions.len(),
            executed,
            snapshot,
        })
    }

    fn instrument_state(&self, session: &RunSession, instrument_id: i64) -> InstrumentState {
        let high_divisibility = session
            .catalog
            .get(&instrument_id)
            .map(|i| i.in_sector(&self.settings.high_divisibility_sector))
            .unwrap_or(false);
        InstrumentState {
            holding_met: true,
            high_divisibility,
            ..InstrumentState::default()
        }
    }

    /// Writes one trade. Failures are logged and the trade is dropped as a whole.
    async fn execute(
        &self,
        session: &RunSession,
        ledger: &LotLedger<'_>,
        action: &Action,
        date: NaiveDate,
    ) -> bool {
        let Some(price) = action.price() else {
            warn!("No price for {} on {}; skipping trade", action.symbol(), date);
            return false;
        };
        let sector = session
            .catalog
            .get(&action.instrument_id())
            .and_then(|i| i.sector.clone())
            .unwrap_or_default();
        info!(
            "TRADE {} {} {} {} {} @ {}",
            action.symbol(),
            sector,
            action.action,
            action.portfolio_move,
            action.shares,
            price
        );

        let lot_changes = match action.action {
            SignalAction::Buy => ledger.plan_buy(action.instrument_id(), action.shares, price, date),
            SignalAction::Sell => match ledger.plan_sell(action.instrument_id(), action.shares).await {
                Ok(depletion) => depletion.changes,
                Err(err) => {
                    warn!("Failed to read lots for {}: {:#}", action.symbol(), err);
                    return false;
                }
            },
            SignalAction::Hold => return false,
        };
        let transaction = Transaction {
            portfolio_id: session.portfolio.id,
            instrument_id: action.instrument_id(),
            action: action.action,
            quantity: action.shares,
            price,
            date,
        };
        let cash_entries = settlement_entries(
            &transaction,
            action.symbol(),
            self.settings.buy_fee,
            self.settings.sell_fee,
        );
        let trade = TradeRecord {
            transaction,
            lot_changes,
            cash_entries,
        };

        match self.store.record_trade(&trade).await {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    "Trade {} {} {} rolled back: {:#}",
                    action.action,
                    action.shares,
                    action.symbol(),
                    err
                );
                false
            }
        }
    }

    /// Sweeps profit into the bank, or tops up capital, once per reinvest period.
    async fn reinvest_or_bank(
        &self,
        session: &RunSession,
        wallet: &CashLedger<'_>,
        value: Decimal,
        date: NaiveDate,
    ) -> Result<()> {
        let portfolio_id = session.portfolio.id;
        let config = &session.portfolio.config;
        let since = match self
            .store
            .last_cash_entry_matching(portfolio_id, SWEEP_DESCRIPTION)
            .await?
        {
            Some(last_sweep) => Some(last_sweep),
            None => self.store.first_cash_entry_date(portfolio_id).await?,
        };
        let Some(since) = since else {
            return Ok(());
        };
        if (date - since).num_days() < config.reinvest_period_days {
            return Ok(());
        }

        let totals = wallet.totals(date).await?;
        let roi = PerformanceCalculator::complete_roi(
            totals.bank.abs(),
            value,
            totals.cash,
            totals.invest,
        );
        let withdraw = take_profit(
            config.bank_percent,
            totals.cash,
            roi * dec!(100),
            config.bank_threshold,
        );
        wallet
            .sweep(withdraw, config.reinvest_amount, date, SWEEP_DESCRIPTION)
            .await
    }

    async fn benchmark_rating(
        &self,
        session: &RunSession,
        roi: Decimal,
        date: NaiveDate,
    ) -> Result<i32> {
        let first_day = self
            .store
            .first_cash_entry_matching(session.portfolio.id, SWEEP_DESCRIPTION)
            .await?
            .unwrap_or(session.first_date);
        let lookback = self.settings.price_lookback_days;
        let mut returns = Vec::with_capacity(session.benchmarks.len());
        for benchmark in &session.benchmarks {
            let start = self.market.closing_price(benchmark.id, first_day, lookback).await?;
            let end = self.market.closing_price(benchmark.id, date, lookback).await?;
            returns.push(match (start, end) {
                (Some(start), Some(end)) => Some(cumulative_return(start, end) * dec!(100)),
                _ => None,
            });
        }
        Ok(PerformanceCalculator::rate_against_benchmarks(
            roi * dec!(100),
            &returns,
        ))
    }
}

/// Clears a portfolio's simulated history so the next run starts over.
pub async fn reset_portfolio(store: &dyn PortfolioStore, portfolio_id: i64, full: bool) -> Result<()> {
    store
        .portfolio(portfolio_id)
        .await?
        .ok_or(SimulationError::MissingPortfolio(portfolio_id))?;
    store
        .reset_portfolio(portfolio_id, full)
        .await
        .with_context(|| format!("failed to reset portfolio {}", portfolio_id))?;
    info!("Reset portfolio {} (full: {})", portfolio_id, full);
    Ok(())
}

/// Adds capital. The first contribution is recorded as the initial deposit.
pub async fn contribute(
    store: &dyn PortfolioStore,
    portfolio_id: i64,
    amount: Decimal,
    date: NaiveDate,
) -> Result<()> {
    store
        .portfolio(portfolio_id)
        .await?
        .ok_or(SimulationError::MissingPortfolio(portfolio_id))?;
    let description = match store.first_cash_entry_date(portfolio_id).await? {
        None => INITIAL_DEPOSIT_DESCRIPTION,
        Some(_) => "Capital contribution",
    };
    CashLedger::new(store, portfolio_id)
        .invest(amount, date, description)
        .await
}
