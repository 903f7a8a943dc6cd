//! In-process implementation of the storage traits for offline runs and tests.

use crate::config::INITIAL_DEPOSIT_DESCRIPTION;
use crate::models::*;
use crate::store::{MarketDataSource, PortfolioStore};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct MemoryState {
    instruments: Vec<Instrument>,
    bars: HashMap<i64, Vec<PriceBar>>,
    breadth: Vec<BreadthPoint>,
    portfolios: HashMap<i64, Portfolio>,
    next_portfolio_id: i64,
    lots: Vec<Lot>,
    next_lot_id: i64,
    transactions: Vec<Transaction>,
    positions: HashMap<(i64, i64), Position>,
    cash: Vec<CashEntry>,
    recommendations: HashMap<(i64, i64), Recommendation>,
    performance: Vec<PerformanceSnapshot>,
    checkpoints: HashMap<i64, SimulationCheckpoint>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    fail_trade_writes: AtomicBool,
    fail_recommendation_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_instrument(&self, instrument: Instrument) -> Result<()> {
        let mut state = self.write()?;
        state.instruments.retain(|existing| existing.id != instrument.id);
        state.instruments.push(instrument);
        Ok(())
    }

    /// Adds bars keeping one bar per (instrument, date).
    pub fn add_bars(&self, bars: Vec<PriceBar>) -> Result<()> {
        let mut state = self.write()?;
        for bar in bars {
            let series = state.bars.entry(bar.instrument_id).or_default();
            match series.binary_search_by_key(&bar.date, |existing| existing.date) {
                Ok(index) => series[index] = bar,
                Err(index) => series.insert(index, bar),
            }
        }
        Ok(())
    }

    pub fn add_breadth(&self, points: Vec<BreadthPoint>) -> Result<()> {
        let mut state = self.write()?;
        state.breadth.extend(points);
        state.breadth.sort_by_key(|point| point.date);
        state.breadth.dedup_by_key(|point| point.date);
        Ok(())
    }

    /// Makes subsequent trade writes fail, for exercising error paths.
    pub fn set_fail_trade_writes(&self, fail: bool) {
        self.fail_trade_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_recommendation_writes(&self, fail: bool) {
        self.fail_recommendation_writes.store(fail, Ordering::SeqCst);
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryState>> {
        self.state
            .read()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }
}

impl MemoryState {
    fn instrument(&self, instrument_id: i64) -> Option<&Instrument> {
        self.instruments.iter().find(|i| i.id == instrument_id)
    }

    fn check_lot_changes(&self, portfolio_id: i64, changes: &LotChanges) -> Result<()> {
        let owned = |lot_id: i64| {
            self.lots
                .iter()
                .any(|lot| lot.id == lot_id && lot.portfolio_id == portfolio_id)
        };
        for update in &changes.updates {
            if !owned(update.lot_id) {
                return Err(anyhow!("lot {} not found for update", update.lot_id));
            }
        }
        for lot_id in &changes.deletes {
            if !owned(*lot_id) {
                return Err(anyhow!("lot {} not found for delete", lot_id));
            }
        }
        Ok(())
    }

    fn apply_lot_changes(&mut self, changes: &LotChanges) {
        for update in &changes.updates {
            if let Some(lot) = self.lots.iter_mut().find(|lot| lot.id == update.lot_id) {
                lot.quantity = update.quantity;
            }
        }
        self.lots.retain(|lot| !changes.deletes.contains(&lot.id));
        if let Some(new_lot) = &changes.insert {
            self.next_lot_id += 1;
            self.lots.push(Lot {
                id: self.next_lot_id,
                portfolio_id: new_lot.portfolio_id,
                instrument_id: new_lot.instrument_id,
                quantity: new_lot.quantity,
                unit_cost: new_lot.unit_cost,
                purchase_date: new_lot.purchase_date,
            });
        }
    }

    fn sorted_lots<F: Fn(&Lot) -> bool>(&self, keep: F) -> Vec<Lot> {
        let mut lots: Vec<Lot> = self.lots.iter().filter(|lot| keep(lot)).cloned().collect();
        lots.sort_by(|a, b| {
            a.instrument_id
                .cmp(&b.instrument_id)
                .then(a.purchase_date.cmp(&b.purchase_date))
                .then(a.id.cmp(&b.id))
        });
        lots
    }
}

#[async_trait]
impl MarketDataSource for MemoryStore {
    async fn instruments(&self) -> Result<Vec<Instrument>> {
        let mut instruments = self.read()?.instruments.clone();
        instruments.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(instruments)
    }

    async fn instrument_by_symbol(&self, symbol: &str) -> Result<Option<Instrument>> {
        Ok(self
            .read()?
            .instruments
            .iter()
            .find(|i| i.symbol == symbol)
            .cloned())
    }

    async fn price_range(
        &self,
        instrument_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PriceBar>> {
        let state = self.read()?;
        Ok(state
            .bars
            .get(&instrument_id)
            .map(|series| {
                series
                    .iter()
                    .filter(|bar| bar.date >= from && bar.date <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn closing_price(
        &self,
        instrument_id: i64,
        date: NaiveDate,
        lookback_days: i64,
    ) -> Result<Option<Decimal>> {
        let from = date - Duration::days(lookback_days - 1);
        let bars = self.price_range(instrument_id, from, date).await?;
        Ok(bars.last().map(|bar| bar.close))
    }

    async fn advance_decline(&self, until: NaiveDate) -> Result<Vec<BreadthPoint>> {
        Ok(self
            .read()?
            .breadth
            .iter()
            .filter(|point| point.date <= until)
            .copied()
            .collect())
    }

    async fn trading_dates(
        &self,
        after: NaiveDate,
        excluded_sectors: &[String],
    ) -> Result<Vec<NaiveDate>> {
        let state = self.read()?;
        let mut dates = BTreeSet::new();
        for (instrument_id, series) in &state.bars {
            let excluded = state
                .instrument(*instrument_id)
                .map(|instrument| excluded_sectors.iter().any(|s| instrument.in_sector(s)))
                .unwrap_or(false);
            if excluded {
                continue;
            }
            dates.extend(series.iter().map(|bar| bar.date).filter(|d| *d > after));
        }
        Ok(dates.into_iter().collect())
    }
}

#[async_trait]
impl PortfolioStore for MemoryStore {
    async fn portfolio(&self, portfolio_id: i64) -> Result<Option<Portfolio>> {
        Ok(self.read()?.portfolios.get(&portfolio_id).cloned())
    }

    async fn save_portfolio(&self, portfolio: &Portfolio) -> Result<i64> {
        let mut state = self.write()?;
        let mut stored = portfolio.clone();
        if stored.id == 0 {
            state.next_portfolio_id += 1;
            stored.id = state.next_portfolio_id;
        } else {
            state.next_portfolio_id = state.next_portfolio_id.max(stored.id);
        }
        let id = stored.id;
        state.portfolios.insert(id, stored);
        Ok(id)
    }

    async fn portfolio_by_name(&self, name: &str) -> Result<Option<Portfolio>> {
        Ok(self
            .read()?
            .portfolios
            .values()
            .find(|p| p.name == name)
            .cloned())
    }

    async fn lots(&self, portfolio_id: i64) -> Result<Vec<Lot>> {
        Ok(self.read()?.sorted_lots(|lot| lot.portfolio_id == portfolio_id))
    }

    async fn lots_for(&self, portfolio_id: i64, instrument_id: i64) -> Result<Vec<Lot>> {
        Ok(self.read()?.sorted_lots(|lot| {
            lot.portfolio_id == portfolio_id && lot.instrument_id == instrument_id
        }))
    }

    async fn apply_lot_changes(&self, portfolio_id: i64, changes: &LotChanges) -> Result<()> {
        let mut state = self.write()?;
        state.check_lot_changes(portfolio_id, changes)?;
        state.apply_lot_changes(changes);
        Ok(())
    }

    async fn record_trade(&self, trade: &TradeRecord) -> Result<()> {
        if self.fail_trade_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("trade write rejected"));
        }
        let mut state = self.write()?;
        state.check_lot_changes(trade.transaction.portfolio_id, &trade.lot_changes)?;
        state.transactions.push(trade.transaction.clone());
        state.apply_lot_changes(&trade.lot_changes);
        state.cash.extend(trade.cash_entries.iter().cloned());
        Ok(())
    }

    async fn transactions(&self, portfolio_id: i64) -> Result<Vec<Transaction>> {
        Ok(self
            .read()?
            .transactions
            .iter()
            .filter(|t| t.portfolio_id == portfolio_id)
            .cloned()
            .collect())
    }

    async fn replace_positions(&self, portfolio_id: i64, positions: &[Position]) -> Result<()> {
        let mut state = self.write()?;
        state.positions.retain(|(pid, _), _| *pid != portfolio_id);
        for position in positions {
            if position.quantity > Decimal::ZERO {
                state
                    .positions
                    .insert((portfolio_id, position.instrument_id), position.clone());
            }
        }
        Ok(())
    }

    async fn positions(&self, portfolio_id: i64) -> Result<Vec<Position>> {
        let mut positions: Vec<Position> = self
            .read()?
            .positions
            .values()
            .filter(|p| p.portfolio_id == portfolio_id)
            .cloned()
            .collect();
        positions.sort_by_key(|p| p.instrument_id);
        Ok(positions)
    }

    async fn append_cash_entry(&self, entry: &CashEntry) -> Result<()> {
        self.write()?.cash.push(entry.clone());
        Ok(())
    }

    async fn cash_totals(&self, portfolio_id: i64, as_of: NaiveDate) -> Result<CashTotals> {
        let state = self.read()?;
        let mut totals = CashTotals::default();
        for entry in state
            .cash
            .iter()
            .filter(|e| e.portfolio_id == portfolio_id && e.date <= as_of)
        {
            totals.cash += entry.amount;
            match entry.kind {
                CashEntryKind::Bank => totals.bank += entry.amount,
                CashEntryKind::Invest => totals.invest += entry.amount,
                CashEntryKind::Deposit | CashEntryKind::Debit => {}
            }
        }
        Ok(totals)
    }

    async fn cash_entries(&self, portfolio_id: i64) -> Result<Vec<CashEntry>> {
        let mut entries: Vec<CashEntry> = self
            .read()?
            .cash
            .iter()
            .filter(|e| e.portfolio_id == portfolio_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.date);
        Ok(entries)
    }

    async fn first_cash_entry_matching(
        &self,
        portfolio_id: i64,
        pattern: &str,
    ) -> Result<Option<NaiveDate>> {
        Ok(self
            .read()?
            .cash
            .iter()
            .filter(|e| e.portfolio_id == portfolio_id && e.description.contains(pattern))
            .map(|e| e.date)
            .min())
    }

    async fn last_cash_entry_matching(
        &self,
        portfolio_id: i64,
        pattern: &str,
    ) -> Result<Option<NaiveDate>> {
        Ok(self
            .read()?
            .cash
            .iter()
            .filter(|e| e.portfolio_id == portfolio_id && e.description.contains(pattern))
            .map(|e| e.date)
            .max())
    }

    async fn first_cash_entry_date(&self, portfolio_id: i64) -> Result<Option<NaiveDate>> {
        Ok(self
            .read()?
            .cash
            .iter()
            .filter(|e| e.portfolio_id == portfolio_id)
            .map(|e| e.date)
            .min())
    }

    async fn upsert_recommendations(
        &self,
        portfolio_id: i64,
        recommendations: &[Recommendation],
    ) -> Result<()> {
        if self.fail_recommendation_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("recommendation write rejected"));
        }
        let mut state = self.write()?;
        for rec in recommendations {
            state
                .recommendations
                .insert((portfolio_id, rec.instrument_id), rec.clone());
        }
        Ok(())
    }

    async fn recommendations(&self, portfolio_id: i64) -> Result<Vec<Recommendation>> {
        let mut recs: Vec<Recommendation> = self
            .read()?
            .recommendations
            .iter()
            .filter(|((pid, _), _)| *pid == portfolio_id)
            .map(|(_, rec)| rec.clone())
            .collect();
        recs.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(recs)
    }

    async fn append_performance(&self, snapshot: &PerformanceSnapshot) -> Result<()> {
        let mut state = self.write()?;
        state
            .performance
            .retain(|s| !(s.portfolio_id == snapshot.portfolio_id && s.date == snapshot.date));
        state.performance.push(snapshot.clone());
        Ok(())
    }

    async fn performance_history(&self, portfolio_id: i64) -> Result<Vec<PerformanceSnapshot>> {
        let mut history: Vec<PerformanceSnapshot> = self
            .read()?
            .performance
            .iter()
            .filter(|s| s.portfolio_id == portfolio_id)
            .cloned()
            .collect();
        history.sort_by_key(|s| s.date);
        Ok(history)
    }

    async fn checkpoint(&self, portfolio_id: i64) -> Result<Option<SimulationCheckpoint>> {
        Ok(self.read()?.checkpoints.get(&portfolio_id).copied())
    }

    async fn save_checkpoint(&self, checkpoint: &SimulationCheckpoint) -> Result<()> {
        self.write()?
            .checkpoints
            .insert(checkpoint.portfolio_id, *checkpoint);
        Ok(())
    }

    async fn reset_portfolio(&self, portfolio_id: i64, full: bool) -> Result<()> {
        let mut state = self.write()?;
        state.positions.retain(|(pid, _), _| *pid != portfolio_id);
        state.transactions.retain(|t| t.portfolio_id != portfolio_id);
        state.lots.retain(|lot| lot.portfolio_id != portfolio_id);
        state.recommendations.retain(|(pid, _), _| *pid != portfolio_id);
        state.performance.retain(|s| s.portfolio_id != portfolio_id);
        state.checkpoints.remove(&portfolio_id);
        state.cash.retain(|e| {
            e.portfolio_id != portfolio_id
                || (!full && e.description == INITIAL_DEPOSIT_DESCRIPTION)
        });
        Ok(())
    }
}
