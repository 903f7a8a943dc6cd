use crate::models::*;
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;

/// Read access to reference and market data owned outside the simulation.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn instruments(&self) -> Result<Vec<Instrument>>;

    async fn instrument_by_symbol(&self, symbol: &str) -> Result<Option<Instrument>>;

    /// Bars for one instrument within `[from, to]`, ordered by date.
    async fn price_range(
        &self,
        instrument_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PriceBar>>;

    /// Most recent close at or before `date`, no older than `lookback_days`.
    async fn closing_price(
        &self,
        instrument_id: i64,
        date: NaiveDate,
        lookback_days: i64,
    ) -> Result<Option<Decimal>>;

    /// Daily advance/decline counts dated on or before `until`, ordered by date.
    async fn advance_decline(&self, until: NaiveDate) -> Result<Vec<BreadthPoint>>;

    /// Distinct bar dates after `after`, skipping instruments in `excluded_sectors`.
    async fn trading_dates(
        &self,
        after: NaiveDate,
        excluded_sectors: &[String],
    ) -> Result<Vec<NaiveDate>>;
}

/// Ledger, recommendation and checkpoint persistence for portfolios.
#[async_trait]
pub trait PortfolioStore: Send + Sync {
    async fn portfolio(&self, portfolio_id: i64) -> Result<Option<Portfolio>>;

    /// Inserts a portfolio when `id` is 0, otherwise updates it. Returns the id.
    async fn save_portfolio(&self, portfolio: &Portfolio) -> Result<i64>;

    async fn portfolio_by_name(&self, name: &str) -> Result<Option<Portfolio>>;

    /// Lots ordered by instrument, purchase date and id.
    async fn lots(&self, portfolio_id: i64) -> Result<Vec<Lot>>;

    /// Lots for one instrument ordered by purchase date, then id.
    async fn lots_for(&self, portfolio_id: i64, instrument_id: i64) -> Result<Vec<Lot>>;

    async fn apply_lot_changes(&self, portfolio_id: i64, changes: &LotChanges) -> Result<()>;

    /// Writes the transaction, lot changes and cash entries of one trade atomically.
    async fn record_trade(&self, trade: &TradeRecord) -> Result<()>;

    async fn transactions(&self, portfolio_id: i64) -> Result<Vec<Transaction>>;

    /// Replaces every position of the portfolio with `positions`.
    async fn replace_positions(&self, portfolio_id: i64, positions: &[Position]) -> Result<()>;

    async fn positions(&self, portfolio_id: i64) -> Result<Vec<Position>>;

    async fn append_cash_entry(&self, entry: &CashEntry) -> Result<()>;

    /// Sums over entries dated on or before `as_of`.
    async fn cash_totals(&self, portfolio_id: i64, as_of: NaiveDate) -> Result<CashTotals>;

    async fn cash_entries(&self, portfolio_id: i64) -> Result<Vec<CashEntry>>;

    /// Earliest date of an entry whose description contains `pattern`.
    async fn first_cash_entry_matching(
        &self,
        portfolio_id: i64,
        pattern: &str,
    ) -> Result<Option<NaiveDate>>;

    /// Latest date of an entry whose description contains `pattern`.
    async fn last_cash_entry_matching(
        &self,
        portfolio_id: i64,
        pattern: &str,
    ) -> Result<Option<NaiveDate>>;

    async fn first_cash_entry_date(&self, portfolio_id: i64) -> Result<Option<NaiveDate>>;

    async fn upsert_recommendations(
        &self,
        portfolio_id: i64,
        recommendations: &[Recommendation],
    ) -> Result<()>;

    async fn recommendations(&self, portfolio_id: i64) -> Result<Vec<Recommendation>>;

    async fn append_performance(&self, snapshot: &PerformanceSnapshot) -> Result<()>;

    async fn performance_history(&self, portfolio_id: i64) -> Result<Vec<PerformanceSnapshot>>;

    async fn checkpoint(&self, portfolio_id: i64) -> Result<Option<SimulationCheckpoint>>;

    async fn save_checkpoint(&self, checkpoint: &SimulationCheckpoint) -> Result<()>;

    /// Clears derived state. Without `full`, the initial deposit survives.
    async fn reset_portfolio(&self, portfolio_id: i64, full: bool) -> Result<()>;
}
