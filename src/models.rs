use anyhow::{anyhow, Result as AnyResult};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::config::PortfolioConfig;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Instrument {
    pub id: i64,
    pub symbol: String,
    pub sector: Option<String>,
    pub market: Option<String>,
    pub is_active: bool,
    pub dividend_rate: Option<Decimal>,
}

impl Instrument {
    pub fn in_sector(&self, sector: &str) -> bool {
        self.sector
            .as_deref()
            .map(|s| s.eq_ignore_ascii_case(sector))
            .unwrap_or(false)
    }

    pub fn pays_dividend(&self) -> bool {
        self.dividend_rate
            .map(|rate| rate > Decimal::ZERO)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceBar {
    pub instrument_id: i64,
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
}

/// Pre-aggregated count of advancing and declining instruments for one market day.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BreadthPoint {
    pub date: NaiveDate,
    pub advancing: i64,
    pub declining: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub id: i64,
    pub name: String,
    pub owner: Option<String>,
    pub strategy: String,
    #[serde(default)]
    pub strategy_parameters: HashMap<String, f64>,
    pub config: PortfolioConfig,
    pub is_active: bool,
    pub is_simulated: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl SignalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalAction::Buy => "BUY",
            SignalAction::Sell => "SELL",
            SignalAction::Hold => "HOLD",
        }
    }

    /// +1 for BUY, -1 for SELL, 0 for HOLD.
    pub fn direction(&self) -> f64 {
        match self {
            SignalAction::Buy => 1.0,
            SignalAction::Sell => -1.0,
            SignalAction::Hold => 0.0,
        }
    }
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalAction {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> AnyResult<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(SignalAction::Buy),
            "SELL" => Ok(SignalAction::Sell),
            "HOLD" => Ok(SignalAction::Hold),
            other => Err(anyhow!("Unknown signal action: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PortfolioMove {
    Enter,
    Invest,
    Exit,
    Divest,
}

impl PortfolioMove {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortfolioMove::Enter => "enter",
            PortfolioMove::Invest => "invest",
            PortfolioMove::Exit => "exit",
            PortfolioMove::Divest => "divest",
        }
    }
}

impl fmt::Display for PortfolioMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CashEntryKind {
    Deposit,
    Debit,
    Bank,
    Invest,
}

impl CashEntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CashEntryKind::Deposit => "DEPOSIT",
            CashEntryKind::Debit => "DEBIT",
            CashEntryKind::Bank => "BANK",
            CashEntryKind::Invest => "INVEST",
        }
    }
}

impl FromStr for CashEntryKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> AnyResult<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DEPOSIT" => Ok(CashEntryKind::Deposit),
            "DEBIT" => Ok(CashEntryKind::Debit),
            "BANK" => Ok(CashEntryKind::Bank),
            "INVEST" => Ok(CashEntryKind::Invest),
            other => Err(anyhow!("Unknown cash entry type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lot {
    pub id: i64,
    pub portfolio_id: i64,
    pub instrument_id: i64,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub purchase_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewLot {
    pub portfolio_id: i64,
    pub instrument_id: i64,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub purchase_date: NaiveDate,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LotUpdate {
    pub lot_id: i64,
    pub quantity: Decimal,
}

/// Lot mutations produced by one buy or sell, applied together with the trade.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LotChanges {
    pub insert: Option<NewLot>,
    pub updates: Vec<LotUpdate>,
    pub deletes: Vec<i64>,
}

impl LotChanges {
    pub fn is_empty(&self) -> bool {
        self.insert.is_none() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub portfolio_id: i64,
    pub instrument_id: i64,
    pub quantity: Decimal,
    pub last_price: Option<Decimal>,
    pub invested: Decimal,
    pub purchase_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub portfolio_id: i64,
    pub instrument_id: i64,
    pub action: SignalAction,
    pub quantity: Decimal,
    pub price: Decimal,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CashEntry {
    pub portfolio_id: i64,
    pub kind: CashEntryKind,
    pub amount: Decimal,
    pub date: NaiveDate,
    pub description: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct CashTotals {
    /// Sum of every entry.
    pub cash: Decimal,
    /// Signed sum of BANK entries.
    pub bank: Decimal,
    /// Sum of INVEST entries.
    pub invest: Decimal,
}

/// Everything written for one executed action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeRecord {
    pub transaction: Transaction,
    pub lot_changes: LotChanges,
    pub cash_entries: Vec<CashEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrategySignal {
    pub action: SignalAction,
    pub strength: f64,
    pub info: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub instrument_id: i64,
    pub symbol: String,
    pub action: SignalAction,
    pub last: Option<Decimal>,
    pub strategy: String,
    pub strength: f64,
    pub info: Value,
    pub as_of: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    pub recommendation: Recommendation,
    pub action: SignalAction,
    pub portfolio_move: PortfolioMove,
    pub shares: Decimal,
}

impl Action {
    pub fn new(recommendation: &Recommendation, portfolio_move: PortfolioMove, shares: Decimal) -> Self {
        let action = match portfolio_move {
            PortfolioMove::Enter | PortfolioMove::Invest => SignalAction::Buy,
            PortfolioMove::Exit | PortfolioMove::Divest => SignalAction::Sell,
        };
        Self {
            recommendation: recommendation.clone(),
            action,
            portfolio_move,
            shares,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.recommendation.symbol
    }

    pub fn instrument_id(&self) -> i64 {
        self.recommendation.instrument_id
    }

    pub fn price(&self) -> Option<Decimal> {
        self.recommendation.last
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SimulationCheckpoint {
    pub portfolio_id: i64,
    pub first_date: NaiveDate,
    /// Number of trading days simulated since `first_date`.
    pub run_length: i32,
    pub last_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceSnapshot {
    pub portfolio_id: i64,
    pub date: NaiveDate,
    pub cash: Decimal,
    pub banked: Decimal,
    pub invested: Decimal,
    pub position_value: Decimal,
    /// Complete ROI as a fraction of invested capital.
    pub roi: Decimal,
    pub benchmark_rating: i32,
}

impl PerformanceSnapshot {
    pub fn total_value(&self) -> Decimal {
        self.cash + self.banked + self.position_value
    }
}
