use crate::models::*;
use crate::rounding::{floor_to_multiple, round_down, round_up, CASH_DECIMALS};
use crate::store::PortfolioStore;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use log::info;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Outflow entry: stored negative, magnitude rounded up to the cent. Zero amounts
/// produce nothing.
pub fn debit_entry(
    portfolio_id: i64,
    kind: CashEntryKind,
    amount: Decimal,
    date: NaiveDate,
    description: impl Into<String>,
) -> Option<CashEntry> {
    if amount.is_zero() {
        return None;
    }
    Some(CashEntry {
        portfolio_id,
        kind,
        amount: -round_up(amount, CASH_DECIMALS),
        date,
        description: description.into(),
    })
}

/// Inflow entry: stored positive, rounded down to the cent. Zero amounts produce nothing.
pub fn deposit_entry(
    portfolio_id: i64,
    kind: CashEntryKind,
    amount: Decimal,
    date: NaiveDate,
    description: impl Into<String>,
) -> Option<CashEntry> {
    if amount.is_zero() {
        return None;
    }
    Some(CashEntry {
        portfolio_id,
        kind,
        amount: round_down(amount, CASH_DECIMALS),
        date,
        description: description.into(),
    })
}

/// Profit to bank: `bank_percent` of cash floored to a multiple of 10 once ROI
/// (percent) exceeds the threshold, otherwise nothing.
pub fn take_profit(
    bank_percent: Decimal,
    total_cash: Decimal,
    roi_percent: Decimal,
    bank_threshold: Decimal,
) -> Decimal {
    if roi_percent <= bank_threshold {
        return Decimal::ZERO;
    }
    floor_to_multiple(total_cash * bank_percent / dec!(100), dec!(10)).max(Decimal::ZERO)
}

/// Cash entries for one executed trade, fees included.
pub fn settlement_entries(
    transaction: &Transaction,
    symbol: &str,
    buy_fee: Decimal,
    sell_fee: Decimal,
) -> Vec<CashEntry> {
    let Transaction {
        portfolio_id,
        quantity,
        price,
        date,
        ..
    } = *transaction;
    let gross = quantity * price;
    let entries = match transaction.action {
        SignalAction::Buy => [
            debit_entry(
                portfolio_id,
                CashEntryKind::Debit,
                gross,
                date,
                format!("Buy {} shares of {}", quantity, symbol),
            ),
            debit_entry(
                portfolio_id,
                CashEntryKind::Debit,
                buy_fee,
                date,
                format!("Buy TX FEE {} shares of {}", quantity, symbol),
            ),
        ],
        SignalAction::Sell => [
            deposit_entry(
                portfolio_id,
                CashEntryKind::Deposit,
                gross,
                date,
                format!("Sell {} shares of {}", quantity, symbol),
            ),
            debit_entry(
                portfolio_id,
                CashEntryKind::Debit,
                sell_fee,
                date,
                format!("Sell TX FEE {} shares of {}", quantity, symbol),
            ),
        ],
        SignalAction::Hold => [None, None],
    };
    entries.into_iter().flatten().collect()
}

/// Cash, banked profit and invested capital of one portfolio, all derived from its
/// append-only cash entries.
pub struct CashLedger<'a> {
    store: &'a dyn PortfolioStore,
    portfolio_id: i64,
}

impl<'a> CashLedger<'a> {
    pub fn new(store: &'a dyn PortfolioStore, portfolio_id: i64) -> Self {
        Self {
            store,
            portfolio_id,
        }
    }

    pub async fn totals(&self, as_of: NaiveDate) -> Result<CashTotals> {
        self.store
            .cash_totals(self.portfolio_id, as_of)
            .await
            .with_context(|| format!("failed to sum cash for portfolio {}", self.portfolio_id))
    }

    pub async fn balance(&self, as_of: NaiveDate) -> Result<Decimal> {
        Ok(self.totals(as_of).await?.cash)
    }

    pub async fn banked(&self, as_of: NaiveDate) -> Result<Decimal> {
        Ok(self.totals(as_of).await?.bank.abs())
    }

    pub async fn invested(&self, as_of: NaiveDate) -> Result<Decimal> {
        Ok(self.totals(as_of).await?.invest)
    }

    pub async fn deposit(&self, amount: Decimal, date: NaiveDate, description: &str) -> Result<()> {
        let entry = deposit_entry(self.portfolio_id, CashEntryKind::Deposit, amount, date, description);
        self.append(entry).await
    }

    pub async fn debit(&self, amount: Decimal, date: NaiveDate, description: &str) -> Result<()> {
        let entry = debit_entry(self.portfolio_id, CashEntryKind::Debit, amount, date, description);
        self.append(entry).await
    }

    /// Moves `amount` out of spendable cash into the banked pool. Negative amounts
    /// move it back.
    pub async fn bank(&self, amount: Decimal, date: NaiveDate, description: &str) -> Result<()> {
        let entry = debit_entry(self.portfolio_id, CashEntryKind::Bank, amount, date, description);
        self.append(entry).await
    }

    /// Records new capital contributed to the portfolio.
    pub async fn invest(&self, amount: Decimal, date: NaiveDate, description: &str) -> Result<()> {
        let entry = deposit_entry(self.portfolio_id, CashEntryKind::Invest, amount, date, description);
        self.append(entry).await
    }

    /// Banks the surplus when withdrawing more than reinvesting. A shortfall comes out
    /// of the banked pool when it is large enough, otherwise it is new capital.
    pub async fn sweep(
        &self,
        withdraw: Decimal,
        reinvest: Decimal,
        date: NaiveDate,
        description: &str,
    ) -> Result<()> {
        if withdraw > reinvest {
            let to_bank = withdraw - reinvest;
            info!("Banking {} for portfolio {}", to_bank, self.portfolio_id);
            self.bank(to_bank, date, description).await
        } else if reinvest > withdraw {
            let to_invest = reinvest - withdraw;
            if self.banked(date).await? > to_invest {
                info!(
                    "Reinvesting {} from bank for portfolio {}",
                    to_invest, self.portfolio_id
                );
                self.bank(-to_invest, date, description).await
            } else {
                info!("Investing {} in portfolio {}", to_invest, self.portfolio_id);
                self.invest(to_invest, date, description).await
            }
        } else {
            Ok(())
        }
    }

    async fn append(&self, entry: Option<CashEntry>) -> Result<()> {
        let Some(entry) = entry else {
            return Ok(());
        };
        self.store
            .append_cash_entry(&entry)
            .await
            .with_context(|| format!("failed to record {} entry", entry.kind.as_str()))
    }
}
