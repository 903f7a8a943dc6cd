use crate::models::*;
use crate::store::PortfolioStore;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use log::warn;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};

/// Lot changes for one sell plus what they cost and whether the sell was covered.
#[derive(Debug, Clone, PartialEq)]
pub struct Depletion {
    pub changes: LotChanges,
    pub filled: Decimal,
    /// Cost basis of the filled quantity.
    pub realized_cost: Decimal,
    /// Requested quantity no lot could cover.
    pub unfilled: Decimal,
}

/// Aggregate of the open lots of one instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct Holding {
    pub instrument_id: i64,
    pub quantity: Decimal,
    pub cost_basis: Decimal,
    pub last_purchase: NaiveDate,
}

impl Holding {
    pub fn meets_holding_period(&self, as_of: NaiveDate, required_days: i64) -> bool {
        (as_of - self.last_purchase).num_days() >= required_days
    }
}

/// A buy always opens a fresh lot at the execution price.
pub fn buy_changes(
    portfolio_id: i64,
    instrument_id: i64,
    quantity: Decimal,
    unit_cost: Decimal,
    purchase_date: NaiveDate,
) -> LotChanges {
    LotChanges {
        insert: Some(NewLot {
            portfolio_id,
            instrument_id,
            quantity,
            unit_cost,
            purchase_date,
        }),
        ..LotChanges::default()
    }
}

/// Consumes `quantity` from `lots` oldest first (purchase date, then id).
///
/// Lots that reach zero are deleted, the last lot touched is decremented. Asking for
/// more than is held exhausts every lot and reports the excess as `unfilled`.
pub fn deplete_fifo(lots: &[Lot], quantity: Decimal) -> Depletion {
    let mut ordered: Vec<&Lot> = lots.iter().collect();
    ordered.sort_by(|a, b| {
        a.purchase_date
            .cmp(&b.purchase_date)
            .then(a.id.cmp(&b.id))
    });

    let mut changes = LotChanges::default();
    let mut remaining = quantity.max(Decimal::ZERO);
    let mut realized_cost = Decimal::ZERO;

    for lot in ordered {
        if lot.quantity <= Decimal::ZERO {
            changes.deletes.push(lot.id);
            continue;
        }
        if remaining <= Decimal::ZERO {
            continue;
        }
        if remaining >= lot.quantity {
            realized_cost += lot.quantity * lot.unit_cost;
            remaining -= lot.quantity;
            changes.deletes.push(lot.id);
        } else {
            realized_cost += remaining * lot.unit_cost;
            changes.updates.push(LotUpdate {
                lot_id: lot.id,
                quantity: lot.quantity - remaining,
            });
            remaining = Decimal::ZERO;
        }
    }

    if remaining > Decimal::ZERO {
        let instrument = lots.first().map(|lot| lot.instrument_id).unwrap_or_default();
        warn!(
            "Sell of {} exceeds held lots for instrument {} by {}; clamping",
            quantity, instrument, remaining
        );
    }

    Depletion {
        changes,
        filled: quantity.max(Decimal::ZERO) - remaining,
        realized_cost,
        unfilled: remaining,
    }
}

pub fn open_quantity(lots: &[Lot]) -> Decimal {
    lots.iter().map(|lot| lot.quantity).sum()
}

/// Groups lots by instrument. Instruments whose lots sum to zero are left out.
pub fn holdings(lots: &[Lot]) -> BTreeMap<i64, Holding> {
    let mut grouped: BTreeMap<i64, Holding> = BTreeMap::new();
    for lot in lots {
        let entry = grouped.entry(lot.instrument_id).or_insert_with(|| Holding {
            instrument_id: lot.instrument_id,
            quantity: Decimal::ZERO,
            cost_basis: Decimal::ZERO,
            last_purchase: lot.purchase_date,
        });
        entry.quantity += lot.quantity;
        entry.cost_basis += lot.quantity * lot.unit_cost;
        entry.last_purchase = entry.last_purchase.max(lot.purchase_date);
    }
    grouped.retain(|_, holding| holding.quantity > Decimal::ZERO);
    grouped
}

/// FIFO cost-basis ledger of one portfolio.
pub struct LotLedger<'a> {
    store: &'a dyn PortfolioStore,
    portfolio_id: i64,
}

impl<'a> LotLedger<'a> {
    pub fn new(store: &'a dyn PortfolioStore, portfolio_id: i64) -> Self {
        Self {
            store,
            portfolio_id,
        }
    }

    pub async fn quantity(&self, instrument_id: i64) -> Result<Decimal> {
        let lots = self.store.lots_for(self.portfolio_id, instrument_id).await?;
        Ok(open_quantity(&lots))
    }

    pub async fn holdings(&self) -> Result<BTreeMap<i64, Holding>> {
        let lots = self
            .store
            .lots(self.portfolio_id)
            .await
            .with_context(|| format!("failed to load lots for portfolio {}", self.portfolio_id))?;
        Ok(holdings(&lots))
    }

    pub fn plan_buy(
        &self,
        instrument_id: i64,
        quantity: Decimal,
        price: Decimal,
        date: NaiveDate,
    ) -> LotChanges {
        buy_changes(self.portfolio_id, instrument_id, quantity, price, date)
    }

    pub async fn plan_sell(&self, instrument_id: i64, quantity: Decimal) -> Result<Depletion> {
        let lots = self.store.lots_for(self.portfolio_id, instrument_id).await?;
        Ok(deplete_fifo(&lots, quantity))
    }

    /// Positions derived from the open lots, valued at `last_prices`.
    pub async fn positions(&self, last_prices: &HashMap<i64, Decimal>) -> Result<Vec<Position>> {
        Ok(self
            .holdings()
            .await?
            .into_values()
            .map(|holding| Position {
                portfolio_id: self.portfolio_id,
                instrument_id: holding.instrument_id,
                quantity: holding.quantity,
                last_price: last_prices.get(&holding.instrument_id).copied(),
                invested: holding.cost_basis,
                purchase_date: holding.last_purchase,
            })
            .collect())
    }

    /// Rebuilds every position from the lots, replacing what was stored.
    pub async fn refresh_positions(
        &self,
        last_prices: &HashMap<i64, Decimal>,
    ) -> Result<Vec<Position>> {
        let positions = self.positions(last_prices).await?;
        self.store
            .replace_positions(self.portfolio_id, &positions)
            .await
            .with_context(|| {
                format!("failed to replace positions for portfolio {}", self.portfolio_id)
            })?;
        Ok(positions)
    }
}

/// Market value of positions at their last known price.
pub fn position_value(positions: &[Position]) -> Decimal {
    positions
        .iter()
        .filter_map(|position| position.last_price.map(|price| price * position.quantity))
        .sum()
}
