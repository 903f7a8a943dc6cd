use crate::config::{PortfolioConfig, INITIAL_DEPOSIT_DESCRIPTION};
use crate::models::*;
use crate::store::{MarketDataSource, PortfolioStore};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use log::error;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use tokio::sync::Mutex;
use tokio_postgres::{Client, NoTls, Row, Transaction as DbTransaction};

/// PostgreSQL-backed market data and portfolio store.
pub struct Database {
    client: Mutex<Client>,
}

impl Database {
    pub async fn new<S: AsRef<str>>(database_url: S) -> Result<Self> {
        let database_url = database_url.as_ref().to_string();
        let (client, connection) = tokio_postgres::connect(&database_url, NoTls)
            .await
            .with_context(|| format!("failed to connect to PostgreSQL at {}", database_url))?;

        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!("PostgreSQL connection error: {}", err);
            }
        });

        Ok(Self {
            client: Mutex::new(client),
        })
    }

    pub async fn get_all_settings(&self) -> Result<HashMap<String, String>> {
        let rows = self
            .client
            .lock()
            .await
            .query("SELECT setting_key, value FROM settings", &[])
            .await?;
        let mut settings = HashMap::with_capacity(rows.len());
        for row in rows {
            settings.insert(row.get::<_, String>(0), row.get::<_, String>(1));
        }
        Ok(settings)
    }

    fn map_instrument_row(row: &Row) -> Instrument {
        Instrument {
            id: row.get(0),
            symbol: row.get(1),
            sector: row.get(2),
            market: row.get(3),
            is_active: row.get(4),
            dividend_rate: row.get(5),
        }
    }

    fn map_portfolio_row(row: &Row) -> Result<Portfolio> {
        let id: i64 = row.get(0);
        let parameters: Value = row.get(4);
        let config: Value = row.get(5);
        Ok(Portfolio {
            id,
            name: row.get(1),
            owner: row.get(2),
            strategy: row.get(3),
            strategy_parameters: serde_json::from_value(parameters)
                .with_context(|| format!("invalid strategy parameters for portfolio {}", id))?,
            config: serde_json::from_value::<PortfolioConfig>(config)
                .with_context(|| format!("invalid config for portfolio {}", id))?,
            is_active: row.get(6),
            is_simulated: row.get(7),
        })
    }

    fn map_lot_row(row: &Row) -> Lot {
        Lot {
            id: row.get(0),
            portfolio_id: row.get(1),
            instrument_id: row.get(2),
            quantity: row.get(3),
            unit_cost: row.get(4),
            purchase_date: row.get(5),
        }
    }

    async fn insert_cash_entry(tx: &DbTransaction<'_>, entry: &CashEntry) -> Result<()> {
        tx.execute(
            "INSERT INTO cash_entries (portfolio_id, kind, amount, date, description)
             VALUES ($1, $2, $3, $4, $5)",
            &[
                &entry.portfolio_id,
                &entry.kind.as_str(),
                &entry.amount,
                &entry.date,
                &entry.description,
            ],
        )
        .await?;
        Ok(())
    }

    async fn write_lot_changes(
        tx: &DbTransaction<'_>,
        portfolio_id: i64,
        changes: &LotChanges,
    ) -> Result<()> {
        for update in &changes.updates {
            let changed = tx
                .execute(
                    "UPDATE lots SET quantity = $1 WHERE id = $2 AND portfolio_id = $3",
                    &[&update.quantity, &update.lot_id, &portfolio_id],
                )
                .await?;
            if changed != 1 {
                bail!("lot {} not found for update", update.lot_id);
            }
        }
        for lot_id in &changes.deletes {
            let changed = tx
                .execute(
                    "DELETE FROM lots WHERE id = $1 AND portfolio_id = $2",
                    &[lot_id, &portfolio_id],
                )
                .await?;
            if changed != 1 {
                bail!("lot {} not found for delete", lot_id);
            }
        }
        if let Some(lot) = &changes.insert {
            tx.execute(
                "INSERT INTO lots (portfolio_id, instrument_id, quantity, unit_cost, purchase_date)
                 VALUES ($1, $2, $3, $4, $5)",
                &[
                    &lot.portfolio_id,
                    &lot.instrument_id,
                    &lot.quantity,
                    &lot.unit_cost,
                    &lot.purchase_date,
                ],
            )
            .await?;
        }
        Ok(())
    }

    async fn cash_entry_date(
        &self,
        query: &str,
        portfolio_id: i64,
        pattern: &str,
    ) -> Result<Option<NaiveDate>> {
        let row = self
            .client
            .lock()
            .await
            .query_one(query, &[&portfolio_id, &format!("%{}%", pattern)])
            .await?;
        Ok(row.get(0))
    }
}

#[async_trait]
impl MarketDataSource for Database {
    async fn instruments(&self) -> Result<Vec<Instrument>> {
        let rows = self
            .client
            .lock()
            .await
            .query(
                "SELECT id, symbol, sector, market, is_active, dividend_rate
                 FROM instruments
                 ORDER BY symbol",
                &[],
            )
            .await?;
        Ok(rows.iter().map(Self::map_instrument_row).collect())
    }

    async fn instrument_by_symbol(&self, symbol: &str) -> Result<Option<Instrument>> {
        let row = self
            .client
            .lock()
            .await
            .query_opt(
                "SELECT id, symbol, sector, market, is_active, dividend_rate
                 FROM instruments
                 WHERE symbol = $1",
                &[&symbol],
            )
            .await?;
        Ok(row.as_ref().map(Self::map_instrument_row))
    }

    async fn price_range(
        &self,
        instrument_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PriceBar>> {
        let rows = self
            .client
            .lock()
            .await
            .query(
                "SELECT date, open, high, low, close, volume
                 FROM prices
                 WHERE instrument_id = $1 AND date >= $2 AND date <= $3
                 ORDER BY date",
                &[&instrument_id, &from, &to],
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| PriceBar {
                instrument_id,
                date: row.get(0),
                open: row.get(1),
                high: row.get(2),
                low: row.get(3),
                close: row.get(4),
                volume: row.get(5),
            })
            .collect())
    }

    async fn closing_price(
        &self,
        instrument_id: i64,
        date: NaiveDate,
        lookback_days: i64,
    ) -> Result<Option<Decimal>> {
        let from = date - Duration::days(lookback_days - 1);
        let row = self
            .client
            .lock()
            .await
            .query_opt(
                "SELECT close
                 FROM prices
                 WHERE instrument_id = $1 AND date >= $2 AND date <= $3
                 ORDER BY date DESC
                 LIMIT 1",
                &[&instrument_id, &from, &date],
            )
            .await?;
        Ok(row.map(|row| row.get(0)))
    }

    async fn advance_decline(&self, until: NaiveDate) -> Result<Vec<BreadthPoint>> {
        let rows = self
            .client
            .lock()
            .await
            .query(
                "SELECT date, advancing, declining
                 FROM advance_decline
                 WHERE date <= $1
                 ORDER BY date",
                &[&until],
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| BreadthPoint {
                date: row.get(0),
                advancing: row.get(1),
                declining: row.get(2),
            })
            .collect())
    }

    async fn trading_dates(
        &self,
        after: NaiveDate,
        excluded_sectors: &[String],
    ) -> Result<Vec<NaiveDate>> {
        let excluded: Vec<String> = excluded_sectors.iter().map(|s| s.to_lowercase()).collect();
        let rows = self
            .client
            .lock()
            .await
            .query(
                "SELECT DISTINCT p.date
                 FROM prices p
                 JOIN instruments i ON i.id = p.instrument_id
                 WHERE p.date > $1
                   AND NOT (LOWER(COALESCE(i.sector, '')) = ANY($2))
                 ORDER BY p.date",
                &[&after, &excluded],
            )
            .await?;
        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }
}

#[async_trait]
impl PortfolioStore for Database {
    async fn portfolio(&self, portfolio_id: i64) -> Result<Option<Portfolio>> {
        let row = self
            .client
            .lock()
            .await
            .query_opt(
                "SELECT id, name, owner, strategy, strategy_parameters, config, is_active, is_simulated
                 FROM portfolios
                 WHERE id = $1",
                &[&portfolio_id],
            )
            .await?;
        row.as_ref().map(Self::map_portfolio_row).transpose()
    }

    async fn save_portfolio(&self, portfolio: &Portfolio) -> Result<i64> {
        let parameters = serde_json::to_value(&portfolio.strategy_parameters)?;
        let config = serde_json::to_value(&portfolio.config)?;
        let client = self.client.lock().await;
        let row = if portfolio.id == 0 {
            client
                .query_one(
                    "INSERT INTO portfolios (name, owner, strategy, strategy_parameters, config, is_active, is_simulated)
                     VALUES ($1, $2, $3, $4, $5, $6, $7)
                     RETURNING id",
                    &[
                        &portfolio.name,
                        &portfolio.owner,
                        &portfolio.strategy,
                        &parameters,
                        &config,
                        &portfolio.is_active,
                        &portfolio.is_simulated,
                    ],
                )
                .await?
        } else {
            client
                .query_one(
                    "INSERT INTO portfolios (id, name, owner, strategy, strategy_parameters, config, is_active, is_simulated)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                     ON CONFLICT (id) DO UPDATE SET
                        name = EXCLUDED.name,
                        owner = EXCLUDED.owner,
                        strategy = EXCLUDED.strategy,
                        strategy_parameters = EXCLUDED.strategy_parameters,
                        config = EXCLUDED.config,
                        is_active = EXCLUDED.is_active,
                        is_simulated = EXCLUDED.is_simulated
                     RETURNING id",
                    &[
                        &portfolio.id,
                        &portfolio.name,
                        &portfolio.owner,
                        &portfolio.strategy,
                        &parameters,
                        &config,
                        &portfolio.is_active,
                        &portfolio.is_simulated,
                    ],
                )
                .await?
        };
        Ok(row.get(0))
    }

    async fn portfolio_by_name(&self, name: &str) -> Result<Option<Portfolio>> {
        let row = self
            .client
            .lock()
            .await
            .query_opt(
                "SELECT id, name, owner, strategy, strategy_parameters, config, is_active, is_simulated
                 FROM portfolios
                 WHERE name = $1",
                &[&name],
            )
            .await?;
        row.as_ref().map(Self::map_portfolio_row).transpose()
    }

    async fn lots(&self, portfolio_id: i64) -> Result<Vec<Lot>> {
        let rows = self
            .client
            .lock()
            .await
            .query(
                "SELECT id, portfolio_id, instrument_id, quantity, unit_cost, purchase_date
                 FROM lots
                 WHERE portfolio_id = $1
                 ORDER BY instrument_id, purchase_date, id",
                &[&portfolio_id],
            )
            .await?;
        Ok(rows.iter().map(Self::map_lot_row).collect())
    }

    async fn lots_for(&self, portfolio_id: i64, instrument_id: i64) -> Result<Vec<Lot>> {
        let rows = self
            .client
            .lock()
            .await
            .query(
                "SELECT id, portfolio_id, instrument_id, quantity, unit_cost, purchase_date
                 FROM lots
                 WHERE portfolio_id = $1 AND instrument_id = $2
                 ORDER BY purchase_date, id",
                &[&portfolio_id, &instrument_id],
            )
            .await?;
        Ok(rows.iter().map(Self::map_lot_row).collect())
    }

    async fn apply_lot_changes(&self, portfolio_id: i64, changes: &LotChanges) -> Result<()> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await?;
        Self::write_lot_changes(&tx, portfolio_id, changes).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn record_trade(&self, trade: &TradeRecord) -> Result<()> {
        let transaction = &trade.transaction;
        let mut client = self.client.lock().await;
        let tx = client.transaction().await?;
        tx.execute(
            "INSERT INTO transactions (portfolio_id, instrument_id, action, quantity, price, date)
             VALUES ($1, $2, $3, $4, $5, $6)",
            &[
                &transaction.portfolio_id,
                &transaction.instrument_id,
                &transaction.action.as_str(),
                &transaction.quantity,
                &transaction.price,
                &transaction.date,
            ],
        )
        .await?;
        Self::write_lot_changes(&tx, transaction.portfolio_id, &trade.lot_changes).await?;
        for entry in &trade.cash_entries {
            Self::insert_cash_entry(&tx, entry).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn transactions(&self, portfolio_id: i64) -> Result<Vec<Transaction>> {
        let rows = self
            .client
            .lock()
            .await
            .query(
                "SELECT portfolio_id, instrument_id, action, quantity, price, date
                 FROM transactions
                 WHERE portfolio_id = $1
                 ORDER BY date, id",
                &[&portfolio_id],
            )
            .await?;
        let mut transactions = Vec::with_capacity(rows.len());
        for row in rows {
            let action: String = row.get(2);
            transactions.push(Transaction {
                portfolio_id: row.get(0),
                instrument_id: row.get(1),
                action: SignalAction::from_str(&action)?,
                quantity: row.get(3),
                price: row.get(4),
                date: row.get(5),
            });
        }
        Ok(transactions)
    }

    async fn replace_positions(&self, portfolio_id: i64, positions: &[Position]) -> Result<()> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await?;
        tx.execute("DELETE FROM positions WHERE portfolio_id = $1", &[&portfolio_id])
            .await?;
        let stmt = tx
            .prepare(
                "INSERT INTO positions (portfolio_id, instrument_id, quantity, last_price, invested, purchase_date)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .await?;
        for position in positions.iter().filter(|p| p.quantity > Decimal::ZERO) {
            tx.execute(
                &stmt,
                &[
                    &portfolio_id,
                    &position.instrument_id,
                    &position.quantity,
                    &position.last_price,
                    &position.invested,
                    &position.purchase_date,
                ],
            )
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn positions(&self, portfolio_id: i64) -> Result<Vec<Position>> {
        let rows = self
            .client
            .lock()
            .await
            .query(
                "SELECT portfolio_id, instrument_id, quantity, last_price, invested, purchase_date
                 FROM positions
                 WHERE portfolio_id = $1
                 ORDER BY instrument_id",
                &[&portfolio_id],
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| Position {
                portfolio_id: row.get(0),
                instrument_id: row.get(1),
                quantity: row.get(2),
                last_price: row.get(3),
                invested: row.get(4),
                purchase_date: row.get(5),
            })
            .collect())
    }

    async fn append_cash_entry(&self, entry: &CashEntry) -> Result<()> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await?;
        Self::insert_cash_entry(&tx, entry).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn cash_totals(&self, portfolio_id: i64, as_of: NaiveDate) -> Result<CashTotals> {
        let row = self
            .client
            .lock()
            .await
            .query_one(
                "SELECT COALESCE(SUM(amount), 0),
                        COALESCE(SUM(amount) FILTER (WHERE kind = 'BANK'), 0),
                        COALESCE(SUM(amount) FILTER (WHERE kind = 'INVEST'), 0)
                 FROM cash_entries
                 WHERE portfolio_id = $1 AND date <= $2",
                &[&portfolio_id, &as_of],
            )
            .await?;
        Ok(CashTotals {
            cash: row.get(0),
            bank: row.get(1),
            invest: row.get(2),
        })
    }

    async fn cash_entries(&self, portfolio_id: i64) -> Result<Vec<CashEntry>> {
        let rows = self
            .client
            .lock()
            .await
            .query(
                "SELECT portfolio_id, kind, amount, date, description
                 FROM cash_entries
                 WHERE portfolio_id = $1
                 ORDER BY date, id",
                &[&portfolio_id],
            )
            .await?;
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let kind: String = row.get(1);
            entries.push(CashEntry {
                portfolio_id: row.get(0),
                kind: CashEntryKind::from_str(&kind)?,
                amount: row.get(2),
                date: row.get(3),
                description: row.get(4),
            });
        }
        Ok(entries)
    }

    async fn first_cash_entry_matching(
        &self,
        portfolio_id: i64,
        pattern: &str,
    ) -> Result<Option<NaiveDate>> {
        self.cash_entry_date(
            "SELECT MIN(date) FROM cash_entries WHERE portfolio_id = $1 AND description LIKE $2",
            portfolio_id,
            pattern,
        )
        .await
    }

    async fn last_cash_entry_matching(
        &self,
        portfolio_id: i64,
        pattern: &str,
    ) -> Result<Option<NaiveDate>> {
        self.cash_entry_date(
            "SELECT MAX(date) FROM cash_entries WHERE portfolio_id = $1 AND description LIKE $2",
            portfolio_id,
            pattern,
        )
        .await
    }

    async fn first_cash_entry_date(&self, portfolio_id: i64) -> Result<Option<NaiveDate>> {
        let row = self
            .client
            .lock()
            .await
            .query_one(
                "SELECT MIN(date) FROM cash_entries WHERE portfolio_id = $1",
                &[&portfolio_id],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn upsert_recommendations(
        &self,
        portfolio_id: i64,
        recommendations: &[Recommendation],
    ) -> Result<()> {
        if recommendations.is_empty() {
            return Ok(());
        }
        let mut client = self.client.lock().await;
        let tx = client.transaction().await?;
        let stmt = tx
            .prepare(
                "INSERT INTO recommendations (portfolio_id, instrument_id, symbol, action, last, strategy, strength, info, as_of)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                 ON CONFLICT (portfolio_id, instrument_id) DO UPDATE SET
                    symbol = EXCLUDED.symbol,
                    action = EXCLUDED.action,
                    last = EXCLUDED.last,
                    strategy = EXCLUDED.strategy,
                    strength = EXCLUDED.strength,
                    info = EXCLUDED.info,
                    as_of = EXCLUDED.as_of",
            )
            .await?;
        for rec in recommendations {
            tx.execute(
                &stmt,
                &[
                    &portfolio_id,
                    &rec.instrument_id,
                    &rec.symbol,
                    &rec.action.as_str(),
                    &rec.last,
                    &rec.strategy,
                    &rec.strength,
                    &rec.info,
                    &rec.as_of,
                ],
            )
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn recommendations(&self, portfolio_id: i64) -> Result<Vec<Recommendation>> {
        let rows = self
            .client
            .lock()
            .await
            .query(
                "SELECT instrument_id, symbol, action, last, strategy, strength, info, as_of
                 FROM recommendations
                 WHERE portfolio_id = $1
                 ORDER BY symbol",
                &[&portfolio_id],
            )
            .await?;
        let mut recommendations = Vec::with_capacity(rows.len());
        for row in rows {
            let action: String = row.get(2);
            recommendations.push(Recommendation {
                instrument_id: row.get(0),
                symbol: row.get(1),
                action: SignalAction::from_str(&action)?,
                last: row.get(3),
                strategy: row.get(4),
                strength: row.get(5),
                info: row.get(6),
                as_of: row.get(7),
            });
        }
        Ok(recommendations)
    }

    async fn append_performance(&self, snapshot: &PerformanceSnapshot) -> Result<()> {
        self.client
            .lock()
            .await
            .execute(
                "INSERT INTO performance (portfolio_id, date, cash, banked, invested, position_value, roi, benchmark_rating)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 ON CONFLICT (portfolio_id, date) DO UPDATE SET
                    cash = EXCLUDED.cash,
                    banked = EXCLUDED.banked,
                    invested = EXCLUDED.invested,
                    position_value = EXCLUDED.position_value,
                    roi = EXCLUDED.roi,
                    benchmark_rating = EXCLUDED.benchmark_rating",
                &[
                    &snapshot.portfolio_id,
                    &snapshot.date,
                    &snapshot.cash,
                    &snapshot.banked,
                    &snapshot.invested,
                    &snapshot.position_value,
                    &snapshot.roi,
                    &snapshot.benchmark_rating,
                ],
            )
            .await?;
        Ok(())
    }

    async fn performance_history(&self, portfolio_id: i64) -> Result<Vec<PerformanceSnapshot>> {
        let rows = self
            .client
            .lock()
            .await
            .query(
                "SELECT portfolio_id, date, cash, banked, invested, position_value, roi, benchmark_rating
                 FROM performance
                 WHERE portfolio_id = $1
                 ORDER BY date",
                &[&portfolio_id],
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| PerformanceSnapshot {
                portfolio_id: row.get(0),
                date: row.get(1),
                cash: row.get(2),
                banked: row.get(3),
                invested: row.get(4),
                position_value: row.get(5),
                roi: row.get(6),
                benchmark_rating: row.get(7),
            })
            .collect())
    }

    async fn checkpoint(&self, portfolio_id: i64) -> Result<Option<SimulationCheckpoint>> {
        let row = self
            .client
            .lock()
            .await
            .query_opt(
                "SELECT portfolio_id, first_date, run_length, last_date
                 FROM simulation_checkpoints
                 WHERE portfolio_id = $1",
                &[&portfolio_id],
            )
            .await?;
        Ok(row.map(|row| SimulationCheckpoint {
            portfolio_id: row.get(0),
            first_date: row.get(1),
            run_length: row.get(2),
            last_date: row.get(3),
        }))
    }

    async fn save_checkpoint(&self, checkpoint: &SimulationCheckpoint) -> Result<()> {
        self.client
            .lock()
            .await
            .execute(
                "INSERT INTO simulation_checkpoints (portfolio_id, first_date, run_length, last_date)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (portfolio_id) DO UPDATE SET
                    first_date = EXCLUDED.first_date,
                    run_length = EXCLUDED.run_length,
                    last_date = EXCLUDED.last_date",
                &[
                    &checkpoint.portfolio_id,
                    &checkpoint.first_date,
                    &checkpoint.run_length,
                    &checkpoint.last_date,
                ],
            )
            .await?;
        Ok(())
    }

    async fn reset_portfolio(&self, portfolio_id: i64, full: bool) -> Result<()> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await?;
        for table in [
            "positions",
            "transactions",
            "lots",
            "recommendations",
            "performance",
            "simulation_checkpoints",
        ] {
            tx.execute(
                format!("DELETE FROM {} WHERE portfolio_id = $1", table).as_str(),
                &[&portfolio_id],
            )
            .await
            .map_err(|err| anyhow!("failed to clear {}: {}", table, err))?;
        }
        if full {
            tx.execute(
                "DELETE FROM cash_entries WHERE portfolio_id = $1",
                &[&portfolio_id],
            )
            .await?;
        } else {
            tx.execute(
                "DELETE FROM cash_entries WHERE portfolio_id = $1 AND description <> $2",
                &[&portfolio_id, &INITIAL_DEPOSIT_DESCRIPTION],
            )
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
