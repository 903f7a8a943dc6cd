use crate::context::AppContext;
use crate::simulation::contribute;
use anyhow::{bail, Result};
use chrono::{NaiveDate, Utc};
use log::info;
use rust_decimal::Decimal;

pub async fn run(
    app: &AppContext,
    portfolio_id: i64,
    amount: Decimal,
    date: Option<NaiveDate>,
) -> Result<()> {
    if amount <= Decimal::ZERO {
        bail!("Investment amount must be positive (got {})", amount);
    }
    let date = date.unwrap_or_else(|| Utc::now().date_naive());
    let db = app.database().await?;
    contribute(&db, portfolio_id, amount, date).await?;
    info!("Invested {} in portfolio {} on {}", amount, portfolio_id, date);
    Ok(())
}
