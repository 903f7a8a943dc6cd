use crate::context::AppContext;
use crate::database::Database;
use crate::retry::retry_db_operation;
use crate::strategy::StrategyRegistry;
use crate::sweep::{
    default_workers, prepare_portfolios, run_sweep, CryptoMode, SweepGrid, SweepResult,
    DEFAULT_INITIAL_DEPOSIT,
};
use anyhow::Result;
use chrono::{Duration, Utc};
use log::{info, warn};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;

pub async fn run(
    app: &AppContext,
    initial_deposit: Option<Decimal>,
    strategies: Vec<String>,
    crypto: Vec<CryptoMode>,
    workers: Option<usize>,
) -> Result<()> {
    let db = app.database().await?;
    let settings = app.settings(&db).await?;

    let registry = StrategyRegistry::with_defaults();
    let strategies = if strategies.is_empty() {
        registry.names().into_iter().map(str::to_string).collect()
    } else {
        for name in &strategies {
            registry.create(name, &HashMap::new())?;
        }
        strategies
    };

    let mut grid = SweepGrid::with_strategies(strategies, &settings.high_divisibility_sector);
    if !crypto.is_empty() {
        grid.crypto = crypto;
    }
    let combinations = grid.combinations();
    let start = Utc::now().date_naive() - Duration::days(settings.max_history_days);
    let deposit = initial_deposit.unwrap_or(DEFAULT_INITIAL_DEPOSIT);
    info!(
        "Preparing {} sweep portfolios with {} deposited on {}",
        combinations.len(),
        deposit,
        start
    );
    let tasks = prepare_portfolios(&db, &combinations, deposit, start).await?;

    let workers = workers.unwrap_or_else(default_workers);
    let database_url = app.database_url()?.to_string();
    let connect = move || {
        let database_url = database_url.clone();
        async move {
            let db = retry_db_operation!("sweep worker connection", Database::new(&database_url))?;
            Ok::<_, anyhow::Error>(Arc::new(db))
        }
    };
    let mut results =
        tokio::task::spawn_blocking(move || run_sweep(tasks, workers, &settings, connect)).await??;

    let failed = results.iter().filter(|r| r.error.is_some()).count();
    if failed > 0 {
        warn!("{} sweep portfolio(s) failed", failed);
    }
    results.sort_by(|a, b| {
        let roi = |r: &SweepResult| r.summary.as_ref().map(|s| s.final_roi);
        roi(b).cmp(&roi(a))
    });
    for result in &results {
        match (&result.summary, &result.error) {
            (Some(summary), _) => println!(
                "{:>8.2}%  dd {:>6.2}%  {:>5} days  {}",
                summary.final_roi * dec!(100),
                summary.max_drawdown_percent,
                summary.trading_days,
                result.name
            ),
            (None, Some(error)) => println!("   error  {}: {}", result.name, error),
            (None, None) => {}
        }
    }
    Ok(())
}
