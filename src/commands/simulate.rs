use crate::context::AppContext;
use crate::simulation::{RunOutcome, SimulationDriver};
use crate::strategy::StrategyRegistry;
use anyhow::Result;
use log::info;

pub async fn run(app: &AppContext, portfolio_id: i64, max_days: Option<usize>) -> Result<()> {
    info!("Received simulate command for portfolio_id={}", portfolio_id);
    let db = app.database().await?;
    let settings = app.settings(&db).await?;

    let mut driver = SimulationDriver::new(&db, &db, settings, StrategyRegistry::with_defaults());
    let outcome = driver.run(portfolio_id, max_days).await?;
    report(&outcome)
}

/// Logs the day counts and prints the run summary as JSON.
pub(crate) fn report(outcome: &RunOutcome) -> Result<()> {
    let executed: usize = outcome.days.iter().map(|day| day.executed).sum();
    info!(
        "Simulated {} day(s) with {} trade(s) for portfolio {}; {} day(s) remaining",
        outcome.days.len(),
        executed,
        outcome.portfolio_id,
        outcome.remaining_dates
    );
    if let Some(checkpoint) = &outcome.checkpoint {
        info!(
            "Checkpoint: {} to {} ({} trading days)",
            checkpoint.first_date, checkpoint.last_date, checkpoint.run_length
        );
    }
    println!("{}", serde_json::to_string_pretty(&outcome.summary)?);
    Ok(())
}
