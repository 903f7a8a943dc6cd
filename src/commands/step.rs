use crate::commands::simulate::report;
use crate::context::AppContext;
use crate::simulation::SimulationDriver;
use crate::strategy::StrategyRegistry;
use anyhow::Result;
use log::info;
use rust_decimal_macros::dec;

pub async fn run(app: &AppContext, portfolio_id: i64, days: usize) -> Result<()> {
    let days = days.max(1);
    info!("Stepping portfolio {} by {} day(s)", portfolio_id, days);
    let db = app.database().await?;
    let settings = app.settings(&db).await?;

    let mut driver = SimulationDriver::new(&db, &db, settings, StrategyRegistry::with_defaults());
    let outcome = driver.run(portfolio_id, Some(days)).await?;
    for day in &outcome.days {
        info!(
            "{}: {} planned, {} executed, ROI {:.2}%",
            day.date,
            day.planned,
            day.executed,
            day.snapshot.roi * dec!(100)
        );
    }
    report(&outcome)
}
