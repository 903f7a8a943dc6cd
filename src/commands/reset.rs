use crate::context::AppContext;
use crate::simulation::reset_portfolio;
use anyhow::Result;

pub async fn run(app: &AppContext, portfolio_id: i64, full: bool) -> Result<()> {
    let db = app.database().await?;
    reset_portfolio(&db, portfolio_id, full).await
}
