use crate::config::SimulationSettings;
use crate::database::Database;
use crate::retry::retry_db_operation;
use anyhow::{anyhow, Result};

#[derive(Clone)]
pub struct AppContext {
    database_url: Option<String>,
}

impl AppContext {
    pub fn new(database_url: Option<String>) -> Self {
        Self { database_url }
    }

    pub fn database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| anyhow!("DATABASE_URL must be set to run simulations."))
    }

    /// Connects, retrying transient failures.
    pub async fn database(&self) -> Result<Database> {
        let database_url = self.database_url()?;
        retry_db_operation!("database connection", Database::new(database_url))
    }

    /// Process-wide settings from the `settings` table, validated.
    pub async fn settings(&self, db: &Database) -> Result<SimulationSettings> {
        let settings = db.get_all_settings().await?;
        Ok(SimulationSettings::from_settings_map(&settings)?)
    }
}
