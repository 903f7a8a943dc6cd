use thiserror::Error;

/// Configuration problems that abort a run outright.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),
    #[error("Instrument with symbol {0} not found in the catalog")]
    MissingInstrument(String),
    #[error("Portfolio {0} not found")]
    MissingPortfolio(i64),
    #[error("Setting {key} is invalid: {reason}")]
    InvalidSetting { key: String, reason: String },
}
