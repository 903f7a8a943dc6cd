use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use log::info;
use rust_decimal::Decimal;
use simulator::{
    commands::{invest, reset, simulate, step, sweep},
    context::AppContext,
    sweep::CryptoMode,
};
use std::env;

#[derive(Parser)]
#[command(name = "simulator")]
#[command(about = "Day-stepped portfolio trading simulator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate every remaining trading day of a portfolio
    Simulate {
        portfolio_id: i64,
        /// Stop after this many trading days
        #[arg(long)]
        max_days: Option<usize>,
    },
    /// Advance a portfolio by a few trading days
    Step {
        portfolio_id: i64,
        #[arg(long, default_value_t = 1)]
        days: usize,
    },
    /// Clear a portfolio's simulated history
    Reset {
        portfolio_id: i64,
        /// Also delete the initial deposit
        #[arg(long)]
        full: bool,
    },
    /// Add capital to a portfolio
    Invest {
        portfolio_id: i64,
        amount: Decimal,
        /// Entry date (YYYY-MM-DD), today by default
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Simulate one portfolio per parameter combination in parallel
    Sweep {
        #[arg(long)]
        initial_deposit: Option<Decimal>,
        /// Comma separated strategy names, every registered strategy by default
        #[arg(long, value_delimiter = ',')]
        strategies: Vec<String>,
        /// Comma separated crypto modes (only, no, mixed)
        #[arg(long, value_delimiter = ',')]
        crypto: Vec<CryptoMode>,
        /// Worker threads, one less than the CPU count by default
        #[arg(long)]
        workers: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli { command } = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let app_context = AppContext::new(env::var("DATABASE_URL").ok());
    info!("Starting simulator");

    match command {
        Commands::Simulate {
            portfolio_id,
            max_days,
        } => simulate::run(&app_context, portfolio_id, max_days).await?,
        Commands::Step { portfolio_id, days } => step::run(&app_context, portfolio_id, days).await?,
        Commands::Reset { portfolio_id, full } => {
            reset::run(&app_context, portfolio_id, full).await?
        }
        Commands::Invest {
            portfolio_id,
            amount,
            date,
        } => invest::run(&app_context, portfolio_id, amount, date).await?,
        Commands::Sweep {
            initial_deposit,
            strategies,
            crypto,
            workers,
        } => sweep::run(&app_context, initial_deposit, strategies, crypto, workers).await?,
    }

    Ok(())
}
