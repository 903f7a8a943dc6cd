//! Parameter sweeps: one simulated portfolio per grid combination, simulated on a
//! bounded pool of worker threads.

use crate::config::{PortfolioConfig, SimulationSettings, INITIAL_DEPOSIT_DESCRIPTION};
use crate::engine::StrategyEngine;
use crate::models::Portfolio;
use crate::performance::RunSummary;
use crate::simulation::{contribute, SimulationDriver};
use crate::store::{MarketDataSource, PortfolioStore};
use crate::strategy::StrategyRegistry;
use anyhow::{anyhow, bail, Result};
use chrono::NaiveDate;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const DEFAULT_INITIAL_DEPOSIT: Decimal = dec!(1200);

/// One less than the number of CPUs, at least one.
pub fn default_workers() -> usize {
    num_cpus::get().saturating_sub(1).max(1)
}

/// Fixed-size pool of OS threads fed through a bounded queue.
///
/// `submit` blocks while the queue is full; `join` waits for every submitted task and
/// returns the results in submission order.
pub struct WorkerPool<T, R> {
    tasks: Sender<(usize, T)>,
    results: Receiver<(usize, R)>,
    handles: Vec<JoinHandle<()>>,
    submitted: usize,
}

impl<T: Send + 'static, R: Send + 'static> WorkerPool<T, R> {
    /// `factory` runs once on each worker thread and returns that worker's task handler.
    pub fn new<F, W>(workers: usize, capacity: usize, factory: F) -> Self
    where
        F: Fn(usize) -> W + Send + Sync + 'static,
        W: FnMut(T) -> R,
    {
        let workers = workers.max(1);
        let (tx, rx): (Sender<(usize, T)>, Receiver<(usize, T)>) = bounded(capacity.max(1));
        let (result_tx, result_rx): (Sender<(usize, R)>, Receiver<(usize, R)>) = unbounded();
        let factory = Arc::new(factory);

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let rx = rx.clone();
            let result_tx = result_tx.clone();
            let factory = Arc::clone(&factory);
            let handle = thread::spawn(move || {
                let mut work = factory(worker_id);
                while let Ok((index, task)) = rx.recv() {
                    if result_tx.send((index, work(task))).is_err() {
                        break;
                    }
                }
            });
            handles.push(handle);
        }

        Self {
            tasks: tx,
            results: result_rx,
            handles,
            submitted: 0,
        }
    }

    pub fn submit(&mut self, task: T) -> Result<()> {
        self.tasks
            .send((self.submitted, task))
            .map_err(|_| anyhow!("all workers have exited"))?;
        self.submitted += 1;
        Ok(())
    }

    pub fn submitted(&self) -> usize {
        self.submitted
    }

    pub fn join(self) -> Result<Vec<R>> {
        let Self {
            tasks,
            results,
            handles,
            submitted,
        } = self;
        drop(tasks);

        let pb = ProgressBar::new(submitted as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        let mut slots: Vec<Option<R>> = (0..submitted).map(|_| None).collect();
        let mut completed = 0;
        while completed < submitted {
            match results.recv_timeout(Duration::from_millis(200)) {
                Ok((index, result)) => {
                    slots[index] = Some(result);
                    completed += 1;
                    pb.set_position(completed as u64);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("Result channel closed unexpectedly. Some results may be lost.");
                    break;
                }
            }
        }
        pb.finish_with_message("Sweep completed");

        for handle in handles {
            if handle.join().is_err() {
                warn!("A worker thread panicked");
            }
        }
        if completed < submitted {
            bail!(
                "{} of {} tasks finished without a result",
                submitted - completed,
                submitted
            );
        }
        Ok(slots.into_iter().flatten().collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoMode {
    /// Only the crypto sector is tradeable.
    Only,
    /// The crypto sector is excluded.
    No,
    Mixed,
}

impl CryptoMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CryptoMode::Only => "only",
            CryptoMode::No => "no",
            CryptoMode::Mixed => "mixed",
        }
    }
}

impl fmt::Display for CryptoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CryptoMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "only" => Ok(CryptoMode::Only),
            "no" => Ok(CryptoMode::No),
            "mixed" => Ok(CryptoMode::Mixed),
            other => Err(anyhow!("Unknown crypto mode: {}", other)),
        }
    }
}

/// Values swept per portfolio option. Every combination becomes one portfolio.
#[derive(Debug, Clone)]
pub struct SweepGrid {
    pub reserve_cash_percent: Vec<Decimal>,
    pub reinvest_period_days: Vec<i64>,
    pub reinvest_amount: Vec<Decimal>,
    pub bank_threshold: Vec<Decimal>,
    pub crypto: Vec<CryptoMode>,
    pub max_exposure_percent: Vec<Decimal>,
    pub strategies: Vec<String>,
    pub crypto_sector: String,
}

impl SweepGrid {
    pub fn with_strategies(strategies: Vec<String>, crypto_sector: &str) -> Self {
        Self {
            reserve_cash_percent: vec![dec!(1)],
            reinvest_period_days: vec![3650],
            reinvest_amount: vec![dec!(100)],
            bank_threshold: vec![dec!(1000)],
            crypto: vec![CryptoMode::Only, CryptoMode::No],
            max_exposure_percent: vec![dec!(75)],
            strategies,
            crypto_sector: crypto_sector.to_string(),
        }
    }

    pub fn combinations(&self) -> Vec<SweepCombination> {
        let mut combinations = Vec::new();
        for reserve in &self.reserve_cash_percent {
            for period in &self.reinvest_period_days {
                for amount in &self.reinvest_amount {
                    for threshold in &self.bank_threshold {
                        for crypto in &self.crypto {
                            for exposure in &self.max_exposure_percent {
                                for strategy in &self.strategies {
                                    let mut config = PortfolioConfig {
                                        reserve_cash_percent: *reserve,
                                        reinvest_period_days: *period,
                                        reinvest_amount: *amount,
                                        bank_threshold: *threshold,
                                        max_exposure_percent: *exposure,
                                        ..PortfolioConfig::default()
                                    };
                                    match crypto {
                                        CryptoMode::Only => {
                                            config.allowed_sectors = vec![self.crypto_sector.clone()]
                                        }
                                        CryptoMode::No => {
                                            config.forbidden_sectors =
                                                vec![self.crypto_sector.clone()]
                                        }
                                        CryptoMode::Mixed => {}
                                    }
                                    combinations.push(SweepCombination {
                                        strategy: strategy.clone(),
                                        crypto: *crypto,
                                        config,
                                    });
                                }
                            }
                        }
                    }
                }
            }
        }
        combinations
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SweepCombination {
    pub strategy: String,
    pub crypto: CryptoMode,
    pub config: PortfolioConfig,
}

impl SweepCombination {
    pub fn label(&self) -> String {
        format!(
            "{} reserve={} period={} amount={} threshold={} crypto={} exposure={}",
            self.strategy,
            self.config.reserve_cash_percent,
            self.config.reinvest_period_days,
            self.config.reinvest_amount,
            self.config.bank_threshold,
            self.crypto,
            self.config.max_exposure_percent
        )
    }

    pub fn portfolio_name(&self) -> String {
        format!("Parameter Search {}", self.label())
    }
}

#[derive(Debug, Clone)]
pub struct SweepTask {
    pub portfolio_id: i64,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct SweepResult {
    pub portfolio_id: i64,
    pub name: String,
    pub summary: Option<RunSummary>,
    pub error: Option<String>,
}

impl SweepResult {
    fn failed(task: SweepTask, error: String) -> Self {
        Self {
            portfolio_id: task.portfolio_id,
            name: task.name,
            summary: None,
            error: Some(error),
        }
    }
}

/// Creates or resets one simulated portfolio per combination and seeds its deposit.
pub async fn prepare_portfolios(
    store: &dyn PortfolioStore,
    combinations: &[SweepCombination],
    initial_deposit: Decimal,
    start: NaiveDate,
) -> Result<Vec<SweepTask>> {
    let mut tasks = Vec::with_capacity(combinations.len());
    for combination in combinations {
        let name = combination.portfolio_name();
        let existing = store.portfolio_by_name(&name).await?;
        let portfolio = Portfolio {
            id: existing.as_ref().map(|p| p.id).unwrap_or(0),
            name: name.clone(),
            owner: existing.and_then(|p| p.owner),
            strategy: combination.strategy.clone(),
            strategy_parameters: HashMap::new(),
            config: combination.config.clone(),
            is_active: true,
            is_simulated: true,
        };
        let portfolio_id = store.save_portfolio(&portfolio).await?;
        if portfolio.id != 0 {
            store.reset_portfolio(portfolio_id, true).await?;
        }
        contribute(store, portfolio_id, initial_deposit, start).await?;
        info!("Prepared portfolio {}: {}", portfolio_id, name);
        tasks.push(SweepTask { portfolio_id, name });
    }
    Ok(tasks)
}

/// Simulates every task to completion. Each worker opens its own store through
/// `connect` and keeps one strategy engine for all the portfolios it runs.
pub fn run_sweep<S, F, Fut>(
    tasks: Vec<SweepTask>,
    workers: usize,
    settings: &SimulationSettings,
    connect: F,
) -> Result<Vec<SweepResult>>
where
    S: MarketDataSource + PortfolioStore + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Arc<S>>>,
{
    if tasks.is_empty() {
        return Ok(Vec::new());
    }
    let workers = workers.max(1).min(tasks.len());
    info!("Simulating {} portfolios on {} workers", tasks.len(), workers);

    let settings = settings.clone();
    let mut pool = WorkerPool::new(workers, workers, move |worker_id| {
        let connected = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| format!("failed to start runtime: {}", err))
            .and_then(|runtime| match runtime.block_on(connect()) {
                Ok(store) => Ok((runtime, store)),
                Err(err) => Err(format!("failed to connect: {:#}", err)),
            });
        if let Err(err) = &connected {
            warn!("Worker {} has no store: {}", worker_id, err);
        }
        let settings = settings.clone();
        let mut engine = Some(StrategyEngine::new(StrategyRegistry::with_defaults(), &settings));

        move |task: SweepTask| {
            let (runtime, store) = match &connected {
                Ok(pair) => pair,
                Err(err) => return SweepResult::failed(task, err.clone()),
            };
            let start_time = Instant::now();
            let reused = engine
                .take()
                .unwrap_or_else(|| StrategyEngine::new(StrategyRegistry::with_defaults(), &settings));
            let mut driver = SimulationDriver::with_engine(
                store.as_ref(),
                store.as_ref(),
                settings.clone(),
                reused,
            );
            let outcome = runtime.block_on(driver.run(task.portfolio_id, None));
            engine = Some(driver.into_engine());

            match outcome {
                Ok(outcome) => {
                    info!(
                        "Worker {} finished {} in {:.1}s. ROI: {:.2}%, Max DD: {:.2}%, Days: {}",
                        worker_id,
                        task.name,
                        start_time.elapsed().as_secs_f64(),
                        outcome.summary.final_roi * dec!(100),
                        outcome.summary.max_drawdown_percent,
                        outcome.summary.trading_days
                    );
                    SweepResult {
                        portfolio_id: task.portfolio_id,
                        name: task.name,
                        summary: Some(outcome.summary),
                        error: None,
                    }
                }
                Err(err) => {
                    warn!("Worker {} failed {}: {:#}", worker_id, task.name, err);
                    SweepResult::failed(task, format!("{:#}", err))
                }
            }
        }
    });

    for task in tasks {
        pool.submit(task)?;
    }
    pool.join()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;

    #[test]
    fn pool_returns_results_in_submission_order() {
        let mut pool = WorkerPool::new(3, 2, |_| {
            |value: u64| {
                thread::sleep(Duration::from_millis((10 - value) * 3));
                value * value
            }
        });
        for value in 0..10 {
            pool.submit(value).unwrap();
        }
        assert_eq!(pool.submitted(), 10);
        let results = pool.join().unwrap();
        assert_eq!(results, (0..10).map(|v| v * v).collect::<Vec<_>>());
    }

    #[test]
    fn single_worker_drains_a_full_queue() {
        let mut pool = WorkerPool::new(1, 1, |worker_id| move |task: usize| (worker_id, task));
        for task in 0..5 {
            pool.submit(task).unwrap();
        }
        let results = pool.join().unwrap();
        assert_eq!(results, vec![(0, 0), (0, 1), (0, 2), (0, 3), (0, 4)]);
    }

    #[test]
    fn empty_pool_joins_immediately() {
        let pool: WorkerPool<u8, u8> = WorkerPool::new(2, 2, |_| |task: u8| task);
        assert!(pool.join().unwrap().is_empty());
    }

    #[test]
    fn default_grid_expands_crypto_modes_per_strategy() {
        let grid = SweepGrid::with_strategies(
            vec!["rsi".to_string(), "macd".to_string()],
            "Cryptocurrency",
        );
        let combinations = grid.combinations();
        assert_eq!(combinations.len(), 4);

        let only = &combinations[0];
        assert_eq!(only.strategy, "rsi");
        assert_eq!(only.crypto, CryptoMode::Only);
        assert_eq!(only.config.allowed_sectors, vec!["Cryptocurrency"]);
        assert_eq!(only.config.reinvest_period_days, 3650);
        assert_eq!(only.config.max_exposure_percent, dec!(75));

        let no = &combinations[3];
        assert_eq!(no.strategy, "macd");
        assert_eq!(no.crypto, CryptoMode::No);
        assert_eq!(no.config.forbidden_sectors, vec!["Cryptocurrency"]);
        assert!(no.config.allowed_sectors.is_empty());

        let mut names: Vec<String> = combinations.iter().map(|c| c.portfolio_name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 4);
        assert!(names.iter().all(|name| name.starts_with("Parameter Search ")));
    }

    #[test]
    fn crypto_mode_parses() {
        assert_eq!("Only".parse::<CryptoMode>().unwrap(), CryptoMode::Only);
        assert_eq!(" mixed ".parse::<CryptoMode>().unwrap(), CryptoMode::Mixed);
        assert!("sometimes".parse::<CryptoMode>().is_err());
    }

    #[tokio::test]
    async fn preparing_twice_reuses_and_resets_portfolios() {
        let store = MemoryStore::new();
        let grid = SweepGrid::with_strategies(vec!["rsi".to_string()], "Cryptocurrency");
        let combinations = grid.combinations();
        let start = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();

        let first = prepare_portfolios(&store, &combinations, dec!(1200), start)
            .await
            .unwrap();
        let second = prepare_portfolios(&store, &combinations, dec!(1200), start)
            .await
            .unwrap();

        assert_eq!(first.len(), 2);
        let first_ids: Vec<i64> = first.iter().map(|t| t.portfolio_id).collect();
        let second_ids: Vec<i64> = second.iter().map(|t| t.portfolio_id).collect();
        assert_eq!(first_ids, second_ids);
        for task in &second {
            let totals = store.cash_totals(task.portfolio_id, start).await.unwrap();
            assert_eq!(totals.cash, dec!(1200));
            assert_eq!(totals.invest, dec!(1200));
            let entries = store.cash_entries(task.portfolio_id).await.unwrap();
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].description, INITIAL_DEPOSIT_DESCRIPTION);
        }
    }

    #[test]
    fn sweep_runs_every_task_through_its_own_worker_store() {
        let store = Arc::new(MemoryStore::new());
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let grid = SweepGrid::with_strategies(vec!["rsi".to_string()], "Cryptocurrency");
        let start = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let tasks = runtime
            .block_on(prepare_portfolios(
                store.as_ref(),
                &grid.combinations(),
                dec!(1200),
                start,
            ))
            .unwrap();

        let shared = Arc::clone(&store);
        let results = run_sweep(tasks.clone(), 2, &SimulationSettings::default(), move || {
            let store = Arc::clone(&shared);
            async move { Ok(store) }
        })
        .unwrap();

        assert_eq!(results.len(), tasks.len());
        for (task, result) in tasks.iter().zip(&results) {
            assert_eq!(task.portfolio_id, result.portfolio_id);
            assert!(result.error.is_none(), "{:?}", result.error);
            assert!(result.summary.is_some());
        }
    }

    #[test]
    fn failed_connections_surface_as_task_errors() {
        let tasks = vec![SweepTask {
            portfolio_id: 1,
            name: "unreachable".to_string(),
        }];
        let results = run_sweep(tasks, 1, &SimulationSettings::default(), || async {
            Err::<Arc<MemoryStore>, _>(anyhow!("connection refused"))
        })
        .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].summary.is_none());
        assert!(results[0]
            .error
            .as_deref()
            .unwrap()
            .contains("connection refused"));
    }
}
