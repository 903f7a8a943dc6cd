pub mod cache;
pub mod commands;
pub mod config;
pub mod context;
pub mod database;
pub mod engine;
pub mod errors;
pub mod indicators;
pub mod ledger;
pub mod memory_store;
pub mod models;
pub mod param_utils;
pub mod performance;
pub mod planner;
pub mod price_cache;
pub(crate) mod retry;
pub mod rounding;
pub mod simulation;
pub mod store;
pub mod strategy;
pub mod strategy_utils;
pub mod sweep;
pub mod wallet;
