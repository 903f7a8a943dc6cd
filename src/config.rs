use crate::errors::SimulationError;
use crate::param_utils::{get_param, get_param_decimal};
use chrono::Datelike;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub const INITIAL_DEPOSIT_DESCRIPTION: &str = "Initial deposit";
pub const SWEEP_DESCRIPTION: &str = "Reinvest/Bank";

/// Per-portfolio trading options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortfolioConfig {
    pub reserve_cash_percent: Decimal,
    pub reinvest_period_days: i64,
    pub reinvest_amount: Decimal,
    /// ROI in percent above which profit is banked.
    pub bank_threshold: Decimal,
    pub bank_percent: Decimal,
    pub max_exposure_percent: Decimal,
    pub rebalance_months: Vec<u32>,
    pub dividend_only: bool,
    #[serde(default)]
    pub allowed_sectors: Vec<String>,
    #[serde(default)]
    pub forbidden_sectors: Vec<String>,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            reserve_cash_percent: dec!(5),
            reinvest_period_days: 7,
            reinvest_amount: Decimal::ZERO,
            bank_threshold: dec!(10000),
            bank_percent: dec!(33),
            max_exposure_percent: dec!(20),
            rebalance_months: vec![1],
            dividend_only: false,
            allowed_sectors: Vec::new(),
            forbidden_sectors: Vec::new(),
        }
    }
}

impl PortfolioConfig {
    /// Builds a config from a sweep parameter map, falling back to defaults.
    pub fn from_parameters(parameters: &HashMap<String, f64>) -> Self {
        let defaults = Self::default();
        let rebalance_month = get_param(parameters, "rebalanceMonth", 1.0).round();
        Self {
            reserve_cash_percent: get_param_decimal(
                parameters,
                "reserveCashPercent",
                defaults.reserve_cash_percent,
            ),
            reinvest_period_days: get_param(
                parameters,
                "reinvestPeriodDays",
                defaults.reinvest_period_days as f64,
            )
            .round() as i64,
            reinvest_amount: get_param_decimal(parameters, "reinvestAmount", defaults.reinvest_amount),
            bank_threshold: get_param_decimal(parameters, "bankThreshold", defaults.bank_threshold),
            bank_percent: get_param_decimal(parameters, "bankPercent", defaults.bank_percent),
            max_exposure_percent: get_param_decimal(
                parameters,
                "maxExposurePercent",
                defaults.max_exposure_percent,
            ),
            rebalance_months: if (1.0..=12.0).contains(&rebalance_month) {
                vec![rebalance_month as u32]
            } else {
                defaults.rebalance_months
            },
            dividend_only: get_param(parameters, "dividendOnly", 0.0) >= 0.5,
            allowed_sectors: Vec::new(),
            forbidden_sectors: Vec::new(),
        }
    }

    pub fn is_rebalance_month(&self, date: NaiveDate) -> bool {
        self.rebalance_months.contains(&date.month())
    }

    pub fn allows_sector(&self, sector: Option<&str>) -> bool {
        let sector = sector.unwrap_or("");
        if self
            .forbidden_sectors
            .iter()
            .any(|s| s.eq_ignore_ascii_case(sector))
        {
            return false;
        }
        self.allowed_sectors.is_empty()
            || self
                .allowed_sectors
                .iter()
                .any(|s| s.eq_ignore_ascii_case(sector))
    }
}

/// Process-wide knobs read from the `settings` table.
#[derive(Debug, Clone)]
pub struct SimulationSettings {
    pub buy_fee: Decimal,
    pub sell_fee: Decimal,
    pub required_holding_days: i64,
    pub high_divisibility_sector: String,
    pub non_tradeable_sectors: Vec<String>,
    pub max_history_days: i64,
    pub price_lookback_days: i64,
    pub price_cache_capacity: usize,
    pub recommendation_ttl: Duration,
    pub recommendation_cache_capacity: usize,
    pub benchmark_symbols: Vec<String>,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            buy_fee: Decimal::ZERO,
            sell_fee: Decimal::ZERO,
            required_holding_days: 1,
            high_divisibility_sector: "Cryptocurrency".to_string(),
            non_tradeable_sectors: vec!["Cryptocurrency".to_string()],
            max_history_days: 1460,
            price_lookback_days: 4,
            price_cache_capacity: 4096,
            recommendation_ttl: Duration::from_secs(300),
            recommendation_cache_capacity: 16_384,
            benchmark_symbols: Vec::new(),
        }
    }
}

impl SimulationSettings {
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self, SimulationError> {
        let defaults = Self::default();
        let buy_fee = optional_setting_decimal(settings, "BUY_TX_FEE", defaults.buy_fee)?;
        let sell_fee = optional_setting_decimal(settings, "SELL_TX_FEE", defaults.sell_fee)?;
        let required_holding_days = optional_setting_usize(
            settings,
            "REQUIRED_HOLDING_DAYS",
            defaults.required_holding_days as usize,
            0,
        )? as i64;
        let high_divisibility_sector = setting_value(settings, "HIGH_DIVISIBILITY_SECTOR")
            .map(str::to_string)
            .unwrap_or(defaults.high_divisibility_sector);
        let non_tradeable_sectors = setting_value(settings, "NON_TRADEABLE_SECTORS")
            .map(parse_list)
            .unwrap_or(defaults.non_tradeable_sectors);
        let max_history_days = optional_setting_usize(
            settings,
            "MAX_HISTORY_DAYS",
            defaults.max_history_days as usize,
            1,
        )? as i64;
        let price_lookback_days = optional_setting_usize(
            settings,
            "PRICE_LOOKBACK_DAYS",
            defaults.price_lookback_days as usize,
            1,
        )? as i64;
        let price_cache_capacity = optional_setting_usize(
            settings,
            "PRICE_CACHE_CAPACITY",
            defaults.price_cache_capacity,
            1,
        )?;
        let recommendation_ttl = Duration::from_secs(optional_setting_usize(
            settings,
            "RECOMMENDATION_TTL_SECS",
            defaults.recommendation_ttl.as_secs() as usize,
            0,
        )? as u64);
        let recommendation_cache_capacity = optional_setting_usize(
            settings,
            "RECOMMENDATION_CACHE_CAPACITY",
            defaults.recommendation_cache_capacity,
            1,
        )?;
        let benchmark_symbols = setting_value(settings, "BENCHMARK_SYMBOLS")
            .map(parse_list)
            .unwrap_or(defaults.benchmark_symbols);

        if buy_fee < Decimal::ZERO || sell_fee < Decimal::ZERO {
            return Err(SimulationError::InvalidSetting {
                key: "BUY_TX_FEE/SELL_TX_FEE".to_string(),
                reason: "fees must be >= 0".to_string(),
            });
        }

        Ok(Self {
            buy_fee,
            sell_fee,
            required_holding_days,
            high_divisibility_sector,
            non_tradeable_sectors,
            max_history_days,
            price_lookback_days,
            price_cache_capacity,
            recommendation_ttl,
            recommendation_cache_capacity,
            benchmark_symbols,
        })
    }
}

fn setting_value<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

fn optional_setting_decimal(
    settings: &HashMap<String, String>,
    key: &str,
    default: Decimal,
) -> Result<Decimal, SimulationError> {
    let Some(raw) = setting_value(settings, key) else {
        return Ok(default);
    };
    raw.parse::<Decimal>()
        .map_err(|_| SimulationError::InvalidSetting {
            key: key.to_string(),
            reason: format!("must be a decimal number (value: {})", raw),
        })
}

fn optional_setting_usize(
    settings: &HashMap<String, String>,
    key: &str,
    default: usize,
    min: usize,
) -> Result<usize, SimulationError> {
    let Some(raw) = setting_value(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<usize>()
        .map_err(|_| SimulationError::InvalidSetting {
            key: key.to_string(),
            reason: format!("must be a non-negative integer (value: {})", raw),
        })?;
    if value < min {
        return Err(SimulationError::InvalidSetting {
            key: key.to_string(),
            reason: format!("must be >= {} (value: {})", min, raw),
        });
    }
    Ok(value)
}
