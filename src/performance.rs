use crate::indicators::{cumulative_return, to_f64};
use crate::models::*;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use statrs::statistics::Statistics;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunSummary {
    pub portfolio_id: i64,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub trading_days: usize,
    pub final_value: Decimal,
    /// Complete ROI of the last snapshot, as a fraction.
    pub final_roi: Decimal,
    pub max_drawdown: f64,
    pub max_drawdown_percent: f64,
    /// Standard deviation of daily total-value returns.
    pub daily_volatility: f64,
    pub benchmark_rating: i32,
}

struct DrawdownInfo {
    max_drawdown: f64,
    max_drawdown_percent: f64,
}

pub struct PerformanceCalculator;

impl PerformanceCalculator {
    /// `(banked + position value + cash) / invested - 1`, zero with nothing invested.
    pub fn complete_roi(
        banked: Decimal,
        position_value: Decimal,
        cash: Decimal,
        invested: Decimal,
    ) -> Decimal {
        cumulative_return(invested, banked + position_value + cash)
    }

    /// Scores ROI (percent) against each benchmark's cumulative return (percent).
    /// 1 when it beats every benchmark, 0 when it beats some, -1 otherwise.
    /// Benchmarks without data count against a perfect score.
    pub fn rate_against_benchmarks(
        roi_percent: Decimal,
        benchmark_returns_percent: &[Option<Decimal>],
    ) -> i32 {
        let mut score = 0i64;
        for benchmark in benchmark_returns_percent.iter().flatten() {
            if *benchmark > roi_percent {
                score -= 1;
            } else if *benchmark < roi_percent {
                score += 1;
            }
        }
        let count = benchmark_returns_percent.len() as i64;
        if score == count {
            1
        } else if score > 0 && score < count {
            0
        } else {
            -1
        }
    }

    pub fn summarize(portfolio_id: i64, snapshots: &[PerformanceSnapshot]) -> RunSummary {
        let values: Vec<f64> = snapshots.iter().map(|s| to_f64(s.total_value())).collect();
        let drawdown = Self::calculate_max_drawdown(&values);
        let last = snapshots.last();
        RunSummary {
            portfolio_id,
            first_date: snapshots.first().map(|s| s.date),
            last_date: last.map(|s| s.date),
            trading_days: snapshots.len(),
            final_value: last.map(|s| s.total_value()).unwrap_or_default(),
            final_roi: last.map(|s| s.roi).unwrap_or_default(),
            max_drawdown: drawdown.max_drawdown,
            max_drawdown_percent: drawdown.max_drawdown_percent,
            daily_volatility: Self::calculate_daily_volatility(&values),
            benchmark_rating: last.map(|s| s.benchmark_rating).unwrap_or_default(),
        }
    }

    fn calculate_daily_volatility(values: &[f64]) -> f64 {
        if values.len() < 3 {
            return 0.0;
        }
        let returns: Vec<f64> = values
            .windows(2)
            .map(|window| {
                if window[0] > 0.0 {
                    (window[1] - window[0]) / window[0]
                } else {
                    0.0
                }
            })
            .collect();
        let std_dev = returns.std_dev();
        if std_dev.is_finite() {
            std_dev
        } else {
            0.0
        }
    }

    fn calculate_max_drawdown(values: &[f64]) -> DrawdownInfo {
        let Some(first) = values.first() else {
            return DrawdownInfo {
                max_drawdown: 0.0,
                max_drawdown_percent: 0.0,
            };
        };

        let mut max_drawdown = 0.0;
        let mut max_drawdown_percent = 0.0;
        let mut peak_value = *first;

        for value in values {
            if *value > peak_value {
                peak_value = *value;
            } else {
                let drawdown = peak_value - value;
                let drawdown_percent = if peak_value > 0.0 {
                    (drawdown / peak_value) * 100.0
                } else {
                    0.0
                };
                if drawdown > max_drawdown {
                    max_drawdown = drawdown;
                }
                if drawdown_percent > max_drawdown_percent {
                    max_drawdown_percent = drawdown_percent;
                }
            }
        }

        DrawdownInfo {
            max_drawdown,
            max_drawdown_percent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot(day: u32, cash: Decimal, position_value: Decimal) -> PerformanceSnapshot {
        PerformanceSnapshot {
            portfolio_id: 1,
            date: NaiveDate::from_ymd_opt(2024, 4, day).unwrap(),
            cash,
            banked: Decimal::ZERO,
            invested: dec!(100),
            position_value,
            roi: PerformanceCalculator::complete_roi(Decimal::ZERO, position_value, cash, dec!(100)),
            benchmark_rating: 0,
        }
    }

    #[test]
    fn complete_roi_counts_every_pool() {
        let roi = PerformanceCalculator::complete_roi(dec!(50), dec!(100), dec!(10), dec!(100));
        assert_eq!(roi, dec!(0.6));
        assert_eq!(
            PerformanceCalculator::complete_roi(dec!(1), dec!(1), dec!(1), Decimal::ZERO),
            Decimal::ZERO
        );
    }

    #[test]
    fn benchmark_rating_levels() {
        let rate = PerformanceCalculator::rate_against_benchmarks;
        assert_eq!(rate(dec!(12), &[Some(dec!(5)), Some(dec!(8))]), 1);
        assert_eq!(rate(dec!(6), &[Some(dec!(5)), Some(dec!(8)), Some(dec!(1))]), 0);
        assert_eq!(rate(dec!(6), &[Some(dec!(5)), Some(dec!(8))]), -1);
        assert_eq!(rate(dec!(1), &[Some(dec!(5)), Some(dec!(8))]), -1);
        assert_eq!(rate(dec!(12), &[Some(dec!(5)), None]), 0);
        assert_eq!(rate(dec!(0), &[]), 1);
    }

    #[test]
    fn summary_tracks_drawdown_and_final_state() {
        let snapshots = vec![
            snapshot(1, dec!(100), Decimal::ZERO),
            snapshot(2, dec!(20), dec!(100)),
            snapshot(3, dec!(20), dec!(60)),
            snapshot(4, dec!(20), dec!(110)),
        ];
        let summary = PerformanceCalculator::summarize(1, &snapshots);
        assert_eq!(summary.trading_days, 4);
        assert_eq!(summary.final_value, dec!(130));
        assert_eq!(summary.final_roi, dec!(0.3));
        assert!((summary.max_drawdown - 40.0).abs() < 1e-9);
        assert!((summary.max_drawdown_percent - 100.0 / 3.0).abs() < 1e-9);
        assert!(summary.daily_volatility > 0.0);
    }

    #[test]
    fn empty_history_summarizes_to_zero() {
        let summary = PerformanceCalculator::summarize(9, &[]);
        assert_eq!(summary.trading_days, 0);
        assert_eq!(summary.first_date, None);
        assert_eq!(summary.max_drawdown, 0.0);
        assert_eq!(summary.daily_volatility, 0.0);
    }
}
