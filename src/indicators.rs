//! Technical indicators over a date-ordered price history ending at the evaluation date.
//!
//! Every function takes the bars dated on or before the evaluation date and returns
//! `None` (or a neutral signal) when the window holds too little data.

use crate::models::{BreadthPoint, PriceBar};
use crate::price_cache::slice_range;
use chrono::{Duration, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use statrs::statistics::Statistics;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandReading {
    /// -1 above the upper band, +1 below the lower band, 0 inside.
    pub signal: i8,
    pub last: f64,
    pub mean: f64,
    pub upper: f64,
    pub lower: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakoutReading {
    /// +1 above the range high, -1 below the range low, 0 inside.
    pub signal: i8,
    pub close: f64,
    pub range_high: f64,
    pub range_low: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandlePattern {
    Bullish,
    Bearish,
    None,
}

impl CandlePattern {
    pub fn signal(&self) -> i8 {
        match self {
            CandlePattern::Bullish => 1,
            CandlePattern::Bearish => -1,
            CandlePattern::None => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CandlePattern::Bullish => "bullish",
            CandlePattern::Bearish => "bearish",
            CandlePattern::None => "none",
        }
    }
}

pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

pub fn closes(bars: &[PriceBar]) -> Vec<f64> {
    bars.iter().map(|bar| to_f64(bar.close)).collect()
}

/// Bars within the `days` calendar days ending at `as_of`, inclusive.
fn calendar_window(bars: &[PriceBar], as_of: NaiveDate, days: i64) -> &[PriceBar] {
    slice_range(bars, as_of - Duration::days(days), as_of)
}

/// Exponential moving average with `alpha = 2 / (span + 1)`, seeded with the first price.
pub fn calculate_ema(prices: &[f64], span: usize) -> Vec<f64> {
    if prices.is_empty() {
        return Vec::new();
    }

    let multiplier = 2.0 / (span as f64 + 1.0);
    let mut ema_values = Vec::with_capacity(prices.len());
    ema_values.push(prices[0]);

    for i in 1..prices.len() {
        let ema = (prices[i] * multiplier) + (ema_values[i - 1] * (1.0 - multiplier));
        ema_values.push(ema);
    }

    ema_values
}

/// Mean of the last `period` closes.
pub fn sma(bars: &[PriceBar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period {
        return None;
    }
    let window = &bars[bars.len() - period..];
    Some(window.iter().map(|bar| to_f64(bar.close)).sum::<f64>() / period as f64)
}

/// Volume-weighted average close over the `window_days` calendar days ending at `as_of`.
pub fn vwap(bars: &[PriceBar], as_of: NaiveDate, window_days: i64) -> Option<f64> {
    let window = calendar_window(bars, as_of, window_days);
    let mut weighted = 0.0;
    let mut volume = 0.0;
    for bar in window {
        let bar_volume = bar.volume as f64;
        weighted += to_f64(bar.close) * bar_volume;
        volume += bar_volume;
    }
    if volume <= 0.0 {
        None
    } else {
        Some(weighted / volume)
    }
}

/// Relative strength index from the last `window` daily changes within `2 * window` days.
pub fn rsi(bars: &[PriceBar], as_of: NaiveDate, window: usize) -> Option<f64> {
    if window == 0 {
        return None;
    }
    let prices = closes(calendar_window(bars, as_of, (window * 2) as i64));
    if prices.len() < window + 1 {
        return None;
    }

    let changes: Vec<f64> = prices.windows(2).map(|pair| pair[1] - pair[0]).collect();
    let recent = &changes[changes.len() - window..];
    let avg_gain = recent.iter().map(|c| c.max(0.0)).sum::<f64>() / window as f64;
    let avg_loss = recent.iter().map(|c| (-c).max(0.0)).sum::<f64>() / window as f64;

    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// +1 when the MACD line crosses above its signal line on the latest bar, -1 when it
/// crosses below, 0 otherwise. The lookback covers `3 * long_span` calendar days.
pub fn macd_crossover(
    bars: &[PriceBar],
    as_of: NaiveDate,
    short_span: usize,
    mid_span: usize,
    long_span: usize,
) -> i8 {
    let prices = closes(calendar_window(bars, as_of, (long_span * 3) as i64));
    if prices.len() < long_span.max(2) {
        return 0;
    }

    let mid = calculate_ema(&prices, mid_span);
    let long = calculate_ema(&prices, long_span);
    let macd_line: Vec<f64> = mid.iter().zip(long.iter()).map(|(m, l)| m - l).collect();
    let signal_line = calculate_ema(&macd_line, short_span);

    let n = macd_line.len();
    let (current_macd, prev_macd) = (macd_line[n - 1], macd_line[n - 2]);
    let (current_signal, prev_signal) = (signal_line[n - 1], signal_line[n - 2]);

    if current_macd > current_signal && prev_macd <= prev_signal {
        1
    } else if current_macd < current_signal && prev_macd >= prev_signal {
        -1
    } else {
        0
    }
}

/// Position of the latest close relative to `mean ± k * stdev` of the last `window` closes.
pub fn bollinger(bars: &[PriceBar], window: usize, k: f64) -> Option<BandReading> {
    if window < 2 || bars.len() < window {
        return None;
    }
    let prices = closes(&bars[bars.len() - window..]);
    let last = prices[prices.len() - 1];
    let mean = prices.iter().mean();
    let stdev = prices.iter().population_std_dev();
    if !mean.is_finite() || !stdev.is_finite() {
        return None;
    }
    let upper = mean + k * stdev;
    let lower = mean - k * stdev;
    let signal = if last > upper {
        -1
    } else if last < lower {
        1
    } else {
        0
    };
    Some(BandReading {
        signal,
        last,
        mean,
        upper,
        lower,
    })
}

/// Latest close against the high/low range of the `window` bars before it.
pub fn breakout(bars: &[PriceBar], window: usize) -> Option<BreakoutReading> {
    if window == 0 || bars.len() < window + 1 {
        return None;
    }
    let latest = &bars[bars.len() - 1];
    let range = &bars[bars.len() - 1 - window..bars.len() - 1];
    let range_high = range
        .iter()
        .map(|bar| to_f64(bar.high))
        .fold(f64::NEG_INFINITY, f64::max);
    let range_low = range
        .iter()
        .map(|bar| to_f64(bar.low))
        .fold(f64::INFINITY, f64::min);
    let close = to_f64(latest.close);
    let signal = if close > range_high {
        1
    } else if close < range_low {
        -1
    } else {
        0
    };
    Some(BreakoutReading {
        signal,
        close,
        range_high,
        range_low,
    })
}

/// Two-candle engulfing pattern among the bars of the last `lookback_days` days.
pub fn engulfing(bars: &[PriceBar], as_of: NaiveDate, lookback_days: i64) -> CandlePattern {
    let window = calendar_window(bars, as_of, lookback_days);
    if window.len() < 2 {
        return CandlePattern::None;
    }
    let previous = &window[window.len() - 2];
    let current = &window[window.len() - 1];

    let previous_bearish = previous.close < previous.open;
    let previous_bullish = previous.close > previous.open;
    let current_bullish = current.close > current.open;
    let current_bearish = current.close < current.open;

    if previous_bearish
        && current_bullish
        && current.open <= previous.close
        && current.close >= previous.open
    {
        CandlePattern::Bullish
    } else if previous_bullish
        && current_bearish
        && current.open >= previous.close
        && current.close <= previous.open
    {
        CandlePattern::Bearish
    } else {
        CandlePattern::None
    }
}

/// True when the cumulative advance/decline line sits below its `period`-day mean on `date`.
pub fn breadth_below_average(points: &[BreadthPoint], date: NaiveDate, period: usize) -> bool {
    if period == 0 {
        return false;
    }
    let Some(target) = points.iter().position(|point| point.date == date) else {
        return false;
    };
    if target + 1 < period {
        return false;
    }

    let mut line = Vec::with_capacity(target + 1);
    let mut cumulative = 0i64;
    for point in &points[..=target] {
        cumulative += point.advancing - point.declining;
        line.push(cumulative as f64);
    }
    let average = line[line.len() - period..].iter().sum::<f64>() / period as f64;
    line[target] < average
}

/// `final / initial - 1`, or zero when the initial value is not positive.
pub fn cumulative_return(initial: Decimal, final_value: Decimal) -> Decimal {
    if initial <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    final_value / initial - Decimal::ONE
}
