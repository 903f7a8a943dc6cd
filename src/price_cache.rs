use crate::models::PriceBar;
use crate::store::MarketDataSource;
use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use log::debug;
use rust_decimal::Decimal;
use std::collections::HashMap;

struct CachedSeries {
    bars: Vec<PriceBar>,
    loaded_from: NaiveDate,
    loaded_through: NaiveDate,
    last_used: u64,
}

/// Per-instrument, append-only daily bars held in memory for signal computation.
///
/// The cache holds at most `capacity` instruments; inserting beyond that evicts the
/// least recently loaded-or-refreshed series.
pub struct PriceCache {
    capacity: usize,
    series: HashMap<i64, CachedSeries>,
    tick: u64,
}

impl PriceCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            series: HashMap::new(),
            tick: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn contains(&self, instrument_id: i64) -> bool {
        self.series.contains_key(&instrument_id)
    }

    /// Makes sure bars in `[from, through]` are cached, fetching only what is missing.
    pub async fn ensure_loaded(
        &mut self,
        source: &dyn MarketDataSource,
        instrument_id: i64,
        from: NaiveDate,
        through: NaiveDate,
    ) -> Result<()> {
        self.tick += 1;
        let tick = self.tick;

        if let Some(cached) = self.series.get_mut(&instrument_id) {
            cached.last_used = tick;
            if cached.loaded_from <= from && cached.loaded_through >= through {
                return Ok(());
            }
            if cached.loaded_from <= from {
                let fetch_from = cached.loaded_through + Duration::days(1);
                let bars = source
                    .price_range(instrument_id, fetch_from, through)
                    .await
                    .with_context(|| {
                        format!("failed to extend price series for instrument {}", instrument_id)
                    })?;
                append_bars(&mut cached.bars, bars);
                cached.loaded_through = through;
                return Ok(());
            }
        }

        let bars = source
            .price_range(instrument_id, from, through)
            .await
            .with_context(|| format!("failed to load price series for instrument {}", instrument_id))?;
        debug!(
            "Cached {} bars for instrument {} ({} to {})",
            bars.len(),
            instrument_id,
            from,
            through
        );
        self.insert(
            instrument_id,
            CachedSeries {
                bars,
                loaded_from: from,
                loaded_through: through,
                last_used: tick,
            },
        );
        Ok(())
    }

    /// Appends bars newer than the last cached bar; older or duplicate dates are ignored.
    pub fn append(&mut self, instrument_id: i64, bars: Vec<PriceBar>) {
        self.tick += 1;
        let tick = self.tick;
        if let Some(cached) = self.series.get_mut(&instrument_id) {
            cached.last_used = tick;
            if let Some(last) = bars.last() {
                cached.loaded_through = cached.loaded_through.max(last.date);
            }
            append_bars(&mut cached.bars, bars);
            return;
        }
        let (Some(first), Some(last)) = (bars.first(), bars.last()) else {
            return;
        };
        let (loaded_from, loaded_through) = (first.date, last.date);
        let mut ordered = Vec::with_capacity(bars.len());
        append_bars(&mut ordered, bars);
        self.insert(
            instrument_id,
            CachedSeries {
                bars: ordered,
                loaded_from,
                loaded_through,
                last_used: tick,
            },
        );
    }

    /// Every cached bar dated on or before `through`.
    pub fn history(&self, instrument_id: i64, through: NaiveDate) -> &[PriceBar] {
        match self.series.get(&instrument_id) {
            Some(cached) => {
                let end = cached.bars.partition_point(|bar| bar.date <= through);
                &cached.bars[..end]
            }
            None => &[],
        }
    }

    /// Cached bars dated within `[from, to]`.
    pub fn range(&self, instrument_id: i64, from: NaiveDate, to: NaiveDate) -> &[PriceBar] {
        match self.series.get(&instrument_id) {
            Some(cached) => slice_range(&cached.bars, from, to),
            None => &[],
        }
    }

    /// Most recent close at or before `date`, no older than `lookback_days`.
    pub fn closing_price(
        &self,
        instrument_id: i64,
        date: NaiveDate,
        lookback_days: i64,
    ) -> Option<Decimal> {
        let window_start = date - Duration::days(lookback_days - 1);
        self.range(instrument_id, window_start, date)
            .last()
            .map(|bar| bar.close)
    }

    fn insert(&mut self, instrument_id: i64, series: CachedSeries) {
        if !self.series.contains_key(&instrument_id) && self.series.len() >= self.capacity {
            let victim = self
                .series
                .iter()
                .min_by_key(|(_, cached)| cached.last_used)
                .map(|(id, _)| *id);
            if let Some(victim) = victim {
                debug!("Evicting price series for instrument {}", victim);
                self.series.remove(&victim);
            }
        }
        self.series.insert(instrument_id, series);
    }
}

/// Bars within `[from, to]` of a date-ordered slice.
pub fn slice_range(bars: &[PriceBar], from: NaiveDate, to: NaiveDate) -> &[PriceBar] {
    let start = bars.partition_point(|bar| bar.date < from);
    let end = bars.partition_point(|bar| bar.date <= to);
    if start >= end {
        &[]
    } else {
        &bars[start..end]
    }
}

fn append_bars(target: &mut Vec<PriceBar>, bars: Vec<PriceBar>) {
    for bar in bars {
        let newer = target.last().map(|last| bar.date > last.date).unwrap_or(true);
        if newer {
            target.push(bar);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn bar(instrument_id: i64, day: u32, close: Decimal) -> PriceBar {
        PriceBar {
            instrument_id,
            date: date(day),
            open: close,
            high: close,
            low: close,
            close,
            volume: 100,
        }
    }

    #[test]
    fn append_is_ordered_and_ignores_stale_bars() {
        let mut cache = PriceCache::new(8);
        cache.append(1, vec![bar(1, 1, dec!(10)), bar(1, 2, dec!(11))]);
        cache.append(1, vec![bar(1, 2, dec!(99)), bar(1, 4, dec!(12))]);
        let history = cache.history(1, date(31));
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].close, dec!(11));
        assert_eq!(history[2].date, date(4));
    }

    #[test]
    fn closing_price_respects_lookback_window() {
        let mut cache = PriceCache::new(8);
        cache.append(1, vec![bar(1, 1, dec!(10)), bar(1, 4, dec!(12))]);
        assert_eq!(cache.closing_price(1, date(4), 4), Some(dec!(12)));
        assert_eq!(cache.closing_price(1, date(6), 4), Some(dec!(12)));
        assert_eq!(cache.closing_price(1, date(8), 4), None);
        assert_eq!(cache.closing_price(1, date(3), 4), Some(dec!(10)));
        assert_eq!(cache.closing_price(2, date(3), 4), None);
    }

    #[test]
    fn capacity_evicts_least_recently_used_series() {
        let mut cache = PriceCache::new(2);
        cache.append(1, vec![bar(1, 1, dec!(10))]);
        cache.append(2, vec![bar(2, 1, dec!(20))]);
        cache.append(1, vec![bar(1, 2, dec!(11))]);
        cache.append(3, vec![bar(3, 1, dec!(30))]);
        assert_eq!(cache.len(), 2);
        assert!(cache.contains(1));
        assert!(!cache.contains(2));
        assert!(cache.contains(3));
    }

    #[test]
    fn range_is_inclusive() {
        let mut cache = PriceCache::new(2);
        cache.append(
            1,
            (1..=10).map(|day| bar(1, day, Decimal::from(day))).collect(),
        );
        let window = cache.range(1, date(3), date(5));
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].date, date(3));
        assert!(cache.range(1, date(6), date(5)).is_empty());
    }
}
