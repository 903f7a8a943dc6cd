//! Turns ranked recommendations into sized trade actions under the portfolio's cash,
//! exposure and holding-period constraints.
//!
//! Planning runs three passes over the same ranked list: rebalancing over-exposed
//! holdings, exiting on SELL, then entering or adding on BUY. Investable cash carries
//! from one pass to the next, so proceeds from the first two fund the third.

use crate::config::PortfolioConfig;
use crate::models::*;
use crate::rounding::{round_down, share_decimals};
use chrono::NaiveDate;
use log::{debug, warn};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;

/// What the planner needs to know about one instrument.
#[derive(Debug, Clone, Default)]
pub struct InstrumentState {
    pub quantity: Decimal,
    /// Latest close used to value the current holding.
    pub last_price: Option<Decimal>,
    pub holding_met: bool,
    pub high_divisibility: bool,
}

pub struct PlanningContext<'a> {
    pub trade_date: NaiveDate,
    pub cash: Decimal,
    pub position_value: Decimal,
    pub config: &'a PortfolioConfig,
    pub instruments: HashMap<i64, InstrumentState>,
}

impl PlanningContext<'_> {
    pub fn total_value(&self) -> Decimal {
        self.position_value + self.cash
    }

    pub fn reserve_cash(&self) -> Decimal {
        self.config.reserve_cash_percent / dec!(100) * self.total_value()
    }

    /// Most any single instrument may be worth.
    pub fn exposure_cap(&self) -> Decimal {
        self.total_value() * self.config.max_exposure_percent / dec!(100)
    }

    fn state(&self, instrument_id: i64) -> InstrumentState {
        self.instruments
            .get(&instrument_id)
            .cloned()
            .unwrap_or(InstrumentState {
                holding_met: true,
                ..InstrumentState::default()
            })
    }
}

/// Minimum share counts for new entries and for adding to or trimming a holding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShareTiers {
    pub min_shares: Decimal,
    pub min_reinvest_shares: Decimal,
}

impl ShareTiers {
    /// Scales with the order of magnitude of the portfolio: `10^floor(log10(total) / 2)`.
    pub fn for_total_value(total_value: Decimal) -> Self {
        let magnitude = total_value
            .to_f64()
            .filter(|value| *value > 0.0)
            .map(|value| (value.log10() / 2.0).floor() as i32);
        let Some(exponent) = magnitude else {
            return Self {
                min_shares: Decimal::ONE,
                min_reinvest_shares: Decimal::ONE,
            };
        };
        let min_shares = power_of_ten(exponent);
        let min_reinvest_shares = (min_shares / dec!(10)).floor().max(Decimal::ONE);
        Self {
            min_shares,
            min_reinvest_shares,
        }
    }

    /// Fixed fractional tiers for instruments that trade in tiny units.
    pub fn high_divisibility() -> Self {
        Self {
            min_shares: dec!(0.01),
            min_reinvest_shares: dec!(0.0001),
        }
    }

    pub fn decimals(&self) -> u32 {
        share_decimals(self.min_reinvest_shares)
    }
}

fn power_of_ten(exponent: i32) -> Decimal {
    if exponent >= 0 {
        Decimal::from(10i64.pow(exponent.min(18) as u32))
    } else {
        Decimal::new(1, exponent.unsigned_abs().min(28))
    }
}

#[derive(Debug, Clone)]
pub struct TradePlan {
    pub actions: Vec<Action>,
    pub tiers: ShareTiers,
    pub exposure_cap: Decimal,
    /// Investable cash left after the last pass.
    pub remaining_cash: Decimal,
}

/// Plans the day's trades. `recommendations` must already be ranked.
pub fn plan_trades(ctx: &PlanningContext<'_>, recommendations: &[Recommendation]) -> TradePlan {
    let tiers = ShareTiers::for_total_value(ctx.total_value());
    let cap = ctx.exposure_cap();
    let mut investable = ctx.cash - ctx.reserve_cash();
    let mut actions = Vec::new();

    rebalance_pass(ctx, recommendations, tiers, cap, &mut investable, &mut actions);
    exit_pass(ctx, recommendations, &mut investable, &mut actions);
    entry_pass(ctx, recommendations, tiers, cap, &mut investable, &mut actions);

    TradePlan {
        actions,
        tiers,
        exposure_cap: cap,
        remaining_cash: investable,
    }
}

fn tiers_for(state: &InstrumentState, portfolio_tiers: ShareTiers) -> ShareTiers {
    if state.high_divisibility {
        ShareTiers::high_divisibility()
    } else {
        portfolio_tiers
    }
}

fn rebalance_pass(
    ctx: &PlanningContext<'_>,
    recommendations: &[Recommendation],
    tiers: ShareTiers,
    cap: Decimal,
    investable: &mut Decimal,
    actions: &mut Vec<Action>,
) {
    if !ctx.config.is_rebalance_month(ctx.trade_date) {
        return;
    }
    for rec in recommendations
        .iter()
        .filter(|rec| rec.action == SignalAction::Hold)
    {
        let state = ctx.state(rec.instrument_id);
        if state.quantity <= Decimal::ZERO {
            continue;
        }
        let Some(last) = rec.last.filter(|price| *price > Decimal::ZERO) else {
            warn!("No price for {} on {}; skipping rebalance", rec.symbol, ctx.trade_date);
            continue;
        };
        if !state.holding_met {
            debug!("{} does not meet the holding period", rec.symbol);
            continue;
        }
        let current = state.quantity * state.last_price.unwrap_or(last);
        let over = current - cap;
        if over <= Decimal::ZERO {
            continue;
        }
        let shares = round_down(over / last, tiers_for(&state, tiers).decimals());
        if shares > Decimal::ZERO && shares <= state.quantity {
            actions.push(Action::new(rec, PortfolioMove::Divest, shares));
            *investable += shares * last;
        }
    }
}

fn exit_pass(
    ctx: &PlanningContext<'_>,
    recommendations: &[Recommendation],
    investable: &mut Decimal,
    actions: &mut Vec<Action>,
) {
    for rec in recommendations
        .iter()
        .filter(|rec| rec.action == SignalAction::Sell)
    {
        let state = ctx.state(rec.instrument_id);
        if state.quantity <= Decimal::ZERO {
            continue;
        }
        let Some(last) = rec.last else {
            warn!("No price for {} on {}; skipping exit", rec.symbol, ctx.trade_date);
            continue;
        };
        if !state.holding_met {
            debug!("{} does not meet the holding period", rec.symbol);
            continue;
        }
        actions.push(Action::new(rec, PortfolioMove::Exit, state.quantity));
        *investable += state.quantity * last;
    }
}

fn entry_pass(
    ctx: &PlanningContext<'_>,
    recommendations: &[Recommendation],
    portfolio_tiers: ShareTiers,
    cap: Decimal,
    investable: &mut Decimal,
    actions: &mut Vec<Action>,
) {
    for rec in recommendations
        .iter()
        .filter(|rec| rec.action == SignalAction::Buy)
    {
        let state = ctx.state(rec.instrument_id);
        let Some(last) = rec.last.filter(|price| *price > Decimal::ZERO) else {
            warn!("No price for {} on {}; skipping entry", rec.symbol, ctx.trade_date);
            continue;
        };
        let current = state.quantity * state.last_price.unwrap_or(last);
        if current > cap || *investable <= Decimal::ZERO {
            continue;
        }

        let tiers = tiers_for(&state, portfolio_tiers);
        let allowed = (cap - current).min(*investable);
        let shares = round_down(allowed / last, tiers.decimals());
        let portfolio_move = if current.is_zero() {
            if shares < tiers.min_shares {
                debug!(
                    "{}: {} shares is below the {} share minimum",
                    rec.symbol, shares, tiers.min_shares
                );
                continue;
            }
            PortfolioMove::Enter
        } else {
            PortfolioMove::Invest
        };
        if shares > Decimal::ZERO {
            actions.push(Action::new(rec, portfolio_move, shares));
            *investable -= shares * last;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn january(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn rec(id: i64, action: SignalAction, last: Option<Decimal>, strength: f64) -> Recommendation {
        Recommendation {
            instrument_id: id,
            symbol: format!("S{}", id),
            action,
            last,
            strategy: "test".to_string(),
            strength,
            info: Value::Null,
            as_of: january(10),
        }
    }

    fn held(quantity: Decimal, price: Decimal, holding_met: bool) -> InstrumentState {
        InstrumentState {
            quantity,
            last_price: Some(price),
            holding_met,
            high_divisibility: false,
        }
    }

    fn context(config: &PortfolioConfig, cash: Decimal, position_value: Decimal) -> PlanningContext<'_> {
        PlanningContext {
            trade_date: january(10),
            cash,
            position_value,
            config,
            instruments: HashMap::new(),
        }
    }

    #[test]
    fn share_tiers_scale_with_portfolio_size() {
        let zero = ShareTiers::for_total_value(Decimal::ZERO);
        assert_eq!((zero.min_shares, zero.min_reinvest_shares), (dec!(1), dec!(1)));
        let small = ShareTiers::for_total_value(dec!(1200));
        assert_eq!((small.min_shares, small.min_reinvest_shares), (dec!(10), dec!(1)));
        let large = ShareTiers::for_total_value(dec!(1000000));
        assert_eq!((large.min_shares, large.min_reinvest_shares), (dec!(1000), dec!(100)));
        let tiny = ShareTiers::for_total_value(dec!(0.5));
        assert_eq!((tiny.min_shares, tiny.min_reinvest_shares), (dec!(0.1), dec!(1)));
        assert_eq!(large.decimals(), 0);
        assert_eq!(ShareTiers::high_divisibility().decimals(), 4);
    }

    #[test]
    fn holding_period_blocks_sells_and_rebalances() {
        let mut config = PortfolioConfig::default();
        config.reserve_cash_percent = Decimal::ZERO;
        let mut ctx = context(&config, dec!(100), dec!(1000));
        ctx.instruments.insert(1, held(dec!(10), dec!(100), false));
        ctx.instruments.insert(2, held(dec!(10), dec!(0), false));
        let recs = vec![
            rec(1, SignalAction::Hold, Some(dec!(100)), 0.0),
            rec(2, SignalAction::Sell, Some(dec!(1)), 0.5),
        ];
        assert!(plan_trades(&ctx, &recs).actions.is_empty());

        ctx.instruments.insert(2, held(dec!(10), dec!(1), true));
        let plan = plan_trades(&ctx, &recs);
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].portfolio_move, PortfolioMove::Exit);
        assert_eq!(plan.actions[0].shares, dec!(10));
    }

    #[test]
    fn rebalance_brings_position_back_under_the_cap() {
        let config = PortfolioConfig::default();
        let mut ctx = context(&config, dec!(100), dec!(1000));
        ctx.instruments.insert(1, held(dec!(10), dec!(100), true));
        let recs = vec![rec(1, SignalAction::Hold, Some(dec!(100)), 0.0)];

        let plan = plan_trades(&ctx, &recs);
        assert_eq!(plan.exposure_cap, dec!(220));
        assert_eq!(plan.actions.len(), 1);
        let divest = &plan.actions[0];
        assert_eq!(divest.portfolio_move, PortfolioMove::Divest);
        assert_eq!(divest.action, SignalAction::Sell);
        assert_eq!(divest.shares, dec!(7));
        let remaining_value = (dec!(10) - divest.shares) * dec!(100);
        assert!(remaining_value <= plan.exposure_cap + dec!(100));
        // 45 investable after the 55 reserve, plus 700 of proceeds.
        assert_eq!(plan.remaining_cash, dec!(745));
    }

    #[test]
    fn rebalance_waits_for_a_rebalance_month() {
        let config = PortfolioConfig::default();
        let mut ctx = context(&config, dec!(100), dec!(1000));
        ctx.trade_date = NaiveDate::from_ymd_opt(2024, 2, 10).unwrap();
        ctx.instruments.insert(1, held(dec!(10), dec!(100), true));
        let recs = vec![rec(1, SignalAction::Hold, Some(dec!(100)), 0.0)];
        assert!(plan_trades(&ctx, &recs).actions.is_empty());
    }

    #[test]
    fn entries_below_the_minimum_share_tier_are_skipped() {
        let config = PortfolioConfig::default();
        let ctx = context(&config, dec!(10000), Decimal::ZERO);

        let plan = plan_trades(&ctx, &[rec(1, SignalAction::Buy, Some(dec!(50)), 1.0)]);
        assert_eq!(plan.tiers.min_shares, dec!(100));
        assert!(plan.actions.is_empty());

        let plan = plan_trades(&ctx, &[rec(1, SignalAction::Buy, Some(dec!(10)), 1.0)]);
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].portfolio_move, PortfolioMove::Enter);
        assert_eq!(plan.actions[0].shares, dec!(200));
    }

    #[test]
    fn exit_proceeds_fund_later_entries() {
        let mut config = PortfolioConfig::default();
        config.reserve_cash_percent = Decimal::ZERO;
        config.max_exposure_percent = dec!(100);
        let mut ctx = context(&config, Decimal::ZERO, dec!(100));
        ctx.instruments.insert(1, held(dec!(10), dec!(10), true));
        let recs = vec![
            rec(2, SignalAction::Buy, Some(dec!(10)), 0.9),
            rec(1, SignalAction::Sell, Some(dec!(10)), 0.1),
        ];

        let plan = plan_trades(&ctx, &recs);
        let moves: Vec<PortfolioMove> = plan.actions.iter().map(|a| a.portfolio_move).collect();
        assert_eq!(moves, vec![PortfolioMove::Exit, PortfolioMove::Enter]);
        assert_eq!(plan.actions[1].shares, dec!(10));
        assert_eq!(plan.remaining_cash, Decimal::ZERO);
    }

    #[test]
    fn stronger_buys_are_funded_first() {
        let mut config = PortfolioConfig::default();
        config.reserve_cash_percent = Decimal::ZERO;
        config.max_exposure_percent = dec!(60);
        let ctx = context(&config, dec!(100), Decimal::ZERO);
        let recs = vec![
            rec(1, SignalAction::Buy, Some(dec!(1)), 0.9),
            rec(2, SignalAction::Buy, Some(dec!(1)), 0.5),
        ];
        let plan = plan_trades(&ctx, &recs);
        let shares: Vec<Decimal> = plan.actions.iter().map(|a| a.shares).collect();
        assert_eq!(shares, vec![dec!(60), dec!(40)]);
    }

    #[test]
    fn adding_to_a_holding_is_an_invest_move() {
        let mut config = PortfolioConfig::default();
        config.reserve_cash_percent = Decimal::ZERO;
        let mut ctx = context(&config, dec!(900), dec!(100));
        ctx.instruments.insert(1, held(dec!(10), dec!(10), true));
        let plan = plan_trades(&ctx, &[rec(1, SignalAction::Buy, Some(dec!(10)), 0.5)]);
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].portfolio_move, PortfolioMove::Invest);
        assert_eq!(plan.actions[0].shares, dec!(10));

        let mut capped = context(&config, dec!(100), dec!(900));
        capped.instruments.insert(1, held(dec!(90), dec!(10), true));
        assert!(plan_trades(&capped, &[rec(1, SignalAction::Buy, Some(dec!(10)), 0.5)])
            .actions
            .is_empty());
    }

    #[test]
    fn high_divisibility_instruments_trade_fractions() {
        let plan_with_exposure = |max_exposure_percent: Decimal| {
            let config = PortfolioConfig {
                reserve_cash_percent: Decimal::ZERO,
                max_exposure_percent,
                ..PortfolioConfig::default()
            };
            let mut ctx = context(&config, dec!(1000), Decimal::ZERO);
            ctx.instruments.insert(
                1,
                InstrumentState {
                    holding_met: true,
                    high_divisibility: true,
                    ..InstrumentState::default()
                },
            );
            plan_trades(&ctx, &[rec(1, SignalAction::Buy, Some(dec!(30000)), 1.0)])
        };

        // 200 buys 0.0066 units, under the 0.01 entry minimum.
        assert!(plan_with_exposure(dec!(20)).actions.is_empty());

        let plan = plan_with_exposure(dec!(100));
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].shares, dec!(0.0333));
    }

    #[test]
    fn candidates_without_a_price_are_skipped() {
        let config = PortfolioConfig::default();
        let mut ctx = context(&config, dec!(10000), dec!(100));
        ctx.instruments.insert(1, held(dec!(10), dec!(10), true));
        let recs = vec![
            rec(1, SignalAction::Sell, None, 1.0),
            rec(2, SignalAction::Buy, None, 1.0),
        ];
        assert!(plan_trades(&ctx, &recs).actions.is_empty());
    }
}
