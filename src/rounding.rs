//! Fixed-point helpers for money and share quantities.
//!
//! Every call site picks its rounding mode explicitly: ledger debits round up,
//! ledger credits and share counts round down.

use rust_decimal::{Decimal, RoundingStrategy};

/// Cash amounts are recorded with two decimals.
pub const CASH_DECIMALS: u32 = 2;
/// Fractional share granularity for high-divisibility instruments.
pub const FRACTIONAL_SHARE_DECIMALS: u32 = 4;

/// Truncates toward zero at `decimals` places.
pub fn round_down(value: Decimal, decimals: u32) -> Decimal {
    value.round_dp_with_strategy(decimals, RoundingStrategy::ToZero)
}

/// Rounds toward positive infinity at `decimals` places.
pub fn round_up(value: Decimal, decimals: u32) -> Decimal {
    value.round_dp_with_strategy(decimals, RoundingStrategy::ToPositiveInfinity)
}

/// Largest multiple of `step` not exceeding `value` (for non-negative inputs).
pub fn floor_to_multiple(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    value - value % step
}

/// Share count granularity: fractional when the minimum tier is below one share.
pub fn share_decimals(min_reinvest_shares: Decimal) -> u32 {
    if min_reinvest_shares < Decimal::ONE {
        FRACTIONAL_SHARE_DECIMALS
    } else {
        0
    }
}
