use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Extract a parameter as usize with a default value
pub fn get_param_usize(params: &HashMap<String, f64>, key: &str, default: usize) -> usize {
    params
        .get(key)
        .copied()
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v.round() as usize)
        .unwrap_or(default)
}

/// Extract a parameter as f64 with a default value
pub fn get_param_f64(params: &HashMap<String, f64>, key: &str, default: f64) -> f64 {
    params
        .get(key)
        .copied()
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

/// Get a parameter value with a default fallback
pub fn get_param(params: &HashMap<String, f64>, key: &str, default: f64) -> f64 {
    get_param_f64(params, key, default)
}

/// Extract a parameter as a decimal, keeping the default when the value is not representable
pub fn get_param_decimal(params: &HashMap<String, f64>, key: &str, default: Decimal) -> Decimal {
    params
        .get(key)
        .copied()
        .and_then(Decimal::from_f64)
        .unwrap_or(default)
}

/// Collect parameters under `prefix.` with the prefix stripped
pub fn params_with_prefix(params: &HashMap<String, f64>, prefix: &str) -> HashMap<String, f64> {
    let scoped = format!("{}.", prefix);
    params
        .iter()
        .filter_map(|(key, value)| {
            key.strip_prefix(&scoped)
                .map(|rest| (rest.to_string(), *value))
        })
        .collect()
}
