//! Coercion of JSON-RPC quantities.
//!
//! Nodes return quantities as `0x` hex strings, but some chains (and some
//! L1 fee fields) use decimal strings or plain JSON numbers.
use serde_json::Value;

/// Wei per native token.
pub const WEI_PER_TOKEN: f64 = 1e18;

/// Parse an integer quantity that fits in a `u64`.
pub fn parse_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64(),
        Value::String(s) => {
            let s = s.trim();
            match strip_hex_prefix(s) {
                Some(digits) if !digits.is_empty() => u64::from_str_radix(digits, 16).ok(),
                Some(_) => None,
                None => s.parse::<u64>().ok(),
            }
        }
        _ => None,
    }
}

pub fn parse_i64(value: &Value) -> Option<i64> {
    parse_u64(value).and_then(|n| i64::try_from(n).ok())
}

/// Parse a quantity as a float, accepting values larger than `u64::MAX`
/// and decimal fractions.
pub fn parse_quantity(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(s) => {
            let s = s.trim();
            match strip_hex_prefix(s) {
                Some(digits) if !digits.is_empty() => parse_hex_f64(digits),
                Some(_) => None,
                None => s.parse::<f64>().ok().filter(|n| n.is_finite()),
            }
        }
        _ => None,
    }
}

fn strip_hex_prefix(s: &str) -> Option<&str> {
    s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))
}

fn parse_hex_f64(digits: &str) -> Option<f64> {
    if let Ok(n) = u128::from_str_radix(digits, 16) {
        return Some(n as f64);
    }

    // Wider than 128 bits: accumulate with precision loss.
    digits.chars().try_fold(0f64, |acc, c| {
        c.to_digit(16).map(|d| acc * 16.0 + d as f64)
    })
}
