//! Decimal -> JSON encoding.
//!
//! Decimals serialize as JSON numbers when representable within the
//! double range without precision loss, else as strings of the canonical
//! decimal form. Callers (ultimately the LLM, via the agent prompt) are
//! told to treat either shape as numeric.

use rust_decimal::Decimal;
use std::str::FromStr;

pub fn decimal_to_json(d: Decimal) -> serde_json::Value {
    let normalized = d.normalize();
    let decimal_str = normalized.to_string();

    if let Ok(as_f64) = decimal_str.parse::<f64>() {
        if as_f64.is_finite() {
            // Round-trip through string form rather than rust_decimal's own
            // float conversion, so the precision check only relies on std
            // parsing/formatting, which is guaranteed round-trip-exact.
            if let Ok(roundtrip) = Decimal::from_str(&as_f64.to_string()) {
                if roundtrip == normalized {
                    if let Some(num) = serde_json::Number::from_f64(as_f64) {
                        return serde_json::Value::Number(num);
                    }
                }
            }
        }
    }

    serde_json::Value::String(decimal_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn small_integers_become_numbers() {
        let v = decimal_to_json(Decimal::from_str("237525").unwrap());
        assert_eq!(v, serde_json::json!(237525));
    }

    #[test]
    fn high_precision_decimals_become_strings() {
        // More significant digits than an f64 mantissa can carry losslessly.
        let d = Decimal::from_str("123456789012345678.123456789").unwrap();
        let v = decimal_to_json(d);
        assert!(v.is_string());
    }

    #[test]
    fn negative_and_fractional_values_roundtrip_as_numbers() {
        let v = decimal_to_json(Decimal::from_str("-12.5").unwrap());
        assert_eq!(v, serde_json::json!(-12.5));
    }
}
