//! Decimal reductions over a sequence of scalar values.
//!
//! Non-numeric entries are skipped (not zero-filled); `count` always
//! operates on the raw sequence length, per the spec.

use rust_decimal::Decimal;

use crate::models::Scalar;

fn numeric_values(values: &[Scalar]) -> Vec<Decimal> {
    values.iter().filter_map(Scalar::as_decimal).collect()
}

pub fn decimal_count(values: &[Scalar]) -> i64 {
    values.len() as i64
}

pub fn decimal_sum(values: &[Scalar]) -> Decimal {
    numeric_values(values).into_iter().sum()
}

/// `None` when there are no numeric values to average (empty/all-null).
pub fn decimal_mean(values: &[Scalar]) -> Option<Decimal> {
    let nums = numeric_values(values);
    if nums.is_empty() {
        return None;
    }
    let sum: Decimal = nums.iter().copied().sum();
    Some(sum / Decimal::from(nums.len() as i64))
}

pub fn decimal_median(values: &[Scalar]) -> Option<Decimal> {
    let mut nums = numeric_values(values);
    if nums.is_empty() {
        return None;
    }
    nums.sort();
    let mid = nums.len() / 2;
    if nums.len() % 2 == 1 {
        Some(nums[mid])
    } else {
        Some((nums[mid - 1] + nums[mid]) / Decimal::from(2))
    }
}

pub fn decimal_min(values: &[Scalar]) -> Option<Decimal> {
    numeric_values(values).into_iter().min()
}

pub fn decimal_max(values: &[Scalar]) -> Option<Decimal> {
    numeric_values(values).into_iter().max()
}

/// Sample standard deviation. `None` for fewer than two numeric values,
/// matching the boundary rule that a single-row dataset yields `null`,
/// never zero.
pub fn decimal_stddev(values: &[Scalar]) -> Option<Decimal> {
    let nums = numeric_values(values);
    if nums.len() < 2 {
        return None;
    }
    let mean = decimal_mean(values)?;
    let sum_sq: Decimal = nums.iter().map(|v| (*v - mean) * (*v - mean)).sum();
    let variance = sum_sq / Decimal::from((nums.len() - 1) as i64);
    decimal_sqrt(variance)
}

/// Newton's method square root for non-negative decimals.
fn decimal_sqrt(value: Decimal) -> Option<Decimal> {
    if value.is_sign_negative() {
        return None;
    }
    if value.is_zero() {
        return Some(Decimal::ZERO);
    }
    let mut guess = value;
    for _ in 0..64 {
        let next = (guess + value / guess) / Decimal::from(2);
        if (next - guess).abs() < Decimal::new(1, 20) {
            return Some(next);
        }
        guess = next;
    }
    Some(guess)
}

pub fn decimal_count_distinct(values: &[Scalar]) -> i64 {
    let mut seen: Vec<String> = Vec::new();
    for v in values {
        if matches!(v, Scalar::Null) {
            continue;
        }
        let key = match v {
            Scalar::Number(d) => d.normalize().to_string(),
            Scalar::Str(s) => s.clone(),
            Scalar::Bool(b) => b.to_string(),
            Scalar::Date(dt) => dt.to_rfc3339(),
            Scalar::Null => unreachable!(),
        };
        if !seen.contains(&key) {
            seen.push(key);
        }
    }
    seen.len() as i64
}

pub fn null_count(values: &[Scalar]) -> i64 {
    values.iter().filter(|v| matches!(v, Scalar::Null)).count() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn num(s: &str) -> Scalar {
        Scalar::Number(Decimal::from_str(s).unwrap())
    }

    #[test]
    fn sum_skips_non_numeric_and_count_uses_raw_length() {
        let values = vec![num("1"), Scalar::Null, num("2"), Scalar::Str("x".into())];
        assert_eq!(decimal_sum(&values), Decimal::from(3));
        assert_eq!(decimal_count(&values), 4);
    }

    #[test]
    fn empty_dataset_yields_null_not_nan() {
        let values: Vec<Scalar> = vec![];
        assert_eq!(decimal_sum(&values), Decimal::ZERO);
        assert_eq!(decimal_mean(&values), None);
        assert_eq!(decimal_median(&values), None);
        assert_eq!(decimal_min(&values), None);
        assert_eq!(decimal_max(&values), None);
        assert_eq!(decimal_count(&values), 0);
    }

    #[test]
    fn single_row_stddev_is_null_not_zero() {
        let values = vec![num("42")];
        assert_eq!(decimal_stddev(&values), None);
    }

    #[test]
    fn all_null_metric_column_behaves_like_empty() {
        let values = vec![Scalar::Null, Scalar::Null];
        assert_eq!(decimal_mean(&values), None);
        assert_eq!(decimal_count(&values), 2);
    }

    #[test]
    fn median_even_count_averages_middle_pair() {
        let values = vec![num("1"), num("2"), num("3"), num("4")];
        assert_eq!(decimal_median(&values), Some(Decimal::from_str("2.5").unwrap()));
    }

    #[test]
    fn decimal_sum_is_exact_over_many_fractional_rows() {
        // 1000 rows of 0.1 must sum to exactly 100, unlike binary float.
        let values: Vec<Scalar> = (0..1000).map(|_| num("0.1")).collect();
        assert_eq!(decimal_sum(&values), Decimal::from(100));
    }
}
