//! Numeric Kernel — decimal-exact reductions, JSON encoding, and the
//! `safe_eval` expression evaluator used by the `calc_eval` tool.
//!
//! Every aggregate the rest of the crate produces flows through here
//! rather than through binary floating point, so that summed currency
//! figures reproduce exactly across pipeline re-execution.

pub mod error;
pub mod expr;
pub mod json;
pub mod reduce;

pub use error::KernelError;
pub use expr::safe_eval;
pub use json::decimal_to_json;
pub use reduce::{
    decimal_count, decimal_count_distinct, decimal_max, decimal_mean, decimal_median,
    decimal_min, decimal_stddev, decimal_sum, null_count,
};
