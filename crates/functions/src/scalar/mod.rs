//! Scalar built-ins. Each function takes the decoded argument list and
//! returns a single value; the registry handles arity checks and NULL
//! propagation for everything that is not NULL-safe.

pub mod array;
pub mod cast;
pub mod cmp;
pub mod datetime;
pub mod hash;
pub mod json;
pub mod math;
pub mod ops;
pub mod string;

use skiffql_common::{Error, Result};
use skiffql_core::Value;

/// Formats a one-based argument-position error in the uniform message
/// shape: function name first, offending position named.
pub fn arg_error(func: &str, position: usize, detail: impl std::fmt::Display) -> Error {
    Error::invalid_argument(format!("{}: argument {}: {}", func, position, detail))
}

pub fn int_arg(func: &str, args: &[Value], position: usize) -> Result<i64> {
    args[position]
        .to_int64()
        .map_err(|e| arg_error(func, position + 1, e))
}

pub fn text_arg(func: &str, args: &[Value], position: usize) -> Result<String> {
    args[position]
        .to_text()
        .map_err(|e| arg_error(func, position + 1, e))
}

pub fn float_arg(func: &str, args: &[Value], position: usize) -> Result<f64> {
    args[position]
        .to_float64()
        .map_err(|e| arg_error(func, position + 1, e))
}
