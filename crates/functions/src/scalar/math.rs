use skiffql_common::{Error, Result};
use skiffql_core::{DecimalKind, FixedDecimal, Value};

use super::{float_arg, int_arg};
use super::ops;

pub fn abs(args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Int64(v) => v
            .checked_abs()
            .map(Value::Int64)
            .ok_or_else(|| Error::overflow(format!("ABS: {}", v))),
        Value::Float64(f) => Ok(Value::float64(f.abs())),
        Value::Numeric(d) => Ok(Value::Numeric(d.abs())),
        Value::BigNumeric(d) => Ok(Value::BigNumeric(d.abs())),
        other => Err(Error::type_mismatch("numeric", other.data_type().to_string())),
    }
}

pub fn sign(args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Int64(v) => Ok(Value::Int64(v.signum())),
        Value::Float64(f) => Ok(Value::float64(if f.into_inner() == 0.0 {
            0.0
        } else {
            f.into_inner().signum()
        })),
        Value::Numeric(d) | Value::BigNumeric(d) => Ok(Value::Int64(if d.is_zero() {
            0
        } else if d.is_negative() {
            -1
        } else {
            1
        })),
        other => Err(Error::type_mismatch("numeric", other.data_type().to_string())),
    }
}

fn decimal_round(d: &FixedDecimal, digits: i64, trunc: bool) -> Result<FixedDecimal> {
    // round at `digits` fractional places via string surgery on the
    // canonical form; exactness is preserved by the decimal parser
    let kind = d.kind();
    let shift = FixedDecimal::parse(kind, &format!("1e{}", -digits))?;
    let shifted = d.div(&shift, "ROUND")?;
    let snapped = if trunc {
        let text = shifted.to_canonical_string();
        let integral = text.split('.').next().unwrap_or("0").to_string();
        FixedDecimal::parse(kind, &integral)?
    } else {
        FixedDecimal::from_i64(kind, shifted.to_i64("ROUND")?)
    };
    snapped.mul(&shift)
}

pub fn round(args: &[Value]) -> Result<Value> {
    let digits = if args.len() > 1 { int_arg("ROUND", args, 1)? } else { 0 };
    match &args[0] {
        Value::Int64(v) => Ok(Value::Int64(*v)),
        Value::Float64(f) => {
            let factor = 10f64.powi(digits as i32);
            Ok(Value::float64((f.into_inner() * factor).round() / factor))
        }
        Value::Numeric(d) => Ok(Value::Numeric(decimal_round(d, digits, false)?)),
        Value::BigNumeric(d) => Ok(Value::BigNumeric(decimal_round(d, digits, false)?)),
        other => Ok(Value::float64({
            let factor = 10f64.powi(digits as i32);
            (other.to_float64()? * factor).round() / factor
        })),
    }
}

pub fn trunc(args: &[Value]) -> Result<Value> {
    let digits = if args.len() > 1 { int_arg("TRUNC", args, 1)? } else { 0 };
    match &args[0] {
        Value::Int64(v) => Ok(Value::Int64(*v)),
        Value::Numeric(d) => Ok(Value::Numeric(decimal_round(d, digits, true)?)),
        Value::BigNumeric(d) => Ok(Value::BigNumeric(decimal_round(d, digits, true)?)),
        other => {
            let factor = 10f64.powi(digits as i32);
            Ok(Value::float64((other.to_float64()? * factor).trunc() / factor))
        }
    }
}

pub fn ceil(args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Int64(v) => Ok(Value::Int64(*v)),
        Value::Numeric(d) => Ok(Value::Numeric(decimal_ceil_floor(d, true)?)),
        Value::BigNumeric(d) => Ok(Value::BigNumeric(decimal_ceil_floor(d, true)?)),
        other => Ok(Value::float64(other.to_float64()?.ceil())),
    }
}

pub fn floor(args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Int64(v) => Ok(Value::Int64(*v)),
        Value::Numeric(d) => Ok(Value::Numeric(decimal_ceil_floor(d, false)?)),
        Value::BigNumeric(d) => Ok(Value::BigNumeric(decimal_ceil_floor(d, false)?)),
        other => Ok(Value::float64(other.to_float64()?.floor())),
    }
}

fn decimal_ceil_floor(d: &FixedDecimal, ceil: bool) -> Result<FixedDecimal> {
    let kind = d.kind();
    let text = d.to_canonical_string();
    let integral: &str = text.split('.').next().unwrap_or("0");
    let has_frac = text.contains('.');
    let base = FixedDecimal::parse(kind, integral)?;
    if !has_frac {
        return Ok(base);
    }
    if ceil && !d.is_negative() {
        base.add(&FixedDecimal::from_i64(kind, 1))
    } else if !ceil && d.is_negative() {
        base.sub(&FixedDecimal::from_i64(kind, 1))
    } else {
        Ok(base)
    }
}

pub fn sqrt(args: &[Value]) -> Result<Value> {
    let v = float_arg("SQRT", args, 0)?;
    if v < 0.0 {
        return Err(Error::invalid_argument(format!(
            "SQRT: argument 1: negative value {}",
            v
        )));
    }
    Ok(Value::float64(v.sqrt()))
}

pub fn pow(args: &[Value]) -> Result<Value> {
    let base = float_arg("POW", args, 0)?;
    let exp = float_arg("POW", args, 1)?;
    let out = base.powf(exp);
    if out.is_nan() && !base.is_nan() && !exp.is_nan() {
        return Err(Error::invalid_argument(format!(
            "POW: {} ** {} is undefined",
            base, exp
        )));
    }
    Ok(Value::float64(out))
}

pub fn exp(args: &[Value]) -> Result<Value> {
    Ok(Value::float64(float_arg("EXP", args, 0)?.exp()))
}

pub fn ln(args: &[Value]) -> Result<Value> {
    let v = float_arg("LN", args, 0)?;
    if v <= 0.0 {
        return Err(Error::invalid_argument(format!(
            "LN: argument 1: non-positive value {}",
            v
        )));
    }
    Ok(Value::float64(v.ln()))
}

pub fn log(args: &[Value]) -> Result<Value> {
    let v = float_arg("LOG", args, 0)?;
    if v <= 0.0 {
        return Err(Error::invalid_argument(format!(
            "LOG: argument 1: non-positive value {}",
            v
        )));
    }
    if args.len() > 1 {
        let base = float_arg("LOG", args, 1)?;
        if base <= 0.0 || base == 1.0 {
            return Err(Error::invalid_argument(format!(
                "LOG: argument 2: invalid base {}",
                base
            )));
        }
        Ok(Value::float64(v.log(base)))
    } else {
        Ok(Value::float64(v.ln()))
    }
}

pub fn log10(args: &[Value]) -> Result<Value> {
    let v = float_arg("LOG10", args, 0)?;
    if v <= 0.0 {
        return Err(Error::invalid_argument(format!(
            "LOG10: argument 1: non-positive value {}",
            v
        )));
    }
    Ok(Value::float64(v.log10()))
}

pub fn mod_op(args: &[Value]) -> Result<Value> {
    match (&args[0], &args[1]) {
        (Value::Int64(x), Value::Int64(y)) => {
            if *y == 0 {
                return Err(Error::division_by_zero("MOD"));
            }
            Ok(Value::Int64(x % y))
        }
        (a, b) => {
            let kind = if matches!(a, Value::BigNumeric(_)) || matches!(b, Value::BigNumeric(_)) {
                DecimalKind::BigNumeric
            } else {
                DecimalKind::Numeric
            };
            let x = a.to_decimal(kind)?;
            let y = b.to_decimal(kind)?;
            if y.is_zero() {
                return Err(Error::division_by_zero("MOD"));
            }
            // x - trunc(x / y) * y
            let quotient = x.div(&y, "MOD")?;
            let truncated = decimal_round(&quotient, 0, true)?;
            let out = x.sub(&truncated.mul(&y)?)?;
            Ok(match kind {
                DecimalKind::Numeric => Value::Numeric(out),
                DecimalKind::BigNumeric => Value::BigNumeric(out),
            })
        }
    }
}

pub fn int_div(args: &[Value]) -> Result<Value> {
    let x = int_arg("DIV", args, 0)?;
    let y = int_arg("DIV", args, 1)?;
    if y == 0 {
        return Err(Error::division_by_zero("DIV"));
    }
    x.checked_div(y)
        .map(Value::Int64)
        .ok_or_else(|| Error::overflow(format!("DIV: {} / {}", x, y)))
}

pub fn safe_divide(args: &[Value]) -> Result<Value> {
    match ops::div_inner(&args[0], &args[1], "SAFE_DIVIDE") {
        Ok(v) => Ok(v),
        Err(e) if e.is_safe_absorbable() => Ok(Value::Null),
        Err(e) => Err(e),
    }
}

pub fn ieee_divide(args: &[Value]) -> Result<Value> {
    let x = float_arg("IEEE_DIVIDE", args, 0)?;
    let y = float_arg("IEEE_DIVIDE", args, 1)?;
    Ok(Value::float64(x / y))
}

pub fn is_nan(args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(float_arg("IS_NAN", args, 0)?.is_nan()))
}

pub fn is_inf(args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(float_arg("IS_INF", args, 0)?.is_infinite()))
}

pub fn greatest(args: &[Value]) -> Result<Value> {
    extremum("GREATEST", args, true)
}

pub fn least(args: &[Value]) -> Result<Value> {
    extremum("LEAST", args, false)
}

fn extremum(func: &str, args: &[Value], want_max: bool) -> Result<Value> {
    let mut best: Option<&Value> = None;
    for v in args {
        if v.is_null() {
            return Ok(Value::Null);
        }
        best = Some(match best {
            None => v,
            Some(cur) => {
                let ord = v.compare(cur).map_err(|e| super::arg_error(func, 1, e))?;
                if (want_max && ord.is_gt()) || (!want_max && ord.is_lt()) {
                    v
                } else {
                    cur
                }
            }
        });
    }
    Ok(best.cloned().unwrap_or(Value::Null))
}

pub fn rand(_args: &[Value]) -> Result<Value> {
    Ok(Value::float64(rand::random::<f64>()))
}

pub fn range_bucket(args: &[Value]) -> Result<Value> {
    let needle = &args[0];
    let buckets = args[1]
        .to_array()
        .map_err(|e| super::arg_error("RANGE_BUCKET", 2, e))?;
    let mut index = 0i64;
    for b in &buckets {
        if needle.compare(b)?.is_ge() {
            index += 1;
        } else {
            break;
        }
    }
    Ok(Value::Int64(index))
}

pub fn bit_not(args: &[Value]) -> Result<Value> {
    Ok(Value::Int64(!int_arg("BIT_NOT", args, 0)?))
}

pub fn bit_and(args: &[Value]) -> Result<Value> {
    Ok(Value::Int64(int_arg("BIT_AND", args, 0)? & int_arg("BIT_AND", args, 1)?))
}

pub fn bit_or(args: &[Value]) -> Result<Value> {
    Ok(Value::Int64(int_arg("BIT_OR", args, 0)? | int_arg("BIT_OR", args, 1)?))
}

pub fn bit_xor(args: &[Value]) -> Result<Value> {
    Ok(Value::Int64(int_arg("BIT_XOR", args, 0)? ^ int_arg("BIT_XOR", args, 1)?))
}

pub fn bit_lshift(args: &[Value]) -> Result<Value> {
    let v = int_arg("BIT_LEFT_SHIFT", args, 0)?;
    let by = int_arg("BIT_LEFT_SHIFT", args, 1)?;
    if !(0..64).contains(&by) {
        return Ok(Value::Int64(0));
    }
    Ok(Value::Int64(((v as u64) << by) as i64))
}

pub fn bit_rshift(args: &[Value]) -> Result<Value> {
    let v = int_arg("BIT_RIGHT_SHIFT", args, 0)?;
    let by = int_arg("BIT_RIGHT_SHIFT", args, 1)?;
    if !(0..64).contains(&by) {
        return Ok(Value::Int64(0));
    }
    Ok(Value::Int64(((v as u64) >> by) as i64))
}

macro_rules! unary_float {
    ($name:ident, $method:ident, $label:literal) => {
        pub fn $name(args: &[Value]) -> Result<Value> {
            Ok(Value::float64(float_arg($label, args, 0)?.$method()))
        }
    };
}

unary_float!(sin, sin, "SIN");
unary_float!(cos, cos, "COS");
unary_float!(tan, tan, "TAN");
unary_float!(sinh, sinh, "SINH");
unary_float!(cosh, cosh, "COSH");
unary_float!(tanh, tanh, "TANH");
unary_float!(asinh, asinh, "ASINH");
unary_float!(atan, atan, "ATAN");

pub fn asin(args: &[Value]) -> Result<Value> {
    let v = float_arg("ASIN", args, 0)?;
    if !(-1.0..=1.0).contains(&v) {
        return Err(Error::invalid_argument(format!(
            "ASIN: argument 1: {} out of [-1, 1]",
            v
        )));
    }
    Ok(Value::float64(v.asin()))
}

pub fn acos(args: &[Value]) -> Result<Value> {
    let v = float_arg("ACOS", args, 0)?;
    if !(-1.0..=1.0).contains(&v) {
        return Err(Error::invalid_argument(format!(
            "ACOS: argument 1: {} out of [-1, 1]",
            v
        )));
    }
    Ok(Value::float64(v.acos()))
}

pub fn acosh(args: &[Value]) -> Result<Value> {
    let v = float_arg("ACOSH", args, 0)?;
    if v < 1.0 {
        return Err(Error::invalid_argument(format!(
            "ACOSH: argument 1: {} below 1",
            v
        )));
    }
    Ok(Value::float64(v.acosh()))
}

pub fn atanh(args: &[Value]) -> Result<Value> {
    let v = float_arg("ATANH", args, 0)?;
    if !(-1.0..1.0).contains(&v) && v != -1.0 {
        return Err(Error::invalid_argument(format!(
            "ATANH: argument 1: {} out of (-1, 1)",
            v
        )));
    }
    Ok(Value::float64(v.atanh()))
}

pub fn atan2(args: &[Value]) -> Result<Value> {
    let y = float_arg("ATAN2", args, 0)?;
    let x = float_arg("ATAN2", args, 1)?;
    Ok(Value::float64(y.atan2(x)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric(s: &str) -> Value {
        Value::Numeric(FixedDecimal::parse(DecimalKind::Numeric, s).unwrap())
    }

    #[test]
    fn round_numeric_half_away() {
        assert_eq!(round(&[numeric("2.5")]).unwrap(), numeric("3"));
        assert_eq!(round(&[numeric("-2.5")]).unwrap(), numeric("-3"));
        assert_eq!(round(&[numeric("2.347"), Value::Int64(2)]).unwrap(), numeric("2.35"));
    }

    #[test]
    fn ceil_floor_decimals() {
        assert_eq!(ceil(&[numeric("1.2")]).unwrap(), numeric("2"));
        assert_eq!(floor(&[numeric("-1.2")]).unwrap(), numeric("-2"));
        assert_eq!(ceil(&[numeric("-1.2")]).unwrap(), numeric("-1"));
    }

    #[test]
    fn mod_matches_truncated_division() {
        assert_eq!(
            mod_op(&[Value::Int64(-7), Value::Int64(2)]).unwrap(),
            Value::Int64(-1)
        );
        assert_eq!(
            mod_op(&[numeric("7.5"), numeric("2")]).unwrap(),
            numeric("1.5")
        );
    }

    #[test]
    fn safe_divide_absorbs_zero() {
        assert_eq!(
            safe_divide(&[Value::Int64(1), Value::Int64(0)]).unwrap(),
            Value::Null
        );
        assert_eq!(
            ieee_divide(&[Value::float64(1.0), Value::float64(0.0)]).unwrap(),
            Value::float64(f64::INFINITY)
        );
    }
}
