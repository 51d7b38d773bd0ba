use skiffql_common::{Error, Result};
use skiffql_core::datetime as dt;
use skiffql_core::{IntervalValue, Value};

use super::{arg_error, int_arg, text_arg};
use super::ops;

pub fn make_array(args: &[Value]) -> Result<Value> {
    Ok(Value::Array(args.to_vec()))
}

/// Alternating (name, value) pairs; empty names mark unnamed fields.
pub fn make_struct(args: &[Value]) -> Result<Value> {
    if args.len() % 2 != 0 {
        return Err(Error::invalid_argument(
            "STRUCT: expected alternating name/value pairs",
        ));
    }
    let mut fields = Vec::with_capacity(args.len() / 2);
    for pair in args.chunks(2) {
        let name = match &pair[0] {
            Value::Null => String::new(),
            other => other.to_text()?,
        };
        fields.push((name, pair[1].clone()));
    }
    Ok(Value::Struct(fields))
}

/// Positional field access mirroring resolved field indexes; a string
/// selector falls back to lookup by name.
pub fn struct_field(args: &[Value]) -> Result<Value> {
    let fields = args[0].to_struct().map_err(|e| arg_error("STRUCT_FIELD", 1, e))?;
    match &args[1] {
        Value::String(name) => fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| arg_error("STRUCT_FIELD", 2, format!("no field named {:?}", name))),
        other => {
            let index = other.to_int64().map_err(|e| arg_error("STRUCT_FIELD", 2, e))?;
            fields
                .get(index as usize)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| {
                    arg_error(
                        "STRUCT_FIELD",
                        2,
                        format!("field offset {} out of range [0, {})", index, fields.len()),
                    )
                })
        }
    }
}

pub fn array_length(args: &[Value]) -> Result<Value> {
    Ok(Value::Int64(
        args[0].to_array().map_err(|e| arg_error("ARRAY_LENGTH", 1, e))?.len() as i64,
    ))
}

pub fn array_concat(args: &[Value]) -> Result<Value> {
    let mut out = Vec::new();
    for (i, v) in args.iter().enumerate() {
        out.extend(v.to_array().map_err(|e| arg_error("ARRAY_CONCAT", i + 1, e))?);
    }
    Ok(Value::Array(out))
}

pub fn array_reverse(args: &[Value]) -> Result<Value> {
    let mut items = args[0].to_array().map_err(|e| arg_error("ARRAY_REVERSE", 1, e))?;
    items.reverse();
    Ok(Value::Array(items))
}

pub fn array_to_string(args: &[Value]) -> Result<Value> {
    let items = args[0].to_array().map_err(|e| arg_error("ARRAY_TO_STRING", 1, e))?;
    let sep = text_arg("ARRAY_TO_STRING", args, 1)?;
    let null_text = if args.len() > 2 {
        Some(text_arg("ARRAY_TO_STRING", args, 2)?)
    } else {
        None
    };
    let mut parts = Vec::with_capacity(items.len());
    for item in &items {
        if item.is_null() {
            match &null_text {
                Some(t) => parts.push(t.clone()),
                None => continue,
            }
        } else {
            parts.push(item.to_text()?);
        }
    }
    Ok(Value::String(parts.join(&sep)))
}

/// Zero-based element access; the ORDINAL variant is one-based. SAFE
/// variants return NULL out of range instead of failing.
fn element_at(func: &str, args: &[Value], base: i64, safe: bool) -> Result<Value> {
    let items = args[0].to_array().map_err(|e| arg_error(func, 1, e))?;
    let index = int_arg(func, args, 1)? - base;
    if index < 0 || index as usize >= items.len() {
        if safe {
            return Ok(Value::Null);
        }
        return Err(arg_error(
            func,
            2,
            format!("index {} out of range [0, {})", index + base, items.len()),
        ));
    }
    Ok(items[index as usize].clone())
}

pub fn array_offset(args: &[Value]) -> Result<Value> {
    element_at("ARRAY_OFFSET", args, 0, false)
}

pub fn array_ordinal(args: &[Value]) -> Result<Value> {
    element_at("ARRAY_ORDINAL", args, 1, false)
}

pub fn safe_array_offset(args: &[Value]) -> Result<Value> {
    element_at("ARRAY_SAFE_OFFSET", args, 0, true)
}

pub fn safe_array_ordinal(args: &[Value]) -> Result<Value> {
    element_at("ARRAY_SAFE_ORDINAL", args, 1, true)
}

pub fn generate_array(args: &[Value]) -> Result<Value> {
    let step = if args.len() > 2 {
        args[2].clone()
    } else {
        Value::Int64(1)
    };
    let ascending = match step.compare(&Value::Int64(0))? {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => {
            return Err(arg_error("GENERATE_ARRAY", 3, "step must not be zero"));
        }
    };
    let mut out = Vec::new();
    let mut cursor = args[0].clone();
    loop {
        let past_end = if ascending {
            cursor.compare(&args[1])?.is_gt()
        } else {
            cursor.compare(&args[1])?.is_lt()
        };
        if past_end {
            break;
        }
        out.push(cursor.clone());
        cursor = ops::add(&[cursor, step.clone()])?;
        if out.len() > 1_000_000 {
            return Err(Error::invalid_argument(
                "GENERATE_ARRAY: result exceeds 1000000 elements",
            ));
        }
    }
    Ok(Value::Array(out))
}

pub fn generate_date_array(args: &[Value]) -> Result<Value> {
    let start = args[0].to_date().map_err(|e| arg_error("GENERATE_DATE_ARRAY", 1, e))?;
    let end = args[1].to_date().map_err(|e| arg_error("GENERATE_DATE_ARRAY", 2, e))?;
    let step = if args.len() > 2 {
        args[2].to_interval().map_err(|e| arg_error("GENERATE_DATE_ARRAY", 3, e))?
    } else {
        IntervalValue::new(0, 1, 0)
    };
    let forward = step.months > 0 || (step.months == 0 && step.days > 0);
    if step.months == 0 && step.days == 0 {
        return Err(arg_error("GENERATE_DATE_ARRAY", 3, "step must move"));
    }
    let mut out = Vec::new();
    let mut cursor = start;
    loop {
        if (forward && cursor > end) || (!forward && cursor < end) {
            break;
        }
        out.push(Value::Date(cursor));
        cursor = dt::date_add(cursor, &step)?;
        if out.len() > 1_000_000 {
            return Err(Error::invalid_argument(
                "GENERATE_DATE_ARRAY: result exceeds 1000000 elements",
            ));
        }
    }
    Ok(Value::Array(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_is_zero_based_ordinal_one_based() {
        let arr = Value::Array(vec![Value::from("a"), Value::from("b")]);
        assert_eq!(
            array_offset(&[arr.clone(), Value::Int64(0)]).unwrap(),
            Value::from("a")
        );
        assert_eq!(
            array_ordinal(&[arr.clone(), Value::Int64(1)]).unwrap(),
            Value::from("a")
        );
        assert!(array_offset(&[arr.clone(), Value::Int64(2)]).is_err());
        assert_eq!(
            safe_array_offset(&[arr, Value::Int64(2)]).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn struct_field_by_position() {
        let s = Value::Struct(vec![
            ("a".into(), Value::Int64(1)),
            ("b".into(), Value::Int64(2)),
        ]);
        assert_eq!(struct_field(&[s.clone(), Value::Int64(1)]).unwrap(), Value::Int64(2));
        assert_eq!(struct_field(&[s, Value::from("a")]).unwrap(), Value::Int64(1));
    }

    #[test]
    fn generate_array_descending() {
        let out = generate_array(&[Value::Int64(5), Value::Int64(1), Value::Int64(-2)]).unwrap();
        assert_eq!(
            out,
            Value::Array(vec![Value::Int64(5), Value::Int64(3), Value::Int64(1)])
        );
    }

    #[test]
    fn date_array_by_month() {
        let out = generate_date_array(&[
            Value::from("2024-01-31"),
            Value::from("2024-03-31"),
            Value::Interval(IntervalValue::new(1, 0, 0)),
        ])
        .unwrap();
        // Feb clamps to the 29th, then stays clamped relative to the cursor.
        let items = out.to_array().unwrap();
        assert_eq!(items[0], Value::Date(dt::parse_date("2024-01-31").unwrap()));
        assert_eq!(items[1], Value::Date(dt::parse_date("2024-02-29").unwrap()));
    }
}
