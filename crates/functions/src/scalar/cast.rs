use skiffql_common::{Error, Result};
use skiffql_core::{DataType, DecimalKind, Value, encode};

use super::json::{json_to_value, value_to_json};
use super::text_arg;

/// CAST(value AS type); the rewriter passes the target type's canonical
/// text as the second argument.
pub fn cast(args: &[Value]) -> Result<Value> {
    let target = DataType::parse(&text_arg("CAST", args, 1)?)?;
    cast_to(&args[0], &target)
}

pub fn safe_cast(args: &[Value]) -> Result<Value> {
    match cast(args) {
        Ok(v) => Ok(v),
        Err(e) if e.is_safe_absorbable() => Ok(Value::Null),
        Err(e) => Err(e),
    }
}

pub fn cast_to(value: &Value, target: &DataType) -> Result<Value> {
    let (v, _) = value.unwrap_safe();
    if v.is_null() {
        return Ok(Value::Null);
    }
    match target {
        DataType::Unknown => Ok(v.clone()),
        DataType::Bool => Ok(Value::Bool(v.to_bool()?)),
        DataType::Int64 => Ok(Value::Int64(v.to_int64()?)),
        DataType::Float64 => Ok(Value::float64(v.to_float64()?)),
        DataType::Numeric => Ok(Value::Numeric(v.to_decimal(DecimalKind::Numeric)?)),
        DataType::BigNumeric => Ok(Value::BigNumeric(v.to_decimal(DecimalKind::BigNumeric)?)),
        DataType::String => match v {
            // CAST(bool AS STRING) is "true"/"false", not 1/0
            Value::Bool(b) => Ok(Value::String(if *b { "true" } else { "false" }.into())),
            Value::Bytes(b) => String::from_utf8(b.clone())
                .map(Value::String)
                .map_err(|_| Error::type_coercion("CAST: BYTES is not valid UTF-8")),
            other => Ok(Value::String(other.to_text()?)),
        },
        DataType::Bytes => Ok(Value::Bytes(v.to_bytes()?)),
        DataType::Date => Ok(Value::Date(v.to_date()?)),
        DataType::Time => Ok(Value::Time(v.to_time()?)),
        DataType::DateTime => Ok(Value::DateTime(v.to_datetime()?)),
        DataType::Timestamp => Ok(Value::Timestamp(v.to_timestamp()?)),
        DataType::Interval => Ok(Value::Interval(v.to_interval()?)),
        DataType::Json => Ok(Value::Json(match v {
            Value::String(s) => serde_json::from_str(s)
                .map_err(|e| Error::type_coercion(format!("CAST: invalid JSON: {}", e)))?,
            other => value_to_json(other)?,
        })),
        DataType::Array(elem) => {
            let items = match v {
                Value::Array(items) => items.clone(),
                Value::Json(serde_json::Value::Array(items)) => {
                    items.iter().map(json_to_value).collect()
                }
                other => {
                    return Err(Error::type_mismatch(
                        target.to_string(),
                        other.data_type().to_string(),
                    ));
                }
            };
            Ok(Value::Array(
                items
                    .iter()
                    .map(|item| cast_to(item, elem))
                    .collect::<Result<_>>()?,
            ))
        }
        DataType::Struct(_) => v.coerce_to(target),
    }
}

/// Canonical cell text of any value, exposed for diagnostics and tests.
pub fn encode_value(args: &[Value]) -> Result<Value> {
    Ok(match encode::encode_cell(&args[0])? {
        skiffql_core::Cell::Text(s) => Value::String(s),
        skiffql_core::Cell::Null => Value::Null,
        skiffql_core::Cell::Int(i) => Value::Int64(i),
        skiffql_core::Cell::Real(f) => Value::float64(f),
        skiffql_core::Cell::Blob(b) => Value::Bytes(b),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_to_string_spells_words() {
        assert_eq!(
            cast(&[Value::Bool(true), Value::from("STRING")]).unwrap(),
            Value::from("true")
        );
        assert_eq!(
            cast(&[Value::Int64(1), Value::from("BOOL")]).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn float_to_int_rounds_half_away() {
        assert_eq!(
            cast(&[Value::float64(2.5), Value::from("INT64")]).unwrap(),
            Value::Int64(3)
        );
        assert_eq!(
            cast(&[Value::float64(-2.5), Value::from("INT64")]).unwrap(),
            Value::Int64(-3)
        );
    }

    #[test]
    fn safe_cast_absorbs_bad_input() {
        assert_eq!(
            safe_cast(&[Value::from("abc"), Value::from("INT64")]).unwrap(),
            Value::Null
        );
        assert!(cast(&[Value::from("abc"), Value::from("INT64")]).is_err());
    }

    #[test]
    fn string_array_cast() {
        let arr = Value::Array(vec![Value::Int64(1), Value::Int64(2)]);
        assert_eq!(
            cast(&[arr, Value::from("ARRAY<STRING>")]).unwrap(),
            Value::Array(vec![Value::from("1"), Value::from("2")])
        );
    }
}
