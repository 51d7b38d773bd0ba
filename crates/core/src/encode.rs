//! Stable encoding of every `Value` variant into the host store's four
//! cell kinds. Scalars use their native cell; date/time kinds use
//! monotone text so index order matches logical order; decimals use a
//! sign-and-complement fixed-width form; structured values use a
//! marker-prefixed tagged text with a JSON body.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use skiffql_common::{Error, Result};

use crate::numeric::{DecimalKind, FixedDecimal};
use crate::value::{IntervalValue, Value};

/// Guard prefix for tagged text payloads. Contains a control character
/// so ordinary strings do not collide.
pub const ENC_PREFIX: &str = "\u{1}skiff:";

/// A host-store cell: what SQLite can hold.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

/// Shortest text form of a float that still round-trips.
pub fn float_text(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else {
        let mut s = v.to_string();
        if !s.contains(['.', 'e', 'E']) {
            s.push_str(".0");
        }
        s
    }
}

fn tagged(tag: &str, body: &str) -> String {
    format!("{}{}:{}", ENC_PREFIX, tag, body)
}

/// The fully tagged text form used for structured cells and for nested
/// positions inside arrays and structs. Injective per variant.
pub fn tagged_text(value: &Value) -> Result<String> {
    match value {
        Value::Float64(f) => Ok(tagged("f", &float_text(f.into_inner()))),
        Value::Bytes(b) => Ok(tagged("b", &BASE64.encode(b))),
        Value::Date(_) | Value::Time(_) | Value::DateTime(_) | Value::Timestamp(_) => {
            let tag = match value {
                Value::Date(_) => "d",
                Value::Time(_) => "t",
                Value::DateTime(_) => "dt",
                _ => "ts",
            };
            Ok(tagged(tag, &value.to_text()?))
        }
        Value::Numeric(d) => Ok(tagged("n", &d.ordered_encoding())),
        Value::BigNumeric(d) => Ok(tagged("N", &d.ordered_encoding())),
        Value::Interval(iv) => Ok(tagged(
            "i",
            &format!("{} {} {}", iv.months, iv.days, iv.nanos),
        )),
        Value::Json(j) => Ok(tagged("j", &j.to_string())),
        Value::Array(items) => {
            let body: Vec<serde_json::Value> =
                items.iter().map(nested_repr).collect::<Result<_>>()?;
            Ok(tagged("a", &serde_json::Value::Array(body).to_string()))
        }
        Value::Struct(fields) => {
            let body: Vec<serde_json::Value> = fields
                .iter()
                .map(|(name, v)| {
                    Ok(serde_json::Value::Array(vec![
                        serde_json::Value::String(name.clone()),
                        nested_repr(v)?,
                    ]))
                })
                .collect::<Result<_>>()?;
            Ok(tagged("o", &serde_json::Value::Array(body).to_string()))
        }
        Value::Safe(inner) => tagged_text(inner),
        other => Err(Error::internal(format!(
            "no tagged encoding for {:?}",
            other.data_type()
        ))),
    }
}

/// JSON position for a value nested inside an array or struct body:
/// plain scalars stay native JSON, everything typed becomes its tagged
/// string.
fn nested_repr(value: &Value) -> Result<serde_json::Value> {
    match value {
        Value::Null => Ok(serde_json::Value::Null),
        Value::Bool(b) => Ok(serde_json::Value::Bool(*b)),
        Value::Int64(v) => Ok(serde_json::Value::from(*v)),
        Value::Float64(f) if f.is_finite() => Ok(serde_json::Value::from(f.into_inner())),
        Value::String(s) => Ok(serde_json::Value::String(s.clone())),
        Value::Safe(inner) => nested_repr(inner),
        other => Ok(serde_json::Value::String(tagged_text(other)?)),
    }
}

fn from_nested_repr(j: &serde_json::Value) -> Result<Value> {
    match j {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Int64(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::float64(f))
            } else {
                Err(Error::type_coercion(format!("numeric literal {} out of range", n)))
            }
        }
        serde_json::Value::String(s) => {
            if s.starts_with(ENC_PREFIX) {
                decode_tagged(s)
            } else {
                Ok(Value::String(s.clone()))
            }
        }
        other => Err(Error::internal(format!(
            "unexpected nested encoding {}",
            other
        ))),
    }
}

pub fn decode_tagged(text: &str) -> Result<Value> {
    let rest = text
        .strip_prefix(ENC_PREFIX)
        .ok_or_else(|| Error::internal("missing encoding marker"))?;
    let (tag, body) = rest
        .split_once(':')
        .ok_or_else(|| Error::internal("malformed encoding tag"))?;
    match tag {
        "f" => Ok(Value::float64(match body {
            "NaN" => f64::NAN,
            "Infinity" => f64::INFINITY,
            "-Infinity" => f64::NEG_INFINITY,
            other => other
                .parse()
                .map_err(|_| Error::type_coercion(format!("invalid FLOAT64 encoding {:?}", other)))?,
        })),
        "b" => Ok(Value::Bytes(BASE64.decode(body).map_err(|e| {
            Error::type_coercion(format!("invalid BYTES encoding: {}", e))
        })?)),
        "d" => Ok(Value::Date(crate::datetime::parse_date(body)?)),
        "t" => Ok(Value::Time(crate::datetime::parse_time(body)?)),
        "dt" => Ok(Value::DateTime(crate::datetime::parse_datetime(body)?)),
        "ts" => Ok(Value::Timestamp(crate::datetime::parse_timestamp(body)?)),
        "n" => Ok(Value::Numeric(FixedDecimal::from_ordered_encoding(
            DecimalKind::Numeric,
            body,
        )?)),
        "N" => Ok(Value::BigNumeric(FixedDecimal::from_ordered_encoding(
            DecimalKind::BigNumeric,
            body,
        )?)),
        "i" => {
            let mut parts = body.split(' ');
            let mut next = || -> Result<i64> {
                parts
                    .next()
                    .and_then(|p| p.parse().ok())
                    .ok_or_else(|| Error::type_coercion("invalid INTERVAL encoding"))
            };
            let months = next()? as i32;
            let days = next()? as i32;
            let nanos = next()?;
            Ok(Value::Interval(IntervalValue::new(months, days, nanos)))
        }
        "j" => Ok(Value::Json(serde_json::from_str(body).map_err(|e| {
            Error::type_coercion(format!("invalid JSON encoding: {}", e))
        })?)),
        "a" => {
            let body: serde_json::Value = serde_json::from_str(body)
                .map_err(|e| Error::type_coercion(format!("invalid ARRAY encoding: {}", e)))?;
            let items = body
                .as_array()
                .ok_or_else(|| Error::type_coercion("ARRAY encoding is not a JSON array"))?;
            Ok(Value::Array(
                items.iter().map(from_nested_repr).collect::<Result<_>>()?,
            ))
        }
        "o" => {
            let body: serde_json::Value = serde_json::from_str(body)
                .map_err(|e| Error::type_coercion(format!("invalid STRUCT encoding: {}", e)))?;
            let pairs = body
                .as_array()
                .ok_or_else(|| Error::type_coercion("STRUCT encoding is not a JSON array"))?;
            let mut fields = Vec::with_capacity(pairs.len());
            for pair in pairs {
                let entry = pair
                    .as_array()
                    .filter(|p| p.len() == 2)
                    .ok_or_else(|| Error::type_coercion("STRUCT encoding entry is not a pair"))?;
                let name = entry[0]
                    .as_str()
                    .ok_or_else(|| Error::type_coercion("STRUCT field name is not a string"))?;
                fields.push((name.to_string(), from_nested_repr(&entry[1])?));
            }
            Ok(Value::Struct(fields))
        }
        other => Err(Error::internal(format!("unknown encoding tag {:?}", other))),
    }
}

/// Encodes a value into the cell the host store persists. Date/time
/// kinds stay bare monotone text so a blind CAST round trip is a no-op
/// and index order matches logical order.
pub fn encode_cell(value: &Value) -> Result<Cell> {
    match value {
        Value::Null => Ok(Cell::Null),
        Value::Bool(b) => Ok(Cell::Int(*b as i64)),
        Value::Int64(v) => Ok(Cell::Int(*v)),
        Value::Float64(f) => Ok(Cell::Real(f.into_inner())),
        Value::String(s) => Ok(Cell::Text(s.clone())),
        Value::Bytes(b) => Ok(Cell::Blob(b.clone())),
        Value::Date(_) | Value::Time(_) | Value::DateTime(_) | Value::Timestamp(_) => {
            Ok(Cell::Text(value.to_text()?))
        }
        Value::Numeric(_)
        | Value::BigNumeric(_)
        | Value::Interval(_)
        | Value::Json(_)
        | Value::Array(_)
        | Value::Struct(_) => Ok(Cell::Text(tagged_text(value)?)),
        Value::Safe(inner) => encode_cell(inner),
    }
}

/// Decodes a host-store cell back into a value. Text without the marker
/// decodes as STRING; the typed reading of bare date/time text is the
/// caller's (it knows the declared type, the functions coerce).
pub fn decode_cell(cell: &Cell) -> Result<Value> {
    match cell {
        Cell::Null => Ok(Value::Null),
        Cell::Int(v) => Ok(Value::Int64(*v)),
        Cell::Real(v) => Ok(Value::float64(*v)),
        Cell::Blob(b) => Ok(Value::Bytes(b.clone())),
        Cell::Text(s) => {
            if s.starts_with(ENC_PREFIX) {
                decode_tagged(s)
            } else {
                Ok(Value::String(s.clone()))
            }
        }
    }
}

/// Plain JSON array over the nested representations, for handing an
/// array to the host store's `json_each`.
pub fn array_plain_json(items: &[Value]) -> Result<String> {
    let body: Vec<serde_json::Value> = items.iter().map(nested_repr).collect::<Result<_>>()?;
    Ok(serde_json::Value::Array(body).to_string())
}

/// Canonical string key used to deduplicate DISTINCT aggregate inputs.
pub fn canonical_key(value: &Value) -> String {
    match value {
        Value::Array(_)
        | Value::Struct(_)
        | Value::Json(_)
        | Value::Interval(_)
        | Value::Numeric(_)
        | Value::BigNumeric(_) => tagged_text(value).unwrap_or_default(),
        Value::Bytes(b) => BASE64.encode(b),
        other => other.to_text().unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::DataType;

    fn sample_values() -> Vec<Value> {
        vec![
            Value::Null,
            Value::Bool(true),
            Value::Int64(-42),
            Value::float64(2.5),
            Value::float64(f64::NAN),
            Value::from("plain text"),
            Value::Bytes(vec![0, 1, 2, 255]),
            Value::Date(crate::datetime::parse_date("2024-02-29").unwrap()),
            Value::Time(crate::datetime::parse_time("23:59:59.000001").unwrap()),
            Value::DateTime(crate::datetime::parse_datetime("2024-02-29 12:00:00.5").unwrap()),
            Value::Timestamp(crate::datetime::parse_timestamp("2024-02-29 12:00:00+00").unwrap()),
            Value::Numeric(FixedDecimal::parse(DecimalKind::Numeric, "-12.75").unwrap()),
            Value::BigNumeric(FixedDecimal::parse(DecimalKind::BigNumeric, "1e37").unwrap()),
            Value::Interval(IntervalValue::new(13, -2, 5_000_000_000)),
            Value::Json(serde_json::json!({"a": [1, 2], "b": null})),
            Value::Array(vec![Value::Int64(1), Value::Null, Value::from("x")]),
            Value::Struct(vec![
                ("fieldA".into(), Value::Null),
                (
                    "fieldB".into(),
                    Value::Struct(vec![
                        ("fieldX".into(), Value::Null),
                        ("fieldY".into(), Value::from("bar")),
                    ]),
                ),
            ]),
        ]
    }

    #[test]
    fn round_trip_every_variant() {
        for v in sample_values() {
            let cell = encode_cell(&v).unwrap();
            let back = decode_cell(&cell).unwrap();
            match &v {
                // Bare cell forms lose only the static type, never data.
                Value::Bool(b) => assert_eq!(back, Value::Int64(*b as i64)),
                Value::Date(_) | Value::Time(_) | Value::DateTime(_) | Value::Timestamp(_) => {
                    assert_eq!(back, Value::String(v.to_text().unwrap()))
                }
                _ => assert_eq!(back, v),
            }
            // The tagged codec is exact for every variant.
            if !matches!(v, Value::Null | Value::Bool(_) | Value::Int64(_) | Value::String(_)) {
                let text = tagged_text(&v).unwrap_or_default();
                if !text.is_empty() {
                    let decoded = decode_tagged(&text).unwrap();
                    if let (Value::Float64(a), Value::Float64(b)) = (&decoded, &v) {
                        assert_eq!(a.is_nan(), b.is_nan());
                    } else {
                        assert_eq!(decoded, v);
                    }
                }
            }
        }
    }

    #[test]
    fn temporal_text_preserves_order() {
        let dates = ["1969-12-31", "1970-01-01", "2024-02-29", "2024-03-01"];
        let encoded: Vec<String> = dates
            .iter()
            .map(|d| {
                match encode_cell(&Value::Date(crate::datetime::parse_date(d).unwrap())).unwrap() {
                    Cell::Text(s) => s,
                    other => panic!("expected text cell, got {:?}", other),
                }
            })
            .collect();
        let mut sorted = encoded.clone();
        sorted.sort();
        assert_eq!(encoded, sorted);
    }

    #[test]
    fn struct_field_order_survives() {
        let v = Value::Struct(vec![
            ("z".into(), Value::Int64(1)),
            ("a".into(), Value::Int64(2)),
        ]);
        let back = decode_tagged(&tagged_text(&v).unwrap()).unwrap();
        assert_eq!(back.to_struct().unwrap()[0].0, "z");
    }

    #[test]
    fn plain_json_array_keeps_scalars_native() {
        let json = array_plain_json(&[Value::Int64(1), Value::from("x"), Value::Null]).unwrap();
        assert_eq!(json, r#"[1,"x",null]"#);
    }

    #[test]
    fn nested_array_type_checks() {
        let v = Value::Array(vec![Value::Array(vec![Value::Int64(1)])]);
        let back = decode_tagged(&tagged_text(&v).unwrap()).unwrap();
        assert_eq!(back.data_type(), DataType::Array(Box::new(DataType::Array(Box::new(DataType::Int64)))));
    }
}
