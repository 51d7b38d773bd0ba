use skiffql_common::{Error, Result};
use skiffql_core::{Value, encode};

use super::{arg_error, text_arg};

/// Semantic JSON form of a value: structs become objects in declared
/// field order, arrays become arrays, temporal kinds become their text
/// forms, decimals become numbers.
pub fn value_to_json(value: &Value) -> Result<serde_json::Value> {
    match value.unwrap_safe().0 {
        Value::Null => Ok(serde_json::Value::Null),
        Value::Bool(b) => Ok(serde_json::Value::Bool(*b)),
        Value::Int64(v) => Ok(serde_json::Value::from(*v)),
        Value::Float64(f) => {
            if f.is_finite() {
                Ok(serde_json::Value::from(f.into_inner()))
            } else {
                Ok(serde_json::Value::String(encode::float_text(f.into_inner())))
            }
        }
        Value::Numeric(d) | Value::BigNumeric(d) => {
            let text = d.to_canonical_string();
            match text.parse::<f64>() {
                Ok(n) if n.is_finite() => Ok(serde_json::Value::from(n)),
                _ => Ok(serde_json::Value::String(text)),
            }
        }
        Value::Json(j) => Ok(j.clone()),
        Value::Array(items) => Ok(serde_json::Value::Array(
            items.iter().map(value_to_json).collect::<Result<_>>()?,
        )),
        Value::Struct(fields) => {
            let mut map = serde_json::Map::with_capacity(fields.len());
            for (name, v) in fields {
                map.insert(name.clone(), value_to_json(v)?);
            }
            Ok(serde_json::Value::Object(map))
        }
        other => Ok(serde_json::Value::String(other.to_text()?)),
    }
}

pub fn json_to_value(j: &serde_json::Value) -> Value {
    match j {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int64(i)
            } else {
                Value::float64(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => Value::Array(items.iter().map(json_to_value).collect()),
        serde_json::Value::Object(map) => Value::Struct(
            map.iter().map(|(k, v)| (k.clone(), json_to_value(v))).collect(),
        ),
    }
}

pub fn parse_json(args: &[Value]) -> Result<Value> {
    let text = text_arg("PARSE_JSON", args, 0)?;
    serde_json::from_str(&text)
        .map(Value::Json)
        .map_err(|e| arg_error("PARSE_JSON", 1, e))
}

pub fn to_json(args: &[Value]) -> Result<Value> {
    Ok(Value::Json(value_to_json(&args[0])?))
}

pub fn to_json_string(args: &[Value]) -> Result<Value> {
    let json = value_to_json(&args[0])?;
    let pretty = args.get(1).map(|v| v.to_bool()).transpose()?.unwrap_or(false);
    Ok(Value::String(if pretty {
        serde_json::to_string_pretty(&json).map_err(|e| Error::internal(e.to_string()))?
    } else {
        json.to_string()
    }))
}

pub fn json_type(args: &[Value]) -> Result<Value> {
    let j = args[0].to_json_value().map_err(|e| arg_error("JSON_TYPE", 1, e))?;
    Ok(Value::String(
        match j {
            serde_json::Value::Null => "null",
            serde_json::Value::Bool(_) => "boolean",
            serde_json::Value::Number(_) => "number",
            serde_json::Value::String(_) => "string",
            serde_json::Value::Array(_) => "array",
            serde_json::Value::Object(_) => "object",
        }
        .to_string(),
    ))
}

/// Resolves a `$.a.b[0]` JSONPath-style selector.
fn resolve_path<'a>(root: &'a serde_json::Value, path: &str) -> Result<Option<&'a serde_json::Value>> {
    let mut current = root;
    let trimmed = path.trim();
    let body = trimmed
        .strip_prefix('$')
        .ok_or_else(|| Error::invalid_argument(format!("JSON path must start with $: {:?}", path)))?;
    let mut rest = body;
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('.') {
            let end = after
                .find(['.', '['])
                .unwrap_or(after.len());
            let key = &after[..end];
            if key.is_empty() {
                return Err(Error::invalid_argument(format!("bad JSON path {:?}", path)));
            }
            current = match current.get(key) {
                Some(next) => next,
                None => return Ok(None),
            };
            rest = &after[end..];
        } else if let Some(after) = rest.strip_prefix('[') {
            let end = after
                .find(']')
                .ok_or_else(|| Error::invalid_argument(format!("bad JSON path {:?}", path)))?;
            let idx: usize = after[..end]
                .trim_matches(['\'', '"'])
                .parse()
                .map_err(|_| Error::invalid_argument(format!("bad JSON index in {:?}", path)))?;
            current = match current.get(idx) {
                Some(next) => next,
                None => return Ok(None),
            };
            rest = &after[end + 1..];
        } else {
            return Err(Error::invalid_argument(format!("bad JSON path {:?}", path)));
        }
    }
    Ok(Some(current))
}

/// JSON_VALUE: scalar result as STRING, NULL for non-scalars.
pub fn json_value(args: &[Value]) -> Result<Value> {
    let j = args[0].to_json_value().map_err(|e| arg_error("JSON_VALUE", 1, e))?;
    let path = if args.len() > 1 {
        text_arg("JSON_VALUE", args, 1)?
    } else {
        "$".to_string()
    };
    match resolve_path(&j, &path)? {
        Some(serde_json::Value::String(s)) => Ok(Value::String(s.clone())),
        Some(serde_json::Value::Number(n)) => Ok(Value::String(n.to_string())),
        Some(serde_json::Value::Bool(b)) => Ok(Value::String(b.to_string())),
        _ => Ok(Value::Null),
    }
}

/// JSON_QUERY: any result, as JSON.
pub fn json_query(args: &[Value]) -> Result<Value> {
    let j = args[0].to_json_value().map_err(|e| arg_error("JSON_QUERY", 1, e))?;
    let path = if args.len() > 1 {
        text_arg("JSON_QUERY", args, 1)?
    } else {
        "$".to_string()
    };
    Ok(resolve_path(&j, &path)?
        .map(|found| Value::Json(found.clone()))
        .unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_json_string_preserves_struct_field_order() {
        let v = Value::Struct(vec![
            ("s".into(), Value::Null),
            ("foo".into(), Value::Int64(4)),
        ]);
        assert_eq!(
            to_json_string(&[v]).unwrap(),
            Value::from(r#"{"s":null,"foo":4}"#)
        );
    }

    #[test]
    fn json_value_extracts_scalars_only() {
        let j = parse_json(&[Value::from(r#"{"a": {"b": [1, "x"]}}"#)]).unwrap();
        assert_eq!(
            json_value(&[j.clone(), Value::from("$.a.b[1]")]).unwrap(),
            Value::from("x")
        );
        assert_eq!(json_value(&[j.clone(), Value::from("$.a")]).unwrap(), Value::Null);
        assert_eq!(
            json_query(&[j, Value::from("$.a.b")]).unwrap(),
            Value::Json(serde_json::json!([1, "x"]))
        );
    }
}
