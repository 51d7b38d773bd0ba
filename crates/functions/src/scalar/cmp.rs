use std::cmp::Ordering;

use skiffql_common::Result;
use skiffql_core::{Value, encode};

fn compared(a: &Value, b: &Value) -> Result<Option<Ordering>> {
    if a.is_null() || b.is_null() {
        return Ok(None);
    }
    Ok(Some(a.compare(b)?))
}

fn bool_or_null(ord: Option<Ordering>, f: impl Fn(Ordering) -> bool) -> Value {
    match ord {
        Some(o) => Value::Bool(f(o)),
        None => Value::Null,
    }
}

pub fn eq(args: &[Value]) -> Result<Value> {
    Ok(bool_or_null(compared(&args[0], &args[1])?, |o| o.is_eq()))
}

pub fn neq(args: &[Value]) -> Result<Value> {
    Ok(bool_or_null(compared(&args[0], &args[1])?, |o| o.is_ne()))
}

pub fn lt(args: &[Value]) -> Result<Value> {
    Ok(bool_or_null(compared(&args[0], &args[1])?, |o| o.is_lt()))
}

pub fn lte(args: &[Value]) -> Result<Value> {
    Ok(bool_or_null(compared(&args[0], &args[1])?, |o| o.is_le()))
}

pub fn gt(args: &[Value]) -> Result<Value> {
    Ok(bool_or_null(compared(&args[0], &args[1])?, |o| o.is_gt()))
}

pub fn gte(args: &[Value]) -> Result<Value> {
    Ok(bool_or_null(compared(&args[0], &args[1])?, |o| o.is_ge()))
}

pub fn between(args: &[Value]) -> Result<Value> {
    let low = lte(&[args[1].clone(), args[0].clone()])?;
    let high = lte(&[args[0].clone(), args[2].clone()])?;
    match (low, high) {
        (Value::Bool(false), _) | (_, Value::Bool(false)) => Ok(Value::Bool(false)),
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        _ => Ok(Value::Bool(true)),
    }
}

/// IN over an explicit list: TRUE on any match, NULL if no match but a
/// NULL was seen, FALSE otherwise.
pub fn in_list(args: &[Value]) -> Result<Value> {
    let needle = &args[0];
    if needle.is_null() {
        return Ok(Value::Null);
    }
    let mut saw_null = false;
    for candidate in &args[1..] {
        if candidate.is_null() {
            saw_null = true;
            continue;
        }
        if let Some(Ordering::Equal) = compared(needle, candidate)? {
            return Ok(Value::Bool(true));
        }
    }
    Ok(if saw_null { Value::Null } else { Value::Bool(false) })
}

/// IS DISTINCT FROM treats NULL as comparable and incompatible types as
/// distinct.
pub fn is_distinct_from(args: &[Value]) -> Result<Value> {
    let a = args[0].unwrap_safe().0;
    let b = args[1].unwrap_safe().0;
    let distinct = match (a.is_null(), b.is_null()) {
        (true, true) => false,
        (true, false) | (false, true) => true,
        (false, false) => match a.compare(b) {
            Ok(ord) => ord != Ordering::Equal,
            Err(_) => true,
        },
    };
    Ok(Value::Bool(distinct))
}

pub fn is_not_distinct_from(args: &[Value]) -> Result<Value> {
    match is_distinct_from(args)? {
        Value::Bool(b) => Ok(Value::Bool(!b)),
        other => Ok(other),
    }
}

/// Case-sensitive LIKE over code points; `%` spans, `_` matches one.
pub fn like(args: &[Value]) -> Result<Value> {
    let text = args[0].to_text()?;
    let pattern = args[1].to_text()?;
    Ok(Value::Bool(like_match(&text, &pattern)))
}

fn like_match(text: &str, pattern: &str) -> bool {
    let t: Vec<char> = text.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    like_inner(&t, &p)
}

fn like_inner(text: &[char], pattern: &[char]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some('%') => {
            for skip in 0..=text.len() {
                if like_inner(&text[skip..], &pattern[1..]) {
                    return true;
                }
            }
            false
        }
        Some('_') => !text.is_empty() && like_inner(&text[1..], &pattern[1..]),
        Some('\\') if pattern.len() > 1 => {
            !text.is_empty() && text[0] == pattern[1] && like_inner(&text[1..], &pattern[2..])
        }
        Some(c) => !text.is_empty() && text[0] == *c && like_inner(&text[1..], &pattern[1..]),
    }
}

pub fn coalesce(args: &[Value]) -> Result<Value> {
    for v in args {
        if !v.is_null() {
            return Ok(v.clone());
        }
    }
    Ok(Value::Null)
}

pub fn ifnull(args: &[Value]) -> Result<Value> {
    if args[0].is_null() {
        Ok(args[1].clone())
    } else {
        Ok(args[0].clone())
    }
}

pub fn nullif(args: &[Value]) -> Result<Value> {
    match compared(&args[0], &args[1])? {
        Some(Ordering::Equal) => Ok(Value::Null),
        _ => Ok(args[0].clone()),
    }
}

pub fn if_fn(args: &[Value]) -> Result<Value> {
    let cond = if args[0].is_null() {
        false
    } else {
        args[0].to_bool()?
    };
    if cond {
        Ok(args[1].clone())
    } else {
        Ok(args[2].clone())
    }
}

/// Membership in an array value, for `x IN UNNEST(arr)`.
pub fn array_in(args: &[Value]) -> Result<Value> {
    if args[0].is_null() || args[1].is_null() {
        return Ok(Value::Null);
    }
    let items = args[1].to_array()?;
    let mut list = Vec::with_capacity(items.len() + 1);
    list.push(args[0].clone());
    list.extend(items);
    in_list(&list)
}

/// DISTINCT-style grouping key, exposed for diagnostics.
pub fn canonical(args: &[Value]) -> Result<Value> {
    Ok(Value::String(encode::canonical_key(&args[0])))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_is_case_sensitive() {
        assert_eq!(
            like(&[Value::from("alice_b"), Value::from("alice%")]).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            like(&[Value::from("Alice"), Value::from("alice%")]).unwrap(),
            Value::Bool(false)
        );
        assert_eq!(
            like(&[Value::from("ab"), Value::from("a_")]).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn in_list_null_semantics() {
        assert_eq!(
            in_list(&[Value::Int64(1), Value::Int64(2), Value::Null]).unwrap(),
            Value::Null
        );
        assert_eq!(
            in_list(&[Value::Int64(2), Value::Int64(2), Value::Null]).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn distinct_from_handles_nulls_and_mismatches() {
        assert_eq!(
            is_distinct_from(&[Value::Null, Value::Null]).unwrap(),
            Value::Bool(false)
        );
        assert_eq!(
            is_distinct_from(&[Value::Int64(1), Value::Null]).unwrap(),
            Value::Bool(true)
        );
        // incompatible types are distinct, not an error
        assert_eq!(
            is_distinct_from(&[Value::Int64(1), Value::from("1")]).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn numeric_comparison_across_cells() {
        assert_eq!(
            eq(&[Value::Int64(3), Value::numeric_from_i64(3)]).unwrap(),
            Value::Bool(true)
        );
    }
}
