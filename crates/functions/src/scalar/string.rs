use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use skiffql_common::{Error, Result};
use skiffql_core::{Value, encode};

use super::{arg_error, int_arg, text_arg};

/// STRING inputs count code points, BYTES inputs count octets.
pub fn length(args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Bytes(b) => Ok(Value::Int64(b.len() as i64)),
        other => Ok(Value::Int64(other.to_text()?.chars().count() as i64)),
    }
}

pub fn byte_length(args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Bytes(b) => Ok(Value::Int64(b.len() as i64)),
        other => Ok(Value::Int64(other.to_text()?.len() as i64)),
    }
}

pub fn char_length(args: &[Value]) -> Result<Value> {
    Ok(Value::Int64(text_arg("CHAR_LENGTH", args, 0)?.chars().count() as i64))
}

pub fn concat(args: &[Value]) -> Result<Value> {
    if args.iter().any(|v| matches!(v.unwrap_safe().0, Value::Bytes(_))) {
        let mut out = Vec::new();
        for (i, v) in args.iter().enumerate() {
            out.extend(v.to_bytes().map_err(|e| arg_error("CONCAT", i + 1, e))?);
        }
        return Ok(Value::Bytes(out));
    }
    let mut out = String::new();
    for (i, v) in args.iter().enumerate() {
        out.push_str(&v.to_text().map_err(|e| arg_error("CONCAT", i + 1, e))?);
    }
    Ok(Value::String(out))
}

pub fn lower(args: &[Value]) -> Result<Value> {
    Ok(Value::String(text_arg("LOWER", args, 0)?.to_lowercase()))
}

pub fn upper(args: &[Value]) -> Result<Value> {
    Ok(Value::String(text_arg("UPPER", args, 0)?.to_uppercase()))
}

fn trim_set(args: &[Value], func: &str) -> Result<Option<Vec<char>>> {
    if args.len() > 1 {
        Ok(Some(text_arg(func, args, 1)?.chars().collect()))
    } else {
        Ok(None)
    }
}

pub fn trim(args: &[Value]) -> Result<Value> {
    let s = text_arg("TRIM", args, 0)?;
    Ok(Value::String(match trim_set(args, "TRIM")? {
        Some(set) => s.trim_matches(|c| set.contains(&c)).to_string(),
        None => s.trim().to_string(),
    }))
}

pub fn ltrim(args: &[Value]) -> Result<Value> {
    let s = text_arg("LTRIM", args, 0)?;
    Ok(Value::String(match trim_set(args, "LTRIM")? {
        Some(set) => s.trim_start_matches(|c| set.contains(&c)).to_string(),
        None => s.trim_start().to_string(),
    }))
}

pub fn rtrim(args: &[Value]) -> Result<Value> {
    let s = text_arg("RTRIM", args, 0)?;
    Ok(Value::String(match trim_set(args, "RTRIM")? {
        Some(set) => s.trim_end_matches(|c| set.contains(&c)).to_string(),
        None => s.trim_end().to_string(),
    }))
}

pub fn left(args: &[Value]) -> Result<Value> {
    let n = int_arg("LEFT", args, 1)?;
    if n < 0 {
        return Err(arg_error("LEFT", 2, "length must be non-negative"));
    }
    match &args[0] {
        Value::Bytes(b) => Ok(Value::Bytes(b.iter().take(n as usize).copied().collect())),
        other => Ok(Value::String(other.to_text()?.chars().take(n as usize).collect())),
    }
}

pub fn right(args: &[Value]) -> Result<Value> {
    let n = int_arg("RIGHT", args, 1)?;
    if n < 0 {
        return Err(arg_error("RIGHT", 2, "length must be non-negative"));
    }
    match &args[0] {
        Value::Bytes(b) => {
            let skip = b.len().saturating_sub(n as usize);
            Ok(Value::Bytes(b[skip..].to_vec()))
        }
        other => {
            let chars: Vec<char> = other.to_text()?.chars().collect();
            let skip = chars.len().saturating_sub(n as usize);
            Ok(Value::String(chars[skip..].iter().collect()))
        }
    }
}

/// One-based SUBSTR with negative positions counting from the end.
pub fn substr(args: &[Value]) -> Result<Value> {
    let chars: Vec<char> = text_arg("SUBSTR", args, 0)?.chars().collect();
    let pos = int_arg("SUBSTR", args, 1)?;
    let start = if pos > 0 {
        (pos - 1) as usize
    } else if pos == 0 {
        0
    } else {
        chars.len().saturating_sub((-pos) as usize)
    };
    let len = if args.len() > 2 {
        let l = int_arg("SUBSTR", args, 2)?;
        if l < 0 {
            return Err(arg_error("SUBSTR", 3, "length must be non-negative"));
        }
        l as usize
    } else {
        chars.len()
    };
    Ok(Value::String(
        chars.iter().skip(start).take(len).collect(),
    ))
}

/// One-based position of the first occurrence, 0 when absent.
pub fn strpos(args: &[Value]) -> Result<Value> {
    let hay: Vec<char> = text_arg("STRPOS", args, 0)?.chars().collect();
    let needle: Vec<char> = text_arg("STRPOS", args, 1)?.chars().collect();
    if needle.is_empty() {
        return Ok(Value::Int64(1));
    }
    let pos = hay
        .windows(needle.len().min(hay.len().max(1)))
        .position(|w| w == needle.as_slice());
    Ok(Value::Int64(pos.map(|p| p as i64 + 1).unwrap_or(0)))
}

/// INSTR(source, target[, position[, occurrence]]).
pub fn instr(args: &[Value]) -> Result<Value> {
    let hay: Vec<char> = text_arg("INSTR", args, 0)?.chars().collect();
    let needle: Vec<char> = text_arg("INSTR", args, 1)?.chars().collect();
    let position = if args.len() > 2 { int_arg("INSTR", args, 2)? } else { 1 };
    let occurrence = if args.len() > 3 { int_arg("INSTR", args, 3)? } else { 1 };
    if occurrence < 1 {
        return Err(arg_error("INSTR", 4, "occurrence must be positive"));
    }
    if needle.is_empty() || position == 0 {
        return Ok(Value::Int64(0));
    }
    let mut found = 0i64;
    if position > 0 {
        let mut idx = (position - 1) as usize;
        while idx + needle.len() <= hay.len() {
            if hay[idx..idx + needle.len()] == needle[..] {
                found += 1;
                if found == occurrence {
                    return Ok(Value::Int64(idx as i64 + 1));
                }
            }
            idx += 1;
        }
    } else {
        let limit = hay.len().saturating_sub((-position) as usize - 1);
        let mut idx = limit.min(hay.len());
        loop {
            if idx + needle.len() <= hay.len() && hay[idx..idx + needle.len()] == needle[..] {
                found += 1;
                if found == occurrence {
                    return Ok(Value::Int64(idx as i64 + 1));
                }
            }
            if idx == 0 {
                break;
            }
            idx -= 1;
        }
    }
    Ok(Value::Int64(0))
}

pub fn starts_with(args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(
        text_arg("STARTS_WITH", args, 0)?.starts_with(&text_arg("STARTS_WITH", args, 1)?),
    ))
}

pub fn ends_with(args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(
        text_arg("ENDS_WITH", args, 0)?.ends_with(&text_arg("ENDS_WITH", args, 1)?),
    ))
}

pub fn replace(args: &[Value]) -> Result<Value> {
    let s = text_arg("REPLACE", args, 0)?;
    let from = text_arg("REPLACE", args, 1)?;
    let to = text_arg("REPLACE", args, 2)?;
    if from.is_empty() {
        return Ok(Value::String(s));
    }
    Ok(Value::String(s.replace(&from, &to)))
}

pub fn split(args: &[Value]) -> Result<Value> {
    let s = text_arg("SPLIT", args, 0)?;
    let sep = if args.len() > 1 {
        text_arg("SPLIT", args, 1)?
    } else {
        ",".to_string()
    };
    if sep.is_empty() {
        return Ok(Value::Array(
            s.chars().map(|c| Value::String(c.to_string())).collect(),
        ));
    }
    Ok(Value::Array(
        s.split(&sep).map(|part| Value::String(part.to_string())).collect(),
    ))
}

pub fn repeat(args: &[Value]) -> Result<Value> {
    let s = text_arg("REPEAT", args, 0)?;
    let n = int_arg("REPEAT", args, 1)?;
    if n < 0 {
        return Err(arg_error("REPEAT", 2, "count must be non-negative"));
    }
    Ok(Value::String(s.repeat(n as usize)))
}

pub fn reverse(args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Bytes(b) => Ok(Value::Bytes(b.iter().rev().copied().collect())),
        other => Ok(Value::String(other.to_text()?.chars().rev().collect())),
    }
}

fn pad(func: &str, args: &[Value], left_side: bool) -> Result<Value> {
    let s: Vec<char> = text_arg(func, args, 0)?.chars().collect();
    let width = int_arg(func, args, 1)?;
    if width < 0 {
        return Err(arg_error(func, 2, "length must be non-negative"));
    }
    let width = width as usize;
    let fill: Vec<char> = if args.len() > 2 {
        text_arg(func, args, 2)?.chars().collect()
    } else {
        vec![' ']
    };
    if fill.is_empty() {
        return Err(arg_error(func, 3, "pattern must not be empty"));
    }
    if s.len() >= width {
        return Ok(Value::String(s[..width].iter().collect()));
    }
    let padding: String = fill.iter().cycle().take(width - s.len()).collect();
    let body: String = s.iter().collect();
    Ok(Value::String(if left_side {
        format!("{}{}", padding, body)
    } else {
        format!("{}{}", body, padding)
    }))
}

pub fn lpad(args: &[Value]) -> Result<Value> {
    pad("LPAD", args, true)
}

pub fn rpad(args: &[Value]) -> Result<Value> {
    pad("RPAD", args, false)
}

pub fn initcap(args: &[Value]) -> Result<Value> {
    let s = text_arg("INITCAP", args, 0)?;
    let mut out = String::with_capacity(s.len());
    let mut start_of_word = true;
    for c in s.chars() {
        if c.is_alphanumeric() {
            if start_of_word {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            start_of_word = false;
        } else {
            out.push(c);
            start_of_word = true;
        }
    }
    Ok(Value::String(out))
}

pub fn ascii(args: &[Value]) -> Result<Value> {
    let s = text_arg("ASCII", args, 0)?;
    Ok(Value::Int64(s.chars().next().map(|c| c as i64).unwrap_or(0)))
}

pub fn chr(args: &[Value]) -> Result<Value> {
    let code = int_arg("CHR", args, 0)?;
    if code == 0 {
        return Ok(Value::String(String::new()));
    }
    let c = u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .ok_or_else(|| arg_error("CHR", 1, format!("invalid code point {}", code)))?;
    Ok(Value::String(c.to_string()))
}

pub fn to_code_points(args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Bytes(b) => Ok(Value::Array(
            b.iter().map(|byte| Value::Int64(*byte as i64)).collect(),
        )),
        other => Ok(Value::Array(
            other
                .to_text()?
                .chars()
                .map(|c| Value::Int64(c as i64))
                .collect(),
        )),
    }
}

pub fn code_points_to_string(args: &[Value]) -> Result<Value> {
    let points = args[0].to_array()?;
    let mut out = String::new();
    for (i, p) in points.iter().enumerate() {
        if p.is_null() {
            return Ok(Value::Null);
        }
        let code = p.to_int64()?;
        let c = u32::try_from(code)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| {
                arg_error("CODE_POINTS_TO_STRING", i + 1, format!("invalid code point {}", code))
            })?;
        out.push(c);
    }
    Ok(Value::String(out))
}

pub fn code_points_to_bytes(args: &[Value]) -> Result<Value> {
    let points = args[0].to_array()?;
    let mut out = Vec::with_capacity(points.len());
    for (i, p) in points.iter().enumerate() {
        if p.is_null() {
            return Ok(Value::Null);
        }
        let code = p.to_int64()?;
        let byte = u8::try_from(code).map_err(|_| {
            arg_error("CODE_POINTS_TO_BYTES", i + 1, format!("byte {} out of range", code))
        })?;
        out.push(byte);
    }
    Ok(Value::Bytes(out))
}

fn compile(func: &str, pattern: &str) -> Result<regex::Regex> {
    regex::Regex::new(pattern).map_err(|e| arg_error(func, 2, e))
}

pub fn regexp_contains(args: &[Value]) -> Result<Value> {
    let s = text_arg("REGEXP_CONTAINS", args, 0)?;
    let re = compile("REGEXP_CONTAINS", &text_arg("REGEXP_CONTAINS", args, 1)?)?;
    Ok(Value::Bool(re.is_match(&s)))
}

pub fn regexp_extract(args: &[Value]) -> Result<Value> {
    let s = text_arg("REGEXP_EXTRACT", args, 0)?;
    let re = compile("REGEXP_EXTRACT", &text_arg("REGEXP_EXTRACT", args, 1)?)?;
    let found = match re.captures(&s) {
        Some(caps) => match caps.get(1).or_else(|| caps.get(0)) {
            Some(m) => Some(m.as_str().to_string()),
            None => None,
        },
        None => None,
    };
    Ok(found.map(Value::String).unwrap_or(Value::Null))
}

pub fn regexp_extract_all(args: &[Value]) -> Result<Value> {
    let s = text_arg("REGEXP_EXTRACT_ALL", args, 0)?;
    let re = compile("REGEXP_EXTRACT_ALL", &text_arg("REGEXP_EXTRACT_ALL", args, 1)?)?;
    let items = re
        .captures_iter(&s)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(0)))
        .map(|m| Value::String(m.as_str().to_string()))
        .collect();
    Ok(Value::Array(items))
}

pub fn regexp_replace(args: &[Value]) -> Result<Value> {
    let s = text_arg("REGEXP_REPLACE", args, 0)?;
    let re = compile("REGEXP_REPLACE", &text_arg("REGEXP_REPLACE", args, 1)?)?;
    // the dialect uses \1 backreferences; the regex crate uses $1
    let replacement = text_arg("REGEXP_REPLACE", args, 2)?
        .replace("$", "$$")
        .replace("\\\\", "\u{0}")
        .replace('\\', "$")
        .replace('\u{0}', "\\");
    Ok(Value::String(re.replace_all(&s, replacement.as_str()).into_owned()))
}

pub fn to_hex(args: &[Value]) -> Result<Value> {
    Ok(Value::String(hex::encode(args[0].to_bytes()?)))
}

pub fn from_hex(args: &[Value]) -> Result<Value> {
    let s = text_arg("FROM_HEX", args, 0)?;
    hex::decode(&s)
        .map(Value::Bytes)
        .map_err(|e| arg_error("FROM_HEX", 1, e))
}

pub fn to_base64(args: &[Value]) -> Result<Value> {
    Ok(Value::String(BASE64.encode(args[0].to_bytes()?)))
}

pub fn from_base64(args: &[Value]) -> Result<Value> {
    let s = text_arg("FROM_BASE64", args, 0)?;
    BASE64
        .decode(&s)
        .map(Value::Bytes)
        .map_err(|e| arg_error("FROM_BASE64", 1, e))
}

/// printf-style FORMAT with the dialect extensions: %t is the value's
/// default text form, %T its SQL literal form.
pub fn format(args: &[Value]) -> Result<Value> {
    if args[0].is_null() {
        return Ok(Value::Null);
    }
    let spec = text_arg("FORMAT", args, 0)?;
    let mut out = String::with_capacity(spec.len());
    let mut next_arg = 1usize;
    let mut chars = spec.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut directive = String::new();
        let verb = loop {
            match chars.next() {
                Some('%') if directive.is_empty() => {
                    out.push('%');
                    break None;
                }
                Some(v) if v.is_ascii_alphabetic() => break Some(v),
                Some(flag) => directive.push(flag),
                None => {
                    return Err(arg_error("FORMAT", 1, "dangling % directive"));
                }
            }
        };
        let Some(verb) = verb else { continue };
        let value = args.get(next_arg).ok_or_else(|| {
            arg_error("FORMAT", next_arg + 1, "missing argument for directive")
        })?;
        next_arg += 1;
        let rendered = render_directive(verb, &directive, value)?;
        out.push_str(&rendered);
    }
    Ok(Value::String(out))
}

fn render_directive(verb: char, flags: &str, value: &Value) -> Result<String> {
    let (width_part, precision_part) = match flags.split_once('.') {
        Some((w, p)) => (w, Some(p)),
        None => (flags, None),
    };
    let width: Option<usize> = {
        let digits: String = width_part.chars().filter(|c| c.is_ascii_digit()).collect();
        let digits = digits.trim_start_matches('0');
        digits.parse().ok()
    };
    let precision: Option<usize> = precision_part.and_then(|p| p.parse().ok());
    let body = match verb {
        'd' | 'i' => {
            if value.is_null() {
                "NULL".to_string()
            } else {
                value.to_int64()?.to_string()
            }
        }
        'f' | 'F' => {
            let p = precision.unwrap_or(6);
            format!("{:.*}", p, value.to_float64()?)
        }
        'e' | 'E' => {
            let p = precision.unwrap_or(6);
            let s = format!("{:.*e}", p, value.to_float64()?);
            if verb == 'E' { s.to_uppercase() } else { s }
        }
        'g' | 'G' => encode::float_text(value.to_float64()?),
        's' => {
            if value.is_null() {
                "NULL".to_string()
            } else {
                value.to_text()?
            }
        }
        'x' => format!("{:x}", value.to_int64()?),
        'X' => format!("{:X}", value.to_int64()?),
        'o' => format!("{:o}", value.to_int64()?),
        't' => default_text(value)?,
        'T' => sql_literal(value)?,
        other => {
            return Err(Error::invalid_argument(format!(
                "FORMAT: unsupported directive %{}",
                other
            )));
        }
    };
    Ok(match width {
        Some(w) if body.len() < w => {
            if flags.contains('-') {
                format!("{:<width$}", body, width = w)
            } else {
                format!("{:>width$}", body, width = w)
            }
        }
        _ => body,
    })
}

fn default_text(value: &Value) -> Result<String> {
    match value {
        Value::Null => Ok("NULL".to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(default_text).collect::<Result<_>>()?;
            Ok(format!("[{}]", parts.join(", ")))
        }
        Value::Struct(fields) => {
            let parts: Vec<String> = fields
                .iter()
                .map(|(_, v)| default_text(v))
                .collect::<Result<_>>()?;
            Ok(format!("({})", parts.join(", ")))
        }
        other => other.to_text(),
    }
}

/// The SQL literal form of a value, used by %T.
pub fn sql_literal(value: &Value) -> Result<String> {
    match value {
        Value::Null => Ok("NULL".to_string()),
        Value::String(s) => Ok(format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))),
        Value::Bytes(b) => Ok(format!("b\"{}\"", String::from_utf8_lossy(b))),
        Value::Date(_) => Ok(format!("DATE \"{}\"", value.to_text()?)),
        Value::Time(_) => Ok(format!("TIME \"{}\"", value.to_text()?)),
        Value::DateTime(_) => Ok(format!("DATETIME \"{}\"", value.to_text()?)),
        Value::Timestamp(_) => Ok(format!("TIMESTAMP \"{}\"", value.to_text()?)),
        Value::Numeric(d) => Ok(format!("NUMERIC \"{}\"", d)),
        Value::BigNumeric(d) => Ok(format!("BIGNUMERIC \"{}\"", d)),
        Value::Interval(iv) => Ok(format!("INTERVAL \"{}\"", iv)),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(sql_literal).collect::<Result<_>>()?;
            Ok(format!("[{}]", parts.join(", ")))
        }
        Value::Struct(fields) => {
            let parts: Vec<String> = fields.iter().map(|(_, v)| sql_literal(v)).collect::<Result<_>>()?;
            Ok(format!("({})", parts.join(", ")))
        }
        Value::Safe(inner) => sql_literal(inner),
        other => other.to_text(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_counts_code_points_not_bytes() {
        let s = Value::from("héllo");
        assert_eq!(length(&[s.clone()]).unwrap(), Value::Int64(5));
        assert_eq!(byte_length(&[s]).unwrap(), Value::Int64(6));
        assert_eq!(
            length(&[Value::Bytes(vec![1, 2, 3])]).unwrap(),
            Value::Int64(3)
        );
    }

    #[test]
    fn substr_is_one_based_with_negative_start() {
        let s = Value::from("abcdef");
        assert_eq!(
            substr(&[s.clone(), Value::Int64(2), Value::Int64(3)]).unwrap(),
            Value::from("bcd")
        );
        assert_eq!(
            substr(&[s, Value::Int64(-2)]).unwrap(),
            Value::from("ef")
        );
    }

    #[test]
    fn format_value_directives() {
        let out = format(&[
            Value::from("%d rows, %t, %T"),
            Value::Int64(3),
            Value::Array(vec![Value::Int64(1), Value::Int64(2)]),
            Value::from("it's"),
        ])
        .unwrap();
        assert_eq!(out, Value::from("3 rows, [1, 2], \"it's\""));
    }

    #[test]
    fn regexp_replace_backreferences() {
        let out = regexp_replace(&[
            Value::from("ab-cd"),
            Value::from(r"(\w+)-(\w+)"),
            Value::from(r"\2-\1"),
        ])
        .unwrap();
        assert_eq!(out, Value::from("cd-ab"));
    }

    #[test]
    fn initcap_capitalizes_word_starts() {
        assert_eq!(
            initcap(&[Value::from("hello wORLD-foo")]).unwrap(),
            Value::from("Hello World-Foo")
        );
    }
}
