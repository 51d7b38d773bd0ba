//! Registration of the whole built-in catalog into a host-store
//! connection. Every function lands under the reserved `skiff_` prefix;
//! each scalar additionally gets a `skiff_safe_`-prefixed variant that
//! absorbs row-level errors into NULL (the `SAFE.` call prefix).

use std::sync::{Arc, LazyLock, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use rusqlite::functions::FunctionFlags;
use skiffql_common::{Error, Result};
use skiffql_core::{Value, encode};

use crate::aggregate;
use crate::bind::{self, AggBody, AggregateAdapter, WindowAdapter, engine_error};
use crate::options::CallOptions;
use crate::scalar;
use crate::window::WindowKind;

pub const FUNC_PREFIX: &str = "skiff_";

/// Session-scoped "now": pinned for reproducible time functions or the
/// wall clock otherwise.
#[derive(Clone, Default)]
pub struct SessionClock {
    pinned: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl SessionClock {
    pub fn now(&self) -> DateTime<Utc> {
        self.pinned
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .unwrap_or_else(Utc::now)
    }

    pub fn pin(&self, t: DateTime<Utc>) {
        *self.pinned.lock().unwrap_or_else(|e| e.into_inner()) = Some(t);
    }

    pub fn clear(&self) {
        *self.pinned.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

type ScalarFn = fn(&[Value]) -> skiffql_common::Result<Value>;

struct ScalarDef {
    name: &'static str,
    display: &'static str,
    min_args: usize,
    /// `usize::MAX` means variadic.
    max_args: usize,
    /// NULL-safe functions see their NULL arguments; the rest resolve
    /// to NULL without being called.
    null_safe: bool,
    deterministic: bool,
    body: ScalarFn,
}

const VARIADIC: usize = usize::MAX;

macro_rules! scalar_def {
    ($name:literal, $display:literal, $min:expr, $max:expr, $null_safe:expr, $det:expr, $body:expr) => {
        ScalarDef {
            name: $name,
            display: $display,
            min_args: $min,
            max_args: $max,
            null_safe: $null_safe,
            deterministic: $det,
            body: $body,
        }
    };
}

fn scalar_defs() -> Vec<ScalarDef> {
    use scalar::*;
    vec![
        // operators
        scalar_def!("add", "ADD", 2, 2, false, true, ops::add),
        scalar_def!("sub", "SUB", 2, 2, false, true, ops::sub),
        scalar_def!("mul", "MUL", 2, 2, false, true, ops::mul),
        scalar_def!("div", "DIV", 2, 2, false, true, ops::div),
        scalar_def!("neg", "NEG", 1, 1, false, true, ops::neg),
        scalar_def!("bit_not", "BIT_NOT", 1, 1, false, true, math::bit_not),
        scalar_def!("bit_and", "BIT_AND", 2, 2, false, true, math::bit_and),
        scalar_def!("bit_or", "BIT_OR", 2, 2, false, true, math::bit_or),
        scalar_def!("bit_xor", "BIT_XOR", 2, 2, false, true, math::bit_xor),
        scalar_def!("bit_left_shift", "BIT_LEFT_SHIFT", 2, 2, false, true, math::bit_lshift),
        scalar_def!("bit_right_shift", "BIT_RIGHT_SHIFT", 2, 2, false, true, math::bit_rshift),
        // comparisons
        scalar_def!("eq", "EQ", 2, 2, false, true, cmp::eq),
        scalar_def!("neq", "NOT_EQ", 2, 2, false, true, cmp::neq),
        scalar_def!("lt", "LT", 2, 2, false, true, cmp::lt),
        scalar_def!("lte", "LTE", 2, 2, false, true, cmp::lte),
        scalar_def!("gt", "GT", 2, 2, false, true, cmp::gt),
        scalar_def!("gte", "GTE", 2, 2, false, true, cmp::gte),
        scalar_def!("between", "BETWEEN", 3, 3, false, true, cmp::between),
        scalar_def!("in", "IN", 1, VARIADIC, true, true, cmp::in_list),
        scalar_def!("like", "LIKE", 2, 2, false, true, cmp::like),
        scalar_def!("is_distinct_from", "IS_DISTINCT_FROM", 2, 2, true, true, cmp::is_distinct_from),
        scalar_def!("is_not_distinct_from", "IS_NOT_DISTINCT_FROM", 2, 2, true, true, cmp::is_not_distinct_from),
        scalar_def!("array_in", "ARRAY_IN", 2, 2, true, true, cmp::array_in),
        // conditionals
        scalar_def!("coalesce", "COALESCE", 1, VARIADIC, true, true, cmp::coalesce),
        scalar_def!("ifnull", "IFNULL", 2, 2, true, true, cmp::ifnull),
        scalar_def!("nullif", "NULLIF", 2, 2, true, true, cmp::nullif),
        scalar_def!("if", "IF", 3, 3, true, true, cmp::if_fn),
        // math
        scalar_def!("abs", "ABS", 1, 1, false, true, math::abs),
        scalar_def!("sign", "SIGN", 1, 1, false, true, math::sign),
        scalar_def!("round", "ROUND", 1, 2, false, true, math::round),
        scalar_def!("trunc", "TRUNC", 1, 2, false, true, math::trunc),
        scalar_def!("ceil", "CEIL", 1, 1, false, true, math::ceil),
        scalar_def!("ceiling", "CEILING", 1, 1, false, true, math::ceil),
        scalar_def!("floor", "FLOOR", 1, 1, false, true, math::floor),
        scalar_def!("sqrt", "SQRT", 1, 1, false, true, math::sqrt),
        scalar_def!("pow", "POW", 2, 2, false, true, math::pow),
        scalar_def!("power", "POWER", 2, 2, false, true, math::pow),
        scalar_def!("exp", "EXP", 1, 1, false, true, math::exp),
        scalar_def!("ln", "LN", 1, 1, false, true, math::ln),
        scalar_def!("log", "LOG", 1, 2, false, true, math::log),
        scalar_def!("log10", "LOG10", 1, 1, false, true, math::log10),
        scalar_def!("mod", "MOD", 2, 2, false, true, math::mod_op),
        scalar_def!("int_div", "DIV", 2, 2, false, true, math::int_div),
        scalar_def!("safe_divide", "SAFE_DIVIDE", 2, 2, false, true, math::safe_divide),
        scalar_def!("ieee_divide", "IEEE_DIVIDE", 2, 2, false, true, math::ieee_divide),
        scalar_def!("is_nan", "IS_NAN", 1, 1, false, true, math::is_nan),
        scalar_def!("is_inf", "IS_INF", 1, 1, false, true, math::is_inf),
        scalar_def!("greatest", "GREATEST", 1, VARIADIC, true, true, math::greatest),
        scalar_def!("least", "LEAST", 1, VARIADIC, true, true, math::least),
        scalar_def!("rand", "RAND", 0, 0, true, false, math::rand),
        scalar_def!("range_bucket", "RANGE_BUCKET", 2, 2, false, true, math::range_bucket),
        scalar_def!("sin", "SIN", 1, 1, false, true, math::sin),
        scalar_def!("cos", "COS", 1, 1, false, true, math::cos),
        scalar_def!("tan", "TAN", 1, 1, false, true, math::tan),
        scalar_def!("asin", "ASIN", 1, 1, false, true, math::asin),
        scalar_def!("acos", "ACOS", 1, 1, false, true, math::acos),
        scalar_def!("atan", "ATAN", 1, 1, false, true, math::atan),
        scalar_def!("atan2", "ATAN2", 2, 2, false, true, math::atan2),
        scalar_def!("sinh", "SINH", 1, 1, false, true, math::sinh),
        scalar_def!("cosh", "COSH", 1, 1, false, true, math::cosh),
        scalar_def!("tanh", "TANH", 1, 1, false, true, math::tanh),
        scalar_def!("asinh", "ASINH", 1, 1, false, true, math::asinh),
        scalar_def!("acosh", "ACOSH", 1, 1, false, true, math::acosh),
        scalar_def!("atanh", "ATANH", 1, 1, false, true, math::atanh),
        // strings
        scalar_def!("concat", "CONCAT", 1, VARIADIC, false, true, string::concat),
        scalar_def!("length", "LENGTH", 1, 1, false, true, string::length),
        scalar_def!("byte_length", "BYTE_LENGTH", 1, 1, false, true, string::byte_length),
        scalar_def!("char_length", "CHAR_LENGTH", 1, 1, false, true, string::char_length),
        scalar_def!("character_length", "CHARACTER_LENGTH", 1, 1, false, true, string::char_length),
        scalar_def!("lower", "LOWER", 1, 1, false, true, string::lower),
        scalar_def!("upper", "UPPER", 1, 1, false, true, string::upper),
        scalar_def!("trim", "TRIM", 1, 2, false, true, string::trim),
        scalar_def!("ltrim", "LTRIM", 1, 2, false, true, string::ltrim),
        scalar_def!("rtrim", "RTRIM", 1, 2, false, true, string::rtrim),
        scalar_def!("left", "LEFT", 2, 2, false, true, string::left),
        scalar_def!("right", "RIGHT", 2, 2, false, true, string::right),
        scalar_def!("substr", "SUBSTR", 2, 3, false, true, string::substr),
        scalar_def!("substring", "SUBSTRING", 2, 3, false, true, string::substr),
        scalar_def!("strpos", "STRPOS", 2, 2, false, true, string::strpos),
        scalar_def!("instr", "INSTR", 2, 4, false, true, string::instr),
        scalar_def!("starts_with", "STARTS_WITH", 2, 2, false, true, string::starts_with),
        scalar_def!("ends_with", "ENDS_WITH", 2, 2, false, true, string::ends_with),
        scalar_def!("replace", "REPLACE", 3, 3, false, true, string::replace),
        scalar_def!("split", "SPLIT", 1, 2, false, true, string::split),
        scalar_def!("repeat", "REPEAT", 2, 2, false, true, string::repeat),
        scalar_def!("reverse", "REVERSE", 1, 1, false, true, string::reverse),
        scalar_def!("lpad", "LPAD", 2, 3, false, true, string::lpad),
        scalar_def!("rpad", "RPAD", 2, 3, false, true, string::rpad),
        scalar_def!("initcap", "INITCAP", 1, 1, false, true, string::initcap),
        scalar_def!("ascii", "ASCII", 1, 1, false, true, string::ascii),
        scalar_def!("chr", "CHR", 1, 1, false, true, string::chr),
        scalar_def!("to_code_points", "TO_CODE_POINTS", 1, 1, false, true, string::to_code_points),
        scalar_def!("code_points_to_string", "CODE_POINTS_TO_STRING", 1, 1, false, true, string::code_points_to_string),
        scalar_def!("code_points_to_bytes", "CODE_POINTS_TO_BYTES", 1, 1, false, true, string::code_points_to_bytes),
        scalar_def!("regexp_contains", "REGEXP_CONTAINS", 2, 2, false, true, string::regexp_contains),
        scalar_def!("regexp_extract", "REGEXP_EXTRACT", 2, 2, false, true, string::regexp_extract),
        scalar_def!("regexp_extract_all", "REGEXP_EXTRACT_ALL", 2, 2, false, true, string::regexp_extract_all),
        scalar_def!("regexp_replace", "REGEXP_REPLACE", 3, 3, false, true, string::regexp_replace),
        scalar_def!("format", "FORMAT", 1, VARIADIC, true, true, string::format),
        scalar_def!("to_hex", "TO_HEX", 1, 1, false, true, string::to_hex),
        scalar_def!("from_hex", "FROM_HEX", 1, 1, false, true, string::from_hex),
        scalar_def!("to_base64", "TO_BASE64", 1, 1, false, true, string::to_base64),
        scalar_def!("from_base64", "FROM_BASE64", 1, 1, false, true, string::from_base64),
        // hashes and ids
        scalar_def!("md5", "MD5", 1, 1, false, true, hash::md5),
        scalar_def!("sha1", "SHA1", 1, 1, false, true, hash::sha1),
        scalar_def!("sha256", "SHA256", 1, 1, false, true, hash::sha256),
        scalar_def!("sha512", "SHA512", 1, 1, false, true, hash::sha512),
        scalar_def!("farm_fingerprint", "FARM_FINGERPRINT", 1, 1, false, true, hash::farm_fingerprint),
        scalar_def!("generate_uuid", "GENERATE_UUID", 0, 0, true, false, hash::generate_uuid),
        // date and time
        scalar_def!("date", "DATE", 1, 3, false, true, datetime::date),
        scalar_def!("datetime", "DATETIME", 1, 6, false, true, datetime::datetime),
        scalar_def!("time", "TIME", 1, 3, false, true, datetime::time),
        scalar_def!("timestamp", "TIMESTAMP", 1, 2, false, true, datetime::timestamp),
        scalar_def!("date_add", "DATE_ADD", 2, 2, false, true, datetime::date_add),
        scalar_def!("date_sub", "DATE_SUB", 2, 2, false, true, datetime::date_sub),
        scalar_def!("datetime_add", "DATETIME_ADD", 2, 2, false, true, datetime::datetime_add),
        scalar_def!("datetime_sub", "DATETIME_SUB", 2, 2, false, true, datetime::datetime_sub),
        scalar_def!("time_add", "TIME_ADD", 2, 2, false, true, datetime::time_add),
        scalar_def!("time_sub", "TIME_SUB", 2, 2, false, true, datetime::time_sub),
        scalar_def!("timestamp_add", "TIMESTAMP_ADD", 2, 2, false, true, datetime::timestamp_add),
        scalar_def!("timestamp_sub", "TIMESTAMP_SUB", 2, 2, false, true, datetime::timestamp_sub),
        scalar_def!("date_diff", "DATE_DIFF", 3, 3, false, true, datetime::date_diff),
        scalar_def!("datetime_diff", "DATETIME_DIFF", 3, 3, false, true, datetime::datetime_diff),
        scalar_def!("time_diff", "TIME_DIFF", 3, 3, false, true, datetime::time_diff),
        scalar_def!("timestamp_diff", "TIMESTAMP_DIFF", 3, 3, false, true, datetime::timestamp_diff),
        scalar_def!("date_trunc", "DATE_TRUNC", 2, 2, false, true, datetime::date_trunc),
        scalar_def!("datetime_trunc", "DATETIME_TRUNC", 2, 2, false, true, datetime::datetime_trunc),
        scalar_def!("time_trunc", "TIME_TRUNC", 2, 2, false, true, datetime::time_trunc),
        scalar_def!("timestamp_trunc", "TIMESTAMP_TRUNC", 2, 2, false, true, datetime::timestamp_trunc),
        scalar_def!("extract", "EXTRACT", 2, 3, false, true, datetime::extract),
        scalar_def!("last_day", "LAST_DAY", 1, 2, false, true, datetime::last_day),
        scalar_def!("date_from_unix_date", "DATE_FROM_UNIX_DATE", 1, 1, false, true, datetime::date_from_unix_date),
        scalar_def!("unix_date", "UNIX_DATE", 1, 1, false, true, datetime::unix_date),
        scalar_def!("timestamp_seconds", "TIMESTAMP_SECONDS", 1, 1, false, true, datetime::timestamp_seconds),
        scalar_def!("timestamp_millis", "TIMESTAMP_MILLIS", 1, 1, false, true, datetime::timestamp_millis),
        scalar_def!("timestamp_micros", "TIMESTAMP_MICROS", 1, 1, false, true, datetime::timestamp_micros),
        scalar_def!("unix_seconds", "UNIX_SECONDS", 1, 1, false, true, datetime::unix_seconds),
        scalar_def!("unix_millis", "UNIX_MILLIS", 1, 1, false, true, datetime::unix_millis),
        scalar_def!("unix_micros", "UNIX_MICROS", 1, 1, false, true, datetime::unix_micros),
        scalar_def!("format_date", "FORMAT_DATE", 2, 2, false, true, datetime::format_date),
        scalar_def!("format_datetime", "FORMAT_DATETIME", 2, 2, false, true, datetime::format_datetime),
        scalar_def!("format_time", "FORMAT_TIME", 2, 2, false, true, datetime::format_time),
        scalar_def!("format_timestamp", "FORMAT_TIMESTAMP", 2, 3, false, true, datetime::format_timestamp),
        scalar_def!("parse_date", "PARSE_DATE", 2, 2, false, true, datetime::parse_date),
        scalar_def!("parse_datetime", "PARSE_DATETIME", 2, 2, false, true, datetime::parse_datetime),
        scalar_def!("parse_time", "PARSE_TIME", 2, 2, false, true, datetime::parse_time),
        scalar_def!("parse_timestamp", "PARSE_TIMESTAMP", 2, 2, false, true, datetime::parse_timestamp),
        scalar_def!("interval", "INTERVAL", 2, 2, false, true, datetime::make_interval),
        // arrays and structs
        scalar_def!("make_array", "ARRAY", 0, VARIADIC, true, true, array::make_array),
        scalar_def!("make_struct", "STRUCT", 0, VARIADIC, true, true, array::make_struct),
        scalar_def!("struct_field", "STRUCT_FIELD", 2, 2, false, true, array::struct_field),
        scalar_def!("struct_get", "STRUCT_GET", 2, 2, false, true, array::struct_field),
        scalar_def!("array_length", "ARRAY_LENGTH", 1, 1, false, true, array::array_length),
        scalar_def!("array_concat", "ARRAY_CONCAT", 1, VARIADIC, false, true, array::array_concat),
        scalar_def!("array_reverse", "ARRAY_REVERSE", 1, 1, false, true, array::array_reverse),
        scalar_def!("array_to_string", "ARRAY_TO_STRING", 2, 3, false, true, array::array_to_string),
        scalar_def!("array_offset", "ARRAY_OFFSET", 2, 2, false, true, array::array_offset),
        scalar_def!("array_ordinal", "ARRAY_ORDINAL", 2, 2, false, true, array::array_ordinal),
        scalar_def!("array_safe_offset", "ARRAY_SAFE_OFFSET", 2, 2, false, true, array::safe_array_offset),
        scalar_def!("array_safe_ordinal", "ARRAY_SAFE_ORDINAL", 2, 2, false, true, array::safe_array_ordinal),
        scalar_def!("generate_array", "GENERATE_ARRAY", 2, 3, false, true, array::generate_array),
        scalar_def!("generate_date_array", "GENERATE_DATE_ARRAY", 2, 3, false, true, array::generate_date_array),
        // json
        scalar_def!("parse_json", "PARSE_JSON", 1, 1, false, true, json::parse_json),
        scalar_def!("to_json", "TO_JSON", 1, 1, true, true, json::to_json),
        scalar_def!("to_json_string", "TO_JSON_STRING", 1, 2, true, true, json::to_json_string),
        scalar_def!("json_type", "JSON_TYPE", 1, 1, false, true, json::json_type),
        scalar_def!("json_value", "JSON_VALUE", 1, 2, false, true, json::json_value),
        scalar_def!("json_query", "JSON_QUERY", 1, 2, false, true, json::json_query),
        // casts
        scalar_def!("cast", "CAST", 2, 2, true, true, cast::cast),
        scalar_def!("safe_cast", "SAFE_CAST", 2, 2, true, true, cast::safe_cast),
        scalar_def!("encode_value", "ENCODE_VALUE", 1, 1, true, true, cast::encode_value),
    ]
}

fn register_scalar(conn: &Connection, name: String, def: &'static ScalarDef, safe: bool) -> Result<()> {
    let mut flags = FunctionFlags::SQLITE_UTF8;
    if def.deterministic {
        flags |= FunctionFlags::SQLITE_DETERMINISTIC;
    }
    conn.create_scalar_function(&name, -1, flags, move |ctx| {
        let len = ctx.len();
        if len < def.min_args || (def.max_args != VARIADIC && len > def.max_args) {
            return Err(engine_error(Error::invalid_argument(format!(
                "{}: wrong argument count {}",
                def.display, len
            ))));
        }
        let mut args = Vec::with_capacity(len);
        for i in 0..len {
            args.push(bind::value_from_raw(ctx.get_raw(i)).map_err(engine_error)?);
        }
        if !def.null_safe && args.iter().any(|v| v.is_null()) {
            return Ok(rusqlite::types::Value::Null);
        }
        let out = match (def.body)(&args) {
            Ok(v) => v,
            Err(e) if safe && e.is_safe_absorbable() => Value::Null,
            Err(e) => return Err(engine_error(e)),
        };
        bind::value_to_sql(&out).map_err(engine_error)
    })
    .map_err(bind::from_host_error)
}

fn aggregate_defs() -> Vec<(&'static str, fn() -> Box<dyn AggBody>)> {
    vec![
        ("sum", || Box::new(aggregate::Sum::default())),
        ("avg", || Box::new(aggregate::Avg::default())),
        ("count", || Box::new(aggregate::Count::default())),
        ("countif", || Box::new(aggregate::CountIf::default())),
        ("min", aggregate::Extremum::min),
        ("max", aggregate::Extremum::max),
        ("string_agg", || Box::new(aggregate::StringAgg::default())),
        ("array_agg", || Box::new(aggregate::ArrayAgg::default())),
        ("array_concat_agg", || Box::new(aggregate::ArrayConcatAgg::default())),
        ("bit_and_agg", aggregate::BitwiseAgg::and),
        ("bit_or_agg", aggregate::BitwiseAgg::or),
        ("bit_xor_agg", aggregate::BitwiseAgg::xor),
        ("logical_and", aggregate::LogicalAgg::and),
        ("logical_or", aggregate::LogicalAgg::or),
    ]
}

fn window_defs() -> Vec<(&'static str, WindowKind)> {
    vec![
        ("win_row_number", WindowKind::RowNumber),
        ("win_rank", WindowKind::Rank),
        ("win_dense_rank", WindowKind::DenseRank),
        ("win_percent_rank", WindowKind::PercentRank),
        ("win_lag", WindowKind::Lag),
        ("win_lead", WindowKind::Lead),
        ("win_first_value", WindowKind::FirstValue),
        ("win_last_value", WindowKind::LastValue),
        ("win_sum", WindowKind::Sum),
        ("win_avg", WindowKind::Avg),
        ("win_count", WindowKind::Count),
        ("win_min", WindowKind::Min),
        ("win_max", WindowKind::Max),
        ("win_stddev", WindowKind::Stddev),
        ("win_stddev_pop", WindowKind::StddevPop),
        ("win_stddev_samp", WindowKind::StddevSamp),
        ("win_variance", WindowKind::Variance),
        ("win_var_pop", WindowKind::VarPop),
        ("win_var_samp", WindowKind::VarSamp),
        ("win_covar_pop", WindowKind::CovarPop),
        ("win_covar_samp", WindowKind::CovarSamp),
    ]
}

/// Registers the full catalog plus the option and UNNEST helpers into a
/// freshly opened connection.
static SCALARS: LazyLock<Vec<ScalarDef>> = LazyLock::new(scalar_defs);

pub fn register_all(conn: &Connection, clock: &SessionClock) -> Result<()> {
    let defs: &'static Vec<ScalarDef> = &SCALARS;
    let explicit: std::collections::HashSet<&str> = defs.iter().map(|d| d.name).collect();
    for def in defs {
        register_scalar(conn, format!("{}{}", FUNC_PREFIX, def.name), def, false)?;
        let safe_name = format!("safe_{}", def.name);
        if !def.name.starts_with("safe_") && !explicit.contains(safe_name.as_str()) {
            register_scalar(conn, format!("{}{}", FUNC_PREFIX, safe_name), def, true)?;
        }
    }

    for (name, make) in aggregate_defs() {
        conn.create_aggregate_function(
            &format!("{}{}", FUNC_PREFIX, name),
            -1,
            FunctionFlags::SQLITE_UTF8,
            AggregateAdapter { name, make },
        )
        .map_err(bind::from_host_error)?;
    }

    for (name, kind) in window_defs() {
        conn.create_window_function(
            &format!("{}{}", FUNC_PREFIX, name),
            -1,
            FunctionFlags::SQLITE_UTF8,
            WindowAdapter { name, kind },
        )
        .map_err(bind::from_host_error)?;
    }

    register_clock_functions(conn, clock)?;
    register_helpers(conn)?;
    Ok(())
}

fn register_clock_functions(conn: &Connection, clock: &SessionClock) -> Result<()> {
    type ClockFn = fn(DateTime<Utc>, &[Value]) -> skiffql_common::Result<Value>;
    let entries: [(&str, ClockFn); 4] = [
        ("current_date", scalar::datetime::current_date),
        ("current_datetime", scalar::datetime::current_datetime),
        ("current_time", scalar::datetime::current_time),
        ("current_timestamp", scalar::datetime::current_timestamp),
    ];
    for (name, body) in entries {
        let clock = clock.clone();
        conn.create_scalar_function(
            &format!("{}{}", FUNC_PREFIX, name),
            -1,
            FunctionFlags::SQLITE_UTF8,
            move |ctx| {
                let mut args = Vec::with_capacity(ctx.len());
                for i in 0..ctx.len() {
                    args.push(bind::value_from_raw(ctx.get_raw(i)).map_err(engine_error)?);
                }
                let out = body(clock.now(), &args).map_err(engine_error)?;
                bind::value_to_sql(&out).map_err(engine_error)
            },
        )
        .map_err(bind::from_host_error)?;
    }
    Ok(())
}

fn register_helpers(conn: &Connection) -> Result<()> {
    // skiff_call_opts(static_json, key...): the explicit per-call
    // options record appended by the rewriter.
    conn.create_scalar_function(
        &format!("{}call_opts", FUNC_PREFIX),
        -1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            if ctx.len() == 0 {
                return Err(engine_error(Error::invalid_argument(
                    "CALL_OPTS: missing options literal",
                )));
            }
            let spec = bind::value_from_raw(ctx.get_raw(0))
                .map_err(engine_error)?
                .to_text()
                .map_err(engine_error)?;
            let mut keys = Vec::with_capacity(ctx.len() - 1);
            for i in 1..ctx.len() {
                keys.push(bind::value_from_raw(ctx.get_raw(i)).map_err(engine_error)?);
            }
            let encoded = CallOptions::encode_with_keys(&spec, &keys).map_err(engine_error)?;
            Ok(rusqlite::types::Value::Text(encoded))
        },
    )
    .map_err(bind::from_host_error)?;

    // skiff_array_json(v): canonical JSON array for json_each; NULL
    // unnests to no rows.
    conn.create_scalar_function(
        &format!("{}array_json", FUNC_PREFIX),
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let v = bind::value_from_raw(ctx.get_raw(0)).map_err(engine_error)?;
            let json = match v {
                Value::Null => "[]".to_string(),
                Value::Array(items) => encode::array_plain_json(&items).map_err(engine_error)?,
                other => {
                    return Err(engine_error(Error::type_mismatch(
                        "ARRAY",
                        other.data_type().to_string(),
                    )));
                }
            };
            Ok(rusqlite::types::Value::Text(json))
        },
    )
    .map_err(bind::from_host_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        register_all(&conn, &SessionClock::default()).expect("register");
        conn
    }

    fn query_one(conn: &Connection, sql: &str) -> Value {
        conn.query_row(sql, [], |row| {
            let cell = match row.get_ref(0).expect("cell") {
                rusqlite::types::ValueRef::Null => skiffql_core::Cell::Null,
                rusqlite::types::ValueRef::Integer(v) => skiffql_core::Cell::Int(v),
                rusqlite::types::ValueRef::Real(v) => skiffql_core::Cell::Real(v),
                rusqlite::types::ValueRef::Text(t) => {
                    skiffql_core::Cell::Text(String::from_utf8_lossy(t).to_string())
                }
                rusqlite::types::ValueRef::Blob(b) => skiffql_core::Cell::Blob(b.to_vec()),
            };
            Ok(skiffql_core::decode_cell(&cell).expect("decode"))
        })
        .expect("query")
    }

    #[test]
    fn scalar_dispatch_through_sqlite() {
        let conn = open();
        assert_eq!(
            query_one(&conn, "SELECT skiff_add(1, 2)"),
            Value::Int64(3)
        );
        assert_eq!(
            query_one(&conn, "SELECT skiff_concat('a', 'b', 'c')"),
            Value::from("abc")
        );
    }

    #[test]
    fn null_propagates_unless_null_safe() {
        let conn = open();
        assert_eq!(query_one(&conn, "SELECT skiff_upper(NULL)"), Value::Null);
        assert_eq!(
            query_one(&conn, "SELECT skiff_ifnull(NULL, 7)"),
            Value::Int64(7)
        );
    }

    #[test]
    fn safe_variant_absorbs_errors() {
        let conn = open();
        assert_eq!(
            query_one(&conn, "SELECT skiff_safe_cast('abc', 'INT64')"),
            Value::Null
        );
    }

    #[test]
    fn aggregate_with_distinct_option() {
        let conn = open();
        conn.execute_batch("CREATE TABLE t(x); INSERT INTO t VALUES (1),(1),(2),(NULL);")
            .expect("setup");
        assert_eq!(
            query_one(
                &conn,
                "SELECT skiff_sum(x, skiff_call_opts('{\"distinct\":true,\"ignore_nulls\":false,\"dirs\":[]}')) FROM t"
            ),
            Value::Int64(3)
        );
        assert_eq!(query_one(&conn, "SELECT skiff_count() FROM t"), Value::Int64(4));
    }

    #[test]
    fn window_function_over_partition() {
        let conn = open();
        conn.execute_batch("CREATE TABLE t(g, x); INSERT INTO t VALUES ('a', 10), ('a', 20), ('b', 30);")
            .expect("setup");
        let opts = CallOptions::static_json(false, false, None, &[true], Some(&None));
        let sql = format!(
            "SELECT skiff_win_sum(x, skiff_call_opts('{}', x)) OVER (PARTITION BY g ORDER BY x ROWS BETWEEN UNBOUNDED PRECEDING AND UNBOUNDED FOLLOWING) FROM t ORDER BY g, x",
            opts
        );
        let mut stmt = conn.prepare(&sql).expect("prepare");
        let sums: Vec<i64> = stmt
            .query_map([], |row| row.get::<_, i64>(0))
            .expect("query")
            .map(|r| r.expect("row"))
            .collect();
        assert_eq!(sums, vec![10, 30, 30]);
    }
}
