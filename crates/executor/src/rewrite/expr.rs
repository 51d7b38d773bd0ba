//! Expression translation: every dialect expression becomes host SQL
//! over the registered `skiff_` functions. Forms whose host semantics
//! already match (logical AND/OR/NOT, IS NULL, EXISTS, searched CASE)
//! stay native.

use std::collections::HashMap;
use std::sync::LazyLock;

use skiffql_common::{Error, Result};
use skiffql_core::{DataType, Value};
use skiffql_functions::options::CallOptions;
use skiffql_functions::{FUNC_PREFIX, FrameBound, FrameSpec, FrameUnits};
use sqlparser::ast;

use super::{Rewriter, Scope, object_name_parts, quote_ident, string_literal};
use super::ddl::convert_type;

static SCALAR_MAP: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        ("ABS", "abs"),
        ("SIGN", "sign"),
        ("ROUND", "round"),
        ("TRUNC", "trunc"),
        ("CEIL", "ceil"),
        ("CEILING", "ceiling"),
        ("FLOOR", "floor"),
        ("SQRT", "sqrt"),
        ("POW", "pow"),
        ("POWER", "power"),
        ("EXP", "exp"),
        ("LN", "ln"),
        ("LOG", "log"),
        ("LOG10", "log10"),
        ("MOD", "mod"),
        ("DIV", "int_div"),
        ("SAFE_DIVIDE", "safe_divide"),
        ("IEEE_DIVIDE", "ieee_divide"),
        ("SAFE_ADD", "safe_add"),
        ("SAFE_SUBTRACT", "safe_sub"),
        ("SAFE_MULTIPLY", "safe_mul"),
        ("SAFE_NEGATE", "safe_neg"),
        ("IS_NAN", "is_nan"),
        ("IS_INF", "is_inf"),
        ("GREATEST", "greatest"),
        ("LEAST", "least"),
        ("RAND", "rand"),
        ("RANGE_BUCKET", "range_bucket"),
        ("SIN", "sin"),
        ("COS", "cos"),
        ("TAN", "tan"),
        ("ASIN", "asin"),
        ("ACOS", "acos"),
        ("ATAN", "atan"),
        ("ATAN2", "atan2"),
        ("SINH", "sinh"),
        ("COSH", "cosh"),
        ("TANH", "tanh"),
        ("ASINH", "asinh"),
        ("ACOSH", "acosh"),
        ("ATANH", "atanh"),
        ("CONCAT", "concat"),
        ("LENGTH", "length"),
        ("BYTE_LENGTH", "byte_length"),
        ("CHAR_LENGTH", "char_length"),
        ("CHARACTER_LENGTH", "character_length"),
        ("LOWER", "lower"),
        ("UPPER", "upper"),
        ("TRIM", "trim"),
        ("LTRIM", "ltrim"),
        ("RTRIM", "rtrim"),
        ("LEFT", "left"),
        ("RIGHT", "right"),
        ("SUBSTR", "substr"),
        ("SUBSTRING", "substring"),
        ("STRPOS", "strpos"),
        ("INSTR", "instr"),
        ("STARTS_WITH", "starts_with"),
        ("ENDS_WITH", "ends_with"),
        ("REPLACE", "replace"),
        ("SPLIT", "split"),
        ("REPEAT", "repeat"),
        ("REVERSE", "reverse"),
        ("LPAD", "lpad"),
        ("RPAD", "rpad"),
        ("INITCAP", "initcap"),
        ("ASCII", "ascii"),
        ("CHR", "chr"),
        ("TO_CODE_POINTS", "to_code_points"),
        ("CODE_POINTS_TO_STRING", "code_points_to_string"),
        ("CODE_POINTS_TO_BYTES", "code_points_to_bytes"),
        ("REGEXP_CONTAINS", "regexp_contains"),
        ("REGEXP_EXTRACT", "regexp_extract"),
        ("REGEXP_EXTRACT_ALL", "regexp_extract_all"),
        ("REGEXP_REPLACE", "regexp_replace"),
        ("FORMAT", "format"),
        ("TO_HEX", "to_hex"),
        ("FROM_HEX", "from_hex"),
        ("TO_BASE64", "to_base64"),
        ("FROM_BASE64", "from_base64"),
        ("MD5", "md5"),
        ("SHA1", "sha1"),
        ("SHA256", "sha256"),
        ("SHA512", "sha512"),
        ("FARM_FINGERPRINT", "farm_fingerprint"),
        ("GENERATE_UUID", "generate_uuid"),
        ("CURRENT_DATE", "current_date"),
        ("CURRENT_DATETIME", "current_datetime"),
        ("CURRENT_TIME", "current_time"),
        ("CURRENT_TIMESTAMP", "current_timestamp"),
        ("DATE", "date"),
        ("DATETIME", "datetime"),
        ("TIME", "time"),
        ("TIMESTAMP", "timestamp"),
        ("DATE_ADD", "date_add"),
        ("DATE_SUB", "date_sub"),
        ("DATETIME_ADD", "datetime_add"),
        ("DATETIME_SUB", "datetime_sub"),
        ("TIME_ADD", "time_add"),
        ("TIME_SUB", "time_sub"),
        ("TIMESTAMP_ADD", "timestamp_add"),
        ("TIMESTAMP_SUB", "timestamp_sub"),
        ("DATE_DIFF", "date_diff"),
        ("DATETIME_DIFF", "datetime_diff"),
        ("TIME_DIFF", "time_diff"),
        ("TIMESTAMP_DIFF", "timestamp_diff"),
        ("DATE_TRUNC", "date_trunc"),
        ("DATETIME_TRUNC", "datetime_trunc"),
        ("TIME_TRUNC", "time_trunc"),
        ("TIMESTAMP_TRUNC", "timestamp_trunc"),
        ("LAST_DAY", "last_day"),
        ("DATE_FROM_UNIX_DATE", "date_from_unix_date"),
        ("UNIX_DATE", "unix_date"),
        ("TIMESTAMP_SECONDS", "timestamp_seconds"),
        ("TIMESTAMP_MILLIS", "timestamp_millis"),
        ("TIMESTAMP_MICROS", "timestamp_micros"),
        ("UNIX_SECONDS", "unix_seconds"),
        ("UNIX_MILLIS", "unix_millis"),
        ("UNIX_MICROS", "unix_micros"),
        ("FORMAT_DATE", "format_date"),
        ("FORMAT_DATETIME", "format_datetime"),
        ("FORMAT_TIME", "format_time"),
        ("FORMAT_TIMESTAMP", "format_timestamp"),
        ("PARSE_DATE", "parse_date"),
        ("PARSE_DATETIME", "parse_datetime"),
        ("PARSE_TIME", "parse_time"),
        ("PARSE_TIMESTAMP", "parse_timestamp"),
        ("ARRAY_LENGTH", "array_length"),
        ("ARRAY_CONCAT", "array_concat"),
        ("ARRAY_REVERSE", "array_reverse"),
        ("ARRAY_TO_STRING", "array_to_string"),
        ("GENERATE_ARRAY", "generate_array"),
        ("GENERATE_DATE_ARRAY", "generate_date_array"),
        ("PARSE_JSON", "parse_json"),
        ("TO_JSON", "to_json"),
        ("TO_JSON_STRING", "to_json_string"),
        ("JSON_TYPE", "json_type"),
        ("JSON_VALUE", "json_value"),
        ("JSON_QUERY", "json_query"),
        ("COALESCE", "coalesce"),
        ("IFNULL", "ifnull"),
        ("NULLIF", "nullif"),
        ("IF", "if"),
        ("SAFE_CAST", "safe_cast"),
    ])
});

static AGGREGATE_MAP: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        ("COUNT", "count"),
        ("COUNTIF", "countif"),
        ("SUM", "sum"),
        ("AVG", "avg"),
        ("MIN", "min"),
        ("MAX", "max"),
        ("STRING_AGG", "string_agg"),
        ("ARRAY_AGG", "array_agg"),
        ("ARRAY_CONCAT_AGG", "array_concat_agg"),
        ("BIT_AND", "bit_and_agg"),
        ("BIT_OR", "bit_or_agg"),
        ("BIT_XOR", "bit_xor_agg"),
        ("LOGICAL_AND", "logical_and"),
        ("LOGICAL_OR", "logical_or"),
    ])
});

static WINDOW_MAP: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        ("ROW_NUMBER", "win_row_number"),
        ("RANK", "win_rank"),
        ("DENSE_RANK", "win_dense_rank"),
        ("PERCENT_RANK", "win_percent_rank"),
        ("LAG", "win_lag"),
        ("LEAD", "win_lead"),
        ("FIRST_VALUE", "win_first_value"),
        ("LAST_VALUE", "win_last_value"),
        ("SUM", "win_sum"),
        ("AVG", "win_avg"),
        ("COUNT", "win_count"),
        ("MIN", "win_min"),
        ("MAX", "win_max"),
        ("STDDEV", "win_stddev"),
        ("STDDEV_POP", "win_stddev_pop"),
        ("STDDEV_SAMP", "win_stddev_samp"),
        ("VARIANCE", "win_variance"),
        ("VAR_POP", "win_var_pop"),
        ("VAR_SAMP", "win_var_samp"),
        ("COVAR_POP", "win_covar_pop"),
        ("COVAR_SAMP", "win_covar_samp"),
    ])
});

fn func(suffix: &str, args: &[String]) -> String {
    format!("{}{}({})", FUNC_PREFIX, suffix, args.join(", "))
}

impl Rewriter<'_> {
    pub fn rewrite_expr(&self, expr: &ast::Expr, scope: &Scope) -> Result<String> {
        match expr {
            ast::Expr::Identifier(ident) => self.resolve_identifier(&ident.value, scope),
            ast::Expr::CompoundIdentifier(idents) => {
                let parts: Vec<String> = idents.iter().map(|i| i.value.clone()).collect();
                self.resolve_compound(&parts, scope)
            }
            ast::Expr::CompoundFieldAccess { root, access_chain } => {
                let mut base = self.rewrite_expr(root, scope)?;
                for access in access_chain {
                    base = match access {
                        ast::AccessExpr::Dot(field) => match field {
                            ast::Expr::Identifier(ident) => func(
                                "struct_field",
                                &[base, string_literal(&ident.value)],
                            ),
                            other => {
                                return Err(Error::analyze(format!(
                                    "unsupported field access {:?}",
                                    other
                                )));
                            }
                        },
                        ast::AccessExpr::Subscript(sub) => self.rewrite_subscript(base, sub, scope)?,
                    };
                }
                Ok(base)
            }
            ast::Expr::Value(value) => self.rewrite_value(&value.value),
            ast::Expr::TypedString { data_type, value } => {
                let target = convert_type(data_type)?;
                Ok(func(
                    "cast",
                    &[
                        string_literal(&ast_value_text(&value)?),
                        string_literal(&target.to_string()),
                    ],
                ))
            }
            ast::Expr::BinaryOp { left, op, right } => self.rewrite_binary(left, op, right, scope),
            ast::Expr::UnaryOp { op, expr } => {
                let inner = self.rewrite_expr(expr, scope)?;
                match op {
                    ast::UnaryOperator::Minus => Ok(func("neg", &[inner])),
                    ast::UnaryOperator::Plus => Ok(inner),
                    ast::UnaryOperator::Not => Ok(format!("(NOT {})", inner)),
                    ast::UnaryOperator::PGBitwiseNot => Ok(func("bit_not", &[inner])),
                    other => Err(Error::analyze(format!("unsupported operator {:?}", other))),
                }
            }
            ast::Expr::Nested(inner) => Ok(format!("({})", self.rewrite_expr(inner, scope)?)),
            ast::Expr::IsNull(inner) => {
                Ok(format!("({} IS NULL)", self.rewrite_expr(inner, scope)?))
            }
            ast::Expr::IsNotNull(inner) => {
                Ok(format!("({} IS NOT NULL)", self.rewrite_expr(inner, scope)?))
            }
            ast::Expr::IsTrue(inner) => Ok(format!("({} IS TRUE)", self.rewrite_expr(inner, scope)?)),
            ast::Expr::IsNotTrue(inner) => {
                Ok(format!("({} IS NOT TRUE)", self.rewrite_expr(inner, scope)?))
            }
            ast::Expr::IsFalse(inner) => {
                Ok(format!("({} IS FALSE)", self.rewrite_expr(inner, scope)?))
            }
            ast::Expr::IsNotFalse(inner) => {
                Ok(format!("({} IS NOT FALSE)", self.rewrite_expr(inner, scope)?))
            }
            ast::Expr::IsDistinctFrom(a, b) => Ok(func(
                "is_distinct_from",
                &[self.rewrite_expr(a, scope)?, self.rewrite_expr(b, scope)?],
            )),
            ast::Expr::IsNotDistinctFrom(a, b) => Ok(func(
                "is_not_distinct_from",
                &[self.rewrite_expr(a, scope)?, self.rewrite_expr(b, scope)?],
            )),
            ast::Expr::InList { expr, list, negated } => {
                let mut args = vec![self.rewrite_expr(expr, scope)?];
                for item in list {
                    args.push(self.rewrite_expr(item, scope)?);
                }
                let call = func("in", &args);
                Ok(if *negated {
                    format!("(NOT {})", call)
                } else {
                    call
                })
            }
            ast::Expr::InSubquery { expr, subquery, negated } => {
                let needle = self.rewrite_expr(expr, scope)?;
                let sub = self.rewrite_set_expr(subquery, scope)?.0;
                Ok(format!(
                    "({} {}IN ({}))",
                    needle,
                    if *negated { "NOT " } else { "" },
                    sub
                ))
            }
            ast::Expr::InUnnest { expr, array_expr, negated } => {
                let call = func(
                    "array_in",
                    &[
                        self.rewrite_expr(expr, scope)?,
                        self.rewrite_expr(array_expr, scope)?,
                    ],
                );
                Ok(if *negated {
                    format!("(NOT {})", call)
                } else {
                    call
                })
            }
            ast::Expr::Between { expr, negated, low, high } => {
                let call = func(
                    "between",
                    &[
                        self.rewrite_expr(expr, scope)?,
                        self.rewrite_expr(low, scope)?,
                        self.rewrite_expr(high, scope)?,
                    ],
                );
                Ok(if *negated {
                    format!("(NOT {})", call)
                } else {
                    call
                })
            }
            ast::Expr::Like { negated, expr, pattern, .. } => {
                let call = func(
                    "like",
                    &[
                        self.rewrite_expr(expr, scope)?,
                        self.rewrite_expr(pattern, scope)?,
                    ],
                );
                Ok(if *negated {
                    format!("(NOT {})", call)
                } else {
                    call
                })
            }
            ast::Expr::ILike { negated, expr, pattern, .. } => {
                let call = func(
                    "like",
                    &[
                        func("lower", &[self.rewrite_expr(expr, scope)?]),
                        func("lower", &[self.rewrite_expr(pattern, scope)?]),
                    ],
                );
                Ok(if *negated {
                    format!("(NOT {})", call)
                } else {
                    call
                })
            }
            ast::Expr::Case { operand, conditions, else_result, .. } => {
                let mut out = String::from("CASE");
                let operand_sql = operand
                    .as_ref()
                    .map(|op| self.rewrite_expr(op, scope))
                    .transpose()?;
                for when in conditions {
                    let cond = self.rewrite_expr(&when.condition, scope)?;
                    // operand comparison routes through the typed
                    // equality so encoded cells compare correctly
                    let cond = match &operand_sql {
                        Some(op) => func("eq", &[op.clone(), cond]),
                        None => cond,
                    };
                    out.push_str(&format!(
                        " WHEN {} THEN {}",
                        cond,
                        self.rewrite_expr(&when.result, scope)?
                    ));
                }
                if let Some(else_expr) = else_result {
                    out.push_str(&format!(" ELSE {}", self.rewrite_expr(else_expr, scope)?));
                }
                out.push_str(" END");
                Ok(out)
            }
            ast::Expr::Cast { kind, expr, data_type, .. } => {
                let target = convert_type(data_type)?;
                // a parameter cast to an array accepts a nil or empty
                // marker; both bind as the empty array
                if let (DataType::Array(_), ast::Expr::Value(v)) = (&target, expr.as_ref()) {
                    if let ast::Value::Placeholder(p) = &v.value {
                        let raw = if let Some(name) = p.strip_prefix('@') {
                            self.binder.borrow_mut().take_named(name)?
                        } else {
                            self.binder.borrow_mut().take_positional()?
                        };
                        let bound = match raw {
                            Value::Null => Value::Array(Vec::new()),
                            Value::String(s) if s.is_empty() => Value::Array(Vec::new()),
                            other => other.coerce_to(&target)?,
                        };
                        return Ok(self.bind(bound));
                    }
                }
                let suffix = match kind {
                    ast::CastKind::SafeCast | ast::CastKind::TryCast => "safe_cast",
                    _ => "cast",
                };
                let inner = self.rewrite_expr(expr, scope)?;
                Ok(func(
                    suffix,
                    &[inner, string_literal(&target.to_string())],
                ))
            }
            ast::Expr::Extract { field, expr, .. } => {
                // AT TIME ZONE folds into the zone-aware extract
                if let ast::Expr::AtTimeZone { timestamp, time_zone } = expr.as_ref() {
                    return Ok(func(
                        "extract",
                        &[
                            self.rewrite_expr(timestamp, scope)?,
                            string_literal(&field.to_string()),
                            self.rewrite_expr(time_zone, scope)?,
                        ],
                    ));
                }
                let inner = self.rewrite_expr(expr, scope)?;
                Ok(func(
                    "extract",
                    &[inner, string_literal(&field.to_string())],
                ))
            }
            ast::Expr::AtTimeZone { timestamp, time_zone } => Ok(func(
                "datetime",
                &[
                    self.rewrite_expr(timestamp, scope)?,
                    self.rewrite_expr(time_zone, scope)?,
                ],
            )),
            ast::Expr::Substring { expr, substring_from, substring_for, .. } => {
                let mut args = vec![self.rewrite_expr(expr, scope)?];
                args.push(match substring_from {
                    Some(from) => self.rewrite_expr(from, scope)?,
                    None => "1".to_string(),
                });
                if let Some(len) = substring_for {
                    args.push(self.rewrite_expr(len, scope)?);
                }
                Ok(func("substr", &args))
            }
            ast::Expr::Trim { expr, trim_where, trim_what, trim_characters } => {
                let suffix = match trim_where {
                    Some(ast::TrimWhereField::Leading) => "ltrim",
                    Some(ast::TrimWhereField::Trailing) => "rtrim",
                    _ => "trim",
                };
                let mut args = vec![self.rewrite_expr(expr, scope)?];
                if let Some(what) = trim_what {
                    args.push(self.rewrite_expr(what, scope)?);
                } else if let Some(chars) = trim_characters {
                    if let Some(first) = chars.first() {
                        args.push(self.rewrite_expr(first, scope)?);
                    }
                }
                Ok(func(suffix, &args))
            }
            ast::Expr::Position { expr, r#in } => Ok(func(
                "strpos",
                &[
                    self.rewrite_expr(r#in, scope)?,
                    self.rewrite_expr(expr, scope)?,
                ],
            )),
            ast::Expr::Interval(interval) => self.rewrite_interval(interval, scope),
            ast::Expr::Function(f) => self.rewrite_function(f, scope),
            ast::Expr::Tuple(items) => {
                let mut args = Vec::with_capacity(items.len() * 2);
                for item in items {
                    args.push("''".to_string());
                    args.push(self.rewrite_expr(item, scope)?);
                }
                Ok(func("make_struct", &args))
            }
            ast::Expr::Struct { values, .. } => {
                let mut args = Vec::with_capacity(values.len() * 2);
                for value in values {
                    match value {
                        ast::Expr::Named { expr, name } => {
                            args.push(string_literal(&name.value));
                            args.push(self.rewrite_expr(expr, scope)?);
                        }
                        other => {
                            args.push("''".to_string());
                            args.push(self.rewrite_expr(other, scope)?);
                        }
                    }
                }
                Ok(func("make_struct", &args))
            }
            ast::Expr::Named { expr, .. } => self.rewrite_expr(expr, scope),
            ast::Expr::Array(array) => {
                let args: Vec<String> = array
                    .elem
                    .iter()
                    .map(|e| self.rewrite_expr(e, scope))
                    .collect::<Result<_>>()?;
                Ok(func("make_array", &args))
            }
            ast::Expr::Subquery(query) => {
                Ok(format!("({})", self.rewrite_query_in(query, scope)?))
            }
            ast::Expr::Exists { subquery, negated } => {
                let sub = self.rewrite_query_in(subquery, scope)?;
                Ok(format!(
                    "({}EXISTS ({}))",
                    if *negated { "NOT " } else { "" },
                    sub
                ))
            }
            other => Err(Error::analyze(format!(
                "unsupported expression {:?}",
                other
            ))),
        }
    }

    fn rewrite_subscript(
        &self,
        base: String,
        sub: &ast::Subscript,
        scope: &Scope,
    ) -> Result<String> {
        match sub {
            ast::Subscript::Index { index } => {
                // OFFSET/ORDINAL wrappers choose the base; a bare index
                // is zero-based
                if let ast::Expr::Function(f) = index {
                    let parts = object_name_parts(&f.name);
                    let selector = parts.last().map(|s| s.to_uppercase()).unwrap_or_default();
                    let suffix = match selector.as_str() {
                        "OFFSET" => Some("array_offset"),
                        "ORDINAL" => Some("array_ordinal"),
                        "SAFE_OFFSET" => Some("array_safe_offset"),
                        "SAFE_ORDINAL" => Some("array_safe_ordinal"),
                        _ => None,
                    };
                    if let Some(suffix) = suffix {
                        let args = function_arg_exprs(f)?;
                        let index_sql = match args.first() {
                            Some(e) => self.rewrite_expr(e, scope)?,
                            None => {
                                return Err(Error::analyze(format!(
                                    "{}: missing index argument",
                                    selector
                                )));
                            }
                        };
                        return Ok(func(suffix, &[base, index_sql]));
                    }
                }
                let index_sql = self.rewrite_expr(index, scope)?;
                Ok(func("array_offset", &[base, index_sql]))
            }
            other => Err(Error::analyze(format!(
                "unsupported subscript {:?}",
                other
            ))),
        }
    }

    fn rewrite_value(&self, value: &ast::Value) -> Result<String> {
        use ast::Value as V;
        match value {
            V::Number(text, _) => Ok(text.clone()),
            V::Boolean(b) => Ok(if *b { "1" } else { "0" }.to_string()),
            V::Null => Ok("NULL".to_string()),
            V::SingleQuotedString(s)
            | V::DoubleQuotedString(s)
            | V::TripleSingleQuotedString(s)
            | V::TripleDoubleQuotedString(s)
            | V::SingleQuotedRawStringLiteral(s)
            | V::DoubleQuotedRawStringLiteral(s)
            | V::TripleSingleQuotedRawStringLiteral(s)
            | V::TripleDoubleQuotedRawStringLiteral(s)
            | V::EscapedStringLiteral(s)
            | V::UnicodeStringLiteral(s)
            | V::NationalStringLiteral(s) => Ok(string_literal(s)),
            V::SingleQuotedByteStringLiteral(s)
            | V::DoubleQuotedByteStringLiteral(s)
            | V::TripleSingleQuotedByteStringLiteral(s)
            | V::TripleDoubleQuotedByteStringLiteral(s) => {
                Ok(self.bind(Value::Bytes(s.clone().into_bytes())))
            }
            V::HexStringLiteral(s) => {
                let bytes = hex_to_bytes(s)?;
                Ok(self.bind(Value::Bytes(bytes)))
            }
            V::Placeholder(p) => {
                let bound = if let Some(name) = p.strip_prefix('@') {
                    self.binder.borrow_mut().take_named(name)?
                } else {
                    self.binder.borrow_mut().take_positional()?
                };
                Ok(self.bind(bound))
            }
            other => Err(Error::analyze(format!("unsupported literal {:?}", other))),
        }
    }

    fn rewrite_binary(
        &self,
        left: &ast::Expr,
        op: &ast::BinaryOperator,
        right: &ast::Expr,
        scope: &Scope,
    ) -> Result<String> {
        use ast::BinaryOperator as Op;
        let a = self.rewrite_expr(left, scope)?;
        let b = self.rewrite_expr(right, scope)?;
        let suffix = match op {
            Op::Plus => "add",
            Op::Minus => "sub",
            Op::Multiply => "mul",
            Op::Divide => "div",
            Op::Modulo => "mod",
            Op::Eq => "eq",
            Op::NotEq => "neq",
            Op::Lt => "lt",
            Op::LtEq => "lte",
            Op::Gt => "gt",
            Op::GtEq => "gte",
            Op::StringConcat => "concat",
            Op::BitwiseAnd => "bit_and",
            Op::BitwiseOr => "bit_or",
            Op::BitwiseXor => "bit_xor",
            Op::PGBitwiseShiftLeft => "bit_left_shift",
            Op::PGBitwiseShiftRight => "bit_right_shift",
            Op::And => return Ok(format!("({} AND {})", a, b)),
            Op::Or => return Ok(format!("({} OR {})", a, b)),
            other => {
                return Err(Error::analyze(format!("unsupported operator {:?}", other)));
            }
        };
        Ok(func(suffix, &[a, b]))
    }

    fn rewrite_interval(&self, interval: &ast::Interval, scope: &Scope) -> Result<String> {
        let field = interval
            .leading_field
            .as_ref()
            .ok_or_else(|| Error::analyze("INTERVAL literal requires a date part"))?;
        let count = self.rewrite_expr(&interval.value, scope)?;
        Ok(func(
            "interval",
            &[count, string_literal(&field.to_string())],
        ))
    }

    /// Resolution order: UDF substitutions, UNNEST aliases, columns the
    /// scope knows (or cannot rule out), then DECLAREd variables.
    fn resolve_identifier(&self, name: &str, scope: &Scope) -> Result<String> {
        if let Some(substituted) = scope.substitutions.get(&name.to_lowercase()) {
            return Ok(substituted.clone());
        }
        if let Some(unnest) = scope.find_unnest(name) {
            return Ok(format!("{}.\"value\"", quote_ident(&unnest.value_alias)));
        }
        if let Some(unnest) = scope.find_offset(name) {
            return Ok(format!("{}.\"key\"", quote_ident(&unnest.value_alias)));
        }
        if name.eq_ignore_ascii_case("_TABLE_SUFFIX") {
            return Ok(quote_ident("_TABLE_SUFFIX"));
        }
        if scope.has_known_column(name) || scope.has_unknown_tables() {
            return Ok(quote_ident(name));
        }
        if let Some(value) = self.vars.get(&name.to_uppercase()) {
            return Ok(self.bind(value.clone()));
        }
        Ok(quote_ident(name))
    }

    fn resolve_compound(&self, parts: &[String], scope: &Scope) -> Result<String> {
        if parts.len() < 2 {
            return self.resolve_identifier(&parts[0], scope);
        }
        let (base, rest): (String, &[String]) = if let Some(unnest) = scope.find_unnest(&parts[0]) {
            (
                format!("{}.\"value\"", quote_ident(&unnest.value_alias)),
                &parts[1..],
            )
        } else if let Some(table) = scope.find_table(&parts[0]) {
            (
                format!("{}.{}", table.qualifier, quote_ident(&parts[1])),
                &parts[2..],
            )
        } else if let Some(value) = (!scope.has_known_column(&parts[0])
            && !scope.has_unknown_tables())
        .then(|| self.vars.get(&parts[0].to_uppercase()))
        .flatten()
        {
            (self.bind(value.clone()), &parts[1..])
        } else {
            (quote_ident(&parts[0]), &parts[1..])
        };
        let mut out = base;
        for field in rest {
            out = func("struct_field", &[out, string_literal(field)]);
        }
        Ok(out)
    }

    pub(crate) fn rewrite_function(&self, f: &ast::Function, scope: &Scope) -> Result<String> {
        let parts = object_name_parts(&f.name);
        let mut base_name = parts
            .last()
            .map(|s| s.to_uppercase())
            .ok_or_else(|| Error::analyze("function call without a name"))?;
        let safe = parts.len() > 1 && parts[0].eq_ignore_ascii_case("SAFE");

        // ARRAY(SELECT ...) folds the subquery into one array value
        if base_name == "ARRAY" {
            if let ast::FunctionArguments::Subquery(query) = &f.args {
                return self.rewrite_array_subquery(query, scope);
            }
        }

        if f.over.is_some() {
            return self.rewrite_window(f, &base_name, scope);
        }
        if let Some(suffix) = AGGREGATE_MAP.get(base_name.as_str()) {
            return self.rewrite_aggregate(f, suffix, scope);
        }

        let arg_exprs = function_arg_exprs(f)?;
        if let Some(js) = self.js_udfs.get(&base_name.to_lowercase()) {
            let args: Vec<String> = arg_exprs
                .iter()
                .map(|e| self.rewrite_expr(e, scope))
                .collect::<Result<_>>()?;
            return Ok(format!("{}({})", quote_ident(&js.name), args.join(", ")));
        }
        if let Some(udf) = self.udfs.get(&base_name.to_lowercase()) {
            return self.inline_sql_udf(&udf, &arg_exprs, scope);
        }

        if base_name == "ARRAY" {
            base_name = "MAKE_ARRAY".to_string();
        }
        let suffix = match base_name.as_str() {
            "MAKE_ARRAY" => "make_array",
            "STRUCT" => "make_struct",
            other => SCALAR_MAP
                .get(other)
                .copied()
                .ok_or_else(|| Error::analyze(format!("unknown function {}", other)))?,
        };
        let args: Vec<String> = arg_exprs
            .iter()
            .map(|e| self.rewrite_expr(e, scope))
            .collect::<Result<_>>()?;
        let registered = if safe && !suffix.starts_with("safe_") {
            format!("safe_{}", suffix)
        } else {
            suffix.to_string()
        };
        Ok(func(&registered, &args))
    }

    fn rewrite_array_subquery(&self, query: &ast::Query, scope: &Scope) -> Result<String> {
        let (sql, columns) = self.rewrite_query_with_columns(query, scope)?;
        let column = columns
            .first()
            .cloned()
            .ok_or_else(|| Error::analyze("ARRAY subquery must select one column"))?;
        let empty = self.bind(Value::Array(Vec::new()));
        Ok(format!(
            "(SELECT {}ifnull({}array_agg({}), {}) FROM ({}))",
            FUNC_PREFIX,
            FUNC_PREFIX,
            quote_ident(&column),
            empty,
            sql
        ))
    }

    fn inline_sql_udf(
        &self,
        udf: &crate::udf::SqlUdf,
        arg_exprs: &[&ast::Expr],
        scope: &Scope,
    ) -> Result<String> {
        let arg_types: Vec<DataType> = arg_exprs
            .iter()
            .map(|e| self.infer_type(e, scope))
            .collect();
        let body = self.udfs.specialize(udf, &arg_types)?;
        let mut body_scope = Scope::default();
        for (param, expr) in udf.params.iter().zip(arg_exprs) {
            let sql = self.rewrite_expr(expr, scope)?;
            body_scope
                .substitutions
                .insert(param.name.to_lowercase(), format!("({})", sql));
        }
        Ok(format!("({})", self.rewrite_expr(&body, &body_scope)?))
    }

    fn rewrite_aggregate(&self, f: &ast::Function, suffix: &str, scope: &Scope) -> Result<String> {
        let (args, distinct, ignore_nulls, order_by, limit) = self.aggregate_parts(f, scope)?;
        let mut call_args = args;
        if distinct || ignore_nulls || !order_by.is_empty() || limit.is_some() {
            call_args.push(self.call_opts(distinct, ignore_nulls, limit, &order_by, None)?);
        }
        Ok(func(suffix, &call_args))
    }

    /// Common unpacking for aggregate and window calls: rewritten
    /// arguments plus the option clauses.
    #[allow(clippy::type_complexity)]
    fn aggregate_parts(
        &self,
        f: &ast::Function,
        scope: &Scope,
    ) -> Result<(Vec<String>, bool, bool, Vec<(String, bool)>, Option<i64>)> {
        let mut args = Vec::new();
        let mut distinct = false;
        let mut ignore_nulls = matches!(f.null_treatment, Some(ast::NullTreatment::IgnoreNulls));
        let mut order_by = Vec::new();
        let mut limit = None;
        if let ast::FunctionArguments::List(list) = &f.args {
            distinct = matches!(
                list.duplicate_treatment,
                Some(ast::DuplicateTreatment::Distinct)
            );
            for arg in &list.args {
                match arg {
                    ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Expr(e)) => {
                        args.push(self.rewrite_expr(e, scope)?);
                    }
                    // COUNT(*) steps with no arguments
                    ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Wildcard) => {}
                    _ => {}
                }
            }
            for clause in &list.clauses {
                match clause {
                    ast::FunctionArgumentClause::IgnoreOrRespectNulls(treatment) => {
                        ignore_nulls = matches!(treatment, ast::NullTreatment::IgnoreNulls);
                    }
                    ast::FunctionArgumentClause::OrderBy(order) => {
                        for item in order {
                            let key = self.rewrite_expr(&item.expr, scope)?;
                            order_by.push((key, item.options.asc.unwrap_or(true)));
                        }
                    }
                    ast::FunctionArgumentClause::Limit(expr) => {
                        limit = Some(literal_i64(expr).ok_or_else(|| {
                            Error::analyze("aggregate LIMIT must be an integer literal")
                        })?);
                    }
                    _ => {}
                }
            }
        }
        Ok((args, distinct, ignore_nulls, order_by, limit))
    }

    fn call_opts(
        &self,
        distinct: bool,
        ignore_nulls: bool,
        limit: Option<i64>,
        order_by: &[(String, bool)],
        frame: Option<&Option<FrameSpec>>,
    ) -> Result<String> {
        let dirs: Vec<bool> = order_by.iter().map(|(_, asc)| *asc).collect();
        let json = CallOptions::static_json(distinct, ignore_nulls, limit, &dirs, frame);
        let mut args = vec![string_literal(&json)];
        args.extend(order_by.iter().map(|(key, _)| key.clone()));
        Ok(func("call_opts", &args))
    }

    fn rewrite_window(&self, f: &ast::Function, base_name: &str, scope: &Scope) -> Result<String> {
        let suffix = WINDOW_MAP
            .get(base_name)
            .ok_or_else(|| Error::analyze(format!("{} is not a window function", base_name)))?;
        let spec = match f.over.as_ref() {
            Some(ast::WindowType::WindowSpec(spec)) => spec,
            _ => {
                return Err(Error::analyze(format!(
                    "{}: named windows are not supported",
                    base_name
                )));
            }
        };
        let (args, distinct, ignore_nulls, _, _) = self.aggregate_parts(f, scope)?;

        let mut order_by = Vec::new();
        for item in &spec.order_by {
            let key = self.rewrite_expr(&item.expr, scope)?;
            order_by.push((key, item.options.asc.unwrap_or(true)));
        }
        let frame = match &spec.window_frame {
            None => None,
            Some(frame) => Some(convert_frame(frame)?),
        };

        let mut call_args = args;
        call_args.push(self.call_opts(distinct, ignore_nulls, None, &order_by, Some(&frame))?);

        let mut over = String::new();
        if !spec.partition_by.is_empty() {
            let parts: Vec<String> = spec
                .partition_by
                .iter()
                .map(|e| self.rewrite_expr(e, scope))
                .collect::<Result<_>>()?;
            over.push_str(&format!("PARTITION BY {} ", parts.join(", ")));
        }
        if !order_by.is_empty() {
            let keys: Vec<String> = order_by
                .iter()
                .map(|(key, asc)| format!("{}{}", key, if *asc { "" } else { " DESC" }))
                .collect();
            over.push_str(&format!("ORDER BY {} ", keys.join(", ")));
        }
        over.push_str("ROWS BETWEEN UNBOUNDED PRECEDING AND UNBOUNDED FOLLOWING");
        Ok(format!("{} OVER ({})", func(suffix, &call_args), over))
    }

    /// Light type inference: enough to key templated-function
    /// specializations and nothing more.
    pub fn infer_type(&self, expr: &ast::Expr, scope: &Scope) -> DataType {
        match expr {
            ast::Expr::Value(v) => match &v.value {
                ast::Value::Number(text, _) => {
                    if text.contains(['.', 'e', 'E']) {
                        DataType::Float64
                    } else {
                        DataType::Int64
                    }
                }
                ast::Value::Boolean(_) => DataType::Bool,
                ast::Value::SingleQuotedString(_)
                | ast::Value::DoubleQuotedString(_)
                | ast::Value::TripleSingleQuotedString(_)
                | ast::Value::TripleDoubleQuotedString(_) => DataType::String,
                _ => DataType::Unknown,
            },
            ast::Expr::Identifier(ident) => scope
                .column_type(&ident.value)
                .cloned()
                .unwrap_or(DataType::Unknown),
            ast::Expr::Cast { data_type, .. } => {
                convert_type(data_type).unwrap_or(DataType::Unknown)
            }
            ast::Expr::Array(array) => DataType::Array(Box::new(
                array
                    .elem
                    .first()
                    .map(|e| self.infer_type(e, scope))
                    .unwrap_or(DataType::Unknown),
            )),
            ast::Expr::Tuple(_) | ast::Expr::Struct { .. } => DataType::Struct(Vec::new()),
            ast::Expr::Nested(inner) | ast::Expr::Named { expr: inner, .. } => {
                self.infer_type(inner, scope)
            }
            ast::Expr::UnaryOp { expr: inner, .. } => self.infer_type(inner, scope),
            ast::Expr::BinaryOp { left, op, right } => {
                use ast::BinaryOperator as Op;
                match op {
                    Op::Plus | Op::Minus | Op::Multiply => {
                        let a = self.infer_type(left, scope);
                        let b = self.infer_type(right, scope);
                        widen(a, b)
                    }
                    Op::Divide => DataType::Float64,
                    Op::Eq | Op::NotEq | Op::Lt | Op::LtEq | Op::Gt | Op::GtEq | Op::And
                    | Op::Or => DataType::Bool,
                    _ => DataType::Unknown,
                }
            }
            _ => DataType::Unknown,
        }
    }
}

fn widen(a: DataType, b: DataType) -> DataType {
    use DataType::*;
    match (a, b) {
        (Float64, _) | (_, Float64) => Float64,
        (BigNumeric, _) | (_, BigNumeric) => BigNumeric,
        (Numeric, _) | (_, Numeric) => Numeric,
        (Int64, Int64) => Int64,
        _ => Unknown,
    }
}

pub fn function_arg_exprs(f: &ast::Function) -> Result<Vec<&ast::Expr>> {
    let mut out = Vec::new();
    if let ast::FunctionArguments::List(list) = &f.args {
        for arg in &list.args {
            match arg {
                ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Expr(e)) => out.push(e),
                ast::FunctionArg::Named { arg: ast::FunctionArgExpr::Expr(e), .. } => out.push(e),
                _ => {}
            }
        }
    }
    Ok(out)
}

pub fn literal_i64(expr: &ast::Expr) -> Option<i64> {
    match expr {
        ast::Expr::Value(v) => match &v.value {
            ast::Value::Number(text, _) => text.parse().ok(),
            _ => None,
        },
        ast::Expr::UnaryOp { op: ast::UnaryOperator::Minus, expr } => {
            literal_i64(expr).map(|n| -n)
        }
        _ => None,
    }
}

pub fn ast_value_text(value: &ast::Value) -> Result<String> {
    use ast::Value as V;
    match value {
        V::SingleQuotedString(s)
        | V::DoubleQuotedString(s)
        | V::TripleSingleQuotedString(s)
        | V::TripleDoubleQuotedString(s)
        | V::SingleQuotedRawStringLiteral(s)
        | V::DoubleQuotedRawStringLiteral(s)
        | V::TripleSingleQuotedRawStringLiteral(s)
        | V::TripleDoubleQuotedRawStringLiteral(s) => Ok(s.clone()),
        V::Number(text, _) => Ok(text.clone()),
        other => Err(Error::analyze(format!(
            "expected a string literal, got {:?}",
            other
        ))),
    }
}

fn hex_to_bytes(s: &str) -> Result<Vec<u8>> {
    hex::decode(s).map_err(|e| Error::analyze(format!("invalid hex literal: {}", e)))
}

fn convert_frame(frame: &ast::WindowFrame) -> Result<FrameSpec> {
    let units = match frame.units {
        ast::WindowFrameUnits::Rows => FrameUnits::Rows,
        ast::WindowFrameUnits::Range => FrameUnits::Range,
        ast::WindowFrameUnits::Groups => {
            return Err(Error::analyze("GROUPS frames are not supported"));
        }
    };
    let start = convert_bound(&frame.start_bound, true)?;
    let end = match &frame.end_bound {
        Some(bound) => convert_bound(bound, false)?,
        None => FrameBound::CurrentRow,
    };
    Ok(FrameSpec { units, start, end })
}

fn convert_bound(bound: &ast::WindowFrameBound, is_start: bool) -> Result<FrameBound> {
    match bound {
        ast::WindowFrameBound::CurrentRow => Ok(FrameBound::CurrentRow),
        ast::WindowFrameBound::Preceding(None) => Ok(FrameBound::UnboundedPreceding),
        ast::WindowFrameBound::Following(None) => {
            if is_start {
                Err(Error::analyze("frame cannot start UNBOUNDED FOLLOWING"))
            } else {
                Ok(FrameBound::UnboundedFollowing)
            }
        }
        ast::WindowFrameBound::Preceding(Some(expr)) => literal_i64(expr)
            .map(FrameBound::Preceding)
            .ok_or_else(|| Error::analyze("frame offsets must be integer literals")),
        ast::WindowFrameBound::Following(Some(expr)) => literal_i64(expr)
            .map(FrameBound::Following)
            .ok_or_else(|| Error::analyze("frame offsets must be integer literals")),
    }
}
