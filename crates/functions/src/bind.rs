//! Adapter layer between the host store's calling convention and the
//! value model: cell conversion, error mapping, and the aggregator /
//! window-aggregator state machines.

use std::collections::HashSet;
use std::panic::{RefUnwindSafe, UnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};

use rusqlite::functions::Context;
use rusqlite::types::ValueRef;
use skiffql_common::{Error, Result};
use skiffql_core::{Cell, Value, decode_cell, encode, encode_cell};

use crate::options::CallOptions;
use crate::window;

pub fn value_from_raw(raw: ValueRef<'_>) -> Result<Value> {
    let cell = match raw {
        ValueRef::Null => Cell::Null,
        ValueRef::Integer(v) => Cell::Int(v),
        ValueRef::Real(v) => Cell::Real(v),
        ValueRef::Text(bytes) => Cell::Text(
            std::str::from_utf8(bytes)
                .map_err(|_| Error::type_coercion("TEXT cell is not valid UTF-8"))?
                .to_string(),
        ),
        ValueRef::Blob(bytes) => Cell::Blob(bytes.to_vec()),
    };
    decode_cell(&cell)
}

pub fn value_to_sql(value: &Value) -> Result<rusqlite::types::Value> {
    Ok(match encode_cell(value)? {
        Cell::Null => rusqlite::types::Value::Null,
        Cell::Int(v) => rusqlite::types::Value::Integer(v),
        Cell::Real(v) => rusqlite::types::Value::Real(v),
        Cell::Text(s) => rusqlite::types::Value::Text(s),
        Cell::Blob(b) => rusqlite::types::Value::Blob(b),
    })
}

/// Wraps an engine error for the host store; the taxonomy is recovered
/// on the statement side by `from_host_error`.
pub fn engine_error(e: Error) -> rusqlite::Error {
    rusqlite::Error::UserFunctionError(Box::new(e))
}

/// Maps a host-store failure back into the engine taxonomy. Errors
/// raised inside registered functions come back as their display text,
/// so the kinds are recovered from the message shape.
pub fn from_host_error(e: rusqlite::Error) -> Error {
    match e {
        rusqlite::Error::UserFunctionError(inner) => match inner.downcast::<Error>() {
            Ok(engine) => *engine,
            Err(other) => Error::udf_runtime(other.to_string()),
        },
        rusqlite::Error::SqliteFailure(_, Some(msg)) => classify_message(msg),
        other => Error::internal(other.to_string()),
    }
}

fn classify_message(msg: String) -> Error {
    if msg.contains("division by zero") {
        Error::DivisionByZero(msg)
    } else if let Some(rest) = msg.strip_prefix("numeric overflow: ") {
        Error::Overflow(rest.to_string())
    } else if msg.starts_with("type mismatch: ") || msg.starts_with("cannot coerce value: ") {
        Error::TypeCoercion(msg)
    } else if let Some(rest) = msg.strip_prefix("user-defined function failed: ") {
        Error::UdfRuntime(rest.to_string())
    } else if msg.ends_with("execution time limit exceeded") {
        Error::UdfTimeout(msg)
    } else if msg.ends_with("memory limit exceeded") {
        Error::UdfMemory(msg)
    } else if let Some(rest) = msg.strip_prefix("invalid argument: ") {
        Error::InvalidArgument(rest.to_string())
    } else if let Some(rest) = msg.strip_prefix("not found in catalog: ") {
        Error::CatalogMissing(rest.to_string())
    } else if let Some(rest) = msg.strip_prefix("catalog conflict: ") {
        Error::CatalogConflict(rest.to_string())
    } else if let Some(rest) = msg.strip_prefix("internal error: ") {
        Error::Internal(rest.to_string())
    } else {
        Error::InvalidArgument(msg)
    }
}

/// Splits the host-store argument list into user arguments and the
/// optional trailing `CallOptions` record.
pub fn split_args(ctx: &Context<'_>) -> Result<(Vec<Value>, CallOptions)> {
    let len = ctx.len();
    let mut opts = CallOptions::default();
    let mut user_len = len;
    if len > 0 {
        if let ValueRef::Text(bytes) = ctx.get_raw(len - 1) {
            if let Ok(text) = std::str::from_utf8(bytes) {
                if CallOptions::is_encoded(text) {
                    opts = CallOptions::decode(text)?;
                    user_len = len - 1;
                }
            }
        }
    }
    let mut args = Vec::with_capacity(user_len);
    for i in 0..user_len {
        args.push(value_from_raw(ctx.get_raw(i))?);
    }
    Ok((args, opts))
}

/// Group-scoped aggregate body: stepped once per surviving row, asked
/// for its result exactly once.
pub trait AggBody: Send + UnwindSafe + RefUnwindSafe {
    fn step(&mut self, args: Vec<Value>, opts: &CallOptions) -> Result<()>;
    fn done(&mut self) -> Result<Value>;
}

pub struct AggregatorState {
    seen: HashSet<String>,
    body: Box<dyn AggBody>,
}

impl AggregatorState {
    fn step(&mut self, name: &str, args: Vec<Value>, opts: CallOptions) -> Result<()> {
        if opts.ignore_nulls && args.first().is_some_and(|v| v.is_null()) {
            return Ok(());
        }
        if opts.distinct {
            let first = args.first().ok_or_else(|| {
                Error::invalid_argument(format!("{}: DISTINCT requires at least one argument", name))
            })?;
            if first.is_null() {
                return Ok(());
            }
            if !self.seen.insert(encode::canonical_key(first)) {
                return Ok(());
            }
        }
        self.body.step(args, &opts)
    }
}

/// Registered once per aggregate; the factory builds a fresh body per
/// group.
pub struct AggregateAdapter {
    pub name: &'static str,
    pub make: fn() -> Box<dyn AggBody>,
}

impl rusqlite::functions::Aggregate<AggregatorState, rusqlite::types::Value>
    for AggregateAdapter
{
    fn init(&self, _: &mut Context<'_>) -> rusqlite::Result<AggregatorState> {
        Ok(AggregatorState {
            seen: HashSet::new(),
            body: (self.make)(),
        })
    }

    fn step(&self, ctx: &mut Context<'_>, state: &mut AggregatorState) -> rusqlite::Result<()> {
        let (args, opts) = split_args(ctx).map_err(engine_error)?;
        state.step(self.name, args, opts).map_err(engine_error)
    }

    fn finalize(
        &self,
        _: &mut Context<'_>,
        state: Option<AggregatorState>,
    ) -> rusqlite::Result<rusqlite::types::Value> {
        let result = match state {
            Some(mut s) => s.body.done(),
            // no rows stepped: an empty group still has a value
            None => (self.make)().done(),
        }
        .map_err(engine_error)?;
        value_to_sql(&result).map_err(engine_error)
    }
}

/// One buffered partition row: the evaluated arguments plus the options
/// record carrying order keys and the frame descriptor.
pub struct WinRow {
    pub args: Vec<Value>,
    pub opts: CallOptions,
}

pub struct WindowBuffer {
    pub rows: Vec<WinRow>,
    seen: HashSet<String>,
    cursor: AtomicUsize,
}

/// The rewriter always emits an UNBOUNDED..UNBOUNDED host frame, so the
/// store steps the whole partition before asking for row values; the
/// cursor then addresses rows in window order, one `value` call each.
pub struct WindowAdapter {
    pub name: &'static str,
    pub kind: window::WindowKind,
}

impl rusqlite::functions::Aggregate<WindowBuffer, rusqlite::types::Value> for WindowAdapter {
    fn init(&self, _: &mut Context<'_>) -> rusqlite::Result<WindowBuffer> {
        Ok(WindowBuffer {
            rows: Vec::new(),
            seen: HashSet::new(),
            cursor: AtomicUsize::new(0),
        })
    }

    fn step(&self, ctx: &mut Context<'_>, state: &mut WindowBuffer) -> rusqlite::Result<()> {
        let (args, opts) = split_args(ctx).map_err(engine_error)?;
        if opts.distinct {
            let first = args.first().ok_or_else(|| {
                engine_error(Error::invalid_argument(format!(
                    "{}: DISTINCT requires at least one argument",
                    self.name
                )))
            })?;
            if !first.is_null() && !state.seen.insert(encode::canonical_key(first)) {
                return Ok(());
            }
        }
        state.rows.push(WinRow { args, opts });
        Ok(())
    }

    fn finalize(
        &self,
        _: &mut Context<'_>,
        _: Option<WindowBuffer>,
    ) -> rusqlite::Result<rusqlite::types::Value> {
        Ok(rusqlite::types::Value::Null)
    }
}

impl rusqlite::functions::WindowAggregate<WindowBuffer, rusqlite::types::Value>
    for WindowAdapter
{
    fn value(&self, state: Option<&mut WindowBuffer>) -> rusqlite::Result<rusqlite::types::Value> {
        let state = state.ok_or_else(|| {
            engine_error(Error::internal(format!("{}: empty window partition", self.name)))
        })?;
        let index = state.cursor.fetch_add(1, Ordering::Relaxed);
        if index >= state.rows.len() {
            return Err(engine_error(Error::internal(format!(
                "{}: window cursor out of range",
                self.name
            ))));
        }
        let frame = window::frame_indices(&state.rows, index).map_err(engine_error)?;
        let result = self
            .kind
            .evaluate(&state.rows, &frame, index)
            .map_err(engine_error)?;
        value_to_sql(&result).map_err(engine_error)
    }

    fn inverse(&self, _: &mut Context<'_>, _: &mut WindowBuffer) -> rusqlite::Result<()> {
        // unreachable under the UNBOUNDED..UNBOUNDED host frame
        Err(engine_error(Error::internal(format!(
            "{}: unexpected frame inversion",
            self.name
        ))))
    }
}
