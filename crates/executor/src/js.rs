//! JavaScript UDF host: one isolate per engine thread, one fresh
//! context per call, typed argument marshalling, and per-call
//! wall-clock and heap bounds.

use std::cell::RefCell;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use skiffql_common::{Error, Result};
use skiffql_core::{DataType, Value};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct JsUdf {
    pub name: String,
    pub params: Vec<(String, DataType)>,
    pub return_type: DataType,
    pub body: String,
}

#[derive(Debug, Clone, Copy)]
pub struct JsLimits {
    pub timeout: Duration,
    pub heap_bytes: usize,
}

impl Default for JsLimits {
    fn default() -> JsLimits {
        JsLimits {
            timeout: Duration::from_secs(1),
            heap_bytes: 16 * 1024 * 1024,
        }
    }
}

static V8_INIT: Once = Once::new();

fn init_v8_platform() {
    V8_INIT.call_once(|| {
        let platform = v8::new_default_platform(0, false).make_shared();
        v8::V8::initialize_platform(platform);
        v8::V8::initialize();
    });
}

thread_local! {
    static V8_ISOLATE: RefCell<Option<v8::OwnedIsolate>> = const { RefCell::new(None) };
}

fn with_isolate<F, R>(heap_bytes: usize, f: F) -> R
where
    F: FnOnce(&mut v8::OwnedIsolate) -> R,
{
    init_v8_platform();

    V8_ISOLATE.with(|cell| {
        let mut borrow = cell.borrow_mut();
        if borrow.is_none() {
            let params = v8::CreateParams::default().heap_limits(0, heap_bytes);
            *borrow = Some(v8::Isolate::new(params));
        }
        f(borrow.as_mut().expect("isolate just installed"))
    })
}

struct HeapGuard {
    handle: v8::IsolateHandle,
    hit: Arc<AtomicBool>,
}

extern "C" fn on_near_heap_limit(data: *mut std::ffi::c_void, current: usize, _initial: usize) -> usize {
    // raise the limit so V8 can unwind, then stop the script
    let guard = unsafe { &*(data as *const HeapGuard) };
    guard.hit.store(true, Ordering::SeqCst);
    guard.handle.terminate_execution();
    current * 2
}

/// Runs a UDF body with the declared parameter names bound to the
/// marshalled arguments. Failures in JS fail the call, not the session.
pub fn evaluate(udf: &JsUdf, args: &[Value], limits: JsLimits) -> Result<Value> {
    let display = udf.name.to_uppercase();
    with_isolate(limits.heap_bytes, |isolate| {
        let heap_hit = Arc::new(AtomicBool::new(false));
        let guard = Box::new(HeapGuard {
            handle: isolate.thread_safe_handle(),
            hit: heap_hit.clone(),
        });
        let guard_ptr = Box::into_raw(guard);
        isolate.add_near_heap_limit_callback(on_near_heap_limit, guard_ptr as *mut _);

        let timed_out = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let watchdog = {
            let handle = isolate.thread_safe_handle();
            let timed_out = timed_out.clone();
            let timeout = limits.timeout;
            std::thread::spawn(move || {
                if done_rx.recv_timeout(timeout).is_err() {
                    timed_out.store(true, Ordering::SeqCst);
                    handle.terminate_execution();
                }
            })
        };

        let outcome = run_in_isolate(isolate, udf, args);

        let _ = done_tx.send(());
        let _ = watchdog.join();
        isolate.remove_near_heap_limit_callback(on_near_heap_limit, limits.heap_bytes);
        // rebox to release the guard
        drop(unsafe { Box::from_raw(guard_ptr) });
        if isolate.is_execution_terminating() {
            isolate.cancel_terminate_execution();
        }

        match outcome {
            Ok(Some(value)) => {
                debug!(function = %udf.name, "javascript call completed");
                value.coerce_to(&udf.return_type).map_err(|e| {
                    Error::udf_runtime(format!("{}: result: {}", display, e))
                })
            }
            failed => {
                isolate.cancel_terminate_execution();
                if heap_hit.load(Ordering::SeqCst) {
                    return Err(Error::UdfMemory(display));
                }
                if timed_out.load(Ordering::SeqCst) {
                    return Err(Error::UdfTimeout(display));
                }
                match failed {
                    Err(message) => Err(Error::udf_runtime(format!("{}: {}", display, message))),
                    _ => Err(Error::udf_runtime(format!(
                        "{}: script returned no value",
                        display
                    ))),
                }
            }
        }
    })
}

/// Compiles and runs the wrapped body; `Err` carries the JS exception
/// text, `Ok(None)` means the script produced nothing.
fn run_in_isolate(
    isolate: &mut v8::OwnedIsolate,
    udf: &JsUdf,
    args: &[Value],
) -> std::result::Result<Option<Value>, String> {
    let handle_scope = &mut v8::HandleScope::new(isolate);
    let context = v8::Context::new(handle_scope, Default::default());
    let scope = &mut v8::ContextScope::new(handle_scope, context);
    let scope = &mut v8::TryCatch::new(scope);

    for ((name, data_type), value) in udf.params.iter().zip(args.iter()) {
        let marshalled = marshal_argument(value, data_type).map_err(|e| e.to_string())?;
        let js_val = json_to_v8(scope, &marshalled)?;
        let key = v8::String::new(scope, name).ok_or("failed to allocate parameter name")?;
        context
            .global(scope)
            .set(scope, key.into(), js_val)
            .ok_or_else(|| format!("failed to bind parameter {}", name))?;
    }

    let param_names: Vec<&str> = udf.params.iter().map(|(n, _)| n.as_str()).collect();
    let wrapper = build_wrapper(&udf.body, &param_names);
    let code = v8::String::new(scope, &wrapper).ok_or("failed to allocate script source")?;
    let script = match v8::Script::compile(scope, code, None) {
        Some(script) => script,
        None => return Err(exception_text(scope, "compilation failed")),
    };
    match script.run(scope) {
        Some(result) => Ok(Some(v8_to_value(scope, result)?)),
        None => {
            if scope.has_caught() && !scope.is_execution_terminating() {
                Err(exception_text(scope, "execution failed"))
            } else {
                Ok(None)
            }
        }
    }
}

fn exception_text(scope: &mut v8::TryCatch<v8::HandleScope>, fallback: &str) -> String {
    scope
        .exception()
        .map(|e| e.to_rust_string_lossy(scope))
        .unwrap_or_else(|| fallback.to_string())
}

fn build_wrapper(body: &str, param_names: &[&str]) -> String {
    let params = param_names.join(", ");
    let trimmed = body.trim();
    let is_arrow = trimmed.starts_with('(') && trimmed.contains("=>");
    let is_function = trimmed.starts_with("function");
    if is_arrow || is_function {
        format!("({})({})", trimmed, params)
    } else {
        format!("(function({}) {{ {} }})({})", params, trimmed, params)
    }
}

/// Typed marshalling per the declared parameter type: structured values
/// serialize deep, BYTES as base64, date/time kinds as their text
/// forms, decimals as decimal strings.
fn marshal_argument(value: &Value, data_type: &DataType) -> Result<serde_json::Value> {
    let coerced = value.coerce_to(data_type)?;
    marshal_value(&coerced)
}

fn marshal_value(value: &Value) -> Result<serde_json::Value> {
    match value {
        Value::Null => Ok(serde_json::Value::Null),
        Value::Bool(b) => Ok(serde_json::Value::Bool(*b)),
        Value::Int64(v) => Ok(serde_json::Value::from(*v)),
        Value::Float64(f) => Ok(serde_json::Value::from(f.into_inner())),
        Value::Numeric(d) | Value::BigNumeric(d) => {
            Ok(serde_json::Value::String(d.to_canonical_string()))
        }
        Value::Bytes(b) => Ok(serde_json::Value::String(BASE64.encode(b))),
        Value::Json(j) => Ok(j.clone()),
        Value::Array(items) => Ok(serde_json::Value::Array(
            items.iter().map(marshal_value).collect::<Result<_>>()?,
        )),
        Value::Struct(fields) => {
            let mut map = serde_json::Map::with_capacity(fields.len());
            for (name, v) in fields {
                map.insert(name.clone(), marshal_value(v)?);
            }
            Ok(serde_json::Value::Object(map))
        }
        other => Ok(serde_json::Value::String(other.to_text()?)),
    }
}

fn json_to_v8<'s>(
    scope: &mut v8::TryCatch<'s, v8::HandleScope<'s>>,
    json: &serde_json::Value,
) -> std::result::Result<v8::Local<'s, v8::Value>, String> {
    match json {
        serde_json::Value::Null => Ok(v8::null(scope).into()),
        serde_json::Value::Bool(b) => Ok(v8::Boolean::new(scope, *b).into()),
        serde_json::Value::Number(n) => Ok(v8::Number::new(scope, n.as_f64().unwrap_or(0.0)).into()),
        serde_json::Value::String(s) => {
            let js = v8::String::new(scope, s).ok_or("failed to allocate string")?;
            Ok(js.into())
        }
        serde_json::Value::Array(items) => {
            let arr = v8::Array::new(scope, items.len() as i32);
            for (i, item) in items.iter().enumerate() {
                let js_item = json_to_v8(scope, item)?;
                arr.set_index(scope, i as u32, js_item)
                    .ok_or("failed to set array element")?;
            }
            Ok(arr.into())
        }
        serde_json::Value::Object(map) => {
            let obj = v8::Object::new(scope);
            for (k, v) in map {
                let key = v8::String::new(scope, k).ok_or("failed to allocate key")?;
                let js_v = json_to_v8(scope, v)?;
                obj.set(scope, key.into(), js_v)
                    .ok_or("failed to set object property")?;
            }
            Ok(obj.into())
        }
    }
}

fn v8_to_value(
    scope: &mut v8::TryCatch<v8::HandleScope>,
    js_val: v8::Local<v8::Value>,
) -> std::result::Result<Value, String> {
    if js_val.is_null() || js_val.is_undefined() {
        return Ok(Value::Null);
    }
    if js_val.is_boolean() {
        return Ok(Value::Bool(js_val.boolean_value(scope)));
    }
    if js_val.is_number() {
        let n = js_val.number_value(scope).unwrap_or(0.0);
        if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
            return Ok(Value::Int64(n as i64));
        }
        return Ok(Value::float64(n));
    }
    if js_val.is_string() {
        return Ok(Value::String(js_val.to_rust_string_lossy(scope)));
    }
    if js_val.is_array() {
        let arr = v8::Local::<v8::Array>::try_from(js_val).map_err(|_| "not an array")?;
        let mut items = Vec::with_capacity(arr.length() as usize);
        for i in 0..arr.length() {
            let elem = arr.get_index(scope, i).ok_or("failed to read array element")?;
            items.push(v8_to_value(scope, elem)?);
        }
        return Ok(Value::Array(items));
    }
    if js_val.is_object() {
        let obj = v8::Local::<v8::Object>::try_from(js_val).map_err(|_| "not an object")?;
        let keys = obj
            .get_own_property_names(scope, v8::GetPropertyNamesArgs::default())
            .ok_or("failed to read object keys")?;
        let mut fields = Vec::with_capacity(keys.length() as usize);
        for i in 0..keys.length() {
            let key = keys.get_index(scope, i).ok_or("failed to read key")?;
            let name = key.to_rust_string_lossy(scope);
            let value = obj.get(scope, key).ok_or("failed to read property")?;
            fields.push((name, v8_to_value(scope, value)?));
        }
        return Ok(Value::Struct(fields));
    }
    Err("unsupported JavaScript value".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn udf(params: &[(&str, DataType)], ret: DataType, body: &str) -> JsUdf {
        JsUdf {
            name: "test_fn".into(),
            params: params
                .iter()
                .map(|(n, t)| (n.to_string(), t.clone()))
                .collect(),
            return_type: ret,
            body: body.to_string(),
        }
    }

    #[test]
    fn multiplies_inputs() {
        let f = udf(
            &[("x", DataType::Float64), ("y", DataType::Float64)],
            DataType::Float64,
            "return x*y;",
        );
        let out = evaluate(&f, &[Value::Int64(3), Value::Int64(15)], JsLimits::default()).unwrap();
        assert_eq!(out, Value::float64(45.0));
    }

    #[test]
    fn struct_arguments_marshal_deep() {
        let f = udf(
            &[(
                "obj",
                DataType::Struct(vec![
                    skiffql_core::StructField {
                        name: "idx".into(),
                        data_type: DataType::Int64,
                    },
                    skiffql_core::StructField {
                        name: "name".into(),
                        data_type: DataType::String,
                    },
                ]),
            )],
            DataType::Array(Box::new(DataType::String)),
            "return [obj['idx'], obj['name']];",
        );
        let arg = Value::Struct(vec![
            ("idx".into(), Value::Int64(1)),
            ("name".into(), Value::from("A")),
        ]);
        let out = evaluate(&f, &[arg], JsLimits::default()).unwrap();
        assert_eq!(
            out,
            Value::Array(vec![Value::from("1"), Value::from("A")])
        );
    }

    #[test]
    fn runtime_errors_fail_the_call_only() {
        let f = udf(&[], DataType::Int64, "throw new Error('boom');");
        let err = evaluate(&f, &[], JsLimits::default()).unwrap_err();
        assert!(matches!(err, Error::UdfRuntime(_)));
    }

    #[test]
    fn infinite_loop_hits_the_wall_clock_bound() {
        let f = udf(&[], DataType::Int64, "while (true) {}");
        let limits = JsLimits {
            timeout: Duration::from_millis(100),
            ..JsLimits::default()
        };
        let err = evaluate(&f, &[], limits).unwrap_err();
        assert!(matches!(err, Error::UdfTimeout(_)));
    }
}
