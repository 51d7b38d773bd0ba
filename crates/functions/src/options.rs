//! Per-call options for aggregate and window invocations. The rewriter
//! assembles one `CallOptions` record per input row and appends it as a
//! single trailing argument; the adapter strips it before the user
//! arguments reach the function body.

use skiffql_common::{Error, Result};
use skiffql_core::Value;
use skiffql_core::encode;

/// Marker prefix for an encoded `CallOptions` cell.
pub const OPT_TAG: &str = "\u{1}skiffopt:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameUnits {
    Rows,
    Range,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameBound {
    UnboundedPreceding,
    Preceding(i64),
    CurrentRow,
    Following(i64),
    UnboundedFollowing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameSpec {
    pub units: FrameUnits,
    pub start: FrameBound,
    pub end: FrameBound,
}

/// Options that ride along with each step call. `order_by` carries the
/// per-row ORDER BY key values with their directions (true = ASC).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallOptions {
    pub distinct: bool,
    pub ignore_nulls: bool,
    pub limit: Option<i64>,
    pub order_by: Vec<(Value, bool)>,
    /// Present only for window invocations. `None` frame with ORDER BY
    /// means the dialect default (RANGE UNBOUNDED PRECEDING..CURRENT
    /// ROW); without ORDER BY the frame is the whole partition.
    pub window: Option<Option<FrameSpec>>,
}

impl FrameBound {
    fn to_json(self) -> serde_json::Value {
        match self {
            FrameBound::UnboundedPreceding => serde_json::json!("up"),
            FrameBound::Preceding(n) => serde_json::json!(["p", n]),
            FrameBound::CurrentRow => serde_json::json!("cr"),
            FrameBound::Following(n) => serde_json::json!(["f", n]),
            FrameBound::UnboundedFollowing => serde_json::json!("uf"),
        }
    }

    fn from_json(j: &serde_json::Value) -> Result<Self> {
        if let Some(s) = j.as_str() {
            return match s {
                "up" => Ok(FrameBound::UnboundedPreceding),
                "cr" => Ok(FrameBound::CurrentRow),
                "uf" => Ok(FrameBound::UnboundedFollowing),
                other => Err(Error::internal(format!("bad frame bound {:?}", other))),
            };
        }
        let pair = j
            .as_array()
            .filter(|a| a.len() == 2)
            .ok_or_else(|| Error::internal("bad frame bound"))?;
        let n = pair[1]
            .as_i64()
            .ok_or_else(|| Error::internal("bad frame offset"))?;
        match pair[0].as_str() {
            Some("p") => Ok(FrameBound::Preceding(n)),
            Some("f") => Ok(FrameBound::Following(n)),
            _ => Err(Error::internal("bad frame bound")),
        }
    }
}

impl CallOptions {
    /// The static half, produced once at rewrite time; the per-row key
    /// values are appended by `encode_with_keys`.
    pub fn static_json(
        distinct: bool,
        ignore_nulls: bool,
        limit: Option<i64>,
        dirs: &[bool],
        window: Option<&Option<FrameSpec>>,
    ) -> String {
        let mut obj = serde_json::Map::new();
        obj.insert("distinct".into(), serde_json::json!(distinct));
        obj.insert("ignore_nulls".into(), serde_json::json!(ignore_nulls));
        if let Some(n) = limit {
            obj.insert("limit".into(), serde_json::json!(n));
        }
        obj.insert("dirs".into(), serde_json::json!(dirs));
        if let Some(frame) = window {
            let frame_json = match frame {
                None => serde_json::Value::Null,
                Some(spec) => serde_json::json!({
                    "units": match spec.units {
                        FrameUnits::Rows => "rows",
                        FrameUnits::Range => "range",
                    },
                    "start": spec.start.to_json(),
                    "end": spec.end.to_json(),
                }),
            };
            obj.insert("window".into(), frame_json);
        }
        serde_json::Value::Object(obj).to_string()
    }

    /// Builds the trailing-argument cell text: static JSON plus the
    /// evaluated per-row key values.
    pub fn encode_with_keys(static_json: &str, keys: &[Value]) -> Result<String> {
        let mut obj: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(static_json)
                .map_err(|e| Error::internal(format!("bad call options: {}", e)))?;
        obj.insert(
            "keys".into(),
            serde_json::from_str(&encode::array_plain_json(keys)?)
                .map_err(|e| Error::internal(format!("bad key encoding: {}", e)))?,
        );
        Ok(format!("{}{}", OPT_TAG, serde_json::Value::Object(obj)))
    }

    pub fn is_encoded(text: &str) -> bool {
        text.starts_with(OPT_TAG)
    }

    pub fn decode(text: &str) -> Result<CallOptions> {
        let body = text
            .strip_prefix(OPT_TAG)
            .ok_or_else(|| Error::internal("missing call-option marker"))?;
        let obj: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| Error::internal(format!("bad call options: {}", e)))?;
        let dirs: Vec<bool> = obj["dirs"]
            .as_array()
            .map(|a| a.iter().map(|d| d.as_bool().unwrap_or(true)).collect())
            .unwrap_or_default();
        let keys: Vec<Value> = match obj.get("keys").and_then(|k| k.as_array()) {
            Some(items) => {
                let json = serde_json::Value::Array(items.clone()).to_string();
                match skiffql_core::decode_cell(&skiffql_core::Cell::Text(format!(
                    "{}a:{}",
                    encode::ENC_PREFIX,
                    json
                )))? {
                    Value::Array(values) => values,
                    _ => Vec::new(),
                }
            }
            None => Vec::new(),
        };
        let window = match obj.get("window") {
            None => None,
            Some(serde_json::Value::Null) => Some(None),
            Some(frame) => Some(Some(FrameSpec {
                units: match frame["units"].as_str() {
                    Some("range") => FrameUnits::Range,
                    _ => FrameUnits::Rows,
                },
                start: FrameBound::from_json(&frame["start"])?,
                end: FrameBound::from_json(&frame["end"])?,
            })),
        };
        Ok(CallOptions {
            distinct: obj["distinct"].as_bool().unwrap_or(false),
            ignore_nulls: obj["ignore_nulls"].as_bool().unwrap_or(false),
            limit: obj.get("limit").and_then(|l| l.as_i64()),
            order_by: keys.into_iter().zip(dirs.into_iter().chain(std::iter::repeat(true))).collect(),
            window,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_round_trip() {
        let json = CallOptions::static_json(
            true,
            false,
            Some(3),
            &[true, false],
            Some(&Some(FrameSpec {
                units: FrameUnits::Range,
                start: FrameBound::Preceding(2),
                end: FrameBound::CurrentRow,
            })),
        );
        let text =
            CallOptions::encode_with_keys(&json, &[Value::Int64(5), Value::from("k")]).unwrap();
        assert!(CallOptions::is_encoded(&text));
        let opts = CallOptions::decode(&text).unwrap();
        assert!(opts.distinct);
        assert_eq!(opts.limit, Some(3));
        assert_eq!(opts.order_by.len(), 2);
        assert_eq!(opts.order_by[0], (Value::Int64(5), true));
        assert_eq!(opts.order_by[1], (Value::from("k"), false));
        let frame = opts.window.unwrap().unwrap();
        assert_eq!(frame.units, FrameUnits::Range);
        assert_eq!(frame.start, FrameBound::Preceding(2));
    }

    #[test]
    fn default_frame_encodes_as_null() {
        let json = CallOptions::static_json(false, false, None, &[true], Some(&None));
        let text = CallOptions::encode_with_keys(&json, &[Value::Int64(1)]).unwrap();
        let opts = CallOptions::decode(&text).unwrap();
        assert_eq!(opts.window, Some(None));
    }
}
