//! Caller-supplied statement parameters: positional `?` and named
//! `@name`, carrying any engine value including arrays and structs.

use std::collections::HashMap;
use std::collections::VecDeque;

use skiffql_common::{Error, Result};
use skiffql_core::Value;

#[derive(Debug, Clone)]
pub struct Param {
    pub name: Option<String>,
    pub value: Value,
}

impl Param {
    pub fn named(name: impl Into<String>, value: impl Into<Value>) -> Param {
        Param {
            name: Some(name.into()),
            value: value.into(),
        }
    }
}

impl<T: Into<Value>> From<T> for Param {
    fn from(value: T) -> Param {
        Param {
            name: None,
            value: value.into(),
        }
    }
}

/// Consumes caller parameters during rewriting and accumulates the
/// final bind list for the host statement.
pub struct ParamBinder {
    positional: VecDeque<Value>,
    named: HashMap<String, Value>,
    binds: Vec<Value>,
}

impl ParamBinder {
    pub fn new(params: &[Param]) -> ParamBinder {
        let mut positional = VecDeque::new();
        let mut named = HashMap::new();
        for p in params {
            match &p.name {
                Some(name) => {
                    named.insert(name.to_lowercase(), p.value.clone());
                }
                None => positional.push_back(p.value.clone()),
            }
        }
        ParamBinder {
            positional,
            named,
            binds: Vec::new(),
        }
    }

    /// Appends a bind value, returning its `?N` placeholder.
    pub fn push(&mut self, value: Value) -> String {
        self.binds.push(value);
        format!("?{}", self.binds.len())
    }

    pub fn take_positional(&mut self) -> Result<Value> {
        self.positional
            .pop_front()
            .ok_or_else(|| Error::invalid_argument("not enough positional parameters"))
    }

    pub fn take_named(&mut self, name: &str) -> Result<Value> {
        self.named
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| Error::invalid_argument(format!("missing named parameter @{}", name)))
    }

    pub fn into_binds(self) -> Vec<Value> {
        self.binds
    }

    /// Splits off the accumulated binds, handing back a binder with the
    /// unconsumed caller parameters for the next statement in a script.
    pub fn into_parts(self) -> (Vec<Value>, ParamBinder) {
        (
            self.binds,
            ParamBinder {
                positional: self.positional,
                named: self.named,
                binds: Vec::new(),
            },
        )
    }
}
