//! Driver-facing result rows. Results are materialized when the
//! statement runs (the way the engine's evaluator returns whole result
//! tables) and iterated through the usual next/get surface.

use std::collections::VecDeque;

use skiffql_common::{Error, Result};
use skiffql_core::Value;

#[derive(Debug, Clone)]
pub struct Row {
    columns: std::sync::Arc<Vec<String>>,
    values: Vec<Value>,
}

impl Row {
    pub(crate) fn new(columns: std::sync::Arc<Vec<String>>, values: Vec<Value>) -> Row {
        Row { columns, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn value(&self, index: usize) -> Result<&Value> {
        self.values
            .get(index)
            .ok_or_else(|| Error::invalid_argument(format!("column index {} out of range", index)))
    }

    pub fn value_by_name(&self, name: &str) -> Result<&Value> {
        let index = self
            .columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::invalid_argument(format!("no column named {}", name)))?;
        self.value(index)
    }

    /// Scans a column into a host type.
    pub fn get<T: FromValue>(&self, index: usize) -> Result<T> {
        T::from_value(self.value(index)?)
    }
}

pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self>;
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Value> {
        Ok(value.clone())
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<i64> {
        value.to_int64()
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<f64> {
        value.to_float64()
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<bool> {
        value.to_bool()
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<String> {
        value.to_text()
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Vec<u8>> {
        value.to_bytes()
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Option<T>> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

/// Result iterator for one statement.
pub struct Rows {
    columns: std::sync::Arc<Vec<String>>,
    rows: VecDeque<Vec<Value>>,
}

impl Rows {
    pub(crate) fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Rows {
        Rows {
            columns: std::sync::Arc::new(columns),
            rows: rows.into(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Advances to the next row; `None` once exhausted.
    pub fn next(&mut self) -> Option<Row> {
        self.rows
            .pop_front()
            .map(|values| Row::new(self.columns.clone(), values))
    }

    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

impl Iterator for Rows {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        Rows::next(self)
    }
}
