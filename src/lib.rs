//! SkiffQL - BigQuery-flavored SQL on embedded SQLite.

pub use skiffql_common::{Error, Result};
pub use skiffql_core::{DataType, IntervalValue, StructField, Value};
pub use skiffql_executor::{CancelHandle, Param, Row, Rows, Session, SessionOptions};
pub use skiffql_functions::FUNC_PREFIX;
