//! Core value model for SkiffQL: the tagged `Value` union that carries
//! BigQuery semantics through SQLite's four cell kinds, fixed-point
//! NUMERIC/BIGNUMERIC arithmetic, civil date/time part math and the
//! stable cell encoding.

pub mod datetime;
pub mod encode;
pub mod numeric;
pub mod value;

pub use encode::{Cell, decode_cell, encode_cell};
pub use numeric::{DecimalKind, FixedDecimal};
pub use value::{DataType, IntervalValue, StructField, Value};
