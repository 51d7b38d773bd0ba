//! Shared error taxonomy for the SkiffQL engine.

pub mod error;

pub use error::{Error, Result};
