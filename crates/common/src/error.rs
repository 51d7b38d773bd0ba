use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure the engine can surface. `Parse` and `Analyze` wrap the
/// external front end; the rest originate inside the value model, the
/// function runtime or the rewriter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Parse(String),
    Analyze(String),
    TypeMismatch { expected: String, actual: String },
    TypeCoercion(String),
    Overflow(String),
    DivisionByZero(String),
    InvalidArgument(String),
    UdfRuntime(String),
    UdfTimeout(String),
    UdfMemory(String),
    CatalogConflict(String),
    CatalogMissing(String),
    TransactionAborted(String),
    Canceled,
    Internal(String),
}

impl Error {
    pub fn parse(msg: impl Into<String>) -> Self {
        Error::Parse(msg.into())
    }

    pub fn analyze(msg: impl Into<String>) -> Self {
        Error::Analyze(msg.into())
    }

    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Error::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn type_coercion(msg: impl Into<String>) -> Self {
        Error::TypeCoercion(msg.into())
    }

    pub fn overflow(msg: impl Into<String>) -> Self {
        Error::Overflow(msg.into())
    }

    pub fn division_by_zero(context: impl Into<String>) -> Self {
        Error::DivisionByZero(context.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn udf_runtime(msg: impl Into<String>) -> Self {
        Error::UdfRuntime(msg.into())
    }

    pub fn catalog_conflict(msg: impl Into<String>) -> Self {
        Error::CatalogConflict(msg.into())
    }

    pub fn catalog_missing(msg: impl Into<String>) -> Self {
        Error::CatalogMissing(msg.into())
    }

    pub fn transaction_aborted(msg: impl Into<String>) -> Self {
        Error::TransactionAborted(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// True for the error kinds a `SAFE.`-prefixed call absorbs into NULL.
    pub fn is_safe_absorbable(&self) -> bool {
        matches!(
            self,
            Error::TypeMismatch { .. }
                | Error::TypeCoercion(_)
                | Error::Overflow(_)
                | Error::DivisionByZero(_)
                | Error::InvalidArgument(_)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Parse(msg) => write!(f, "parse error: {}", msg),
            Error::Analyze(msg) => write!(f, "analyze error: {}", msg),
            Error::TypeMismatch { expected, actual } => {
                write!(f, "type mismatch: expected {}, got {}", expected, actual)
            }
            Error::TypeCoercion(msg) => write!(f, "cannot coerce value: {}", msg),
            Error::Overflow(msg) => write!(f, "numeric overflow: {}", msg),
            Error::DivisionByZero(ctx) => write!(f, "{}: division by zero", ctx),
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            Error::UdfRuntime(msg) => write!(f, "user-defined function failed: {}", msg),
            Error::UdfTimeout(name) => write!(f, "{}: execution time limit exceeded", name),
            Error::UdfMemory(name) => write!(f, "{}: memory limit exceeded", name),
            Error::CatalogConflict(msg) => write!(f, "catalog conflict: {}", msg),
            Error::CatalogMissing(msg) => write!(f, "not found in catalog: {}", msg),
            Error::TransactionAborted(msg) => write!(f, "transaction aborted: {}", msg),
            Error::Canceled => write!(f, "operation canceled"),
            Error::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
