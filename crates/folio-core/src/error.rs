use thiserror::Error;

/// Raised when a selector cannot be turned into a predicate.
///
/// Compilation validates the whole tree up front, so a compiled predicate never fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("unknown operator `{operator}` at {path}")]
    UnknownOperator { operator: String, path: String },

    #[error("unknown field `{field}` at {path}")]
    UnknownField { field: String, path: String },

    #[error("operator `{operator}` cannot be applied to field `{field}`")]
    UnsupportedOperator { operator: String, field: String },

    #[error("`{operator}` on field `{field}` expects {expected}, found {found}")]
    TypeMismatch {
        field: String,
        operator: String,
        expected: &'static str,
        found: String,
    },

    #[error("malformed selector at {path}: {reason}")]
    Malformed { path: String, reason: String },
}

pub type Result<T> = std::result::Result<T, CompileError>;
