use thiserror::Error;

use crate::ObjectKind;
use crate::transport::ExecutionError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid identifier '{name}': {reason}")]
    InvalidIdentifier { name: String, reason: String },

    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("unknown object kind '{0}'")]
    UnknownObjectKind(String),

    #[error("{kind} '{name}' is not in the config")]
    BlueprintNotFound { kind: ObjectKind, name: String },

    #[error("unknown permission model '{0}'")]
    UnknownPermissionModel(String),

    #[error("permission model '{model}': {reason}")]
    PermissionModel { model: String, reason: String },

    #[error("sql formatting failed: {0}")]
    Format(#[from] wharf_sql::FormatError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// The warehouse cannot express this change as an ALTER.
    #[error("unsupported change: {0}")]
    Unsupported(String),

    #[error("unexpected introspection result: {0}")]
    Introspection(String),

    #[error("worker task failed: {0}")]
    Task(String),
}

impl Error {
    pub(crate) fn unsupported(reason: impl Into<String>) -> Self {
        Error::Unsupported(reason.into())
    }
}
