//! Error types for the symdex core library.

use serde::Serialize;

/// Top-level error enum for the symdex core library.
#[derive(Debug, thiserror::Error)]
pub enum SymdexError {
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Syntax error in {file}: {message}")]
    Syntax { file: String, message: String },

    #[error("{kind} '{name}' not found in project")]
    SymbolNotFound { kind: &'static str, name: String },

    #[error("Corrupt cache entry for {path}: {message}")]
    CacheCorrupt { path: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SymdexError {
    /// Stable tag carried by every structured error response.
    pub fn kind(&self) -> &'static str {
        match self {
            SymdexError::ProjectNotFound(_) => "project_not_found",
            SymdexError::Syntax { .. } => "syntax_error",
            SymdexError::SymbolNotFound { .. } => "symbol_not_found",
            SymdexError::CacheCorrupt { .. } => "cache_corrupt",
            SymdexError::Io(_) => "io_error",
            SymdexError::Sqlite(_) => "storage_error",
            SymdexError::Json(_) => "serialization_error",
        }
    }

    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// Serializable error body handed to the transport layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    pub kind: &'static str,
    pub message: String,
}

#[cfg(feature = "python")]
impl From<SymdexError> for pyo3::PyErr {
    fn from(err: SymdexError) -> pyo3::PyErr {
        use pyo3::exceptions::{
            PyFileNotFoundError, PyIOError, PyLookupError, PyRuntimeError, PyValueError,
        };

        let message = format!("[{}] {}", err.kind(), err);
        match &err {
            SymdexError::ProjectNotFound(_) => PyFileNotFoundError::new_err(message),
            SymdexError::SymbolNotFound { .. } => PyLookupError::new_err(message),
            SymdexError::Syntax { .. } | SymdexError::Json(_) => PyValueError::new_err(message),
            SymdexError::CacheCorrupt { .. } | SymdexError::Sqlite(_) => {
                PyRuntimeError::new_err(message)
            }
            SymdexError::Io(_) => PyIOError::new_err(message),
        }
    }
}

pub type SymdexResult<T> = Result<T, SymdexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_are_stable() {
        let not_found = SymdexError::SymbolNotFound {
            kind: "Class",
            name: "Missing".to_string(),
        };
        assert_eq!(not_found.kind(), "symbol_not_found");
        assert_eq!(not_found.to_string(), "Class 'Missing' not found in project");

        let project = SymdexError::ProjectNotFound("/nope".to_string());
        assert_eq!(project.kind(), "project_not_found");
    }

    #[test]
    fn payload_carries_kind_and_message() {
        let err = SymdexError::Syntax {
            file: "a.py".to_string(),
            message: "source is not valid UTF-8".to_string(),
        };
        let payload = err.to_payload();
        assert_eq!(payload.kind, "syntax_error");
        assert!(payload.message.contains("a.py"));

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "syntax_error");
    }
}
