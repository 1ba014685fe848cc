//! Generator errors: validation, configuration, parse, and I/O failures.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenError {
    /// Annotation or tag combination invalid. Carries the already-formatted
    /// `<Type>.<Field>: <msg>` lines.
    #[error("VALIDATION_FAILED:\n{}", .0.join("\n"))]
    Validation(Vec<String>),

    #[error("INVALID_CONFIGURATION: {0}")]
    Config(String),

    #[error("IO_FAILURE: {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("VALIDATION_FAILED: {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

impl GenError {
    pub fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        GenError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}
