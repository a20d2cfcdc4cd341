#![deny(unsafe_code)]

use std::path::PathBuf;

use crate::rewrite::AnchorError;

#[derive(Debug, thiserror::Error)]
pub enum AnnotationError {
    #[error("annotation file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("malformed annotation file {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("annotation {id} has no usable file name: {file_name:?}")]
    InvalidFileName { id: u64, file_name: String },

    #[error("annotation {id} in {file}: {source}")]
    Reconciliation {
        id: u64,
        file: PathBuf,
        #[source]
        source: AnchorError,
    },

    #[error("{path}:{line}: {message}")]
    Extraction {
        path: PathBuf,
        line: usize,
        message: String,
    },
}

impl AnnotationError {
    /// Map an I/O failure, keeping "file absent" distinct from other errors.
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound { path }
        } else {
            Self::Io { path, source }
        }
    }

    /// Anchor failures are the only errors that signal directive drift.
    pub fn is_reconciliation(&self) -> bool {
        matches!(self, Self::Reconciliation { .. })
    }
}

pub type Result<T> = std::result::Result<T, AnnotationError>;
