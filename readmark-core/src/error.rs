use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by key/value backends.
///
/// Malformed slot content is never an error; the pool treats it as an empty
/// slot. Only the backend itself failing to read or write ends up here.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("failed to create state directory {path:?}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid storage key {0:?}: only ASCII letters, digits, '_' and '-' are allowed")]
    InvalidKey(String),

    #[error("failed to encode reading state: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StorageError {
    pub fn read(path: PathBuf, source: io::Error) -> Self {
        StorageError::Read { path, source }
    }

    pub fn write(path: PathBuf, source: io::Error) -> Self {
        StorageError::Write { path, source }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
