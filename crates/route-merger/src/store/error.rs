//! Resource store error types.

use std::path::PathBuf;
use thiserror::Error;

use crate::error::ErrorKind;
use crate::resource::{ObjectKey, ResourceKind};

/// Errors that can occur while reading or writing resources.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{kind} '{key}' not found")]
    NotFound { kind: ResourceKind, key: ObjectKey },

    #[error("{kind} '{key}' was modified concurrently (expected resourceVersion '{expected}', found '{actual}')")]
    Conflict {
        kind: ResourceKind,
        key: ObjectKey,
        expected: String,
        actual: String,
    },

    #[error("Failed to read store directory '{path}': {source}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML in '{path}': {message}")]
    ParseYaml { path: PathBuf, message: String },

    #[error("Failed to serialize YAML: {0}")]
    SerializeYaml(String),

    #[error("Invalid resource in '{path}': {message}")]
    InvalidResource { path: PathBuf, message: String },

    #[error("Resource already exists: {kind} '{key}'")]
    AlreadyExists { kind: ResourceKind, key: ObjectKey },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("File watch error: {0}")]
    Watch(String),
}

impl From<serde_yaml::Error> for StoreError {
    fn from(err: serde_yaml::Error) -> Self {
        StoreError::SerializeYaml(err.to_string())
    }
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::Conflict { .. } => ErrorKind::Conflict,
            _ => ErrorKind::Transport,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
