use thiserror::Error;

use crate::resource::{ObjectKey, ResourceKind};
use crate::store::StoreError;

/// Classification every reconciliation failure carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The referenced object does not exist.
    NotFound,
    /// A write was rejected because the object changed since it was read.
    Conflict,
    /// The patch is malformed and cannot succeed until it is edited.
    Validation,
    /// Any other store failure.
    Transport,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::NotFound => write!(f, "not-found"),
            ErrorKind::Conflict => write!(f, "conflict"),
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::Transport => write!(f, "transport"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("{kind} '{key}' not found")]
    NotFound { kind: ResourceKind, key: ObjectKey },

    #[error("Invalid RoutePatch '{patch}': {message}")]
    Validation { patch: ObjectKey, message: String },

    #[error("Write to {kind} '{key}' rejected: object was modified concurrently")]
    Conflict { kind: ResourceKind, key: ObjectKey },

    #[error("Store operation failed: {0}")]
    Transport(#[source] StoreError),

    #[error("RoutePatch '{patch}': {source}")]
    InPatch {
        patch: ObjectKey,
        #[source]
        source: Box<ReconcileError>,
    },
}

impl ReconcileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReconcileError::NotFound { .. } => ErrorKind::NotFound,
            ReconcileError::Validation { .. } => ErrorKind::Validation,
            ReconcileError::Conflict { .. } => ErrorKind::Conflict,
            ReconcileError::Transport(_) => ErrorKind::Transport,
            ReconcileError::InPatch { source, .. } => source.kind(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Returns true if re-running the reconciliation from a fresh read can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Conflict | ErrorKind::Transport)
    }

    /// Annotates the error with the patch being reconciled.
    pub fn in_patch(self, patch: &ObjectKey) -> Self {
        match self {
            ReconcileError::InPatch { .. } => self,
            other => ReconcileError::InPatch {
                patch: patch.clone(),
                source: Box::new(other),
            },
        }
    }
}

impl From<StoreError> for ReconcileError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, key } => ReconcileError::NotFound { kind, key },
            StoreError::Conflict { kind, key, .. } => ReconcileError::Conflict { kind, key },
            other => ReconcileError::Transport(other),
        }
    }
}

/// Errors raised while reading engine configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {name}: {reason}")]
    InvalidValue {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
