use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreErrorKind {
    NotFound,
    Io,
    Serialization,
    VersionMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == StoreErrorKind::NotFound
    }
}

pub fn not_found(message: impl Into<String>) -> StoreError {
    StoreError::new(StoreErrorKind::NotFound, message)
}

pub fn io_error(message: impl Into<String>) -> StoreError {
    StoreError::new(StoreErrorKind::Io, message)
}

pub fn serialization_error(message: impl Into<String>) -> StoreError {
    StoreError::new(StoreErrorKind::Serialization, message)
}

pub fn version_mismatch(message: impl Into<String>) -> StoreError {
    StoreError::new(StoreErrorKind::VersionMismatch, message)
}
