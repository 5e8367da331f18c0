use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValuationErrorKind {
    Configuration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct ValuationError {
    pub kind: ValuationErrorKind,
    pub message: String,
}

impl ValuationError {
    pub fn new(kind: ValuationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_configuration(&self) -> bool {
        self.kind == ValuationErrorKind::Configuration
    }
}

pub fn configuration_error(message: impl Into<String>) -> ValuationError {
    ValuationError::new(ValuationErrorKind::Configuration, message)
}
