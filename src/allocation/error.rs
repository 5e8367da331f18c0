use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::valuation::ValuationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationErrorKind {
    InvalidRequest,
    MissingValuations,
    InvalidParameter,
    Valuation,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct AllocationError {
    pub kind: AllocationErrorKind,
    pub message: String,
}

impl AllocationError {
    pub fn new(kind: AllocationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<ValuationError> for AllocationError {
    fn from(err: ValuationError) -> Self {
        AllocationError::new(AllocationErrorKind::Valuation, err.message)
    }
}

pub fn invalid_request(message: impl Into<String>) -> AllocationError {
    AllocationError::new(AllocationErrorKind::InvalidRequest, message)
}

pub fn missing_valuations(message: impl Into<String>) -> AllocationError {
    AllocationError::new(AllocationErrorKind::MissingValuations, message)
}

pub fn invalid_parameter(message: impl Into<String>) -> AllocationError {
    AllocationError::new(AllocationErrorKind::InvalidParameter, message)
}

pub fn internal_error(message: impl Into<String>) -> AllocationError {
    AllocationError::new(AllocationErrorKind::Internal, message)
}
