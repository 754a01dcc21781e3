//! Workflow error taxonomy
//!
//! Every failure surfaced by the engine maps to exactly one [`ErrorKind`].
//! Only storage failures are safe to retry verbatim; everything else needs
//! the caller to change its input or re-read current state first.

use miette::Diagnostic;
use std::fmt;
use thiserror::Error;

use crate::core::identity::{EntityId, IdParseError};
use crate::core::metadata::MetadataError;
use crate::core::sku::SkuError;
use crate::core::store::StoreError;
use crate::entities::request::{Action, RequestStatus};

/// Machine-readable reason a validator or precondition rejected an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCode {
    BinNotFound,
    BinInactive,
    BinFull,
    SkuMismatch,
    ItemMismatch,
    PreconditionFailed,
    ActiveRequestExists,
    QuantityMismatch,
}

impl FailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::BinNotFound => "BIN_NOT_FOUND",
            FailureCode::BinInactive => "BIN_INACTIVE",
            FailureCode::BinFull => "BIN_FULL",
            FailureCode::SkuMismatch => "SKU_MISMATCH",
            FailureCode::ItemMismatch => "ITEM_MISMATCH",
            FailureCode::PreconditionFailed => "PRECONDITION_FAILED",
            FailureCode::ActiveRequestExists => "ACTIVE_REQUEST_EXISTS",
            FailureCode::QuantityMismatch => "QUANTITY_MISMATCH",
        }
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse error classes surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    InvalidTransition,
    AlreadyProcessed,
    PreconditionFailed,
    Storage,
}

/// Errors that can occur during workflow operations
#[derive(Debug, Error, Diagnostic)]
pub enum WorkflowError {
    #[error("Validation failed: {message}")]
    #[diagnostic(code(loom::validation), help("fix the payload and resubmit"))]
    Validation { message: String },

    #[error("{entity} not found: {id}")]
    #[diagnostic(code(loom::not_found))]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid transition: cannot {action} request {request_id} in status {status}")]
    #[diagnostic(
        code(loom::invalid_transition),
        help("re-fetch the request to see its current state")
    )]
    InvalidTransition {
        request_id: EntityId,
        status: RequestStatus,
        action: Action,
    },

    #[error("Request {request_id} was already processed (status {status})")]
    #[diagnostic(
        code(loom::already_processed),
        help("re-fetch the request to see its current state")
    )]
    AlreadyProcessed {
        request_id: EntityId,
        status: RequestStatus,
    },

    #[error("{code}: {message}")]
    #[diagnostic(code(loom::precondition_failed))]
    PreconditionFailed { code: FailureCode, message: String },

    #[error("Storage error: {0}")]
    #[diagnostic(code(loom::storage), help("the operation was rolled back and may be retried"))]
    Storage(#[from] StoreError),
}

impl WorkflowError {
    pub fn validation(message: impl Into<String>) -> Self {
        WorkflowError::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        WorkflowError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn precondition(code: FailureCode, message: impl Into<String>) -> Self {
        WorkflowError::PreconditionFailed {
            code,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::Validation { .. } => ErrorKind::Validation,
            WorkflowError::NotFound { .. } => ErrorKind::NotFound,
            WorkflowError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            WorkflowError::AlreadyProcessed { .. } => ErrorKind::AlreadyProcessed,
            WorkflowError::PreconditionFailed { .. } => ErrorKind::PreconditionFailed,
            WorkflowError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Failure code for precondition errors
    pub fn failure_code(&self) -> Option<FailureCode> {
        match self {
            WorkflowError::PreconditionFailed { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether the identical call may simply be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkflowError::Storage(_))
    }
}

impl From<rusqlite::Error> for WorkflowError {
    fn from(e: rusqlite::Error) -> Self {
        WorkflowError::Storage(StoreError::from(e))
    }
}

impl From<MetadataError> for WorkflowError {
    fn from(e: MetadataError) -> Self {
        WorkflowError::validation(e.to_string())
    }
}

impl From<SkuError> for WorkflowError {
    fn from(e: SkuError) -> Self {
        WorkflowError::validation(e.to_string())
    }
}

impl From<IdParseError> for WorkflowError {
    fn from(e: IdParseError) -> Self {
        WorkflowError::validation(e.to_string())
    }
}
