use serde_json::{json, Value};

use super::domain::RequestStatus;
use super::store::RepositoryError;

/// Failures surfaced by workflow operations. None of them leave partial writes behind.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("cannot {action} a request in status {current}")]
    InvalidState {
        action: &'static str,
        current: RequestStatus,
    },
    #[error("response token is invalid")]
    InvalidToken,
    #[error("response form link has expired")]
    Expired,
    #[error("allocation for this request is complete; the form no longer accepts submissions")]
    Completed,
    #[error("{field}: {issue}")]
    Validation { field: String, issue: String },
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl WorkflowError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn validation(field: impl Into<String>, issue: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            issue: issue.into(),
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            WorkflowError::NotFound { .. } => "NOT_FOUND",
            WorkflowError::InvalidState { .. } => "INVALID_STATE",
            WorkflowError::InvalidToken => "INVALID_TOKEN",
            WorkflowError::Expired => "EXPIRED",
            WorkflowError::Completed => "FORM_COMPLETED",
            WorkflowError::Validation { .. } => "VALIDATION_ERROR",
            WorkflowError::Forbidden(_) => "FORBIDDEN",
            WorkflowError::Repository(_) => "REPOSITORY_UNAVAILABLE",
        }
    }

    /// Structured context for clients rendering a precise message.
    pub fn details(&self) -> Value {
        match self {
            WorkflowError::NotFound { entity, id } => json!({ "entity": entity, "id": id }),
            WorkflowError::InvalidState { current, .. } => {
                json!({ "current_status": current.label() })
            }
            WorkflowError::Validation { field, issue } => {
                json!([{ "field": field, "issue": issue }])
            }
            _ => Value::Null,
        }
    }
}
