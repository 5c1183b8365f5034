use serde::Serialize;

use super::domain::ApplicationStatus;
use super::gateway::DocumentError;
use super::state_machine::WorkflowEvent;
use super::store::{RepositoryError, StoreFailure};

/// Caller input that can be fixed and resent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("unique identifier must be exactly 13 digits")]
    InvalidFormat,
    #[error("unknown membership type '{0}'")]
    UnknownMembershipType(String),
    #[error("unknown application status '{0}'")]
    UnknownStatus(String),
    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),
    #[error("field snapshot must be a JSON object")]
    InvalidSnapshot,
    #[error("rejection reason must not be empty")]
    EmptyReason,
    #[error("message must not be empty")]
    EmptyMessage,
    #[error("document field name must not be empty")]
    EmptyDocumentField,
    #[error("unsupported document type '{0}' (PDF, JPEG or PNG expected)")]
    UnsupportedDocumentType(String),
}

impl ValidationError {
    pub const fn code(&self) -> &'static str {
        match self {
            ValidationError::InvalidFormat => "invalid_format",
            ValidationError::UnknownMembershipType(_) => "unknown_membership_type",
            ValidationError::UnknownStatus(_) => "unknown_status",
            ValidationError::MissingFields(_) => "missing_field",
            ValidationError::InvalidSnapshot => "invalid_snapshot",
            ValidationError::EmptyReason => "empty_reason",
            ValidationError::EmptyMessage => "empty_message",
            ValidationError::EmptyDocumentField => "empty_document_field",
            ValidationError::UnsupportedDocumentType(_) => "unsupported_document_type",
        }
    }
}

/// Reason codes surfaced to users when an action collides with existing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    ActiveApplicationExists,
    DraftOwnedByOther,
    DuplicateSubmission,
}

impl ConflictReason {
    pub const fn code(self) -> &'static str {
        match self {
            ConflictReason::ActiveApplicationExists => "active_application_exists",
            ConflictReason::DraftOwnedByOther => "draft_owned_by_other",
            ConflictReason::DuplicateSubmission => "duplicate_submission",
        }
    }
}

/// Error taxonomy shared by the draft registry, state machine and review façade.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("conflict: {}", .0.code())]
    Conflict(ConflictReason),
    #[error("cannot {event} an application that is {from}")]
    InvalidTransition {
        from: ApplicationStatus,
        event: WorkflowEvent,
    },
    #[error("not found")]
    NotFound,
    #[error("forbidden")]
    Forbidden,
    #[error("dependency failure: {0}")]
    Dependency(RepositoryError),
    #[error(transparent)]
    Document(#[from] DocumentError),
}

impl From<RepositoryError> for WorkflowError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Conflict => {
                WorkflowError::Conflict(ConflictReason::ActiveApplicationExists)
            }
            RepositoryError::DraftConflict => {
                WorkflowError::Conflict(ConflictReason::DraftOwnedByOther)
            }
            RepositoryError::NotFound => WorkflowError::NotFound,
            other => WorkflowError::Dependency(other),
        }
    }
}

impl StoreFailure for WorkflowError {
    fn is_transient(&self) -> bool {
        matches!(self, WorkflowError::Dependency(inner) if inner.is_transient())
    }
}
