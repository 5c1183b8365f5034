//! Membership application workflow for the OC, AC, AM and IC membership types.
//!
//! Members build a draft across several form steps, submit it for review, and resubmit after a
//! rejection. Admins approve, reject or resolve rejections directly. Every status change and
//! every message lands in an append-only conversation ledger, and one tax id or national id
//! may back at most one active application across all membership types.

pub mod cache;
pub mod config;
pub mod conversation;
pub mod domain;
pub mod drafts;
pub mod errors;
pub mod export;
pub mod gateway;
pub mod review;
pub mod router;
pub mod service;
pub mod state_machine;
pub mod store;
pub mod uniqueness;

#[cfg(test)]
mod tests;

pub use cache::TtlCache;
pub use config::WorkflowConfig;
pub use conversation::{ConversationLedger, ConversationPage, ConversationQuery};
pub use domain::{
    Actor, Application, ApplicationId, ApplicationKey, ApplicationStatus, AuthorType,
    ConversationEntry, Draft, DraftId, EntryId, FieldSnapshot, IdentifierKind, MembershipType,
    MessageType, Rejection, RejectionId, RejectionState, Role, SnapshotRecord, UniqueIdentifier,
    UserId,
};
pub use drafts::{DocumentUpload, DraftRegistry, DraftUpdate};
pub use errors::{ConflictReason, ValidationError, WorkflowError};
pub use export::{applications_csv, write_applications_csv, ExportError};
pub use gateway::{
    DocumentError, DocumentMetadata, DocumentStore, DocumentUrl, Notification, NotificationKind,
    Notifier, NotifyError,
};
pub use review::{AdminReviewService, ReviewSummary, SummaryRow};
pub use router::{error_response, membership_router, CurrentActor};
pub use service::{ApplicationHistory, MembershipService, Resubmission};
pub use state_machine::{
    transition, ResubmissionMode, Transition, WorkflowEngine, WorkflowEvent,
};
pub use store::{
    ApplicationFilter, InMemoryMembershipStore, MembershipStore, RepositoryError, RetryPolicy,
    RetryingStore, StoreFailure, StoreReader, UnitOfWork,
};
pub use uniqueness::{ActiveApplication, Availability, AvailabilityReason, UniquenessGuard};
