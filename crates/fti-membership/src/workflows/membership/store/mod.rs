//! Persistence seam for applications, drafts, rejections, history and the conversation ledger.
//!
//! All mutation happens through [`MembershipStore::transaction`], which hands the closure a
//! [`UnitOfWork`]. The transaction commits only when the closure returns `Ok`; any error or
//! panic discards every write made inside it.

mod memory;
mod retry;

pub use memory::InMemoryMembershipStore;
pub use retry::{RetryPolicy, RetryingStore};

use serde::Deserialize;

use super::domain::{
    Application, ApplicationId, ApplicationKey, ApplicationStatus, ConversationEntry, Draft,
    DraftId, MembershipType, NewConversationEntry, NewDraft, NewRejection, Rejection, RejectionId,
    SnapshotRecord, UniqueIdentifier, UserId,
};

/// Error enumeration for storage failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("another active application already holds this identifier")]
    Conflict,
    #[error("another user already holds a draft for this identifier")]
    DraftConflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Lets the retry layer tell transient storage failures apart from final answers.
pub trait StoreFailure {
    fn is_transient(&self) -> bool;
}

impl StoreFailure for RepositoryError {
    fn is_transient(&self) -> bool {
        matches!(self, RepositoryError::Unavailable(_))
    }
}

/// Review-queue style query over applications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ApplicationFilter {
    #[serde(default)]
    pub membership_type: Option<MembershipType>,
    #[serde(default)]
    pub status: Option<ApplicationStatus>,
    #[serde(default)]
    pub owner: Option<UserId>,
    #[serde(default)]
    pub include_archived: bool,
}

impl ApplicationFilter {
    pub fn matches(&self, application: &Application) -> bool {
        self.membership_type
            .map_or(true, |kind| application.membership_type == kind)
            && self
                .status
                .map_or(true, |status| application.status == status)
            && self
                .owner
                .as_ref()
                .map_or(true, |owner| &application.owner_user_id == owner)
            && (self.include_archived || !application.is_archived)
    }
}

pub trait StoreReader {
    fn application(&self, key: ApplicationKey) -> Result<Option<Application>, RepositoryError>;

    /// Every application for the identifier, across all membership types.
    fn applications_for_identifier(
        &self,
        identifier: &UniqueIdentifier,
    ) -> Result<Vec<Application>, RepositoryError>;

    fn applications(&self, filter: &ApplicationFilter)
        -> Result<Vec<Application>, RepositoryError>;

    fn draft(&self, id: DraftId) -> Result<Option<Draft>, RepositoryError>;

    /// Unconsumed drafts holding the identifier.
    fn drafts_for_identifier(
        &self,
        identifier: &UniqueIdentifier,
    ) -> Result<Vec<Draft>, RepositoryError>;

    /// Unconsumed drafts owned by the user.
    fn drafts_for_owner(&self, owner: &UserId) -> Result<Vec<Draft>, RepositoryError>;

    fn rejection(&self, id: RejectionId) -> Result<Option<Rejection>, RepositoryError>;

    fn open_rejection(&self, key: ApplicationKey) -> Result<Option<Rejection>, RepositoryError>;

    /// Entries for one application in write order.
    fn conversation(&self, key: ApplicationKey) -> Result<Vec<ConversationEntry>, RepositoryError>;

    fn snapshots(&self, key: ApplicationKey) -> Result<Vec<SnapshotRecord>, RepositoryError>;
}

/// Writes available inside a transaction. Conversation entries can only be appended.
pub trait UnitOfWork: StoreReader {
    fn reader(&self) -> &dyn StoreReader;

    fn next_application_id(
        &mut self,
        membership_type: MembershipType,
    ) -> Result<ApplicationId, RepositoryError>;

    fn insert_application(&mut self, application: Application) -> Result<(), RepositoryError>;

    fn update_application(&mut self, application: Application) -> Result<(), RepositoryError>;

    fn insert_draft(&mut self, draft: NewDraft) -> Result<Draft, RepositoryError>;

    fn update_draft(&mut self, draft: Draft) -> Result<(), RepositoryError>;

    fn remove_draft(&mut self, id: DraftId) -> Result<Draft, RepositoryError>;

    fn append_entry(
        &mut self,
        entry: NewConversationEntry,
    ) -> Result<ConversationEntry, RepositoryError>;

    fn insert_rejection(&mut self, rejection: NewRejection) -> Result<Rejection, RepositoryError>;

    fn update_rejection(&mut self, rejection: Rejection) -> Result<(), RepositoryError>;

    fn record_snapshot(&mut self, record: SnapshotRecord) -> Result<(), RepositoryError>;
}

/// Storage abstraction so the workflow components can be exercised in isolation.
pub trait MembershipStore: Send + Sync {
    fn read<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnMut(&dyn StoreReader) -> Result<T, E>,
        E: From<RepositoryError> + StoreFailure;

    fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnMut(&mut dyn UnitOfWork) -> Result<T, E>,
        E: From<RepositoryError> + StoreFailure;
}
