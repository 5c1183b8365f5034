use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use super::{
    ApplicationFilter, MembershipStore, RepositoryError, StoreFailure, StoreReader, UnitOfWork,
};
use crate::workflows::membership::domain::{
    Application, ApplicationId, ApplicationKey, ConversationEntry, Draft, DraftId, EntryId,
    MembershipType, NewConversationEntry, NewDraft, NewRejection, Rejection, RejectionId,
    RejectionState, SnapshotRecord, UniqueIdentifier, UserId,
};

/// Mutex-backed store. Transactions run against a staged copy of the state while holding the
/// lock, so they are serialisable, and the copy replaces the live state only on success.
#[derive(Debug, Default)]
pub struct InMemoryMembershipStore {
    state: Mutex<StoreState>,
}

impl InMemoryMembershipStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Default)]
struct StoreState {
    applications: BTreeMap<ApplicationKey, Application>,
    application_sequences: BTreeMap<MembershipType, u64>,
    drafts: BTreeMap<DraftId, Draft>,
    draft_sequence: u64,
    entries: Vec<ConversationEntry>,
    rejections: BTreeMap<RejectionId, Rejection>,
    rejection_sequence: u64,
    snapshots: Vec<SnapshotRecord>,
}

impl StoreState {
    fn ensure_identifier_free(&self, application: &Application) -> Result<(), RepositoryError> {
        if !application.is_active() {
            return Ok(());
        }

        let key = application.key();
        let clash = self.applications.values().any(|existing| {
            existing.key() != key
                && existing.membership_type == application.membership_type
                && existing.unique_identifier == application.unique_identifier
                && existing.is_active()
        });

        if clash {
            Err(RepositoryError::Conflict)
        } else {
            Ok(())
        }
    }
}

impl StoreReader for StoreState {
    fn application(&self, key: ApplicationKey) -> Result<Option<Application>, RepositoryError> {
        Ok(self.applications.get(&key).cloned())
    }

    fn applications_for_identifier(
        &self,
        identifier: &UniqueIdentifier,
    ) -> Result<Vec<Application>, RepositoryError> {
        Ok(self
            .applications
            .values()
            .filter(|application| &application.unique_identifier == identifier)
            .cloned()
            .collect())
    }

    fn applications(
        &self,
        filter: &ApplicationFilter,
    ) -> Result<Vec<Application>, RepositoryError> {
        Ok(self
            .applications
            .values()
            .filter(|application| filter.matches(application))
            .cloned()
            .collect())
    }

    fn draft(&self, id: DraftId) -> Result<Option<Draft>, RepositoryError> {
        Ok(self.drafts.get(&id).cloned())
    }

    fn drafts_for_identifier(
        &self,
        identifier: &UniqueIdentifier,
    ) -> Result<Vec<Draft>, RepositoryError> {
        Ok(self
            .drafts
            .values()
            .filter(|draft| draft.is_live() && &draft.unique_identifier == identifier)
            .cloned()
            .collect())
    }

    fn drafts_for_owner(&self, owner: &UserId) -> Result<Vec<Draft>, RepositoryError> {
        Ok(self
            .drafts
            .values()
            .filter(|draft| draft.is_live() && &draft.owner_user_id == owner)
            .cloned()
            .collect())
    }

    fn rejection(&self, id: RejectionId) -> Result<Option<Rejection>, RepositoryError> {
        Ok(self.rejections.get(&id).cloned())
    }

    fn open_rejection(&self, key: ApplicationKey) -> Result<Option<Rejection>, RepositoryError> {
        Ok(self
            .rejections
            .values()
            .rev()
            .find(|rejection| rejection.application == key && rejection.state == RejectionState::Open)
            .cloned())
    }

    fn conversation(&self, key: ApplicationKey) -> Result<Vec<ConversationEntry>, RepositoryError> {
        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.application_key() == key)
            .cloned()
            .collect())
    }

    fn snapshots(&self, key: ApplicationKey) -> Result<Vec<SnapshotRecord>, RepositoryError> {
        Ok(self
            .snapshots
            .iter()
            .filter(|record| record.application == key)
            .cloned()
            .collect())
    }
}

impl UnitOfWork for StoreState {
    fn reader(&self) -> &dyn StoreReader {
        self
    }

    fn next_application_id(
        &mut self,
        membership_type: MembershipType,
    ) -> Result<ApplicationId, RepositoryError> {
        let sequence = self.application_sequences.entry(membership_type).or_insert(0);
        *sequence += 1;
        Ok(ApplicationId(*sequence))
    }

    fn insert_application(&mut self, application: Application) -> Result<(), RepositoryError> {
        let key = application.key();
        if self.applications.contains_key(&key) {
            return Err(RepositoryError::Conflict);
        }
        self.ensure_identifier_free(&application)?;
        self.applications.insert(key, application);
        Ok(())
    }

    fn update_application(&mut self, application: Application) -> Result<(), RepositoryError> {
        let key = application.key();
        if !self.applications.contains_key(&key) {
            return Err(RepositoryError::NotFound);
        }
        self.ensure_identifier_free(&application)?;
        self.applications.insert(key, application);
        Ok(())
    }

    fn insert_draft(&mut self, draft: NewDraft) -> Result<Draft, RepositoryError> {
        let taken = self.drafts.values().any(|existing| {
            existing.is_live()
                && existing.unique_identifier == draft.unique_identifier
                && existing.owner_user_id != draft.owner_user_id
        });
        if taken {
            return Err(RepositoryError::DraftConflict);
        }

        self.draft_sequence += 1;
        let stored = Draft {
            id: DraftId(self.draft_sequence),
            owner_user_id: draft.owner_user_id,
            membership_type: draft.membership_type,
            unique_identifier: draft.unique_identifier,
            field_snapshot: draft.field_snapshot,
            current_step: draft.current_step,
            created_at: draft.created_at,
            updated_at: draft.created_at,
            consumed_by: None,
        };
        self.drafts.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn update_draft(&mut self, draft: Draft) -> Result<(), RepositoryError> {
        match self.drafts.get_mut(&draft.id) {
            Some(existing) => {
                *existing = draft;
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn remove_draft(&mut self, id: DraftId) -> Result<Draft, RepositoryError> {
        self.drafts.remove(&id).ok_or(RepositoryError::NotFound)
    }

    fn append_entry(
        &mut self,
        entry: NewConversationEntry,
    ) -> Result<ConversationEntry, RepositoryError> {
        let sequence = self.entries.len() as u64 + 1;
        let stored = ConversationEntry {
            id: EntryId(sequence),
            membership_type: entry.application.membership_type,
            membership_id: entry.application.id,
            message_type: entry.message_type,
            author_type: entry.author_type,
            author_id: entry.author_id,
            author_name: entry.author_name,
            message: entry.message,
            status_before: entry.status_before,
            status_after: entry.status_after,
            is_internal: entry.is_internal,
            created_at: entry.created_at,
            sequence,
        };
        self.entries.push(stored.clone());
        Ok(stored)
    }

    fn insert_rejection(&mut self, rejection: NewRejection) -> Result<Rejection, RepositoryError> {
        self.rejection_sequence += 1;
        let stored = Rejection {
            id: RejectionId(self.rejection_sequence),
            application: rejection.application,
            reason: rejection.reason,
            rejected_by: rejection.rejected_by,
            rejected_at: rejection.rejected_at,
            state: RejectionState::Open,
            resolved_at: None,
            resolution_note: None,
            resubmitted_as: None,
        };
        self.rejections.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn update_rejection(&mut self, rejection: Rejection) -> Result<(), RepositoryError> {
        match self.rejections.get_mut(&rejection.id) {
            Some(existing) => {
                *existing = rejection;
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn record_snapshot(&mut self, record: SnapshotRecord) -> Result<(), RepositoryError> {
        self.snapshots.push(record);
        Ok(())
    }
}

impl MembershipStore for InMemoryMembershipStore {
    fn read<T, E, F>(&self, mut work: F) -> Result<T, E>
    where
        F: FnMut(&dyn StoreReader) -> Result<T, E>,
        E: From<RepositoryError> + StoreFailure,
    {
        // Live state is only ever replaced wholesale, so a poisoned lock still guards a
        // consistent value.
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let reader: &dyn StoreReader = &*state;
        work(reader)
    }

    fn transaction<T, E, F>(&self, mut work: F) -> Result<T, E>
    where
        F: FnMut(&mut dyn UnitOfWork) -> Result<T, E>,
        E: From<RepositoryError> + StoreFailure,
    {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut staged = state.clone();
        let uow: &mut dyn UnitOfWork = &mut staged;
        let result = work(uow)?;
        *state = staged;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::membership::domain::{ApplicationStatus, FieldSnapshot};
    use chrono::Utc;

    fn application(
        store: &InMemoryMembershipStore,
        owner: &str,
        status: ApplicationStatus,
    ) -> Result<Application, RepositoryError> {
        store.transaction(|uow| {
            let id = uow.next_application_id(MembershipType::Oc)?;
            let now = Utc::now();
            let application = Application {
                id,
                membership_type: MembershipType::Oc,
                owner_user_id: UserId(owner.to_string()),
                unique_identifier: UniqueIdentifier::parse("1234567890123")
                    .expect("valid identifier"),
                status,
                version: 1,
                parent_id: None,
                is_archived: false,
                field_snapshot: FieldSnapshot::default(),
                rejection_reason: None,
                resubmission_count: 0,
                created_at: now,
                updated_at: now,
                rejected_at: None,
                resolved_at: None,
                resubmitted_at: None,
            };
            uow.insert_application(application.clone())?;
            Ok(application)
        })
    }

    #[test]
    fn failed_transactions_leave_no_trace() {
        let store = InMemoryMembershipStore::new();
        let result: Result<(), RepositoryError> = store.transaction(|uow| {
            let id = uow.next_application_id(MembershipType::Ac)?;
            assert_eq!(id, ApplicationId(1));
            Err(RepositoryError::Unavailable("simulated".to_string()))
        });
        assert!(result.is_err());

        let next: ApplicationId = store
            .transaction(|uow| uow.next_application_id(MembershipType::Ac))
            .expect("sequence allocates");
        assert_eq!(next, ApplicationId(1), "rolled back sequence is reused");
    }

    #[test]
    fn active_identifier_backstop_rejects_second_active_row() {
        let store = InMemoryMembershipStore::new();
        application(&store, "u-1", ApplicationStatus::Pending).expect("first insert");

        match application(&store, "u-2", ApplicationStatus::Pending) {
            Err(RepositoryError::Conflict) => {}
            other => panic!("expected conflict, got {other:?}"),
        }

        application(&store, "u-2", ApplicationStatus::Rejected)
            .expect("inactive rows do not hold the identifier");
    }
}
