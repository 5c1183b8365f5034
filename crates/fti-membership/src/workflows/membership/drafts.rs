use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info};

use super::domain::{
    Actor, Draft, DraftId, FieldSnapshot, MembershipType, NewDraft, UniqueIdentifier,
};
use super::errors::{ConflictReason, ValidationError, WorkflowError};
use super::gateway::{DocumentMetadata, DocumentStore};
use super::state_machine::{Transition, WorkflowEngine};
use super::store::{MembershipStore, StoreReader};
use super::uniqueness::{AvailabilityReason, UniquenessGuard};

const FIRST_STEP: u8 = 1;

/// Attachments accepted for membership paperwork.
const ACCEPTED_DOCUMENT_TYPES: [mime::Mime; 3] =
    [mime::APPLICATION_PDF, mime::IMAGE_JPEG, mime::IMAGE_PNG];

/// Incoming multi-step form state for `save_draft`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DraftUpdate {
    pub field_snapshot: FieldSnapshot,
    #[serde(default)]
    pub current_step: Option<u8>,
}

/// Raw attachment handed to the registry before it reaches the document store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentUpload {
    pub field: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Per-user drafts, at most one live draft per (owner, membership type, identifier).
pub struct DraftRegistry<S, D> {
    store: Arc<S>,
    documents: Arc<D>,
    guard: UniquenessGuard,
    engine: WorkflowEngine,
}

impl<S, D> DraftRegistry<S, D>
where
    S: MembershipStore + 'static,
    D: DocumentStore + 'static,
{
    pub fn new(store: Arc<S>, documents: Arc<D>, engine: WorkflowEngine) -> Self {
        Self {
            store,
            documents,
            guard: UniquenessGuard::new(),
            engine,
        }
    }

    /// Start a draft for the identifier, or hand back the caller's existing draft of that type
    /// with the new fields merged in. The guard check and the write share one transaction.
    pub fn create_or_resume_draft(
        &self,
        actor: &Actor,
        membership_type: MembershipType,
        raw_identifier: &str,
        fields: FieldSnapshot,
    ) -> Result<Draft, WorkflowError> {
        let identifier = UniqueIdentifier::parse(raw_identifier)?;

        let draft = self.store.transaction(|uow| {
            let availability = self.guard.check_identifier(
                uow.reader(),
                membership_type,
                &identifier,
                &actor.user_id,
            )?;
            if let Some(conflict) = availability.conflict() {
                return Err(conflict);
            }

            let now = Utc::now();
            let resumable = match (availability.reason, availability.draft_id) {
                (AvailabilityReason::DraftOwnedBySelf, Some(draft_id)) => uow
                    .draft(draft_id)?
                    .filter(|draft| draft.membership_type == membership_type),
                _ => None,
            };
            match resumable {
                Some(mut draft) => {
                    for (field, value) in fields.fields() {
                        draft.field_snapshot.insert(field.clone(), value.clone());
                    }
                    draft.updated_at = now;
                    uow.update_draft(draft.clone())?;
                    debug!(draft = %draft.id, "resumed existing draft");
                    Ok(draft)
                }
                None => Ok(uow.insert_draft(NewDraft {
                    owner_user_id: actor.user_id.clone(),
                    membership_type,
                    unique_identifier: identifier.clone(),
                    field_snapshot: fields.clone(),
                    current_step: FIRST_STEP,
                    created_at: now,
                })?),
            }
        })?;

        info!(
            draft = %draft.id,
            owner = %draft.owner_user_id,
            membership_type = %draft.membership_type,
            "draft saved"
        );
        Ok(draft)
    }

    /// Replace the form fields of a live draft. Attachments already uploaded are kept.
    pub fn save_draft(
        &self,
        actor: &Actor,
        draft_id: DraftId,
        update: DraftUpdate,
    ) -> Result<Draft, WorkflowError> {
        self.store.transaction(|uow| {
            let mut draft = owned_live_draft(uow.reader(), actor, draft_id)?;
            let mut fields = update.field_snapshot.clone();
            fields.inherit_documents(&draft.field_snapshot);

            draft.field_snapshot = fields;
            if let Some(step) = update.current_step {
                draft.current_step = step.max(FIRST_STEP);
            }
            draft.updated_at = Utc::now();
            uow.update_draft(draft.clone())?;
            Ok(draft)
        })
    }

    pub fn delete_draft(&self, actor: &Actor, draft_id: DraftId) -> Result<(), WorkflowError> {
        self.store.transaction(|uow| {
            let draft = uow.draft(draft_id)?.ok_or(WorkflowError::NotFound)?;
            if draft.owner_user_id != actor.user_id {
                return Err(WorkflowError::Forbidden);
            }
            uow.remove_draft(draft_id)?;
            Ok(())
        })?;

        info!(draft = %draft_id, owner = %actor.user_id, "draft deleted");
        Ok(())
    }

    /// Drafts owned by someone else read as missing.
    pub fn draft(&self, actor: &Actor, draft_id: DraftId) -> Result<Draft, WorkflowError> {
        self.store.read(|reader: &dyn StoreReader| {
            let draft = reader.draft(draft_id)?.ok_or(WorkflowError::NotFound)?;
            if actor.can_access(&draft.owner_user_id) {
                Ok(draft)
            } else {
                Err(WorkflowError::NotFound)
            }
        })
    }

    /// The caller's live drafts, most recently edited first.
    pub fn list_drafts(&self, actor: &Actor) -> Result<Vec<Draft>, WorkflowError> {
        let mut drafts = self.store.read(|reader: &dyn StoreReader| {
            Ok::<_, WorkflowError>(reader.drafts_for_owner(&actor.user_id)?)
        })?;
        drafts.sort_by(|left, right| right.updated_at.cmp(&left.updated_at));
        Ok(drafts)
    }

    /// Submit the draft. A second promotion of the same draft is a duplicate submission.
    pub fn promote_draft_to_application(
        &self,
        actor: &Actor,
        draft_id: DraftId,
    ) -> Result<Transition, WorkflowError> {
        self.store.transaction(|uow| {
            let draft = uow.draft(draft_id)?.ok_or(WorkflowError::NotFound)?;
            if draft.owner_user_id != actor.user_id {
                return Err(WorkflowError::NotFound);
            }
            self.engine.submit_draft(uow, &draft, Utc::now())
        })
    }

    /// Upload an attachment and record its URL on the draft. The upload happens before the
    /// transaction opens, so storage latency never holds the store.
    pub fn attach_document(
        &self,
        actor: &Actor,
        draft_id: DraftId,
        upload: DocumentUpload,
    ) -> Result<Draft, WorkflowError> {
        let field = upload.field.trim().to_string();
        if field.is_empty() {
            return Err(ValidationError::EmptyDocumentField.into());
        }
        let content_type = accepted_content_type(upload.content_type.as_deref())?;

        self.store
            .read(|reader: &dyn StoreReader| owned_live_draft(reader, actor, draft_id).map(drop))?;

        let url = self.documents.upload(
            &upload.bytes,
            DocumentMetadata {
                owner_user_id: actor.user_id.clone(),
                field: field.clone(),
                file_name: upload.file_name.clone(),
                content_type: content_type.to_string(),
            },
        )?;

        let draft = self.store.transaction(|uow| {
            let mut draft = owned_live_draft(uow.reader(), actor, draft_id)?;
            draft.field_snapshot.set_document(&field, &url.0);
            draft.updated_at = Utc::now();
            uow.update_draft(draft.clone())?;
            Ok::<_, WorkflowError>(draft)
        })?;

        info!(draft = %draft_id, field = %field, "document attached");
        Ok(draft)
    }
}

fn owned_live_draft(
    reader: &dyn StoreReader,
    actor: &Actor,
    draft_id: DraftId,
) -> Result<Draft, WorkflowError> {
    let draft = reader.draft(draft_id)?.ok_or(WorkflowError::NotFound)?;
    if draft.owner_user_id != actor.user_id {
        return Err(WorkflowError::NotFound);
    }
    if !draft.is_live() {
        return Err(WorkflowError::Conflict(ConflictReason::DuplicateSubmission));
    }
    Ok(draft)
}

/// Missing content types are treated as PDF, the form's default upload.
fn accepted_content_type(raw: Option<&str>) -> Result<mime::Mime, ValidationError> {
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(mime::APPLICATION_PDF);
    };
    let parsed: mime::Mime = raw
        .parse()
        .map_err(|_| ValidationError::UnsupportedDocumentType(raw.to_string()))?;

    ACCEPTED_DOCUMENT_TYPES
        .iter()
        .find(|accepted| accepted.essence_str() == parsed.essence_str())
        .cloned()
        .ok_or_else(|| ValidationError::UnsupportedDocumentType(raw.to_string()))
}
