use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::cache::TtlCache;
use super::config::WorkflowConfig;
use super::conversation::{ConversationLedger, ConversationPage, ConversationQuery};
use super::domain::{
    Actor, Application, ApplicationKey, ConversationEntry, Draft, DraftId, FieldSnapshot,
    MembershipType, RejectionId, SnapshotRecord, UniqueIdentifier,
};
use super::drafts::{DocumentUpload, DraftRegistry, DraftUpdate};
use super::errors::WorkflowError;
use super::gateway::{DocumentStore, Notification, NotificationKind, Notifier};
use super::review::{notify_best_effort, AdminReviewService, ReviewSummary};
use super::state_machine::{Transition, WorkflowEngine};
use super::store::{ApplicationFilter, MembershipStore, StoreReader};
use super::uniqueness::{Availability, UniquenessGuard};

/// Member resubmission payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Resubmission {
    #[serde(alias = "fields")]
    pub field_snapshot: FieldSnapshot,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Every recorded version of an application, following the parent chain, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplicationHistory {
    pub application: Application,
    pub versions: Vec<SnapshotRecord>,
}

/// Service composing the uniqueness guard, draft registry, state machine, conversation ledger
/// and admin review façade over one store.
pub struct MembershipService<S, N, D> {
    store: Arc<S>,
    notifier: Arc<N>,
    guard: UniquenessGuard,
    engine: WorkflowEngine,
    drafts: DraftRegistry<S, D>,
    ledger: ConversationLedger<S>,
    review: AdminReviewService<S, N>,
}

impl<S, N, D> MembershipService<S, N, D>
where
    S: MembershipStore + 'static,
    N: Notifier + 'static,
    D: DocumentStore + 'static,
{
    pub fn new(store: Arc<S>, notifier: Arc<N>, documents: Arc<D>, config: &WorkflowConfig) -> Self {
        let engine = WorkflowEngine::new(config.resubmission_mode);
        let summary = Arc::new(TtlCache::new(config.summary_cache_ttl));

        Self {
            drafts: DraftRegistry::new(store.clone(), documents, engine),
            ledger: ConversationLedger::new(store.clone(), config.conversation_page_size),
            review: AdminReviewService::new(store.clone(), notifier.clone(), engine, summary),
            guard: UniquenessGuard::new(),
            engine,
            store,
            notifier,
        }
    }

    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    /// Live availability check for the identifier field. Malformed input is answered without
    /// reading the store.
    pub fn check_available(
        &self,
        actor: &Actor,
        membership_type: MembershipType,
        raw_identifier: &str,
    ) -> Result<Availability, WorkflowError> {
        let Ok(identifier) = UniqueIdentifier::parse(raw_identifier) else {
            return Ok(Availability::invalid_format());
        };
        self.store.read(|reader: &dyn StoreReader| {
            Ok::<_, WorkflowError>(self.guard.check_identifier(
                reader,
                membership_type,
                &identifier,
                &actor.user_id,
            )?)
        })
    }

    pub fn create_or_resume_draft(
        &self,
        actor: &Actor,
        membership_type: MembershipType,
        raw_identifier: &str,
        fields: FieldSnapshot,
    ) -> Result<Draft, WorkflowError> {
        self.drafts
            .create_or_resume_draft(actor, membership_type, raw_identifier, fields)
    }

    pub fn save_draft(
        &self,
        actor: &Actor,
        draft_id: DraftId,
        update: DraftUpdate,
    ) -> Result<Draft, WorkflowError> {
        self.drafts.save_draft(actor, draft_id, update)
    }

    pub fn delete_draft(&self, actor: &Actor, draft_id: DraftId) -> Result<(), WorkflowError> {
        self.drafts.delete_draft(actor, draft_id)
    }

    pub fn draft(&self, actor: &Actor, draft_id: DraftId) -> Result<Draft, WorkflowError> {
        self.drafts.draft(actor, draft_id)
    }

    pub fn list_drafts(&self, actor: &Actor) -> Result<Vec<Draft>, WorkflowError> {
        self.drafts.list_drafts(actor)
    }

    pub fn attach_document(
        &self,
        actor: &Actor,
        draft_id: DraftId,
        upload: DocumentUpload,
    ) -> Result<Draft, WorkflowError> {
        self.drafts.attach_document(actor, draft_id, upload)
    }

    pub fn submit_draft(&self, actor: &Actor, draft_id: DraftId) -> Result<Transition, WorkflowError> {
        let transition = self.drafts.promote_draft_to_application(actor, draft_id)?;
        let key = transition.application.key();

        self.review.invalidate_summary();
        info!(
            application = %key,
            draft = %draft_id,
            owner = %actor.user_id,
            "application submitted"
        );
        self.notify(
            Notification::new(actor.user_id.clone(), NotificationKind::SubmissionReceived, key)
                .with("identifier", transition.application.unique_identifier.as_str()),
        );
        Ok(transition)
    }

    /// Bring a rejected application back for review. Only the owner (or an admin acting for
    /// them) may resubmit; anyone else is told the application does not exist.
    pub fn resubmit(
        &self,
        actor: &Actor,
        key: ApplicationKey,
        resubmission: Resubmission,
    ) -> Result<Transition, WorkflowError> {
        let transition = self.store.transaction(|uow| {
            let application = uow.application(key)?.ok_or(WorkflowError::NotFound)?;
            if !actor.can_access(&application.owner_user_id) {
                return Err(WorkflowError::NotFound);
            }
            self.engine.resubmit(
                uow,
                key,
                actor,
                resubmission.field_snapshot.clone(),
                resubmission.comment.as_deref(),
                Utc::now(),
            )
        })?;

        self.review.invalidate_summary();
        info!(
            previous = %key,
            application = %transition.application.key(),
            version = transition.application.version,
            mode = ?self.engine.mode(),
            "application resubmitted"
        );
        self.notify(
            Notification::new(
                transition.application.owner_user_id.clone(),
                NotificationKind::ResubmissionReceived,
                transition.application.key(),
            )
            .with("previous", key.to_string())
            .with("version", transition.application.version.to_string()),
        );
        Ok(transition)
    }

    pub fn application(
        &self,
        actor: &Actor,
        key: ApplicationKey,
    ) -> Result<Application, WorkflowError> {
        self.store.read(|reader: &dyn StoreReader| {
            let application = reader.application(key)?.ok_or(WorkflowError::NotFound)?;
            if actor.can_access(&application.owner_user_id) {
                Ok(application)
            } else {
                Err(WorkflowError::NotFound)
            }
        })
    }

    pub fn history(
        &self,
        actor: &Actor,
        key: ApplicationKey,
    ) -> Result<ApplicationHistory, WorkflowError> {
        self.store.read(|reader: &dyn StoreReader| {
            let application = reader.application(key)?.ok_or(WorkflowError::NotFound)?;
            if !actor.can_access(&application.owner_user_id) {
                return Err(WorkflowError::NotFound);
            }

            let mut versions = reader.snapshots(key)?;
            let mut parent = application.parent_id;
            while let Some(parent_id) = parent {
                let parent_key = ApplicationKey::new(application.membership_type, parent_id);
                versions.extend(reader.snapshots(parent_key)?);
                parent = reader
                    .application(parent_key)?
                    .and_then(|ancestor| ancestor.parent_id);
            }
            versions.sort_by_key(|record| (record.version, record.recorded_at));

            Ok(ApplicationHistory {
                application,
                versions,
            })
        })
    }

    pub fn reply(
        &self,
        actor: &Actor,
        key: ApplicationKey,
        message: &str,
        internal: bool,
    ) -> Result<ConversationEntry, WorkflowError> {
        self.ledger.reply(actor, key, message, internal)
    }

    pub fn conversation(
        &self,
        actor: &Actor,
        key: ApplicationKey,
        query: ConversationQuery,
    ) -> Result<ConversationPage, WorkflowError> {
        self.ledger.list_for_application(actor, key, query)
    }

    pub fn approve(
        &self,
        actor: &Actor,
        key: ApplicationKey,
        note: Option<&str>,
    ) -> Result<Transition, WorkflowError> {
        self.review.approve(actor, key, note)
    }

    pub fn reject(
        &self,
        actor: &Actor,
        key: ApplicationKey,
        reason: &str,
    ) -> Result<Transition, WorkflowError> {
        self.review.reject(actor, key, reason)
    }

    pub fn resolve_rejection(
        &self,
        actor: &Actor,
        rejection_id: RejectionId,
        note: Option<&str>,
    ) -> Result<Transition, WorkflowError> {
        self.review.resolve(actor, rejection_id, note)
    }

    pub fn review_queue(
        &self,
        actor: &Actor,
        filter: &ApplicationFilter,
    ) -> Result<Vec<Application>, WorkflowError> {
        self.review.review_queue(actor, filter)
    }

    pub fn summary(&self, actor: &Actor) -> Result<ReviewSummary, WorkflowError> {
        self.review.summary(actor)
    }

    fn notify(&self, notification: Notification) {
        notify_best_effort(self.notifier.as_ref(), notification);
    }
}
