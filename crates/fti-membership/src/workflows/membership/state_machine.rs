//! Application lifecycle: legal transitions and the writes each transition performs.
//!
//! | from                  | event         | to                                        |
//! |-----------------------|---------------|-------------------------------------------|
//! | draft                 | submit        | pending                                   |
//! | pending / resubmitted | approve       | approved                                  |
//! | pending / resubmitted | reject        | rejected                                  |
//! | rejected              | resubmit      | archived + new pending row, or resubmitted |
//! | rejected              | admin resolve | approved                                  |
//!
//! Every operation runs against a [`UnitOfWork`], so the status change, the conversation entry,
//! the rejection bookkeeping and the history snapshot commit or roll back together.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    Actor, Application, ApplicationKey, ApplicationStatus, ConversationEntry, Draft, FieldSnapshot,
    MessageType, NewConversationEntry, NewRejection, Rejection, RejectionId, RejectionState,
    SnapshotRecord,
};
use super::errors::{ConflictReason, ValidationError, WorkflowError};
use super::store::UnitOfWork;
use super::uniqueness::UniquenessGuard;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowEvent {
    Submit,
    Approve,
    Reject,
    Resubmit,
    AdminResolve,
}

impl WorkflowEvent {
    pub const fn label(self) -> &'static str {
        match self {
            WorkflowEvent::Submit => "submit",
            WorkflowEvent::Approve => "approve",
            WorkflowEvent::Reject => "reject",
            WorkflowEvent::Resubmit => "resubmit",
            WorkflowEvent::AdminResolve => "resolve",
        }
    }
}

impl fmt::Display for WorkflowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How a rejected application comes back for review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResubmissionMode {
    /// Archive the rejected row and create a new row with `version + 1`.
    #[default]
    NewVersion,
    /// Reuse the rejected row, moving it to `Resubmitted`.
    InPlace,
}

impl FromStr for ResubmissionMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "new_version" | "versioned" => Ok(ResubmissionMode::NewVersion),
            "in_place" | "inplace" => Ok(ResubmissionMode::InPlace),
            other => Err(format!("unknown resubmission mode '{other}'")),
        }
    }
}

/// Status the acted-upon row moves to, or `InvalidTransition`.
pub fn transition(
    from: ApplicationStatus,
    event: WorkflowEvent,
    mode: ResubmissionMode,
) -> Result<ApplicationStatus, WorkflowError> {
    let next = match (from, event) {
        (ApplicationStatus::Draft, WorkflowEvent::Submit) => Some(ApplicationStatus::Pending),
        (status, WorkflowEvent::Approve) if status.is_awaiting_review() => {
            Some(ApplicationStatus::Approved)
        }
        (status, WorkflowEvent::Reject) if status.is_awaiting_review() => {
            Some(ApplicationStatus::Rejected)
        }
        (ApplicationStatus::Rejected, WorkflowEvent::Resubmit) => Some(match mode {
            ResubmissionMode::NewVersion => ApplicationStatus::Archived,
            ResubmissionMode::InPlace => ApplicationStatus::Resubmitted,
        }),
        (ApplicationStatus::Rejected, WorkflowEvent::AdminResolve) => {
            Some(ApplicationStatus::Approved)
        }
        _ => None,
    };

    next.ok_or(WorkflowError::InvalidTransition { from, event })
}

/// Committed outcome of one transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub event: WorkflowEvent,
    pub status_before: ApplicationStatus,
    /// The row now carrying the application forward (the new row after a versioned resubmit).
    pub application: Application,
    /// The archived parent after a versioned resubmit.
    pub superseded: Option<Application>,
    pub entry: Option<ConversationEntry>,
    pub rejection: Option<Rejection>,
}

const APPROVED_MESSAGE: &str = "Application approved";
const RESUBMITTED_MESSAGE: &str = "Application resubmitted after rejection";
const RESOLVED_MESSAGE: &str = "Rejection resolved by administrator";

#[derive(Debug, Clone, Copy, Default)]
pub struct WorkflowEngine {
    mode: ResubmissionMode,
    guard: UniquenessGuard,
}

impl WorkflowEngine {
    pub fn new(mode: ResubmissionMode) -> Self {
        Self {
            mode,
            guard: UniquenessGuard::new(),
        }
    }

    pub fn mode(&self) -> ResubmissionMode {
        self.mode
    }

    /// Turn a draft into a pending application and mark the draft consumed.
    pub fn submit_draft(
        &self,
        uow: &mut dyn UnitOfWork,
        draft: &Draft,
        now: DateTime<Utc>,
    ) -> Result<Transition, WorkflowError> {
        if !draft.is_live() {
            return Err(WorkflowError::Conflict(ConflictReason::DuplicateSubmission));
        }
        let status = transition(draft.status(), WorkflowEvent::Submit, self.mode)?;
        ensure_required_fields(draft.membership_type.required_fields(), &draft.field_snapshot)?;
        self.guard
            .ensure_no_active(uow.reader(), &draft.unique_identifier, None)?;

        let id = uow.next_application_id(draft.membership_type)?;
        let application = Application {
            id,
            membership_type: draft.membership_type,
            owner_user_id: draft.owner_user_id.clone(),
            unique_identifier: draft.unique_identifier.clone(),
            status,
            version: 1,
            parent_id: None,
            is_archived: false,
            field_snapshot: draft.field_snapshot.clone(),
            rejection_reason: None,
            resubmission_count: 0,
            created_at: now,
            updated_at: now,
            rejected_at: None,
            resolved_at: None,
            resubmitted_at: None,
        };
        uow.insert_application(application.clone())?;
        record_snapshot(uow, &application, now)?;

        let mut consumed = draft.clone();
        consumed.consumed_by = Some(application.key());
        consumed.updated_at = now;
        uow.update_draft(consumed)?;

        Ok(Transition {
            event: WorkflowEvent::Submit,
            status_before: ApplicationStatus::Draft,
            application,
            superseded: None,
            entry: None,
            rejection: None,
        })
    }

    pub fn approve(
        &self,
        uow: &mut dyn UnitOfWork,
        key: ApplicationKey,
        actor: &Actor,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Transition, WorkflowError> {
        let mut application = load(uow, key)?;
        let before = application.status;
        let after = transition(before, WorkflowEvent::Approve, self.mode)?;

        application.status = after;
        application.updated_at = now;
        uow.update_application(application.clone())?;

        let message = non_blank(note).unwrap_or(APPROVED_MESSAGE);
        let entry = uow.append_entry(
            NewConversationEntry::from_actor(key, MessageType::Note, actor, message, now)
                .with_transition(before, after),
        )?;

        Ok(Transition {
            event: WorkflowEvent::Approve,
            status_before: before,
            application,
            superseded: None,
            entry: Some(entry),
            rejection: None,
        })
    }

    pub fn reject(
        &self,
        uow: &mut dyn UnitOfWork,
        key: ApplicationKey,
        actor: &Actor,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Transition, WorkflowError> {
        let reason = non_blank(Some(reason)).ok_or(ValidationError::EmptyReason)?;
        let mut application = load(uow, key)?;
        let before = application.status;
        let after = transition(before, WorkflowEvent::Reject, self.mode)?;

        if application.version > 1 {
            application.resubmission_count += 1;
        }
        application.status = after;
        application.rejection_reason = Some(reason.to_string());
        application.rejected_at = Some(now);
        application.updated_at = now;
        uow.update_application(application.clone())?;

        let entry = uow.append_entry(
            NewConversationEntry::from_actor(key, MessageType::Rejection, actor, reason, now)
                .with_transition(before, after),
        )?;
        let rejection = uow.insert_rejection(NewRejection {
            application: key,
            reason: reason.to_string(),
            rejected_by: actor.user_id.clone(),
            rejected_at: now,
        })?;

        Ok(Transition {
            event: WorkflowEvent::Reject,
            status_before: before,
            application,
            superseded: None,
            entry: Some(entry),
            rejection: Some(rejection),
        })
    }

    pub fn resubmit(
        &self,
        uow: &mut dyn UnitOfWork,
        key: ApplicationKey,
        actor: &Actor,
        mut fields: FieldSnapshot,
        comment: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Transition, WorkflowError> {
        let mut current = load(uow, key)?;
        let before = current.status;
        let after = transition(before, WorkflowEvent::Resubmit, self.mode)?;
        ensure_required_fields(current.membership_type.required_fields(), &fields)?;

        fields.inherit_documents(&current.field_snapshot);
        let message = non_blank(comment).unwrap_or(RESUBMITTED_MESSAGE);
        let open_rejection = uow.open_rejection(key)?;

        let (application, superseded) = match self.mode {
            ResubmissionMode::NewVersion => {
                self.guard
                    .ensure_no_active(uow.reader(), &current.unique_identifier, None)?;

                current.status = after;
                current.is_archived = true;
                current.resubmitted_at = Some(now);
                current.updated_at = now;
                uow.update_application(current.clone())?;

                let id = uow.next_application_id(current.membership_type)?;
                let child = Application {
                    id,
                    membership_type: current.membership_type,
                    owner_user_id: current.owner_user_id.clone(),
                    unique_identifier: current.unique_identifier.clone(),
                    status: ApplicationStatus::Pending,
                    version: current.version + 1,
                    parent_id: Some(current.id),
                    is_archived: false,
                    field_snapshot: fields,
                    rejection_reason: None,
                    resubmission_count: current.resubmission_count,
                    created_at: now,
                    updated_at: now,
                    rejected_at: None,
                    resolved_at: None,
                    resubmitted_at: Some(now),
                };
                uow.insert_application(child.clone())?;
                (child, Some(current))
            }
            ResubmissionMode::InPlace => {
                self.guard
                    .ensure_no_active(uow.reader(), &current.unique_identifier, Some(key))?;

                current.status = after;
                current.version += 1;
                current.field_snapshot = fields;
                current.rejection_reason = None;
                current.resubmitted_at = Some(now);
                current.updated_at = now;
                uow.update_application(current.clone())?;
                (current, None)
            }
        };

        record_snapshot(uow, &application, now)?;
        let entry = uow.append_entry(
            NewConversationEntry::from_actor(
                application.key(),
                MessageType::Resubmission,
                actor,
                message,
                now,
            )
            .with_transition(before, application.status),
        )?;

        let rejection = match open_rejection {
            Some(mut rejection) => {
                rejection.state = RejectionState::Resubmitted;
                rejection.resubmitted_as = Some(application.key());
                uow.update_rejection(rejection.clone())?;
                Some(rejection)
            }
            None => None,
        };

        Ok(Transition {
            event: WorkflowEvent::Resubmit,
            status_before: before,
            application,
            superseded,
            entry: Some(entry),
            rejection,
        })
    }

    /// Approve a rejected application on the member's behalf, closing the rejection.
    pub fn admin_resolve(
        &self,
        uow: &mut dyn UnitOfWork,
        rejection_id: RejectionId,
        actor: &Actor,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Transition, WorkflowError> {
        let mut rejection = uow.rejection(rejection_id)?.ok_or(WorkflowError::NotFound)?;
        let key = rejection.application;
        let mut application = load(uow, key)?;
        let before = application.status;

        if rejection.state != RejectionState::Open {
            return Err(WorkflowError::InvalidTransition {
                from: before,
                event: WorkflowEvent::AdminResolve,
            });
        }
        let after = transition(before, WorkflowEvent::AdminResolve, self.mode)?;
        self.guard
            .ensure_no_active(uow.reader(), &application.unique_identifier, Some(key))?;

        application.status = after;
        application.rejection_reason = None;
        application.resolved_at = Some(now);
        application.updated_at = now;
        uow.update_application(application.clone())?;

        let note = non_blank(note);
        let entry = uow.append_entry(
            NewConversationEntry::from_actor(
                key,
                MessageType::Note,
                actor,
                note.unwrap_or(RESOLVED_MESSAGE),
                now,
            )
            .with_transition(before, after),
        )?;

        rejection.state = RejectionState::Resolved;
        rejection.resolved_at = Some(now);
        rejection.resolution_note = note.map(str::to_string);
        uow.update_rejection(rejection.clone())?;

        Ok(Transition {
            event: WorkflowEvent::AdminResolve,
            status_before: before,
            application,
            superseded: None,
            entry: Some(entry),
            rejection: Some(rejection),
        })
    }
}

fn load(uow: &mut dyn UnitOfWork, key: ApplicationKey) -> Result<Application, WorkflowError> {
    uow.application(key)?.ok_or(WorkflowError::NotFound)
}

fn record_snapshot(
    uow: &mut dyn UnitOfWork,
    application: &Application,
    now: DateTime<Utc>,
) -> Result<(), WorkflowError> {
    uow.record_snapshot(SnapshotRecord {
        application: application.key(),
        version: application.version,
        field_snapshot: application.field_snapshot.clone(),
        recorded_at: now,
    })?;
    Ok(())
}

pub(crate) fn ensure_required_fields(
    required: &[&str],
    fields: &FieldSnapshot,
) -> Result<(), WorkflowError> {
    let missing = fields.missing_fields(required);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::MissingFields(missing).into())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|text| !text.is_empty())
}
