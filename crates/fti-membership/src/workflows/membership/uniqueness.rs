use serde::Serialize;
use tracing::debug;

use super::domain::{
    Application, ApplicationKey, ApplicationStatus, DraftId, MembershipType, UniqueIdentifier,
    UserId,
};
use super::errors::{ConflictReason, ValidationError, WorkflowError};
use super::store::{RepositoryError, StoreReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityReason {
    Available,
    InvalidFormat,
    ActiveApplicationExists,
    DraftOwnedByOther,
    DraftOwnedBySelf,
}

/// The application currently holding an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActiveApplication {
    pub application: ApplicationKey,
    pub status: ApplicationStatus,
}

/// Result of an availability check, shaped for live form validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub available: bool,
    pub reason: AvailabilityReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_user_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft_id: Option<DraftId>,
    pub was_rejected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_application: Option<ActiveApplication>,
}

impl Availability {
    fn new(available: bool, reason: AvailabilityReason) -> Self {
        Self {
            available,
            reason,
            owner_user_id: None,
            draft_id: None,
            was_rejected: false,
            active_application: None,
        }
    }

    pub fn invalid_format() -> Self {
        Self::new(false, AvailabilityReason::InvalidFormat)
    }

    /// Conflict equivalent for callers that must refuse the action.
    pub fn conflict(&self) -> Option<WorkflowError> {
        match self.reason {
            AvailabilityReason::ActiveApplicationExists => Some(WorkflowError::Conflict(
                ConflictReason::ActiveApplicationExists,
            )),
            AvailabilityReason::DraftOwnedByOther => {
                Some(WorkflowError::Conflict(ConflictReason::DraftOwnedByOther))
            }
            AvailabilityReason::InvalidFormat => Some(ValidationError::InvalidFormat.into()),
            AvailabilityReason::Available | AvailabilityReason::DraftOwnedBySelf => None,
        }
    }
}

/// Cross-type check that a tax id or national id is not held by two live records.
///
/// Stateless and read-only; every call reads through the reader it is handed, which may be a
/// plain snapshot or the unit of work of the transaction about to write.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniquenessGuard;

impl UniquenessGuard {
    pub fn new() -> Self {
        Self
    }

    /// Format problems are answered without touching storage.
    pub fn check_available(
        &self,
        reader: &dyn StoreReader,
        membership_type: MembershipType,
        raw_identifier: &str,
        requesting_user: &UserId,
    ) -> Result<Availability, RepositoryError> {
        let identifier = match UniqueIdentifier::parse(raw_identifier) {
            Ok(identifier) => identifier,
            Err(_) => return Ok(Availability::invalid_format()),
        };
        self.check_identifier(reader, membership_type, &identifier, requesting_user)
    }

    pub fn check_identifier(
        &self,
        reader: &dyn StoreReader,
        membership_type: MembershipType,
        identifier: &UniqueIdentifier,
        requesting_user: &UserId,
    ) -> Result<Availability, RepositoryError> {
        let applications = reader.applications_for_identifier(identifier)?;

        if let Some(active) = latest_active(&applications) {
            debug!(%identifier, holder = %active.key(), "identifier held by active application");
            let mut availability =
                Availability::new(false, AvailabilityReason::ActiveApplicationExists);
            availability.owner_user_id = Some(active.owner_user_id.clone());
            availability.active_application = Some(ActiveApplication {
                application: active.key(),
                status: active.status,
            });
            return Ok(availability);
        }

        let was_rejected = applications
            .iter()
            .any(|application| application.status == ApplicationStatus::Rejected);

        let drafts = reader.drafts_for_identifier(identifier)?;
        if let Some(foreign) = drafts
            .iter()
            .find(|draft| &draft.owner_user_id != requesting_user)
        {
            let mut availability = Availability::new(false, AvailabilityReason::DraftOwnedByOther);
            availability.owner_user_id = Some(foreign.owner_user_id.clone());
            availability.was_rejected = was_rejected;
            return Ok(availability);
        }

        // Only the caller's drafts are left. A draft of the requested type wins the resume.
        if let Some(own) = drafts
            .iter()
            .find(|draft| draft.membership_type == membership_type)
            .or_else(|| drafts.first())
        {
            let mut availability = Availability::new(true, AvailabilityReason::DraftOwnedBySelf);
            availability.owner_user_id = Some(own.owner_user_id.clone());
            availability.draft_id = Some(own.id);
            availability.was_rejected = was_rejected;
            return Ok(availability);
        }

        let mut availability = Availability::new(true, AvailabilityReason::Available);
        availability.was_rejected = was_rejected;
        Ok(availability)
    }

    /// Re-check used right before an application enters an active status. Drafts are ignored:
    /// the caller is the one promoting or resolving.
    pub fn ensure_no_active(
        &self,
        reader: &dyn StoreReader,
        identifier: &UniqueIdentifier,
        excluding: Option<ApplicationKey>,
    ) -> Result<(), WorkflowError> {
        let clash = reader
            .applications_for_identifier(identifier)?
            .into_iter()
            .any(|application| application.is_active() && Some(application.key()) != excluding);

        if clash {
            Err(WorkflowError::Conflict(
                ConflictReason::ActiveApplicationExists,
            ))
        } else {
            Ok(())
        }
    }
}

fn latest_active(applications: &[Application]) -> Option<&Application> {
    applications
        .iter()
        .filter(|application| application.is_active())
        .max_by_key(|application| application.updated_at)
}
