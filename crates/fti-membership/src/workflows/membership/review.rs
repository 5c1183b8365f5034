use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::cache::TtlCache;
use super::domain::{
    Actor, Application, ApplicationKey, ApplicationStatus, MembershipType, RejectionId,
    RejectionState,
};
use super::errors::WorkflowError;
use super::gateway::{Notification, NotificationKind, Notifier};
use super::state_machine::{Transition, WorkflowEngine};
use super::store::{ApplicationFilter, MembershipStore, StoreReader};

/// Per type and status counts for the admin dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewSummary {
    pub counts: Vec<SummaryRow>,
    pub awaiting_review: usize,
    pub open_rejections: usize,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SummaryRow {
    pub membership_type: MembershipType,
    pub status: ApplicationStatus,
    pub count: usize,
}

impl ReviewSummary {
    fn build(applications: &[Application], open_rejections: usize) -> Self {
        let mut tally: BTreeMap<(MembershipType, ApplicationStatus), usize> = BTreeMap::new();
        for application in applications {
            *tally
                .entry((application.membership_type, application.status))
                .or_default() += 1;
        }

        let awaiting_review = applications
            .iter()
            .filter(|application| application.status.is_awaiting_review())
            .count();

        Self {
            counts: tally
                .into_iter()
                .map(|((membership_type, status), count)| SummaryRow {
                    membership_type,
                    status,
                    count,
                })
                .collect(),
            awaiting_review,
            open_rejections,
            generated_at: Utc::now(),
        }
    }

    pub fn count(&self, membership_type: MembershipType, status: ApplicationStatus) -> usize {
        self.counts
            .iter()
            .find(|row| row.membership_type == membership_type && row.status == status)
            .map_or(0, |row| row.count)
    }
}

/// Admin-only entry points: approve, reject, resolve and the review queue.
///
/// Notifications go out after the transaction commits. A failed notification is logged and
/// never undoes the transition.
pub struct AdminReviewService<S, N> {
    store: Arc<S>,
    notifier: Arc<N>,
    engine: WorkflowEngine,
    summary: Arc<TtlCache<(), ReviewSummary>>,
}

impl<S, N> AdminReviewService<S, N>
where
    S: MembershipStore + 'static,
    N: Notifier + 'static,
{
    pub fn new(
        store: Arc<S>,
        notifier: Arc<N>,
        engine: WorkflowEngine,
        summary: Arc<TtlCache<(), ReviewSummary>>,
    ) -> Self {
        Self {
            store,
            notifier,
            engine,
            summary,
        }
    }

    pub fn approve(
        &self,
        actor: &Actor,
        key: ApplicationKey,
        note: Option<&str>,
    ) -> Result<Transition, WorkflowError> {
        ensure_admin(actor)?;
        let transition = self
            .store
            .transaction(|uow| self.engine.approve(uow, key, actor, note, Utc::now()))?;

        self.committed(actor, &transition);
        self.notify(
            Notification::new(
                transition.application.owner_user_id.clone(),
                NotificationKind::ApplicationApproved,
                key,
            )
            .with("status", transition.application.status.label()),
        );
        Ok(transition)
    }

    pub fn reject(
        &self,
        actor: &Actor,
        key: ApplicationKey,
        reason: &str,
    ) -> Result<Transition, WorkflowError> {
        ensure_admin(actor)?;
        let transition = self
            .store
            .transaction(|uow| self.engine.reject(uow, key, actor, reason, Utc::now()))?;

        self.committed(actor, &transition);
        let mut notification = Notification::new(
            transition.application.owner_user_id.clone(),
            NotificationKind::ApplicationRejected,
            key,
        )
        .with("reason", reason.trim());
        if let Some(rejection) = &transition.rejection {
            notification = notification.with("rejection_id", rejection.id.to_string());
        }
        self.notify(notification);
        Ok(transition)
    }

    pub fn resolve(
        &self,
        actor: &Actor,
        rejection_id: RejectionId,
        note: Option<&str>,
    ) -> Result<Transition, WorkflowError> {
        ensure_admin(actor)?;
        let transition = self.store.transaction(|uow| {
            self.engine
                .admin_resolve(uow, rejection_id, actor, note, Utc::now())
        })?;

        self.committed(actor, &transition);
        self.notify(
            Notification::new(
                transition.application.owner_user_id.clone(),
                NotificationKind::RejectionResolved,
                transition.application.key(),
            )
            .with("rejection_id", rejection_id.to_string()),
        );
        Ok(transition)
    }

    /// Applications matching the filter, oldest submission first.
    pub fn review_queue(
        &self,
        actor: &Actor,
        filter: &ApplicationFilter,
    ) -> Result<Vec<Application>, WorkflowError> {
        ensure_admin(actor)?;
        let mut applications = self.store.read(|reader: &dyn StoreReader| {
            Ok::<_, WorkflowError>(reader.applications(filter)?)
        })?;
        applications.sort_by(|left, right| {
            left.created_at
                .cmp(&right.created_at)
                .then_with(|| left.key().cmp(&right.key()))
        });
        Ok(applications)
    }

    /// Dashboard counts, served from the read-through cache.
    pub fn summary(&self, actor: &Actor) -> Result<ReviewSummary, WorkflowError> {
        ensure_admin(actor)?;
        self.summary.get_or_try_insert_with((), || {
            self.store.read(|reader: &dyn StoreReader| {
                let applications = reader.applications(&ApplicationFilter::default())?;
                let open_rejections = applications
                    .iter()
                    .filter(|application| application.status == ApplicationStatus::Rejected)
                    .map(|application| reader.open_rejection(application.key()))
                    .collect::<Result<Vec<_>, _>>()?
                    .into_iter()
                    .flatten()
                    .filter(|rejection| rejection.state == RejectionState::Open)
                    .count();
                Ok::<_, WorkflowError>(ReviewSummary::build(&applications, open_rejections))
            })
        })
    }

    pub(crate) fn invalidate_summary(&self) {
        self.summary.invalidate(&());
    }

    pub(crate) fn notify(&self, notification: Notification) {
        notify_best_effort(self.notifier.as_ref(), notification);
    }

    fn committed(&self, actor: &Actor, transition: &Transition) {
        self.invalidate_summary();
        info!(
            application = %transition.application.key(),
            event = %transition.event,
            from = %transition.status_before,
            to = %transition.application.status,
            admin = %actor.user_id,
            "review decision committed"
        );
    }
}

pub(crate) fn ensure_admin(actor: &Actor) -> Result<(), WorkflowError> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(WorkflowError::Forbidden)
    }
}

pub(crate) fn notify_best_effort<N>(notifier: &N, notification: Notification)
where
    N: Notifier + ?Sized,
{
    let kind = notification.kind;
    let application = notification.application;
    if let Err(error) = notifier.notify(notification) {
        warn!(%application, ?kind, %error, "notification dispatch failed");
    }
}
