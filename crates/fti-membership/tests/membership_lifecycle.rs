//! End-to-end lifecycle checks for the membership workflow, driven only through the public
//! service façade: concurrent submission, rejection, versioned resubmission, availability and
//! concurrent review.

mod common {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use serde_json::json;

    use fti_membership::workflows::membership::{
        Actor, Application, DocumentError, DocumentMetadata, DocumentStore, DocumentUrl,
        FieldSnapshot, InMemoryMembershipStore, MembershipService, MembershipStore,
        MembershipType, Notification, NotificationKind, Notifier, NotifyError, RepositoryError,
        ResubmissionMode, StoreFailure, StoreReader, UnitOfWork, WorkflowConfig,
    };

    pub(super) const TAX_ID: &str = "1234567890123";

    pub(super) type Service<S> = MembershipService<S, RecordingNotifier, UrlOnlyDocuments>;

    pub(super) fn config(mode: ResubmissionMode) -> WorkflowConfig {
        WorkflowConfig {
            resubmission_mode: mode,
            summary_cache_ttl: Duration::from_secs(30),
            ..WorkflowConfig::default()
        }
    }

    pub(super) fn service_over<S: MembershipStore + 'static>(
        store: Arc<S>,
    ) -> (Arc<Service<S>>, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let service = MembershipService::new(
            store,
            notifier.clone(),
            Arc::new(UrlOnlyDocuments),
            &config(ResubmissionMode::NewVersion),
        );
        (Arc::new(service), notifier)
    }

    pub(super) fn in_memory() -> (Arc<Service<InMemoryMembershipStore>>, Arc<RecordingNotifier>) {
        service_over(Arc::new(InMemoryMembershipStore::new()))
    }

    pub(super) fn member(id: &str) -> Actor {
        Actor::member(id, format!("สมาชิก {id}"))
    }

    pub(super) fn admin(id: &str) -> Actor {
        Actor::admin(id, format!("เจ้าหน้าที่ {id}"))
    }

    pub(super) fn fields(membership_type: MembershipType) -> FieldSnapshot {
        let value = match membership_type {
            MembershipType::Oc => json!({
                "company_name_th": "บริษัท สยามโลหะ จำกัด",
                "company_name_en": "Siam Metal Co., Ltd.",
                "address": "99 Rama IV Road, Bangkok",
                "factory_type": "type_2",
            }),
            MembershipType::Ac => json!({
                "company_name_th": "บริษัท สยามโลหะ จำกัด",
                "company_name_en": "Siam Metal Co., Ltd.",
                "address": "99 Rama IV Road, Bangkok",
            }),
            MembershipType::Am => json!({
                "association_name_th": "สมาคมโลหะไทย",
                "association_name_en": "Thai Metal Association",
                "address": "99 Rama IV Road, Bangkok",
            }),
            MembershipType::Ic => json!({
                "first_name_th": "สมหญิง",
                "last_name_th": "รักดี",
                "address": "7 Pracha Uthit Road, Bangkok",
            }),
        };
        FieldSnapshot::try_from(value).expect("object snapshot")
    }

    pub(super) fn pending<S: MembershipStore + 'static>(
        service: &Service<S>,
        owner: &Actor,
        membership_type: MembershipType,
    ) -> Application {
        let draft = service
            .create_or_resume_draft(owner, membership_type, TAX_ID, fields(membership_type))
            .expect("draft created");
        service
            .submit_draft(owner, draft.id)
            .expect("draft promotes")
            .application
    }

    #[derive(Default)]
    pub(super) struct RecordingNotifier {
        sent: Mutex<Vec<Notification>>,
    }

    impl RecordingNotifier {
        pub(super) fn count(&self, kind: NotificationKind) -> usize {
            self.sent
                .lock()
                .expect("notifier mutex poisoned")
                .iter()
                .filter(|notification| notification.kind == kind)
                .count()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
            self.sent
                .lock()
                .expect("notifier mutex poisoned")
                .push(notification);
            Ok(())
        }
    }

    pub(super) struct UrlOnlyDocuments;

    impl DocumentStore for UrlOnlyDocuments {
        fn upload(
            &self,
            _bytes: &[u8],
            metadata: DocumentMetadata,
        ) -> Result<DocumentUrl, DocumentError> {
            Ok(DocumentUrl(format!("https://files.example/{}", metadata.file_name)))
        }
    }

    /// Counts every call and always reports the backend as down.
    #[derive(Default)]
    pub(super) struct DownStore {
        pub(super) calls: AtomicUsize,
    }

    impl MembershipStore for DownStore {
        fn read<T, E, F>(&self, _work: F) -> Result<T, E>
        where
            F: FnMut(&dyn StoreReader) -> Result<T, E>,
            E: From<RepositoryError> + StoreFailure,
        {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(RepositoryError::Unavailable("down".to_string()).into())
        }

        fn transaction<T, E, F>(&self, _work: F) -> Result<T, E>
        where
            F: FnMut(&mut dyn UnitOfWork) -> Result<T, E>,
            E: From<RepositoryError> + StoreFailure,
        {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(RepositoryError::Unavailable("down".to_string()).into())
        }
    }

    /// Fails the first `failures` transactions, then behaves like the in-memory store.
    pub(super) struct FlakyStore {
        pub(super) inner: InMemoryMembershipStore,
        pub(super) failures: AtomicUsize,
    }

    impl FlakyStore {
        pub(super) fn failing(failures: usize) -> Self {
            Self {
                inner: InMemoryMembershipStore::new(),
                failures: AtomicUsize::new(failures),
            }
        }
    }

    impl MembershipStore for FlakyStore {
        fn read<T, E, F>(&self, work: F) -> Result<T, E>
        where
            F: FnMut(&dyn StoreReader) -> Result<T, E>,
            E: From<RepositoryError> + StoreFailure,
        {
            self.inner.read(work)
        }

        fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
        where
            F: FnMut(&mut dyn UnitOfWork) -> Result<T, E>,
            E: From<RepositoryError> + StoreFailure,
        {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(RepositoryError::Unavailable("connection reset".to_string()).into());
            }
            self.inner.transaction(work)
        }
    }
}

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use common::*;
use fti_membership::workflows::membership::{
    ApplicationStatus, AvailabilityReason, ConflictReason, ConversationQuery, MembershipType,
    MessageType, NotificationKind, Resubmission, RetryPolicy, RetryingStore, WorkflowError,
};

#[test]
fn concurrent_draft_claims_leave_one_owner() {
    let (service, _) = in_memory();
    let barrier = Arc::new(Barrier::new(2));

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = ["u-1", "u-2"]
            .into_iter()
            .map(|user| {
                let service = service.clone();
                let barrier = barrier.clone();
                scope.spawn(move || {
                    barrier.wait();
                    service.create_or_resume_draft(
                        &member(user),
                        MembershipType::Oc,
                        TAX_ID,
                        fields(MembershipType::Oc),
                    )
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("thread completes"))
            .collect()
    });

    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    assert!(results.iter().any(|result| matches!(
        result,
        Err(WorkflowError::Conflict(ConflictReason::DraftOwnedByOther))
    )));
}

#[test]
fn concurrent_promotions_for_one_identifier_admit_exactly_one() {
    let (service, notifier) = in_memory();
    let owner = member("u-1");
    let drafts: Vec<_> = [MembershipType::Oc, MembershipType::Ac]
        .into_iter()
        .map(|membership_type| {
            service
                .create_or_resume_draft(&owner, membership_type, TAX_ID, fields(membership_type))
                .expect("draft created")
        })
        .collect();
    let barrier = Arc::new(Barrier::new(drafts.len()));

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = drafts
            .iter()
            .map(|draft| {
                let service = service.clone();
                let barrier = barrier.clone();
                let owner = owner.clone();
                let draft_id = draft.id;
                scope.spawn(move || {
                    barrier.wait();
                    service.submit_draft(&owner, draft_id)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("thread completes"))
            .collect()
    });

    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    assert!(results.iter().any(|result| matches!(
        result,
        Err(WorkflowError::Conflict(ConflictReason::ActiveApplicationExists))
    )));
    assert_eq!(notifier.count(NotificationKind::SubmissionReceived), 1);
}

#[test]
fn rejection_records_reason_and_one_ledger_entry() {
    let (service, notifier) = in_memory();
    let owner = member("u-1");
    let application = pending(&service, &owner, MembershipType::Oc);

    let transition = service
        .reject(&admin("a-1"), application.key(), "เอกสารไม่ครบ")
        .expect("reject");
    assert_eq!(transition.application.status, ApplicationStatus::Rejected);
    assert_eq!(
        transition.application.rejection_reason.as_deref(),
        Some("เอกสารไม่ครบ")
    );

    let page = service
        .conversation(&owner, application.key(), ConversationQuery::default())
        .expect("owner reads ledger");
    assert_eq!(page.entries.len(), 1);
    assert_eq!(page.entries[0].message_type, MessageType::Rejection);
    assert_eq!(page.entries[0].status_before, Some(ApplicationStatus::Pending));
    assert_eq!(page.entries[0].status_after, Some(ApplicationStatus::Rejected));
    assert_eq!(notifier.count(NotificationKind::ApplicationRejected), 1);
}

#[test]
fn resubmission_creates_the_next_version_and_moves_the_identifier() {
    let (service, _) = in_memory();
    let owner = member("u-1");
    let parent = pending(&service, &owner, MembershipType::Oc);
    service
        .reject(&admin("a-1"), parent.key(), "เอกสารไม่ครบ")
        .expect("reject");

    let transition = service
        .resubmit(
            &owner,
            parent.key(),
            Resubmission {
                field_snapshot: fields(MembershipType::Oc),
                comment: Some("ส่งเอกสารครบแล้ว".to_string()),
            },
        )
        .expect("resubmit");
    let child = transition.application;

    assert_eq!(child.id.0, parent.id.0 + 1);
    assert_eq!(child.parent_id, Some(parent.id));
    assert_eq!(child.version, 2);
    assert_eq!(child.status, ApplicationStatus::Pending);
    assert!(
        service
            .application(&owner, parent.key())
            .expect("parent readable")
            .is_archived
    );

    let availability = service
        .check_available(&member("u-9"), MembershipType::Oc, TAX_ID)
        .expect("check");
    assert!(!availability.available);
    let active = availability.active_application.expect("active holder");
    assert_eq!(active.application, child.key());
    assert_eq!(active.status, ApplicationStatus::Pending);
}

#[test]
fn invalid_identifier_is_answered_without_storage() {
    let store = Arc::new(DownStore::default());
    let (service, _) = service_over(store.clone());

    let availability = service
        .check_available(&member("u-1"), MembershipType::Ic, "not-13-digits")
        .expect("answered locally");

    assert!(!availability.available);
    assert_eq!(availability.reason, AvailabilityReason::InvalidFormat);
    assert_eq!(store.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[test]
fn concurrent_approvals_commit_once_and_notify_once() {
    let (service, notifier) = in_memory();
    let application = pending(&service, &member("u-1"), MembershipType::Am);
    let barrier = Arc::new(Barrier::new(2));

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = ["a-1", "a-2"]
            .into_iter()
            .map(|reviewer| {
                let service = service.clone();
                let barrier = barrier.clone();
                let key = application.key();
                scope.spawn(move || {
                    barrier.wait();
                    service.approve(&admin(reviewer), key, None)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("thread completes"))
            .collect()
    });

    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    assert!(results.iter().any(|result| matches!(
        result,
        Err(WorkflowError::InvalidTransition {
            from: ApplicationStatus::Approved,
            ..
        })
    )));
    assert_eq!(notifier.count(NotificationKind::ApplicationApproved), 1);

    let page = service
        .conversation(&admin("a-1"), application.key(), ConversationQuery::default())
        .expect("ledger");
    assert_eq!(page.entries.len(), 1);
}

#[test]
fn transient_store_failures_are_retried() {
    let store = Arc::new(RetryingStore::new(
        FlakyStore::failing(2),
        RetryPolicy::new(3, Duration::ZERO),
    ));
    let (service, _) = service_over(store.clone());

    let draft = service
        .create_or_resume_draft(
            &member("u-1"),
            MembershipType::Ic,
            TAX_ID,
            fields(MembershipType::Ic),
        )
        .expect("third attempt succeeds");
    assert_eq!(draft.membership_type, MembershipType::Ic);
    assert_eq!(
        store
            .inner()
            .failures
            .load(std::sync::atomic::Ordering::SeqCst),
        0
    );
}
