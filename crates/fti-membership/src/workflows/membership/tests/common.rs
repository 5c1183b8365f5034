use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use serde_json::{json, Value};

use crate::workflows::membership::domain::{
    Actor, Application, Draft, FieldSnapshot, MembershipType,
};
use crate::workflows::membership::gateway::{
    DocumentError, DocumentMetadata, DocumentStore, DocumentUrl, Notification, NotificationKind,
    Notifier, NotifyError,
};
use crate::workflows::membership::store::{
    InMemoryMembershipStore, MembershipStore, RepositoryError, StoreFailure, StoreReader,
    UnitOfWork,
};
use crate::workflows::membership::{MembershipService, ResubmissionMode, WorkflowConfig};

pub(super) const TAX_ID: &str = "0105551234567";
pub(super) const NATIONAL_ID: &str = "1100700123456";

pub(super) type TestService =
    MembershipService<InMemoryMembershipStore, RecordingNotifier, MemoryDocuments>;

pub(super) fn member(id: &str) -> Actor {
    Actor::member(id, format!("Member {id}"))
}

pub(super) fn admin() -> Actor {
    Actor::admin("admin-1", "Reviewer One")
}

pub(super) fn workflow_config(mode: ResubmissionMode) -> WorkflowConfig {
    WorkflowConfig {
        resubmission_mode: mode,
        summary_cache_ttl: Duration::from_secs(60),
        conversation_page_size: 10,
        ..WorkflowConfig::default()
    }
}

pub(super) fn snapshot(value: Value) -> FieldSnapshot {
    FieldSnapshot::try_from(value).expect("snapshot is an object")
}

/// Required fields for the type, filled with plausible Thai company data.
pub(super) fn complete_fields(membership_type: MembershipType) -> FieldSnapshot {
    let value = match membership_type {
        MembershipType::Oc => json!({
            "company_name_th": "บริษัท สยามโลหะ จำกัด",
            "company_name_en": "Siam Metal Co., Ltd.",
            "address": "99 Rama IV Road, Bangkok",
            "factory_type": "type_1",
        }),
        MembershipType::Ac => json!({
            "company_name_th": "บริษัท ไทยเทรด จำกัด",
            "company_name_en": "Thai Trade Co., Ltd.",
            "address": "1 Silom Road, Bangkok",
        }),
        MembershipType::Am => json!({
            "association_name_th": "สมาคมผู้ผลิตชิ้นส่วน",
            "association_name_en": "Parts Makers Association",
            "address": "12 Sukhumvit Road, Bangkok",
        }),
        MembershipType::Ic => json!({
            "first_name_th": "สมชาย",
            "last_name_th": "ใจดี",
            "address": "5 Charoen Krung Road, Bangkok",
        }),
    };
    snapshot(value)
}

pub(super) fn build_service() -> (
    TestService,
    Arc<InMemoryMembershipStore>,
    Arc<RecordingNotifier>,
    Arc<MemoryDocuments>,
) {
    build_service_with(ResubmissionMode::NewVersion)
}

pub(super) fn build_service_with(
    mode: ResubmissionMode,
) -> (
    TestService,
    Arc<InMemoryMembershipStore>,
    Arc<RecordingNotifier>,
    Arc<MemoryDocuments>,
) {
    let store = Arc::new(InMemoryMembershipStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let documents = Arc::new(MemoryDocuments::default());
    let service = MembershipService::new(
        store.clone(),
        notifier.clone(),
        documents.clone(),
        &workflow_config(mode),
    );
    (service, store, notifier, documents)
}

pub(super) fn draft_for(
    service: &TestService,
    actor: &Actor,
    membership_type: MembershipType,
    identifier: &str,
) -> Draft {
    service
        .create_or_resume_draft(actor, membership_type, identifier, complete_fields(membership_type))
        .expect("draft created")
}

pub(super) fn submitted(
    service: &TestService,
    actor: &Actor,
    membership_type: MembershipType,
    identifier: &str,
) -> Application {
    let draft = draft_for(service, actor, membership_type, identifier);
    service
        .submit_draft(actor, draft.id)
        .expect("draft promotes")
        .application
}

pub(super) fn rejected(
    service: &TestService,
    actor: &Actor,
    membership_type: MembershipType,
    identifier: &str,
    reason: &str,
) -> Application {
    let application = submitted(service, actor, membership_type, identifier);
    service
        .reject(&admin(), application.key(), reason)
        .expect("pending application rejects")
        .application
}

pub(super) async fn json_body(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body readable");
    serde_json::from_slice(&bytes).expect("json body")
}

pub(super) fn request(method: &str, uri: &str, actor: Option<&Actor>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(actor) = actor {
        builder = builder
            .header("x-user-id", actor.user_id.0.as_str())
            .header("x-user-name", actor.name.as_str())
            .header(
                "x-user-role",
                if actor.is_admin() { "admin" } else { "member" },
            );
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request builds"),
        None => builder.body(Body::empty()).expect("request builds"),
    }
}

#[derive(Default)]
pub(super) struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub(super) fn sent(&self) -> Vec<Notification> {
        self.sent.lock().expect("notifier mutex poisoned").clone()
    }

    pub(super) fn kinds(&self) -> Vec<NotificationKind> {
        self.sent().into_iter().map(|notification| notification.kind).collect()
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

#[derive(Default)]
pub(super) struct FailingNotifier {
    pub(super) attempts: AtomicUsize,
}

impl Notifier for FailingNotifier {
    fn notify(&self, _notification: Notification) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(NotifyError::Transport("smtp relay down".to_string()))
    }
}

#[derive(Default)]
pub(super) struct MemoryDocuments {
    uploads: Mutex<Vec<(DocumentMetadata, usize)>>,
}

impl MemoryDocuments {
    pub(super) fn uploads(&self) -> Vec<(DocumentMetadata, usize)> {
        self.uploads.lock().expect("document mutex poisoned").clone()
    }
}

impl DocumentStore for MemoryDocuments {
    fn upload(&self, bytes: &[u8], metadata: DocumentMetadata) -> Result<DocumentUrl, DocumentError> {
        let url = format!(
            "memory://{}/{}/{}",
            metadata.owner_user_id, metadata.field, metadata.file_name
        );
        self.uploads
            .lock()
            .expect("document mutex poisoned")
            .push((metadata, bytes.len()));
        Ok(DocumentUrl(url))
    }
}

pub(super) struct OfflineDocuments;

impl DocumentStore for OfflineDocuments {
    fn upload(&self, _bytes: &[u8], _metadata: DocumentMetadata) -> Result<DocumentUrl, DocumentError> {
        Err(DocumentError::Unavailable("bucket unreachable".to_string()))
    }
}

/// Store whose backend is down. Counts every call so tests can prove a path never reached it.
#[derive(Default)]
pub(super) struct UnavailableStore {
    pub(super) calls: AtomicUsize,
}

impl UnavailableStore {
    pub(super) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MembershipStore for UnavailableStore {
    fn read<T, E, F>(&self, _work: F) -> Result<T, E>
    where
        F: FnMut(&dyn StoreReader) -> Result<T, E>,
        E: From<RepositoryError> + StoreFailure,
    {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(RepositoryError::Unavailable("primary down".to_string()).into())
    }

    fn transaction<T, E, F>(&self, _work: F) -> Result<T, E>
    where
        F: FnMut(&mut dyn UnitOfWork) -> Result<T, E>,
        E: From<RepositoryError> + StoreFailure,
    {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(RepositoryError::Unavailable("primary down".to_string()).into())
    }
}
