use std::sync::Arc;

use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequestParts, Path, Query, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;

use super::conversation::ConversationQuery;
use super::domain::{
    Actor, ApplicationId, ApplicationKey, DraftId, FieldSnapshot, MembershipType, RejectionId,
    Role, UserId,
};
use super::drafts::{DocumentUpload, DraftUpdate};
use super::errors::{ValidationError, WorkflowError};
use super::export::applications_csv;
use super::gateway::{DocumentError, DocumentStore, Notifier};
use super::service::{MembershipService, Resubmission};
use super::store::{ApplicationFilter, MembershipStore, RepositoryError};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const USER_NAME_HEADER: &str = "x-user-name";

type SharedService<S, N, D> = Arc<MembershipService<S, N, D>>;

/// Router builder exposing the member portal and admin back-office endpoints.
pub fn membership_router<S, N, D>(service: SharedService<S, N, D>) -> Router
where
    S: MembershipStore + 'static,
    N: Notifier + 'static,
    D: DocumentStore + 'static,
{
    Router::new()
        .route("/api/v1/availability", get(availability_handler::<S, N, D>))
        .route(
            "/api/v1/drafts",
            get(list_drafts_handler::<S, N, D>).post(create_draft_handler::<S, N, D>),
        )
        .route(
            "/api/v1/drafts/:draft_id",
            get(get_draft_handler::<S, N, D>)
                .put(save_draft_handler::<S, N, D>)
                .delete(delete_draft_handler::<S, N, D>),
        )
        .route(
            "/api/v1/drafts/:draft_id/submit",
            post(submit_draft_handler::<S, N, D>),
        )
        .route(
            "/api/v1/drafts/:draft_id/documents/:field",
            post(upload_document_handler::<S, N, D>),
        )
        .route(
            "/api/v1/applications/:membership_type/:id",
            get(application_handler::<S, N, D>),
        )
        .route(
            "/api/v1/applications/:membership_type/:id/history",
            get(history_handler::<S, N, D>),
        )
        .route(
            "/api/v1/applications/:membership_type/:id/approve",
            post(approve_handler::<S, N, D>),
        )
        .route(
            "/api/v1/applications/:membership_type/:id/reject",
            post(reject_handler::<S, N, D>),
        )
        .route(
            "/api/v1/applications/:membership_type/:id/resubmit",
            post(resubmit_handler::<S, N, D>),
        )
        .route(
            "/api/v1/applications/:membership_type/:id/conversations",
            get(conversation_handler::<S, N, D>).post(reply_handler::<S, N, D>),
        )
        .route(
            "/api/v1/rejections/:rejection_id/resolve",
            post(resolve_handler::<S, N, D>),
        )
        .route(
            "/api/v1/admin/applications",
            get(review_queue_handler::<S, N, D>),
        )
        .route(
            "/api/v1/admin/applications/export",
            get(export_handler::<S, N, D>),
        )
        .route("/api/v1/admin/summary", get(summary_handler::<S, N, D>))
        .with_state(service)
}

/// Caller identity taken from the headers set by the upstream session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentActor(pub Actor);

#[async_trait]
impl<T> FromRequestParts<T> for CurrentActor
where
    T: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &T) -> Result<Self, Self::Rejection> {
        actor_from_headers(&parts.headers)
            .map(CurrentActor)
            .ok_or_else(|| {
                let payload = json!({
                    "error": "missing caller identity",
                    "code": "unauthenticated",
                });
                (StatusCode::UNAUTHORIZED, axum::Json(payload)).into_response()
            })
    }
}

fn actor_from_headers(headers: &HeaderMap) -> Option<Actor> {
    let text = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    let user_id = text(USER_ID_HEADER)?;
    let role = match text(USER_ROLE_HEADER) {
        Some(role) if role.eq_ignore_ascii_case("admin") => Role::Admin,
        _ => Role::Member,
    };
    Some(Actor {
        user_id: UserId(user_id.to_string()),
        name: text(USER_NAME_HEADER).unwrap_or(user_id).to_string(),
        role,
    })
}

/// Maps workflow failures onto status codes with a stable `code` for clients.
pub fn error_response(error: WorkflowError) -> Response {
    let (status, payload) = match &error {
        WorkflowError::Validation(ValidationError::MissingFields(fields)) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({
                "error": error.to_string(),
                "code": "missing_field",
                "fields": fields,
            }),
        ),
        WorkflowError::Validation(validation) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({ "error": error.to_string(), "code": validation.code() }),
        ),
        WorkflowError::Conflict(reason) => (
            StatusCode::CONFLICT,
            json!({ "error": error.to_string(), "code": reason.code() }),
        ),
        WorkflowError::InvalidTransition { from, event } => (
            StatusCode::CONFLICT,
            json!({
                "error": error.to_string(),
                "code": "invalid_transition",
                "status": from,
                "event": event,
            }),
        ),
        WorkflowError::NotFound => (
            StatusCode::NOT_FOUND,
            json!({ "error": "not found", "code": "not_found" }),
        ),
        WorkflowError::Forbidden => (
            StatusCode::FORBIDDEN,
            json!({ "error": "forbidden", "code": "forbidden" }),
        ),
        WorkflowError::Document(DocumentError::Rejected(_)) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({ "error": error.to_string(), "code": "document_rejected" }),
        ),
        WorkflowError::Dependency(_) | WorkflowError::Document(DocumentError::Unavailable(_)) => {
            tracing::error!(%error, "dependency failure");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "error": error.to_string(), "code": "dependency_unavailable" }),
            )
        }
    };

    (status, axum::Json(payload)).into_response()
}

/// Runs a synchronous service call on tokio's blocking pool. Store retries back off with
/// `thread::sleep` and document stores may write to disk.
async fn blocking<S, N, D, T, F>(
    service: SharedService<S, N, D>,
    call: F,
) -> Result<T, WorkflowError>
where
    S: MembershipStore + 'static,
    N: Notifier + 'static,
    D: DocumentStore + 'static,
    T: Send + 'static,
    F: FnOnce(&MembershipService<S, N, D>) -> Result<T, WorkflowError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || call(&service))
        .await
        .unwrap_or_else(|error| {
            Err(WorkflowError::Dependency(RepositoryError::Unavailable(format!(
                "membership task aborted: {error}"
            ))))
        })
}

fn respond<T: serde::Serialize>(status: StatusCode, result: Result<T, WorkflowError>) -> Response {
    match result {
        Ok(body) => (status, axum::Json(body)).into_response(),
        Err(error) => error_response(error),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct AvailabilityQuery {
    pub(crate) membership_type: MembershipType,
    pub(crate) unique_identifier: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateDraftRequest {
    pub(crate) membership_type: MembershipType,
    pub(crate) unique_identifier: String,
    #[serde(default)]
    pub(crate) field_snapshot: FieldSnapshot,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct NoteRequest {
    #[serde(default)]
    pub(crate) note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RejectRequest {
    pub(crate) reason: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReplyRequest {
    pub(crate) message: String,
    #[serde(default)]
    pub(crate) internal: bool,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct UploadQuery {
    #[serde(default)]
    pub(crate) file_name: Option<String>,
}

pub(crate) async fn availability_handler<S, N, D>(
    State(service): State<SharedService<S, N, D>>,
    CurrentActor(actor): CurrentActor,
    Query(query): Query<AvailabilityQuery>,
) -> Response
where
    S: MembershipStore + 'static,
    N: Notifier + 'static,
    D: DocumentStore + 'static,
{
    let result = blocking(service, move |service| {
        service.check_available(&actor, query.membership_type, &query.unique_identifier)
    })
    .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn list_drafts_handler<S, N, D>(
    State(service): State<SharedService<S, N, D>>,
    CurrentActor(actor): CurrentActor,
) -> Response
where
    S: MembershipStore + 'static,
    N: Notifier + 'static,
    D: DocumentStore + 'static,
{
    let result = blocking(service, move |service| service.list_drafts(&actor)).await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn create_draft_handler<S, N, D>(
    State(service): State<SharedService<S, N, D>>,
    CurrentActor(actor): CurrentActor,
    axum::Json(request): axum::Json<CreateDraftRequest>,
) -> Response
where
    S: MembershipStore + 'static,
    N: Notifier + 'static,
    D: DocumentStore + 'static,
{
    let result = blocking(service, move |service| {
        service.create_or_resume_draft(
            &actor,
            request.membership_type,
            &request.unique_identifier,
            request.field_snapshot,
        )
    })
    .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn get_draft_handler<S, N, D>(
    State(service): State<SharedService<S, N, D>>,
    CurrentActor(actor): CurrentActor,
    Path(draft_id): Path<u64>,
) -> Response
where
    S: MembershipStore + 'static,
    N: Notifier + 'static,
    D: DocumentStore + 'static,
{
    let result = blocking(service, move |service| service.draft(&actor, DraftId(draft_id))).await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn save_draft_handler<S, N, D>(
    State(service): State<SharedService<S, N, D>>,
    CurrentActor(actor): CurrentActor,
    Path(draft_id): Path<u64>,
    axum::Json(update): axum::Json<DraftUpdate>,
) -> Response
where
    S: MembershipStore + 'static,
    N: Notifier + 'static,
    D: DocumentStore + 'static,
{
    let result = blocking(service, move |service| {
        service.save_draft(&actor, DraftId(draft_id), update)
    })
    .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn delete_draft_handler<S, N, D>(
    State(service): State<SharedService<S, N, D>>,
    CurrentActor(actor): CurrentActor,
    Path(draft_id): Path<u64>,
) -> Response
where
    S: MembershipStore + 'static,
    N: Notifier + 'static,
    D: DocumentStore + 'static,
{
    let result = blocking(service, move |service| {
        service.delete_draft(&actor, DraftId(draft_id))
    })
    .await;
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn submit_draft_handler<S, N, D>(
    State(service): State<SharedService<S, N, D>>,
    CurrentActor(actor): CurrentActor,
    Path(draft_id): Path<u64>,
) -> Response
where
    S: MembershipStore + 'static,
    N: Notifier + 'static,
    D: DocumentStore + 'static,
{
    let result = blocking(service, move |service| {
        service
            .submit_draft(&actor, DraftId(draft_id))
            .map(|transition| transition.application)
    })
    .await;
    respond(StatusCode::CREATED, result)
}

pub(crate) async fn upload_document_handler<S, N, D>(
    State(service): State<SharedService<S, N, D>>,
    CurrentActor(actor): CurrentActor,
    Path((draft_id, field)): Path<(u64, String)>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    S: MembershipStore + 'static,
    N: Notifier + 'static,
    D: DocumentStore + 'static,
{
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let upload = DocumentUpload {
        file_name: query.file_name.unwrap_or_else(|| field.clone()),
        field,
        content_type,
        bytes: body.to_vec(),
    };

    let result = blocking(service, move |service| {
        service.attach_document(&actor, DraftId(draft_id), upload)
    })
    .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn application_handler<S, N, D>(
    State(service): State<SharedService<S, N, D>>,
    CurrentActor(actor): CurrentActor,
    Path((membership_type, id)): Path<(MembershipType, u64)>,
) -> Response
where
    S: MembershipStore + 'static,
    N: Notifier + 'static,
    D: DocumentStore + 'static,
{
    let key = ApplicationKey::new(membership_type, ApplicationId(id));
    let result = blocking(service, move |service| service.application(&actor, key)).await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn history_handler<S, N, D>(
    State(service): State<SharedService<S, N, D>>,
    CurrentActor(actor): CurrentActor,
    Path((membership_type, id)): Path<(MembershipType, u64)>,
) -> Response
where
    S: MembershipStore + 'static,
    N: Notifier + 'static,
    D: DocumentStore + 'static,
{
    let key = ApplicationKey::new(membership_type, ApplicationId(id));
    let result = blocking(service, move |service| service.history(&actor, key)).await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn approve_handler<S, N, D>(
    State(service): State<SharedService<S, N, D>>,
    CurrentActor(actor): CurrentActor,
    Path((membership_type, id)): Path<(MembershipType, u64)>,
    request: Option<axum::Json<NoteRequest>>,
) -> Response
where
    S: MembershipStore + 'static,
    N: Notifier + 'static,
    D: DocumentStore + 'static,
{
    let key = ApplicationKey::new(membership_type, ApplicationId(id));
    let note = request.and_then(|axum::Json(request)| request.note);
    let result = blocking(service, move |service| {
        service.approve(&actor, key, note.as_deref())
    })
    .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn reject_handler<S, N, D>(
    State(service): State<SharedService<S, N, D>>,
    CurrentActor(actor): CurrentActor,
    Path((membership_type, id)): Path<(MembershipType, u64)>,
    axum::Json(request): axum::Json<RejectRequest>,
) -> Response
where
    S: MembershipStore + 'static,
    N: Notifier + 'static,
    D: DocumentStore + 'static,
{
    let key = ApplicationKey::new(membership_type, ApplicationId(id));
    let result = blocking(service, move |service| {
        service.reject(&actor, key, &request.reason)
    })
    .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn resubmit_handler<S, N, D>(
    State(service): State<SharedService<S, N, D>>,
    CurrentActor(actor): CurrentActor,
    Path((membership_type, id)): Path<(MembershipType, u64)>,
    axum::Json(resubmission): axum::Json<Resubmission>,
) -> Response
where
    S: MembershipStore + 'static,
    N: Notifier + 'static,
    D: DocumentStore + 'static,
{
    let key = ApplicationKey::new(membership_type, ApplicationId(id));
    let result = blocking(service, move |service| {
        service
            .resubmit(&actor, key, resubmission)
            .map(|transition| transition.application)
    })
    .await;
    respond(StatusCode::CREATED, result)
}

pub(crate) async fn conversation_handler<S, N, D>(
    State(service): State<SharedService<S, N, D>>,
    CurrentActor(actor): CurrentActor,
    Path((membership_type, id)): Path<(MembershipType, u64)>,
    Query(query): Query<ConversationQuery>,
) -> Response
where
    S: MembershipStore + 'static,
    N: Notifier + 'static,
    D: DocumentStore + 'static,
{
    let key = ApplicationKey::new(membership_type, ApplicationId(id));
    let result = blocking(service, move |service| service.conversation(&actor, key, query)).await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn reply_handler<S, N, D>(
    State(service): State<SharedService<S, N, D>>,
    CurrentActor(actor): CurrentActor,
    Path((membership_type, id)): Path<(MembershipType, u64)>,
    axum::Json(request): axum::Json<ReplyRequest>,
) -> Response
where
    S: MembershipStore + 'static,
    N: Notifier + 'static,
    D: DocumentStore + 'static,
{
    let key = ApplicationKey::new(membership_type, ApplicationId(id));
    let result = blocking(service, move |service| {
        service.reply(&actor, key, &request.message, request.internal)
    })
    .await;
    respond(StatusCode::CREATED, result)
}

pub(crate) async fn resolve_handler<S, N, D>(
    State(service): State<SharedService<S, N, D>>,
    CurrentActor(actor): CurrentActor,
    Path(rejection_id): Path<u64>,
    request: Option<axum::Json<NoteRequest>>,
) -> Response
where
    S: MembershipStore + 'static,
    N: Notifier + 'static,
    D: DocumentStore + 'static,
{
    let note = request.and_then(|axum::Json(request)| request.note);
    let result = blocking(service, move |service| {
        service
            .resolve_rejection(&actor, RejectionId(rejection_id), note.as_deref())
            .map(|transition| transition.application)
    })
    .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn review_queue_handler<S, N, D>(
    State(service): State<SharedService<S, N, D>>,
    CurrentActor(actor): CurrentActor,
    Query(filter): Query<ApplicationFilter>,
) -> Response
where
    S: MembershipStore + 'static,
    N: Notifier + 'static,
    D: DocumentStore + 'static,
{
    let result = blocking(service, move |service| service.review_queue(&actor, &filter)).await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn export_handler<S, N, D>(
    State(service): State<SharedService<S, N, D>>,
    CurrentActor(actor): CurrentActor,
    Query(filter): Query<ApplicationFilter>,
) -> Response
where
    S: MembershipStore + 'static,
    N: Notifier + 'static,
    D: DocumentStore + 'static,
{
    let result = blocking(service, move |service| service.review_queue(&actor, &filter)).await;
    let applications = match result {
        Ok(applications) => applications,
        Err(error) => return error_response(error),
    };

    match applications_csv(&applications) {
        Ok(csv) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"membership-applications.csv\"",
                ),
            ],
            csv,
        )
            .into_response(),
        Err(error) => {
            let payload = json!({
                "error": error.to_string(),
                "code": "export_failed",
            });
            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
        }
    }
}

pub(crate) async fn summary_handler<S, N, D>(
    State(service): State<SharedService<S, N, D>>,
    CurrentActor(actor): CurrentActor,
) -> Response
where
    S: MembershipStore + 'static,
    N: Notifier + 'static,
    D: DocumentStore + 'static,
{
    let result = blocking(service, move |service| service.summary(&actor)).await;
    respond(StatusCode::OK, result)
}
