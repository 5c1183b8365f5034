use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::domain::{ApplicationKey, UserId};

/// Outbound notification hook (e-mail, LINE, in-app inbox adapters).
///
/// Delivery is best-effort: callers invoke it after the transaction commits and only log
/// failures. Implementations should hand the payload off rather than block on delivery.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    SubmissionReceived,
    ApplicationApproved,
    ApplicationRejected,
    ResubmissionReceived,
    RejectionResolved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: UserId,
    pub kind: NotificationKind,
    pub application: ApplicationKey,
    pub payload: BTreeMap<String, String>,
}

impl Notification {
    pub fn new(user_id: UserId, kind: NotificationKind, application: ApplicationKey) -> Self {
        Self {
            user_id,
            kind,
            application,
            payload: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

/// Attachment storage. The workflow keeps only the returned URL, never the bytes.
pub trait DocumentStore: Send + Sync {
    fn upload(&self, bytes: &[u8], metadata: DocumentMetadata) -> Result<DocumentUrl, DocumentError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub owner_user_id: UserId,
    pub field: String,
    pub file_name: String,
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentUrl(pub String);

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("document rejected: {0}")]
    Rejected(String),
    #[error("document storage unavailable: {0}")]
    Unavailable(String),
}
