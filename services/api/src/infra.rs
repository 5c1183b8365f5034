use chrono::Utc;
use fti_membership::config::DocumentConfig;
use fti_membership::workflows::membership::{
    DocumentError, DocumentMetadata, DocumentStore, DocumentUrl, Notification, Notifier,
    NotifyError,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Hands notifications to a background task so request handlers never wait on delivery.
///
/// The drain task only logs; an e-mail or LINE adapter would replace the body of the loop.
#[derive(Clone)]
pub(crate) struct QueuedNotifier {
    sender: mpsc::UnboundedSender<Notification>,
}

impl QueuedNotifier {
    /// Must be called from inside a Tokio runtime.
    pub(crate) fn spawn() -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Notification>();
        tokio::spawn(async move {
            while let Some(notification) = receiver.recv().await {
                info!(
                    user = %notification.user_id,
                    kind = ?notification.kind,
                    application = %notification.application,
                    payload = ?notification.payload,
                    "notification dispatched"
                );
            }
            debug!("notification queue closed");
        });
        Self { sender }
    }

    #[cfg(test)]
    fn with_sender(sender: mpsc::UnboundedSender<Notification>) -> Self {
        Self { sender }
    }
}

impl Notifier for QueuedNotifier {
    fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        self.sender
            .send(notification)
            .map_err(|_| NotifyError::Transport("notification queue closed".to_string()))
    }
}

/// Writes attachments below a local directory and serves them from a public base URL.
#[derive(Debug, Clone)]
pub(crate) struct LocalDocumentStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalDocumentStore {
    pub(crate) fn new(config: &DocumentConfig) -> Self {
        Self {
            root: config.root.clone(),
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl DocumentStore for LocalDocumentStore {
    fn upload(
        &self,
        bytes: &[u8],
        metadata: DocumentMetadata,
    ) -> Result<DocumentUrl, DocumentError> {
        if bytes.is_empty() {
            return Err(DocumentError::Rejected("file is empty".to_string()));
        }

        let owner = sanitize(&metadata.owner_user_id.0);
        let field = sanitize(&metadata.field);
        let file_name = format!(
            "{}-{}",
            Utc::now().timestamp_millis(),
            with_extension(&sanitize(&metadata.file_name), &metadata.content_type)
        );

        let directory = self.root.join(&owner).join(&field);
        fs::create_dir_all(&directory)
            .and_then(|_| fs::write(directory.join(&file_name), bytes))
            .map_err(|err| DocumentError::Unavailable(err.to_string()))?;

        debug!(%owner, %field, %file_name, size = bytes.len(), "document stored");
        Ok(DocumentUrl(format!(
            "{}/{owner}/{field}/{file_name}",
            self.public_base_url
        )))
    }
}

fn sanitize(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Appends an extension matching the declared content type when the name does not carry one
/// that `mime_guess` maps back to it.
fn with_extension(file_name: &str, content_type: &str) -> String {
    let matches_type = mime_guess::from_path(file_name)
        .iter()
        .any(|guess| guess.essence_str() == content_type);
    if matches_type {
        return file_name.to_string();
    }

    match mime_guess::get_mime_extensions_str(content_type).and_then(|exts| exts.first()) {
        Some(extension) => format!("{file_name}.{extension}"),
        None => file_name.to_string(),
    }
}
