use clap::Args;
use fti_membership::error::AppError;
use fti_membership::workflows::membership::{
    applications_csv, Actor, ApplicationFilter, ConversationQuery, DocumentError,
    DocumentMetadata, DocumentStore, DocumentUpload, DraftUpdate, DocumentUrl, FieldSnapshot,
    InMemoryMembershipStore, MembershipService, MembershipType, Notification, Notifier,
    NotifyError, Resubmission, ResubmissionMode, ValidationError, WorkflowConfig,
};
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Write the final application list as CSV to this path.
    #[arg(long)]
    pub(crate) csv: Option<PathBuf>,
    /// Resubmission behavior: new_version or in_place.
    #[arg(long, default_value = "new_version")]
    pub(crate) mode: ResubmissionMode,
}

const DEMO_TAX_ID: &str = "0105561234567";

/// Keeps notifications in memory so the walkthrough can print them at the end.
#[derive(Default)]
struct DemoNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl Notifier for DemoNotifier {
    fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .map_err(|_| NotifyError::Transport("demo notifier poisoned".to_string()))?
            .push(notification);
        Ok(())
    }
}

struct DemoDocuments;

impl DocumentStore for DemoDocuments {
    fn upload(
        &self,
        bytes: &[u8],
        metadata: DocumentMetadata,
    ) -> Result<DocumentUrl, DocumentError> {
        Ok(DocumentUrl(format!(
            "demo://{}/{}/{} ({} bytes)",
            metadata.owner_user_id,
            metadata.field,
            metadata.file_name,
            bytes.len()
        )))
    }
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs { csv, mode } = args;

    let store = Arc::new(InMemoryMembershipStore::new());
    let notifier = Arc::new(DemoNotifier::default());
    let service = MembershipService::new(
        store,
        notifier.clone(),
        Arc::new(DemoDocuments),
        &WorkflowConfig {
            resubmission_mode: mode,
            ..WorkflowConfig::default()
        },
    );

    let member = Actor::member("member-001", "Somchai Jaidee");
    let rival = Actor::member("member-002", "Somying Rakdee");
    let admin = Actor::admin("admin-001", "FTI Membership Desk");

    println!("FTI membership workflow demo (resubmission mode: {mode:?})");

    let availability = service.check_available(&member, MembershipType::Oc, DEMO_TAX_ID)?;
    println!(
        "- Tax id {DEMO_TAX_ID} available for OC: {} ({:?})",
        availability.available, availability.reason
    );

    let draft = service.create_or_resume_draft(
        &member,
        MembershipType::Oc,
        DEMO_TAX_ID,
        demo_fields(json!({ "company_name_th": "บริษัท สยามโลหะ จำกัด" }))?,
    )?;
    println!(
        "- Draft {} opened by {} at step {}",
        draft.id, member.user_id, draft.current_step
    );

    match service.create_or_resume_draft(
        &rival,
        MembershipType::Ac,
        DEMO_TAX_ID,
        demo_fields(json!({}))?,
    ) {
        Ok(_) => println!("  Unexpected: a second user claimed the same tax id"),
        Err(err) => println!("  Second user blocked: {err}"),
    }

    let draft = service.attach_document(
        &member,
        draft.id,
        DocumentUpload {
            field: "company_certificate".to_string(),
            file_name: "certificate.pdf".to_string(),
            content_type: Some("application/pdf".to_string()),
            bytes: b"%PDF-1.7 demo".to_vec(),
        },
    )?;
    if let Some(url) = draft.field_snapshot.document("company_certificate") {
        println!("  Attachment stored at {url}");
    }

    if let Err(err) = service.submit_draft(&member, draft.id) {
        println!("  Early submit refused: {err}");
    }

    let mut fields = draft.field_snapshot.clone();
    fields.insert("company_name_en", json!("Siam Metal Co., Ltd."));
    fields.insert("address", json!("99 Rama IV Road, Bangkok"));
    fields.insert("factory_type", json!("type_2"));
    service.save_draft(
        &member,
        draft.id,
        DraftUpdate {
            field_snapshot: fields,
            current_step: Some(4),
        },
    )?;

    let submitted = service.submit_draft(&member, draft.id)?.application;
    println!(
        "- Submitted {} (version {}, status {})",
        submitted.key(),
        submitted.version,
        submitted.status
    );

    let rejected = service
        .reject(&admin, submitted.key(), "หนังสือรับรองบริษัทหมดอายุ")?
        .application;
    println!(
        "- Admin rejected {}: {}",
        rejected.key(),
        rejected.rejection_reason.as_deref().unwrap_or("-")
    );

    service.reply(
        &member,
        rejected.key(),
        "แนบหนังสือรับรองฉบับใหม่แล้วค่ะ",
        false,
    )?;

    let resubmitted = service.resubmit(
        &member,
        rejected.key(),
        Resubmission {
            field_snapshot: submitted.field_snapshot.clone(),
            comment: Some("Updated company certificate".to_string()),
        },
    )?;
    let current = resubmitted.application;
    println!(
        "- Resubmitted as {} (version {}, status {})",
        current.key(),
        current.version,
        current.status
    );

    let approved = service
        .approve(&admin, current.key(), Some("Documents verified"))?
        .application;
    println!("- Approved {} -> {}", approved.key(), approved.status);

    let history = service.history(&member, approved.key())?;
    println!("  Recorded versions: {}", history.versions.len());

    println!("\nConversation for {}", rejected.key());
    let page = service.conversation(&admin, rejected.key(), ConversationQuery::default())?;
    for entry in &page.entries {
        println!(
            "  [{:?}] {} ({:?} -> {:?}): {}",
            entry.message_type,
            entry.author_name,
            entry.status_before,
            entry.status_after,
            entry.message
        );
    }
    if approved.key() != rejected.key() {
        let page = service.conversation(&admin, approved.key(), ConversationQuery::default())?;
        println!("Conversation for {}", approved.key());
        for entry in &page.entries {
            println!("  [{:?}] {}: {}", entry.message_type, entry.author_name, entry.message);
        }
    }

    let summary = service.summary(&admin)?;
    println!(
        "\nAdmin summary: {} awaiting review, {} open rejections",
        summary.awaiting_review, summary.open_rejections
    );

    match notifier.sent.lock() {
        Ok(sent) => {
            println!("Notifications:");
            for notification in sent.iter() {
                println!(
                    "  - {:?} -> {} ({})",
                    notification.kind, notification.user_id, notification.application
                );
            }
        }
        Err(_) => println!("Notifications unavailable"),
    }

    if let Some(path) = csv {
        let applications = service.review_queue(
            &admin,
            &ApplicationFilter {
                include_archived: true,
                ..ApplicationFilter::default()
            },
        )?;
        let bytes = applications_csv(&applications)?;
        fs::write(&path, bytes)?;
        println!("\nWrote {} applications to {}", applications.len(), path.display());
    }

    Ok(())
}

fn demo_fields(value: serde_json::Value) -> Result<FieldSnapshot, AppError> {
    FieldSnapshot::try_from(value)
        .map_err(|err: ValidationError| AppError::Workflow(err.into()))
}
