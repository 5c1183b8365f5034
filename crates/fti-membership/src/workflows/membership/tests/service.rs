use super::common::*;
use crate::workflows::membership::conversation::ConversationQuery;
use crate::workflows::membership::domain::{ApplicationStatus, MembershipType, MessageType};
use crate::workflows::membership::errors::{ConflictReason, ValidationError, WorkflowError};
use crate::workflows::membership::gateway::NotificationKind;
use crate::workflows::membership::state_machine::ResubmissionMode;
use crate::workflows::membership::store::{ApplicationFilter, MembershipStore, StoreReader};
use crate::workflows::membership::uniqueness::AvailabilityReason;
use crate::workflows::membership::Resubmission;
use serde_json::json;

fn resubmission(membership_type: MembershipType, comment: Option<&str>) -> Resubmission {
    let mut fields = complete_fields(membership_type);
    fields.insert("address", json!("101 New Petchburi Road, Bangkok"));
    Resubmission {
        field_snapshot: fields,
        comment: comment.map(str::to_string),
    }
}

#[test]
fn versioned_resubmission_archives_the_parent_and_creates_a_child() {
    let (service, store, notifier, _) = build_service_with(ResubmissionMode::NewVersion);
    let owner = member("u-1");
    let parent = rejected(&service, &owner, MembershipType::Oc, TAX_ID, "เอกสารไม่ครบ");

    let transition = service
        .resubmit(&owner, parent.key(), resubmission(MembershipType::Oc, Some("แก้ไขแล้ว")))
        .expect("resubmit");
    let child = &transition.application;
    let archived = transition.superseded.as_ref().expect("parent returned");

    assert_eq!(child.version, parent.version + 1);
    assert_eq!(child.parent_id, Some(parent.id));
    assert_ne!(child.id, parent.id);
    assert_eq!(child.status, ApplicationStatus::Pending);
    assert!(archived.is_archived);
    assert_eq!(archived.status, ApplicationStatus::Archived);

    let stored_parent = store
        .read(|reader: &dyn StoreReader| {
            Ok::<_, WorkflowError>(reader.application(parent.key())?)
        })
        .expect("read")
        .expect("parent kept");
    assert!(stored_parent.is_archived);

    let availability = service
        .check_available(&member("u-2"), MembershipType::Oc, TAX_ID)
        .expect("check");
    assert_eq!(availability.reason, AvailabilityReason::ActiveApplicationExists);
    let active = availability.active_application.expect("holder");
    assert_eq!(active.application, child.key());
    assert_eq!(active.status, ApplicationStatus::Pending);

    let page = service
        .conversation(&owner, child.key(), ConversationQuery::default())
        .expect("child conversation");
    assert_eq!(page.entries.len(), 1);
    assert_eq!(page.entries[0].message_type, MessageType::Resubmission);
    assert_eq!(page.entries[0].message, "แก้ไขแล้ว");
    assert_eq!(page.entries[0].status_before, Some(ApplicationStatus::Rejected));
    assert_eq!(page.entries[0].status_after, Some(ApplicationStatus::Pending));
    assert_eq!(notifier.kinds().last(), Some(&NotificationKind::ResubmissionReceived));
}

#[test]
fn in_place_resubmission_reuses_the_row() {
    let (service, _, _, _) = build_service_with(ResubmissionMode::InPlace);
    let owner = member("u-1");
    let application = rejected(&service, &owner, MembershipType::Ic, NATIONAL_ID, "รูปถ่ายไม่ชัด");

    let transition = service
        .resubmit(&owner, application.key(), resubmission(MembershipType::Ic, None))
        .expect("resubmit");

    assert_eq!(transition.application.key(), application.key());
    assert_eq!(transition.application.status, ApplicationStatus::Resubmitted);
    assert_eq!(transition.application.version, 2);
    assert_eq!(transition.application.rejection_reason, None);
    assert!(transition.superseded.is_none());

    let approved = service
        .approve(&admin(), application.key(), None)
        .expect("resubmitted rows are reviewable");
    assert_eq!(approved.status_before, ApplicationStatus::Resubmitted);
}

#[test]
fn resubmitting_requires_a_rejected_application() {
    let (service, _, _, _) = build_service();
    let owner = member("u-1");
    let application = submitted(&service, &owner, MembershipType::Oc, TAX_ID);

    assert!(matches!(
        service.resubmit(&owner, application.key(), resubmission(MembershipType::Oc, None)),
        Err(WorkflowError::InvalidTransition {
            from: ApplicationStatus::Pending,
            ..
        })
    ));
}

#[test]
fn resubmission_validates_fields_and_ownership() {
    let (service, _, _, _) = build_service();
    let owner = member("u-1");
    let application = rejected(&service, &owner, MembershipType::Oc, TAX_ID, "เอกสารไม่ครบ");

    assert!(matches!(
        service.resubmit(
            &member("u-2"),
            application.key(),
            resubmission(MembershipType::Oc, None)
        ),
        Err(WorkflowError::NotFound)
    ));
    assert!(matches!(
        service.resubmit(
            &owner,
            application.key(),
            Resubmission {
                field_snapshot: snapshot(json!({ "company_name_th": "บริษัท สยามโลหะ จำกัด" })),
                comment: None,
            }
        ),
        Err(WorkflowError::Validation(ValidationError::MissingFields(_)))
    ));
    assert_eq!(
        service.application(&owner, application.key()).expect("read").status,
        ApplicationStatus::Rejected
    );
}

#[test]
fn resubmission_keeps_earlier_attachments() {
    let (service, _, _, _) = build_service();
    let owner = member("u-1");
    let draft = draft_for(&service, &owner, MembershipType::Oc, TAX_ID);
    service
        .attach_document(
            &owner,
            draft.id,
            crate::workflows::membership::DocumentUpload {
                field: "company_certificate".to_string(),
                file_name: "cert.png".to_string(),
                content_type: Some("image/png".to_string()),
                bytes: vec![0x89, 0x50, 0x4e, 0x47],
            },
        )
        .expect("upload");
    let key = service.submit_draft(&owner, draft.id).expect("submit").application.key();
    service.reject(&admin(), key, "เอกสารไม่ครบ").expect("reject");

    let child = service
        .resubmit(&owner, key, resubmission(MembershipType::Oc, None))
        .expect("resubmit")
        .application;
    assert_eq!(
        child.field_snapshot.document("company_certificate"),
        Some("memory://u-1/company_certificate/cert.png")
    );
}

#[test]
fn repeated_rejections_count_resubmissions_and_history_follows_the_chain() {
    let (service, _, _, _) = build_service();
    let owner = member("u-1");
    let first = rejected(&service, &owner, MembershipType::Am, TAX_ID, "ขาดรายชื่อกรรมการ");
    assert_eq!(first.resubmission_count, 0);

    let second = service
        .resubmit(&owner, first.key(), resubmission(MembershipType::Am, None))
        .expect("resubmit")
        .application;
    let second = service
        .reject(&admin(), second.key(), "ขาดตราประทับ")
        .expect("reject again")
        .application;
    assert_eq!(second.version, 2);
    assert_eq!(second.resubmission_count, 1);

    let third = service
        .resubmit(&owner, second.key(), resubmission(MembershipType::Am, None))
        .expect("resubmit again")
        .application;
    assert_eq!(third.version, 3);

    let history = service.history(&owner, third.key()).expect("history");
    let versions: Vec<u32> = history.versions.iter().map(|record| record.version).collect();
    assert_eq!(versions, vec![1, 2, 3]);
    assert_eq!(history.application.key(), third.key());

    let archived = service
        .review_queue(
            &admin(),
            &ApplicationFilter {
                include_archived: true,
                ..ApplicationFilter::default()
            },
        )
        .expect("queue");
    assert_eq!(archived.iter().filter(|application| application.is_archived).count(), 2);
    assert_eq!(archived.iter().filter(|application| application.is_active()).count(), 1);
}

#[test]
fn active_identifier_blocks_new_drafts_in_every_type() {
    let (service, _, _, _) = build_service();
    submitted(&service, &member("u-1"), MembershipType::Oc, TAX_ID);

    for membership_type in [MembershipType::Oc, MembershipType::Ac, MembershipType::Am] {
        assert!(matches!(
            service.create_or_resume_draft(
                &member("u-1"),
                membership_type,
                TAX_ID,
                complete_fields(membership_type)
            ),
            Err(WorkflowError::Conflict(ConflictReason::ActiveApplicationExists))
        ));
    }
}

#[test]
fn store_outage_surfaces_as_dependency_failure() {
    use std::sync::Arc;

    let store = Arc::new(UnavailableStore::default());
    let service = crate::workflows::membership::MembershipService::new(
        store.clone(),
        Arc::new(RecordingNotifier::default()),
        Arc::new(MemoryDocuments::default()),
        &workflow_config(ResubmissionMode::NewVersion),
    );

    let result = service.create_or_resume_draft(
        &member("u-1"),
        MembershipType::Oc,
        TAX_ID,
        complete_fields(MembershipType::Oc),
    );
    match result {
        Err(error @ WorkflowError::Dependency(_)) => {
            assert!(crate::workflows::membership::StoreFailure::is_transient(&error));
        }
        other => panic!("expected dependency failure, got {other:?}"),
    }
    assert_eq!(store.calls(), 1);
}
