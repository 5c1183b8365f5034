use std::io;

use serde::Serialize;

use super::domain::Application;

/// Columns of the admin CSV export, one row per application.
#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    membership_type: &'a str,
    id: u64,
    version: u32,
    status: &'a str,
    unique_identifier: &'a str,
    owner_user_id: &'a str,
    display_name: String,
    resubmission_count: u32,
    rejection_reason: &'a str,
    created_at: String,
    updated_at: String,
}

impl<'a> ExportRow<'a> {
    fn from_application(application: &'a Application) -> Self {
        Self {
            membership_type: application.membership_type.code(),
            id: application.id.0,
            version: application.version,
            status: application.status.label(),
            unique_identifier: application.unique_identifier.as_str(),
            owner_user_id: &application.owner_user_id.0,
            display_name: display_name(application),
            resubmission_count: application.resubmission_count,
            rejection_reason: application.rejection_reason.as_deref().unwrap_or(""),
            created_at: application.created_at.to_rfc3339(),
            updated_at: application.updated_at.to_rfc3339(),
        }
    }
}

/// Company or association name, falling back to the individual's full name.
fn display_name(application: &Application) -> String {
    let text = |field: &str| {
        application
            .field_snapshot
            .get(field)
            .and_then(|value| value.as_str())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    ["company_name_th", "association_name_th", "company_name_en", "association_name_en"]
        .into_iter()
        .find_map(text)
        .map(str::to_string)
        .unwrap_or_else(|| {
            [text("first_name_th"), text("last_name_th")]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ")
        })
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed to write csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to flush export: {0}")]
    Io(#[from] io::Error),
}

pub fn write_applications_csv<W: io::Write>(
    writer: W,
    applications: &[Application],
) -> Result<(), ExportError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for application in applications {
        csv_writer.serialize(ExportRow::from_application(application))?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn applications_csv(applications: &[Application]) -> Result<Vec<u8>, ExportError> {
    let mut buffer = Vec::new();
    write_applications_csv(&mut buffer, applications)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::membership::domain::{
        ApplicationId, ApplicationStatus, FieldSnapshot, MembershipType, UniqueIdentifier, UserId,
    };
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn application(membership_type: MembershipType, fields: serde_json::Value) -> Application {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).single().expect("valid time");
        Application {
            id: ApplicationId(7),
            membership_type,
            owner_user_id: UserId("member-1".into()),
            unique_identifier: UniqueIdentifier::parse("0105551234567").expect("valid id"),
            status: ApplicationStatus::Rejected,
            version: 2,
            parent_id: Some(ApplicationId(3)),
            is_archived: false,
            field_snapshot: FieldSnapshot::try_from(fields).expect("object"),
            rejection_reason: Some("Missing, \"signed\" form".into()),
            resubmission_count: 1,
            created_at: at,
            updated_at: at,
            rejected_at: Some(at),
            resolved_at: None,
            resubmitted_at: None,
        }
    }

    #[test]
    fn export_writes_header_and_quoted_rows() {
        let rows = [
            application(MembershipType::Oc, json!({ "company_name_th": "บริษัท ทดสอบ จำกัด" })),
            application(
                MembershipType::Ic,
                json!({ "first_name_th": "สมชาย", "last_name_th": "ใจดี" }),
            ),
        ];

        let csv = String::from_utf8(applications_csv(&rows).expect("export")).expect("utf8");
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("membership_type,id,version,status,unique_identifier"));
        assert!(lines[1].starts_with("OC,7,2,rejected,0105551234567,member-1,บริษัท ทดสอบ จำกัด,1,"));
        assert!(lines[1].contains("\"Missing, \"\"signed\"\" form\""));
        assert!(lines[2].contains("สมชาย ใจดี"));
    }
}
