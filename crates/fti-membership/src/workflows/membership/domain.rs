use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::errors::ValidationError;

/// Membership classes offered by the federation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MembershipType {
    /// Ordinary member operating a factory.
    #[serde(rename = "OC", alias = "oc")]
    Oc,
    /// Associate member registered as a corporation.
    #[serde(rename = "AC", alias = "ac")]
    Ac,
    /// Ordinary member representing a trade association.
    #[serde(rename = "AM", alias = "am")]
    Am,
    /// Associate member applying as an individual.
    #[serde(rename = "IC", alias = "ic")]
    Ic,
}

/// Which national register the unique identifier comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    TaxId,
    NationalId,
}

const OC_REQUIRED: &[&str] = &[
    "company_name_th",
    "company_name_en",
    "address",
    "factory_type",
];
const AC_REQUIRED: &[&str] = &["company_name_th", "company_name_en", "address"];
const AM_REQUIRED: &[&str] = &["association_name_th", "association_name_en", "address"];
const IC_REQUIRED: &[&str] = &["first_name_th", "last_name_th", "address"];

impl MembershipType {
    pub const ALL: [MembershipType; 4] = [
        MembershipType::Oc,
        MembershipType::Ac,
        MembershipType::Am,
        MembershipType::Ic,
    ];

    pub const fn code(self) -> &'static str {
        match self {
            MembershipType::Oc => "OC",
            MembershipType::Ac => "AC",
            MembershipType::Am => "AM",
            MembershipType::Ic => "IC",
        }
    }

    pub const fn identifier_kind(self) -> IdentifierKind {
        match self {
            MembershipType::Ic => IdentifierKind::NationalId,
            MembershipType::Oc | MembershipType::Ac | MembershipType::Am => IdentifierKind::TaxId,
        }
    }

    /// Form fields that must be filled before an application leaves the draft stage.
    pub const fn required_fields(self) -> &'static [&'static str] {
        match self {
            MembershipType::Oc => OC_REQUIRED,
            MembershipType::Ac => AC_REQUIRED,
            MembershipType::Am => AM_REQUIRED,
            MembershipType::Ic => IC_REQUIRED,
        }
    }
}

impl fmt::Display for MembershipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for MembershipType {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "OC" => Ok(MembershipType::Oc),
            "AC" => Ok(MembershipType::Ac),
            "AM" => Ok(MembershipType::Am),
            "IC" => Ok(MembershipType::Ic),
            _ => Err(ValidationError::UnknownMembershipType(value.to_string())),
        }
    }
}

/// Thirteen digit tax id or national id card number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UniqueIdentifier(String);

impl UniqueIdentifier {
    pub const LENGTH: usize = 13;

    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        if raw.len() == Self::LENGTH && raw.bytes().all(|byte| byte.is_ascii_digit()) {
            Ok(Self(raw.to_string()))
        } else {
            Err(ValidationError::InvalidFormat)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UniqueIdentifier {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<UniqueIdentifier> for String {
    fn from(value: UniqueIdentifier) -> Self {
        value.0
    }
}

impl fmt::Display for UniqueIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of an application, unique within its membership type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApplicationId(pub u64);

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Storage key of an application: the id alone is only unique per type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApplicationKey {
    pub membership_type: MembershipType,
    pub id: ApplicationId,
}

impl ApplicationKey {
    pub const fn new(membership_type: MembershipType, id: ApplicationId) -> Self {
        Self {
            membership_type,
            id,
        }
    }
}

impl fmt::Display for ApplicationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.membership_type, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DraftId(pub u64);

impl fmt::Display for DraftId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RejectionId(pub u64);

impl fmt::Display for RejectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Member,
    Admin,
}

/// Caller identity as supplied by the session provider. Trusted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub name: String,
    pub role: Role,
}

impl Actor {
    pub fn member(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            user_id: UserId(user_id.into()),
            name: name.into(),
            role: Role::Member,
        }
    }

    pub fn admin(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            user_id: UserId(user_id.into()),
            name: name.into(),
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Owners see their own records; admins see everything.
    pub fn can_access(&self, owner: &UserId) -> bool {
        self.is_admin() || &self.user_id == owner
    }

    pub fn author_type(&self) -> AuthorType {
        match self.role {
            Role::Admin => AuthorType::Admin,
            Role::Member => AuthorType::User,
        }
    }
}

/// Lifecycle status of an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Draft,
    Pending,
    Approved,
    Rejected,
    Resubmitted,
    Archived,
}

impl ApplicationStatus {
    pub const ALL: [ApplicationStatus; 6] = [
        ApplicationStatus::Draft,
        ApplicationStatus::Pending,
        ApplicationStatus::Approved,
        ApplicationStatus::Rejected,
        ApplicationStatus::Resubmitted,
        ApplicationStatus::Archived,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            ApplicationStatus::Draft => "draft",
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Approved => "approved",
            ApplicationStatus::Rejected => "rejected",
            ApplicationStatus::Resubmitted => "resubmitted",
            ApplicationStatus::Archived => "archived",
        }
    }

    /// Statuses that hold the unique identifier. `Resubmitted` only occurs for in-place
    /// resubmission, where it is awaiting review just like `Pending`.
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            ApplicationStatus::Pending | ApplicationStatus::Resubmitted | ApplicationStatus::Approved
        )
    }

    /// Statuses an admin may approve or reject from.
    pub const fn is_awaiting_review(self) -> bool {
        matches!(
            self,
            ApplicationStatus::Pending | ApplicationStatus::Resubmitted
        )
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ApplicationStatus {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ApplicationStatus::ALL
            .into_iter()
            .find(|status| status.label().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| ValidationError::UnknownStatus(value.to_string()))
    }
}

/// Form payload captured at the last save. Always a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct FieldSnapshot(Map<String, Value>);

const DOCUMENTS_KEY: &str = "documents";

impl FieldSnapshot {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Required fields that are absent, null, or blank strings, in declaration order.
    pub fn missing_fields(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|field| match self.0.get(**field) {
                None | Some(Value::Null) => true,
                Some(Value::String(text)) => text.trim().is_empty(),
                Some(_) => false,
            })
            .map(|field| (*field).to_string())
            .collect()
    }

    /// Record the URL of an uploaded attachment under `documents.<field>`.
    pub fn set_document(&mut self, field: &str, url: &str) {
        let entry = self
            .0
            .entry(DOCUMENTS_KEY.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(documents) = entry {
            documents.insert(field.to_string(), Value::String(url.to_string()));
        }
    }

    pub fn document(&self, field: &str) -> Option<&str> {
        self.0
            .get(DOCUMENTS_KEY)
            .and_then(|documents| documents.get(field))
            .and_then(Value::as_str)
    }

    /// Carry attachments over from an earlier snapshot unless the new one replaces them.
    pub fn inherit_documents(&mut self, previous: &FieldSnapshot) {
        if let Some(Value::Object(documents)) = previous.0.get(DOCUMENTS_KEY) {
            for (field, url) in documents {
                if self.document(field).is_none() {
                    if let Some(url) = url.as_str() {
                        self.set_document(field, url);
                    }
                }
            }
        }
    }
}

impl TryFrom<Value> for FieldSnapshot {
    type Error = ValidationError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            _ => Err(ValidationError::InvalidSnapshot),
        }
    }
}

impl From<FieldSnapshot> for Value {
    fn from(value: FieldSnapshot) -> Self {
        Value::Object(value.0)
    }
}

/// One membership submission. Superseded rows are archived, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub membership_type: MembershipType,
    pub owner_user_id: UserId,
    pub unique_identifier: UniqueIdentifier,
    pub status: ApplicationStatus,
    pub version: u32,
    pub parent_id: Option<ApplicationId>,
    pub is_archived: bool,
    pub field_snapshot: FieldSnapshot,
    pub rejection_reason: Option<String>,
    pub resubmission_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resubmitted_at: Option<DateTime<Utc>>,
}

impl Application {
    pub fn key(&self) -> ApplicationKey {
        ApplicationKey::new(self.membership_type, self.id)
    }

    pub fn is_active(&self) -> bool {
        !self.is_archived && self.status.is_active()
    }
}

/// In-progress application that has not been submitted yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub id: DraftId,
    pub owner_user_id: UserId,
    pub membership_type: MembershipType,
    pub unique_identifier: UniqueIdentifier,
    pub field_snapshot: FieldSnapshot,
    pub current_step: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when the draft was promoted; consumed drafts no longer hold the identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumed_by: Option<ApplicationKey>,
}

impl Draft {
    pub fn is_live(&self) -> bool {
        self.consumed_by.is_none()
    }

    pub const fn status(&self) -> ApplicationStatus {
        ApplicationStatus::Draft
    }
}

/// Draft fields supplied by the registry; the store assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDraft {
    pub owner_user_id: UserId,
    pub membership_type: MembershipType,
    pub unique_identifier: UniqueIdentifier,
    pub field_snapshot: FieldSnapshot,
    pub current_step: u8,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Rejection,
    Resubmission,
    Note,
    Reply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorType {
    Admin,
    User,
}

/// Immutable audit and correspondence record tied to one application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub id: EntryId,
    pub membership_type: MembershipType,
    pub membership_id: ApplicationId,
    pub message_type: MessageType,
    pub author_type: AuthorType,
    pub author_id: UserId,
    pub author_name: String,
    pub message: String,
    pub status_before: Option<ApplicationStatus>,
    pub status_after: Option<ApplicationStatus>,
    pub is_internal: bool,
    pub created_at: DateTime<Utc>,
    /// Insertion order within the store; breaks timestamp ties.
    pub sequence: u64,
}

impl ConversationEntry {
    pub fn application_key(&self) -> ApplicationKey {
        ApplicationKey::new(self.membership_type, self.membership_id)
    }
}

/// Entry contents before the store assigns identity and ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct NewConversationEntry {
    pub application: ApplicationKey,
    pub message_type: MessageType,
    pub author_type: AuthorType,
    pub author_id: UserId,
    pub author_name: String,
    pub message: String,
    pub status_before: Option<ApplicationStatus>,
    pub status_after: Option<ApplicationStatus>,
    pub is_internal: bool,
    pub created_at: DateTime<Utc>,
}

impl NewConversationEntry {
    pub fn from_actor(
        application: ApplicationKey,
        message_type: MessageType,
        actor: &Actor,
        message: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            application,
            message_type,
            author_type: actor.author_type(),
            author_id: actor.user_id.clone(),
            author_name: actor.name.clone(),
            message: message.into(),
            status_before: None,
            status_after: None,
            is_internal: false,
            created_at,
        }
    }

    pub fn with_transition(mut self, before: ApplicationStatus, after: ApplicationStatus) -> Self {
        self.status_before = Some(before);
        self.status_after = Some(after);
        self
    }

    pub fn internal(mut self, is_internal: bool) -> Self {
        self.is_internal = is_internal;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionState {
    Open,
    Resubmitted,
    Resolved,
}

/// Rejection bookkeeping, kept alongside the conversation so admins can resolve it directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub id: RejectionId,
    pub application: ApplicationKey,
    pub reason: String,
    pub rejected_by: UserId,
    pub rejected_at: DateTime<Utc>,
    pub state: RejectionState,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_note: Option<String>,
    pub resubmitted_as: Option<ApplicationKey>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRejection {
    pub application: ApplicationKey,
    pub reason: String,
    pub rejected_by: UserId,
    pub rejected_at: DateTime<Utc>,
}

/// Field snapshot recorded for every submitted version of an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub application: ApplicationKey,
    pub version: u32,
    pub field_snapshot: FieldSnapshot,
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identifier_requires_thirteen_ascii_digits() {
        assert!(UniqueIdentifier::parse("1234567890123").is_ok());
        assert!(UniqueIdentifier::parse("123456789012").is_err());
        assert!(UniqueIdentifier::parse("not-13-digits").is_err());
        assert!(UniqueIdentifier::parse("12345678901a3").is_err());
        assert!(UniqueIdentifier::parse("１２３４５６７８９０１２３").is_err());
    }

    #[test]
    fn membership_type_parses_codes_case_insensitively() {
        assert_eq!("oc".parse::<MembershipType>().unwrap(), MembershipType::Oc);
        assert_eq!("IC".parse::<MembershipType>().unwrap(), MembershipType::Ic);
        assert!("XX".parse::<MembershipType>().is_err());
        assert_eq!(
            serde_json::to_value(MembershipType::Am).unwrap(),
            json!("AM")
        );
    }

    #[test]
    fn snapshot_rejects_non_object_payloads() {
        assert!(serde_json::from_value::<FieldSnapshot>(json!(["a"])).is_err());
        let snapshot: FieldSnapshot =
            serde_json::from_value(json!({ "address": "  ", "company_name_th": "บริษัท" }))
                .unwrap();
        assert_eq!(
            snapshot.missing_fields(MembershipType::Ac.required_fields()),
            vec!["company_name_en".to_string(), "address".to_string()]
        );
    }

    #[test]
    fn documents_are_inherited_unless_replaced() {
        let mut previous = FieldSnapshot::default();
        previous.set_document("company_certificate", "/files/old-cert.pdf");
        previous.set_document("vat_certificate", "/files/vat.pdf");

        let mut next = FieldSnapshot::default();
        next.set_document("company_certificate", "/files/new-cert.pdf");
        next.inherit_documents(&previous);

        assert_eq!(
            next.document("company_certificate"),
            Some("/files/new-cert.pdf")
        );
        assert_eq!(next.document("vat_certificate"), Some("/files/vat.pdf"));
    }
}
