use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::domain::{
    Actor, ApplicationKey, ConversationEntry, MessageType, NewConversationEntry,
};
use super::errors::{ValidationError, WorkflowError};
use super::store::{MembershipStore, StoreReader, UnitOfWork};

/// Paging controls for reading a conversation. `after` is the `sequence` of the last entry the
/// caller already holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct ConversationQuery {
    #[serde(default)]
    pub include_internal: bool,
    #[serde(default)]
    pub after: Option<u64>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationPage {
    pub entries: Vec<ConversationEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<u64>,
}

/// Append-only message log per application.
pub struct ConversationLedger<S> {
    store: Arc<S>,
    page_size: usize,
}

impl<S> ConversationLedger<S>
where
    S: MembershipStore + 'static,
{
    pub fn new(store: Arc<S>, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    /// Write one entry inside the caller's transaction.
    pub fn append(
        uow: &mut dyn UnitOfWork,
        entry: NewConversationEntry,
    ) -> Result<ConversationEntry, WorkflowError> {
        if entry.message.trim().is_empty() {
            return Err(ValidationError::EmptyMessage.into());
        }
        Ok(uow.append_entry(entry)?)
    }

    /// Post a message without changing the application status. Only admins may post
    /// internal notes.
    pub fn reply(
        &self,
        actor: &Actor,
        key: ApplicationKey,
        message: &str,
        internal: bool,
    ) -> Result<ConversationEntry, WorkflowError> {
        if internal && !actor.is_admin() {
            return Err(WorkflowError::Forbidden);
        }
        let message = message.trim();

        let entry = self.store.transaction(|uow| {
            let application = uow.application(key)?.ok_or(WorkflowError::NotFound)?;
            if !actor.can_access(&application.owner_user_id) {
                return Err(WorkflowError::NotFound);
            }

            let message_type = if internal {
                MessageType::Note
            } else {
                MessageType::Reply
            };
            Self::append(
                uow,
                NewConversationEntry::from_actor(key, message_type, actor, message, Utc::now())
                    .internal(internal),
            )
        })?;

        info!(application = %key, author = %actor.user_id, internal, "conversation reply recorded");
        Ok(entry)
    }

    /// Entries oldest first. Members never see internal notes, whatever they ask for.
    pub fn list_for_application(
        &self,
        actor: &Actor,
        key: ApplicationKey,
        query: ConversationQuery,
    ) -> Result<ConversationPage, WorkflowError> {
        let include_internal = query.include_internal && actor.is_admin();
        let limit = query
            .limit
            .unwrap_or(self.page_size)
            .clamp(1, self.page_size);

        self.store.read(|reader: &dyn StoreReader| {
            let application = reader.application(key)?.ok_or(WorkflowError::NotFound)?;
            if !actor.can_access(&application.owner_user_id) {
                return Err(WorkflowError::NotFound);
            }

            let mut visible: Vec<ConversationEntry> = reader
                .conversation(key)?
                .into_iter()
                .filter(|entry| include_internal || !entry.is_internal)
                .filter(|entry| query.after.map_or(true, |after| entry.sequence > after))
                .collect();
            visible.sort_by_key(|entry| entry.sequence);

            let has_more = visible.len() > limit;
            visible.truncate(limit);
            let next_cursor = if has_more {
                visible.last().map(|entry| entry.sequence)
            } else {
                None
            };

            Ok(ConversationPage {
                entries: visible,
                next_cursor,
            })
        })
    }
}
