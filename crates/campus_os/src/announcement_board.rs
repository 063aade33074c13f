#![forbid(unsafe_code)]

use std::sync::Arc;

use campus_kernel_contracts::actor::{Actor, ActorRole};
use campus_kernel_contracts::announcement::Announcement;
use campus_kernel_contracts::change::MutationIntent;
use campus_kernel_contracts::EntityId;
use chrono::{DateTime, Utc};

use crate::config::LiveListConfig;
use crate::error::ListStoreError;
use crate::live::{IssuedMutation, LiveBackend, LiveList};

/// Title, body and audience of an announcement. `target_role: None` reaches
/// everyone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnouncementDraft {
    pub title: String,
    pub content: String,
    pub target_role: Option<ActorRole>,
}

pub struct AnnouncementBoard<R: LiveBackend<Announcement>> {
    list: LiveList<Announcement, R>,
}

impl<R: LiveBackend<Announcement>> AnnouncementBoard<R> {
    pub async fn start(repo: Arc<R>, config: LiveListConfig) -> Result<Self, ListStoreError> {
        Ok(Self {
            list: LiveList::start(repo, config).await?,
        })
    }

    pub fn list(&self) -> &LiveList<Announcement, R> {
        &self.list
    }

    fn require_admin(&self, action: &'static str) -> Result<Actor, ListStoreError> {
        let actor = self.list.actor()?.ok_or(ListStoreError::NotSignedIn)?;
        if actor.role.is_privileged() {
            Ok(actor)
        } else {
            Err(ListStoreError::Forbidden {
                action,
                role: actor.role,
            })
        }
    }

    /// Posts a new announcement. The row appears at the top of the list
    /// under a temporary id until the insert is acknowledged.
    pub fn create(
        &self,
        draft: AnnouncementDraft,
        created_at: DateTime<Utc>,
    ) -> Result<IssuedMutation, ListStoreError> {
        let actor = self.require_admin("announcement.create")?;
        let row = Announcement::v1(
            EntityId::temporary("draft")?,
            draft.title,
            draft.content,
            created_at,
            actor.identity,
            draft.target_role,
        )?;
        self.list.issue_mutation(MutationIntent::Insert(row))
    }

    pub fn edit(
        &self,
        id: &EntityId,
        draft: AnnouncementDraft,
    ) -> Result<IssuedMutation, ListStoreError> {
        self.require_admin("announcement.edit")?;
        self.list.issue_update(id, move |row| {
            row.title = draft.title;
            row.content = draft.content;
            row.target_role = draft.target_role;
            Ok(())
        })
    }

    pub fn delete(&self, id: &EntityId) -> Result<IssuedMutation, ListStoreError> {
        self.require_admin("announcement.delete")?;
        self.list.issue_mutation(MutationIntent::Delete(id.clone()))
    }
}
