#![forbid(unsafe_code)]

use std::sync::Arc;

use campus_kernel_contracts::change::{MutationAck, MutationIntent};
use campus_kernel_contracts::notification::NotificationItem;
use campus_kernel_contracts::EntityId;
use campus_storage::repo::NotificationRepo;

use crate::config::LiveListConfig;
use crate::error::ListStoreError;
use crate::live::{IssuedMutation, LiveBackend, LiveList};

pub trait NotificationBackend: LiveBackend<NotificationItem> + NotificationRepo {}

impl<R> NotificationBackend for R where R: LiveBackend<NotificationItem> + NotificationRepo {}

/// The signed-in user's unread notifications. Marking one read removes it
/// locally at once.
pub struct NotificationCenter<R: NotificationBackend> {
    list: LiveList<NotificationItem, R>,
}

impl<R: NotificationBackend> NotificationCenter<R> {
    pub async fn start(repo: Arc<R>, config: LiveListConfig) -> Result<Self, ListStoreError> {
        Ok(Self {
            list: LiveList::start(repo, config).await?,
        })
    }

    pub fn list(&self) -> &LiveList<NotificationItem, R> {
        &self.list
    }

    pub fn unread(&self) -> Vec<NotificationItem> {
        self.list.snapshot().entities.to_vec()
    }

    pub fn unread_count(&self) -> usize {
        self.list.snapshot().len()
    }

    pub fn mark_read(&self, id: &EntityId) -> Result<IssuedMutation, ListStoreError> {
        let actor = self.list.actor()?.ok_or(ListStoreError::NotSignedIn)?;
        let repo = Arc::clone(self.list.repo());
        let user = actor.identity;
        self.list
            .issue_with(MutationIntent::Delete(id.clone()), move |request| async move {
                let ids = [request.entity_id.clone()];
                repo.mark_read(&user, &ids).await.map(|()| MutationAck {
                    entity_id: request.entity_id,
                    row: None,
                })
            })
    }

    /// One mutation per unread row, so a single failure only restores that
    /// row.
    pub fn mark_all_read(&self) -> Result<Vec<IssuedMutation>, ListStoreError> {
        self.list
            .snapshot()
            .ids()
            .iter()
            .map(|id| self.mark_read(id))
            .collect()
    }
}
