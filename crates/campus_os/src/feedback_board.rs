#![forbid(unsafe_code)]

use std::sync::Arc;

use campus_kernel_contracts::actor::Actor;
use campus_kernel_contracts::change::MutationIntent;
use campus_kernel_contracts::feedback::{Feedback, FeedbackStatus};
use campus_kernel_contracts::EntityId;
use chrono::{DateTime, Utc};

use crate::config::LiveListConfig;
use crate::error::ListStoreError;
use crate::live::{IssuedMutation, LiveBackend, LiveList};

const ANONYMOUS: &str = "Anonymous";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackDraft {
    pub subject: String,
    pub message: String,
    /// Shown to reviewers; `None` submits as "Anonymous".
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedbackCounts {
    pub pending: usize,
    pub reviewed: usize,
    pub resolved: usize,
}

impl FeedbackCounts {
    pub fn tally<'a>(rows: impl IntoIterator<Item = &'a Feedback>) -> Self {
        rows.into_iter().fold(Self::default(), |mut counts, row| {
            match row.status {
                FeedbackStatus::Pending => counts.pending += 1,
                FeedbackStatus::Reviewed => counts.reviewed += 1,
                FeedbackStatus::Resolved => counts.resolved += 1,
            }
            counts
        })
    }
}

/// Feedback as the signed-in user may read it: their own submissions, or
/// every submission for an admin. Newest first.
pub struct FeedbackBoard<R: LiveBackend<Feedback>> {
    list: LiveList<Feedback, R>,
}

impl<R: LiveBackend<Feedback>> FeedbackBoard<R> {
    pub async fn start(repo: Arc<R>, config: LiveListConfig) -> Result<Self, ListStoreError> {
        Ok(Self {
            list: LiveList::start(repo, config).await?,
        })
    }

    pub fn list(&self) -> &LiveList<Feedback, R> {
        &self.list
    }

    pub fn counts(&self) -> FeedbackCounts {
        FeedbackCounts::tally(self.list.snapshot().entities.iter())
    }

    pub fn with_status(&self, status: FeedbackStatus) -> Vec<Feedback> {
        self.list
            .snapshot()
            .entities
            .iter()
            .filter(|row| row.status == status)
            .cloned()
            .collect()
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

    /// Any signed-in user may submit. Subject and message are trimmed and
    /// must not be blank.
    pub fn submit(
        &self,
        draft: FeedbackDraft,
        submitted_at: DateTime<Utc>,
    ) -> Result<IssuedMutation, ListStoreError> {
        let actor = self.list.actor()?.ok_or(ListStoreError::NotSignedIn)?;
        let row = Feedback::v1(
            EntityId::temporary("draft")?,
            actor.identity,
            draft.display_name.unwrap_or_else(|| ANONYMOUS.to_string()),
            actor.email.unwrap_or_default(),
            draft.subject,
            draft.message,
            submitted_at,
        )?;
        self.list.issue_mutation(MutationIntent::Insert(row))
    }

    pub fn set_status(
        &self,
        id: &EntityId,
        status: FeedbackStatus,
        at: DateTime<Utc>,
    ) -> Result<IssuedMutation, ListStoreError> {
        self.require_admin("feedback.set_status")?;
        self.list.issue_update(id, move |row| {
            *row = row.with_status(status, at);
            Ok(())
        })
    }

    pub fn delete(&self, id: &EntityId) -> Result<IssuedMutation, ListStoreError> {
        self.require_admin("feedback.delete")?;
        self.list.issue_mutation(MutationIntent::Delete(id.clone()))
    }
}
