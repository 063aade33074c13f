#![forbid(unsafe_code)]

use std::sync::Arc;

use campus_kernel_contracts::actor::{Actor, ActorRole};
use campus_kernel_contracts::classroom::{Classroom, ClassroomStatus};
use campus_kernel_contracts::EntityId;
use chrono::{DateTime, Utc};

use crate::config::LiveListConfig;
use crate::error::ListStoreError;
use crate::live::{IssuedMutation, LiveBackend, LiveList};

pub const CLASSROOM_EDITORS: [ActorRole; 3] = [
    ActorRole::Admin,
    ActorRole::Faculty,
    ActorRole::ClassRepresentative,
];

pub fn can_edit_classroom(actor: &Actor) -> bool {
    actor.has_any_role(&CLASSROOM_EDITORS)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassroomCounts {
    pub total: usize,
    pub available: usize,
    pub occupied: usize,
    pub maintenance: usize,
}

impl ClassroomCounts {
    pub fn tally(rows: &[Classroom]) -> Self {
        rows.iter().fold(Self::default(), |mut counts, row| {
            counts.total += 1;
            match row.status {
                ClassroomStatus::Available => counts.available += 1,
                ClassroomStatus::Occupied => counts.occupied += 1,
                ClassroomStatus::Maintenance => counts.maintenance += 1,
            }
            counts
        })
    }
}

/// Status filter plus case-insensitive name search. An empty query matches
/// everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassroomQuery {
    pub status: Option<ClassroomStatus>,
    pub search: String,
}

impl ClassroomQuery {
    pub fn matches(&self, row: &Classroom) -> bool {
        if self.status.is_some_and(|status| status != row.status) {
            return false;
        }
        let needle = self.search.trim().to_lowercase();
        needle.is_empty() || row.name.to_lowercase().contains(&needle)
    }

    pub fn apply<'a>(&self, rows: &'a [Classroom]) -> Vec<&'a Classroom> {
        rows.iter().filter(|row| self.matches(row)).collect()
    }
}

pub struct ClassroomBoard<R: LiveBackend<Classroom>> {
    list: LiveList<Classroom, R>,
}

impl<R: LiveBackend<Classroom>> ClassroomBoard<R> {
    pub async fn start(repo: Arc<R>, config: LiveListConfig) -> Result<Self, ListStoreError> {
        Ok(Self {
            list: LiveList::start(repo, config).await?,
        })
    }

    pub fn list(&self) -> &LiveList<Classroom, R> {
        &self.list
    }

    pub fn counts(&self) -> ClassroomCounts {
        ClassroomCounts::tally(self.list.snapshot().entities.as_slice())
    }

    pub fn filtered(&self, query: &ClassroomQuery) -> Vec<Classroom> {
        let snapshot = self.list.snapshot();
        query
            .apply(snapshot.entities.as_slice())
            .into_iter()
            .cloned()
            .collect()
    }

    /// Stamps who changed the status and when.
    pub fn set_status(
        &self,
        id: &EntityId,
        status: ClassroomStatus,
        at: DateTime<Utc>,
    ) -> Result<IssuedMutation, ListStoreError> {
        let actor = self.list.actor()?.ok_or(ListStoreError::NotSignedIn)?;
        if !can_edit_classroom(&actor) {
            return Err(ListStoreError::Forbidden {
                action: "classroom.set_status",
                role: actor.role,
            });
        }
        let updated_by = actor
            .email
            .clone()
            .unwrap_or_else(|| actor.identity.to_string());
        self.list.issue_update(id, move |row| {
            row.status = status;
            row.last_updated = Some(at);
            row.updated_by = Some(updated_by);
            Ok(())
        })
    }
}
