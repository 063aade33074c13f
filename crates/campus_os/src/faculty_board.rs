#![forbid(unsafe_code)]

use std::sync::Arc;

use campus_kernel_contracts::actor::{Actor, ActorRole};
use campus_kernel_contracts::faculty::{FacultyAvailability, FacultyStatus};
use campus_kernel_contracts::EntityId;
use chrono::NaiveDate;

use crate::config::LiveListConfig;
use crate::error::ListStoreError;
use crate::live::{IssuedMutation, LiveBackend, LiveList};

/// Admins edit any row; faculty edit only the row carrying their own email.
pub fn can_edit_faculty(actor: &Actor, row: &FacultyStatus) -> bool {
    match actor.role {
        ActorRole::Admin => true,
        ActorRole::Faculty => actor
            .email
            .as_deref()
            .is_some_and(|email| email.eq_ignore_ascii_case(&row.email)),
        _ => false,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FacultyQuery {
    pub search: String,
}

impl FacultyQuery {
    pub fn matches(&self, row: &FacultyStatus) -> bool {
        let needle = self.search.trim().to_lowercase();
        needle.is_empty()
            || row.name.to_lowercase().contains(&needle)
            || row.department.to_lowercase().contains(&needle)
    }

    pub fn apply<'a>(&self, rows: &'a [FacultyStatus]) -> Vec<&'a FacultyStatus> {
        rows.iter().filter(|row| self.matches(row)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityUpdate {
    pub status: FacultyAvailability,
    /// Only kept when `status` is `Unavailable`.
    pub return_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl AvailabilityUpdate {
    fn apply_to(self, row: &mut FacultyStatus) {
        row.return_date = match self.status {
            FacultyAvailability::Unavailable => self.return_date,
            _ => None,
        };
        row.status = self.status;
        row.notes = self.notes.filter(|notes| !notes.trim().is_empty());
    }
}

pub struct FacultyBoard<R: LiveBackend<FacultyStatus>> {
    list: LiveList<FacultyStatus, R>,
}

impl<R: LiveBackend<FacultyStatus>> FacultyBoard<R> {
    pub async fn start(repo: Arc<R>, config: LiveListConfig) -> Result<Self, ListStoreError> {
        Ok(Self {
            list: LiveList::start(repo, config).await?,
        })
    }

    pub fn list(&self) -> &LiveList<FacultyStatus, R> {
        &self.list
    }

    pub fn filtered(&self, query: &FacultyQuery) -> Vec<FacultyStatus> {
        let snapshot = self.list.snapshot();
        query
            .apply(snapshot.entities.as_slice())
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn update_availability(
        &self,
        id: &EntityId,
        update: AvailabilityUpdate,
    ) -> Result<IssuedMutation, ListStoreError> {
        let actor = self.list.actor()?.ok_or(ListStoreError::NotSignedIn)?;
        self.list.issue_update(id, move |row| {
            if !can_edit_faculty(&actor, row) {
                return Err(ListStoreError::Forbidden {
                    action: "faculty.update_availability",
                    role: actor.role,
                });
            }
            update.apply_to(row);
            Ok(())
        })
    }
}
