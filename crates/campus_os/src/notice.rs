#![forbid(unsafe_code)]

use campus_kernel_contracts::EntityId;

/// Transient, non-blocking notices for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListNotice {
    MutationRolledBack {
        table: &'static str,
        entity_id: EntityId,
        reason: String,
    },
    /// Retryable; the list stays in `FetchFailed` until a re-fetch succeeds.
    FetchFailed { table: &'static str, reason: String },
    SubscriptionLost { table: &'static str },
    Resynced { table: &'static str },
    SessionEnded { table: &'static str },
}

impl ListNotice {
    pub fn table(&self) -> &'static str {
        match self {
            ListNotice::MutationRolledBack { table, .. }
            | ListNotice::FetchFailed { table, .. }
            | ListNotice::SubscriptionLost { table }
            | ListNotice::Resynced { table }
            | ListNotice::SessionEnded { table } => table,
        }
    }
}
