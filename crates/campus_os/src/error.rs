#![forbid(unsafe_code)]

use campus_kernel_contracts::actor::ActorRole;
use campus_kernel_contracts::{ContractViolation, EntityId};
use campus_storage::StorageError;
use thiserror::Error;

/// Failures surfaced by a realtime list. Remote errors are wrapped at the
/// fetch, mutation or subscription boundary and never reach the reconciler.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ListStoreError {
    #[error("{table}: fetch failed: {source}")]
    FetchFailure {
        table: &'static str,
        source: StorageError,
    },
    #[error("{table}: mutation on {entity_id} failed: {source}")]
    MutationFailure {
        table: &'static str,
        entity_id: EntityId,
        source: StorageError,
    },
    #[error("{table}: {action} failed: {source}")]
    RemoteCallFailure {
        table: &'static str,
        action: &'static str,
        source: StorageError,
    },
    #[error("{table}: change feed subscription failed: {source}")]
    SubscriptionFailure {
        table: &'static str,
        source: StorageError,
    },
    #[error("{table}: list has been torn down")]
    TornDown { table: &'static str },
    #[error("no signed-in session")]
    NotSignedIn,
    #[error("{table}: no entity {entity_id} in the local list")]
    UnknownEntity {
        table: &'static str,
        entity_id: EntityId,
    },
    #[error("{action} is not permitted for role {role}")]
    Forbidden {
        action: &'static str,
        role: ActorRole,
    },
    #[error("list state lock poisoned")]
    StatePoisoned,
    #[error(transparent)]
    ContractViolation(#[from] ContractViolation),
}
