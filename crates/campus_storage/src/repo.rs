#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use async_trait::async_trait;
use campus_kernel_contracts::actor::{ActorId, Session};
use campus_kernel_contracts::canteen::MenuItem;
use campus_kernel_contracts::change::{MutationAck, MutationRequest};
use campus_kernel_contracts::visibility::FetchFilter;
use campus_kernel_contracts::{ContractViolation, EntityId, RealtimeEntity};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StorageError {
    #[error("{table}: row {key} not found")]
    NotFound { table: &'static str, key: String },
    #[error("{table}: permission denied")]
    PermissionDenied { table: &'static str },
    #[error("{table}: rejected ({reason})")]
    Rejected {
        table: &'static str,
        reason: &'static str,
    },
    #[error("network error: {0}")]
    Network(String),
    #[error("{table}: change feed disconnected")]
    Disconnected { table: &'static str },
    #[error("backend unavailable: {0}")]
    Unavailable(&'static str),
    #[error(transparent)]
    ContractViolation(#[from] ContractViolation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionHandle(pub u64);

/// What a change-feed subscription yields. Payloads are the raw
/// `{eventType, new, old}` notifications; typing happens on the client.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Payload(Value),
    Disconnected,
    Reconnected,
}

#[derive(Debug)]
pub struct FeedSubscription {
    pub handle: SubscriptionHandle,
    pub table: &'static str,
    pub receiver: mpsc::UnboundedReceiver<FeedMessage>,
}

/// Bulk read and single-round-trip writes against one remote table.
#[async_trait]
pub trait EntityTableRepo<T: RealtimeEntity>: Send + Sync {
    async fn fetch_all(&self, filter: &FetchFilter) -> Result<Vec<T>, StorageError>;

    async fn mutate(&self, request: MutationRequest<T>) -> Result<MutationAck<T>, StorageError>;
}

pub trait ChangeFeedRepo: Send + Sync {
    fn subscribe_changes(&self, table: &'static str) -> Result<FeedSubscription, StorageError>;

    fn unsubscribe(&self, handle: SubscriptionHandle);
}

pub trait SessionRepo: Send + Sync {
    fn current_session(&self) -> Option<Session>;

    /// Fires on sign-in, sign-out and token refresh.
    fn auth_state_changes(&self) -> watch::Receiver<Option<Session>>;
}

/// Server-side vote bookkeeping for the canteen menu. Counts are computed
/// remotely and echoed through the `canteen_menu` feed.
#[async_trait]
pub trait MenuVoteRepo: Send + Sync {
    async fn voted_item_ids(&self, user: &ActorId) -> Result<BTreeSet<EntityId>, StorageError>;

    async fn cast_vote(&self, user: &ActorId, item_id: &EntityId)
        -> Result<MenuItem, StorageError>;

    async fn retract_vote(
        &self,
        user: &ActorId,
        item_id: &EntityId,
    ) -> Result<MenuItem, StorageError>;

    async fn reset_votes(&self) -> Result<(), StorageError>;
}

#[async_trait]
pub trait NotificationRepo: Send + Sync {
    async fn mark_read(&self, user: &ActorId, ids: &[EntityId]) -> Result<(), StorageError>;
}
