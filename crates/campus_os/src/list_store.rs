#![forbid(unsafe_code)]

use std::sync::Arc;

use campus_kernel_contracts::actor::Actor;
use campus_kernel_contracts::change::{
    ChangeEvent, MutationAck, MutationIntent, MutationKind, MutationRequest,
};
use campus_kernel_contracts::visibility::RoleVisibilityFilter;
use campus_kernel_contracts::{EntityId, MonotonicTimeNs, RealtimeEntity, Validate};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ListStoreError;
use crate::optimistic::{
    EchoDecision, OptimisticMutationTracker, PendingPhase, Rekey, RollbackHandle, RollbackPlan,
};
use crate::reconcile::{apply_change, OrderedEntityMap};

/// Uninitialized -> Seeding -> Live -> (Disconnected -> Resyncing -> Live)*,
/// with `FetchFailed` as the retryable dead end of a failed fetch and
/// `TornDown` as the terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListStoreState {
    Uninitialized,
    Seeding,
    FetchFailed,
    Live,
    Disconnected,
    Resyncing,
    TornDown,
}

impl ListStoreState {
    pub fn as_str(self) -> &'static str {
        match self {
            ListStoreState::Uninitialized => "uninitialized",
            ListStoreState::Seeding => "seeding",
            ListStoreState::FetchFailed => "fetch_failed",
            ListStoreState::Live => "live",
            ListStoreState::Disconnected => "disconnected",
            ListStoreState::Resyncing => "resyncing",
            ListStoreState::TornDown => "torn_down",
        }
    }
}

/// Immutable view handed to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ListSnapshot<T> {
    pub state: ListStoreState,
    pub entities: Arc<Vec<T>>,
    pub revision: u64,
    pub fetch_error: Option<ListStoreError>,
}

impl<T: RealtimeEntity> ListSnapshot<T> {
    pub fn get(&self, id: &EntityId) -> Option<&T> {
        self.entities.iter().find(|row| row.entity_id() == id)
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.entities
            .iter()
            .map(|row| row.entity_id().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimisticReceipt<T> {
    pub handle: RollbackHandle,
    /// What to send to the data store.
    pub request: MutationRequest<T>,
}

/// Single source of truth for one mirrored table. Every mutation of the
/// collection goes through here and ends in a new published snapshot.
#[derive(Debug)]
pub struct RealtimeListStore<T: RealtimeEntity> {
    state: ListStoreState,
    entities: OrderedEntityMap<T>,
    filter: RoleVisibilityFilter,
    tracker: OptimisticMutationTracker<T>,
    events_since_seed: u64,
    revision: u64,
    fetch_error: Option<ListStoreError>,
    snapshot_tx: watch::Sender<ListSnapshot<T>>,
}

impl<T: RealtimeEntity> RealtimeListStore<T> {
    pub fn new(actor: Option<Actor>) -> Self {
        let (snapshot_tx, _) = watch::channel(ListSnapshot {
            state: ListStoreState::Uninitialized,
            entities: Arc::new(Vec::new()),
            revision: 0,
            fetch_error: None,
        });
        Self {
            state: ListStoreState::Uninitialized,
            entities: OrderedEntityMap::new(),
            filter: RoleVisibilityFilter::for_actor(actor),
            tracker: OptimisticMutationTracker::new(),
            events_since_seed: 0,
            revision: 0,
            fetch_error: None,
            snapshot_tx,
        }
    }

    pub fn state(&self) -> ListStoreState {
        self.state
    }

    pub fn actor(&self) -> Option<&Actor> {
        self.filter.actor()
    }

    pub fn is_torn_down(&self) -> bool {
        self.state == ListStoreState::TornDown
    }

    pub fn get(&self, id: &EntityId) -> Option<&T> {
        self.entities.get(id)
    }

    pub fn pending_mutations(&self) -> usize {
        self.tracker.len()
    }

    pub fn snapshot(&self) -> ListSnapshot<T> {
        ListSnapshot {
            state: self.state,
            entities: Arc::new(self.entities.to_vec()),
            revision: self.revision,
            fetch_error: self.fetch_error.clone(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ListSnapshot<T>> {
        self.snapshot_tx.subscribe()
    }

    fn publish(&mut self) {
        self.revision = self.revision.saturating_add(1);
        let snapshot = self.snapshot();
        self.snapshot_tx.send_replace(snapshot);
    }

    fn transition(&mut self, next: ListStoreState) {
        if self.state != next {
            info!(
                table = T::TABLE,
                from = self.state.as_str(),
                to = next.as_str(),
                "list state changed"
            );
            self.state = next;
        }
    }

    fn ensure_alive(&self) -> Result<(), ListStoreError> {
        if self.is_torn_down() {
            return Err(ListStoreError::TornDown { table: T::TABLE });
        }
        Ok(())
    }

    pub fn begin_seed(&mut self) -> Result<(), ListStoreError> {
        self.ensure_alive()?;
        self.events_since_seed = 0;
        self.transition(ListStoreState::Seeding);
        self.publish();
        Ok(())
    }

    /// Starts the full re-fetch that follows a reconnect.
    pub fn begin_resync(&mut self) -> Result<(), ListStoreError> {
        self.ensure_alive()?;
        self.events_since_seed = 0;
        self.transition(ListStoreState::Resyncing);
        self.publish();
        Ok(())
    }

    /// Replaces the collection with a fetch result. Ignored, with a warning,
    /// once the feed has delivered events into the current collection.
    /// Mutations still awaiting their remote call are laid back on top.
    pub fn seed(&mut self, rows: Vec<T>) -> bool {
        if self.is_torn_down() {
            return false;
        }
        if self.state == ListStoreState::Live && self.events_since_seed > 0 {
            warn!(
                table = T::TABLE,
                events = self.events_since_seed,
                "seed after feed events ignored"
            );
            return false;
        }
        let filter = &self.filter;
        let visible: Vec<T> = rows.into_iter().filter(|row| filter.admits(row)).collect();
        self.entities = OrderedEntityMap::from_rows(visible);
        self.tracker.drop_confirmed();
        self.reapply_pending();
        let resynced = self.state == ListStoreState::Resyncing;
        self.fetch_error = None;
        self.events_since_seed = 0;
        self.transition(ListStoreState::Live);
        info!(
            table = T::TABLE,
            rows = self.entities.len(),
            resynced,
            "list seeded"
        );
        self.publish();
        true
    }

    fn reapply_pending(&mut self) {
        let overlays: Vec<(MutationKind, EntityId, Option<T>)> = self
            .tracker
            .iter()
            .filter(|p| p.phase == PendingPhase::AwaitingRemote)
            .map(|p| (p.kind, p.entity_id.clone(), p.expected.clone()))
            .collect();
        for (kind, entity_id, expected) in overlays {
            match (kind, expected) {
                (MutationKind::Delete, _) => {
                    self.entities.remove(&entity_id);
                }
                (_, Some(row)) if self.filter.admits(&row) => {
                    self.entities.upsert(row);
                }
                (_, Some(row)) => {
                    debug!(
                        table = T::TABLE,
                        entity_id = %row.entity_id(),
                        "pending row hidden from current actor, not reapplied"
                    );
                    self.entities.remove(&entity_id);
                }
                (_, None) => {}
            }
        }
    }

    pub fn fail_seed(&mut self, error: ListStoreError) {
        if self.is_torn_down() {
            return;
        }
        warn!(table = T::TABLE, error = %error, "fetch failed");
        self.fetch_error = Some(error);
        self.transition(ListStoreState::FetchFailed);
        self.publish();
    }

    /// Routes one untrusted feed event through visibility, echo matching
    /// and reconciliation. Returns whether the visible list changed.
    pub fn apply_remote_event(&mut self, event: ChangeEvent<T>) -> bool {
        if self.state != ListStoreState::Live {
            debug!(
                table = T::TABLE,
                state = self.state.as_str(),
                "event outside live state dropped"
            );
            return false;
        }
        self.events_since_seed = self.events_since_seed.saturating_add(1);

        let original_kind = event.kind();
        let screened = self.filter.screen(event);
        if screened.kind() != original_kind {
            debug!(
                table = T::TABLE,
                entity_id = %screened.entity_id(),
                "row no longer visible, removing"
            );
        }

        let entities = &self.entities;
        let decision = self
            .tracker
            .observe_echo(&screened, |id| entities.get(id));
        let (rekey, consumed) = match decision {
            EchoDecision::Unmatched => (None, false),
            EchoDecision::Consumed { rekey, .. } => (rekey, true),
            EchoDecision::PassThrough { rekey, .. } => (rekey, false),
        };
        let mut changed = match rekey {
            Some(Rekey { from, to }) => self.entities.rename(&from, &to),
            None => false,
        };
        if !consumed {
            changed |= apply_change(&mut self.entities, &screened);
        }
        if changed {
            self.publish();
        }
        changed
    }

    /// Applies a local edit immediately and registers it as pending. Inserts
    /// get a temporary id until the server assigns one.
    pub fn apply_optimistic(
        &mut self,
        intent: MutationIntent<T>,
        now: MonotonicTimeNs,
    ) -> Result<OptimisticReceipt<T>, ListStoreError> {
        self.ensure_alive()?;
        let kind = intent.kind();
        let (entity_id, expected, prior) = match intent {
            MutationIntent::Insert(mut row) => {
                row.validate()?;
                let token = Uuid::new_v4().simple().to_string();
                row.set_entity_id(EntityId::temporary(&token)?);
                self.entities.upsert(row.clone());
                (row.entity_id().clone(), Some(row), None)
            }
            MutationIntent::Update(row) => {
                row.validate()?;
                let entity_id = row.entity_id().clone();
                let prior = self.prior_of(&entity_id)?;
                self.entities.upsert(row.clone());
                (entity_id, Some(row), Some(prior))
            }
            MutationIntent::Delete(entity_id) => {
                let (position, row) = self.entities.remove(&entity_id).ok_or_else(|| {
                    ListStoreError::UnknownEntity {
                        table: T::TABLE,
                        entity_id: entity_id.clone(),
                    }
                })?;
                (entity_id, None, Some((row, position)))
            }
        };

        let mutation_id = self
            .tracker
            .register(entity_id.clone(), kind, now, expected.clone(), prior);
        debug!(
            table = T::TABLE,
            entity_id = %entity_id,
            mutation_id = mutation_id.0,
            "optimistic mutation applied"
        );
        self.publish();
        Ok(OptimisticReceipt {
            handle: RollbackHandle {
                mutation_id,
                table: T::TABLE,
                entity_id: entity_id.clone(),
            },
            request: MutationRequest {
                kind,
                entity_id,
                row: expected,
            },
        })
    }

    fn prior_of(&self, entity_id: &EntityId) -> Result<(T, usize), ListStoreError> {
        match (self.entities.get(entity_id), self.entities.position(entity_id)) {
            (Some(row), Some(position)) => Ok((row.clone(), position)),
            _ => Err(ListStoreError::UnknownEntity {
                table: T::TABLE,
                entity_id: entity_id.clone(),
            }),
        }
    }

    /// The remote call succeeded. Ack row content is not applied; the feed
    /// echo (or the next fetch) carries server-computed fields.
    pub fn confirm(
        &mut self,
        handle: &RollbackHandle,
        ack: &MutationAck<T>,
        now: MonotonicTimeNs,
    ) -> bool {
        let rekey = self
            .tracker
            .resolve_success(handle.mutation_id, &ack.entity_id, now);
        let Some(Rekey { from, to }) = rekey else {
            return false;
        };
        let changed = self.entities.rename(&from, &to);
        if changed {
            self.publish();
        }
        changed
    }

    /// Reverts a mutation whose remote call failed. No-op once confirmed.
    pub fn rollback(&mut self, handle: &RollbackHandle) -> bool {
        let Some(plan) = self.tracker.resolve_failure(handle.mutation_id) else {
            return false;
        };
        let changed = match plan {
            RollbackPlan::RemoveInserted(entity_id) => self.entities.remove(&entity_id).is_some(),
            RollbackPlan::Restore { row, .. } if !self.filter.admits(&row) => {
                self.entities.remove(row.entity_id()).is_some()
            }
            RollbackPlan::Restore { row, position } => {
                if self.entities.contains(row.entity_id()) {
                    self.entities.upsert(row)
                } else {
                    self.entities.insert_at(position, row)
                }
            }
        };
        warn!(
            table = T::TABLE,
            entity_id = %handle.entity_id,
            mutation_id = handle.mutation_id.0,
            "optimistic mutation rolled back"
        );
        if changed {
            self.publish();
        }
        changed
    }

    pub fn expire_pending(&mut self, now: MonotonicTimeNs, timeout_ns: u64) -> usize {
        self.tracker.expire(now, timeout_ns).len()
    }

    /// Re-evaluates visibility for a new actor and drops what they may not
    /// see. Newly visible rows only arrive with the next fetch.
    pub fn set_actor(&mut self, actor: Option<Actor>) -> bool {
        if self.filter.actor() == actor.as_ref() {
            return false;
        }
        self.filter = RoleVisibilityFilter::for_actor(actor);
        let filter = &self.filter;
        let changed = self.entities.retain(|row| filter.admits(row));
        if changed {
            debug!(table = T::TABLE, "visibility narrowed after actor change");
        }
        self.publish();
        changed
    }

    pub fn mark_disconnected(&mut self) {
        if matches!(
            self.state,
            ListStoreState::Live | ListStoreState::Resyncing | ListStoreState::Seeding
        ) {
            self.transition(ListStoreState::Disconnected);
            self.publish();
        }
    }

    /// Back to live on a reconnect without the full re-fetch. Changes missed
    /// while disconnected stay missed.
    pub fn resume_without_resync(&mut self) {
        if self.state == ListStoreState::Disconnected {
            warn!(table = T::TABLE, "resumed without resync, list may be stale");
            self.transition(ListStoreState::Live);
            self.publish();
        }
    }

    /// Terminal. Pending mutations are forgotten; their late results are
    /// discarded by the caller.
    pub fn teardown(&mut self) {
        if self.is_torn_down() {
            return;
        }
        self.tracker.clear();
        self.transition(ListStoreState::TornDown);
        self.publish();
    }
}
