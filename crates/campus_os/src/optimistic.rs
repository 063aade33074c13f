#![forbid(unsafe_code)]

use campus_kernel_contracts::change::{ChangeEvent, ChangeKind, MutationKind};
use campus_kernel_contracts::{EntityId, MonotonicTimeNs, RealtimeEntity};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MutationId(pub u64);

/// Returned by every optimistic mutation; identifies it for confirmation
/// or rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackHandle {
    pub mutation_id: MutationId,
    pub table: &'static str,
    pub entity_id: EntityId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingPhase {
    AwaitingRemote,
    AwaitingEcho { confirmed_at: MonotonicTimeNs },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingMutation<T> {
    pub mutation_id: MutationId,
    pub entity_id: EntityId,
    pub kind: MutationKind,
    pub issued_at: MonotonicTimeNs,
    /// The row as the mutation leaves it. `None` for deletes.
    pub expected: Option<T>,
    /// Row and position before the mutation. `None` for inserts.
    pub prior: Option<(T, usize)>,
    pub phase: PendingPhase,
    pub echo_seen: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rekey {
    pub from: EntityId,
    pub to: EntityId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EchoDecision {
    /// Not caused by any pending mutation.
    Unmatched,
    /// Local state already reflects it; do not reconcile.
    Consumed {
        mutation_id: MutationId,
        rekey: Option<Rekey>,
    },
    /// Ours, but the server changed something we did not predict.
    PassThrough {
        mutation_id: MutationId,
        rekey: Option<Rekey>,
    },
}

/// How to undo a failed mutation against the local list.
#[derive(Debug, Clone, PartialEq)]
pub enum RollbackPlan<T> {
    RemoveInserted(EntityId),
    Restore { row: T, position: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimisticMutationTracker<T> {
    pending: Vec<PendingMutation<T>>,
    next_id: u64,
}

impl<T> Default for OptimisticMutationTracker<T> {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
            next_id: 1,
        }
    }
}

impl<T: RealtimeEntity> OptimisticMutationTracker<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn get(&self, mutation_id: MutationId) -> Option<&PendingMutation<T>> {
        self.pending.iter().find(|p| p.mutation_id == mutation_id)
    }

    pub fn is_pending(&self, entity_id: &EntityId) -> bool {
        self.pending.iter().any(|p| &p.entity_id == entity_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingMutation<T>> + '_ {
        self.pending.iter()
    }

    /// Registered before the remote call is issued so an echo that beats
    /// the call's own response is still recognised.
    pub fn register(
        &mut self,
        entity_id: EntityId,
        kind: MutationKind,
        issued_at: MonotonicTimeNs,
        expected: Option<T>,
        prior: Option<(T, usize)>,
    ) -> MutationId {
        let mutation_id = MutationId(self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        self.pending.push(PendingMutation {
            mutation_id,
            entity_id,
            kind,
            issued_at,
            expected,
            prior,
            phase: PendingPhase::AwaitingRemote,
            echo_seen: false,
        });
        mutation_id
    }

    /// Matches an inbound event against pending mutations. `local` looks up
    /// the current local row by id (after any rekey).
    pub fn observe_echo<'a>(
        &mut self,
        event: &ChangeEvent<T>,
        local: impl Fn(&EntityId) -> Option<&'a T>,
    ) -> EchoDecision
    where
        T: 'a,
    {
        let kind = event.kind();
        let event_id = event.entity_id();
        let Some((index, rekey)) = self.match_index(event, kind, event_id) else {
            self.rebase_on_foreign(event, event_id);
            return EchoDecision::Unmatched;
        };
        if let Some(rekey) = &rekey {
            self.rename_pending(&rekey.from, &rekey.to);
        }

        let superseded = self.pending[index + 1..]
            .iter()
            .any(|later| &later.entity_id == event_id);
        let consumed = superseded
            || match (event.row(), rekey.as_ref()) {
                // Another writer may have put the row back since our delete.
                (None, _) => local(event_id).is_none(),
                (Some(row), None) => local(event_id) == Some(row),
                (Some(row), Some(rekey)) => {
                    local(&rekey.from).or_else(|| local(&rekey.to)).is_some_and(|local_row| {
                        let mut renamed = local_row.clone();
                        renamed.set_entity_id(rekey.to.clone());
                        &renamed == row
                    })
                }
            };

        let mutation_id = self.pending[index].mutation_id;
        match self.pending[index].phase {
            PendingPhase::AwaitingEcho { .. } => {
                self.pending.remove(index);
            }
            PendingPhase::AwaitingRemote => self.pending[index].echo_seen = true,
        }
        debug!(
            table = T::TABLE,
            entity_id = %event_id,
            mutation_id = mutation_id.0,
            consumed,
            "echo matched pending mutation"
        );
        if consumed {
            EchoDecision::Consumed { mutation_id, rekey }
        } else {
            EchoDecision::PassThrough { mutation_id, rekey }
        }
    }

    /// Another writer's change to an entity we still have in flight is now
    /// the server's version. A later rollback restores that, not the row we
    /// saw before our own edit.
    fn rebase_on_foreign(&mut self, event: &ChangeEvent<T>, event_id: &EntityId) {
        for pending in self
            .pending
            .iter_mut()
            .filter(|p| &p.entity_id == event_id && p.phase == PendingPhase::AwaitingRemote)
        {
            let position = pending.prior.as_ref().map_or(0, |(_, position)| *position);
            pending.prior = event.row().map(|row| (row.clone(), position));
            debug!(
                table = T::TABLE,
                entity_id = %event_id,
                mutation_id = pending.mutation_id.0,
                "foreign change rebased pending rollback"
            );
        }
    }

    fn match_index(
        &self,
        event: &ChangeEvent<T>,
        kind: ChangeKind,
        event_id: &EntityId,
    ) -> Option<(usize, Option<Rekey>)> {
        if let Some(index) = self
            .pending
            .iter()
            .position(|p| !p.echo_seen && &p.entity_id == event_id && p.kind.echoed_by(kind))
        {
            return Some((index, None));
        }
        // An insert echo can beat the ack that tells us the server id; match
        // it to a temporary row by content.
        let row = event.row()?;
        let index = self.pending.iter().position(|p| {
            !p.echo_seen
                && p.kind == MutationKind::Insert
                && p.entity_id.is_temporary()
                && p.kind.echoed_by(kind)
                && p.expected.as_ref().is_some_and(|expected| {
                    let mut renamed = expected.clone();
                    renamed.set_entity_id(event_id.clone());
                    &renamed == row
                })
        })?;
        let rekey = Rekey {
            from: self.pending[index].entity_id.clone(),
            to: event_id.clone(),
        };
        Some((index, Some(rekey)))
    }

    fn rename_pending(&mut self, from: &EntityId, to: &EntityId) {
        for pending in self.pending.iter_mut().filter(|p| &p.entity_id == from) {
            pending.entity_id = to.clone();
            if let Some(expected) = pending.expected.as_mut() {
                expected.set_entity_id(to.clone());
            }
            if let Some((prior, _)) = pending.prior.as_mut() {
                prior.set_entity_id(to.clone());
            }
        }
    }

    /// The remote call succeeded. The entry stays until its echo arrives or
    /// it expires. Returns the temporary-to-server id move for inserts.
    pub fn resolve_success(
        &mut self,
        mutation_id: MutationId,
        server_id: &EntityId,
        now: MonotonicTimeNs,
    ) -> Option<Rekey> {
        let index = self
            .pending
            .iter()
            .position(|p| p.mutation_id == mutation_id)?;
        let current = self.pending[index].entity_id.clone();
        let rekey = (self.pending[index].kind == MutationKind::Insert && &current != server_id)
            .then(|| Rekey {
                from: current.clone(),
                to: server_id.clone(),
            });
        if let Some(rekey) = &rekey {
            self.rename_pending(&rekey.from, &rekey.to);
        }
        if self.pending[index].echo_seen {
            self.pending.remove(index);
        } else {
            self.pending[index].phase = PendingPhase::AwaitingEcho { confirmed_at: now };
        }
        rekey
    }

    /// The remote call failed, or the caller asked to undo. A no-op once the
    /// mutation is confirmed. When a later mutation on the same entity is
    /// still pending, its rollback point is rebased instead and the local
    /// list is left alone.
    pub fn resolve_failure(&mut self, mutation_id: MutationId) -> Option<RollbackPlan<T>> {
        let index = self
            .pending
            .iter()
            .position(|p| p.mutation_id == mutation_id)?;
        if self.pending[index].phase != PendingPhase::AwaitingRemote {
            return None;
        }
        let failed = self.pending.remove(index);
        if failed.echo_seen {
            return None;
        }
        if let Some(later) = self.pending[index..]
            .iter_mut()
            .find(|later| later.entity_id == failed.entity_id)
        {
            later.prior = failed.prior;
            if failed.kind == MutationKind::Insert {
                later.kind = MutationKind::Insert;
            }
            return None;
        }
        Some(match failed.prior {
            None => RollbackPlan::RemoveInserted(failed.entity_id),
            Some((row, position)) => RollbackPlan::Restore { row, position },
        })
    }

    /// Drops confirmed mutations whose echo never arrived within `timeout_ns`.
    pub fn expire(&mut self, now: MonotonicTimeNs, timeout_ns: u64) -> Vec<MutationId> {
        let mut expired = Vec::new();
        self.pending.retain(|p| match p.phase {
            PendingPhase::AwaitingEcho { confirmed_at }
                if now.0.saturating_sub(confirmed_at.0) >= timeout_ns =>
            {
                debug!(
                    table = T::TABLE,
                    entity_id = %p.entity_id,
                    mutation_id = p.mutation_id.0,
                    "echo timeout, settling without echo"
                );
                expired.push(p.mutation_id);
                false
            }
            _ => true,
        });
        expired
    }

    /// A full re-fetch is authoritative for everything already confirmed.
    pub fn drop_confirmed(&mut self) {
        self.pending
            .retain(|p| p.phase == PendingPhase::AwaitingRemote && !p.echo_seen);
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
