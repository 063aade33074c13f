#![forbid(unsafe_code)]

use crate::actor::Actor;
use crate::change::ChangeEvent;
use crate::RealtimeEntity;

/// Role-scoped visibility, uniform across entity types: a row is visible when
/// it has no target role, targets the actor's role, the actor is privileged,
/// or the actor owns it.
pub fn visible<T: RealtimeEntity>(actor: &Actor, entity: &T) -> bool {
    match entity.target_role() {
        None => true,
        Some(role) if role == actor.role => true,
        Some(_) if actor.role.is_privileged() => true,
        Some(_) => entity.owner() == Some(actor.identity.as_str()),
    }
}

/// Anonymous viewers only see untargeted rows.
pub fn visible_to<T: RealtimeEntity>(actor: Option<&Actor>, entity: &T) -> bool {
    match actor {
        Some(actor) => visible(actor, entity),
        None => entity.target_role().is_none(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleVisibilityFilter {
    actor: Option<Actor>,
}

impl RoleVisibilityFilter {
    pub fn for_actor(actor: Option<Actor>) -> Self {
        Self { actor }
    }

    pub fn actor(&self) -> Option<&Actor> {
        self.actor.as_ref()
    }

    pub fn admits<T: RealtimeEntity>(&self, entity: &T) -> bool {
        visible_to(self.actor.as_ref(), entity)
    }

    /// Deletes always pass; an insert or update for a row the actor may not
    /// see is turned into a removal rather than dropped.
    pub fn screen<T: RealtimeEntity>(&self, event: ChangeEvent<T>) -> ChangeEvent<T> {
        match event {
            ChangeEvent::Insert(row) | ChangeEvent::Update(row) if !self.admits(&row) => {
                ChangeEvent::Delete(row.entity_id().clone())
            }
            other => other,
        }
    }
}

/// Filter pushed down to the data store's bulk read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFilter {
    Unscoped,
    RoleScoped(Actor),
}

impl FetchFilter {
    pub fn for_actor(actor: Option<&Actor>) -> Self {
        match actor {
            Some(actor) => FetchFilter::RoleScoped(actor.clone()),
            None => FetchFilter::Unscoped,
        }
    }

    pub fn admits<T: RealtimeEntity>(&self, entity: &T) -> bool {
        match self {
            FetchFilter::Unscoped => true,
            FetchFilter::RoleScoped(actor) => visible(actor, entity),
        }
    }
}
