#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use campus_kernel_contracts::actor::{Actor, ActorRole};
use campus_kernel_contracts::canteen::{MenuCategory, MenuItem};
use campus_kernel_contracts::change::MutationAck;
use campus_kernel_contracts::{EntityId, RealtimeEntity};
use campus_storage::repo::MenuVoteRepo;
use tracing::debug;

use crate::config::LiveListConfig;
use crate::error::ListStoreError;
use crate::live::{IssuedMutation, LiveBackend, LiveList};

pub const VOTE_RESETTERS: [ActorRole; 2] = [ActorRole::Admin, ActorRole::CanteenStaff];

pub fn can_reset_votes(actor: &Actor) -> bool {
    actor.has_any_role(&VOTE_RESETTERS)
}

/// Backend surface the canteen board needs: the menu table plus vote calls.
pub trait CanteenBackend: LiveBackend<MenuItem> + MenuVoteRepo {}

impl<R> CanteenBackend for R where R: LiveBackend<MenuItem> + MenuVoteRepo {}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CategoryFilter {
    #[default]
    All,
    Only(MenuCategory),
}

impl CategoryFilter {
    pub fn matches(self, item: &MenuItem) -> bool {
        match self {
            CategoryFilter::All => true,
            CategoryFilter::Only(category) => item.category == category,
        }
    }

    pub fn apply(self, items: &[MenuItem]) -> Vec<&MenuItem> {
        items.iter().filter(|item| self.matches(item)).collect()
    }
}

/// Live menu with per-user vote toggling. The vote count moves locally at
/// once and the server's count arrives through the feed.
pub struct CanteenBoard<R: CanteenBackend> {
    list: LiveList<MenuItem, R>,
    voted: Arc<Mutex<BTreeSet<EntityId>>>,
}

impl<R: CanteenBackend> CanteenBoard<R> {
    pub async fn start(repo: Arc<R>, config: LiveListConfig) -> Result<Self, ListStoreError> {
        let list = LiveList::start(repo, config).await?;
        let actor = list.actor()?.ok_or(ListStoreError::NotSignedIn)?;
        let voted = list
            .repo()
            .voted_item_ids(&actor.identity)
            .await
            .map_err(|source| ListStoreError::FetchFailure {
                table: MenuItem::TABLE,
                source,
            })?;
        Ok(Self {
            list,
            voted: Arc::new(Mutex::new(voted)),
        })
    }

    pub fn list(&self) -> &LiveList<MenuItem, R> {
        &self.list
    }

    fn lock_voted(&self) -> Result<MutexGuard<'_, BTreeSet<EntityId>>, ListStoreError> {
        self.voted.lock().map_err(|_| ListStoreError::StatePoisoned)
    }

    pub fn has_voted(&self, id: &EntityId) -> Result<bool, ListStoreError> {
        Ok(self.lock_voted()?.contains(id))
    }

    pub fn voted_ids(&self) -> Result<BTreeSet<EntityId>, ListStoreError> {
        Ok(self.lock_voted()?.clone())
    }

    pub fn filtered(&self, filter: CategoryFilter) -> Vec<MenuItem> {
        let snapshot = self.list.snapshot();
        filter
            .apply(snapshot.entities.as_slice())
            .into_iter()
            .cloned()
            .collect()
    }

    /// Casts the vote if the user has not voted for `id`, retracts it
    /// otherwise. A rejected call restores both the count and the vote mark.
    pub fn toggle_vote(&self, id: &EntityId) -> Result<IssuedMutation, ListStoreError> {
        let actor = self.list.actor()?.ok_or(ListStoreError::NotSignedIn)?;
        let was_voted = {
            let mut voted = self.lock_voted()?;
            let was_voted = !voted.insert(id.clone());
            if was_voted {
                voted.remove(id);
            }
            was_voted
        };
        let delta = if was_voted { -1 } else { 1 };

        let repo = Arc::clone(self.list.repo());
        let voted = Arc::clone(&self.voted);
        let user = actor.identity;
        let item_id = id.clone();
        let issued = self.list.issue_update_with(
            id,
            |row| {
                *row = row.with_vote_delta(delta);
                Ok(())
            },
            move |_request| async move {
                let outcome = if was_voted {
                    repo.retract_vote(&user, &item_id).await
                } else {
                    repo.cast_vote(&user, &item_id).await
                };
                match outcome {
                    Ok(item) => Ok(MutationAck {
                        entity_id: item.id.clone(),
                        row: Some(item),
                    }),
                    Err(err) => {
                        debug!(item = %item_id, error = %err, "vote call failed");
                        restore_vote_mark(&voted, &item_id, was_voted);
                        Err(err)
                    }
                }
            },
        );
        if issued.is_err() {
            restore_vote_mark(&self.voted, id, was_voted);
        }
        issued
    }

    /// Zeroes every count server-side, then re-fetches the menu.
    pub async fn reset_votes(&self) -> Result<(), ListStoreError> {
        let actor = self.list.actor()?.ok_or(ListStoreError::NotSignedIn)?;
        if !can_reset_votes(&actor) {
            return Err(ListStoreError::Forbidden {
                action: "canteen.reset_votes",
                role: actor.role,
            });
        }
        self.list
            .repo()
            .reset_votes()
            .await
            .map_err(|source| ListStoreError::RemoteCallFailure {
                table: MenuItem::TABLE,
                action: "reset_votes",
                source,
            })?;
        self.lock_voted()?.clear();
        self.list.refetch().await
    }
}

fn restore_vote_mark(voted: &Mutex<BTreeSet<EntityId>>, id: &EntityId, was_voted: bool) {
    if let Ok(mut voted) = voted.lock() {
        if was_voted {
            voted.insert(id.clone());
        } else {
            voted.remove(id);
        }
    }
}
