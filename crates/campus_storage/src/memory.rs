#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use campus_kernel_contracts::actor::{Actor, ActorId, ActorRole, Session};
use campus_kernel_contracts::announcement::Announcement;
use campus_kernel_contracts::canteen::MenuItem;
use campus_kernel_contracts::change::{
    encode_feed_payload, ChangeEvent, MutationAck, MutationKind, MutationRequest,
};
use campus_kernel_contracts::classroom::Classroom;
use campus_kernel_contracts::faculty::FacultyStatus;
use campus_kernel_contracts::feedback::Feedback;
use campus_kernel_contracts::notification::NotificationItem;
use campus_kernel_contracts::visibility::{visible, FetchFilter};
use campus_kernel_contracts::{EntityId, MonotonicTimeNs, RealtimeEntity, Validate};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::repo::{
    ChangeFeedRepo, EntityTableRepo, FeedMessage, FeedSubscription, MenuVoteRepo,
    NotificationRepo, SessionRepo, StorageError, SubscriptionHandle,
};

pub const HOSTED_TABLES: &[&str] = &[
    Classroom::TABLE,
    FacultyStatus::TABLE,
    MenuItem::TABLE,
    Announcement::TABLE,
    NotificationItem::TABLE,
    Feedback::TABLE,
];

/// Row-level read policy enforced by the hosted store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowPolicy {
    /// Every signed-in user may read every row; role scoping is the
    /// client's and the fetch filter's job.
    Shared,
    /// Only the row owner reads the row, regardless of role.
    OwnerOnly,
    /// The row owner and admins read the row.
    OwnerOrAdmin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Origin {
    /// Written through the signed-in session of this actor.
    Client(ActorId),
    Server,
}

#[derive(Debug)]
struct FeedSubscriber {
    viewer: Option<Actor>,
    sender: mpsc::UnboundedSender<FeedMessage>,
}

#[derive(Debug)]
struct TableRuntime {
    subscribers: BTreeMap<SubscriptionHandle, FeedSubscriber>,
    connected: bool,
    echo_enabled: bool,
    mutation_faults: VecDeque<StorageError>,
    fetch_faults: VecDeque<StorageError>,
    next_row_seq: u64,
}

impl Default for TableRuntime {
    fn default() -> Self {
        Self {
            subscribers: BTreeMap::new(),
            connected: true,
            echo_enabled: true,
            mutation_faults: VecDeque::new(),
            fetch_faults: VecDeque::new(),
            next_row_seq: 0,
        }
    }
}

#[derive(Debug, Default)]
pub struct BackendState {
    session: Option<Session>,
    known_actors: BTreeMap<ActorId, Actor>,
    classrooms: Vec<Classroom>,
    faculty: Vec<FacultyStatus>,
    menu: Vec<MenuItem>,
    announcements: Vec<Announcement>,
    notifications: Vec<NotificationItem>,
    feedback: Vec<Feedback>,
    menu_votes: BTreeSet<(ActorId, EntityId)>,
    tables: BTreeMap<&'static str, TableRuntime>,
    next_subscription: u64,
}

impl BackendState {
    fn runtime(&mut self, table: &'static str) -> &mut TableRuntime {
        self.tables.entry(table).or_default()
    }

    fn session_actor(&self, table: &'static str) -> Result<Actor, StorageError> {
        self.session
            .as_ref()
            .map(|s| s.actor.clone())
            .ok_or(StorageError::PermissionDenied { table })
    }

    fn next_id(&mut self, table: &'static str) -> Result<EntityId, StorageError> {
        let runtime = self.runtime(table);
        runtime.next_row_seq = runtime.next_row_seq.saturating_add(1);
        let seq = runtime.next_row_seq;
        Ok(EntityId::new(format!("{table}-{seq}"))?)
    }
}

/// Per-table hooks the hosted store needs: where rows live, who may write
/// them, and any server-side trigger that runs after an insert.
pub trait BackendTable: RealtimeEntity {
    const ROW_POLICY: RowPolicy = RowPolicy::Shared;

    fn rows(state: &BackendState) -> &Vec<Self>;

    fn rows_mut(state: &mut BackendState) -> &mut Vec<Self>;

    fn may_write(actor: &Actor, existing: Option<&Self>) -> bool;

    fn may_insert(actor: &Actor, _row: &Self) -> bool {
        Self::may_write(actor, None)
    }

    fn after_insert(_state: &mut BackendState, _row: &Self) {}

    /// Order of a bulk read. Ties keep storage order.
    fn fetch_order(_a: &Self, _b: &Self) -> Ordering {
        Ordering::Equal
    }
}

impl BackendTable for Classroom {
    fn rows(state: &BackendState) -> &Vec<Self> {
        &state.classrooms
    }

    fn rows_mut(state: &mut BackendState) -> &mut Vec<Self> {
        &mut state.classrooms
    }

    fn may_write(actor: &Actor, _existing: Option<&Self>) -> bool {
        actor.has_any_role(&[
            ActorRole::Admin,
            ActorRole::Faculty,
            ActorRole::ClassRepresentative,
        ])
    }
}

impl BackendTable for FacultyStatus {
    fn rows(state: &BackendState) -> &Vec<Self> {
        &state.faculty
    }

    fn rows_mut(state: &mut BackendState) -> &mut Vec<Self> {
        &mut state.faculty
    }

    fn may_write(actor: &Actor, existing: Option<&Self>) -> bool {
        if actor.role == ActorRole::Admin {
            return true;
        }
        actor.role == ActorRole::Faculty
            && existing.is_some_and(|row| {
                actor
                    .email
                    .as_deref()
                    .is_some_and(|email| email.eq_ignore_ascii_case(&row.email))
            })
    }
}

impl BackendTable for MenuItem {
    fn rows(state: &BackendState) -> &Vec<Self> {
        &state.menu
    }

    fn rows_mut(state: &mut BackendState) -> &mut Vec<Self> {
        &mut state.menu
    }

    fn may_write(actor: &Actor, _existing: Option<&Self>) -> bool {
        actor.has_any_role(&[ActorRole::Admin, ActorRole::CanteenStaff])
    }

    fn fetch_order(a: &Self, b: &Self) -> Ordering {
        b.votes.cmp(&a.votes)
    }
}

impl BackendTable for Announcement {
    fn rows(state: &BackendState) -> &Vec<Self> {
        &state.announcements
    }

    fn rows_mut(state: &mut BackendState) -> &mut Vec<Self> {
        &mut state.announcements
    }

    fn may_write(actor: &Actor, _existing: Option<&Self>) -> bool {
        actor.role == ActorRole::Admin
    }

    fn fetch_order(a: &Self, b: &Self) -> Ordering {
        b.created_at.cmp(&a.created_at)
    }

    /// Fans a new announcement out into the unread view of every other
    /// known user allowed to see it.
    fn after_insert(state: &mut BackendState, row: &Self) {
        let recipients: Vec<ActorId> = state
            .known_actors
            .values()
            .filter(|actor| actor.identity != row.created_by && visible(*actor, row))
            .map(|actor| actor.identity.clone())
            .collect();
        for user_id in recipients {
            let notification_id = match state.next_id(NotificationItem::TABLE) {
                Ok(id) => id,
                Err(err) => {
                    warn!(error = %err, "notification id allocation failed");
                    continue;
                }
            };
            let item = NotificationItem {
                notification_id,
                user_id: user_id.clone(),
                is_read: false,
                notification_created_at: row.created_at,
                announcement_id: row.id.clone(),
                title: row.title.clone(),
                content: row.content.clone(),
                created_by: row.created_by.clone(),
                target_role: row.target_role,
            };
            state.notifications.push(item.clone());
            fan_out(
                state,
                &ChangeEvent::Insert(item),
                Some(user_id.as_str().to_string()),
                Origin::Server,
            );
        }
    }
}

impl BackendTable for NotificationItem {
    const ROW_POLICY: RowPolicy = RowPolicy::OwnerOnly;

    fn rows(state: &BackendState) -> &Vec<Self> {
        &state.notifications
    }

    fn rows_mut(state: &mut BackendState) -> &mut Vec<Self> {
        &mut state.notifications
    }

    fn may_write(actor: &Actor, existing: Option<&Self>) -> bool {
        existing.is_some_and(|row| row.user_id == actor.identity)
    }

    fn fetch_order(a: &Self, b: &Self) -> Ordering {
        b.notification_created_at.cmp(&a.notification_created_at)
    }
}

impl BackendTable for Feedback {
    const ROW_POLICY: RowPolicy = RowPolicy::OwnerOrAdmin;

    fn rows(state: &BackendState) -> &Vec<Self> {
        &state.feedback
    }

    fn rows_mut(state: &mut BackendState) -> &mut Vec<Self> {
        &mut state.feedback
    }

    /// Review and removal are admin-only.
    fn may_write(actor: &Actor, _existing: Option<&Self>) -> bool {
        actor.role.is_privileged()
    }

    /// Anyone signed in may submit, but only under their own identity.
    fn may_insert(actor: &Actor, row: &Self) -> bool {
        row.user_id == actor.identity
    }

    fn fetch_order(a: &Self, b: &Self) -> Ordering {
        b.created_at.cmp(&a.created_at)
    }
}

fn policy_admits<T: BackendTable>(viewer: Option<&Actor>, owner: Option<&str>) -> bool {
    let owns = || owner.is_some() && owner == viewer.map(|actor| actor.identity.as_str());
    match T::ROW_POLICY {
        RowPolicy::Shared => true,
        RowPolicy::OwnerOnly => owns(),
        RowPolicy::OwnerOrAdmin => {
            viewer.is_some_and(|actor| actor.role.is_privileged()) || owns()
        }
    }
}

fn fan_out<T: BackendTable>(
    state: &mut BackendState,
    event: &ChangeEvent<T>,
    owner: Option<String>,
    origin: Origin,
) {
    let payload = match encode_feed_payload(event) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(table = T::TABLE, error = %err, "change payload encode failed");
            return;
        }
    };
    let runtime = state.runtime(T::TABLE);
    if !runtime.connected {
        debug!(table = T::TABLE, "feed disconnected, change not delivered");
        return;
    }
    // With echo off only the writer's own subscriptions miss the change.
    let silenced = match &origin {
        Origin::Client(writer) if !runtime.echo_enabled => Some(writer),
        _ => None,
    };
    runtime.subscribers.retain(|_, subscriber| {
        if !policy_admits::<T>(subscriber.viewer.as_ref(), owner.as_deref()) {
            return true;
        }
        let is_writer = subscriber
            .viewer
            .as_ref()
            .is_some_and(|viewer| Some(&viewer.identity) == silenced);
        if is_writer {
            return true;
        }
        subscriber
            .sender
            .send(FeedMessage::Payload(payload.clone()))
            .is_ok()
    });
}

/// In-process stand-in for the hosted database: tables, row policies,
/// change feeds, sessions and the canteen vote procedures.
#[derive(Debug)]
pub struct InMemoryCampusStore {
    state: Mutex<BackendState>,
    auth_tx: watch::Sender<Option<Session>>,
}

impl Default for InMemoryCampusStore {
    fn default() -> Self {
        Self::new_in_memory()
    }
}

impl InMemoryCampusStore {
    pub fn new_in_memory() -> Self {
        let (auth_tx, _) = watch::channel(None);
        Self {
            state: Mutex::new(BackendState::default()),
            auth_tx,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, BackendState>, StorageError> {
        self.state
            .lock()
            .map_err(|_| StorageError::Unavailable("backend state lock poisoned"))
    }

    pub fn sign_in(&self, actor: Actor, now: MonotonicTimeNs) -> Result<Session, StorageError> {
        let session = Session::v1(actor.clone(), now)?;
        {
            let mut state = self.lock()?;
            state.known_actors.insert(actor.identity.clone(), actor);
            state.session = Some(session.clone());
        }
        self.auth_tx.send_replace(Some(session.clone()));
        Ok(session)
    }

    pub fn sign_out(&self) -> Result<(), StorageError> {
        self.lock()?.session = None;
        self.auth_tx.send_replace(None);
        Ok(())
    }

    /// Makes an actor known to server-side triggers without signing them in.
    pub fn register_actor(&self, actor: Actor) -> Result<(), StorageError> {
        self.lock()?
            .known_actors
            .insert(actor.identity.clone(), actor);
        Ok(())
    }

    /// Loads rows without emitting change events.
    pub fn seed_rows<T: BackendTable>(&self, rows: Vec<T>) -> Result<(), StorageError> {
        for row in &rows {
            row.validate()?;
        }
        let mut state = self.lock()?;
        T::rows_mut(&mut state).extend(rows);
        Ok(())
    }

    pub fn rows<T: BackendTable>(&self) -> Result<Vec<T>, StorageError> {
        Ok(T::rows(&*self.lock()?).clone())
    }

    /// A write made by some other session: always delivered to subscribers.
    pub fn server_upsert<T: BackendTable>(&self, row: T) -> Result<(), StorageError> {
        row.validate()?;
        let mut guard = self.lock()?;
        let state = &mut *guard;
        let owner = row.owner().map(str::to_string);
        let rows = T::rows_mut(state);
        let event = match rows.iter().position(|r| r.entity_id() == row.entity_id()) {
            Some(pos) => {
                rows[pos] = row.clone();
                ChangeEvent::Update(row)
            }
            None => {
                rows.push(row.clone());
                T::after_insert(state, &row);
                ChangeEvent::Insert(row)
            }
        };
        fan_out(state, &event, owner, Origin::Server);
        Ok(())
    }

    pub fn server_delete<T: BackendTable>(&self, id: &EntityId) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        let rows = T::rows_mut(state);
        let pos = rows
            .iter()
            .position(|r| r.entity_id() == id)
            .ok_or_else(|| StorageError::NotFound {
                table: T::TABLE,
                key: id.to_string(),
            })?;
        let removed = rows.remove(pos);
        fan_out(
            state,
            &ChangeEvent::<T>::Delete(id.clone()),
            removed.owner().map(str::to_string),
            Origin::Server,
        );
        Ok(())
    }

    /// Pushes an arbitrary payload down a table's feed.
    pub fn publish_raw(&self, table: &'static str, payload: Value) -> Result<(), StorageError> {
        let mut state = self.lock()?;
        state.runtime(table).subscribers.retain(|_, subscriber| {
            subscriber
                .sender
                .send(FeedMessage::Payload(payload.clone()))
                .is_ok()
        });
        Ok(())
    }

    pub fn fail_next_mutation(
        &self,
        table: &'static str,
        error: StorageError,
    ) -> Result<(), StorageError> {
        self.lock()?
            .runtime(table)
            .mutation_faults
            .push_back(error);
        Ok(())
    }

    pub fn fail_next_fetch(
        &self,
        table: &'static str,
        error: StorageError,
    ) -> Result<(), StorageError> {
        self.lock()?.runtime(table).fetch_faults.push_back(error);
        Ok(())
    }

    /// Some deployments never deliver a session's own writes back to it.
    pub fn set_echo_enabled(&self, table: &'static str, enabled: bool) -> Result<(), StorageError> {
        self.lock()?.runtime(table).echo_enabled = enabled;
        Ok(())
    }

    /// Drops the feed. Changes committed while disconnected are never
    /// replayed.
    pub fn disconnect_feed(&self, table: &'static str) -> Result<(), StorageError> {
        let mut state = self.lock()?;
        let runtime = state.runtime(table);
        runtime.connected = false;
        runtime
            .subscribers
            .retain(|_, subscriber| subscriber.sender.send(FeedMessage::Disconnected).is_ok());
        Ok(())
    }

    pub fn reconnect_feed(&self, table: &'static str) -> Result<(), StorageError> {
        let mut state = self.lock()?;
        let runtime = state.runtime(table);
        runtime.connected = true;
        runtime
            .subscribers
            .retain(|_, subscriber| subscriber.sender.send(FeedMessage::Reconnected).is_ok());
        Ok(())
    }

    pub fn subscriber_count(&self, table: &'static str) -> usize {
        self.lock()
            .map(|mut state| state.runtime(table).subscribers.len())
            .unwrap_or(0)
    }

    fn vote_actor(state: &BackendState, user: &ActorId) -> Result<(), StorageError> {
        let actor = state.session_actor(MenuItem::TABLE)?;
        if &actor.identity != user {
            return Err(StorageError::PermissionDenied {
                table: MenuItem::TABLE,
            });
        }
        Ok(())
    }

    fn adjust_votes(
        state: &mut BackendState,
        voter: &ActorId,
        item_id: &EntityId,
        delta: i64,
    ) -> Result<MenuItem, StorageError> {
        let item = state
            .menu
            .iter_mut()
            .find(|row| &row.id == item_id)
            .ok_or_else(|| StorageError::NotFound {
                table: MenuItem::TABLE,
                key: item_id.to_string(),
            })?;
        *item = item.with_vote_delta(delta);
        let updated = item.clone();
        fan_out(
            state,
            &ChangeEvent::Update(updated.clone()),
            None,
            Origin::Client(voter.clone()),
        );
        Ok(updated)
    }
}

#[async_trait]
impl<T: BackendTable> EntityTableRepo<T> for InMemoryCampusStore {
    async fn fetch_all(&self, filter: &FetchFilter) -> Result<Vec<T>, StorageError> {
        let mut state = self.lock()?;
        if let Some(fault) = state.runtime(T::TABLE).fetch_faults.pop_front() {
            return Err(fault);
        }
        let viewer = state.session_actor(T::TABLE)?;
        let mut rows: Vec<T> = T::rows(&state)
            .iter()
            .filter(|row| filter.admits(*row))
            .filter(|row| policy_admits::<T>(Some(&viewer), row.owner()))
            .cloned()
            .collect();
        rows.sort_by(T::fetch_order);
        Ok(rows)
    }

    async fn mutate(&self, request: MutationRequest<T>) -> Result<MutationAck<T>, StorageError> {
        request.validate()?;
        let mut guard = self.lock()?;
        let state = &mut *guard;
        if let Some(fault) = state.runtime(T::TABLE).mutation_faults.pop_front() {
            return Err(fault);
        }
        let actor = state.session_actor(T::TABLE)?;
        let denied = StorageError::PermissionDenied { table: T::TABLE };
        let not_found = StorageError::NotFound {
            table: T::TABLE,
            key: request.entity_id.to_string(),
        };
        let missing_row = StorageError::Rejected {
            table: T::TABLE,
            reason: "insert and update must carry a row",
        };

        match request.kind {
            MutationKind::Insert => {
                let mut row = request.row.ok_or(missing_row)?;
                if !T::may_insert(&actor, &row) {
                    return Err(denied);
                }
                let id = state.next_id(T::TABLE)?;
                row.set_entity_id(id.clone());
                T::rows_mut(state).push(row.clone());
                T::after_insert(state, &row);
                let owner = row.owner().map(str::to_string);
                fan_out(
                    state,
                    &ChangeEvent::Insert(row.clone()),
                    owner,
                    Origin::Client(actor.identity),
                );
                Ok(MutationAck {
                    entity_id: id,
                    row: Some(row),
                })
            }
            MutationKind::Update => {
                let row = request.row.ok_or(missing_row)?;
                let rows = T::rows_mut(state);
                let pos = rows
                    .iter()
                    .position(|r| r.entity_id() == &request.entity_id)
                    .ok_or(not_found)?;
                if !T::may_write(&actor, Some(&rows[pos])) {
                    return Err(denied);
                }
                rows[pos] = row.clone();
                let owner = row.owner().map(str::to_string);
                fan_out(
                    state,
                    &ChangeEvent::Update(row.clone()),
                    owner,
                    Origin::Client(actor.identity),
                );
                Ok(MutationAck {
                    entity_id: request.entity_id,
                    row: Some(row),
                })
            }
            MutationKind::Delete => {
                let rows = T::rows_mut(state);
                let pos = rows
                    .iter()
                    .position(|r| r.entity_id() == &request.entity_id)
                    .ok_or(not_found)?;
                if !T::may_write(&actor, Some(&rows[pos])) {
                    return Err(denied);
                }
                let removed = rows.remove(pos);
                fan_out(
                    state,
                    &ChangeEvent::<T>::Delete(request.entity_id.clone()),
                    removed.owner().map(str::to_string),
                    Origin::Client(actor.identity),
                );
                Ok(MutationAck {
                    entity_id: request.entity_id,
                    row: None,
                })
            }
        }
    }
}

impl ChangeFeedRepo for InMemoryCampusStore {
    fn subscribe_changes(&self, table: &'static str) -> Result<FeedSubscription, StorageError> {
        if !HOSTED_TABLES.contains(&table) {
            return Err(StorageError::Rejected {
                table,
                reason: "unknown table",
            });
        }
        let mut state = self.lock()?;
        state.next_subscription = state.next_subscription.saturating_add(1);
        let handle = SubscriptionHandle(state.next_subscription);
        let viewer = state.session.as_ref().map(|s| s.actor.clone());
        let (sender, receiver) = mpsc::unbounded_channel();
        state
            .runtime(table)
            .subscribers
            .insert(handle, FeedSubscriber { viewer, sender });
        debug!(table, subscription = handle.0, "feed subscribed");
        Ok(FeedSubscription {
            handle,
            table,
            receiver,
        })
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        if let Ok(mut state) = self.lock() {
            for runtime in state.tables.values_mut() {
                runtime.subscribers.remove(&handle);
            }
        }
    }
}

impl SessionRepo for InMemoryCampusStore {
    fn current_session(&self) -> Option<Session> {
        self.lock().ok().and_then(|state| state.session.clone())
    }

    fn auth_state_changes(&self) -> watch::Receiver<Option<Session>> {
        self.auth_tx.subscribe()
    }
}

#[async_trait]
impl MenuVoteRepo for InMemoryCampusStore {
    async fn voted_item_ids(&self, user: &ActorId) -> Result<BTreeSet<EntityId>, StorageError> {
        let state = self.lock()?;
        Ok(state
            .menu_votes
            .iter()
            .filter(|(voter, _)| voter == user)
            .map(|(_, item)| item.clone())
            .collect())
    }

    async fn cast_vote(
        &self,
        user: &ActorId,
        item_id: &EntityId,
    ) -> Result<MenuItem, StorageError> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        if let Some(fault) = state.runtime(MenuItem::TABLE).mutation_faults.pop_front() {
            return Err(fault);
        }
        Self::vote_actor(state, user)?;
        if !state.menu_votes.insert((user.clone(), item_id.clone())) {
            return Err(StorageError::Rejected {
                table: MenuItem::TABLE,
                reason: "already voted",
            });
        }
        match Self::adjust_votes(state, user, item_id, 1) {
            Ok(item) => Ok(item),
            Err(err) => {
                state.menu_votes.remove(&(user.clone(), item_id.clone()));
                Err(err)
            }
        }
    }

    async fn retract_vote(
        &self,
        user: &ActorId,
        item_id: &EntityId,
    ) -> Result<MenuItem, StorageError> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        if let Some(fault) = state.runtime(MenuItem::TABLE).mutation_faults.pop_front() {
            return Err(fault);
        }
        Self::vote_actor(state, user)?;
        if !state.menu_votes.remove(&(user.clone(), item_id.clone())) {
            return Err(StorageError::Rejected {
                table: MenuItem::TABLE,
                reason: "no vote to retract",
            });
        }
        Self::adjust_votes(state, user, item_id, -1)
    }

    async fn reset_votes(&self) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        let actor = state.session_actor(MenuItem::TABLE)?;
        if !actor.has_any_role(&[ActorRole::Admin, ActorRole::CanteenStaff]) {
            return Err(StorageError::PermissionDenied {
                table: MenuItem::TABLE,
            });
        }
        state.menu_votes.clear();
        let mut changed = Vec::new();
        for item in state.menu.iter_mut().filter(|item| item.votes > 0) {
            item.votes = 0;
            changed.push(item.clone());
        }
        for item in changed {
            fan_out(state, &ChangeEvent::Update(item), None, Origin::Server);
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationRepo for InMemoryCampusStore {
    async fn mark_read(&self, user: &ActorId, ids: &[EntityId]) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        if let Some(fault) = state
            .runtime(NotificationItem::TABLE)
            .mutation_faults
            .pop_front()
        {
            return Err(fault);
        }
        let actor = state.session_actor(NotificationItem::TABLE)?;
        if &actor.identity != user {
            return Err(StorageError::PermissionDenied {
                table: NotificationItem::TABLE,
            });
        }
        // All or nothing: an unknown id fails the batch before any row goes.
        if let Some(missing) = ids.iter().find(|id| {
            !state
                .notifications
                .iter()
                .any(|row| &row.notification_id == *id && &row.user_id == user)
        }) {
            return Err(StorageError::NotFound {
                table: NotificationItem::TABLE,
                key: missing.to_string(),
            });
        }
        state
            .notifications
            .retain(|row| !(&row.user_id == user && ids.contains(&row.notification_id)));
        for id in ids {
            fan_out(
                state,
                &ChangeEvent::<NotificationItem>::Delete(id.clone()),
                Some(user.as_str().to_string()),
                Origin::Client(user.clone()),
            );
        }
        Ok(())
    }
}
