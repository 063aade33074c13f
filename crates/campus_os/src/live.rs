#![forbid(unsafe_code)]

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use campus_kernel_contracts::actor::{Actor, Session};
use campus_kernel_contracts::change::{
    decode_feed_payload, MutationAck, MutationIntent, MutationRequest,
};
use campus_kernel_contracts::visibility::FetchFilter;
use campus_kernel_contracts::{EntityId, MonotonicTimeNs, RealtimeEntity};
use campus_storage::repo::{
    ChangeFeedRepo, EntityTableRepo, FeedMessage, FeedSubscription, SessionRepo,
};
use campus_storage::StorageError;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{FeedMode, LiveListConfig};
use crate::error::ListStoreError;
use crate::list_store::{ListSnapshot, OptimisticReceipt, RealtimeListStore};
use crate::notice::ListNotice;
use crate::optimistic::RollbackHandle;

const NOTICE_CAPACITY: usize = 64;

/// Everything a live list needs from the hosted backend for one table.
pub trait LiveBackend<T: RealtimeEntity>:
    EntityTableRepo<T> + ChangeFeedRepo + SessionRepo + 'static
{
}

impl<T, R> LiveBackend<T> for R
where
    T: RealtimeEntity,
    R: EntityTableRepo<T> + ChangeFeedRepo + SessionRepo + 'static,
{
}

/// Monotonic clock on the runtime's timer, so paused test time applies.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeClock {
    origin: Instant,
}

impl RuntimeClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now(&self) -> MonotonicTimeNs {
        MonotonicTimeNs(u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationResolution {
    Confirmed { entity_id: EntityId },
    RolledBack { error: ListStoreError },
    /// The list was torn down before the remote call finished.
    Discarded,
}

#[derive(Debug)]
pub struct IssuedMutation {
    pub handle: RollbackHandle,
    pub resolution: JoinHandle<MutationResolution>,
}

impl IssuedMutation {
    pub async fn settled(self) -> MutationResolution {
        self.resolution
            .await
            .unwrap_or(MutationResolution::Discarded)
    }
}

enum Command {
    Refetch(oneshot::Sender<Result<(), ListStoreError>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpFlow {
    Continue,
    Stop,
}

struct Shared<T: RealtimeEntity, R> {
    repo: Arc<R>,
    store: Mutex<RealtimeListStore<T>>,
    config: LiveListConfig,
    clock: RuntimeClock,
    notices: broadcast::Sender<ListNotice>,
    alive: AtomicBool,
}

impl<T, R> Shared<T, R>
where
    T: RealtimeEntity,
    R: LiveBackend<T>,
{
    fn lock(&self) -> Result<MutexGuard<'_, RealtimeListStore<T>>, ListStoreError> {
        self.store.lock().map_err(|_| ListStoreError::StatePoisoned)
    }

    fn notify(&self, notice: ListNotice) {
        // No receivers is fine.
        let _ = self.notices.send(notice);
    }

    async fn refetch(&self, resync: bool) -> Result<(), ListStoreError> {
        let filter = {
            let mut store = self.lock()?;
            if resync {
                store.begin_resync()?;
            } else {
                store.begin_seed()?;
            }
            FetchFilter::for_actor(store.actor())
        };
        match self.repo.fetch_all(&filter).await {
            Ok(rows) => {
                self.lock()?.seed(rows);
                if resync {
                    self.notify(ListNotice::Resynced { table: T::TABLE });
                }
                Ok(())
            }
            Err(source) => {
                let error = ListStoreError::FetchFailure {
                    table: T::TABLE,
                    source,
                };
                self.lock()?.fail_seed(error.clone());
                self.notify(ListNotice::FetchFailed {
                    table: T::TABLE,
                    reason: error.to_string(),
                });
                Err(error)
            }
        }
    }

    async fn refetch_in_pump(&self, resync: bool) -> Result<PumpFlow, ListStoreError> {
        match self.refetch(resync).await {
            Ok(()) | Err(ListStoreError::FetchFailure { .. }) => Ok(PumpFlow::Continue),
            Err(ListStoreError::TornDown { .. }) => Ok(PumpFlow::Stop),
            Err(other) => Err(other),
        }
    }

    fn apply_payload(&self, payload: &Value) -> Result<PumpFlow, ListStoreError> {
        if let Some(table) = payload.get("table").and_then(Value::as_str) {
            if table != T::TABLE {
                warn!(table = T::TABLE, got = table, "payload for another table dropped");
                return Ok(PumpFlow::Continue);
            }
        }
        match decode_feed_payload::<T>(payload) {
            Ok(event) => {
                self.lock()?.apply_remote_event(event);
            }
            Err(violation) => {
                warn!(table = T::TABLE, error = %violation, "malformed change payload dropped");
            }
        }
        Ok(PumpFlow::Continue)
    }

    fn on_disconnect(&self) -> Result<PumpFlow, ListStoreError> {
        warn!(table = T::TABLE, "change feed disconnected");
        self.lock()?.mark_disconnected();
        self.notify(ListNotice::SubscriptionLost { table: T::TABLE });
        Ok(PumpFlow::Continue)
    }

    async fn on_feed_message(
        &self,
        message: Option<FeedMessage>,
    ) -> Result<PumpFlow, ListStoreError> {
        match message {
            Some(FeedMessage::Payload(_)) if self.config.feed_mode == FeedMode::RefetchOnChange => {
                debug!(table = T::TABLE, "change received, refetching");
                self.refetch_in_pump(false).await
            }
            Some(FeedMessage::Payload(payload)) => self.apply_payload(&payload),
            Some(FeedMessage::Disconnected) | None => self.on_disconnect(),
            Some(FeedMessage::Reconnected) if self.config.resync_on_reconnect => {
                info!(table = T::TABLE, "change feed reconnected, resyncing");
                self.refetch_in_pump(true).await
            }
            Some(FeedMessage::Reconnected) => {
                self.lock()?.resume_without_resync();
                Ok(PumpFlow::Continue)
            }
        }
    }

    /// Narrows immediately on an identity or role change, then re-fetches
    /// so newly visible rows appear. Sign-out ends the list.
    async fn on_auth_change(&self, session: Option<Session>) -> Result<PumpFlow, ListStoreError> {
        let Some(session) = session else {
            info!(table = T::TABLE, "signed out, tearing down list");
            self.teardown();
            self.notify(ListNotice::SessionEnded { table: T::TABLE });
            return Ok(PumpFlow::Stop);
        };
        let unchanged = self.lock()?.actor() == Some(&session.actor);
        if unchanged {
            return Ok(PumpFlow::Continue);
        }
        self.lock()?.set_actor(Some(session.actor));
        self.refetch_in_pump(false).await
    }

    fn expire(&self) -> Result<PumpFlow, ListStoreError> {
        let now = self.clock.now();
        let expired = self
            .lock()?
            .expire_pending(now, self.config.echo_timeout_ns());
        if expired > 0 {
            debug!(table = T::TABLE, expired, "pending mutations settled without echo");
        }
        Ok(PumpFlow::Continue)
    }

    fn settle(
        &self,
        handle: &RollbackHandle,
        outcome: Result<MutationAck<T>, StorageError>,
    ) -> MutationResolution {
        if !self.alive.load(Ordering::Acquire) {
            debug!(table = T::TABLE, entity_id = %handle.entity_id, "late result discarded");
            return MutationResolution::Discarded;
        }
        let Ok(mut store) = self.lock() else {
            return MutationResolution::Discarded;
        };
        if store.is_torn_down() {
            return MutationResolution::Discarded;
        }
        match outcome {
            Ok(ack) => {
                store.confirm(handle, &ack, self.clock.now());
                MutationResolution::Confirmed {
                    entity_id: ack.entity_id,
                }
            }
            Err(source) => {
                store.rollback(handle);
                drop(store);
                let error = ListStoreError::MutationFailure {
                    table: T::TABLE,
                    entity_id: handle.entity_id.clone(),
                    source,
                };
                warn!(table = T::TABLE, error = %error, "mutation failed");
                self.notify(ListNotice::MutationRolledBack {
                    table: T::TABLE,
                    entity_id: handle.entity_id.clone(),
                    reason: error.to_string(),
                });
                MutationResolution::RolledBack { error }
            }
        }
    }

    fn teardown(&self) {
        self.alive.store(false, Ordering::Release);
        match self.lock() {
            Ok(mut store) => store.teardown(),
            Err(err) => warn!(table = T::TABLE, error = %err, "teardown on poisoned state"),
        }
    }
}

async fn run_pump<T, R>(
    shared: Arc<Shared<T, R>>,
    mut feed: FeedSubscription,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut auth: watch::Receiver<Option<Session>>,
    mut shutdown: watch::Receiver<bool>,
) where
    T: RealtimeEntity,
    R: LiveBackend<T>,
{
    let mut sweep = time::interval(shared.config.echo_sweep_interval);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut feed_open = true;
    let mut auth_open = true;

    loop {
        let step = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    Ok(PumpFlow::Stop)
                } else {
                    Ok(PumpFlow::Continue)
                }
            }
            Some(command) = commands.recv() => match command {
                Command::Refetch(reply) => {
                    let result = shared.refetch(false).await;
                    let _ = reply.send(result);
                    Ok(PumpFlow::Continue)
                }
            },
            changed = auth.changed(), if auth_open => match changed {
                Ok(()) => {
                    let session = auth.borrow_and_update().clone();
                    shared.on_auth_change(session).await
                }
                Err(_) => {
                    auth_open = false;
                    Ok(PumpFlow::Continue)
                }
            },
            message = feed.receiver.recv(), if feed_open => {
                if message.is_none() {
                    feed_open = false;
                }
                shared.on_feed_message(message).await
            }
            _ = sweep.tick() => shared.expire(),
        };
        match step {
            Ok(PumpFlow::Continue) => {}
            Ok(PumpFlow::Stop) => break,
            Err(err) => {
                warn!(table = T::TABLE, error = %err, "feed pump stopping");
                break;
            }
        }
    }
    shared.repo.unsubscribe(feed.handle);
    info!(table = T::TABLE, "feed pump stopped");
}

/// A table mirrored into a live, role-scoped, optimistically mutable list.
/// Dropping it tears the list down.
pub struct LiveList<T: RealtimeEntity, R: LiveBackend<T>> {
    shared: Arc<Shared<T, R>>,
    commands: mpsc::UnboundedSender<Command>,
    shutdown: watch::Sender<bool>,
    snapshots: watch::Receiver<ListSnapshot<T>>,
    pump: JoinHandle<()>,
}

impl<T, R> LiveList<T, R>
where
    T: RealtimeEntity,
    R: LiveBackend<T>,
{
    /// Subscribes, then fetches, then starts pumping the feed. Events that
    /// arrive during the fetch wait in the feed channel and are replayed on
    /// top of the seed. A failed fetch leaves the list in `FetchFailed`.
    pub async fn start(repo: Arc<R>, config: LiveListConfig) -> Result<Self, ListStoreError> {
        let session = repo.current_session().ok_or(ListStoreError::NotSignedIn)?;
        let feed = repo.subscribe_changes(T::TABLE).map_err(|source| {
            ListStoreError::SubscriptionFailure {
                table: T::TABLE,
                source,
            }
        })?;
        let auth = repo.auth_state_changes();
        let store = RealtimeListStore::new(Some(session.actor));
        let snapshots = store.subscribe();
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let shared = Arc::new(Shared {
            repo,
            store: Mutex::new(store),
            config,
            clock: RuntimeClock::start(),
            notices,
            alive: AtomicBool::new(true),
        });

        if let Err(err) = shared.refetch(false).await {
            debug!(table = T::TABLE, error = %err, "initial fetch failed, awaiting retry");
        }

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let pump = tokio::spawn(run_pump(
            Arc::clone(&shared),
            feed,
            command_rx,
            auth,
            shutdown_rx,
        ));
        info!(table = T::TABLE, "live list started");
        Ok(Self {
            shared,
            commands,
            shutdown,
            snapshots,
            pump,
        })
    }

    pub fn snapshot(&self) -> ListSnapshot<T> {
        self.snapshots.borrow().clone()
    }

    pub fn snapshots(&self) -> watch::Receiver<ListSnapshot<T>> {
        self.snapshots.clone()
    }

    pub fn notices(&self) -> broadcast::Receiver<ListNotice> {
        self.shared.notices.subscribe()
    }

    pub fn current(&self, id: &EntityId) -> Option<T> {
        self.snapshots.borrow().get(id).cloned()
    }

    pub fn actor(&self) -> Result<Option<Actor>, ListStoreError> {
        Ok(self.shared.lock()?.actor().cloned())
    }

    pub fn pending_mutations(&self) -> Result<usize, ListStoreError> {
        Ok(self.shared.lock()?.pending_mutations())
    }

    pub fn repo(&self) -> &Arc<R> {
        &self.shared.repo
    }

    pub fn is_running(&self) -> bool {
        !self.pump.is_finished()
    }

    /// User-initiated full re-fetch; also the retry after `FetchFailed`.
    pub async fn refetch(&self) -> Result<(), ListStoreError> {
        let (reply, response) = oneshot::channel();
        let torn_down = ListStoreError::TornDown { table: T::TABLE };
        self.commands
            .send(Command::Refetch(reply))
            .map_err(|_| torn_down.clone())?;
        response.await.map_err(|_| torn_down)?
    }

    /// Applies the edit locally and sends it to the table.
    pub fn issue_mutation(
        &self,
        intent: MutationIntent<T>,
    ) -> Result<IssuedMutation, ListStoreError> {
        let repo = Arc::clone(&self.shared.repo);
        self.issue_with(intent, move |request| async move {
            repo.mutate(request).await
        })
    }

    /// Like [`LiveList::issue_mutation`] but with a caller-supplied remote
    /// call, for writes that go through a stored procedure.
    pub fn issue_with<F, Fut>(
        &self,
        intent: MutationIntent<T>,
        remote: F,
    ) -> Result<IssuedMutation, ListStoreError>
    where
        F: FnOnce(MutationRequest<T>) -> Fut,
        Fut: Future<Output = Result<MutationAck<T>, StorageError>> + Send + 'static,
    {
        let receipt = self
            .shared
            .lock()?
            .apply_optimistic(intent, self.shared.clock.now())?;
        Ok(self.dispatch(receipt, remote))
    }

    /// Edits the current local row for `id` and sends the result.
    pub fn issue_update(
        &self,
        id: &EntityId,
        edit: impl FnOnce(&mut T) -> Result<(), ListStoreError>,
    ) -> Result<IssuedMutation, ListStoreError> {
        let repo = Arc::clone(&self.shared.repo);
        self.issue_update_with(id, edit, move |request| async move {
            repo.mutate(request).await
        })
    }

    pub fn issue_update_with<F, Fut>(
        &self,
        id: &EntityId,
        edit: impl FnOnce(&mut T) -> Result<(), ListStoreError>,
        remote: F,
    ) -> Result<IssuedMutation, ListStoreError>
    where
        F: FnOnce(MutationRequest<T>) -> Fut,
        Fut: Future<Output = Result<MutationAck<T>, StorageError>> + Send + 'static,
    {
        let receipt = {
            let mut store = self.shared.lock()?;
            let mut row = store
                .get(id)
                .cloned()
                .ok_or_else(|| ListStoreError::UnknownEntity {
                    table: T::TABLE,
                    entity_id: id.clone(),
                })?;
            edit(&mut row)?;
            store.apply_optimistic(MutationIntent::Update(row), self.shared.clock.now())?
        };
        Ok(self.dispatch(receipt, remote))
    }

    fn dispatch<F, Fut>(&self, receipt: OptimisticReceipt<T>, remote: F) -> IssuedMutation
    where
        F: FnOnce(MutationRequest<T>) -> Fut,
        Fut: Future<Output = Result<MutationAck<T>, StorageError>> + Send + 'static,
    {
        let OptimisticReceipt { handle, request } = receipt;
        let remote_call = remote(request);
        let shared = Arc::clone(&self.shared);
        let settle_handle = handle.clone();
        let resolution = tokio::spawn(async move {
            let outcome = remote_call.await;
            shared.settle(&settle_handle, outcome)
        });
        IssuedMutation { handle, resolution }
    }

    /// Reverts a still-unconfirmed mutation. No-op once confirmed.
    pub fn rollback(&self, handle: &RollbackHandle) -> Result<bool, ListStoreError> {
        Ok(self.shared.lock()?.rollback(handle))
    }

    /// Releases the feed subscription. In-flight remote calls still finish
    /// but their results are discarded.
    pub fn teardown(&self) {
        if !self.shared.alive.load(Ordering::Acquire) {
            return;
        }
        self.shared.teardown();
        let _ = self.shutdown.send(true);
        info!(table = T::TABLE, "live list torn down");
    }
}

impl<T, R> Drop for LiveList<T, R>
where
    T: RealtimeEntity,
    R: LiveBackend<T>,
{
    fn drop(&mut self) {
        self.teardown();
    }
}
