#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use campus_kernel_contracts::actor::{Actor, ActorId, ActorRole};
use campus_kernel_contracts::announcement::Announcement;
use campus_kernel_contracts::change::{MutationAck, MutationIntent};
use campus_kernel_contracts::classroom::{Classroom, ClassroomStatus};
use campus_kernel_contracts::{EntityId, MonotonicTimeNs, RealtimeEntity};
use campus_os::list_store::{ListSnapshot, ListStoreState};
use campus_os::{ListNotice, ListStoreError, LiveList, LiveListConfig, MutationResolution};
use campus_storage::{InMemoryCampusStore, StorageError};
use serde_json::json;
use tokio::sync::{oneshot, watch};

const WAIT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn actor(id: &str, role: ActorRole) -> Actor {
    Actor::v1(ActorId::new(id).unwrap(), role, None).unwrap()
}

fn id(raw: &str) -> EntityId {
    EntityId::new(raw).unwrap()
}

fn room(raw: &str, name: &str, status: ClassroomStatus) -> Classroom {
    Classroom::v1(id(raw), name.into(), "AB1".into(), 1, status).unwrap()
}

fn announcement(raw: &str, target: Option<ActorRole>) -> Announcement {
    Announcement::v1(
        id(raw),
        format!("notice {raw}"),
        "details".into(),
        "2025-01-10T09:00:00Z".parse().unwrap(),
        ActorId::new("admin_1").unwrap(),
        target,
    )
    .unwrap()
}

fn store_with_rooms(signed_in: ActorRole) -> Arc<InMemoryCampusStore> {
    init_tracing();
    let store = InMemoryCampusStore::new_in_memory();
    store
        .seed_rows(vec![
            room("r1", "101", ClassroomStatus::Available),
            room("r2", "102", ClassroomStatus::Occupied),
        ])
        .unwrap();
    store
        .sign_in(actor("user_1", signed_in), MonotonicTimeNs(1))
        .unwrap();
    Arc::new(store)
}

async fn wait_for<T: Clone>(
    rx: &mut watch::Receiver<ListSnapshot<T>>,
    mut pred: impl FnMut(&ListSnapshot<T>) -> bool,
) -> ListSnapshot<T> {
    tokio::time::timeout(WAIT, rx.wait_for(|snapshot| pred(snapshot)))
        .await
        .expect("snapshot condition not reached in time")
        .expect("snapshot channel closed")
        .clone()
}

async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn status_of(snapshot: &ListSnapshot<Classroom>, raw: &str) -> Option<ClassroomStatus> {
    snapshot.get(&id(raw)).map(|row| row.status)
}

#[tokio::test]
async fn at_live_01_start_seeds_from_fetch() {
    let store = store_with_rooms(ActorRole::Student);
    let list = LiveList::<Classroom, _>::start(Arc::clone(&store), LiveListConfig::mvp_v1())
        .await
        .unwrap();

    let snapshot = list.snapshot();
    assert_eq!(snapshot.state, ListStoreState::Live);
    assert_eq!(snapshot.ids(), vec![id("r1"), id("r2")]);
    assert!(list.is_running());
    assert_eq!(store.subscriber_count(Classroom::TABLE), 1);
}

#[tokio::test]
async fn at_live_02_not_signed_in_fails_to_start() {
    init_tracing();
    let store = Arc::new(InMemoryCampusStore::new_in_memory());
    let started = LiveList::<Classroom, _>::start(store, LiveListConfig::mvp_v1()).await;
    assert!(matches!(started, Err(ListStoreError::NotSignedIn)));
}

#[tokio::test]
async fn at_live_03_remote_writes_reach_the_list() {
    let store = store_with_rooms(ActorRole::Student);
    let list = LiveList::<Classroom, _>::start(Arc::clone(&store), LiveListConfig::mvp_v1())
        .await
        .unwrap();
    let mut rx = list.snapshots();

    store
        .server_upsert(room("r3", "Lab A", ClassroomStatus::Maintenance))
        .unwrap();
    store
        .server_upsert(room("r1", "101", ClassroomStatus::Occupied))
        .unwrap();
    store.server_delete::<Classroom>(&id("r2")).unwrap();

    let snapshot = wait_for(&mut rx, |s| {
        s.len() == 2 && status_of(s, "r1") == Some(ClassroomStatus::Occupied)
    })
    .await;
    assert_eq!(snapshot.ids(), vec![id("r1"), id("r3")]);
}

#[tokio::test]
async fn at_live_04_failed_update_rolls_back_with_notice() {
    let store = store_with_rooms(ActorRole::ClassRepresentative);
    let list = LiveList::<Classroom, _>::start(Arc::clone(&store), LiveListConfig::mvp_v1())
        .await
        .unwrap();
    let mut notices = list.notices();
    store
        .fail_next_mutation(Classroom::TABLE, StorageError::Network("timeout".into()))
        .unwrap();

    let issued = list
        .issue_update(&id("r1"), |row| {
            row.status = ClassroomStatus::Occupied;
            Ok(())
        })
        .unwrap();
    assert_eq!(
        status_of(&list.snapshot(), "r1"),
        Some(ClassroomStatus::Occupied)
    );

    let resolution = issued.settled().await;
    assert!(matches!(resolution, MutationResolution::RolledBack { .. }));
    let snapshot = list.snapshot();
    assert_eq!(status_of(&snapshot, "r1"), Some(ClassroomStatus::Available));
    assert_eq!(snapshot.ids(), vec![id("r1"), id("r2")]);
    assert_eq!(list.pending_mutations().unwrap(), 0);

    let notice = tokio::time::timeout(WAIT, notices.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        notice,
        ListNotice::MutationRolledBack { table: "classrooms", ref entity_id, .. } if entity_id == &id("r1")
    ));
}

#[tokio::test]
async fn at_live_05_confirmed_update_is_not_applied_twice() {
    let store = store_with_rooms(ActorRole::Admin);
    let list = LiveList::<Classroom, _>::start(Arc::clone(&store), LiveListConfig::mvp_v1())
        .await
        .unwrap();
    let mut rx = list.snapshots();

    let issued = list
        .issue_update(&id("r2"), |row| {
            row.status = ClassroomStatus::Available;
            Ok(())
        })
        .unwrap();
    assert_eq!(
        issued.settled().await,
        MutationResolution::Confirmed {
            entity_id: id("r2")
        }
    );

    wait_for(&mut rx, |s| {
        status_of(s, "r2") == Some(ClassroomStatus::Available)
    })
    .await;
    eventually(|| list.pending_mutations().unwrap() == 0).await;
    assert_eq!(list.snapshot().len(), 2);
    assert_eq!(
        store.rows::<Classroom>().unwrap()[1].status,
        ClassroomStatus::Available
    );
}

#[tokio::test(start_paused = true)]
async fn at_live_06_missing_echo_settles_after_timeout() {
    let store = store_with_rooms(ActorRole::Faculty);
    store.set_echo_enabled(Classroom::TABLE, false).unwrap();
    let list = LiveList::<Classroom, _>::start(Arc::clone(&store), LiveListConfig::mvp_v1())
        .await
        .unwrap();

    let issued = list
        .issue_update(&id("r1"), |row| {
            row.status = ClassroomStatus::Maintenance;
            Ok(())
        })
        .unwrap();
    assert!(matches!(
        issued.settled().await,
        MutationResolution::Confirmed { .. }
    ));
    assert_eq!(list.pending_mutations().unwrap(), 1);

    tokio::time::sleep(Duration::from_millis(4_000)).await;
    assert_eq!(list.pending_mutations().unwrap(), 0);
    assert_eq!(
        status_of(&list.snapshot(), "r1"),
        Some(ClassroomStatus::Maintenance)
    );
}

#[tokio::test]
async fn at_live_07_reconnect_resyncs_missed_changes() {
    let store = store_with_rooms(ActorRole::Student);
    let list = LiveList::<Classroom, _>::start(Arc::clone(&store), LiveListConfig::mvp_v1())
        .await
        .unwrap();
    let mut rx = list.snapshots();
    let mut notices = list.notices();

    store.disconnect_feed(Classroom::TABLE).unwrap();
    wait_for(&mut rx, |s| s.state == ListStoreState::Disconnected).await;

    store
        .server_upsert(room("r1", "101", ClassroomStatus::Maintenance))
        .unwrap();
    store
        .server_upsert(room("r9", "Seminar Hall", ClassroomStatus::Available))
        .unwrap();
    assert_eq!(
        status_of(&list.snapshot(), "r1"),
        Some(ClassroomStatus::Available)
    );

    store.reconnect_feed(Classroom::TABLE).unwrap();
    let snapshot = wait_for(&mut rx, |s| {
        s.state == ListStoreState::Live && s.len() == 3
    })
    .await;
    assert_eq!(status_of(&snapshot, "r1"), Some(ClassroomStatus::Maintenance));

    let mut seen = Vec::new();
    while let Ok(Ok(notice)) = tokio::time::timeout(WAIT, notices.recv()).await {
        let resynced = matches!(notice, ListNotice::Resynced { .. });
        seen.push(notice);
        if resynced {
            break;
        }
    }
    assert_eq!(
        seen,
        vec![
            ListNotice::SubscriptionLost {
                table: Classroom::TABLE
            },
            ListNotice::Resynced {
                table: Classroom::TABLE
            },
        ]
    );
}

#[tokio::test]
async fn at_live_08_reconnect_without_resync_stays_stale() {
    let store = store_with_rooms(ActorRole::Student);
    let config = LiveListConfig {
        resync_on_reconnect: false,
        ..LiveListConfig::mvp_v1()
    };
    let list = LiveList::<Classroom, _>::start(Arc::clone(&store), config)
        .await
        .unwrap();
    let mut rx = list.snapshots();

    store.disconnect_feed(Classroom::TABLE).unwrap();
    wait_for(&mut rx, |s| s.state == ListStoreState::Disconnected).await;
    store
        .server_upsert(room("r1", "101", ClassroomStatus::Maintenance))
        .unwrap();
    store.reconnect_feed(Classroom::TABLE).unwrap();

    let snapshot = wait_for(&mut rx, |s| s.state == ListStoreState::Live).await;
    assert_eq!(status_of(&snapshot, "r1"), Some(ClassroomStatus::Available));
}

#[tokio::test]
async fn at_live_09_role_change_narrows_then_refetches() {
    init_tracing();
    let store = InMemoryCampusStore::new_in_memory();
    store
        .seed_rows(vec![
            announcement("a1", None),
            announcement("a2", Some(ActorRole::Student)),
            announcement("a3", Some(ActorRole::Faculty)),
        ])
        .unwrap();
    store
        .sign_in(actor("user_1", ActorRole::Student), MonotonicTimeNs(1))
        .unwrap();
    let store = Arc::new(store);
    let list = LiveList::<Announcement, _>::start(Arc::clone(&store), LiveListConfig::mvp_v1())
        .await
        .unwrap();
    let mut rx = list.snapshots();
    let mut visible = list.snapshot().ids();
    visible.sort();
    assert_eq!(visible, vec![id("a1"), id("a2")]);

    store
        .sign_in(actor("user_1", ActorRole::Faculty), MonotonicTimeNs(2))
        .unwrap();
    let snapshot = wait_for(&mut rx, |s| {
        s.state == ListStoreState::Live && s.get(&id("a3")).is_some()
    })
    .await;
    let mut visible = snapshot.ids();
    visible.sort();
    assert_eq!(visible, vec![id("a1"), id("a3")]);
    assert_eq!(list.actor().unwrap().map(|a| a.role), Some(ActorRole::Faculty));
}

#[tokio::test]
async fn at_live_10_sign_out_tears_down_and_unsubscribes() {
    let store = store_with_rooms(ActorRole::Admin);
    let list = LiveList::<Classroom, _>::start(Arc::clone(&store), LiveListConfig::mvp_v1())
        .await
        .unwrap();
    let mut rx = list.snapshots();
    let mut notices = list.notices();

    store.sign_out().unwrap();
    wait_for(&mut rx, |s| s.state == ListStoreState::TornDown).await;
    eventually(|| store.subscriber_count(Classroom::TABLE) == 0).await;

    let notice = tokio::time::timeout(WAIT, notices.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        notice,
        ListNotice::SessionEnded {
            table: Classroom::TABLE
        }
    );

    let late = list.issue_mutation(MutationIntent::Delete(id("r1")));
    assert!(matches!(late, Err(ListStoreError::TornDown { .. })));
    assert!(matches!(
        list.refetch().await,
        Err(ListStoreError::TornDown { .. })
    ));
}

#[tokio::test]
async fn at_live_11_malformed_and_foreign_payloads_are_dropped() {
    let store = store_with_rooms(ActorRole::Student);
    let list = LiveList::<Classroom, _>::start(Arc::clone(&store), LiveListConfig::mvp_v1())
        .await
        .unwrap();
    let mut rx = list.snapshots();

    store
        .publish_raw(
            Classroom::TABLE,
            json!({"eventType": "UPDATE", "new": {"garbage": true}, "old": {}}),
        )
        .unwrap();
    store
        .publish_raw(
            Classroom::TABLE,
            json!({
                "table": "announcements",
                "eventType": "DELETE",
                "new": {},
                "old": {"id": "r1"}
            }),
        )
        .unwrap();
    store
        .server_upsert(room("r3", "103", ClassroomStatus::Available))
        .unwrap();

    let snapshot = wait_for(&mut rx, |s| s.len() == 3).await;
    assert_eq!(snapshot.state, ListStoreState::Live);
    assert!(snapshot.get(&id("r1")).is_some());
    assert!(list.is_running());
}

#[tokio::test]
async fn at_live_12_failed_fetch_recovers_on_refetch() {
    let store = store_with_rooms(ActorRole::Student);
    store
        .fail_next_fetch(Classroom::TABLE, StorageError::Network("offline".into()))
        .unwrap();
    let list = LiveList::<Classroom, _>::start(Arc::clone(&store), LiveListConfig::mvp_v1())
        .await
        .unwrap();

    let failed = list.snapshot();
    assert_eq!(failed.state, ListStoreState::FetchFailed);
    assert!(failed.is_empty());
    assert!(matches!(
        failed.fetch_error,
        Some(ListStoreError::FetchFailure { .. })
    ));

    list.refetch().await.unwrap();
    let snapshot = list.snapshot();
    assert_eq!(snapshot.state, ListStoreState::Live);
    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.fetch_error.is_none());
}

#[tokio::test]
async fn at_live_13_drop_releases_subscription() {
    let store = store_with_rooms(ActorRole::Student);
    let list = LiveList::<Classroom, _>::start(Arc::clone(&store), LiveListConfig::mvp_v1())
        .await
        .unwrap();
    assert_eq!(store.subscriber_count(Classroom::TABLE), 1);

    drop(list);
    eventually(|| store.subscriber_count(Classroom::TABLE) == 0).await;
}

#[tokio::test]
async fn at_live_14_own_delete_wins_over_foreign_update_in_flight() {
    let store = store_with_rooms(ActorRole::ClassRepresentative);
    let list = LiveList::<Classroom, _>::start(Arc::clone(&store), LiveListConfig::mvp_v1())
        .await
        .unwrap();

    let issued = list.issue_mutation(MutationIntent::Delete(id("r1"))).unwrap();
    store
        .server_upsert(room("r1", "101", ClassroomStatus::Occupied))
        .unwrap();
    assert!(matches!(
        issued.settled().await,
        MutationResolution::Confirmed { .. }
    ));
    eventually(|| list.pending_mutations().unwrap() == 0).await;

    assert_eq!(list.snapshot().ids(), vec![id("r2")]);
    assert_eq!(store.rows::<Classroom>().unwrap().len(), 1);
}

#[tokio::test]
async fn at_live_15_failed_update_keeps_foreign_row_that_landed_meanwhile() {
    let store = store_with_rooms(ActorRole::ClassRepresentative);
    let list = LiveList::<Classroom, _>::start(Arc::clone(&store), LiveListConfig::mvp_v1())
        .await
        .unwrap();
    let mut rx = list.snapshots();
    let (release, hold) = oneshot::channel::<()>();

    let issued = list
        .issue_update_with(
            &id("r1"),
            |row| {
                row.status = ClassroomStatus::Occupied;
                Ok(())
            },
            move |_request| async move {
                let _ = hold.await;
                Err::<MutationAck<Classroom>, _>(StorageError::Network("offline".into()))
            },
        )
        .unwrap();
    store
        .server_upsert(room("r1", "101", ClassroomStatus::Maintenance))
        .unwrap();
    wait_for(&mut rx, |s| {
        status_of(s, "r1") == Some(ClassroomStatus::Maintenance)
    })
    .await;

    release.send(()).unwrap();
    assert!(matches!(
        issued.settled().await,
        MutationResolution::RolledBack { .. }
    ));
    assert_eq!(
        status_of(&list.snapshot(), "r1"),
        Some(ClassroomStatus::Maintenance)
    );
}

#[tokio::test]
async fn at_live_16_role_change_with_edit_in_flight_hides_row_after_refetch() {
    init_tracing();
    let store = InMemoryCampusStore::new_in_memory();
    store
        .seed_rows(vec![
            announcement("a1", Some(ActorRole::Faculty)),
            announcement("a2", None),
        ])
        .unwrap();
    store
        .sign_in(actor("u1", ActorRole::Admin), MonotonicTimeNs(1))
        .unwrap();
    let store = Arc::new(store);
    let list = LiveList::<Announcement, _>::start(Arc::clone(&store), LiveListConfig::mvp_v1())
        .await
        .unwrap();
    let (release, hold) = oneshot::channel::<()>();

    let issued = list
        .issue_update_with(
            &id("a1"),
            |row| {
                row.title = "notice a1 (revised)".into();
                Ok(())
            },
            move |_request| async move {
                let _ = hold.await;
                Err::<MutationAck<Announcement>, _>(StorageError::Network("offline".into()))
            },
        )
        .unwrap();
    store
        .sign_in(actor("u1", ActorRole::Student), MonotonicTimeNs(2))
        .unwrap();
    eventually(|| {
        list.actor()
            .unwrap()
            .is_some_and(|actor| actor.role == ActorRole::Student)
    })
    .await;
    list.refetch().await.unwrap();

    assert_eq!(list.snapshot().ids(), vec![id("a2")]);
    assert_eq!(list.pending_mutations().unwrap(), 1);

    release.send(()).unwrap();
    assert!(matches!(
        issued.settled().await,
        MutationResolution::RolledBack { .. }
    ));
    assert_eq!(list.snapshot().ids(), vec![id("a2")]);
}

#[tokio::test]
async fn at_live_17_refetch_mode_reloads_table_on_any_change() {
    let store = store_with_rooms(ActorRole::Student);
    let list = LiveList::<Classroom, _>::start(
        Arc::clone(&store),
        LiveListConfig::refetch_on_change(),
    )
    .await
    .unwrap();
    let mut rx = list.snapshots();

    store
        .seed_rows(vec![room("r3", "103", ClassroomStatus::Available)])
        .unwrap();
    store
        .publish_raw(Classroom::TABLE, json!({"eventType": "UPDATE"}))
        .unwrap();

    let snapshot = wait_for(&mut rx, |s| {
        s.state == ListStoreState::Live && s.len() == 3
    })
    .await;
    assert_eq!(snapshot.ids(), vec![id("r1"), id("r2"), id("r3")]);
}
