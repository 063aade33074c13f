#![forbid(unsafe_code)]

use campus_kernel_contracts::actor::{Actor, ActorId, ActorRole};
use campus_kernel_contracts::announcement::Announcement;
use campus_kernel_contracts::canteen::{MenuCategory, MenuItem};
use campus_kernel_contracts::change::{
    decode_feed_payload, ChangeEvent, MutationKind, MutationRequest,
};
use campus_kernel_contracts::classroom::{Classroom, ClassroomStatus};
use campus_kernel_contracts::faculty::{FacultyAvailability, FacultyStatus};
use campus_kernel_contracts::feedback::{Feedback, FeedbackStatus};
use campus_kernel_contracts::notification::NotificationItem;
use campus_kernel_contracts::visibility::FetchFilter;
use campus_kernel_contracts::{EntityId, MonotonicTimeNs, RealtimeEntity};
use campus_storage::repo::{
    ChangeFeedRepo, EntityTableRepo, FeedMessage, MenuVoteRepo, NotificationRepo, SessionRepo,
};
use campus_storage::{InMemoryCampusStore, StorageError};
use rust_decimal::Decimal;

fn actor(id: &str, role: ActorRole) -> Actor {
    Actor::v1(ActorId::new(id).unwrap(), role, None).unwrap()
}

fn id(raw: &str) -> EntityId {
    EntityId::new(raw).unwrap()
}

fn room(raw: &str, name: &str) -> Classroom {
    Classroom::v1(
        id(raw),
        name.into(),
        "AB1".into(),
        1,
        ClassroomStatus::Available,
    )
    .unwrap()
}

fn announcement(raw: &str, target: Option<ActorRole>) -> Announcement {
    Announcement::v1(
        id(raw),
        "Exam schedule".into(),
        "Posted on the board".into(),
        "2025-01-10T09:00:00Z".parse().unwrap(),
        ActorId::new("admin_1").unwrap(),
        target,
    )
    .unwrap()
}

fn dosa() -> MenuItem {
    MenuItem::v1(
        id("m1"),
        "Masala Dosa".into(),
        MenuCategory::Breakfast,
        Decimal::new(4550, 2),
        0,
        true,
    )
    .unwrap()
}

fn next_event<T: RealtimeEntity>(
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<FeedMessage>,
) -> ChangeEvent<T> {
    match rx.try_recv().unwrap() {
        FeedMessage::Payload(payload) => decode_feed_payload(&payload).unwrap(),
        other => panic!("expected payload, got {other:?}"),
    }
}

#[tokio::test]
async fn at_hosted_db_01_insert_assigns_id_and_echoes() {
    let store = InMemoryCampusStore::new_in_memory();
    store
        .sign_in(actor("cr_1", ActorRole::ClassRepresentative), MonotonicTimeNs(1))
        .unwrap();
    let mut sub = store.subscribe_changes(Classroom::TABLE).unwrap();

    let ack = store
        .mutate(MutationRequest {
            kind: MutationKind::Insert,
            entity_id: EntityId::temporary("x").unwrap(),
            row: Some(room("tmp-x", "101")),
        })
        .await
        .unwrap();

    assert_eq!(ack.entity_id.as_str(), "classrooms-1");
    let echoed: ChangeEvent<Classroom> = next_event(&mut sub.receiver);
    assert_eq!(echoed.entity_id(), &ack.entity_id);
    assert_eq!(store.rows::<Classroom>().unwrap().len(), 1);
}

#[tokio::test]
async fn at_hosted_db_02_write_permissions_follow_roles() {
    let store = InMemoryCampusStore::new_in_memory();
    store.seed_rows(vec![room("r1", "101")]).unwrap();
    store
        .sign_in(actor("s1", ActorRole::Student), MonotonicTimeNs(1))
        .unwrap();

    let err = store
        .mutate(MutationRequest {
            kind: MutationKind::Update,
            entity_id: id("r1"),
            row: Some(room("r1", "102")),
        })
        .await
        .unwrap_err();
    assert_eq!(
        err,
        StorageError::PermissionDenied {
            table: Classroom::TABLE
        }
    );

    let own_email = Actor::v1(
        ActorId::new("f1").unwrap(),
        ActorRole::Faculty,
        Some("rao@campus.edu".into()),
    )
    .unwrap();
    let rao = FacultyStatus::v1(
        id("fa1"),
        "Dr. Rao".into(),
        "rao@campus.edu".into(),
        "CSE".into(),
        FacultyAvailability::Available,
    )
    .unwrap();
    let mut other = rao.clone();
    other.id = id("fa2");
    other.email = "iyer@campus.edu".into();
    store.seed_rows(vec![rao.clone(), other.clone()]).unwrap();
    store.sign_in(own_email, MonotonicTimeNs(2)).unwrap();

    let mut busy = rao.clone();
    busy.status = FacultyAvailability::Busy;
    assert!(store
        .mutate(MutationRequest {
            kind: MutationKind::Update,
            entity_id: id("fa1"),
            row: Some(busy),
        })
        .await
        .is_ok());
    other.status = FacultyAvailability::Busy;
    assert!(store
        .mutate(MutationRequest {
            kind: MutationKind::Update,
            entity_id: id("fa2"),
            row: Some(other),
        })
        .await
        .is_err());
}

#[tokio::test]
async fn at_hosted_db_03_fetch_pushes_role_filter_down() {
    let store = InMemoryCampusStore::new_in_memory();
    store
        .seed_rows(vec![
            announcement("a1", None),
            announcement("a2", Some(ActorRole::Faculty)),
            announcement("a3", Some(ActorRole::Student)),
        ])
        .unwrap();
    let student = actor("s1", ActorRole::Student);
    store.sign_in(student.clone(), MonotonicTimeNs(1)).unwrap();

    let scoped: Vec<Announcement> = store
        .fetch_all(&FetchFilter::for_actor(Some(&student)))
        .await
        .unwrap();
    let ids: Vec<&str> = scoped.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["a1", "a3"]);

    let unscoped: Vec<Announcement> = store.fetch_all(&FetchFilter::Unscoped).await.unwrap();
    assert_eq!(unscoped.len(), 3);
}

#[tokio::test]
async fn at_hosted_db_04_queued_faults_fail_in_order() {
    let store = InMemoryCampusStore::new_in_memory();
    store
        .sign_in(actor("s1", ActorRole::Student), MonotonicTimeNs(1))
        .unwrap();
    store
        .fail_next_fetch(Classroom::TABLE, StorageError::Network("timeout".into()))
        .unwrap();

    let first: Result<Vec<Classroom>, _> = store.fetch_all(&FetchFilter::Unscoped).await;
    assert_eq!(first, Err(StorageError::Network("timeout".into())));
    let second: Result<Vec<Classroom>, _> = store.fetch_all(&FetchFilter::Unscoped).await;
    assert!(second.is_ok());
}

#[tokio::test]
async fn at_hosted_db_05_disconnect_drops_changes_until_reconnect() {
    let store = InMemoryCampusStore::new_in_memory();
    store
        .sign_in(actor("s1", ActorRole::Student), MonotonicTimeNs(1))
        .unwrap();
    let mut sub = store.subscribe_changes(Classroom::TABLE).unwrap();

    store.disconnect_feed(Classroom::TABLE).unwrap();
    assert_eq!(sub.receiver.try_recv().unwrap(), FeedMessage::Disconnected);
    store.server_upsert(room("r1", "101")).unwrap();
    store.reconnect_feed(Classroom::TABLE).unwrap();
    assert_eq!(sub.receiver.try_recv().unwrap(), FeedMessage::Reconnected);
    assert!(sub.receiver.try_recv().is_err());
    assert_eq!(store.rows::<Classroom>().unwrap().len(), 1);
}

#[tokio::test]
async fn at_hosted_db_06_echo_suppression_only_hides_client_writes() {
    let store = InMemoryCampusStore::new_in_memory();
    store
        .sign_in(actor("admin_1", ActorRole::Admin), MonotonicTimeNs(1))
        .unwrap();
    store.set_echo_enabled(Classroom::TABLE, false).unwrap();
    let mut sub = store.subscribe_changes(Classroom::TABLE).unwrap();

    store
        .mutate(MutationRequest {
            kind: MutationKind::Insert,
            entity_id: EntityId::temporary("a").unwrap(),
            row: Some(room("tmp-a", "101")),
        })
        .await
        .unwrap();
    assert!(sub.receiver.try_recv().is_err());

    store.server_upsert(room("r9", "909")).unwrap();
    let event: ChangeEvent<Classroom> = next_event(&mut sub.receiver);
    assert_eq!(event.entity_id().as_str(), "r9");
}

#[tokio::test]
async fn at_hosted_db_07_votes_are_counted_once_per_user() {
    let store = InMemoryCampusStore::new_in_memory();
    store.seed_rows(vec![dosa()]).unwrap();
    let student = actor("s1", ActorRole::Student);
    store.sign_in(student.clone(), MonotonicTimeNs(1)).unwrap();
    let mut sub = store.subscribe_changes(MenuItem::TABLE).unwrap();

    let voted = store.cast_vote(&student.identity, &id("m1")).await.unwrap();
    assert_eq!(voted.votes, 1);
    let echoed: ChangeEvent<MenuItem> = next_event(&mut sub.receiver);
    assert_eq!(echoed.row().map(|row| row.votes), Some(1));

    assert!(matches!(
        store.cast_vote(&student.identity, &id("m1")).await,
        Err(StorageError::Rejected { .. })
    ));
    let ids = store.voted_item_ids(&student.identity).await.unwrap();
    assert!(ids.contains(&id("m1")));

    let retracted = store
        .retract_vote(&student.identity, &id("m1"))
        .await
        .unwrap();
    assert_eq!(retracted.votes, 0);
    assert!(store
        .retract_vote(&student.identity, &id("m1"))
        .await
        .is_err());
}

#[tokio::test]
async fn at_hosted_db_08_reset_votes_requires_canteen_role() {
    let store = InMemoryCampusStore::new_in_memory();
    let mut item = dosa();
    item.votes = 4;
    store.seed_rows(vec![item]).unwrap();
    store
        .sign_in(actor("s1", ActorRole::Student), MonotonicTimeNs(1))
        .unwrap();
    assert!(store.reset_votes().await.is_err());

    store
        .sign_in(actor("c1", ActorRole::CanteenStaff), MonotonicTimeNs(2))
        .unwrap();
    store.reset_votes().await.unwrap();
    assert_eq!(store.rows::<MenuItem>().unwrap()[0].votes, 0);
}

#[tokio::test]
async fn at_hosted_db_09_announcement_trigger_fills_unread_view_per_owner() {
    let store = InMemoryCampusStore::new_in_memory();
    let student = actor("s1", ActorRole::Student);
    let faculty = actor("f1", ActorRole::Faculty);
    store.register_actor(faculty.clone()).unwrap();
    store.sign_in(student.clone(), MonotonicTimeNs(1)).unwrap();
    let mut student_feed = store.subscribe_changes(NotificationItem::TABLE).unwrap();

    store
        .sign_in(actor("admin_1", ActorRole::Admin), MonotonicTimeNs(2))
        .unwrap();
    store
        .mutate(MutationRequest {
            kind: MutationKind::Insert,
            entity_id: EntityId::temporary("n").unwrap(),
            row: Some(announcement("tmp-n", Some(ActorRole::Student))),
        })
        .await
        .unwrap();

    let rows = store.rows::<NotificationItem>().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].user_id, student.identity);
    let event: ChangeEvent<NotificationItem> = next_event(&mut student_feed.receiver);
    assert_eq!(event.entity_id(), &rows[0].notification_id);

    store.sign_in(student.clone(), MonotonicTimeNs(3)).unwrap();
    let own: Vec<NotificationItem> = store.fetch_all(&FetchFilter::Unscoped).await.unwrap();
    assert_eq!(own.len(), 1);
    store
        .mark_read(&student.identity, &[rows[0].notification_id.clone()])
        .await
        .unwrap();
    let deleted: ChangeEvent<NotificationItem> = next_event(&mut student_feed.receiver);
    assert_eq!(deleted, ChangeEvent::Delete(rows[0].notification_id.clone()));
    assert!(store.rows::<NotificationItem>().unwrap().is_empty());
}

#[tokio::test]
async fn at_hosted_db_10_auth_changes_are_observable() {
    let store = InMemoryCampusStore::new_in_memory();
    let mut rx = store.auth_state_changes();
    assert!(rx.borrow().is_none());
    store
        .sign_in(actor("s1", ActorRole::Student), MonotonicTimeNs(1))
        .unwrap();
    rx.changed().await.unwrap();
    assert!(rx.borrow().is_some());
    assert!(store.current_session().is_some());
    store.sign_out().unwrap();
    rx.changed().await.unwrap();
    assert!(rx.borrow().is_none());
}

fn unread(raw: &str, user: &str) -> NotificationItem {
    NotificationItem {
        notification_id: id(raw),
        user_id: ActorId::new(user).unwrap(),
        is_read: false,
        notification_created_at: "2025-01-10T09:00:00Z".parse().unwrap(),
        announcement_id: id("a1"),
        title: "Exam schedule".into(),
        content: "Posted on the board".into(),
        created_by: ActorId::new("admin_1").unwrap(),
        target_role: None,
    }
}

fn feedback(raw: &str, user: &str) -> Feedback {
    Feedback::v1(
        id(raw),
        ActorId::new(user).unwrap(),
        "Asha".into(),
        "asha@campus.edu".into(),
        "Wifi in AB1".into(),
        "Drops every hour".into(),
        "2025-01-10T09:00:00Z".parse().unwrap(),
    )
    .unwrap()
}

#[tokio::test]
async fn at_hosted_db_11_faculty_email_match_ignores_case() {
    let store = InMemoryCampusStore::new_in_memory();
    let rao = FacultyStatus::v1(
        id("fa1"),
        "Dr. Rao".into(),
        "Rao@Campus.edu".into(),
        "CSE".into(),
        FacultyAvailability::Available,
    )
    .unwrap();
    store.seed_rows(vec![rao.clone()]).unwrap();
    let faculty = Actor::v1(
        ActorId::new("f1").unwrap(),
        ActorRole::Faculty,
        Some("rao@campus.edu".into()),
    )
    .unwrap();
    store.sign_in(faculty, MonotonicTimeNs(1)).unwrap();

    let mut busy = rao;
    busy.status = FacultyAvailability::Busy;
    assert!(store
        .mutate(MutationRequest {
            kind: MutationKind::Update,
            entity_id: id("fa1"),
            row: Some(busy),
        })
        .await
        .is_ok());
    assert_eq!(
        store.rows::<FacultyStatus>().unwrap()[0].status,
        FacultyAvailability::Busy
    );
}

#[tokio::test]
async fn at_hosted_db_12_mark_read_is_all_or_nothing() {
    let store = InMemoryCampusStore::new_in_memory();
    store
        .seed_rows(vec![unread("n1", "s1"), unread("n2", "s1"), unread("n3", "s2")])
        .unwrap();
    let student = actor("s1", ActorRole::Student);
    store.sign_in(student.clone(), MonotonicTimeNs(1)).unwrap();
    let mut feed = store.subscribe_changes(NotificationItem::TABLE).unwrap();

    let err = store
        .mark_read(&student.identity, &[id("n1"), id("n3")])
        .await
        .unwrap_err();
    assert_eq!(
        err,
        StorageError::NotFound {
            table: NotificationItem::TABLE,
            key: "n3".into()
        }
    );
    assert_eq!(store.rows::<NotificationItem>().unwrap().len(), 3);
    assert!(feed.receiver.try_recv().is_err());

    store
        .mark_read(&student.identity, &[id("n1"), id("n2")])
        .await
        .unwrap();
    let left = store.rows::<NotificationItem>().unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].notification_id, id("n3"));
}

#[tokio::test]
async fn at_hosted_db_13_echo_suppression_spares_other_sessions() {
    let store = InMemoryCampusStore::new_in_memory();
    store.seed_rows(vec![dosa()]).unwrap();
    store
        .sign_in(actor("s1", ActorRole::Student), MonotonicTimeNs(1))
        .unwrap();
    let mut watcher = store.subscribe_changes(MenuItem::TABLE).unwrap();
    let voter = actor("s2", ActorRole::Student);
    store.sign_in(voter.clone(), MonotonicTimeNs(2)).unwrap();
    let mut own = store.subscribe_changes(MenuItem::TABLE).unwrap();
    store.set_echo_enabled(MenuItem::TABLE, false).unwrap();

    store.cast_vote(&voter.identity, &id("m1")).await.unwrap();
    assert!(own.receiver.try_recv().is_err());
    let seen: ChangeEvent<MenuItem> = next_event(&mut watcher.receiver);
    assert_eq!(seen.row().map(|row| row.votes), Some(1));
}

#[tokio::test]
async fn at_hosted_db_14_feedback_is_private_to_author_and_admins() {
    let store = InMemoryCampusStore::new_in_memory();
    store.seed_rows(vec![feedback("fb0", "s2")]).unwrap();
    let admin = actor("admin_1", ActorRole::Admin);
    store.sign_in(admin.clone(), MonotonicTimeNs(1)).unwrap();
    let mut admin_feed = store.subscribe_changes(Feedback::TABLE).unwrap();
    let author = actor("s1", ActorRole::Student);
    store.sign_in(author.clone(), MonotonicTimeNs(2)).unwrap();

    let forged = store
        .mutate(MutationRequest {
            kind: MutationKind::Insert,
            entity_id: EntityId::temporary("f").unwrap(),
            row: Some(feedback("tmp-f", "s2")),
        })
        .await;
    assert_eq!(
        forged.unwrap_err(),
        StorageError::PermissionDenied {
            table: Feedback::TABLE
        }
    );
    let ack = store
        .mutate(MutationRequest {
            kind: MutationKind::Insert,
            entity_id: EntityId::temporary("f").unwrap(),
            row: Some(feedback("tmp-f", "s1")),
        })
        .await
        .unwrap();
    let submitted: ChangeEvent<Feedback> = next_event(&mut admin_feed.receiver);
    assert_eq!(submitted.entity_id(), &ack.entity_id);

    let mine: Vec<Feedback> = store.fetch_all(&FetchFilter::Unscoped).await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].user_id, author.identity);

    let reviewed = mine[0].with_status(
        FeedbackStatus::Reviewed,
        "2025-01-11T10:00:00Z".parse().unwrap(),
    );
    let update = MutationRequest {
        kind: MutationKind::Update,
        entity_id: ack.entity_id.clone(),
        row: Some(reviewed),
    };
    assert!(store.mutate(update.clone()).await.is_err());

    store.sign_in(admin, MonotonicTimeNs(3)).unwrap();
    let all: Vec<Feedback> = store.fetch_all(&FetchFilter::Unscoped).await.unwrap();
    assert_eq!(all.len(), 2);
    store.mutate(update).await.unwrap();
    let status_change: ChangeEvent<Feedback> = next_event(&mut admin_feed.receiver);
    assert_eq!(
        status_change.row().map(|row| row.status),
        Some(FeedbackStatus::Reviewed)
    );
}
