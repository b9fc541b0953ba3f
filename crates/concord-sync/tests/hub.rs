mod common;

use std::collections::BTreeSet;

use common::*;
use concord_shared::{DiscussionKind, DiscussionStatus};
use concord_store::{Database, Discussion};
use concord_sync::{DiscussionEvent, DiscussionHub, SyncConfig, SyncError};

fn hub() -> (DiscussionHub, tokio::sync::mpsc::UnboundedReceiver<DiscussionEvent>) {
    init_tracing();
    let membership = TestMembership {
        group_members: vec![CONTACT],
        ..TestMembership::default()
    };
    DiscussionHub::new(
        Database::open_in_memory().unwrap(),
        Box::new(membership),
        SyncConfig::default(),
    )
}

fn contact_discussion() -> Discussion {
    Discussion::new(
        OWNED,
        DiscussionKind::OneToOne {
            contact: Some(CONTACT),
        },
        DiscussionStatus::Active,
        "Contact",
    )
}

#[tokio::test]
async fn test_hub_publishes_events_after_commit() {
    let (hub, mut events) = hub();

    let discussion_id = hub
        .run(|engine| engine.create_discussion(contact_discussion()))
        .await
        .unwrap()
        .id;
    assert_eq!(
        events.recv().await,
        Some(DiscussionEvent::Inserted { discussion_id })
    );

    let message = hub
        .run(move |engine| engine.send_message(discussion_id, Some("hi".into()), BTreeSet::new()))
        .await
        .unwrap();
    assert_eq!(
        events.recv().await,
        Some(DiscussionEvent::OutboundMessageCreated {
            discussion_id,
            message_id: message.id
        })
    );
}

#[tokio::test]
async fn test_hub_publishes_nothing_on_failure() {
    let (hub, mut events) = hub();
    let mut locked = contact_discussion();
    locked.status = DiscussionStatus::Locked;

    let discussion_id = hub
        .run(move |engine| engine.create_discussion(locked))
        .await
        .unwrap()
        .id;
    assert!(events.recv().await.is_some());

    let err = hub
        .run(move |engine| engine.send_message(discussion_id, None, BTreeSet::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::StatusViolation { .. }));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_hub_aggregates_badges() {
    let (hub, _events) = hub();
    let discussion_id = hub
        .run(|engine| engine.create_discussion(contact_discussion()))
        .await
        .unwrap()
        .id;

    let fx = Fixture::new();
    for sequence_number in 1..=2 {
        let inbound = fx.inbound(CONTACT, sequence_number, minutes_ago(1), "hey");
        hub.run(move |engine| engine.create_received_message(discussion_id, &inbound))
            .await
            .unwrap();
    }
    assert_eq!(hub.badge_totals(&OWNED).await.new_messages, 2);

    let unread = hub
        .read(move |engine| Ok(engine.discussion(discussion_id)?.number_of_new_messages))
        .await
        .unwrap();
    assert_eq!(unread, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_hub_serializes_concurrent_operations() {
    let (hub, _events) = hub();
    let discussion_id = hub
        .run(|engine| engine.create_discussion(contact_discussion()))
        .await
        .unwrap()
        .id;

    let fx = Fixture::new();
    let mut tasks = Vec::new();
    for sequence_number in 1..=8 {
        let hub = hub.clone();
        let inbound = fx.inbound(CONTACT, sequence_number, minutes_ago(1), "hey");
        tasks.push(tokio::spawn(async move {
            hub.run(move |engine| engine.create_received_message(discussion_id, &inbound))
                .await
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap().unwrap().is_some());
    }

    assert_eq!(hub.badge_totals(&OWNED).await.new_messages, 8);
    let unread = hub
        .read(move |engine| Ok(engine.discussion(discussion_id)?.number_of_new_messages))
        .await
        .unwrap();
    assert_eq!(unread, 8);
}
