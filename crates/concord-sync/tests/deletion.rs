mod common;

use std::collections::BTreeSet;

use chrono::Utc;
use common::*;
use concord_shared::{DeletionType, DiscussionStatus, MessageKind, SystemMessageCategory};
use concord_store::StoreError;
use concord_sync::{DiscussionDeletionOutcome, DiscussionEvent, SyncError, WipedOrDeletedKind};

#[test]
fn test_local_deletion_of_active_discussion_archives_it() {
    let mut fx = Fixture::new();
    let discussion_id = fx.one_to_one(DiscussionStatus::Active);
    fx.receive(discussion_id, CONTACT, 1, minutes_ago(2));
    fx.receive(discussion_id, CONTACT, 2, minutes_ago(1));

    let outcome = fx
        .engine()
        .process_discussion_deletion_request_from_current_device(
            discussion_id,
            DeletionType::FromThisDeviceOnly,
        )
        .unwrap();
    assert!(outcome
        .events
        .contains(&DiscussionEvent::Archived { discussion_id }));
    assert_eq!(fx.apply(outcome), DiscussionDeletionOutcome::Archived);

    let discussion = fx.discussion(discussion_id);
    assert!(discussion.is_archived);
    assert_eq!(discussion.number_of_new_messages, 0);

    let messages = fx.messages(discussion_id);
    assert_eq!(messages.len(), 1);
    assert!(messages[0].is_system(SystemMessageCategory::DiscussionIsEndToEndEncrypted));
    assert_eq!(fx.badges.totals(&OWNED).new_messages, 0);
}

#[test]
fn test_local_deletion_of_locked_discussion_removes_it() {
    let mut fx = Fixture::new();
    let discussion_id = fx.one_to_one(DiscussionStatus::Active);
    fx.receive(discussion_id, CONTACT, 1, minutes_ago(1));
    let outcome = fx
        .engine()
        .set_status(discussion_id, DiscussionStatus::Locked)
        .unwrap();
    fx.apply(outcome);

    let outcome = fx
        .engine()
        .process_discussion_deletion_request_from_current_device(
            discussion_id,
            DeletionType::FromThisDeviceOnly,
        )
        .unwrap();
    assert!(outcome
        .events
        .contains(&DiscussionEvent::Deleted { discussion_id }));
    assert_eq!(fx.apply(outcome), DiscussionDeletionOutcome::Deleted);

    assert!(matches!(
        fx.db.get_discussion(discussion_id),
        Err(StoreError::NotFound)
    ));
    assert!(fx.messages(discussion_id).is_empty());
    assert_eq!(fx.badges.totals(&OWNED).new_messages, 0);
}

#[test]
fn test_global_deletion_of_one_to_one_needs_another_device() {
    let mut fx = Fixture::new();
    let discussion_id = fx.one_to_one(DiscussionStatus::Active);

    let err = fx
        .engine()
        .process_discussion_deletion_request_from_current_device(
            discussion_id,
            DeletionType::FromAllOwnedDevices,
        )
        .unwrap_err();
    assert!(matches!(err, SyncError::NotPermitted(_)));

    let err = fx
        .engine()
        .process_discussion_deletion_request_from_current_device(
            discussion_id,
            DeletionType::FromAllOwnedDevicesAndAllContactDevices,
        )
        .unwrap_err();
    assert!(matches!(err, SyncError::NotPermitted(_)));

    fx.membership.has_other_device = true;
    let outcome = fx
        .engine()
        .process_discussion_deletion_request_from_current_device(
            discussion_id,
            DeletionType::FromAllOwnedDevices,
        )
        .unwrap();
    assert!(outcome.events.contains(
        &DiscussionEvent::DiscussionDeletionShouldBePropagated {
            discussion_id,
            deletion_type: DeletionType::FromAllOwnedDevices,
        }
    ));
}

#[test]
fn test_group_discussion_can_be_deleted_for_everyone() {
    let mut fx = Fixture::new();
    let discussion_id = fx.group_v2(DiscussionStatus::Active);

    let outcome = fx
        .engine()
        .process_discussion_deletion_request_from_current_device(
            discussion_id,
            DeletionType::FromAllOwnedDevicesAndAllContactDevices,
        )
        .unwrap();
    assert_eq!(outcome.value, DiscussionDeletionOutcome::Archived);
}

#[test]
fn test_only_own_messages_can_be_deleted_for_everyone() {
    let mut fx = Fixture::new();
    let discussion_id = fx.one_to_one(DiscussionStatus::Active);
    let received = fx.receive(discussion_id, CONTACT, 1, minutes_ago(2));
    let sent = fx
        .engine()
        .send_message(discussion_id, Some("oops".into()), BTreeSet::new())
        .unwrap()
        .value;

    let err = fx
        .engine()
        .process_message_deletion_request_requested_from_current_device(
            discussion_id,
            &[sent.id, received.id],
            DeletionType::FromAllOwnedDevicesAndAllContactDevices,
        )
        .unwrap_err();
    assert!(matches!(err, SyncError::NotPermitted(_)));
    assert_eq!(
        fx.messages(discussion_id)
            .iter()
            .filter(|m| m.kind != MessageKind::System)
            .count(),
        2
    );

    let outcome = fx
        .engine()
        .process_message_deletion_request_requested_from_current_device(
            discussion_id,
            &[sent.id],
            DeletionType::FromAllOwnedDevicesAndAllContactDevices,
        )
        .unwrap();
    assert!(outcome.events.iter().any(|e| matches!(
        e,
        DiscussionEvent::MessageDeletionShouldBePropagated { references, .. }
            if references == &vec![sent.reference().unwrap()]
    )));
    let infos = fx.apply(outcome);
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].kind, WipedOrDeletedKind::Deleted);
    assert!(matches!(
        fx.db.get_message(sent.id),
        Err(StoreError::NotFound)
    ));
}

#[test]
fn test_remote_wipe_of_whole_discussion() {
    let mut fx = Fixture::new();
    let discussion_id = fx.one_to_one(DiscussionStatus::Active);
    fx.receive(discussion_id, CONTACT, 1, minutes_ago(20));
    fx.receive(discussion_id, CONTACT, 2, minutes_ago(15));

    let err = fx
        .engine()
        .process_remote_request_to_wipe_all_messages_within_this_discussion(
            discussion_id,
            CONTACT,
            Utc::now(),
        )
        .unwrap_err();
    assert!(matches!(err, SyncError::NotPermitted(_)));

    let wiped_at = minutes_ago(10);
    let outcome = fx
        .engine()
        .process_remote_request_to_wipe_all_messages_within_this_discussion(
            discussion_id,
            OWNED,
            wiped_at,
        )
        .unwrap();
    let infos = fx.apply(outcome);
    // Both received messages and the end-to-end marker.
    assert_eq!(infos.len(), 3);

    let categories: Vec<_> = fx
        .messages(discussion_id)
        .iter()
        .filter_map(|m| m.system_category)
        .collect();
    assert_eq!(
        categories,
        vec![
            SystemMessageCategory::DiscussionIsEndToEndEncrypted,
            SystemMessageCategory::DiscussionWasRemotelyWiped,
        ]
    );
    assert_eq!(fx.messages(discussion_id).len(), 2);

    // A message sent before the wipe arrives late and is discarded.
    let late = fx.inbound(CONTACT, 3, minutes_ago(12), "late");
    let kept = fx
        .engine()
        .create_received_message(discussion_id, &late)
        .unwrap()
        .value;
    assert!(kept.is_none());

    let fresh = fx.receive(discussion_id, CONTACT, 4, minutes_ago(5));
    assert_eq!(fresh.body.as_deref(), Some("hello"));
}

#[test]
fn test_group_v2_moderator_may_wipe_whole_discussion() {
    let mut fx = Fixture::new();
    fx.membership.remote_deleters.push(MEMBER);
    let discussion_id = fx.group_v2(DiscussionStatus::Active);
    fx.receive(discussion_id, CONTACT, 1, minutes_ago(3));

    let outcome = fx
        .engine()
        .process_remote_request_to_wipe_all_messages_within_this_discussion(
            discussion_id,
            MEMBER,
            Utc::now(),
        )
        .unwrap();
    fx.apply(outcome);

    let wiped_marker = fx
        .messages(discussion_id)
        .into_iter()
        .find(|m| m.is_system(SystemMessageCategory::DiscussionWasRemotelyWiped))
        .unwrap();
    assert_eq!(wiped_marker.system_actor, Some(MEMBER));
    assert!(wiped_marker.is_new);
    assert_eq!(fx.discussion(discussion_id).number_of_new_messages, 1);
}

#[test]
fn test_empty_locked_discussions_are_cleaned_up() {
    let mut fx = Fixture::new();
    let empty = fx.one_to_one(DiscussionStatus::Locked);
    let kept = fx.group_v2(DiscussionStatus::Active);

    // Locked discussions keep their end-to-end marker; clear it.
    fx.db.delete_all_messages(empty).unwrap();

    let removed = fx
        .engine()
        .delete_all_locked_discussions_with_no_message(&OWNED)
        .unwrap()
        .value;
    assert_eq!(removed, vec![empty]);
    assert!(fx.db.get_discussion(empty).is_err());
    assert!(fx.db.get_discussion(kept).is_ok());
}
