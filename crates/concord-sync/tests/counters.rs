mod common;

use chrono::{Duration, Utc};
use common::*;
use concord_shared::{DeletionType, DiscussionStatus, SystemMessageCategory};
use concord_sync::{BadgeTotals, DiscussionEvent};

#[test]
fn test_new_message_counter_and_badges_follow_read_state() {
    let mut fx = Fixture::new();
    let discussion_id = fx.one_to_one(DiscussionStatus::Active);

    fx.receive(discussion_id, CONTACT, 1, minutes_ago(3));
    fx.receive(discussion_id, CONTACT, 2, minutes_ago(2));
    let mut mentioning = fx.inbound(CONTACT, 3, minutes_ago(1), "@you");
    mentioning.mentions = mention_of(OWNED);
    let outcome = fx
        .engine()
        .create_received_message(discussion_id, &mentioning)
        .unwrap();
    let message = fx.apply(outcome).unwrap();
    assert!(message.does_mention_owned_identity);

    let discussion = fx.discussion(discussion_id);
    assert_eq!(discussion.number_of_new_messages, 3);
    assert!(discussion.a_new_received_message_does_mention_owned_identity);
    assert_eq!(
        fx.badges.totals(&OWNED),
        BadgeTotals {
            new_messages: 3,
            mentions: 0
        }
    );

    let outcome = fx
        .engine()
        .mark_received_message_as_not_new(discussion_id, message.id)
        .unwrap();
    assert!(fx.apply(outcome));
    let discussion = fx.discussion(discussion_id);
    assert_eq!(discussion.number_of_new_messages, 2);
    assert!(!discussion.a_new_received_message_does_mention_owned_identity);

    let outcome = fx.engine().mark_all_messages_as_not_new(discussion_id).unwrap();
    fx.apply(outcome);
    assert_eq!(fx.discussion(discussion_id).number_of_new_messages, 0);
    assert_eq!(fx.badges.totals(&OWNED), BadgeTotals::default());
}

#[test]
fn test_muted_discussion_only_feeds_the_mention_badge() {
    let mut fx = Fixture::new();
    let discussion_id = fx.one_to_one(DiscussionStatus::Active);

    let mut mentioning = fx.inbound(CONTACT, 1, minutes_ago(1), "@you");
    mentioning.mentions = mention_of(OWNED);
    let outcome = fx
        .engine()
        .create_received_message(discussion_id, &mentioning)
        .unwrap();
    fx.apply(outcome);
    assert_eq!(fx.badges.totals(&OWNED).new_messages, 1);

    let outcome = fx
        .engine()
        .set_mute_until(discussion_id, Some(Utc::now() + Duration::hours(1)))
        .unwrap();
    fx.apply(outcome);
    assert_eq!(
        fx.badges.totals(&OWNED),
        BadgeTotals {
            new_messages: 0,
            mentions: 1
        }
    );
    assert_eq!(fx.discussion(discussion_id).number_of_new_messages, 0);

    let outcome = fx.engine().mark_all_messages_as_not_new(discussion_id).unwrap();
    fx.apply(outcome);
    assert_eq!(fx.badges.totals(&OWNED), BadgeTotals::default());
}

#[test]
fn test_bootstrap_refresh_reconciles_stale_counters() {
    let mut fx = Fixture::new();
    let first = fx.one_to_one(DiscussionStatus::Active);
    let second = fx.group_v2(DiscussionStatus::Active);
    fx.receive(first, CONTACT, 1, minutes_ago(2));
    fx.receive(second, MEMBER, 1, minutes_ago(2));
    fx.receive(second, MEMBER, 2, minutes_ago(1));

    let mut stale = fx.discussion(second);
    stale.number_of_new_messages = 40;
    fx.db.update_discussion(&stale).unwrap();

    let total = fx
        .engine()
        .refresh_number_of_new_messages_of_all_discussions(&OWNED)
        .unwrap()
        .value;
    assert_eq!(total, 3);
    assert_eq!(fx.discussion(second).number_of_new_messages, 2);
}

#[test]
fn test_illustrative_message_never_moves_backwards() {
    let mut fx = Fixture::new();
    let discussion_id = fx.one_to_one(DiscussionStatus::Active);

    let recent = fx.receive(discussion_id, CONTACT, 2, minutes_ago(1));
    assert_eq!(
        fx.discussion(discussion_id).illustrative_message_id,
        Some(recent.id)
    );

    let late_but_older = fx.receive(discussion_id, CONTACT, 1, minutes_ago(30));
    assert_eq!(
        fx.discussion(discussion_id).illustrative_message_id,
        Some(recent.id)
    );

    let outcome = fx
        .engine()
        .process_message_deletion_request_requested_from_current_device(
            discussion_id,
            &[recent.id],
            DeletionType::FromThisDeviceOnly,
        )
        .unwrap();
    fx.apply(outcome);
    assert_eq!(
        fx.discussion(discussion_id).illustrative_message_id,
        Some(late_but_older.id)
    );
}

#[test]
fn test_new_messages_divider_is_placed_before_first_unread() {
    let mut fx = Fixture::new();
    let discussion_id = fx.one_to_one(DiscussionStatus::Active);
    let read = fx.receive(discussion_id, CONTACT, 1, minutes_ago(10));
    let outcome = fx
        .engine()
        .mark_received_message_as_not_new(discussion_id, read.id)
        .unwrap();
    fx.apply(outcome);
    let unread = fx.receive(discussion_id, CONTACT, 2, minutes_ago(5));

    let placement = fx
        .engine()
        .new_messages_divider_placement(discussion_id)
        .unwrap()
        .unwrap();
    assert!(placement.sort_index > read.sort_index);
    assert!(placement.sort_index < unread.sort_index);
    assert_eq!(placement.existing_marker, None);

    let marker = fx
        .engine()
        .insert_new_messages_divider(discussion_id)
        .unwrap()
        .value
        .unwrap();
    assert!(marker.is_system(SystemMessageCategory::NumberOfNewMessages));

    // Asking again reuses the marker.
    let again = fx
        .engine()
        .insert_new_messages_divider(discussion_id)
        .unwrap()
        .value
        .unwrap();
    assert_eq!(again.id, marker.id);
}

#[test]
fn test_archive_and_pin_interplay() {
    let mut fx = Fixture::new();
    let first = fx.one_to_one(DiscussionStatus::Active);
    let second = fx.group_v2(DiscussionStatus::Active);

    let outcome = fx.engine().set_archived(first, true).unwrap();
    assert!(outcome.value);
    assert!(outcome
        .events
        .contains(&DiscussionEvent::Archived { discussion_id: first }));

    let outcome = fx
        .engine()
        .set_pinned_discussions(&OWNED, &[second, first])
        .unwrap();
    assert!(outcome.events.contains(&DiscussionEvent::Unarchived { discussion_id: first }));

    let first = fx.discussion(first);
    assert!(!first.is_archived);
    assert_eq!(first.pinned_index, Some(1));
    assert_eq!(fx.discussion(second).pinned_index, Some(0));

    // A new message unarchives; archiving unpins.
    fx.engine().set_archived(second, true).unwrap();
    assert_eq!(fx.discussion(second).pinned_index, None);
    fx.receive(second, MEMBER, 1, minutes_ago(1));
    assert!(!fx.discussion(second).is_archived);
}
