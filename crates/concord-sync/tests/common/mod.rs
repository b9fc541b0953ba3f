#![allow(dead_code)]

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use concord_shared::{
    CryptoId, DiscussionKind, DiscussionStatus, GroupId, MessageReference, UserMention,
};
use concord_store::{Database, Discussion, Message};
use concord_sync::{
    BadgeCounters, DiscussionEngine, InboundMessage, MembershipProvider, Outcome, SyncConfig,
};
use uuid::Uuid;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub const OWNED: CryptoId = CryptoId([1u8; 32]);
pub const CONTACT: CryptoId = CryptoId([2u8; 32]);
pub const MEMBER: CryptoId = CryptoId([3u8; 32]);
pub const STRANGER: CryptoId = CryptoId([9u8; 32]);
pub const GROUP: GroupId = GroupId([7u8; 32]);

/// Membership answers driven by plain fields.
#[derive(Debug, Default, Clone)]
pub struct TestMembership {
    pub has_other_device: bool,
    pub group_members: Vec<CryptoId>,
    pub remote_deleters: Vec<CryptoId>,
    pub settings_changers: Vec<CryptoId>,
}

impl MembershipProvider for TestMembership {
    fn owned_identity_has_another_reachable_device(&self, _owned_identity: &CryptoId) -> bool {
        self.has_other_device
    }

    fn is_active_participant(&self, _kind: &DiscussionKind, identity: &CryptoId) -> bool {
        self.group_members.contains(identity)
    }

    fn may_remote_delete_anything(&self, _group: &GroupId, member: &CryptoId) -> bool {
        self.remote_deleters.contains(member)
    }

    fn may_change_shared_settings(&self, _kind: &DiscussionKind, identity: &CryptoId) -> bool {
        self.settings_changers.contains(identity)
    }
}

pub struct Fixture {
    pub db: Database,
    pub membership: TestMembership,
    pub config: SyncConfig,
    pub badges: BadgeCounters,
    pub contact_thread: Uuid,
    pub owned_other_device_thread: Uuid,
}

impl Fixture {
    pub fn new() -> Self {
        init_tracing();
        Self {
            db: Database::open_in_memory().expect("in-memory database"),
            membership: TestMembership {
                group_members: vec![CONTACT, MEMBER],
                ..TestMembership::default()
            },
            config: SyncConfig::default(),
            badges: BadgeCounters::new(),
            contact_thread: Uuid::new_v4(),
            owned_other_device_thread: Uuid::new_v4(),
        }
    }

    pub fn engine(&self) -> DiscussionEngine<'_> {
        DiscussionEngine::new(&self.db, &self.membership, &self.config)
    }

    /// Forward the badge deltas of `outcome` and hand back its value.
    pub fn apply<T>(&mut self, outcome: Outcome<T>) -> T {
        outcome.apply_badge_deltas(&mut self.badges);
        outcome.value
    }

    pub fn one_to_one(&mut self, status: DiscussionStatus) -> Uuid {
        self.create(Discussion::new(
            OWNED,
            DiscussionKind::OneToOne {
                contact: Some(CONTACT),
            },
            status,
            "Contact",
        ))
    }

    pub fn group_v2(&mut self, status: DiscussionStatus) -> Uuid {
        self.create(Discussion::new(
            OWNED,
            DiscussionKind::GroupV2 { group: Some(GROUP) },
            status,
            "Group",
        ))
    }

    fn create(&mut self, discussion: Discussion) -> Uuid {
        let outcome = self
            .engine()
            .create_discussion(discussion)
            .expect("create discussion");
        self.apply(outcome).id
    }

    pub fn reference(&self, sender: CryptoId, sequence_number: u64) -> MessageReference {
        let sender_thread_id = if sender == OWNED {
            self.owned_other_device_thread
        } else {
            self.contact_thread
        };
        MessageReference {
            sender_identity: sender,
            sender_sequence_number: sequence_number,
            sender_thread_id,
        }
    }

    pub fn inbound(
        &self,
        sender: CryptoId,
        sequence_number: u64,
        server_timestamp: DateTime<Utc>,
        body: &str,
    ) -> InboundMessage {
        InboundMessage {
            reference: self.reference(sender, sequence_number),
            server_message_id: Some(format!("srv-{sequence_number}")),
            server_timestamp,
            body: Some(body.to_string()),
            mentions: BTreeSet::new(),
        }
    }

    /// Receive a message from `sender` and return it.
    pub fn receive(
        &mut self,
        discussion_id: Uuid,
        sender: CryptoId,
        sequence_number: u64,
        server_timestamp: DateTime<Utc>,
    ) -> Message {
        let inbound = self.inbound(sender, sequence_number, server_timestamp, "hello");
        let outcome = self
            .engine()
            .create_received_message(discussion_id, &inbound)
            .expect("receive message");
        self.apply(outcome).expect("message kept")
    }

    pub fn discussion(&self, discussion_id: Uuid) -> Discussion {
        self.db.get_discussion(discussion_id).expect("discussion")
    }

    pub fn messages(&self, discussion_id: Uuid) -> Vec<Message> {
        self.db.list_messages(discussion_id).expect("messages")
    }
}

pub fn mention_of(identity: CryptoId) -> BTreeSet<UserMention> {
    BTreeSet::from([UserMention {
        mentioned_identity: identity,
        range_start: 0,
        range_end: 4,
    }])
}

/// A server timestamp `minutes` ago.
pub fn minutes_ago(minutes: i64) -> DateTime<Utc> {
    Utc::now() - Duration::minutes(minutes)
}
