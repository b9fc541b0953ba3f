//! Interfaces of the collaborators the core consults or feeds.

use std::collections::HashMap;

use concord_shared::{CryptoId, DiscussionKind, GroupId};

/// Answers membership and device questions about identities.
pub trait MembershipProvider: Send + Sync {
    /// Whether the owned identity has at least one other device able to
    /// receive a deletion request.
    fn owned_identity_has_another_reachable_device(&self, owned_identity: &CryptoId) -> bool;

    /// Whether `identity` is currently an active member of the group
    /// behind `kind`. Never consulted for one-to-one discussions.
    fn is_active_participant(&self, kind: &DiscussionKind, identity: &CryptoId) -> bool;

    /// Whether `member` may remotely delete anyone's messages in a group v2.
    fn may_remote_delete_anything(&self, group: &GroupId, member: &CryptoId) -> bool;

    /// Whether `identity` may change the shared settings of the group behind
    /// `kind` (group v1 owner, or group v2 member with that permission).
    fn may_change_shared_settings(&self, kind: &DiscussionKind, identity: &CryptoId) -> bool;
}

/// Receives signed deltas for the aggregate badges of an owned identity.
pub trait BadgeSink {
    fn add_to_new_messages(&mut self, owned_identity: &CryptoId, delta: i64);
    fn add_to_mentions(&mut self, owned_identity: &CryptoId, delta: i64);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BadgeTotals {
    pub new_messages: i64,
    pub mentions: i64,
}

/// In-memory badge aggregator keyed by owned identity.
#[derive(Debug, Default)]
pub struct BadgeCounters {
    totals: HashMap<CryptoId, BadgeTotals>,
}

impl BadgeCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn totals(&self, owned_identity: &CryptoId) -> BadgeTotals {
        self.totals.get(owned_identity).copied().unwrap_or_default()
    }
}

impl BadgeSink for BadgeCounters {
    fn add_to_new_messages(&mut self, owned_identity: &CryptoId, delta: i64) {
        self.totals.entry(*owned_identity).or_default().new_messages += delta;
    }

    fn add_to_mentions(&mut self, owned_identity: &CryptoId, delta: i64) {
        self.totals.entry(*owned_identity).or_default().mentions += delta;
    }
}
