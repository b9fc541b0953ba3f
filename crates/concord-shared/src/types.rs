use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::IdentityError;
use crate::protocol::ExpirationPolicy;

// Identity = Ed25519 public key (32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CryptoId(pub [u8; 32]);

impl CryptoId {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, IdentityError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(IdentityError::InvalidLength(bytes.len()));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl fmt::Display for CryptoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for CryptoId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

// Identities travel as hex strings inside JSON control payloads.
impl Serialize for CryptoId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for CryptoId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Identifier of a group (v1 or v2), 32 opaque bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub [u8; 32]);

impl GroupId {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, IdentityError> {
        CryptoId::from_hex(s).map(|id| Self(id.0))
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for GroupId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for GroupId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Discussion status and kind
// ---------------------------------------------------------------------------

/// Lifecycle status of a discussion. Only `Active` discussions accept
/// conversational mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscussionStatus {
    PreDiscussion,
    Active,
    Locked,
}

impl DiscussionStatus {
    pub fn as_i64(self) -> i64 {
        match self {
            Self::PreDiscussion => 0,
            Self::Active => 1,
            Self::Locked => 2,
        }
    }

    pub fn from_i64(raw: i64) -> Option<Self> {
        match raw {
            0 => Some(Self::PreDiscussion),
            1 => Some(Self::Active),
            2 => Some(Self::Locked),
            _ => None,
        }
    }
}

impl fmt::Display for DiscussionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PreDiscussion => "pre-discussion",
            Self::Active => "active",
            Self::Locked => "locked",
        };
        f.write_str(s)
    }
}

/// The kind of a discussion, fixed for its whole life. The counterpart may
/// be gone (contact deleted, group disbanded) while the discussion persists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscussionKind {
    OneToOne { contact: Option<CryptoId> },
    GroupV1 { group: Option<GroupId> },
    GroupV2 { group: Option<GroupId> },
}

impl DiscussionKind {
    pub fn is_group(&self) -> bool {
        !matches!(self, Self::OneToOne { .. })
    }

    pub fn tag(&self) -> i64 {
        match self {
            Self::OneToOne { .. } => 0,
            Self::GroupV1 { .. } => 1,
            Self::GroupV2 { .. } => 2,
        }
    }

    /// Hex encoding of the counterpart, if still present.
    pub fn counterpart_hex(&self) -> Option<String> {
        match self {
            Self::OneToOne { contact } => contact.map(|c| c.to_hex()),
            Self::GroupV1 { group } | Self::GroupV2 { group } => group.map(|g| g.to_hex()),
        }
    }

    /// Rebuild a kind from its persisted tag and counterpart.
    pub fn from_parts(tag: i64, counterpart: Option<&str>) -> Result<Self, IdentityError> {
        match tag {
            0 => Ok(Self::OneToOne {
                contact: counterpart.map(CryptoId::from_hex).transpose()?,
            }),
            1 => Ok(Self::GroupV1 {
                group: counterpart.map(GroupId::from_hex).transpose()?,
            }),
            2 => Ok(Self::GroupV2 {
                group: counterpart.map(GroupId::from_hex).transpose()?,
            }),
            other => Err(IdentityError::UnknownKind(other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared and local configuration
// ---------------------------------------------------------------------------

/// The ephemeral policy synchronized between all participants, stamped with
/// a version. `version` is `None` until a configuration was ever exchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SharedConfiguration {
    pub version: Option<u64>,
    pub expiration: ExpirationPolicy,
}

impl SharedConfiguration {
    pub fn is_ephemeral(&self) -> bool {
        self.expiration.is_ephemeral()
    }
}

/// Device-local overrides. Never synchronized.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LocalConfiguration {
    pub mute_notifications_until: Option<chrono::DateTime<chrono::Utc>>,
    pub retention_count: Option<u32>,
    pub auto_read: Option<bool>,
}

impl LocalConfiguration {
    pub fn has_valid_mute_end_date(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.mute_notifications_until.is_some_and(|until| until > now)
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Received,
    Sent,
    System,
}

impl MessageKind {
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Received => 0,
            Self::Sent => 1,
            Self::System => 2,
        }
    }

    pub fn from_i64(raw: i64) -> Option<Self> {
        match raw {
            0 => Some(Self::Received),
            1 => Some(Self::Sent),
            2 => Some(Self::System),
            _ => None,
        }
    }
}

/// Category of a system message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemMessageCategory {
    ContactJoinedGroup,
    ContactLeftGroup,
    NumberOfNewMessages,
    DiscussionIsEndToEndEncrypted,
    ContactWasDeleted,
    CallLogItem,
    UpdatedDiscussionSharedSettings,
    DiscussionWasRemotelyWiped,
    ContactRevokedByIdentityProvider,
    NotPartOfTheGroupAnymore,
    RejoinedGroup,
    ContactIsOneToOneAgain,
    MembersOfGroupV2WereUpdated,
    OwnedIdentityIsPartOfGroupV2Admins,
    OwnedIdentityIsNoLongerPartOfGroupV2Admins,
    OwnedIdentityDidCaptureSensitiveMessages,
    ContactIdentityDidCaptureSensitiveMessages,
    ContactWasIntroducedToAnotherContact,
}

impl SystemMessageCategory {
    pub const ALL: [SystemMessageCategory; 18] = [
        Self::ContactJoinedGroup,
        Self::ContactLeftGroup,
        Self::NumberOfNewMessages,
        Self::DiscussionIsEndToEndEncrypted,
        Self::ContactWasDeleted,
        Self::CallLogItem,
        Self::UpdatedDiscussionSharedSettings,
        Self::DiscussionWasRemotelyWiped,
        Self::ContactRevokedByIdentityProvider,
        Self::NotPartOfTheGroupAnymore,
        Self::RejoinedGroup,
        Self::ContactIsOneToOneAgain,
        Self::MembersOfGroupV2WereUpdated,
        Self::OwnedIdentityIsPartOfGroupV2Admins,
        Self::OwnedIdentityIsNoLongerPartOfGroupV2Admins,
        Self::OwnedIdentityDidCaptureSensitiveMessages,
        Self::ContactIdentityDidCaptureSensitiveMessages,
        Self::ContactWasIntroducedToAnotherContact,
    ];

    pub fn as_i64(self) -> i64 {
        Self::ALL
            .iter()
            .position(|c| *c == self)
            .map(|p| p as i64)
            .unwrap_or_default()
    }

    pub fn from_i64(raw: i64) -> Option<Self> {
        usize::try_from(raw).ok().and_then(|i| Self::ALL.get(i).copied())
    }

    /// Whether a message of this category may represent its discussion in
    /// list previews.
    pub fn is_relevant_for_illustrative_message(self) -> bool {
        !matches!(
            self,
            Self::NumberOfNewMessages | Self::DiscussionIsEndToEndEncrypted
        )
    }

    /// Whether a new message of this category counts toward the unread badge.
    /// Call log items never count here since call reports are not modelled.
    pub fn is_relevant_for_counting_unread(self) -> bool {
        !matches!(
            self,
            Self::CallLogItem
                | Self::NumberOfNewMessages
                | Self::DiscussionIsEndToEndEncrypted
                | Self::ContactWasIntroducedToAnotherContact
        )
    }
}

/// Scope of a deletion requested from the current device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionType {
    FromThisDeviceOnly,
    FromAllOwnedDevices,
    FromAllOwnedDevicesAndAllContactDevices,
}

impl DeletionType {
    pub fn is_global(self) -> bool {
        !matches!(self, Self::FromThisDeviceOnly)
    }
}
