//! Control payloads exchanged between devices and contacts.
//!
//! These arrive already decrypted; this module only fixes their JSON shape.
//! Field names are kept short on the wire.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::CryptoId;

/// Globally identifies a received or sent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageReference {
    #[serde(rename = "si")]
    pub sender_identity: CryptoId,
    #[serde(rename = "ssn")]
    pub sender_sequence_number: u64,
    #[serde(rename = "sti")]
    pub sender_thread_id: Uuid,
}

/// Ephemeral settings. Zero durations are the same as no duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ExpirationPolicy {
    #[serde(rename = "ro", default)]
    pub read_once: bool,
    #[serde(
        rename = "vis",
        default,
        with = "optional_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub visibility_duration: Option<Duration>,
    #[serde(
        rename = "ex",
        default,
        with = "optional_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub existence_duration: Option<Duration>,
}

impl ExpirationPolicy {
    pub fn new(
        read_once: bool,
        visibility_duration: Option<Duration>,
        existence_duration: Option<Duration>,
    ) -> Self {
        Self {
            read_once,
            visibility_duration: visibility_duration.filter(|d| !d.is_zero()),
            existence_duration: existence_duration.filter(|d| !d.is_zero()),
        }
    }

    pub fn is_ephemeral(&self) -> bool {
        self.read_once || self.visibility_duration.is_some() || self.existence_duration.is_some()
    }

    /// Field-wise most restrictive combination of two policies.
    pub fn most_restrictive(&self, other: &Self) -> Self {
        Self::new(
            self.read_once || other.read_once,
            optional_min(self.visibility_duration, other.visibility_duration),
            optional_min(self.existence_duration, other.existence_duration),
        )
    }
}

fn optional_min(a: Option<Duration>, b: Option<Duration>) -> Option<Duration> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(d), None) | (None, Some(d)) => Some(d),
        (None, None) => None,
    }
}

/// Durations are encoded as whole seconds. Non-positive values decode as
/// absent.
mod optional_seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let raw: Option<i64> = Option::deserialize(d)?;
        Ok(raw
            .filter(|secs| *secs > 0)
            .map(|secs| Duration::from_secs(secs as u64)))
    }
}

/// A mention of an identity inside a text body (byte range).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserMention {
    #[serde(rename = "uid")]
    pub mentioned_identity: CryptoId,
    #[serde(rename = "rs")]
    pub range_start: usize,
    #[serde(rename = "re")]
    pub range_end: usize,
}

/// Request to wipe a batch of messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteMessagesRequest {
    #[serde(rename = "refs")]
    pub messages_to_delete: Vec<MessageReference>,
}

/// Request to replace the body of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMessageRequest {
    #[serde(rename = "ref")]
    pub message_to_edit: MessageReference,
    #[serde(rename = "body", default, skip_serializing_if = "Option::is_none")]
    pub new_text_body: Option<String>,
    #[serde(rename = "um", default)]
    pub user_mentions: BTreeSet<UserMention>,
}

/// Request to set (or clear, when `emoji` is absent) a reaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionRequest {
    #[serde(rename = "ref")]
    pub message_reference: MessageReference,
    #[serde(rename = "reac", default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
}

/// A version-stamped shared configuration as sent by a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedConfigurationPayload {
    pub version: u64,
    #[serde(rename = "exp")]
    pub expiration: ExpirationPolicy,
}

/// A peer asking whether our shared settings are newer than what it knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QuerySharedSettingsRequest {
    #[serde(rename = "ksv", default, skip_serializing_if = "Option::is_none")]
    pub known_shared_settings_version: Option<u64>,
    #[serde(rename = "kexp", default, skip_serializing_if = "Option::is_none")]
    pub known_shared_expiration: Option<ExpirationPolicy>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiration_uses_short_keys_and_seconds() {
        let policy = ExpirationPolicy::new(true, Some(Duration::from_secs(30)), None);
        let json = serde_json::to_value(policy).unwrap();
        assert_eq!(json, serde_json::json!({ "ro": true, "vis": 30 }));
    }

    #[test]
    fn non_positive_durations_decode_as_absent() {
        let policy: ExpirationPolicy =
            serde_json::from_str(r#"{"ro":false,"vis":0,"ex":-5}"#).unwrap();
        assert_eq!(policy, ExpirationPolicy::default());
        assert!(!policy.is_ephemeral());
    }

    #[test]
    fn most_restrictive_takes_smallest_durations() {
        let a = ExpirationPolicy::new(false, Some(Duration::from_secs(60)), None);
        let b = ExpirationPolicy::new(true, Some(Duration::from_secs(10)), Some(Duration::from_secs(3600)));
        let merged = a.most_restrictive(&b);
        assert!(merged.read_once);
        assert_eq!(merged.visibility_duration, Some(Duration::from_secs(10)));
        assert_eq!(merged.existence_duration, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn reaction_without_emoji_parses() {
        let json = format!(
            r#"{{"ref":{{"si":"{}","ssn":4,"sti":"{}"}}}}"#,
            CryptoId([1u8; 32]).to_hex(),
            Uuid::nil()
        );
        let request: ReactionRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(request.emoji, None);
        assert_eq!(request.message_reference.sender_sequence_number, 4);
    }
}
