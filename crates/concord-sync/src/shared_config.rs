//! Reconciliation of the shared ephemeral configuration.
//!
//! Higher versions always win. Equal versions are expected to carry the same
//! policy; when they don't, [`EqualVersionPolicy`] decides.

use concord_shared::{
    CryptoId, DiscussionKind, DiscussionStatus, ExpirationPolicy, QuerySharedSettingsRequest,
    SharedConfiguration, SharedConfigurationPayload, SystemMessageCategory,
};
use concord_store::Discussion;
use uuid::Uuid;

use crate::config::EqualVersionPolicy;
use crate::engine::DiscussionEngine;
use crate::error::{GatedOperation, Result, SyncError};
use crate::events::{DiscussionEvent, Outbox, Outcome};
use crate::status::ensure_active;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Local state changed.
    pub updated: bool,
    /// The caller should re-send the local configuration so the peer
    /// converges.
    pub should_echo: bool,
}

/// Merge a configuration received from a peer or another owned device.
pub fn merge(
    local: &mut SharedConfiguration,
    remote: &SharedConfigurationPayload,
    policy: EqualVersionPolicy,
) -> MergeOutcome {
    let remote_expiration = normalized(&remote.expiration);

    let local_version = match local.version {
        // Anything beats a configuration never exchanged.
        None => return adopt(local, remote.version, remote_expiration),
        Some(v) => v,
    };

    if remote.version > local_version {
        return adopt(local, remote.version, remote_expiration);
    }

    if remote.version < local_version {
        return MergeOutcome {
            updated: false,
            should_echo: true,
        };
    }

    if remote_expiration == local.expiration {
        return MergeOutcome {
            updated: false,
            should_echo: false,
        };
    }

    match policy {
        EqualVersionPolicy::KeepLocal => MergeOutcome {
            updated: false,
            should_echo: true,
        },
        EqualVersionPolicy::MostRestrictive => {
            let merged = local.expiration.most_restrictive(&remote_expiration);
            let updated = merged != local.expiration;
            local.expiration = merged;
            MergeOutcome {
                updated,
                should_echo: merged != remote_expiration,
            }
        }
    }
}

fn adopt(local: &mut SharedConfiguration, version: u64, expiration: ExpirationPolicy) -> MergeOutcome {
    local.version = Some(version);
    local.expiration = expiration;
    MergeOutcome {
        updated: true,
        should_echo: false,
    }
}

fn normalized(expiration: &ExpirationPolicy) -> ExpirationPolicy {
    ExpirationPolicy::new(
        expiration.read_once,
        expiration.visibility_duration,
        expiration.existence_duration,
    )
}

/// Unilateral change by the owned identity. The version is always bumped;
/// returns whether the policy itself changed.
pub fn replace(local: &mut SharedConfiguration, expiration: &ExpirationPolicy) -> bool {
    let expiration = normalized(expiration);
    local.version = Some(local.version.map_or(1, |v| v.saturating_add(1)));
    let changed = local.expiration != expiration;
    local.expiration = expiration;
    changed
}

/// Whether a peer that claims to know `request` is behind us.
pub fn should_resend_after_query(
    local: &SharedConfiguration,
    request: &QuerySharedSettingsRequest,
) -> bool {
    let Some(local_version) = local.version else {
        return false;
    };
    match request.known_shared_settings_version {
        None => true,
        Some(known) if local_version > known => true,
        Some(known) if local_version == known => {
            request.known_shared_expiration.map(|e| normalized(&e)) != Some(local.expiration)
        }
        Some(_) => false,
    }
}

fn payload_of(discussion: &Discussion) -> Option<SharedConfigurationPayload> {
    discussion
        .shared_configuration
        .version
        .map(|version| SharedConfigurationPayload {
            version,
            expiration: discussion.shared_configuration.expiration,
        })
}

impl DiscussionEngine<'_> {
    /// Merge a configuration sent by `initiator` (a contact, a group member,
    /// or the owned identity from another device).
    pub fn merge_discussion_shared_configuration(
        &self,
        discussion_id: Uuid,
        remote: &SharedConfigurationPayload,
        initiator: CryptoId,
    ) -> Result<Outcome<MergeOutcome>> {
        self.transact(discussion_id, |discussion, out| {
            ensure_active(discussion, GatedOperation::MergeSharedConfiguration)?;
            self.ensure_may_change_shared_settings(discussion, &initiator)?;

            let result = merge(
                &mut discussion.shared_configuration,
                remote,
                self.config.equal_version_policy,
            );

            tracing::debug!(
                discussion_id = %discussion.id,
                remote_version = remote.version,
                local_version = ?discussion.shared_configuration.version,
                updated = result.updated,
                should_echo = result.should_echo,
                "shared configuration merged"
            );

            if result.updated {
                self.record_shared_configuration_change(discussion, out, initiator)?;
            }
            if result.should_echo {
                self.request_shared_configuration_send(discussion, out);
            }
            Ok(result)
        })
    }

    /// Adopt new settings chosen on this device.
    pub fn replace_discussion_shared_configuration(
        &self,
        discussion_id: Uuid,
        expiration: &ExpirationPolicy,
    ) -> Result<Outcome<bool>> {
        self.transact(discussion_id, |discussion, out| {
            ensure_active(discussion, GatedOperation::ReplaceSharedConfiguration)?;
            if !self.can_be_modified_and_shared_by_owned_identity(discussion) {
                return Err(SyncError::NotPermitted(
                    "owned identity may not change the shared settings".into(),
                ));
            }

            let changed = replace(&mut discussion.shared_configuration, expiration);
            if changed {
                let owned = discussion.owned_identity;
                self.record_shared_configuration_change(discussion, out, owned)?;
            }
            self.request_shared_configuration_send(discussion, out);
            Ok(changed)
        })
    }

    /// Answer a peer's query. Returns whether our configuration should be
    /// sent, and queues the send event when it should.
    pub fn process_query_shared_settings_request(
        &self,
        discussion_id: Uuid,
        request: &QuerySharedSettingsRequest,
    ) -> Result<Outcome<bool>> {
        let discussion = self.discussion(discussion_id)?;
        let mut out = Outbox::default();

        let resend = should_resend_after_query(&discussion.shared_configuration, request);
        if resend {
            self.request_shared_configuration_send(&discussion, &mut out);
        }
        Ok(out.into_outcome(resend))
    }

    /// Whether this device may change and share the settings: active, and
    /// one-to-one, or a group where the owned identity holds that right.
    pub fn can_be_modified_and_shared_by_owned_identity(&self, discussion: &Discussion) -> bool {
        if discussion.status != DiscussionStatus::Active {
            return false;
        }
        match discussion.kind {
            DiscussionKind::OneToOne { .. } => true,
            DiscussionKind::GroupV1 { .. } | DiscussionKind::GroupV2 { .. } => self
                .membership
                .may_change_shared_settings(&discussion.kind, &discussion.owned_identity),
        }
    }

    fn ensure_may_change_shared_settings(
        &self,
        discussion: &Discussion,
        initiator: &CryptoId,
    ) -> Result<()> {
        if *initiator == discussion.owned_identity {
            return Ok(());
        }
        let allowed = match &discussion.kind {
            DiscussionKind::OneToOne { contact } => contact.as_ref() == Some(initiator),
            kind => self.membership.may_change_shared_settings(kind, initiator),
        };
        if allowed {
            Ok(())
        } else {
            Err(SyncError::IdentityMismatch(format!(
                "{} may not change the shared settings of discussion {}",
                initiator.short(),
                discussion.id
            )))
        }
    }

    fn record_shared_configuration_change(
        &self,
        discussion: &mut Discussion,
        out: &mut Outbox,
        initiator: CryptoId,
    ) -> Result<()> {
        let by_owned_identity = initiator == discussion.owned_identity;
        let sort_index = self.system_sort_index(discussion, None)?;
        self.insert_system_message_in(
            discussion,
            out,
            SystemMessageCategory::UpdatedDiscussionSharedSettings,
            Some(initiator),
            sort_index,
            by_owned_identity,
        )?;
        out.push(DiscussionEvent::SharedConfigurationUpdated {
            discussion_id: discussion.id,
            configuration: discussion.shared_configuration,
            initiator,
        });
        Ok(())
    }

    fn request_shared_configuration_send(&self, discussion: &Discussion, out: &mut Outbox) {
        if let Some(payload) = payload_of(discussion) {
            out.push(DiscussionEvent::SharedConfigurationShouldBeSent {
                discussion_id: discussion.id,
                payload,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn config(version: Option<u64>, read_once: bool) -> SharedConfiguration {
        SharedConfiguration {
            version,
            expiration: ExpirationPolicy::new(read_once, None, None),
        }
    }

    fn payload(version: u64, read_once: bool) -> SharedConfigurationPayload {
        SharedConfigurationPayload {
            version,
            expiration: ExpirationPolicy::new(read_once, None, None),
        }
    }

    #[test]
    fn higher_remote_version_is_adopted() {
        let mut local = config(Some(2), false);
        let outcome = merge(&mut local, &payload(5, true), EqualVersionPolicy::KeepLocal);
        assert_eq!(
            outcome,
            MergeOutcome {
                updated: true,
                should_echo: false
            }
        );
        assert_eq!(local, config(Some(5), true));
    }

    #[test]
    fn unset_local_version_loses_to_version_zero() {
        let mut local = config(None, false);
        let outcome = merge(&mut local, &payload(0, true), EqualVersionPolicy::KeepLocal);
        assert!(outcome.updated);
        assert_eq!(local.version, Some(0));
    }

    #[test]
    fn older_remote_is_echoed() {
        let mut local = config(Some(4), false);
        let outcome = merge(&mut local, &payload(3, false), EqualVersionPolicy::KeepLocal);
        assert_eq!(
            outcome,
            MergeOutcome {
                updated: false,
                should_echo: true
            }
        );
        assert_eq!(local, config(Some(4), false));
    }

    #[test]
    fn equal_version_conflict_keeps_local_by_default() {
        let mut local = config(Some(3), false);
        let outcome = merge(&mut local, &payload(3, true), EqualVersionPolicy::KeepLocal);
        assert_eq!(
            outcome,
            MergeOutcome {
                updated: false,
                should_echo: true
            }
        );
        assert_eq!(local, config(Some(3), false));
    }

    #[test]
    fn equal_version_conflict_can_take_most_restrictive() {
        let mut local = SharedConfiguration {
            version: Some(3),
            expiration: ExpirationPolicy::new(false, Some(Duration::from_secs(60)), None),
        };
        let remote = SharedConfigurationPayload {
            version: 3,
            expiration: ExpirationPolicy::new(true, Some(Duration::from_secs(300)), None),
        };
        let outcome = merge(&mut local, &remote, EqualVersionPolicy::MostRestrictive);

        assert!(outcome.updated);
        assert!(outcome.should_echo);
        assert_eq!(local.version, Some(3));
        assert!(local.expiration.read_once);
        assert_eq!(
            local.expiration.visibility_duration,
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn merging_twice_is_idempotent() {
        let mut local = config(Some(1), false);
        let remote = payload(2, true);
        assert!(merge(&mut local, &remote, EqualVersionPolicy::KeepLocal).updated);
        let second = merge(&mut local, &remote, EqualVersionPolicy::KeepLocal);
        assert_eq!(
            second,
            MergeOutcome {
                updated: false,
                should_echo: false
            }
        );
    }

    #[test]
    fn replace_always_bumps_version() {
        let mut local = config(Some(7), true);
        assert!(!replace(&mut local, &ExpirationPolicy::new(true, None, None)));
        assert_eq!(local.version, Some(8));

        assert!(replace(&mut local, &ExpirationPolicy::default()));
        assert_eq!(local.version, Some(9));
        assert!(!local.is_ephemeral());

        let mut fresh = SharedConfiguration::default();
        replace(&mut fresh, &ExpirationPolicy::new(true, None, None));
        assert_eq!(fresh.version, Some(1));
    }

    #[test]
    fn query_resends_when_peer_is_behind() {
        let local = config(Some(3), true);
        let behind = QuerySharedSettingsRequest {
            known_shared_settings_version: Some(2),
            known_shared_expiration: None,
        };
        let equal_same = QuerySharedSettingsRequest {
            known_shared_settings_version: Some(3),
            known_shared_expiration: Some(ExpirationPolicy::new(true, None, None)),
        };
        let equal_different = QuerySharedSettingsRequest {
            known_shared_settings_version: Some(3),
            known_shared_expiration: Some(ExpirationPolicy::default()),
        };
        let ahead = QuerySharedSettingsRequest {
            known_shared_settings_version: Some(4),
            known_shared_expiration: None,
        };

        assert!(should_resend_after_query(&local, &behind));
        assert!(!should_resend_after_query(&local, &equal_same));
        assert!(should_resend_after_query(&local, &equal_different));
        assert!(!should_resend_after_query(&local, &ahead));
        assert!(!should_resend_after_query(
            &SharedConfiguration::default(),
            &QuerySharedSettingsRequest::default()
        ));
    }
}
