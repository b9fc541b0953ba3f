//! Synchronization settings loaded from environment variables.
//!
//! All settings have defaults so the core runs with zero configuration.

use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use concord_shared::constants::{DEFAULT_DEFERRED_RETENTION_DAYS, DEFAULT_SYSTEM_MESSAGE_SPACING};

/// What to do when a peer sends the same shared-settings version as ours but
/// a different expiration policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EqualVersionPolicy {
    /// Keep local settings and ask the caller to re-send them.
    #[default]
    KeepLocal,
    /// Adopt the field-wise most restrictive combination of both policies.
    MostRestrictive,
}

impl FromStr for EqualVersionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep_local" => Ok(Self::KeepLocal),
            "most_restrictive" => Ok(Self::MostRestrictive),
            other => Err(format!("unknown equal-version policy `{other}`")),
        }
    }
}

impl fmt::Display for EqualVersionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeepLocal => f.write_str("keep_local"),
            Self::MostRestrictive => f.write_str("most_restrictive"),
        }
    }
}

/// Synchronization configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Env: `CONCORD_EQUAL_VERSION_POLICY` (`keep_local` / `most_restrictive`)
    /// Default: `keep_local`
    pub equal_version_policy: EqualVersionPolicy,

    /// How long a deferred request waits for its target message.
    /// Env: `CONCORD_DEFERRED_RETENTION_DAYS` (0 = unbounded)
    /// Default: 30 days
    pub deferred_request_retention: Option<Duration>,

    /// Sort-index increment when appending a system message without a
    /// server timestamp.
    pub system_message_spacing: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            equal_version_policy: EqualVersionPolicy::default(),
            deferred_request_retention: Some(Duration::days(DEFAULT_DEFERRED_RETENTION_DAYS)),
            system_message_spacing: DEFAULT_SYSTEM_MESSAGE_SPACING,
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("CONCORD_EQUAL_VERSION_POLICY") {
            match raw.parse::<EqualVersionPolicy>() {
                Ok(policy) => config.equal_version_policy = policy,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Invalid CONCORD_EQUAL_VERSION_POLICY, using default"
                    );
                }
            }
        }

        if let Ok(raw) = std::env::var("CONCORD_DEFERRED_RETENTION_DAYS") {
            match raw.trim().parse::<i64>() {
                Ok(0) => config.deferred_request_retention = None,
                Ok(days) if days > 0 && Duration::try_days(days).is_some() => {
                    config.deferred_request_retention = Duration::try_days(days);
                }
                _ => {
                    tracing::warn!(
                        value = %raw,
                        "Invalid CONCORD_DEFERRED_RETENTION_DAYS, using default"
                    );
                }
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.equal_version_policy, EqualVersionPolicy::KeepLocal);
        assert_eq!(config.deferred_request_retention, Some(Duration::days(30)));
        assert_eq!(config.system_message_spacing, 0.01);
    }

    #[test]
    fn policy_parses_case_insensitively() {
        assert_eq!(
            "Most_Restrictive".parse::<EqualVersionPolicy>(),
            Ok(EqualVersionPolicy::MostRestrictive)
        );
        assert!("newest".parse::<EqualVersionPolicy>().is_err());
    }
}
