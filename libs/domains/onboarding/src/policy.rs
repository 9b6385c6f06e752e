//! Fail-open / fail-closed policy per error kind.
//!
//! `FailOpen` acknowledges the trigger once the failure is dead-lettered.
//! `FailClosed` returns the error so the trigger redelivers the event.

use core_config::{ConfigError, FromEnv};
use serde::{Deserialize, Serialize};
use std::env;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

/// What a component reports to its trigger after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ErrorPolicy {
    FailOpen,
    FailClosed,
}

/// Error kinds that carry a configurable policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Display, AsRefStr, EnumIter)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    MalformedPayload,
    StoreWriteFailed,
    StoreConflict,
    MalformedChangeEntry,
    QueueSubmitFailed,
}

impl ErrorKind {
    /// Environment key holding this kind's policy, e.g. `POLICY_STORE_WRITE_FAILED`.
    pub fn env_key(&self) -> String {
        format!("POLICY_{}", self.as_ref())
    }
}

/// Policy for every error kind.
///
/// Malformed input can never succeed on redelivery, so it fails open by
/// default. Store and queue failures are usually transient and fail closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyConfig {
    pub malformed_payload: ErrorPolicy,
    pub store_write_failed: ErrorPolicy,
    pub store_conflict: ErrorPolicy,
    pub malformed_change_entry: ErrorPolicy,
    pub queue_submit_failed: ErrorPolicy,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            malformed_payload: ErrorPolicy::FailOpen,
            store_write_failed: ErrorPolicy::FailClosed,
            store_conflict: ErrorPolicy::FailOpen,
            malformed_change_entry: ErrorPolicy::FailOpen,
            queue_submit_failed: ErrorPolicy::FailClosed,
        }
    }
}

impl PolicyConfig {
    /// Every kind fails open.
    pub fn fail_open() -> Self {
        Self::uniform(ErrorPolicy::FailOpen)
    }

    /// Every kind fails closed.
    pub fn fail_closed() -> Self {
        Self::uniform(ErrorPolicy::FailClosed)
    }

    fn uniform(policy: ErrorPolicy) -> Self {
        Self {
            malformed_payload: policy,
            store_write_failed: policy,
            store_conflict: policy,
            malformed_change_entry: policy,
            queue_submit_failed: policy,
        }
    }

    pub fn for_kind(&self, kind: ErrorKind) -> ErrorPolicy {
        match kind {
            ErrorKind::MalformedPayload => self.malformed_payload,
            ErrorKind::StoreWriteFailed => self.store_write_failed,
            ErrorKind::StoreConflict => self.store_conflict,
            ErrorKind::MalformedChangeEntry => self.malformed_change_entry,
            ErrorKind::QueueSubmitFailed => self.queue_submit_failed,
        }
    }

    pub fn with(mut self, kind: ErrorKind, policy: ErrorPolicy) -> Self {
        let slot = match kind {
            ErrorKind::MalformedPayload => &mut self.malformed_payload,
            ErrorKind::StoreWriteFailed => &mut self.store_write_failed,
            ErrorKind::StoreConflict => &mut self.store_conflict,
            ErrorKind::MalformedChangeEntry => &mut self.malformed_change_entry,
            ErrorKind::QueueSubmitFailed => &mut self.queue_submit_failed,
        };
        *slot = policy;
        self
    }
}

impl FromEnv for PolicyConfig {
    /// Reads `POLICY_<KIND>` (`fail_open` or `fail_closed`) for every kind.
    fn from_env() -> Result<Self, ConfigError> {
        let mut config = PolicyConfig::default();

        for kind in ErrorKind::iter() {
            let key = kind.env_key();
            if let Ok(raw) = env::var(&key) {
                let policy = raw.trim().parse::<ErrorPolicy>().map_err(|_| ConfigError::Invalid {
                    key: key.clone(),
                    details: format!("expected fail_open or fail_closed, got '{}'", raw),
                })?;
                config = config.with(kind, policy);
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PolicyConfig::default();
        assert_eq!(config.for_kind(ErrorKind::MalformedPayload), ErrorPolicy::FailOpen);
        assert_eq!(config.for_kind(ErrorKind::StoreConflict), ErrorPolicy::FailOpen);
        assert_eq!(config.for_kind(ErrorKind::MalformedChangeEntry), ErrorPolicy::FailOpen);
        assert_eq!(config.for_kind(ErrorKind::StoreWriteFailed), ErrorPolicy::FailClosed);
        assert_eq!(config.for_kind(ErrorKind::QueueSubmitFailed), ErrorPolicy::FailClosed);
    }

    #[test]
    fn test_with_and_uniform() {
        let config = PolicyConfig::fail_closed().with(ErrorKind::QueueSubmitFailed, ErrorPolicy::FailOpen);
        assert_eq!(config.for_kind(ErrorKind::QueueSubmitFailed), ErrorPolicy::FailOpen);
        assert_eq!(config.for_kind(ErrorKind::MalformedPayload), ErrorPolicy::FailClosed);

        assert!(ErrorKind::iter().all(|k| PolicyConfig::fail_open().for_kind(k) == ErrorPolicy::FailOpen));
    }

    #[test]
    fn test_env_key() {
        assert_eq!(ErrorKind::StoreWriteFailed.env_key(), "POLICY_STORE_WRITE_FAILED");
        assert_eq!(ErrorKind::MalformedChangeEntry.to_string(), "MALFORMED_CHANGE_ENTRY");
    }

    #[test]
    fn test_from_env() {
        temp_env::with_vars(
            [
                ("POLICY_STORE_WRITE_FAILED", Some("fail_open")),
                ("POLICY_MALFORMED_PAYLOAD", Some(" FAIL_CLOSED ")),
                ("POLICY_QUEUE_SUBMIT_FAILED", None),
            ],
            || {
                let config = PolicyConfig::from_env().unwrap();
                assert_eq!(config.store_write_failed, ErrorPolicy::FailOpen);
                assert_eq!(config.malformed_payload, ErrorPolicy::FailClosed);
                assert_eq!(config.queue_submit_failed, ErrorPolicy::FailClosed);
            },
        );
    }

    #[test]
    fn test_from_env_rejects_unknown_policy() {
        temp_env::with_var("POLICY_STORE_CONFLICT", Some("maybe"), || {
            let err = PolicyConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("POLICY_STORE_CONFLICT"));
        });
    }
}
