//! Records as the engine sees them. Timestamps are truncated to millisecond
//! precision on construction so that every backend round-trips them exactly.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

/// Current time at the precision the stores persist.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    /// `nonce ‖ tag ‖ ciphertext`. Emptied on deletion.
    pub ciphertext: Vec<u8>,
    /// RSA-OAEP wrapped message key. Emptied on deletion.
    pub wrapped_key: Vec<u8>,
    pub created_at: DateTime<Utc>,
    /// Strictly after `created_at` when set.
    pub destruct_at: Option<DateTime<Utc>>,
    pub read_once: bool,
    pub is_read: bool,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl MessageRecord {
    pub fn new(
        sender_id: impl Into<String>,
        recipient_id: impl Into<String>,
        ciphertext: Vec<u8>,
        wrapped_key: Vec<u8>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender_id: sender_id.into(),
            recipient_id: recipient_id.into(),
            ciphertext,
            wrapped_key,
            created_at: now(),
            destruct_at: None,
            read_once: false,
            is_read: false,
            is_deleted: false,
            deleted_at: None,
        }
    }

    /// Rejects a deadline at or before creation.
    pub fn check_deadline(&self, destruct_at: Option<DateTime<Utc>>) -> Result<(), StoreError> {
        match destruct_at {
            Some(at) if at <= self.created_at => Err(StoreError::Constraint(format!(
                "message {}: deadline {at} not after creation {}",
                self.id, self.created_at
            ))),
            _ => Ok(()),
        }
    }

    /// Past its deadline and not yet deleted.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.is_deleted && self.destruct_at.is_some_and(|at| at < now)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionKeyRecord {
    pub id: String,
    pub wrapped_key: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_destroyed: bool,
    pub destroyed_at: Option<DateTime<Utc>>,
}

impl SessionKeyRecord {
    pub fn new(id: impl Into<String>, wrapped_key: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            wrapped_key,
            created_at: now(),
            expires_at: None,
            is_destroyed: false,
            destroyed_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at.trunc_subsecs(3));
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.is_destroyed && self.expires_at.is_some_and(|at| at < now)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogSeverity {
    Info,
    Warn,
    Error,
    Critical,
}

impl LogSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INFO" => Some(Self::Info),
            "WARN" => Some(Self::Warn),
            "ERROR" => Some(Self::Error),
            "CRITICAL" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// One line of the system log. Never carries plaintext or key material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemLogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub severity: LogSeverity,
    pub message_id: Option<String>,
    pub data: serde_json::Value,
}

impl SystemLogEntry {
    pub fn new(event_type: impl Into<String>, severity: LogSeverity, data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: now(),
            event_type: event_type.into(),
            severity,
            message_id: None,
            data,
        }
    }

    pub fn for_message(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp.trunc_subsecs(3);
        self
    }
}

/// Output of the threat-scoring collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub id: String,
    pub user_id: String,
    pub threat_score: f64,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: serde_json::Value,
    pub is_resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
}

impl IncidentRecord {
    pub fn new(user_id: impl Into<String>, threat_score: f64, reason: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            threat_score,
            reason: reason.into(),
            timestamp: now(),
            metadata: serde_json::json!({}),
            is_resolved: false,
            resolved_at: None,
            resolved_by: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp.trunc_subsecs(3);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn message_expiry_is_strict_and_ignores_deleted() {
        let mut msg = MessageRecord::new("alice", "bob", vec![1], vec![2]);
        let t = msg.created_at + Duration::seconds(30);
        msg.destruct_at = Some(t);

        assert!(!msg.is_expired(t));
        assert!(msg.is_expired(t + Duration::milliseconds(1)));

        msg.is_deleted = true;
        assert!(!msg.is_expired(t + Duration::days(1)));
    }

    #[test]
    fn deadline_must_follow_creation() {
        let msg = MessageRecord::new("alice", "bob", vec![1], vec![2]);
        assert!(msg.check_deadline(None).is_ok());
        assert!(msg.check_deadline(Some(msg.created_at + Duration::milliseconds(1))).is_ok());
        assert!(matches!(
            msg.check_deadline(Some(msg.created_at)),
            Err(StoreError::Constraint(_))
        ));
        assert!(matches!(
            msg.check_deadline(Some(msg.created_at - Duration::seconds(5))),
            Err(StoreError::Constraint(_))
        ));
    }

    #[test]
    fn timestamps_have_millisecond_precision() {
        let msg = MessageRecord::new("a", "b", vec![], vec![]);
        assert_eq!(msg.created_at.timestamp_subsec_nanos() % 1_000_000, 0);
    }

    #[test]
    fn severity_text_roundtrip() {
        for s in [LogSeverity::Info, LogSeverity::Warn, LogSeverity::Error, LogSeverity::Critical] {
            assert_eq!(LogSeverity::parse(s.as_str()), Some(s));
            assert_eq!(serde_json::to_value(s).unwrap(), serde_json::json!(s.as_str()));
        }
        assert_eq!(LogSeverity::parse("loud"), None);
    }
}
