//! Audit records written to the system log. Sizes and flags only; never
//! plaintext, never key bytes.

use chrono::{DateTime, Utc};
use cinder_store::{LogSeverity, MessageRecord, SystemLogEntry};
use serde::{Deserialize, Serialize};

pub const MESSAGE_DESTROYED: &str = "MESSAGE_DESTROYED";
pub const PARTIAL_DESTRUCTION: &str = "PARTIAL_DESTRUCTION";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DestructionReason {
    /// Deadline reached, fired from the in-memory schedule.
    ScheduledSelfDestruct,
    /// Deadline reached, found by the durable sweep.
    SweepExpired,
    /// Read-once message consumed.
    ReadOnce,
    /// Explicit delete.
    Explicit,
}

impl DestructionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScheduledSelfDestruct => "SCHEDULED_SELF_DESTRUCT",
            Self::SweepExpired => "SWEEP_EXPIRED",
            Self::ReadOnce => "READ_ONCE",
            Self::Explicit => "EXPLICIT",
        }
    }
}

/// One entry per destroyed message. `defect` is set when the key handle was
/// malformed; the entry is then a `PARTIAL_DESTRUCTION` at error severity.
pub fn destruction_entry(
    message: &MessageRecord,
    reason: DestructionReason,
    at: DateTime<Utc>,
    defect: Option<&str>,
) -> SystemLogEntry {
    let mut data = serde_json::json!({
        "reason": reason,
        "sender_id": message.sender_id,
        "recipient_id": message.recipient_id,
        "read_once": message.read_once,
        "ciphertext_len": message.ciphertext.len(),
        "destruct_at": message.destruct_at,
        "lifetime_ms": (at - message.created_at).num_milliseconds(),
    });
    let (event, severity) = match defect {
        Some(defect) => {
            data["defect"] = serde_json::Value::String(defect.to_string());
            (PARTIAL_DESTRUCTION, LogSeverity::Error)
        }
        None => (MESSAGE_DESTROYED, LogSeverity::Info),
    };
    SystemLogEntry::new(event, severity, data)
        .for_message(&message.id)
        .at(at)
}
