//! Append-only audit log shared by hubs and memory stores.
//!
//! Every registration, send, receive, read, write, delete and administrative
//! change appends exactly one [`AccessLogEntry`], successful or not. The log
//! is a cheap-to-clone handle, so one session can hand the same log to its
//! communication hub and its memory manager.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ErrorKind, SubstrateError};

/// Operation recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Register,
    Unregister,
    Send,
    Receive,
    Subscribe,
    Unsubscribe,
    CreateTopic,
    DeleteTopic,
    ClearMessages,
    Read,
    Write,
    Delete,
    ClearMemory,
    RoleChange,
    PermissionAdd,
    PermissionRemove,
    ProtectKey,
    UnprotectKey,
    AddEvent,
    ReadEvents,
    ClearEvents,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Unregister => "unregister",
            Self::Send => "send",
            Self::Receive => "receive",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::CreateTopic => "create_topic",
            Self::DeleteTopic => "delete_topic",
            Self::ClearMessages => "clear_messages",
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::ClearMemory => "clear_memory",
            Self::RoleChange => "role_change",
            Self::PermissionAdd => "permission_add",
            Self::PermissionRemove => "permission_remove",
            Self::ProtectKey => "protect_key",
            Self::UnprotectKey => "unprotect_key",
            Self::AddEvent => "add_event",
            Self::ReadEvents => "read_events",
            Self::ClearEvents => "clear_events",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an audited operation failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFailure {
    pub kind: ErrorKind,
    pub detail: String,
}

/// A single audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessLogEntry {
    /// Position of this entry in the log (0-based).
    pub sequence: u64,
    pub agent_id: String,
    pub operation: Operation,
    /// Key, topic, recipient or other operand the operation acted on.
    pub target: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    /// Present only when `success` is false and the failure has a known kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AuditFailure>,
}

impl AccessLogEntry {
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

#[derive(Debug, Default)]
struct AuditState {
    entries: Vec<AccessLogEntry>,
    next_sequence: u64,
}

/// Thread-safe, append-only audit log.
#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    inner: Arc<Mutex<AuditState>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry without an error payload.
    pub fn record(&self, agent_id: &str, operation: Operation, target: &str, success: bool) {
        self.push(agent_id, operation, target, success, None);
    }

    /// Append a failed entry carrying the error kind and its message.
    pub fn record_failure(
        &self,
        agent_id: &str,
        operation: Operation,
        target: &str,
        error: &SubstrateError,
    ) {
        log::debug!(
            "[AuditLog] {} by '{}' on '{}' failed: {}",
            operation,
            agent_id,
            target,
            error
        );
        let failure = AuditFailure {
            kind: error.kind(),
            detail: error.to_string(),
        };
        self.push(agent_id, operation, target, false, Some(failure));
    }

    /// Record the outcome of a `try_*` call and hand the result back.
    pub fn record_result<T>(
        &self,
        agent_id: &str,
        operation: Operation,
        target: &str,
        result: crate::errors::Result<T>,
    ) -> crate::errors::Result<T> {
        match &result {
            Ok(_) => self.record(agent_id, operation, target, true),
            Err(err) => self.record_failure(agent_id, operation, target, err),
        }
        result
    }

    fn push(
        &self,
        agent_id: &str,
        operation: Operation,
        target: &str,
        success: bool,
        error: Option<AuditFailure>,
    ) {
        let mut state = self.inner.lock();
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.entries.push(AccessLogEntry {
            sequence,
            agent_id: agent_id.to_string(),
            operation,
            target: target.to_string(),
            success,
            timestamp: Utc::now(),
            error,
        });
    }

    /// All entries in order, optionally filtered to one agent.
    pub fn query(&self, agent_id: Option<&str>) -> Vec<AccessLogEntry> {
        let state = self.inner.lock();
        match agent_id {
            Some(id) => state
                .entries
                .iter()
                .filter(|e| e.agent_id == id)
                .cloned()
                .collect(),
            None => state.entries.clone(),
        }
    }

    /// Entries for a given operation, in order.
    pub fn by_operation(&self, operation: Operation) -> Vec<AccessLogEntry> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|e| e.operation == operation)
            .cloned()
            .collect()
    }

    /// Failed entries, in order.
    pub fn failures(&self) -> Vec<AccessLogEntry> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|e| !e.success)
            .cloned()
            .collect()
    }

    pub fn last(&self) -> Option<AccessLogEntry> {
        self.inner.lock().entries.last().cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// JSON array of all entries, for collaborators that persist session state.
    pub fn snapshot(&self) -> Value {
        let state = self.inner.lock();
        serde_json::to_value(&state.entries).unwrap_or(Value::Array(Vec::new()))
    }
}
