//! Error types for the communication and memory substrate.
//!
//! Every expected failure is recovered locally: the `try_*` methods return a
//! [`SubstrateError`], the plain methods map it to `false` / `None` / an empty
//! list, and the failure is written to the audit log exactly once.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memory::rbac::AccessLevel;

/// Result alias for substrate operations.
pub type Result<T> = std::result::Result<T, SubstrateError>;

/// Failures produced by hubs and memory stores.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubstrateError {
    /// Operation attempted by an agent that was never registered.
    #[error("agent '{agent_id}' is not registered")]
    UnregisteredAgent { agent_id: String },

    /// Registration attempted for an agent that already exists.
    #[error("agent '{agent_id}' is already registered")]
    AlreadyRegistered { agent_id: String },

    /// The caller's role lacks the required capability.
    #[error("agent '{agent_id}' lacks {required} permission for '{target}'")]
    PermissionDenied {
        agent_id: String,
        required: AccessLevel,
        target: String,
    },

    /// Read or delete on an absent key.
    #[error("memory key '{key}' not found")]
    KeyNotFound { key: String },

    /// Direct send to a mailbox that does not exist.
    #[error("recipient '{recipient_id}' not found")]
    RecipientNotFound { recipient_id: String },

    /// Topic interaction that requires subscribers (or a subscription) that are absent.
    #[error("topic '{topic}' has no matching subscription")]
    InvalidTopic { topic: String },

    /// Role name that is not defined in the RBAC role table.
    #[error("role '{role}' is not defined")]
    UnknownRole { role: String },

    /// Operation not offered by the active hub or store variant.
    #[error("{operation} is not supported by {variant}")]
    UnsupportedOperation {
        operation: String,
        variant: String,
    },
}

impl SubstrateError {
    pub fn unregistered(agent_id: &str) -> Self {
        Self::UnregisteredAgent {
            agent_id: agent_id.to_string(),
        }
    }

    pub fn permission_denied(agent_id: &str, required: AccessLevel, target: &str) -> Self {
        Self::PermissionDenied {
            agent_id: agent_id.to_string(),
            required,
            target: target.to_string(),
        }
    }

    pub fn key_not_found(key: &str) -> Self {
        Self::KeyNotFound {
            key: key.to_string(),
        }
    }

    pub fn invalid_topic(topic: &str) -> Self {
        Self::InvalidTopic {
            topic: topic.to_string(),
        }
    }

    pub fn unsupported(operation: &str, variant: impl fmt::Display) -> Self {
        Self::UnsupportedOperation {
            operation: operation.to_string(),
            variant: variant.to_string(),
        }
    }

    /// The payload-free kind of this error, as stored in the audit log.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnregisteredAgent { .. } => ErrorKind::UnregisteredAgent,
            Self::AlreadyRegistered { .. } => ErrorKind::AlreadyRegistered,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::KeyNotFound { .. } => ErrorKind::KeyNotFound,
            Self::RecipientNotFound { .. } => ErrorKind::RecipientNotFound,
            Self::InvalidTopic { .. } => ErrorKind::InvalidTopic,
            Self::UnknownRole { .. } => ErrorKind::UnknownRole,
            Self::UnsupportedOperation { .. } => ErrorKind::UnsupportedOperation,
        }
    }
}

/// Error taxonomy without payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnregisteredAgent,
    AlreadyRegistered,
    PermissionDenied,
    KeyNotFound,
    RecipientNotFound,
    InvalidTopic,
    UnknownRole,
    UnsupportedOperation,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UnregisteredAgent => "unregistered_agent",
            Self::AlreadyRegistered => "already_registered",
            Self::PermissionDenied => "permission_denied",
            Self::KeyNotFound => "key_not_found",
            Self::RecipientNotFound => "recipient_not_found",
            Self::InvalidTopic => "invalid_topic",
            Self::UnknownRole => "unknown_role",
            Self::UnsupportedOperation => "unsupported_operation",
        };
        f.write_str(name)
    }
}
