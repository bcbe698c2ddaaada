//! Layered memory for agents.
//!
//! - [`SharedMemory`]: one key-value space every registered agent may read,
//!   write and delete.
//! - [`RbacMemory`]: the same space gated by role capabilities, with
//!   ADMIN-only protected keys.
//! - [`ShortTermMemory`]: a bounded per-agent event buffer.
//! - [`MemoryManager`]: the facade that pairs one store with a
//!   short-term buffer per agent.
//!
//! Every write stamps the value with its writer, a timestamp and a per-key
//! version that only ever grows.

pub mod entry;
pub mod manager;
pub mod rbac;
pub mod shared;
pub mod short_term;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audit::AuditLog;
use crate::errors::Result;

pub use entry::{MemoryEntry, MemoryInfo};
pub use manager::{AgentActivity, MemoryManager, MemoryState, MemoryStats, OperationBreakdown};
pub use rbac::{AccessLevel, RbacMemory, RbacStats, RoleDefinition, RoleInfo};
pub use shared::SharedMemory;
pub use short_term::{ShortTermEvent, ShortTermInfo, ShortTermMemory};

/// Which store variant backs a memory manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    #[default]
    Shared,
    Rbac,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shared => "shared",
            Self::Rbac => "rbac",
        }
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shared" => Ok(Self::Shared),
            "rbac" => Ok(Self::Rbac),
            other => Err(format!("unknown memory mode: {}", other)),
        }
    }
}

/// Contract shared by the memory store variants.
///
/// As with the hubs, `try_*` methods carry the failure reason and the plain
/// methods collapse it; the store audits every call exactly once.
pub trait MemoryStore: Send + Sync + fmt::Debug {
    fn kind(&self) -> MemoryKind;

    fn audit_log(&self) -> &AuditLog;

    /// Register an agent. `role` is ignored by stores without access control.
    fn try_register_agent(&self, agent_id: &str, role: Option<&str>) -> Result<()>;

    fn register_agent(&self, agent_id: &str, role: Option<&str>) -> bool {
        self.try_register_agent(agent_id, role).is_ok()
    }

    fn is_registered(&self, agent_id: &str) -> bool;

    /// Registered agent ids, in registration order.
    fn registered_agents(&self) -> Vec<String>;

    fn try_read(&self, key: &str, agent_id: &str) -> Result<MemoryEntry>;

    fn read(&self, key: &str, agent_id: &str) -> Option<MemoryEntry> {
        self.try_read(key, agent_id).ok()
    }

    /// The stored value without its envelope.
    fn get_value(&self, key: &str, agent_id: &str) -> Option<Value> {
        self.read(key, agent_id).map(|entry| entry.value)
    }

    /// Store `value` under `key` and return the new entry.
    fn try_write(&self, key: &str, value: Value, agent_id: &str) -> Result<MemoryEntry>;

    fn write(&self, key: &str, value: Value, agent_id: &str) -> bool {
        self.try_write(key, value, agent_id).is_ok()
    }

    /// Remove `key` and return the entry it held.
    fn try_delete(&self, key: &str, agent_id: &str) -> Result<MemoryEntry>;

    fn delete_key(&self, key: &str, agent_id: &str) -> bool {
        self.try_delete(key, agent_id).is_ok()
    }

    /// Every stored key, sorted.
    fn keys(&self) -> Vec<String>;

    /// Copy of every stored entry, keyed and sorted by key.
    fn entries(&self) -> BTreeMap<String, MemoryEntry>;

    /// Keys the agent is allowed to see, sorted.
    fn visible_keys(&self, agent_id: &str) -> Vec<String>;

    /// Entry metadata without the value.
    fn entry_info(&self, key: &str, agent_id: &str) -> Option<MemoryInfo>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all entries and reset version counters. Registrations and the
    /// audit log survive.
    fn clear_memory(&self);

    /// Role administration, for stores that have it.
    fn access_control(&self) -> Option<&dyn AccessControl> {
        None
    }
}

/// ADMIN-gated role and key administration.
pub trait AccessControl: Send + Sync {
    /// Move `agent_id` to `new_role`.
    fn try_set_agent_role(&self, agent_id: &str, new_role: &str, admin_id: &str) -> Result<()>;

    fn set_agent_role(&self, agent_id: &str, new_role: &str, admin_id: &str) -> bool {
        self.try_set_agent_role(agent_id, new_role, admin_id).is_ok()
    }

    /// Add a capability to a role, creating the role if needed.
    fn try_grant_permission(&self, role: &str, level: AccessLevel, admin_id: &str) -> Result<()>;

    fn grant_permission(&self, role: &str, level: AccessLevel, admin_id: &str) -> bool {
        self.try_grant_permission(role, level, admin_id).is_ok()
    }

    /// Remove a capability from a role. `Ok(false)` if the role did not hold it.
    fn try_revoke_permission(&self, role: &str, level: AccessLevel, admin_id: &str)
        -> Result<bool>;

    fn revoke_permission(&self, role: &str, level: AccessLevel, admin_id: &str) -> bool {
        self.try_revoke_permission(role, level, admin_id)
            .unwrap_or(false)
    }

    fn try_protect_key(&self, key: &str, admin_id: &str) -> Result<()>;

    fn protect_key(&self, key: &str, admin_id: &str) -> bool {
        self.try_protect_key(key, admin_id).is_ok()
    }

    fn try_unprotect_key(&self, key: &str, admin_id: &str) -> Result<()>;

    fn unprotect_key(&self, key: &str, admin_id: &str) -> bool {
        self.try_unprotect_key(key, admin_id).is_ok()
    }

    /// Protected keys, visible to ADMIN holders only.
    fn protected_keys(&self, agent_id: &str) -> Vec<String>;

    fn agent_role(&self, agent_id: &str) -> Option<String>;

    fn agent_permissions(&self, agent_id: &str) -> BTreeSet<AccessLevel>;

    fn has_permission(&self, agent_id: &str, level: AccessLevel) -> bool {
        self.agent_permissions(agent_id).contains(&level)
    }
}
