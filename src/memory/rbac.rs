//! Role-based access control over the shared key space.
//!
//! Maps agents → role → capability levels. Every operation first checks
//! that the caller's role holds the required level; writing or deleting a
//! protected key additionally requires ADMIN.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audit::{AuditLog, Operation};
use crate::errors::{Result, SubstrateError};

use super::entry::{EntryTable, MemoryEntry, MemoryInfo};
use super::{AccessControl, MemoryKind, MemoryStore};

pub const ADMIN_ROLE: &str = "Admin";
pub const GUEST_ROLE: &str = "Guest";
pub const COORDINATOR_ROLE: &str = "Team Coordinator";
pub const ANALYST_ROLE: &str = "Problem Analyst";
pub const SPECIALIST_ROLE: &str = "Domain Specialist";
pub const IMPLEMENTER_ROLE: &str = "Solution Implementer";

/// Capability levels a role can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Read,
    Write,
    Delete,
    Admin,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::Admin => "admin",
        }
    }

    pub fn all() -> [AccessLevel; 4] {
        [Self::Read, Self::Write, Self::Delete, Self::Admin]
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "delete" => Ok(Self::Delete),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown access level: {}", other)),
        }
    }
}

/// A role and the levels it grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDefinition {
    pub name: String,
    pub levels: BTreeSet<AccessLevel>,
}

impl RoleDefinition {
    pub fn new(name: impl Into<String>, levels: impl IntoIterator<Item = AccessLevel>) -> Self {
        Self {
            name: name.into(),
            levels: levels.into_iter().collect(),
        }
    }
}

/// The built-in role table.
pub fn default_roles() -> Vec<RoleDefinition> {
    use AccessLevel::*;
    vec![
        RoleDefinition::new(ANALYST_ROLE, [Read, Write]),
        RoleDefinition::new(COORDINATOR_ROLE, [Read, Write, Delete]),
        RoleDefinition::new(SPECIALIST_ROLE, [Read, Write]),
        RoleDefinition::new(IMPLEMENTER_ROLE, [Read, Write]),
        RoleDefinition::new(ADMIN_ROLE, AccessLevel::all()),
        RoleDefinition::new(GUEST_ROLE, [Read]),
    ]
}

/// A role's current levels and members.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoleInfo {
    pub role: String,
    pub permissions: BTreeSet<AccessLevel>,
    pub agents: Vec<String>,
}

/// Summary of the RBAC state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RbacStats {
    pub total_agents: usize,
    pub total_roles: usize,
    pub protected_keys: usize,
    pub role_distribution: BTreeMap<String, usize>,
    pub memory_entries: usize,
    pub access_log_entries: usize,
}

#[derive(Debug, Default)]
struct RbacState {
    agents: Vec<String>,
    agent_roles: BTreeMap<String, String>,
    role_permissions: BTreeMap<String, BTreeSet<AccessLevel>>,
    protected_keys: BTreeSet<String>,
    table: EntryTable,
}

impl RbacState {
    fn has_permission(&self, agent_id: &str, level: AccessLevel) -> bool {
        self.agent_roles
            .get(agent_id)
            .and_then(|role| self.role_permissions.get(role))
            .map(|levels| levels.contains(&level))
            .unwrap_or(false)
    }

    /// Registered and holding `level`.
    fn check(&self, agent_id: &str, level: AccessLevel, target: &str) -> Result<()> {
        if !self.agent_roles.contains_key(agent_id) {
            return Err(SubstrateError::unregistered(agent_id));
        }
        if !self.has_permission(agent_id, level) {
            return Err(SubstrateError::permission_denied(agent_id, level, target));
        }
        Ok(())
    }

    /// Mutations of protected keys need ADMIN on top of the base level.
    fn check_mutation(&self, agent_id: &str, level: AccessLevel, key: &str) -> Result<()> {
        self.check(agent_id, level, key)?;
        if self.protected_keys.contains(key) {
            self.check(agent_id, AccessLevel::Admin, key)?;
        }
        Ok(())
    }

    fn agents_with_role(&self, role: &str) -> Vec<String> {
        self.agents
            .iter()
            .filter(|a| self.agent_roles.get(*a).map(String::as_str) == Some(role))
            .cloned()
            .collect()
    }
}

/// Role-gated key-value store.
#[derive(Debug)]
pub struct RbacMemory {
    state: Mutex<RbacState>,
    audit: AuditLog,
    default_role: String,
}

impl Default for RbacMemory {
    fn default() -> Self {
        Self::new(AuditLog::new())
    }
}

impl RbacMemory {
    /// Store with the built-in roles; unroled agents register as `Guest`.
    pub fn new(audit: AuditLog) -> Self {
        Self::with_roles(audit, default_roles(), GUEST_ROLE)
    }

    pub fn with_roles(
        audit: AuditLog,
        roles: impl IntoIterator<Item = RoleDefinition>,
        default_role: impl Into<String>,
    ) -> Self {
        let role_permissions = roles
            .into_iter()
            .map(|role| (role.name, role.levels))
            .collect();
        Self {
            state: Mutex::new(RbacState {
                role_permissions,
                ..RbacState::default()
            }),
            audit,
            default_role: default_role.into(),
        }
    }

    pub fn default_role(&self) -> &str {
        &self.default_role
    }

    pub fn role_info(&self, role: &str) -> Option<RoleInfo> {
        let state = self.state.lock();
        let permissions = state.role_permissions.get(role)?.clone();
        Some(RoleInfo {
            role: role.to_string(),
            permissions,
            agents: state.agents_with_role(role),
        })
    }

    /// Defined role names, sorted.
    pub fn all_roles(&self) -> Vec<String> {
        self.state.lock().role_permissions.keys().cloned().collect()
    }

    pub fn rbac_stats(&self) -> RbacStats {
        let state = self.state.lock();
        let role_distribution = state
            .role_permissions
            .keys()
            .map(|role| (role.clone(), state.agents_with_role(role).len()))
            .collect();
        RbacStats {
            total_agents: state.agents.len(),
            total_roles: state.role_permissions.len(),
            protected_keys: state.protected_keys.len(),
            role_distribution,
            memory_entries: state.table.len(),
            access_log_entries: self.audit.len(),
        }
    }
}

impl MemoryStore for RbacMemory {
    fn kind(&self) -> MemoryKind {
        MemoryKind::Rbac
    }

    fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    fn try_register_agent(&self, agent_id: &str, role: Option<&str>) -> Result<()> {
        let role = role.unwrap_or(&self.default_role);
        let result = {
            let mut state = self.state.lock();
            if state.agent_roles.contains_key(agent_id) {
                Err(SubstrateError::AlreadyRegistered {
                    agent_id: agent_id.to_string(),
                })
            } else if !state.role_permissions.contains_key(role) {
                Err(SubstrateError::UnknownRole {
                    role: role.to_string(),
                })
            } else {
                state.agents.push(agent_id.to_string());
                state
                    .agent_roles
                    .insert(agent_id.to_string(), role.to_string());
                log::info!("[RbacMemory] registered agent '{}' as '{}'", agent_id, role);
                Ok(())
            }
        };
        self.audit
            .record_result(agent_id, Operation::Register, role, result)
    }

    fn is_registered(&self, agent_id: &str) -> bool {
        self.state.lock().agent_roles.contains_key(agent_id)
    }

    fn registered_agents(&self) -> Vec<String> {
        self.state.lock().agents.clone()
    }

    fn try_read(&self, key: &str, agent_id: &str) -> Result<MemoryEntry> {
        let result = {
            let state = self.state.lock();
            state.check(agent_id, AccessLevel::Read, key).and_then(|()| {
                state
                    .table
                    .get(key)
                    .cloned()
                    .ok_or_else(|| SubstrateError::key_not_found(key))
            })
        };
        self.audit.record_result(agent_id, Operation::Read, key, result)
    }

    fn try_write(&self, key: &str, value: Value, agent_id: &str) -> Result<MemoryEntry> {
        let result = {
            let mut state = self.state.lock();
            state
                .check_mutation(agent_id, AccessLevel::Write, key)
                .map(|()| {
                    let protected = state.protected_keys.contains(key);
                    state.table.put(key, value, agent_id, protected)
                })
        };
        match &result {
            Ok(entry) => log::debug!(
                "[RbacMemory] '{}' wrote '{}' (version {})",
                agent_id,
                key,
                entry.version
            ),
            Err(err) => log::warn!("[RbacMemory] write denied: {}", err),
        }
        self.audit
            .record_result(agent_id, Operation::Write, key, result)
    }

    fn try_delete(&self, key: &str, agent_id: &str) -> Result<MemoryEntry> {
        let result = {
            let mut state = self.state.lock();
            state
                .check_mutation(agent_id, AccessLevel::Delete, key)
                .and_then(|()| {
                    let removed = state
                        .table
                        .remove(key)
                        .ok_or_else(|| SubstrateError::key_not_found(key))?;
                    state.protected_keys.remove(key);
                    Ok(removed)
                })
        };
        self.audit
            .record_result(agent_id, Operation::Delete, key, result)
    }

    fn keys(&self) -> Vec<String> {
        self.state.lock().table.keys()
    }

    fn entries(&self) -> BTreeMap<String, MemoryEntry> {
        self.state.lock().table.entries()
    }

    /// Protected keys are listed for ADMIN holders only.
    fn visible_keys(&self, agent_id: &str) -> Vec<String> {
        let state = self.state.lock();
        if !state.has_permission(agent_id, AccessLevel::Read) {
            return Vec::new();
        }
        if state.has_permission(agent_id, AccessLevel::Admin) {
            return state.table.keys();
        }
        state
            .table
            .keys()
            .into_iter()
            .filter(|key| !state.protected_keys.contains(key))
            .collect()
    }

    fn entry_info(&self, key: &str, agent_id: &str) -> Option<MemoryInfo> {
        let state = self.state.lock();
        if !state.has_permission(agent_id, AccessLevel::Read) {
            return None;
        }
        state.table.get(key).map(MemoryInfo::from)
    }

    fn len(&self) -> usize {
        self.state.lock().table.len()
    }

    fn clear_memory(&self) {
        {
            let mut state = self.state.lock();
            state.table.clear();
            state.protected_keys.clear();
        }
        log::info!("[RbacMemory] cleared all entries and key protections");
        self.audit
            .record("system", Operation::ClearMemory, "rbac", true);
    }

    fn access_control(&self) -> Option<&dyn AccessControl> {
        Some(self)
    }
}

impl AccessControl for RbacMemory {
    fn try_set_agent_role(&self, agent_id: &str, new_role: &str, admin_id: &str) -> Result<()> {
        let result = {
            let mut state = self.state.lock();
            state
                .check(admin_id, AccessLevel::Admin, agent_id)
                .and_then(|()| {
                    if !state.role_permissions.contains_key(new_role) {
                        return Err(SubstrateError::UnknownRole {
                            role: new_role.to_string(),
                        });
                    }
                    match state.agent_roles.get_mut(agent_id) {
                        Some(role) => Ok(std::mem::replace(role, new_role.to_string())),
                        None => Err(SubstrateError::unregistered(agent_id)),
                    }
                })
        };
        match result {
            Ok(old_role) => {
                log::info!(
                    "[RbacMemory] '{}' moved '{}' from '{}' to '{}'",
                    admin_id,
                    agent_id,
                    old_role,
                    new_role
                );
                let target = format!("{}: {} -> {}", agent_id, old_role, new_role);
                self.audit
                    .record(admin_id, Operation::RoleChange, &target, true);
                Ok(())
            }
            Err(err) => {
                self.audit
                    .record_failure(admin_id, Operation::RoleChange, agent_id, &err);
                Err(err)
            }
        }
    }

    fn try_grant_permission(&self, role: &str, level: AccessLevel, admin_id: &str) -> Result<()> {
        let target = format!("{}: {}", role, level);
        let result = {
            let mut state = self.state.lock();
            state.check(admin_id, AccessLevel::Admin, role).map(|()| {
                state
                    .role_permissions
                    .entry(role.to_string())
                    .or_default()
                    .insert(level);
            })
        };
        self.audit
            .record_result(admin_id, Operation::PermissionAdd, &target, result)
    }

    fn try_revoke_permission(
        &self,
        role: &str,
        level: AccessLevel,
        admin_id: &str,
    ) -> Result<bool> {
        let target = format!("{}: {}", role, level);
        let result = {
            let mut state = self.state.lock();
            state
                .check(admin_id, AccessLevel::Admin, role)
                .and_then(|()| match state.role_permissions.get_mut(role) {
                    Some(levels) => Ok(levels.remove(&level)),
                    None => Err(SubstrateError::UnknownRole {
                        role: role.to_string(),
                    }),
                })
        };
        if let Ok(false) = result {
            log::debug!("[RbacMemory] role '{}' did not hold {}", role, level);
        }
        self.audit
            .record_result(admin_id, Operation::PermissionRemove, &target, result)
    }

    fn try_protect_key(&self, key: &str, admin_id: &str) -> Result<()> {
        let result = {
            let mut state = self.state.lock();
            state.check(admin_id, AccessLevel::Admin, key).map(|()| {
                state.protected_keys.insert(key.to_string());
                state.table.set_protected(key, true);
            })
        };
        self.audit
            .record_result(admin_id, Operation::ProtectKey, key, result)
    }

    fn try_unprotect_key(&self, key: &str, admin_id: &str) -> Result<()> {
        let result = {
            let mut state = self.state.lock();
            state.check(admin_id, AccessLevel::Admin, key).map(|()| {
                state.protected_keys.remove(key);
                state.table.set_protected(key, false);
            })
        };
        self.audit
            .record_result(admin_id, Operation::UnprotectKey, key, result)
    }

    fn protected_keys(&self, agent_id: &str) -> Vec<String> {
        let state = self.state.lock();
        if state.has_permission(agent_id, AccessLevel::Admin) {
            state.protected_keys.iter().cloned().collect()
        } else {
            Vec::new()
        }
    }

    fn agent_role(&self, agent_id: &str) -> Option<String> {
        self.state.lock().agent_roles.get(agent_id).cloned()
    }

    fn agent_permissions(&self, agent_id: &str) -> BTreeSet<AccessLevel> {
        let state = self.state.lock();
        state
            .agent_roles
            .get(agent_id)
            .and_then(|role| state.role_permissions.get(role))
            .cloned()
            .unwrap_or_default()
    }
}
