//! Memory facade: one key-value store plus a short-term buffer per agent.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::audit::{AccessLogEntry, AuditLog, Operation};
use crate::config::MemoryConfig;
use crate::errors::{Result, SubstrateError};

use super::rbac::{default_roles, RbacMemory};
use super::shared::SharedMemory;
use super::short_term::{ShortTermEvent, ShortTermInfo, ShortTermMemory, DEFAULT_SHORT_TERM_CAPACITY};
use super::{AccessControl, MemoryEntry, MemoryKind, MemoryStore};

/// Read/write/delete counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OperationBreakdown {
    pub reads: usize,
    pub writes: usize,
    pub deletes: usize,
}

/// Usage statistics derived from the audit log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryStats {
    pub total_keys: usize,
    pub total_agents: usize,
    pub total_operations: usize,
    pub successful_operations: usize,
    /// Fraction in `[0, 1]`; 0 when nothing has been recorded.
    pub success_rate: f64,
    pub operation_breakdown: OperationBreakdown,
    pub memory_type: MemoryKind,
}

/// Per-agent view of [`MemoryStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentActivity {
    pub agent_id: String,
    pub total_reads: usize,
    pub total_writes: usize,
    pub total_deletes: usize,
    pub total_operations: usize,
    pub failed_operations: usize,
    pub memory_type: MemoryKind,
}

/// Full contents of the store, for monitoring and debugging.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryState {
    pub entries: BTreeMap<String, MemoryEntry>,
    pub agents: Vec<String>,
    /// Memory operations in the audit log; hub traffic is not counted.
    pub access_log_count: usize,
    pub memory_type: MemoryKind,
}

/// Operations that belong to the memory side of a shared audit log.
fn is_memory_operation(operation: Operation) -> bool {
    matches!(
        operation,
        Operation::Read
            | Operation::Write
            | Operation::Delete
            | Operation::ClearMemory
            | Operation::RoleChange
            | Operation::PermissionAdd
            | Operation::PermissionRemove
            | Operation::ProtectKey
            | Operation::UnprotectKey
            | Operation::AddEvent
            | Operation::ReadEvents
            | Operation::ClearEvents
    )
}

/// Unified entry point for agent memory.
///
/// Registration goes to the store first; only on success does the agent get a
/// fresh short-term buffer. Short-term buffers are independent of the store:
/// `clear_memory` leaves them alone.
#[derive(Debug)]
pub struct MemoryManager {
    store: Box<dyn MemoryStore>,
    short_term: Mutex<HashMap<String, ShortTermMemory>>,
    short_term_capacity: usize,
}

impl MemoryManager {
    /// Build the store selected by `config`, logging into `audit`.
    pub fn new(config: &MemoryConfig, audit: AuditLog) -> Self {
        let store: Box<dyn MemoryStore> = match config.mode {
            MemoryKind::Shared => Box::new(SharedMemory::new(audit)),
            MemoryKind::Rbac => {
                let roles = config.roles.clone().unwrap_or_else(default_roles);
                Box::new(RbacMemory::with_roles(
                    audit,
                    roles,
                    config.default_role.clone(),
                ))
            }
        };
        log::info!(
            "[MemoryManager] using {} memory, short-term capacity {}",
            config.mode,
            config.short_term_capacity
        );
        Self::with_store(store, config.short_term_capacity)
    }

    pub fn shared() -> Self {
        Self::with_store(Box::new(SharedMemory::default()), DEFAULT_SHORT_TERM_CAPACITY)
    }

    pub fn rbac() -> Self {
        Self::with_store(Box::new(RbacMemory::default()), DEFAULT_SHORT_TERM_CAPACITY)
    }

    /// # Panics
    ///
    /// Panics if `short_term_capacity` is zero.
    pub fn with_store(store: Box<dyn MemoryStore>, short_term_capacity: usize) -> Self {
        assert!(
            short_term_capacity > 0,
            "short-term capacity must be at least 1"
        );
        Self {
            store,
            short_term: Mutex::new(HashMap::new()),
            short_term_capacity,
        }
    }

    pub fn store(&self) -> &dyn MemoryStore {
        self.store.as_ref()
    }

    fn audit(&self) -> &AuditLog {
        self.store.audit_log()
    }

    // -- agents -------------------------------------------------------------

    pub fn try_register_agent(&self, agent_id: &str, role: Option<&str>) -> Result<()> {
        self.store.try_register_agent(agent_id, role)?;
        self.short_term.lock().insert(
            agent_id.to_string(),
            ShortTermMemory::new(self.short_term_capacity),
        );
        Ok(())
    }

    pub fn register_agent(&self, agent_id: &str, role: Option<&str>) -> bool {
        self.try_register_agent(agent_id, role).is_ok()
    }

    pub fn is_registered(&self, agent_id: &str) -> bool {
        self.store.is_registered(agent_id)
    }

    pub fn registered_agents(&self) -> Vec<String> {
        self.store.registered_agents()
    }

    // -- shared state -------------------------------------------------------

    pub fn write(&self, key: &str, value: Value, agent_id: &str) -> bool {
        self.store.write(key, value, agent_id)
    }

    pub fn try_write(&self, key: &str, value: Value, agent_id: &str) -> Result<MemoryEntry> {
        self.store.try_write(key, value, agent_id)
    }

    pub fn read(&self, key: &str, agent_id: &str) -> Option<MemoryEntry> {
        self.store.read(key, agent_id)
    }

    pub fn try_read(&self, key: &str, agent_id: &str) -> Result<MemoryEntry> {
        self.store.try_read(key, agent_id)
    }

    pub fn get_value(&self, key: &str, agent_id: &str) -> Option<Value> {
        self.store.get_value(key, agent_id)
    }

    pub fn delete_key(&self, key: &str, agent_id: &str) -> bool {
        self.store.delete_key(key, agent_id)
    }

    pub fn get_memory_keys(&self) -> Vec<String> {
        self.store.keys()
    }

    /// Keys the agent may see; empty for agents without read access.
    pub fn get_visible_keys(&self, agent_id: &str) -> Vec<String> {
        self.store.visible_keys(agent_id)
    }

    pub fn clear_memory(&self) {
        self.store.clear_memory();
    }

    pub fn get_memory_type(&self) -> MemoryKind {
        self.store.kind()
    }

    /// Role administration when the store is RBAC-backed.
    pub fn access_control(&self) -> Option<&dyn AccessControl> {
        self.store.access_control()
    }

    // -- audit --------------------------------------------------------------

    /// Audit entries, optionally for one agent.
    pub fn get_access_log(&self, agent_id: Option<&str>) -> Vec<AccessLogEntry> {
        self.audit().query(agent_id)
    }

    /// Every stored entry with its envelope, plus the registered agents.
    pub fn get_memory_state(&self) -> MemoryState {
        let access_log_count = self
            .audit()
            .query(None)
            .iter()
            .filter(|e| is_memory_operation(e.operation))
            .count();
        MemoryState {
            entries: self.store.entries(),
            agents: self.store.registered_agents(),
            access_log_count,
            memory_type: self.store.kind(),
        }
    }

    /// Aggregate statistics over the memory operations in the audit log.
    pub fn get_memory_stats(&self) -> MemoryStats {
        let entries: Vec<AccessLogEntry> = self
            .audit()
            .query(None)
            .into_iter()
            .filter(|e| is_memory_operation(e.operation))
            .collect();
        let total_operations = entries.len();
        let successful_operations = entries.iter().filter(|e| e.success).count();
        let success_rate = if total_operations == 0 {
            0.0
        } else {
            successful_operations as f64 / total_operations as f64
        };
        MemoryStats {
            total_keys: self.store.len(),
            total_agents: self.store.registered_agents().len(),
            total_operations,
            successful_operations,
            success_rate,
            operation_breakdown: breakdown(&entries),
            memory_type: self.store.kind(),
        }
    }

    /// Activity summary for a registered agent.
    pub fn get_agent_activity(&self, agent_id: &str) -> Option<AgentActivity> {
        if !self.store.is_registered(agent_id) {
            return None;
        }
        let entries: Vec<AccessLogEntry> = self
            .audit()
            .query(Some(agent_id))
            .into_iter()
            .filter(|e| is_memory_operation(e.operation))
            .collect();
        let counts = breakdown(&entries);
        Some(AgentActivity {
            agent_id: agent_id.to_string(),
            total_reads: counts.reads,
            total_writes: counts.writes,
            total_deletes: counts.deletes,
            total_operations: entries.len(),
            failed_operations: entries.iter().filter(|e| !e.success).count(),
            memory_type: self.store.kind(),
        })
    }

    // -- short-term ---------------------------------------------------------

    fn with_short_term<T>(
        &self,
        agent_id: &str,
        operation: Operation,
        f: impl FnOnce(&mut ShortTermMemory) -> T,
    ) -> Result<T> {
        let result = {
            let mut buffers = self.short_term.lock();
            buffers
                .get_mut(agent_id)
                .map(f)
                .ok_or_else(|| SubstrateError::unregistered(agent_id))
        };
        self.audit()
            .record_result(agent_id, operation, "short_term", result)
    }

    pub fn try_add_short_term_event(&self, agent_id: &str, event: Value) -> Result<ShortTermEvent> {
        self.with_short_term(agent_id, Operation::AddEvent, |memory| {
            memory.add_event(event).clone()
        })
    }

    pub fn add_short_term_event(&self, agent_id: &str, event: Value) -> bool {
        self.try_add_short_term_event(agent_id, event).is_ok()
    }

    pub fn try_get_recent_events(&self, agent_id: &str, n: usize) -> Result<Vec<Value>> {
        self.with_short_term(agent_id, Operation::ReadEvents, |memory| {
            memory.get_recent(n)
        })
    }

    /// Last `n` event payloads, oldest first. Empty for unknown agents.
    pub fn get_recent_events(&self, agent_id: &str, n: usize) -> Vec<Value> {
        self.try_get_recent_events(agent_id, n).unwrap_or_default()
    }

    pub fn get_events_since(&self, agent_id: &str, since: DateTime<Utc>) -> Vec<Value> {
        self.with_short_term(agent_id, Operation::ReadEvents, |memory| {
            memory.get_events_since(since)
        })
        .unwrap_or_default()
    }

    pub fn clear_short_term_memory(&self, agent_id: &str) -> bool {
        self.with_short_term(agent_id, Operation::ClearEvents, ShortTermMemory::clear)
            .is_ok()
    }

    pub fn short_term_info(&self, agent_id: &str) -> Option<ShortTermInfo> {
        self.with_short_term(agent_id, Operation::ReadEvents, |memory| memory.info())
            .ok()
    }
}

fn breakdown(entries: &[AccessLogEntry]) -> OperationBreakdown {
    let count = |op: Operation| entries.iter().filter(|e| e.operation == op).count();
    OperationBreakdown {
        reads: count(Operation::Read),
        writes: count(Operation::Write),
        deletes: count(Operation::Delete),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::memory::rbac::{AccessLevel, ADMIN_ROLE, GUEST_ROLE};
    use serde_json::json;

    #[test]
    fn test_register_creates_short_term_buffer() {
        let manager = MemoryManager::shared();
        assert!(manager.register_agent("a", None));
        assert!(manager.add_short_term_event("a", json!("hello")));
        assert_eq!(manager.get_recent_events("a", 5), vec![json!("hello")]);
        assert!(!manager.register_agent("a", None));
        // a failed re-registration must not wipe the buffer
        assert_eq!(manager.get_recent_events("a", 5).len(), 1);
    }

    #[test]
    fn test_failed_store_registration_has_no_buffer() {
        let manager = MemoryManager::rbac();
        assert!(!manager.register_agent("w", Some("Wizard")));
        assert!(!manager.add_short_term_event("w", json!(1)));
        assert_eq!(
            manager.get_access_log(Some("w")).last().unwrap().error_kind(),
            Some(ErrorKind::UnregisteredAgent)
        );
    }

    #[test]
    fn test_short_term_capacity_from_config() {
        let config = MemoryConfig {
            short_term_capacity: 3,
            ..MemoryConfig::default()
        };
        let manager = MemoryManager::new(&config, AuditLog::new());
        manager.register_agent("a", None);
        for event in ["a", "b", "c", "d"] {
            manager.add_short_term_event("a", json!(event));
        }
        assert_eq!(
            manager.get_recent_events("a", 3),
            vec![json!("b"), json!("c"), json!("d")]
        );
        let info = manager.short_term_info("a").unwrap();
        assert!(info.is_full);
        assert_eq!(info.capacity, 3);
    }

    #[test]
    fn test_short_term_is_independent_of_store() {
        let manager = MemoryManager::shared();
        manager.register_agent("a", None);
        manager.write("k", json!(1), "a");
        manager.add_short_term_event("a", json!("seen k"));

        manager.clear_memory();
        assert!(manager.get_memory_keys().is_empty());
        assert_eq!(manager.get_recent_events("a", 1), vec![json!("seen k")]);

        assert!(manager.clear_short_term_memory("a"));
        assert!(manager.get_recent_events("a", 1).is_empty());
        assert!(!manager.clear_short_term_memory("ghost"));
    }

    #[test]
    fn test_events_since() {
        let manager = MemoryManager::shared();
        manager.register_agent("a", None);
        let mark = manager
            .try_add_short_term_event("a", json!("before"))
            .unwrap()
            .timestamp;
        std::thread::sleep(std::time::Duration::from_millis(5));
        manager.add_short_term_event("a", json!("after"));
        assert_eq!(manager.get_events_since("a", mark), vec![json!("after")]);
        assert!(manager.get_events_since("ghost", mark).is_empty());
    }

    #[test]
    fn test_every_operation_audited_once() {
        let manager = MemoryManager::shared();
        manager.register_agent("a", None);
        let before = manager.get_access_log(None).len();
        manager.write("k", json!(1), "a");
        manager.read("k", "a");
        manager.add_short_term_event("a", json!(1));
        manager.get_recent_events("a", 1);
        manager.clear_short_term_memory("a");
        manager.get_recent_events("ghost", 1);
        manager.delete_key("k", "a");
        assert_eq!(manager.get_access_log(None).len(), before + 7);
    }

    #[test]
    fn test_memory_stats() {
        let manager = MemoryManager::shared();
        manager.register_agent("a", None);
        manager.register_agent("b", None);
        manager.write("k1", json!(1), "a");
        manager.write("k2", json!(2), "b");
        manager.read("k1", "b");
        manager.read("missing", "b");
        manager.delete_key("k2", "a");

        let stats = manager.get_memory_stats();
        assert_eq!(stats.total_keys, 1);
        assert_eq!(stats.total_agents, 2);
        assert_eq!(stats.total_operations, 5);
        assert_eq!(stats.successful_operations, 4);
        assert!((stats.success_rate - 0.8).abs() < f64::EPSILON);
        assert_eq!(
            stats.operation_breakdown,
            OperationBreakdown {
                reads: 2,
                writes: 2,
                deletes: 1
            }
        );
        assert_eq!(stats.memory_type, MemoryKind::Shared);
    }

    #[test]
    fn test_stats_ignore_hub_entries() {
        let audit = AuditLog::new();
        let manager = MemoryManager::new(&MemoryConfig::default(), audit.clone());
        audit.record("a", Operation::Send, "*", true);
        assert_eq!(manager.get_memory_stats().total_operations, 0);
        assert_eq!(manager.get_memory_stats().success_rate, 0.0);
    }

    #[test]
    fn test_memory_state() {
        let audit = AuditLog::new();
        let manager = MemoryManager::new(&MemoryConfig::default(), audit.clone());
        manager.register_agent("a", None);
        manager.register_agent("b", None);
        manager.write("plan", json!({"steps": 2}), "a");
        manager.write("plan", json!({"steps": 3}), "b");
        manager.write("notes", json!("draft"), "a");
        audit.record("a", Operation::Send, "*", true);

        let state = manager.get_memory_state();
        assert_eq!(state.agents, vec!["a", "b"]);
        assert_eq!(state.memory_type, MemoryKind::Shared);
        assert_eq!(state.access_log_count, 3);
        assert_eq!(
            state.entries.keys().cloned().collect::<Vec<_>>(),
            vec!["notes", "plan"]
        );
        let plan = &state.entries["plan"];
        assert_eq!(plan.value, json!({"steps": 3}));
        assert_eq!(plan.written_by, "b");
        assert_eq!(plan.version, 2);

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["entries"]["notes"]["value"], "draft");
        assert_eq!(json["memory_type"], "shared");
    }

    #[test]
    fn test_agent_activity() {
        let manager = MemoryManager::shared();
        manager.register_agent("a", None);
        manager.write("k", json!(1), "a");
        manager.write("k", json!(2), "a");
        manager.read("nope", "a");

        let activity = manager.get_agent_activity("a").unwrap();
        assert_eq!(activity.total_writes, 2);
        assert_eq!(activity.total_reads, 1);
        assert_eq!(activity.total_operations, 3);
        assert_eq!(activity.failed_operations, 1);
        assert!(manager.get_agent_activity("ghost").is_none());
    }

    #[test]
    fn test_rbac_manager_access_control() {
        let manager = MemoryManager::rbac();
        assert_eq!(manager.get_memory_type(), MemoryKind::Rbac);
        manager.register_agent("root", Some(ADMIN_ROLE));
        manager.register_agent("g", None);

        assert!(!manager.write("k", json!(1), "g"));
        let control = manager.access_control().unwrap();
        assert_eq!(control.agent_role("g").as_deref(), Some(GUEST_ROLE));
        assert!(control.grant_permission(GUEST_ROLE, AccessLevel::Write, "root"));
        assert!(manager.write("k", json!(1), "g"));
        assert!(MemoryManager::shared().access_control().is_none());
    }

    #[test]
    fn test_custom_roles_from_config() {
        let config = MemoryConfig {
            mode: MemoryKind::Rbac,
            default_role: "reader".to_string(),
            roles: Some(vec![crate::memory::RoleDefinition::new(
                "reader",
                [AccessLevel::Read],
            )]),
            ..MemoryConfig::default()
        };
        let manager = MemoryManager::new(&config, AuditLog::new());
        assert!(manager.register_agent("r", None));
        assert!(!manager.register_agent("x", Some(ADMIN_ROLE)));
        assert!(!manager.write("k", json!(1), "r"));
    }
}
