//! Shared memory: open read/write for every registered agent.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde_json::Value;

use crate::audit::{AuditLog, Operation};
use crate::errors::{Result, SubstrateError};

use super::entry::{EntryTable, MemoryEntry, MemoryInfo};
use super::{MemoryKind, MemoryStore};

#[derive(Debug, Default)]
struct SharedState {
    agents: Vec<String>,
    table: EntryTable,
}

impl SharedState {
    fn ensure_registered(&self, agent_id: &str) -> Result<()> {
        if self.agents.iter().any(|a| a == agent_id) {
            Ok(())
        } else {
            Err(SubstrateError::unregistered(agent_id))
        }
    }
}

/// Key-value space with equal access for all registered agents.
#[derive(Debug)]
pub struct SharedMemory {
    state: Mutex<SharedState>,
    audit: AuditLog,
}

impl Default for SharedMemory {
    fn default() -> Self {
        Self::new(AuditLog::new())
    }
}

impl SharedMemory {
    pub fn new(audit: AuditLog) -> Self {
        Self {
            state: Mutex::new(SharedState::default()),
            audit,
        }
    }
}

impl MemoryStore for SharedMemory {
    fn kind(&self) -> MemoryKind {
        MemoryKind::Shared
    }

    fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    fn try_register_agent(&self, agent_id: &str, _role: Option<&str>) -> Result<()> {
        let result = {
            let mut state = self.state.lock();
            if state.ensure_registered(agent_id).is_ok() {
                Err(SubstrateError::AlreadyRegistered {
                    agent_id: agent_id.to_string(),
                })
            } else {
                state.agents.push(agent_id.to_string());
                log::info!("[SharedMemory] registered agent '{}'", agent_id);
                Ok(())
            }
        };
        self.audit
            .record_result(agent_id, Operation::Register, agent_id, result)
    }

    fn is_registered(&self, agent_id: &str) -> bool {
        self.state.lock().ensure_registered(agent_id).is_ok()
    }

    fn registered_agents(&self) -> Vec<String> {
        self.state.lock().agents.clone()
    }

    fn try_read(&self, key: &str, agent_id: &str) -> Result<MemoryEntry> {
        let result = {
            let state = self.state.lock();
            state.ensure_registered(agent_id).and_then(|()| {
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
                .ensure_registered(agent_id)
                .map(|()| state.table.put(key, value, agent_id, false))
        };
        if let Ok(entry) = &result {
            log::debug!(
                "[SharedMemory] '{}' wrote '{}' (version {})",
                agent_id,
                key,
                entry.version
            );
        }
        self.audit
            .record_result(agent_id, Operation::Write, key, result)
    }

    fn try_delete(&self, key: &str, agent_id: &str) -> Result<MemoryEntry> {
        let result = {
            let mut state = self.state.lock();
            state.ensure_registered(agent_id).and_then(|()| {
                state
                    .table
                    .remove(key)
                    .ok_or_else(|| SubstrateError::key_not_found(key))
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

    fn visible_keys(&self, agent_id: &str) -> Vec<String> {
        let state = self.state.lock();
        match state.ensure_registered(agent_id) {
            Ok(()) => state.table.keys(),
            Err(_) => Vec::new(),
        }
    }

    fn entry_info(&self, key: &str, agent_id: &str) -> Option<MemoryInfo> {
        let state = self.state.lock();
        state.ensure_registered(agent_id).ok()?;
        state.table.get(key).map(MemoryInfo::from)
    }

    fn len(&self) -> usize {
        self.state.lock().table.len()
    }

    fn clear_memory(&self) {
        self.state.lock().table.clear();
        log::info!("[SharedMemory] cleared all entries");
        self.audit
            .record("system", Operation::ClearMemory, "shared", true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use serde_json::json;

    fn memory_with(agents: &[&str]) -> SharedMemory {
        let memory = SharedMemory::default();
        for agent in agents {
            assert!(memory.register_agent(agent, None));
        }
        memory
    }

    #[test]
    fn test_round_trip_between_agents() {
        let memory = memory_with(&["writer", "reader"]);
        let value = json!({"plan": ["research", "draft"], "score": 0.8});
        assert!(memory.write("plan", value.clone(), "writer"));

        let entry = memory.read("plan", "reader").unwrap();
        assert_eq!(entry.value, value);
        assert_eq!(entry.written_by, "writer");
        assert_eq!(entry.version, 1);
        assert!(!entry.protected);
        assert_eq!(memory.get_value("plan", "reader"), Some(value));
    }

    #[test]
    fn test_versions_across_writers() {
        let memory = memory_with(&["a", "b"]);
        let versions: Vec<u64> = ["a", "b", "a", "b"]
            .iter()
            .enumerate()
            .map(|(i, agent)| memory.try_write("k", json!(i), agent).unwrap().version)
            .collect();
        assert_eq!(versions, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_unregistered_agent_fails_everything() {
        let memory = memory_with(&["a"]);
        memory.write("k", json!(1), "a");

        assert!(!memory.write("k", json!(2), "ghost"));
        assert!(memory.read("k", "ghost").is_none());
        assert!(!memory.delete_key("k", "ghost"));
        assert!(memory.visible_keys("ghost").is_empty());

        let failures = memory.audit_log().query(Some("ghost"));
        assert_eq!(failures.len(), 3);
        assert!(failures
            .iter()
            .all(|e| !e.success && e.error_kind() == Some(ErrorKind::UnregisteredAgent)));
        assert_eq!(memory.read("k", "a").unwrap().version, 1);
    }

    #[test]
    fn test_missing_key() {
        let memory = memory_with(&["a"]);
        let err = memory.try_read("nope", "a").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyNotFound);
        assert!(!memory.delete_key("nope", "a"));
        assert_eq!(
            memory.audit_log().last().unwrap().error_kind(),
            Some(ErrorKind::KeyNotFound)
        );
    }

    #[test]
    fn test_delete_then_rewrite_continues_version() {
        let memory = memory_with(&["a"]);
        memory.write("k", json!(1), "a");
        let removed = memory.try_delete("k", "a").unwrap();
        assert_eq!(removed.version, 1);
        assert!(memory.read("k", "a").is_none());
        assert_eq!(memory.try_write("k", json!(2), "a").unwrap().version, 2);
    }

    #[test]
    fn test_each_operation_logged_once() {
        let memory = memory_with(&["a"]);
        let before = memory.audit_log().len();
        memory.write("k", json!(1), "a");
        memory.read("k", "a");
        memory.read("missing", "a");
        memory.delete_key("k", "a");
        assert_eq!(memory.audit_log().len(), before + 4);
    }

    #[test]
    fn test_clear_memory_keeps_agents() {
        let memory = memory_with(&["a"]);
        memory.write("k", json!(1), "a");
        memory.write("k", json!(2), "a");
        memory.clear_memory();
        assert!(memory.is_empty());
        assert!(memory.is_registered("a"));
        assert_eq!(memory.try_write("k", json!(3), "a").unwrap().version, 1);
    }

    #[test]
    fn test_entry_info() {
        let memory = memory_with(&["a"]);
        memory.write("k", json!("secret sauce"), "a");
        let info = memory.entry_info("k", "a").unwrap();
        assert_eq!(info.written_by, "a");
        assert!(memory.entry_info("k", "ghost").is_none());
        assert!(memory.entry_info("nope", "a").is_none());
    }

    #[test]
    fn test_concurrent_writers_get_gapless_versions() {
        use std::sync::Arc;
        use std::thread;

        let memory = Arc::new(memory_with(&["w0", "w1", "w2", "w3"]));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let memory = Arc::clone(&memory);
                thread::spawn(move || {
                    let agent = format!("w{}", t);
                    (0..50)
                        .map(|i| memory.try_write("counter", json!(i), &agent).unwrap().version)
                        .collect::<Vec<u64>>()
                })
            })
            .collect();

        let mut versions: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        versions.sort_unstable();
        assert_eq!(versions, (1..=200).collect::<Vec<u64>>());
    }
}
