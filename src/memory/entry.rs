//! Versioned memory entries.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A value together with its write provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub key: String,
    pub value: Value,
    pub written_by: String,
    pub timestamp: DateTime<Utc>,
    /// 1 on first write, +1 on every later write to the same key.
    pub version: u64,
    /// Always false in shared memory.
    #[serde(default)]
    pub protected: bool,
}

/// Entry metadata without the value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryInfo {
    pub key: String,
    pub written_by: String,
    pub timestamp: DateTime<Utc>,
    pub version: u64,
    pub protected: bool,
}

impl From<&MemoryEntry> for MemoryInfo {
    fn from(entry: &MemoryEntry) -> Self {
        Self {
            key: entry.key.clone(),
            written_by: entry.written_by.clone(),
            timestamp: entry.timestamp,
            version: entry.version,
            protected: entry.protected,
        }
    }
}

/// Key space plus per-key version counters.
///
/// Counters outlive deletes: re-creating a deleted key continues from the
/// last version handed out. Only [`EntryTable::clear`] resets them.
#[derive(Debug, Default)]
pub(crate) struct EntryTable {
    entries: BTreeMap<String, MemoryEntry>,
    versions: HashMap<String, u64>,
}

impl EntryTable {
    /// Bump the key's version and store the new entry.
    pub(crate) fn put(
        &mut self,
        key: &str,
        value: Value,
        written_by: &str,
        protected: bool,
    ) -> MemoryEntry {
        let counter = self.versions.entry(key.to_string()).or_insert(0);
        *counter += 1;
        let entry = MemoryEntry {
            key: key.to_string(),
            value,
            written_by: written_by.to_string(),
            timestamp: Utc::now(),
            version: *counter,
            protected,
        };
        self.entries.insert(key.to_string(), entry.clone());
        entry
    }

    pub(crate) fn get(&self, key: &str) -> Option<&MemoryEntry> {
        self.entries.get(key)
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<MemoryEntry> {
        self.entries.remove(key)
    }

    pub(crate) fn set_protected(&mut self, key: &str, protected: bool) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.protected = protected;
        }
    }

    pub(crate) fn entries(&self) -> BTreeMap<String, MemoryEntry> {
        self.entries.clone()
    }

    pub(crate) fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.versions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_versions_increase_per_key() {
        let mut table = EntryTable::default();
        assert_eq!(table.put("a", json!(1), "w1", false).version, 1);
        assert_eq!(table.put("a", json!(2), "w2", false).version, 2);
        assert_eq!(table.put("b", json!(3), "w1", false).version, 1);
        let a = table.get("a").unwrap();
        assert_eq!(a.written_by, "w2");
        assert_eq!(a.value, json!(2));
    }

    #[test]
    fn test_version_survives_delete() {
        let mut table = EntryTable::default();
        table.put("k", json!("x"), "w", false);
        table.put("k", json!("y"), "w", false);
        assert!(table.remove("k").is_some());
        assert!(table.get("k").is_none());
        assert_eq!(table.put("k", json!("z"), "w", false).version, 3);
    }

    #[test]
    fn test_clear_resets_versions() {
        let mut table = EntryTable::default();
        table.put("k", json!(1), "w", false);
        table.clear();
        assert_eq!(table.len(), 0);
        assert_eq!(table.put("k", json!(1), "w", false).version, 1);
    }

    #[test]
    fn test_keys_are_sorted() {
        let mut table = EntryTable::default();
        for key in ["zeta", "alpha", "mu"] {
            table.put(key, json!(null), "w", false);
        }
        assert_eq!(table.keys(), vec!["alpha", "mu", "zeta"]);
    }

    #[test]
    fn test_info_from_entry() {
        let mut table = EntryTable::default();
        let entry = table.put("k", json!({"deep": [1, 2]}), "w", true);
        let info = MemoryInfo::from(&entry);
        assert_eq!(info.version, 1);
        assert!(info.protected);
    }
}
