//! Collaboration session.
//!
//! A [`CollabSession`] owns one hub, one memory manager and the audit log
//! they share, and keeps a registry of the agents taking part. Registering
//! through the session puts the agent in both subsystems and, for PubSub
//! hubs, subscribes it to the topics configured for its role.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};

use crate::audit::AuditLog;
use crate::communication::{create_hub, CommunicationHub, CommunicationMode};
use crate::config::{ArenaConfig, ConfigError};
use crate::errors::{Result, SubstrateError};
use crate::memory::MemoryManager;
use crate::message::MessageDraft;

/// An agent taking part in a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentIdentity {
    pub agent_id: String,
    /// Current role. With RBAC memory this follows role changes made
    /// through the store's access control.
    pub role: String,
    pub registered_at: DateTime<Utc>,
    /// Topics joined on registration. Empty unless the hub is PubSub.
    pub topics: Vec<String>,
}

/// One hub, one memory manager, one audit log.
pub struct CollabSession {
    hub: Arc<dyn CommunicationHub>,
    memory: MemoryManager,
    audit: AuditLog,
    role_topics: HashMap<String, Vec<String>>,
    identities: RwLock<Vec<AgentIdentity>>,
}

impl std::fmt::Debug for CollabSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollabSession")
            .field("mode", &self.hub.mode())
            .field("memory_type", &self.memory.get_memory_type())
            .field("agents", &self.identities.read().len())
            .finish()
    }
}

impl Default for CollabSession {
    fn default() -> Self {
        Self::build(ArenaConfig::default())
    }
}

impl CollabSession {
    /// Validate `config` and build the hub and memory it selects.
    pub fn new(config: ArenaConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    /// Default configuration with `COLLAB_*` environment overrides applied.
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        Self::new(ArenaConfig::default().with_env_overrides()?)
    }

    fn build(config: ArenaConfig) -> Self {
        let audit = AuditLog::new();
        let hub = create_hub(&config.communication, audit.clone());
        let memory = MemoryManager::new(&config.memory, audit.clone());
        log::info!(
            "[CollabSession] started with {} hub and {} memory",
            hub.mode(),
            memory.get_memory_type()
        );
        Self {
            hub,
            memory,
            audit,
            role_topics: config.role_topics,
            identities: RwLock::new(Vec::new()),
        }
    }

    pub fn hub(&self) -> &Arc<dyn CommunicationHub> {
        &self.hub
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// Register an agent with the hub and the memory manager.
    ///
    /// If memory rejects the agent (for example an unknown RBAC role) the
    /// hub registration is rolled back, so the agent ends up in neither.
    pub fn register_agent(&self, agent_id: &str, role: &str) -> Result<AgentIdentity> {
        self.hub.try_register(agent_id)?;
        if let Err(err) = self.memory.try_register_agent(agent_id, Some(role)) {
            log::warn!(
                "[CollabSession] memory rejected '{}' ({}), rolling back hub registration",
                agent_id,
                err
            );
            self.hub.unregister(agent_id);
            return Err(err);
        }

        let mut topics = Vec::new();
        if self.hub.mode() == CommunicationMode::PubSub {
            for topic in self.role_topics.get(role).into_iter().flatten() {
                if self.hub.subscribe(agent_id, topic) {
                    topics.push(topic.clone());
                }
            }
        }

        let identity = AgentIdentity {
            agent_id: agent_id.to_string(),
            role: role.to_string(),
            registered_at: Utc::now(),
            topics,
        };
        log::info!(
            "[CollabSession] '{}' joined as '{}' (topics: {:?})",
            agent_id,
            role,
            identity.topics
        );
        self.identities.write().push(identity.clone());
        Ok(identity)
    }

    /// The identity with its role refreshed from the memory store.
    fn resolve(&self, identity: &AgentIdentity) -> AgentIdentity {
        let mut identity = identity.clone();
        if let Some(role) = self
            .memory
            .access_control()
            .and_then(|control| control.agent_role(&identity.agent_id))
        {
            identity.role = role;
        }
        identity
    }

    pub fn agent(&self, agent_id: &str) -> Option<AgentIdentity> {
        self.identities
            .read()
            .iter()
            .find(|identity| identity.agent_id == agent_id)
            .map(|identity| self.resolve(identity))
    }

    /// Agents in registration order.
    pub fn agents(&self) -> Vec<AgentIdentity> {
        self.identities
            .read()
            .iter()
            .map(|identity| self.resolve(identity))
            .collect()
    }

    pub fn agents_with_role(&self, role: &str) -> Vec<String> {
        self.agents()
            .into_iter()
            .filter(|identity| identity.role == role)
            .map(|identity| identity.agent_id)
            .collect()
    }

    /// Start a draft with the sender's current role filled in.
    pub fn draft(&self, agent_id: &str, content: impl Into<Value>) -> Result<MessageDraft> {
        let identity = self
            .agent(agent_id)
            .ok_or_else(|| SubstrateError::unregistered(agent_id))?;
        Ok(MessageDraft::new(agent_id, identity.role, content))
    }

    /// Drop messages, memory entries and every agent's short-term events.
    /// Registrations and the audit log survive.
    pub fn reset(&self) {
        self.hub.clear();
        self.memory.clear_memory();
        for identity in self.identities.read().iter() {
            self.memory.clear_short_term_memory(&identity.agent_id);
        }
        log::info!("[CollabSession] reset");
    }

    /// JSON summary of the session, audit trail included.
    pub fn snapshot(&self) -> Value {
        json!({
            "communication_mode": self.hub.mode(),
            "memory_type": self.memory.get_memory_type(),
            "agents": self.agents(),
            "message_count": self.hub.message_count(),
            "memory_keys": self.memory.get_memory_keys(),
            "access_log": self.audit.snapshot(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CommunicationConfig, MemoryConfig};
    use crate::errors::ErrorKind;
    use crate::memory::rbac::{ADMIN_ROLE, ANALYST_ROLE, GUEST_ROLE};
    use crate::memory::MemoryKind;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn session(mode: CommunicationMode, memory: MemoryKind) -> CollabSession {
        init_logging();
        let mut role_topics = HashMap::new();
        role_topics.insert(
            ANALYST_ROLE.to_string(),
            vec!["analysis".to_string(), "general".to_string()],
        );
        role_topics.insert(ADMIN_ROLE.to_string(), vec!["general".to_string()]);
        CollabSession::new(ArenaConfig {
            communication: CommunicationConfig {
                mode,
                ..CommunicationConfig::default()
            },
            memory: MemoryConfig {
                mode: memory,
                ..MemoryConfig::default()
            },
            role_topics,
        })
        .unwrap()
    }

    #[test]
    fn test_register_reaches_hub_and_memory() {
        let session = session(CommunicationMode::Blackboard, MemoryKind::Shared);
        let identity = session.register_agent("alpha", ANALYST_ROLE).unwrap();
        assert!(identity.topics.is_empty());
        assert!(session.hub().is_registered("alpha"));
        assert!(session.memory().is_registered("alpha"));
        assert!(session.memory().add_short_term_event("alpha", json!("ready")));

        let err = session.register_agent("alpha", ANALYST_ROLE).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyRegistered);
        assert_eq!(session.agents().len(), 1);
    }

    #[test]
    fn test_role_topics_in_pubsub_mode() {
        let session = session(CommunicationMode::PubSub, MemoryKind::Shared);
        let analyst = session.register_agent("a", ANALYST_ROLE).unwrap();
        assert_eq!(analyst.topics, vec!["analysis", "general"]);
        session.register_agent("root", ADMIN_ROLE).unwrap();

        let draft = session.draft("root", "status?").unwrap().on_topic("general");
        assert!(session.hub().send(draft).is_some());
        let inbox = session.hub().receive("a");
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].sender_role(), ADMIN_ROLE);
        assert!(session.hub().receive("root").is_empty());
    }

    #[test]
    fn test_memory_rejection_rolls_back_hub() {
        let session = session(CommunicationMode::Direct, MemoryKind::Rbac);
        let err = session.register_agent("x", "Wizard").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownRole);
        assert!(!session.hub().is_registered("x"));
        assert!(session.agent("x").is_none());
        assert!(session.register_agent("x", GUEST_ROLE).is_ok());
    }

    #[test]
    fn test_shared_audit_log() {
        let session = session(CommunicationMode::Blackboard, MemoryKind::Rbac);
        session.register_agent("root", ADMIN_ROLE).unwrap();
        session.hub().post("root", ADMIN_ROLE, json!("hello"));
        session.memory().write("plan", json!([1, 2]), "root");

        let ops: Vec<_> = session
            .audit_log()
            .query(Some("root"))
            .iter()
            .map(|e| e.operation)
            .collect();
        assert_eq!(ops.len(), 4);
        assert_eq!(session.memory().get_memory_stats().total_operations, 1);
    }

    #[test]
    fn test_role_change_reaches_identity() {
        let session = session(CommunicationMode::Blackboard, MemoryKind::Rbac);
        session.register_agent("root", ADMIN_ROLE).unwrap();
        session.register_agent("g", GUEST_ROLE).unwrap();

        let control = session.memory().access_control().unwrap();
        assert!(control.set_agent_role("g", ANALYST_ROLE, "root"));

        assert_eq!(session.agent("g").unwrap().role, ANALYST_ROLE);
        assert_eq!(session.agents_with_role(ANALYST_ROLE), vec!["g"]);
        assert!(session.agents_with_role(GUEST_ROLE).is_empty());
        let draft = session.draft("g", "promoted").unwrap();
        assert_eq!(draft.sender_role, ANALYST_ROLE);
    }

    #[test]
    fn test_draft_requires_registration() {
        let session = session(CommunicationMode::Blackboard, MemoryKind::Shared);
        let err = session.draft("ghost", "hi").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnregisteredAgent);
    }

    #[test]
    fn test_reset_keeps_agents() {
        let session = session(CommunicationMode::Blackboard, MemoryKind::Shared);
        session.register_agent("a", ANALYST_ROLE).unwrap();
        session.hub().post("a", ANALYST_ROLE, json!("note"));
        session.memory().write("k", json!(1), "a");
        session.memory().add_short_term_event("a", json!("e"));

        session.reset();
        assert_eq!(session.hub().message_count(), 0);
        assert!(session.memory().get_memory_keys().is_empty());
        assert!(session.memory().get_recent_events("a", 10).is_empty());
        assert!(session.hub().is_registered("a"));
        assert_eq!(session.agents_with_role(ANALYST_ROLE), vec!["a"]);
    }

    #[test]
    fn test_snapshot() {
        let session = session(CommunicationMode::Direct, MemoryKind::Shared);
        session.register_agent("a", ANALYST_ROLE).unwrap();
        session.memory().write("k", json!(1), "a");
        let snapshot = session.snapshot();
        assert_eq!(snapshot["communication_mode"], "direct");
        assert_eq!(snapshot["memory_type"], "shared");
        assert_eq!(snapshot["memory_keys"], json!(["k"]));
        assert_eq!(snapshot["agents"][0]["role"], ANALYST_ROLE);
        assert!(snapshot["access_log"].as_array().unwrap().len() >= 3);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = ArenaConfig::default();
        config.memory.short_term_capacity = 0;
        assert!(CollabSession::new(config).is_err());
    }
}
