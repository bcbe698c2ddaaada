//! # CollabArena
//!
//! Communication and memory substrate for multi-agent collaboration.
//!
//! Agents exchange [`Message`]s through a [`CommunicationHub`] (blackboard,
//! direct mailboxes or publish/subscribe topics) and share state through a
//! [`MemoryManager`] (open shared memory or role-gated RBAC memory, plus a
//! bounded short-term event buffer per agent). Every operation, successful or
//! not, lands in an [`AuditLog`].
//!
//! ```
//! use collabarena::{ArenaConfig, CollabSession};
//! use serde_json::json;
//!
//! let session = CollabSession::new(ArenaConfig::default()).unwrap();
//! session.register_agent("planner", "Team Coordinator").unwrap();
//! session.register_agent("coder", "Solution Implementer").unwrap();
//!
//! session.hub().post("planner", "Team Coordinator", json!("split the work"));
//! assert_eq!(session.hub().receive("coder").len(), 1);
//!
//! assert!(session.memory().write("plan", json!(["parse", "emit"]), "planner"));
//! assert_eq!(session.memory().read("plan", "coder").unwrap().version, 1);
//! ```

pub mod audit;
pub mod communication;
pub mod config;
pub mod errors;
pub mod memory;
pub mod message;
pub mod session;

pub use audit::{AccessLogEntry, AuditLog, Operation};
pub use communication::{
    create_hub, Blackboard, CommunicationHub, CommunicationMode, DirectMailbox,
    EmptyTopicPolicy, PubSubHub,
};
pub use config::{ArenaConfig, CommunicationConfig, ConfigError, MemoryConfig};
pub use errors::{ErrorKind, Result, SubstrateError};
pub use memory::{
    AccessControl, AccessLevel, MemoryEntry, MemoryKind, MemoryManager, MemoryState, MemoryStore,
    RbacMemory, SharedMemory, ShortTermMemory,
};
pub use message::{Message, MessageDraft};
pub use session::{AgentIdentity, CollabSession};
