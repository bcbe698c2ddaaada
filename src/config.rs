//! Arena configuration.
//!
//! Selects the hub and memory variants for a session and carries their
//! policies. Loadable from YAML or JSON, with environment overrides:
//!
//! - `COLLAB_COMM_MODE`: `blackboard`, `direct` or `pubsub`
//! - `COLLAB_MEMORY_MODE`: `shared` or `rbac`
//! - `COLLAB_SHORT_TERM_CAPACITY`: per-agent short-term buffer size
//! - `COLLAB_DEFAULT_TOPIC`: topic used for drafts without one

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::communication::{CommunicationMode, EmptyTopicPolicy};
use crate::communication::pubsub::DEFAULT_TOPIC;
use crate::memory::rbac::RoleDefinition;
use crate::memory::short_term::DEFAULT_SHORT_TERM_CAPACITY;
use crate::memory::MemoryKind;

pub const ENV_COMM_MODE: &str = "COLLAB_COMM_MODE";
pub const ENV_MEMORY_MODE: &str = "COLLAB_MEMORY_MODE";
pub const ENV_SHORT_TERM_CAPACITY: &str = "COLLAB_SHORT_TERM_CAPACITY";
pub const ENV_DEFAULT_TOPIC: &str = "COLLAB_DEFAULT_TOPIC";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("unsupported config file extension: {0}")]
    UnsupportedFormat(String),
}

/// Hub selection and PubSub policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunicationConfig {
    pub mode: CommunicationMode,
    pub default_topic: String,
    pub empty_topic_policy: EmptyTopicPolicy,
}

impl Default for CommunicationConfig {
    fn default() -> Self {
        Self {
            mode: CommunicationMode::default(),
            default_topic: DEFAULT_TOPIC.to_string(),
            empty_topic_policy: EmptyTopicPolicy::default(),
        }
    }
}

/// Store selection, short-term capacity and RBAC role table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub mode: MemoryKind,
    pub short_term_capacity: usize,
    /// Role given to agents registered without one (RBAC only).
    pub default_role: String,
    /// Replaces the built-in role table when present (RBAC only).
    pub roles: Option<Vec<RoleDefinition>>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            mode: MemoryKind::default(),
            short_term_capacity: DEFAULT_SHORT_TERM_CAPACITY,
            default_role: crate::memory::rbac::GUEST_ROLE.to_string(),
            roles: None,
        }
    }
}

/// Full session configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    pub communication: CommunicationConfig,
    pub memory: MemoryConfig,
    /// Topics an agent is subscribed to on registration, keyed by role (PubSub only).
    pub role_topics: HashMap<String, Vec<String>>,
}

impl ArenaConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_yaml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.yaml`, `.yml` or `.json` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "yaml" | "yml" => Self::from_yaml_str(&source),
            "json" => Self::from_json_str(&source),
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }

    /// Apply `COLLAB_*` environment variables on top of this config.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup; `with_env_overrides` uses the process environment.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_COMM_MODE) {
            self.communication.mode = raw
                .parse()
                .map_err(|message| invalid(ENV_COMM_MODE, message))?;
        }
        if let Some(raw) = lookup(ENV_MEMORY_MODE) {
            self.memory.mode = raw
                .parse()
                .map_err(|message| invalid(ENV_MEMORY_MODE, message))?;
        }
        if let Some(raw) = lookup(ENV_SHORT_TERM_CAPACITY) {
            self.memory.short_term_capacity = raw.trim().parse().map_err(|e| {
                invalid(ENV_SHORT_TERM_CAPACITY, format!("{}", e))
            })?;
        }
        if let Some(raw) = lookup(ENV_DEFAULT_TOPIC) {
            self.communication.default_topic = raw.trim().to_string();
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory.short_term_capacity == 0 {
            return Err(invalid(
                "memory.short_term_capacity",
                "must be at least 1".to_string(),
            ));
        }
        if self.communication.default_topic.trim().is_empty() {
            return Err(invalid(
                "communication.default_topic",
                "must not be empty".to_string(),
            ));
        }
        if self.memory.mode == MemoryKind::Rbac {
            let known = match &self.memory.roles {
                Some(roles) => roles.iter().any(|r| r.name == self.memory.default_role),
                None => crate::memory::rbac::default_roles()
                    .iter()
                    .any(|r| r.name == self.memory.default_role),
            };
            if !known {
                return Err(invalid(
                    "memory.default_role",
                    format!("role '{}' is not defined", self.memory.default_role),
                ));
            }
        }
        Ok(())
    }
}

fn invalid(key: &str, message: String) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message,
    }
}
