//! Agent communication substrate.
//!
//! Three interchangeable hubs share one contract, [`CommunicationHub`]:
//!
//! - [`Blackboard`]: one shared, append-only log every agent can read.
//! - [`DirectMailbox`]: per-agent FIFO queues with direct, multicast and
//!   broadcast delivery; receiving drains the queue.
//! - [`PubSubHub`]: topic fan-out to the current subscriber set, never back
//!   to the sender; receiving drains the queue.
//!
//! Callers hold an `Arc<dyn CommunicationHub>` from [`create_hub`] and never
//! depend on the concrete variant. Each hub guards its whole state with a
//! single mutex, so routing decisions and deliveries are atomic.

pub mod blackboard;
pub mod mailbox;
pub mod pubsub;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audit::{AuditLog, Operation};
use crate::config::CommunicationConfig;
use crate::errors::{Result, SubstrateError};
use crate::message::{Message, MessageDraft};

pub use blackboard::Blackboard;
pub use mailbox::DirectMailbox;
pub use pubsub::{EmptyTopicPolicy, PubSubHub};

/// Transcript returned when a hub holds no messages.
pub const NO_HISTORY: &str = "No previous messages.";

/// Which hub variant is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommunicationMode {
    #[default]
    Blackboard,
    Direct,
    PubSub,
}

impl CommunicationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blackboard => "blackboard",
            Self::Direct => "direct",
            Self::PubSub => "pubsub",
        }
    }

    pub fn all() -> [CommunicationMode; 3] {
        [Self::Blackboard, Self::Direct, Self::PubSub]
    }
}

impl fmt::Display for CommunicationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommunicationMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "blackboard" => Ok(Self::Blackboard),
            "direct" | "mailbox" => Ok(Self::Direct),
            "pubsub" | "pub_sub" | "pub-sub" => Ok(Self::PubSub),
            other => Err(format!("unknown communication mode: {}", other)),
        }
    }
}

/// Uniform contract of all hub variants.
///
/// `try_*` methods return the failure reason; the plain methods map it to
/// `false` / `None` / an empty list. Either way, every call lands in the
/// hub's audit log exactly once.
pub trait CommunicationHub: Send + Sync + fmt::Debug {
    fn mode(&self) -> CommunicationMode;

    fn audit_log(&self) -> &AuditLog;

    /// Register an agent. Fails with `AlreadyRegistered` on a second call.
    fn try_register(&self, agent_id: &str) -> Result<()>;

    fn register(&self, agent_id: &str) -> bool {
        self.try_register(agent_id).is_ok()
    }

    /// Remove an agent together with its queue and subscriptions.
    fn try_unregister(&self, agent_id: &str) -> Result<()>;

    fn unregister(&self, agent_id: &str) -> bool {
        self.try_unregister(agent_id).is_ok()
    }

    fn is_registered(&self, agent_id: &str) -> bool;

    /// Registered agent ids, in registration order.
    fn registered_agents(&self) -> Vec<String>;

    /// Route a draft and return the stamped message.
    fn try_send(&self, draft: MessageDraft) -> Result<Message>;

    /// Route a draft and return the new message id.
    fn send(&self, draft: MessageDraft) -> Option<String> {
        self.try_send(draft).ok().map(|m| m.id().to_string())
    }

    /// Post without an explicit recipient or topic.
    fn post(&self, sender_id: &str, sender_role: &str, content: Value) -> Option<String> {
        self.send(MessageDraft::new(sender_id, sender_role, content))
    }

    fn try_receive(&self, agent_id: &str) -> Result<Vec<Message>>;

    fn receive(&self, agent_id: &str) -> Vec<Message> {
        self.try_receive(agent_id).unwrap_or_default()
    }

    /// Look at what `receive` would return without consuming it.
    fn peek(&self, agent_id: &str) -> Vec<Message>;

    fn try_subscribe(&self, agent_id: &str, topic: &str) -> Result<()> {
        let err = SubstrateError::unsupported("subscribe", self.mode());
        self.audit_log()
            .record_failure(agent_id, Operation::Subscribe, topic, &err);
        Err(err)
    }

    fn subscribe(&self, agent_id: &str, topic: &str) -> bool {
        self.try_subscribe(agent_id, topic).is_ok()
    }

    fn try_unsubscribe(&self, agent_id: &str, topic: &str) -> Result<()> {
        let err = SubstrateError::unsupported("unsubscribe", self.mode());
        self.audit_log()
            .record_failure(agent_id, Operation::Unsubscribe, topic, &err);
        Err(err)
    }

    fn unsubscribe(&self, agent_id: &str, topic: &str) -> bool {
        self.try_unsubscribe(agent_id, topic).is_ok()
    }

    /// Every message sent this session, in send order.
    fn all_messages(&self) -> Vec<Message>;

    fn message_count(&self) -> usize {
        self.all_messages().len()
    }

    /// Chronological, human-readable transcript of the session.
    fn get_conversation_history(&self) -> String;

    /// Drop all messages and reset the send counter. Registrations survive.
    fn clear(&self);
}

/// Build the hub variant selected by `config`, writing to `audit`.
pub fn create_hub(config: &CommunicationConfig, audit: AuditLog) -> Arc<dyn CommunicationHub> {
    log::debug!("[create_hub] building {} hub", config.mode);
    match config.mode {
        CommunicationMode::Blackboard => Arc::new(Blackboard::new(audit)),
        CommunicationMode::Direct => Arc::new(DirectMailbox::new(audit)),
        CommunicationMode::PubSub => Arc::new(PubSubHub::with_options(
            audit,
            config.default_topic.clone(),
            config.empty_topic_policy,
        )),
    }
}

/// Render a transcript; `header` produces the text after the timestamp.
pub(crate) fn render_history<F>(messages: &[Message], mut header: F) -> String
where
    F: FnMut(&Message) -> String,
{
    if messages.is_empty() {
        return NO_HISTORY.to_string();
    }
    let mut history = String::from("=== CONVERSATION HISTORY ===\n");
    for msg in messages {
        history.push_str(&format!(
            "[{}] {}:\n{}\n\n",
            msg.timestamp().format("%H:%M:%S"),
            header(msg),
            msg.content_text()
        ));
    }
    history
}

/// Audit target describing where a draft is headed.
pub(crate) fn draft_target(draft: &MessageDraft) -> String {
    if let Some(recipient) = &draft.recipient_id {
        recipient.clone()
    } else if !draft.recipient_ids.is_empty() {
        draft.recipient_ids.join(",")
    } else if let Some(topic) = &draft.topic {
        topic.clone()
    } else {
        "*".to_string()
    }
}
