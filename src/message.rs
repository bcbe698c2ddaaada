//! Messages exchanged between agents.
//!
//! Callers build a [`MessageDraft`]; the hub stamps it with a unique id, a
//! send sequence and a timestamp, producing an immutable [`Message`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default `message_type` for drafts that do not set one.
pub const DEFAULT_MESSAGE_TYPE: &str = "response";

/// An unsent message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDraft {
    pub sender_id: String,
    pub sender_role: String,
    pub content: Value,
    pub recipient_id: Option<String>,
    pub recipient_ids: Vec<String>,
    pub topic: Option<String>,
    pub message_type: String,
    pub metadata: HashMap<String, Value>,
}

impl MessageDraft {
    pub fn new(
        sender_id: impl Into<String>,
        sender_role: impl Into<String>,
        content: impl Into<Value>,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            sender_role: sender_role.into(),
            content: content.into(),
            recipient_id: None,
            recipient_ids: Vec::new(),
            topic: None,
            message_type: DEFAULT_MESSAGE_TYPE.to_string(),
            metadata: HashMap::new(),
        }
    }

    /// Address the message to a single agent.
    pub fn to(mut self, recipient_id: impl Into<String>) -> Self {
        self.recipient_id = Some(recipient_id.into());
        self
    }

    /// Address the message to several agents at once.
    pub fn to_many<I, S>(mut self, recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.recipient_ids = recipients.into_iter().map(Into::into).collect();
        self
    }

    pub fn on_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = message_type.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// How a sent message was addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing<'a> {
    Direct(&'a str),
    Multicast(&'a [String]),
    Topic(&'a str),
    Broadcast,
}

/// An immutable, sent message.
///
/// Fields are read through accessors; the hub hands out clones, so nothing a
/// receiver does can alter the hub's record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: String,
    sequence: u64,
    sender_id: String,
    sender_role: String,
    content: Value,
    recipient_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    recipient_ids: Vec<String>,
    topic: Option<String>,
    message_type: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    metadata: HashMap<String, Value>,
}

impl Message {
    /// Stamp a draft. `sequence` is the hub's send counter.
    pub(crate) fn from_draft(draft: MessageDraft, sequence: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sequence,
            sender_id: draft.sender_id,
            sender_role: draft.sender_role,
            content: draft.content,
            recipient_id: draft.recipient_id,
            recipient_ids: draft.recipient_ids,
            topic: draft.topic,
            message_type: draft.message_type,
            timestamp: Utc::now(),
            metadata: draft.metadata,
        }
    }

    /// Same message, with the topic resolved to the hub's default.
    pub(crate) fn with_resolved_topic(draft: MessageDraft, topic: &str, sequence: u64) -> Self {
        let mut message = Self::from_draft(draft, sequence);
        message.topic = Some(topic.to_string());
        message
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    pub fn sender_role(&self) -> &str {
        &self.sender_role
    }

    pub fn content(&self) -> &Value {
        &self.content
    }

    /// Content rendered as text: strings verbatim, anything else as JSON.
    pub fn content_text(&self) -> String {
        match &self.content {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    pub fn recipient_id(&self) -> Option<&str> {
        self.recipient_id.as_deref()
    }

    pub fn recipient_ids(&self) -> &[String] {
        &self.recipient_ids
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn metadata(&self) -> &HashMap<String, Value> {
        &self.metadata
    }

    pub fn addressing(&self) -> Addressing<'_> {
        if let Some(recipient) = self.recipient_id.as_deref() {
            Addressing::Direct(recipient)
        } else if !self.recipient_ids.is_empty() {
            Addressing::Multicast(&self.recipient_ids)
        } else if let Some(topic) = self.topic.as_deref() {
            Addressing::Topic(topic)
        } else {
            Addressing::Broadcast
        }
    }
}
