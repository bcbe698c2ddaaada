//! Publish/subscribe hub: topic fan-out into per-agent queues.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audit::{AuditLog, Operation};
use crate::errors::{Result, SubstrateError};
use crate::message::{Message, MessageDraft};

use super::{render_history, CommunicationHub, CommunicationMode};

/// Topic used when a draft names none.
pub const DEFAULT_TOPIC: &str = "default";

/// Audit identity for topic administration that no agent initiated.
pub const SYSTEM_AGENT: &str = "system";

/// What happens to a topic when its last subscriber leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyTopicPolicy {
    /// Forget the topic.
    #[default]
    Remove,
    /// Keep the topic around with no subscribers.
    Retain,
}

#[derive(Debug, Default)]
struct PubSubState {
    agents: Vec<String>,
    queues: HashMap<String, VecDeque<Message>>,
    topics: BTreeMap<String, BTreeSet<String>>,
    subscriptions: HashMap<String, BTreeSet<String>>,
    all_messages: Vec<Message>,
    /// Recipients of each published message, keyed by message id.
    deliveries: HashMap<String, Vec<String>>,
    message_counter: u64,
}

impl PubSubState {
    fn is_registered(&self, agent_id: &str) -> bool {
        self.queues.contains_key(agent_id)
    }

    fn ensure_registered(&self, agent_id: &str) -> Result<()> {
        if self.is_registered(agent_id) {
            Ok(())
        } else {
            Err(SubstrateError::unregistered(agent_id))
        }
    }

    /// Remove one subscription, applying the empty-topic policy.
    fn detach(&mut self, agent_id: &str, topic: &str, policy: EmptyTopicPolicy) -> bool {
        let removed = match self.topics.get_mut(topic) {
            Some(members) => members.remove(agent_id),
            None => false,
        };
        if removed
            && policy == EmptyTopicPolicy::Remove
            && self.topics.get(topic).map_or(false, |m| m.is_empty())
        {
            self.topics.remove(topic);
            log::info!("[PubSubHub] topic '{}' removed after last subscriber left", topic);
        }
        if let Some(subs) = self.subscriptions.get_mut(agent_id) {
            subs.remove(topic);
        }
        removed
    }

    /// Deliver to the subscriber snapshot of `topic`, skipping the sender.
    fn publish(&mut self, draft: MessageDraft, topic: &str) -> Result<Message> {
        self.ensure_registered(&draft.sender_id)?;
        let subscribers: Vec<String> = match self.topics.get(topic) {
            Some(members) if !members.is_empty() => members.iter().cloned().collect(),
            _ => return Err(SubstrateError::invalid_topic(topic)),
        };

        self.message_counter += 1;
        let message = Message::with_resolved_topic(draft, topic, self.message_counter);
        let mut delivered = Vec::with_capacity(subscribers.len());
        for subscriber in subscribers.into_iter().filter(|s| s != message.sender_id()) {
            if let Some(queue) = self.queues.get_mut(&subscriber) {
                queue.push_back(message.clone());
                delivered.push(subscriber);
            }
        }
        log::debug!(
            "[PubSubHub] message #{} on '{}' delivered to {} subscriber(s)",
            message.sequence(),
            topic,
            delivered.len()
        );
        self.deliveries.insert(message.id().to_string(), delivered);
        self.all_messages.push(message.clone());
        Ok(message)
    }
}

/// Topic-based fan-out.
///
/// Publishing copies the message into the queue of every agent subscribed
/// to the topic at that moment, except the sender. Publishing to a topic
/// with no subscribers fails with `InvalidTopic` and delivers nothing.
#[derive(Debug)]
pub struct PubSubHub {
    state: Mutex<PubSubState>,
    audit: AuditLog,
    default_topic: String,
    empty_topic_policy: EmptyTopicPolicy,
}

impl Default for PubSubHub {
    fn default() -> Self {
        Self::new(AuditLog::new())
    }
}

impl PubSubHub {
    pub fn new(audit: AuditLog) -> Self {
        Self::with_options(audit, DEFAULT_TOPIC, EmptyTopicPolicy::default())
    }

    pub fn with_options(
        audit: AuditLog,
        default_topic: impl Into<String>,
        empty_topic_policy: EmptyTopicPolicy,
    ) -> Self {
        Self {
            state: Mutex::new(PubSubState::default()),
            audit,
            default_topic: default_topic.into(),
            empty_topic_policy,
        }
    }

    pub fn default_topic(&self) -> &str {
        &self.default_topic
    }

    pub fn empty_topic_policy(&self) -> EmptyTopicPolicy {
        self.empty_topic_policy
    }

    /// Publish `content` on `topic`.
    pub fn publish(
        &self,
        sender_id: &str,
        sender_role: &str,
        topic: &str,
        content: Value,
    ) -> Option<String> {
        self.send(MessageDraft::new(sender_id, sender_role, content).on_topic(topic))
    }

    /// Create a topic with no subscribers. Returns false if it already exists.
    pub fn create_topic(&self, topic: &str) -> bool {
        let created = {
            let mut state = self.state.lock();
            if state.topics.contains_key(topic) {
                false
            } else {
                state.topics.insert(topic.to_string(), BTreeSet::new());
                true
            }
        };
        self.audit
            .record(SYSTEM_AGENT, Operation::CreateTopic, topic, created);
        created
    }

    /// Delete a topic and every subscription to it.
    pub fn delete_topic(&self, topic: &str) -> bool {
        let result = {
            let mut state = self.state.lock();
            match state.topics.remove(topic) {
                Some(members) => {
                    for member in &members {
                        if let Some(subs) = state.subscriptions.get_mut(member) {
                            subs.remove(topic);
                        }
                    }
                    log::info!(
                        "[PubSubHub] deleted topic '{}' ({} subscriber(s))",
                        topic,
                        members.len()
                    );
                    Ok(())
                }
                None => Err(SubstrateError::invalid_topic(topic)),
            }
        };
        self.audit
            .record_result(SYSTEM_AGENT, Operation::DeleteTopic, topic, result)
            .is_ok()
    }

    /// Known topics, sorted.
    pub fn topics(&self) -> Vec<String> {
        self.state.lock().topics.keys().cloned().collect()
    }

    /// Current subscribers of a topic, sorted.
    pub fn topic_subscribers(&self, topic: &str) -> Vec<String> {
        self.state
            .lock()
            .topics
            .get(topic)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Topics an agent is subscribed to, sorted.
    pub fn subscriptions(&self, agent_id: &str) -> Vec<String> {
        self.state
            .lock()
            .subscriptions
            .get(agent_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn messages_by_topic(&self, topic: &str) -> Vec<Message> {
        self.state
            .lock()
            .all_messages
            .iter()
            .filter(|m| m.topic() == Some(topic))
            .cloned()
            .collect()
    }

    /// Agents a published message reached, as subscribed at publish time.
    pub fn delivered_to(&self, message_id: &str) -> Vec<String> {
        self.state
            .lock()
            .deliveries
            .get(message_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn topic_message_count(&self, topic: &str) -> usize {
        self.state
            .lock()
            .all_messages
            .iter()
            .filter(|m| m.topic() == Some(topic))
            .count()
    }
}

impl CommunicationHub for PubSubHub {
    fn mode(&self) -> CommunicationMode {
        CommunicationMode::PubSub
    }

    fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    fn try_register(&self, agent_id: &str) -> Result<()> {
        let result = {
            let mut state = self.state.lock();
            if state.is_registered(agent_id) {
                Err(SubstrateError::AlreadyRegistered {
                    agent_id: agent_id.to_string(),
                })
            } else {
                state.agents.push(agent_id.to_string());
                state.queues.insert(agent_id.to_string(), VecDeque::new());
                state
                    .subscriptions
                    .insert(agent_id.to_string(), BTreeSet::new());
                log::info!("[PubSubHub] registered agent '{}'", agent_id);
                Ok(())
            }
        };
        self.audit
            .record_result(agent_id, Operation::Register, agent_id, result)
    }

    fn try_unregister(&self, agent_id: &str) -> Result<()> {
        let policy = self.empty_topic_policy;
        let result = {
            let mut state = self.state.lock();
            match state.ensure_registered(agent_id) {
                Ok(()) => {
                    let topics: Vec<String> = state
                        .subscriptions
                        .get(agent_id)
                        .map(|s| s.iter().cloned().collect())
                        .unwrap_or_default();
                    for topic in &topics {
                        state.detach(agent_id, topic, policy);
                    }
                    state.subscriptions.remove(agent_id);
                    state.queues.remove(agent_id);
                    state.agents.retain(|a| a != agent_id);
                    Ok(())
                }
                Err(err) => Err(err),
            }
        };
        self.audit
            .record_result(agent_id, Operation::Unregister, agent_id, result)
    }

    fn is_registered(&self, agent_id: &str) -> bool {
        self.state.lock().is_registered(agent_id)
    }

    fn registered_agents(&self) -> Vec<String> {
        self.state.lock().agents.clone()
    }

    fn try_send(&self, draft: MessageDraft) -> Result<Message> {
        let sender = draft.sender_id.clone();
        let topic = draft
            .topic
            .clone()
            .unwrap_or_else(|| self.default_topic.clone());
        let result = self.state.lock().publish(draft, &topic);
        self.audit
            .record_result(&sender, Operation::Send, &topic, result)
    }

    fn try_receive(&self, agent_id: &str) -> Result<Vec<Message>> {
        let result = {
            let mut state = self.state.lock();
            match state.queues.get_mut(agent_id) {
                Some(queue) => Ok(queue.drain(..).collect()),
                None => Err(SubstrateError::unregistered(agent_id)),
            }
        };
        self.audit
            .record_result(agent_id, Operation::Receive, agent_id, result)
    }

    fn peek(&self, agent_id: &str) -> Vec<Message> {
        let result = {
            let state = self.state.lock();
            match state.queues.get(agent_id) {
                Some(queue) => Ok(queue.iter().cloned().collect()),
                None => Err(SubstrateError::unregistered(agent_id)),
            }
        };
        self.audit
            .record_result(agent_id, Operation::Receive, "peek", result)
            .unwrap_or_default()
    }

    fn try_subscribe(&self, agent_id: &str, topic: &str) -> Result<()> {
        let result = {
            let mut state = self.state.lock();
            state.ensure_registered(agent_id).map(|()| {
                state
                    .topics
                    .entry(topic.to_string())
                    .or_default()
                    .insert(agent_id.to_string());
                state
                    .subscriptions
                    .entry(agent_id.to_string())
                    .or_default()
                    .insert(topic.to_string());
            })
        };
        self.audit
            .record_result(agent_id, Operation::Subscribe, topic, result)
    }

    fn try_unsubscribe(&self, agent_id: &str, topic: &str) -> Result<()> {
        let policy = self.empty_topic_policy;
        let result = {
            let mut state = self.state.lock();
            state.ensure_registered(agent_id).and_then(|()| {
                if state.detach(agent_id, topic, policy) {
                    Ok(())
                } else {
                    Err(SubstrateError::invalid_topic(topic))
                }
            })
        };
        self.audit
            .record_result(agent_id, Operation::Unsubscribe, topic, result)
    }

    fn all_messages(&self) -> Vec<Message> {
        self.state.lock().all_messages.clone()
    }

    fn message_count(&self) -> usize {
        self.state.lock().all_messages.len()
    }

    fn get_conversation_history(&self) -> String {
        let state = self.state.lock();
        render_history(&state.all_messages, |m| {
            let topic = m.topic().unwrap_or(&self.default_topic);
            let recipients = match state.deliveries.get(m.id()) {
                Some(delivered) if !delivered.is_empty() => delivered.join(", "),
                _ => "none".to_string(),
            };
            format!(
                "{} ({}) -> TOPIC[{}] -> [{}]",
                m.sender_role(),
                m.sender_id(),
                topic,
                recipients
            )
        })
    }

    fn clear(&self) {
        {
            let mut state = self.state.lock();
            state.all_messages.clear();
            state.deliveries.clear();
            state.message_counter = 0;
            for queue in state.queues.values_mut() {
                queue.clear();
            }
        }
        log::info!("[PubSubHub] cleared all messages and queues");
        self.audit
            .record(SYSTEM_AGENT, Operation::ClearMessages, "pubsub", true);
    }
}
