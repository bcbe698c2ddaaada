//! Direct mailbox hub: per-agent FIFO queues.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use serde_json::Value;

use crate::audit::{AuditLog, Operation};
use crate::errors::{Result, SubstrateError};
use crate::message::{Addressing, Message, MessageDraft};

use super::{draft_target, render_history, CommunicationHub, CommunicationMode};

#[derive(Debug, Default)]
struct MailboxState {
    agents: Vec<String>,
    mailboxes: HashMap<String, VecDeque<Message>>,
    all_messages: Vec<Message>,
    message_counter: u64,
}

impl MailboxState {
    fn is_registered(&self, agent_id: &str) -> bool {
        self.mailboxes.contains_key(agent_id)
    }

    /// Resolve who receives a draft. Every named recipient must exist.
    fn recipients_for(&self, draft: &MessageDraft) -> Result<Vec<String>> {
        if let Some(recipient) = &draft.recipient_id {
            if !self.is_registered(recipient) {
                return Err(SubstrateError::RecipientNotFound {
                    recipient_id: recipient.clone(),
                });
            }
            return Ok(vec![recipient.clone()]);
        }

        if !draft.recipient_ids.is_empty() {
            let mut recipients: Vec<String> = Vec::with_capacity(draft.recipient_ids.len());
            for recipient in &draft.recipient_ids {
                if !self.is_registered(recipient) {
                    return Err(SubstrateError::RecipientNotFound {
                        recipient_id: recipient.clone(),
                    });
                }
                if !recipients.contains(recipient) {
                    recipients.push(recipient.clone());
                }
            }
            return Ok(recipients);
        }

        Ok(self
            .agents
            .iter()
            .filter(|a| **a != draft.sender_id)
            .cloned()
            .collect())
    }

    fn route(&mut self, draft: MessageDraft) -> Result<Message> {
        if !self.is_registered(&draft.sender_id) {
            return Err(SubstrateError::unregistered(&draft.sender_id));
        }
        let recipients = self.recipients_for(&draft)?;

        self.message_counter += 1;
        let message = Message::from_draft(draft, self.message_counter);
        for recipient in &recipients {
            if let Some(queue) = self.mailboxes.get_mut(recipient) {
                queue.push_back(message.clone());
            }
        }
        log::debug!(
            "[DirectMailbox] message #{} from '{}' delivered to {} mailbox(es)",
            message.sequence(),
            message.sender_id(),
            recipients.len()
        );
        self.all_messages.push(message.clone());
        Ok(message)
    }
}

/// Peer-to-peer delivery into per-agent queues.
///
/// A draft with `recipient_id` goes to that mailbox only; one with
/// `recipient_ids` goes to each listed mailbox; anything else is broadcast
/// to every registered agent except the sender. `receive` drains the queue.
#[derive(Debug)]
pub struct DirectMailbox {
    state: Mutex<MailboxState>,
    audit: AuditLog,
}

impl Default for DirectMailbox {
    fn default() -> Self {
        Self::new(AuditLog::new())
    }
}

impl DirectMailbox {
    pub fn new(audit: AuditLog) -> Self {
        Self {
            state: Mutex::new(MailboxState::default()),
            audit,
        }
    }

    /// Send to exactly one agent.
    pub fn send_direct(
        &self,
        sender_id: &str,
        sender_role: &str,
        recipient_id: &str,
        content: Value,
    ) -> Option<String> {
        self.send(
            MessageDraft::new(sender_id, sender_role, content)
                .to(recipient_id)
                .with_type("direct"),
        )
    }

    /// Send to several agents. Nothing is delivered if any recipient is unknown.
    pub fn send_to_multiple(
        &self,
        sender_id: &str,
        sender_role: &str,
        recipient_ids: &[&str],
        content: Value,
    ) -> Option<String> {
        self.send(
            MessageDraft::new(sender_id, sender_role, content)
                .to_many(recipient_ids.iter().copied())
                .with_type("multicast"),
        )
    }

    /// Number of undelivered messages waiting for an agent.
    pub fn pending_count(&self, agent_id: &str) -> usize {
        self.state
            .lock()
            .mailboxes
            .get(agent_id)
            .map(|q| q.len())
            .unwrap_or(0)
    }
}

impl CommunicationHub for DirectMailbox {
    fn mode(&self) -> CommunicationMode {
        CommunicationMode::Direct
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
                state
                    .mailboxes
                    .insert(agent_id.to_string(), VecDeque::new());
                log::info!("[DirectMailbox] registered agent '{}'", agent_id);
                Ok(())
            }
        };
        self.audit
            .record_result(agent_id, Operation::Register, agent_id, result)
    }

    fn try_unregister(&self, agent_id: &str) -> Result<()> {
        let result = {
            let mut state = self.state.lock();
            match state.mailboxes.remove(agent_id) {
                Some(dropped) => {
                    state.agents.retain(|a| a != agent_id);
                    if !dropped.is_empty() {
                        log::warn!(
                            "[DirectMailbox] dropped {} unread message(s) for '{}'",
                            dropped.len(),
                            agent_id
                        );
                    }
                    Ok(())
                }
                None => Err(SubstrateError::unregistered(agent_id)),
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
        let target = draft_target(&draft);
        let result = self.state.lock().route(draft);
        self.audit
            .record_result(&sender, Operation::Send, &target, result)
    }

    fn try_receive(&self, agent_id: &str) -> Result<Vec<Message>> {
        let result = {
            let mut state = self.state.lock();
            match state.mailboxes.get_mut(agent_id) {
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
            match state.mailboxes.get(agent_id) {
                Some(queue) => Ok(queue.iter().cloned().collect()),
                None => Err(SubstrateError::unregistered(agent_id)),
            }
        };
        self.audit
            .record_result(agent_id, Operation::Receive, "peek", result)
            .unwrap_or_default()
    }

    fn all_messages(&self) -> Vec<Message> {
        self.state.lock().all_messages.clone()
    }

    fn message_count(&self) -> usize {
        self.state.lock().all_messages.len()
    }

    fn get_conversation_history(&self) -> String {
        let state = self.state.lock();
        render_history(&state.all_messages, |m| match m.addressing() {
            Addressing::Direct(recipient) => format!(
                "{} ({}) -> {} [DIRECT]",
                m.sender_role(),
                m.sender_id(),
                recipient
            ),
            Addressing::Multicast(recipients) => format!(
                "{} ({}) -> [{}] [MULTICAST]",
                m.sender_role(),
                m.sender_id(),
                recipients.join(", ")
            ),
            _ => format!("{} ({}) [BROADCAST]", m.sender_role(), m.sender_id()),
        })
    }

    fn clear(&self) {
        {
            let mut state = self.state.lock();
            state.all_messages.clear();
            state.message_counter = 0;
            for queue in state.mailboxes.values_mut() {
                queue.clear();
            }
        }
        log::info!("[DirectMailbox] cleared all messages and mailboxes");
        self.audit
            .record("system", Operation::ClearMessages, "direct", true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use serde_json::json;

    fn mailbox_with(agents: &[&str]) -> DirectMailbox {
        let hub = DirectMailbox::default();
        for agent in agents {
            assert!(hub.register(agent));
        }
        hub
    }

    #[test]
    fn test_direct_delivery_reaches_only_recipient() {
        let hub = mailbox_with(&["a", "b", "c"]);
        let id = hub.send_direct("a", "Admin", "b", json!("for b")).unwrap();

        let inbox = hub.receive("b");
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].id(), id);
        assert_eq!(inbox[0].message_type(), "direct");
        assert!(hub.receive("c").is_empty());
        assert!(hub.receive("a").is_empty());
    }

    #[test]
    fn test_receive_drains() {
        let hub = mailbox_with(&["a", "b"]);
        hub.send_direct("a", "Admin", "b", json!(1));
        hub.send_direct("a", "Admin", "b", json!(2));

        let first = hub.receive("b");
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].content(), &json!(1));
        assert_eq!(first[1].content(), &json!(2));
        assert!(hub.receive("b").is_empty());
    }

    #[test]
    fn test_broadcast_skips_sender() {
        let hub = mailbox_with(&["a", "b", "c"]);
        assert!(hub.post("a", "Admin", json!("all hands")).is_some());
        assert!(hub.receive("a").is_empty());
        assert_eq!(hub.receive("b").len(), 1);
        assert_eq!(hub.receive("c").len(), 1);
    }

    #[test]
    fn test_unknown_recipient_is_rejected() {
        let hub = mailbox_with(&["a"]);
        let err = hub
            .try_send(MessageDraft::new("a", "Admin", "hello").to("nobody"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RecipientNotFound);
        assert_eq!(hub.message_count(), 0);
        let last = hub.audit_log().last().unwrap();
        assert_eq!(last.target, "nobody");
        assert!(!last.success);
    }

    #[test]
    fn test_multicast_is_all_or_nothing() {
        let hub = mailbox_with(&["a", "b", "c", "d"]);
        assert!(hub
            .send_to_multiple("a", "Admin", &["b", "ghost"], json!("x"))
            .is_none());
        assert_eq!(hub.pending_count("b"), 0);

        assert!(hub
            .send_to_multiple("a", "Admin", &["b", "c", "b"], json!("y"))
            .is_some());
        assert_eq!(hub.pending_count("b"), 1);
        assert_eq!(hub.pending_count("c"), 1);
        assert_eq!(hub.pending_count("d"), 0);
    }

    #[test]
    fn test_peek_does_not_consume() {
        let hub = mailbox_with(&["a", "b"]);
        hub.send_direct("a", "Admin", "b", json!("keep"));
        assert_eq!(hub.peek("b").len(), 1);
        assert_eq!(hub.peek("b").len(), 1);
        assert_eq!(hub.receive("b").len(), 1);
        assert!(hub.peek("b").is_empty());
    }

    #[test]
    fn test_history_marks_delivery_kind() {
        let hub = mailbox_with(&["a", "b", "c"]);
        hub.send_direct("a", "Analyst", "b", json!("d"));
        hub.send_to_multiple("b", "Coordinator", &["a", "c"], json!("m"));
        hub.post("c", "Guest", json!("b"));

        let history = hub.get_conversation_history();
        assert!(history.contains("Analyst (a) -> b [DIRECT]"));
        assert!(history.contains("Coordinator (b) -> [a, c] [MULTICAST]"));
        assert!(history.contains("Guest (c) [BROADCAST]"));
    }

    #[test]
    fn test_unregister_drops_mailbox() {
        let hub = mailbox_with(&["a", "b"]);
        hub.send_direct("a", "Admin", "b", json!("lost"));
        assert!(hub.unregister("b"));
        assert!(hub.send_direct("a", "Admin", "b", json!("again")).is_none());
        assert_eq!(hub.registered_agents(), vec!["a".to_string()]);
    }

    #[test]
    fn test_clear_empties_mailboxes() {
        let hub = mailbox_with(&["a", "b"]);
        hub.send_direct("a", "Admin", "b", json!("old"));
        hub.clear();
        assert_eq!(hub.pending_count("b"), 0);
        let id = hub.send_direct("a", "Admin", "b", json!("new"));
        assert!(id.is_some());
        assert_eq!(hub.all_messages()[0].sequence(), 1);
    }
}
