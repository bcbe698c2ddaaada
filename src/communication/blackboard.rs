//! Blackboard hub: one shared, append-only message log.

use parking_lot::Mutex;

use crate::audit::{AuditLog, Operation};
use crate::errors::{Result, SubstrateError};
use crate::message::{Message, MessageDraft};

use super::{draft_target, render_history, CommunicationHub, CommunicationMode};

#[derive(Debug, Default)]
struct BoardState {
    agents: Vec<String>,
    messages: Vec<Message>,
    message_counter: u64,
}

impl BoardState {
    fn is_registered(&self, agent_id: &str) -> bool {
        self.agents.iter().any(|a| a == agent_id)
    }
}

/// Shared log that every registered agent reads in full.
///
/// Recipients and topics on a draft are kept on the message but do not
/// restrict visibility: `receive` always returns the whole history and
/// never consumes it.
#[derive(Debug)]
pub struct Blackboard {
    state: Mutex<BoardState>,
    audit: AuditLog,
}

impl Default for Blackboard {
    fn default() -> Self {
        Self::new(AuditLog::new())
    }
}

impl Blackboard {
    pub fn new(audit: AuditLog) -> Self {
        Self {
            state: Mutex::new(BoardState::default()),
            audit,
        }
    }

    /// Messages posted after `sequence`, for agents that track what they have seen.
    pub fn messages_since(&self, sequence: u64) -> Vec<Message> {
        self.state
            .lock()
            .messages
            .iter()
            .filter(|m| m.sequence() > sequence)
            .cloned()
            .collect()
    }

    /// Messages posted by one agent.
    pub fn messages_from(&self, sender_id: &str) -> Vec<Message> {
        self.state
            .lock()
            .messages
            .iter()
            .filter(|m| m.sender_id() == sender_id)
            .cloned()
            .collect()
    }
}

impl CommunicationHub for Blackboard {
    fn mode(&self) -> CommunicationMode {
        CommunicationMode::Blackboard
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
                log::info!("[Blackboard] registered agent '{}'", agent_id);
                Ok(())
            }
        };
        self.audit
            .record_result(agent_id, Operation::Register, agent_id, result)
    }

    fn try_unregister(&self, agent_id: &str) -> Result<()> {
        let result = {
            let mut state = self.state.lock();
            let before = state.agents.len();
            state.agents.retain(|a| a != agent_id);
            if state.agents.len() == before {
                Err(SubstrateError::unregistered(agent_id))
            } else {
                Ok(())
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
        let result = {
            let mut state = self.state.lock();
            if !state.is_registered(&sender) {
                Err(SubstrateError::unregistered(&sender))
            } else {
                state.message_counter += 1;
                let message = Message::from_draft(draft, state.message_counter);
                log::debug!(
                    "[Blackboard] '{}' posted message #{}",
                    sender,
                    message.sequence()
                );
                state.messages.push(message.clone());
                Ok(message)
            }
        };
        self.audit
            .record_result(&sender, Operation::Send, &target, result)
    }

    fn try_receive(&self, agent_id: &str) -> Result<Vec<Message>> {
        let result = {
            let state = self.state.lock();
            if state.is_registered(agent_id) {
                Ok(state.messages.clone())
            } else {
                Err(SubstrateError::unregistered(agent_id))
            }
        };
        self.audit
            .record_result(agent_id, Operation::Receive, agent_id, result)
    }

    fn peek(&self, agent_id: &str) -> Vec<Message> {
        self.receive(agent_id)
    }

    fn all_messages(&self) -> Vec<Message> {
        self.state.lock().messages.clone()
    }

    fn message_count(&self) -> usize {
        self.state.lock().messages.len()
    }

    fn get_conversation_history(&self) -> String {
        let state = self.state.lock();
        render_history(&state.messages, |m| {
            format!("{} ({})", m.sender_role(), m.sender_id())
        })
    }

    fn clear(&self) {
        {
            let mut state = self.state.lock();
            state.messages.clear();
            state.message_counter = 0;
        }
        log::info!("[Blackboard] cleared all messages");
        self.audit
            .record("system", Operation::ClearMessages, "blackboard", true);
    }
}
