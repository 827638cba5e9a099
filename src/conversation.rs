use crate::model::{Message, MessageRole};

const MAX_HISTORY_MESSAGES: usize = 40;

/// Bounded chat history for interactive mode. System messages are always kept.
#[derive(Debug, Clone)]
pub struct Conversation {
    history: Vec<Message>,
    system_messages: Vec<Message>,
}

impl Conversation {
    pub fn new(system_prompt: Option<&str>) -> Self {
        let system_messages: Vec<Message> = system_prompt
            .filter(|prompt| !prompt.trim().is_empty())
            .map(Message::system)
            .into_iter()
            .collect();
        let history = system_messages.clone();
        Self {
            history,
            system_messages,
        }
    }

    pub fn reset(&mut self) {
        self.history = self.system_messages.clone();
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.history.push(Message::user(content));
        self.trim_history();
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.history.push(Message::assistant(content));
        self.trim_history();
    }

    /// Drops a trailing user turn whose request failed.
    pub fn discard_pending_user(&mut self) {
        if self
            .history
            .last()
            .is_some_and(|msg| msg.role == MessageRole::User)
            && self.history.len() > self.system_messages.len()
        {
            self.history.pop();
        }
    }

    fn trim_history(&mut self) {
        if self.history.len() <= MAX_HISTORY_MESSAGES {
            return;
        }

        let keep_tail = MAX_HISTORY_MESSAGES.saturating_sub(self.system_messages.len());
        let mut trimmed = self.system_messages.clone();
        let tail_start = self.history.len().saturating_sub(keep_tail);
        trimmed.extend_from_slice(&self.history[tail_start..]);
        self.history = trimmed;
    }
}
