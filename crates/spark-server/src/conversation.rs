//! Per-identity conversation windows fed to the completion source.

use std::collections::VecDeque;

use dashmap::DashMap;
use spark_core::{ChatMessage, UserId};

pub const SYSTEM_PROMPT: &str = "You are a helpful AI assistant for SiteSpark, an AI-powered website builder. Help users create and improve their websites.";

/// Most recent `limit` messages, oldest first.
#[derive(Clone, Debug)]
pub struct ConversationWindow {
    entries: VecDeque<ChatMessage>,
    limit: usize,
}

impl ConversationWindow {
    /// Window seeded with a system instruction.
    pub fn seeded(system_prompt: &str, limit: usize) -> Self {
        let mut window = Self {
            entries: VecDeque::with_capacity(limit.saturating_add(1)),
            limit: limit.max(1),
        };
        window.push(ChatMessage::system(system_prompt));
        window
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.entries.push_back(message);
        while self.entries.len() > self.limit {
            let _ = self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_vec(&self) -> Vec<ChatMessage> {
        self.entries.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.entries.iter()
    }
}

/// Conversation windows keyed by identity. In memory only.
pub struct ConversationStore {
    windows: DashMap<UserId, ConversationWindow>,
    system_prompt: String,
    limit: usize,
}

impl ConversationStore {
    pub fn new(system_prompt: impl Into<String>, limit: usize) -> Self {
        Self {
            windows: DashMap::new(),
            system_prompt: system_prompt.into(),
            limit,
        }
    }

    /// Current window plus `pending`, without recording `pending`.
    /// Seeds the window on first use.
    pub fn snapshot_with(&self, user_id: &UserId, pending: ChatMessage) -> Vec<ChatMessage> {
        let mut window = self
            .windows
            .entry(user_id.clone())
            .or_insert_with(|| ConversationWindow::seeded(&self.system_prompt, self.limit))
            .clone();
        window.push(pending);
        window.to_vec()
    }

    /// Record a completed turn.
    pub fn commit(&self, user_id: &UserId, user_turn: ChatMessage, assistant_turn: ChatMessage) {
        let mut window = self
            .windows
            .entry(user_id.clone())
            .or_insert_with(|| ConversationWindow::seeded(&self.system_prompt, self.limit));
        window.push(user_turn);
        window.push(assistant_turn);
    }

    pub fn window(&self, user_id: &UserId) -> Option<Vec<ChatMessage>> {
        self.windows.get(user_id).map(|w| w.to_vec())
    }
}
