use std::collections::HashMap;

use parking_lot::Mutex;

use valet_domain::tool::{Message, Role};

pub const DEFAULT_WINDOW_SIZE: usize = 50;

/// One conversation's history.
struct Session {
    turns: Vec<(Role, String)>,
}

impl Session {
    fn new() -> Self {
        Self { turns: Vec::new() }
    }

    fn push(&mut self, role: Role, content: String, window: usize) {
        self.turns.push((role, content));
        if self.turns.len() > window {
            let excess = self.turns.len() - window;
            self.turns.drain(..excess);
        }
    }
}

/// Per-conversation session store. Appends are O(1) plus a trim on
/// overflow; sessions are created on first touch.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    window: usize,
}

impl SessionStore {
    pub fn new(window: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            window: window.max(1),
        }
    }

    /// Append a turn to a conversation, evicting the oldest entries
    /// beyond the window.
    pub fn append(&self, conversation_id: &str, role: Role, content: impl Into<String>) {
        let mut sessions = self.sessions.lock();
        sessions
            .entry(conversation_id.to_string())
            .or_insert_with(Session::new)
            .push(role, content.into(), self.window);
    }

    /// The conversation's history as LLM messages, oldest first.
    pub fn history(&self, conversation_id: &str) -> Vec<Message> {
        let sessions = self.sessions.lock();
        sessions
            .get(conversation_id)
            .map(|s| {
                s.turns
                    .iter()
                    .map(|(role, content)| match role {
                        Role::User => Message::user(content.clone()),
                        Role::Assistant => Message::assistant(content.clone()),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self, conversation_id: &str) -> usize {
        self.sessions
            .lock()
            .get(conversation_id)
            .map_or(0, |s| s.turns.len())
    }

    pub fn is_empty(&self, conversation_id: &str) -> bool {
        self.len(conversation_id) == 0
    }

    /// Drop a conversation's history. Returns how many turns were
    /// removed.
    pub fn clear(&self, conversation_id: &str) -> usize {
        let mut sessions = self.sessions.lock();
        let removed = sessions
            .remove(conversation_id)
            .map_or(0, |s| s.turns.len());
        if removed > 0 {
            tracing::info!(conversation_id, removed, "cleared session");
        }
        removed
    }
}
