use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }

    fn transcript_label(self) -> &'static str {
        match self {
            Role::User => "[User]",
            Role::Model => "[Model]",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
        }
    }
}

/// Per-actor conversation log. Turns are only added in user/model pairs.
#[derive(Debug, Clone, Default)]
pub struct HistoryStore {
    turns: Arc<Mutex<HashMap<String, Vec<Turn>>>>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_exchange(&self, actor: &str, input: impl Into<String>, output: impl Into<String>) {
        let mut turns = self.lock();
        let log = turns.entry(actor.to_string()).or_default();
        log.push(Turn::user(input));
        log.push(Turn::model(output));
    }

    pub fn snapshot(&self, actor: &str) -> Vec<Turn> {
        self.lock().get(actor).cloned().unwrap_or_default()
    }

    pub fn len(&self, actor: &str) -> usize {
        self.lock().get(actor).map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self, actor: &str) -> bool {
        self.len(actor) == 0
    }

    /// Returns whether there was anything to clear.
    pub fn clear(&self, actor: &str) -> bool {
        self.lock()
            .remove(actor)
            .map(|log| !log.is_empty())
            .unwrap_or(false)
    }

    /// Plain-text transcript, `None` when the actor has no history.
    pub fn export_text(&self, actor: &str) -> Option<String> {
        let turns = self.snapshot(actor);
        if turns.is_empty() {
            return None;
        }
        let mut out = String::new();
        for turn in &turns {
            out.push_str(turn.role.transcript_label());
            out.push_str(":\n");
            out.push_str(&turn.text);
            out.push_str("\n\n");
        }
        Some(out)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Turn>>> {
        self.turns.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
