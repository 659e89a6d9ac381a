use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

/// Where a message arrived and how it addressed the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageContext<'a> {
    pub channel: &'a str,
    pub actor: &'a str,
    pub direct: bool,
    pub mentioned: bool,
}

#[derive(Debug, Default)]
struct RulesInner {
    always_respond: HashSet<String>,
    active_actors: HashMap<String, HashSet<String>>,
}

/// Decides whether an unaddressed message in a shared channel gets a reply.
#[derive(Debug, Clone, Default)]
pub struct ChannelRules {
    inner: Arc<Mutex<RulesInner>>,
}

impl ChannelRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flips "respond to everyone" for the channel; returns the new state.
    pub fn toggle_channel(&self, channel: &str) -> bool {
        let mut inner = self.lock();
        if inner.always_respond.remove(channel) {
            return false;
        }
        inner.always_respond.insert(channel.to_string());
        true
    }

    /// Flips "always respond to me" for one actor in one channel.
    pub fn toggle_actor(&self, channel: &str, actor: &str) -> bool {
        let mut inner = self.lock();
        let actors = inner.active_actors.entry(channel.to_string()).or_default();
        if actors.remove(actor) {
            return false;
        }
        actors.insert(actor.to_string());
        true
    }

    pub fn should_respond(&self, message: &MessageContext<'_>) -> bool {
        if message.direct || message.mentioned {
            return true;
        }
        let inner = self.lock();
        inner.always_respond.contains(message.channel)
            || inner
                .active_actors
                .get(message.channel)
                .map(|actors| actors.contains(message.actor))
                .unwrap_or(false)
    }

    /// Drops every rule tied to the channel.
    pub fn forget_channel(&self, channel: &str) {
        let mut inner = self.lock();
        inner.always_respond.remove(channel);
        inner.active_actors.remove(channel);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RulesInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
