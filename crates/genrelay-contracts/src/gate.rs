use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Per-actor mutual exclusion over generation work. Rejections are immediate.
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyGate {
    active: Arc<Mutex<HashSet<String>>>,
}

impl ConcurrencyGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomic check-and-insert.
    pub fn try_admit(&self, actor: &str) -> bool {
        self.lock().insert(actor.to_string())
    }

    pub fn release(&self, actor: &str) {
        self.lock().remove(actor);
    }

    /// Admits `actor` and returns a permit that releases the slot on drop.
    pub fn admit(&self, actor: &str) -> Option<GatePermit> {
        if !self.try_admit(actor) {
            tracing::debug!(actor, "gate rejected actor with request in flight");
            return None;
        }
        Some(GatePermit {
            gate: self.clone(),
            actor: actor.to_string(),
        })
    }

    pub fn is_active(&self, actor: &str) -> bool {
        self.lock().contains(actor)
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
pub struct GatePermit {
    gate: ConcurrencyGate,
    actor: String,
}

impl GatePermit {
    pub fn actor(&self) -> &str {
        &self.actor
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.gate.release(&self.actor);
    }
}
