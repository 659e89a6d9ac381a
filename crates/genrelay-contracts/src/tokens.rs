use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use rand::distributions::Alphanumeric;
use rand::Rng;

pub const TOKEN_LENGTH: usize = 5;
pub const NONCE_MIN: u64 = 100_000_000;
pub const NONCE_MAX: u64 = 999_999_999;

/// Draws a fresh token; uniqueness is only guaranteed through [`TokenRegistry`].
pub fn correlation_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// Seed value in `100000000..=999999999`.
pub fn nonce() -> u64 {
    rand::thread_rng().gen_range(NONCE_MIN..=NONCE_MAX)
}

/// Tracks tokens of in-flight jobs so no two live jobs share a response channel key.
#[derive(Debug, Clone, Default)]
pub struct TokenRegistry {
    leased: Arc<Mutex<HashSet<String>>>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lease(&self) -> TokenLease {
        self.lease_with(correlation_token)
    }

    /// Leases the first drawn token not held by another in-flight job.
    pub fn lease_with(&self, mut draw: impl FnMut() -> String) -> TokenLease {
        let mut leased = self.leased.lock().unwrap_or_else(PoisonError::into_inner);
        let mut token = draw();
        while leased.contains(&token) {
            tracing::debug!(token = %token, "correlation token collision; redrawing");
            token = draw();
        }
        leased.insert(token.clone());
        TokenLease {
            token,
            leased: Arc::clone(&self.leased),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.leased
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// A leased token; dropping it frees the token for reuse.
#[derive(Debug)]
pub struct TokenLease {
    token: String,
    leased: Arc<Mutex<HashSet<String>>>,
}

impl TokenLease {
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl Drop for TokenLease {
    fn drop(&mut self) {
        self.leased
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.token);
    }
}
