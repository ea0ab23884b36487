use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::warn;

use crate::token::Token;

/// One token per principal id. Entries are never swept; callers decide
/// whether a token is still usable by comparing its expiry with their clock.
#[derive(Debug, Clone, Default)]
pub struct CredentialCache {
    entries: Arc<Mutex<HashMap<String, Token>>>,
}

impl CredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, principal_id: &str) -> Option<Token> {
        self.lock().get(principal_id).cloned()
    }

    pub fn put(&self, principal_id: &str, token: Token) {
        self.lock().insert(principal_id.to_string(), token);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Token>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("credential cache lock was poisoned; continuing with recovered state");
                poisoned.into_inner()
            }
        }
    }
}
