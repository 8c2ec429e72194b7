//! API-key rotation.
//!
//! Workers draw keys round-robin from a user-supplied pool so a single
//! key's rate limit doesn't throttle the whole fleet. The pool is lock-free;
//! an atomic cursor is enough because exact fairness doesn't matter.

use std::sync::atomic::{AtomicUsize, Ordering};

use secrecy::SecretString;

use crate::error::LlmError;

pub struct KeyPool {
    keys: Vec<SecretString>,
    cursor: AtomicUsize,
}

impl KeyPool {
    pub fn new(keys: Vec<SecretString>) -> Self {
        Self {
            keys,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Next key in rotation.
    pub fn next_key(&self, provider: &str) -> Result<&SecretString, LlmError> {
        if self.keys.is_empty() {
            return Err(LlmError::NoApiKey {
                provider: provider.to_string(),
            });
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.keys.len();
        Ok(&self.keys[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn rotates_round_robin() {
        let pool = KeyPool::new(vec![
            SecretString::from("k1".to_string()),
            SecretString::from("k2".to_string()),
        ]);
        assert_eq!(pool.next_key("p").unwrap().expose_secret(), "k1");
        assert_eq!(pool.next_key("p").unwrap().expose_secret(), "k2");
        assert_eq!(pool.next_key("p").unwrap().expose_secret(), "k1");
    }

    #[test]
    fn empty_pool_errors() {
        let pool = KeyPool::new(vec![]);
        assert!(matches!(
            pool.next_key("p"),
            Err(LlmError::NoApiKey { .. })
        ));
    }
}
