//! Process-local LIFO nonce cache.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const NONCE_LIFETIME: Duration = Duration::from_secs(15 * 60);
const MAX_CACHED: usize = 32;

/// A shared, mutex-guarded LIFO of server-issued nonces.
///
/// `push` front-inserts (most recent first); `pop_fresh` pops from the
/// front and discards anything older than 15 minutes along the way, so a
/// stale nonce buried under fresher ones is never handed out. Bounded at
/// [`MAX_CACHED`] entries to cap growth if nonces arrive faster than they
/// are consumed.
pub struct NonceCache {
    entries: Mutex<VecDeque<(String, Instant)>>,
}

impl NonceCache {
    pub fn new() -> Self {
        NonceCache {
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Pushes a freshly harvested `Replay-Nonce` onto the cache.
    pub fn push(&self, nonce: String) {
        let mut entries = self.entries.lock().unwrap();
        entries.push_front((nonce, Instant::now()));
        while entries.len() > MAX_CACHED {
            entries.pop_back();
        }
    }

    /// Pops the most recent non-expired nonce, or `None` if the cache is
    /// empty (the caller should then issue `HEAD newNonce`).
    pub fn pop_fresh(&self) -> Option<String> {
        let mut entries = self.entries.lock().unwrap();
        while let Some((nonce, created_at)) = entries.pop_front() {
            if created_at.elapsed() < NONCE_LIFETIME {
                return Some(nonce);
            }
        }
        None
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

impl Default for NonceCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_most_recently_pushed_first() {
        let cache = NonceCache::new();
        cache.push("a".into());
        cache.push("b".into());
        cache.push("c".into());
        assert_eq!(cache.pop_fresh().as_deref(), Some("c"));
        assert_eq!(cache.pop_fresh().as_deref(), Some("b"));
        assert_eq!(cache.pop_fresh().as_deref(), Some("a"));
        assert_eq!(cache.pop_fresh(), None);
    }

    #[test]
    fn expired_nonce_is_never_returned() {
        let cache = NonceCache::new();
        cache
            .entries
            .lock()
            .unwrap()
            .push_front(("stale".into(), Instant::now() - Duration::from_secs(16 * 60)));
        cache.push("fresh".into());
        assert_eq!(cache.pop_fresh().as_deref(), Some("fresh"));
        assert_eq!(cache.pop_fresh(), None);
    }

    #[test]
    fn bounded_growth_drops_oldest() {
        let cache = NonceCache::new();
        for i in 0..(MAX_CACHED + 5) {
            cache.push(format!("n{i}"));
        }
        assert_eq!(cache.len(), MAX_CACHED);
    }
}
