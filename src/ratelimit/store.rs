//! Window storage backends.
//!
//! The [`WindowStore`] trait is the seam between the decision engine and the
//! place counters live. [`MemoryStore`] keeps them in process memory; a shared
//! backend with an atomic increment-with-expiry primitive can be plugged in by
//! overriding [`WindowStore::hit`].

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;

use super::key::ClientKey;
use super::window::Window;

/// Storage for counting windows, keyed by [`ClientKey`].
pub trait WindowStore: Send + Sync {
    /// Get the stored window for a key, expired or not.
    fn get(&self, key: &ClientKey) -> Option<Window>;

    /// Store a window, replacing any previous one.
    fn set(&self, key: &ClientKey, window: Window);

    /// Remove a window, returning it if it existed.
    fn delete(&self, key: &ClientKey) -> Option<Window>;

    /// Snapshot of all stored keys.
    fn keys(&self) -> Vec<ClientKey>;

    /// Number of stored windows.
    fn len(&self) -> usize {
        self.keys().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Count one request for `key` and return the resulting window.
    ///
    /// Opens a fresh window when none exists or the stored one has expired.
    /// The default implementation composes `get` and `set` and is therefore
    /// not atomic; backends shared between threads must override it.
    fn hit(&self, key: &ClientKey, now_ms: u64, duration: Duration) -> Window {
        let window = match self.get(key) {
            Some(mut window) => {
                window.advance(now_ms, duration);
                window
            }
            None => Window::open(now_ms, duration),
        };
        self.set(key, window);
        window
    }

    /// Delete every window whose `reset_at_ms < now_ms`.
    ///
    /// Returns the number of windows removed.
    fn sweep(&self, now_ms: u64) -> usize {
        let mut removed = 0;
        for key in self.keys() {
            if let Some(window) = self.get(&key) {
                if window.reset_at_ms < now_ms && self.delete(&key).is_some() {
                    removed += 1;
                }
            }
        }
        removed
    }
}

/// In-process window store.
///
/// Backed by a sharded concurrent map: `hit` holds the shard lock of its key
/// for the whole read-check-write, and `sweep` takes each shard lock in turn.
#[derive(Debug, Default)]
pub struct MemoryStore {
    windows: DashMap<ClientKey, Window>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every window.
    pub fn clear(&self) {
        self.windows.clear();
    }
}

impl WindowStore for MemoryStore {
    fn get(&self, key: &ClientKey) -> Option<Window> {
        self.windows.get(key).map(|window| *window)
    }

    fn set(&self, key: &ClientKey, window: Window) {
        self.windows.insert(key.clone(), window);
    }

    fn delete(&self, key: &ClientKey) -> Option<Window> {
        self.windows.remove(key).map(|(_, window)| window)
    }

    fn keys(&self) -> Vec<ClientKey> {
        self.windows.iter().map(|entry| entry.key().clone()).collect()
    }

    fn len(&self) -> usize {
        self.windows.len()
    }

    fn hit(&self, key: &ClientKey, now_ms: u64, duration: Duration) -> Window {
        if let Some(mut window) = self.windows.get_mut(key) {
            window.advance(now_ms, duration);
            return *window;
        }

        match self.windows.entry(key.clone()) {
            // Another request opened the window between the lookups.
            Entry::Occupied(mut occupied) => {
                let window = occupied.get_mut();
                window.advance(now_ms, duration);
                *window
            }
            Entry::Vacant(vacant) => {
                let window = Window::open(now_ms, duration);
                vacant.insert(window);
                window
            }
        }
    }

    fn sweep(&self, now_ms: u64) -> usize {
        let mut removed = 0;
        self.windows.retain(|_, window| {
            let keep = window.reset_at_ms >= now_ms;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    fn key(id: &str) -> ClientKey {
        ClientKey::new("api", id)
    }

    #[test]
    fn test_hit_creates_window() {
        let store = MemoryStore::new();
        let window = store.hit(&key("a"), 1_000, MINUTE);

        assert_eq!(window.count, 1);
        assert_eq!(window.reset_at_ms, 61_000);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_hit_increments_in_place() {
        let store = MemoryStore::new();
        store.hit(&key("a"), 0, MINUTE);
        store.hit(&key("a"), 10, MINUTE);
        let window = store.hit(&key("a"), 20, MINUTE);

        assert_eq!(window.count, 3);
        assert_eq!(store.get(&key("a")), Some(window));
    }

    #[test]
    fn test_hit_replaces_expired_window() {
        let store = MemoryStore::new();
        store.hit(&key("a"), 0, MINUTE);
        store.hit(&key("a"), 1, MINUTE);

        let window = store.hit(&key("a"), 60_001, MINUTE);
        assert_eq!(window.count, 1);
        assert_eq!(window.reset_at_ms, 120_001);
    }

    #[test]
    fn test_set_get_delete() {
        let store = MemoryStore::new();
        let window = Window {
            count: 3,
            reset_at_ms: 5_000,
        };

        store.set(&key("a"), window);
        assert_eq!(store.get(&key("a")), Some(window));
        assert_eq!(store.keys(), vec![key("a")]);

        assert_eq!(store.delete(&key("a")), Some(window));
        assert_eq!(store.get(&key("a")), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_sweep_keeps_live_windows() {
        let store = MemoryStore::new();
        store.set(&key("expired"), Window { count: 1, reset_at_ms: 999 });
        store.set(&key("boundary"), Window { count: 1, reset_at_ms: 1_000 });
        store.set(&key("live"), Window { count: 1, reset_at_ms: 5_000 });

        assert_eq!(store.sweep(1_000), 1);
        assert_eq!(store.get(&key("expired")), None);
        assert!(store.get(&key("boundary")).is_some());
        assert!(store.get(&key("live")).is_some());
    }

    /// Store that only implements the required methods, to exercise the
    /// trait's default `hit` and `sweep`.
    #[derive(Default)]
    struct PlainStore {
        inner: std::sync::Mutex<std::collections::HashMap<ClientKey, Window>>,
    }

    impl WindowStore for PlainStore {
        fn get(&self, key: &ClientKey) -> Option<Window> {
            self.inner.lock().unwrap().get(key).copied()
        }

        fn set(&self, key: &ClientKey, window: Window) {
            self.inner.lock().unwrap().insert(key.clone(), window);
        }

        fn delete(&self, key: &ClientKey) -> Option<Window> {
            self.inner.lock().unwrap().remove(key)
        }

        fn keys(&self) -> Vec<ClientKey> {
            self.inner.lock().unwrap().keys().cloned().collect()
        }
    }

    #[test]
    fn test_default_hit_and_sweep() {
        let store = PlainStore::default();
        store.hit(&key("a"), 0, MINUTE);
        let window = store.hit(&key("a"), 5, MINUTE);
        assert_eq!(window.count, 2);

        store.hit(&key("b"), 100_000, MINUTE);
        assert_eq!(store.len(), 2);

        assert_eq!(store.sweep(100_000), 1);
        assert_eq!(store.get(&key("a")), None);
        assert!(store.get(&key("b")).is_some());
    }
}
