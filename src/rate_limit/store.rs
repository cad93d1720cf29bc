//! Fixed-window counter store
//!
//! One live window per key. Expired windows read as empty and are replaced
//! by the next recording call; [`WindowStore::purge_expired`] reclaims the
//! memory of keys that went quiet.
//!
//! Per-key operations run under the dashmap shard lock, so check-and-record
//! is atomic with respect to other requests on the same key.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// State of one window as seen by a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Requests recorded in the window
    pub count: u64,
    /// When the window closes
    pub reset_at: Instant,
}

impl WindowSnapshot {
    pub fn remaining(&self, max_requests: u64) -> u64 {
        max_requests.saturating_sub(self.count)
    }

    /// Reset instant as Unix seconds, rounded up
    pub fn reset_unix_secs(&self) -> i64 {
        let remaining = self.reset_at.saturating_duration_since(Instant::now());
        let now_ms = chrono::Utc::now().timestamp_millis();
        (now_ms + remaining.as_millis() as i64 + 999) / 1000
    }
}

#[derive(Debug)]
struct Window {
    count: u64,
    reset_at: Instant,
}

impl Window {
    fn fresh(now: Instant, length: Duration) -> Self {
        Self {
            count: 0,
            reset_at: now + length,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.reset_at
    }

    fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot {
            count: self.count,
            reset_at: self.reset_at,
        }
    }
}

/// In-process window store. Not shared across instances.
#[derive(Default)]
pub struct WindowStore {
    windows: DashMap<String, Window>,
}

impl WindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current window, or `None` when absent or expired. Never mutates.
    pub fn get(&self, key: &str) -> Option<WindowSnapshot> {
        let now = Instant::now();
        self.windows
            .get(key)
            .filter(|w| !w.is_expired(now))
            .map(|w| w.snapshot())
    }

    /// Count in the current window; 0 when absent or expired
    pub fn count(&self, key: &str) -> u64 {
        self.get(key).map_or(0, |w| w.count)
    }

    /// Record one request, opening a fresh window if needed
    pub fn increment(&self, key: &str, length: Duration) -> WindowSnapshot {
        let now = Instant::now();
        let mut window = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| Window::fresh(now, length));

        if window.is_expired(now) {
            *window = Window::fresh(now, length);
        }
        window.count += 1;
        window.snapshot()
    }

    /// Record one request only if the window has room
    ///
    /// `Ok` carries the window after recording, `Err` the full window.
    pub fn try_acquire(
        &self,
        key: &str,
        length: Duration,
        max_requests: u64,
    ) -> Result<WindowSnapshot, WindowSnapshot> {
        let now = Instant::now();
        let mut window = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| Window::fresh(now, length));

        if window.is_expired(now) {
            *window = Window::fresh(now, length);
        }

        if window.count >= max_requests {
            return Err(window.snapshot());
        }

        window.count += 1;
        Ok(window.snapshot())
    }

    /// Undo one recorded request
    ///
    /// Only applies to the window identified by `reset_at`; a refund never
    /// leaks into a later window.
    pub fn release(&self, key: &str, reset_at: Instant) {
        if let Some(mut window) = self.windows.get_mut(key) {
            if window.reset_at == reset_at {
                window.count = window.count.saturating_sub(1);
            }
        }
    }

    /// Forget a key
    pub fn reset(&self, key: &str) {
        self.windows.remove(key);
    }

    /// Drop expired windows
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, w| !w.is_expired(now));
        before.saturating_sub(self.windows.len())
    }

    /// Stored windows, expired or not
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn clear(&self) {
        self.windows.clear();
    }
}

/// Shortest purge period; a zero period would spin
pub const MIN_PURGE_INTERVAL: Duration = Duration::from_secs(1);

/// Periodically purge expired windows until the task is aborted
pub fn spawn_purge_task(store: Arc<WindowStore>, every: Duration) -> JoinHandle<()> {
    let every = every.max(MIN_PURGE_INTERVAL);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let purged = store.purge_expired();
            if purged > 0 {
                debug!(purged, "purged expired rate limit windows");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_increment_creates_window() {
        let store = WindowStore::new();
        assert_eq!(store.count("k"), 0);
        assert!(store.get("k").is_none());

        assert_eq!(store.increment("k", MINUTE).count, 1);
        assert_eq!(store.increment("k", MINUTE).count, 2);
        assert_eq!(store.count("k"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_window_reads_empty_without_mutation() {
        let store = WindowStore::new();
        store.increment("k", MINUTE);
        store.increment("k", MINUTE);

        tokio::time::advance(MINUTE).await;

        assert_eq!(store.count("k"), 0);
        assert_eq!(store.len(), 1);

        // First recording call starts a fresh window
        let fresh = store.increment("k", MINUTE);
        assert_eq!(fresh.count, 1);
    }

    #[tokio::test]
    async fn test_try_acquire_caps() {
        let store = WindowStore::new();
        for i in 1..=3 {
            assert_eq!(store.try_acquire("k", MINUTE, 3).unwrap().count, i);
        }

        let full = store.try_acquire("k", MINUTE, 3).unwrap_err();
        assert_eq!(full.count, 3);
        assert_eq!(store.count("k"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_is_scoped_to_window() {
        let store = WindowStore::new();
        let first = store.try_acquire("k", MINUTE, 5).unwrap();

        tokio::time::advance(MINUTE).await;
        store.try_acquire("k", MINUTE, 5).unwrap();

        // Refund for the old window does not touch the new one
        store.release("k", first.reset_at);
        assert_eq!(store.count("k"), 1);

        let current = store.get("k").unwrap();
        store.release("k", current.reset_at);
        assert_eq!(store.count("k"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let store = WindowStore::new();
        store.increment("old", Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(5)).await;
        store.increment("new", Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.count("new"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_task_with_zero_period() {
        let store = Arc::new(WindowStore::new());
        store.increment("k", Duration::from_secs(1));

        let task = spawn_purge_task(store.clone(), Duration::ZERO);
        tokio::time::advance(Duration::from_secs(2)).await;
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }

        assert!(!task.is_finished());
        assert!(store.is_empty());
        task.abort();
    }

    #[tokio::test]
    async fn test_reset_and_clear() {
        let store = WindowStore::new();
        store.increment("a", MINUTE);
        store.increment("b", MINUTE);

        store.reset("a");
        assert_eq!(store.count("a"), 0);
        assert_eq!(store.len(), 1);

        store.clear();
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_never_exceeds_cap() {
        let store = Arc::new(WindowStore::new());
        let mut handles = Vec::new();

        for _ in 0..64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.try_acquire("shared", MINUTE, 10).is_ok()
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 10);
        assert_eq!(store.count("shared"), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_unix_secs_is_in_future() {
        let store = WindowStore::new();
        let snapshot = store.increment("k", MINUTE);
        let now = chrono::Utc::now().timestamp();
        let reset = snapshot.reset_unix_secs();
        assert!(reset >= now + 59 && reset <= now + 61);
    }
}
