//! Key/value map with a lifetime per entry.
//!
//! Every live entry owns a one-shot timer task that removes it when it
//! expires. Timers are tagged with the generation of the entry that armed
//! them, so a timer left over from an overwritten entry never removes its
//! successor. Reads check the deadline themselves and never return a stale
//! value even if the timer has not fired yet, or could not be spawned
//! because no tokio runtime was running.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::Instant;

struct Entry<V> {
    value: V,
    expires_at: Instant,
    generation: u64,
    timer: Option<AbortHandle>,
}

impl<V> Entry<V> {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }

    fn cancel(&self) {
        if let Some(timer) = &self.timer {
            timer.abort();
        }
    }
}

type Map<V> = RwLock<HashMap<String, Entry<V>>>;

pub struct TimeCache<V = String> {
    entries: Arc<Map<V>>,
    generation: AtomicU64,
}

impl<V> Default for TimeCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> TimeCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Entry<V>>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Entry<V>>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Inserts or replaces `key`, resetting its deadline to now + `ttl`.
    pub fn register(&self, key: &str, value: V, ttl: Duration) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let expires_at = Instant::now() + ttl;

        let mut entries = self.write();
        let timer = arm_timer(Arc::downgrade(&self.entries), key, generation, expires_at);

        let entry = Entry {
            value,
            expires_at,
            generation,
            timer,
        };

        if let Some(previous) = entries.insert(key.to_string(), entry) {
            previous.cancel();
        }
    }

    /// Returns the value if present and not yet expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        self.read()
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone())
    }

    /// Time left before `key` expires.
    pub fn remaining(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.read()
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.expires_at - now)
    }

    /// Removes `key` immediately and cancels its timer.
    pub fn delete(&self, key: &str) -> Option<V> {
        let removed = self.write().remove(key)?;
        removed.cancel();
        Some(removed.value)
    }

    /// Removes `key` and returns its value if it was still live. The check
    /// and the removal happen under one lock, so of several concurrent
    /// takers at most one gets the value.
    pub fn take(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let removed = self.write().remove(key)?;
        removed.cancel();
        removed.is_live(now).then_some(removed.value)
    }

    /// Drops entries whose deadline has passed. Only needed when entries
    /// were registered outside a tokio runtime.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        before - entries.len()
    }

    /// Number of stored entries, including expired ones not yet reaped.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn arm_timer<V>(
    entries: Weak<Map<V>>,
    key: &str,
    generation: u64,
    expires_at: Instant,
) -> Option<AbortHandle>
where
    V: Send + Sync + 'static,
{
    let handle = Handle::try_current().ok()?;
    let key = key.to_string();

    let task = handle.spawn(async move {
        tokio::time::sleep_until(expires_at).await;

        let Some(entries) = entries.upgrade() else {
            return;
        };
        let mut entries = entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.get(&key).is_some_and(|e| e.generation == generation) {
            entries.remove(&key);
        }
    });

    Some(task.abort_handle())
}

impl<V> Drop for TimeCache<V> {
    fn drop(&mut self) {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        for entry in entries.values() {
            entry.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(10);

    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_before_and_after_expiry() {
        let cache = TimeCache::new();
        cache.register("k", "v".to_string(), TTL);

        tokio::time::advance(TTL - Duration::from_millis(1)).await;
        assert_eq!(cache.get("k").as_deref(), Some("v"));

        tokio::time::advance(Duration::from_millis(2)).await;
        assert_eq!(cache.get("k"), None);

        settle().await;
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reregister_resets_deadline() {
        let cache = TimeCache::new();
        cache.register("k", "v1".to_string(), TTL);

        tokio::time::advance(Duration::from_secs(6)).await;
        cache.register("k", "v2".to_string(), TTL);

        // The first entry's deadline passes; its timer must not remove v2.
        tokio::time::advance(Duration::from_secs(6)).await;
        settle().await;
        assert_eq!(cache.get("k").as_deref(), Some("v2"));

        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_cancels() {
        let cache = TimeCache::new();
        cache.register("k", "v".to_string(), TTL);
        assert_eq!(cache.delete("k").as_deref(), Some("v"));
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.delete("k"), None);

        cache.register("k", "again".to_string(), TTL);
        assert_eq!(cache.get("k").as_deref(), Some("again"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_removes_once() {
        let cache = TimeCache::new();
        cache.register("k", "v".to_string(), TTL);
        assert_eq!(cache.take("k").as_deref(), Some("v"));
        assert_eq!(cache.take("k"), None);
        assert_eq!(cache.get("k"), None);

        cache.register("k", "late".to_string(), TTL);
        tokio::time::advance(TTL + Duration::from_millis(1)).await;
        assert_eq!(cache.take("k"), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registers_keep_last_writer() {
        let cache = Arc::new(TimeCache::new());
        let mut tasks = Vec::new();

        for i in 0..32 {
            let cache = Arc::clone(&cache);
            tasks.push(tokio::spawn(async move {
                cache.register("shared", format!("v{i}"), Duration::from_millis(20 + i));
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        assert!(cache.get("shared").is_some());
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(cache.get("shared"), None);
    }

    #[test]
    fn test_without_runtime_falls_back_to_lazy_expiry() {
        let cache = TimeCache::new();
        cache.register("k", "v".to_string(), Duration::from_millis(5));
        assert_eq!(cache.get("k").as_deref(), Some("v"));

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }
}
