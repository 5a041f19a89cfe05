//! Read-through cache with coalesced refresh.
//!
//! `get_or_load(key, loader)` returns the cached value while it is fresh and
//! otherwise invokes `loader`; concurrent misses on the same key invoke the
//! loader at most once. Expiration is absolute, not sliding. A zero TTL
//! disables caching entirely. When a loader fails, any previously stored
//! value is left in place (stale, but not evicted) and the error is returned
//! to the caller.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

struct Slot<V> {
    value: Option<(V, Instant)>,
}

/// Absolute-TTL read-through cache.
pub struct Expiring<K, V> {
    ttl: Duration,
    slots: RwLock<HashMap<K, Arc<Mutex<Slot<V>>>>>,
}

impl<K, V> Expiring<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Return the cached value for `key`, invoking `loader` on a miss.
    ///
    /// The per-key slot lock is held across the load, which is what
    /// coalesces concurrent misses: waiters acquire the lock after the load
    /// completes and are served the freshly stored value. Entries for other
    /// keys are not blocked.
    ///
    /// # Errors
    ///
    /// Propagates the loader's error. The slot keeps its previous value.
    pub async fn get_or_load<F, Fut, E>(&self, key: K, loader: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let slot = self.slot(key).await;
        let mut guard = slot.lock().await;

        if let Some((value, stored_at)) = guard.value.as_ref() {
            if !self.ttl.is_zero() && stored_at.elapsed() < self.ttl {
                return Ok(value.clone());
            }
        }

        let value = loader().await?;
        if !self.ttl.is_zero() {
            guard.value = Some((value.clone(), Instant::now()));
        }
        Ok(value)
    }

    async fn slot(&self, key: K) -> Arc<Mutex<Slot<V>>> {
        if let Some(slot) = self.slots.read().await.get(&key) {
            return Arc::clone(slot);
        }

        let mut slots = self.slots.write().await;
        Arc::clone(
            slots
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(Slot { value: None }))),
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_fresh_value_served_without_reload() {
        let cache: Expiring<&str, u64> = Expiring::new(Duration::from_secs(60));
        let loads = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_load("key", || async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ()>(42)
                })
                .await
                .unwrap();
            assert_eq!(value, 42);
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_disables_caching() {
        let cache: Expiring<&str, u64> = Expiring::new(Duration::ZERO);
        let loads = AtomicUsize::new(0);

        for _ in 0..3 {
            cache
                .get_or_load("key", || async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ()>(42)
                })
                .await
                .unwrap();
        }

        assert_eq!(loads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_concurrent_misses_invoke_loader_once() {
        let cache: Arc<Expiring<&'static str, u64>> =
            Arc::new(Expiring::new(Duration::from_secs(60)));
        let loads = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let loads = Arc::clone(&loads);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_load("key", || async move {
                        loads.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, ()>(7)
                    })
                    .await
                    .unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 7);
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_coalesce() {
        let cache: Expiring<u32, u32> = Expiring::new(Duration::from_secs(60));
        let loads = AtomicUsize::new(0);

        for key in 0..4 {
            cache
                .get_or_load(key, || async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ()>(key * 2)
                })
                .await
                .unwrap();
        }

        assert_eq!(loads.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_loader_error_propagates_and_next_load_retries() {
        let cache: Expiring<&str, u64> = Expiring::new(Duration::from_secs(60));

        let result = cache
            .get_or_load("key", || async { Err::<u64, &str>("boom") })
            .await;
        assert_eq!(result, Err("boom"));

        let value = cache
            .get_or_load("key", || async { Ok::<_, &str>(9) })
            .await
            .unwrap();
        assert_eq!(value, 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_absolute_expiration_reloads() {
        let cache: Expiring<&str, u64> = Expiring::new(Duration::from_millis(50));
        let loads = AtomicUsize::new(0);

        let load = |value: u64| {
            let loads = &loads;
            move || async move {
                loads.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ()>(value)
            }
        };

        assert_eq!(cache.get_or_load("key", load(1)).await.unwrap(), 1);

        tokio::time::advance(Duration::from_millis(60)).await;

        assert_eq!(cache.get_or_load("key", load(2)).await.unwrap(), 2);
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }
}
