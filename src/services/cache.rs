// SPDX-License-Identifier: MIT

//! In-memory TTL cache with single-flight refresh.
//!
//! Expired entries are refetched by exactly one caller per expiry window:
//! concurrent callers for the same key queue behind a per-key lock, and the
//! losers read the winner's fresh entry on the double-check.

use crate::error::AppError;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Keyed TTL cache. Values are cloned out on read.
pub struct SingleFlightCache<V: Clone> {
    entries: DashMap<String, (V, Instant)>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    ttl: Duration,
}

impl<V: Clone> SingleFlightCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            locks: DashMap::new(),
            ttl,
        }
    }

    /// Return the cached value for `key`, or run `fetch` to refresh it.
    ///
    /// A fetch error is not cached; the next caller retries.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> Result<V, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, AppError>>,
    {
        if let Some(entry) = self.entries.get(key) {
            if entry.1 > Instant::now() {
                return Ok(entry.0.clone());
            }
            // Expired - fall through to refresh
        }

        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let _guard = lock.lock().await;

        // Double-check: another task may have refreshed while we waited
        if let Some(entry) = self.entries.get(key) {
            if entry.1 > Instant::now() {
                return Ok(entry.0.clone());
            }
        }

        let value = fetch().await?;
        self.entries
            .insert(key.to_string(), (value.clone(), Instant::now() + self.ttl));

        Ok(value)
    }

    /// Drop the entry for `key`, forcing the next read to refetch.
    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_fresh_entry_served_without_fetch() {
        let cache: SingleFlightCache<u32> = SingleFlightCache::new(Duration::from_secs(60));
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_fetch("k", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .await
                .unwrap();
            assert_eq!(value, 7);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expiry_causes_exactly_one_refetch() {
        let cache: Arc<SingleFlightCache<u32>> =
            Arc::new(SingleFlightCache::new(Duration::from_millis(30)));
        let calls = Arc::new(AtomicU32::new(0));

        let fetch_count = calls.clone();
        cache
            .get_or_fetch("k", || async move {
                fetch_count.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        // After expiry, many concurrent readers trigger a single refetch
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch("k", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(2)
                    })
                    .await
                    .unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 2);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2); // Initial + one refresh
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let cache: SingleFlightCache<u32> = SingleFlightCache::new(Duration::from_secs(60));
        let calls = AtomicU32::new(0);

        let _ = cache
            .get_or_fetch("k", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            })
            .await;

        cache.invalidate("k");

        let _ = cache
            .get_or_fetch("k", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(2)
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_error_not_cached() {
        let cache: SingleFlightCache<u32> = SingleFlightCache::new(Duration::from_secs(60));
        let calls = AtomicU32::new(0);

        let result = cache
            .get_or_fetch("k", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::Upstream("boom".to_string()))
            })
            .await;
        assert!(result.is_err());

        let value = cache
            .get_or_fetch("k", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(3)
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
