//! Replay protection for DPoP proofs
//!
//! A proof is identified by its signing key thumbprint and `jti`. The cache records each
//! identifier until its window expires; after that the same identifier is evaluated again
//! from scratch, so entries never poison a `jti` permanently.

use std::fmt;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::{DpopError, Result};

/// Storage for seen proof identifiers
///
/// Implementations must make `check_and_record` atomic: two concurrent calls with the
/// same key must not both return `true`.
#[async_trait]
pub trait ReplayCache: Send + Sync + fmt::Debug {
    /// Record `key` unless an unexpired entry already exists
    ///
    /// Returns `true` if the key was not present (first use), `false` on replay.
    async fn check_and_record(&self, key: &str, now: SystemTime, window: Duration) -> Result<bool>;

    /// Drop entries expired at `now`, returning how many were removed
    async fn purge_expired(&self, now: SystemTime) -> Result<usize>;
}

/// In-process replay cache backed by a sharded concurrent map
#[derive(Debug)]
pub struct MemoryReplayCache {
    entries: DashMap<String, SystemTime>,
    max_entries: usize,
}

impl MemoryReplayCache {
    /// Default soft cap before an inline purge runs
    pub const DEFAULT_MAX_ENTRIES: usize = 100_000;

    /// Create an empty cache
    pub fn new() -> Self {
        Self::with_max_entries(Self::DEFAULT_MAX_ENTRIES)
    }

    /// Create a cache that purges expired entries once it grows past `max_entries`
    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries,
        }
    }

    /// Number of tracked identifiers, expired ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MemoryReplayCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReplayCache for MemoryReplayCache {
    async fn check_and_record(&self, key: &str, now: SystemTime, window: Duration) -> Result<bool> {
        let Some(expires_at) = now.checked_add(window) else {
            return Err(DpopError::ConfigurationError {
                reason: format!("replay window of {}s is out of range", window.as_secs()),
            });
        };

        // The entry guard holds the shard lock across check and insert
        let first_use = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if *entry.get() > now {
                    false
                } else {
                    entry.insert(expires_at);
                    true
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(expires_at);
                true
            }
        };

        if self.entries.len() > self.max_entries {
            self.entries.retain(|_, expiry| *expiry > now);
        }

        Ok(first_use)
    }

    async fn purge_expired(&self, now: SystemTime) -> Result<usize> {
        let before = self.entries.len();
        self.entries.retain(|_, expiry| *expiry > now);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, "purged expired DPoP replay entries");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const WINDOW: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_second_use_within_window_is_replay() {
        let cache = MemoryReplayCache::new();
        let now = SystemTime::now();

        assert!(cache.check_and_record("k:jti-1", now, WINDOW).await.unwrap());
        assert!(!cache
            .check_and_record("k:jti-1", now + Duration::from_secs(30), WINDOW)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_entry_is_reevaluated_after_window() {
        let cache = MemoryReplayCache::new();
        let now = SystemTime::now();

        assert!(cache.check_and_record("k:jti-1", now, WINDOW).await.unwrap());
        let later = now + WINDOW + Duration::from_secs(1);
        assert!(cache.check_and_record("k:jti-1", later, WINDOW).await.unwrap());
        // and the fresh record applies again
        assert!(!cache.check_and_record("k:jti-1", later, WINDOW).await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_removes_only_expired() {
        let cache = MemoryReplayCache::new();
        let now = SystemTime::now();
        cache.check_and_record("old", now, Duration::from_secs(1)).await.unwrap();
        cache.check_and_record("new", now, WINDOW).await.unwrap();

        let removed = cache.purge_expired(now + Duration::from_secs(5)).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_soft_cap_triggers_inline_purge() {
        let cache = MemoryReplayCache::with_max_entries(2);
        let now = SystemTime::now();
        cache.check_and_record("a", now, Duration::from_secs(1)).await.unwrap();
        cache.check_and_record("b", now, Duration::from_secs(1)).await.unwrap();
        let later = now + Duration::from_secs(10);
        cache.check_and_record("c", later, WINDOW).await.unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_presentations_accept_exactly_one() {
        let cache = Arc::new(MemoryReplayCache::new());
        let now = SystemTime::now();

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move {
                    cache.check_and_record("k:shared", now, WINDOW).await.unwrap()
                })
            })
            .collect();

        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
    }
}
