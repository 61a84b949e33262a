//! Fixed-window request throttling backed by an injectable counter store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::repository::RepositoryError;

/// Count observed inside the current window for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    pub count: u32,
    pub resets_at: DateTime<Utc>,
}

/// Shared counters with expiry. A deployment with several replicas would back
/// this with an external store; the in-memory version serves a single process.
pub trait CounterStore: Send + Sync {
    fn increment(
        &self,
        key: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<WindowCount, RepositoryError>;
}

#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    counters: Mutex<HashMap<String, WindowCount>>,
}

impl CounterStore for InMemoryCounterStore {
    fn increment(
        &self,
        key: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<WindowCount, RepositoryError> {
        let mut counters = self
            .counters
            .lock()
            .map_err(|_| RepositoryError::Unavailable("counter mutex poisoned".to_string()))?;

        counters.retain(|_, entry| entry.resets_at > now);

        let resets_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let entry = counters.entry(key.to_string()).or_insert(WindowCount {
            count: 0,
            resets_at,
        });
        entry.count = entry.count.saturating_add(1);
        Ok(*entry)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub retry_after_secs: u64,
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, limit: u32, window: Duration) -> Self {
        Self {
            store,
            limit,
            window,
        }
    }

    pub fn in_memory(limit: u32, window: Duration) -> Self {
        Self::new(Arc::new(InMemoryCounterStore::default()), limit, window)
    }

    pub fn check(&self, key: &str, now: DateTime<Utc>) -> Result<RateDecision, RepositoryError> {
        let observed = self.store.increment(key, self.window, now)?;
        let allowed = observed.count <= self.limit;
        let retry_after_secs = if allowed {
            0
        } else {
            u64::try_from((observed.resets_at - now).num_seconds())
                .unwrap_or(0)
                .max(1)
        };

        Ok(RateDecision {
            allowed,
            remaining: self.limit.saturating_sub(observed.count),
            retry_after_secs,
        })
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("limit", &self.limit)
            .field("window", &self.window)
            .finish()
    }
}
