//! Quota key locking and eligibility rules.
//!
//! [`QuotaLockManager`] hands out one async mutex per quota key so the
//! check-then-deduct sequence of a submission never interleaves with another
//! submission using the same key. Different keys never contend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};

// ---------------------------------------------------------------------------
// Lock manager
// ---------------------------------------------------------------------------

/// One lazily created lock plus its last-use stamp.
struct KeyLock {
    mutex: Arc<Mutex<()>>,
    /// Milliseconds since the manager epoch.
    last_used_ms: AtomicU64,
}

impl KeyLock {
    fn new(now_ms: u64) -> Self {
        Self {
            mutex: Arc::new(Mutex::new(())),
            last_used_ms: AtomicU64::new(now_ms),
        }
    }
}

/// Map from quota key to a lazily created mutex.
///
/// Creation is an atomic get-or-insert on a sharded map, so concurrent first
/// use of a key always ends up sharing a single mutex. Entries are only
/// removed by [`QuotaLockManager::prune_idle`].
pub struct QuotaLockManager {
    locks: DashMap<String, KeyLock>,
    epoch: Instant,
}

/// Exclusive hold on one quota key. Released on drop.
#[must_use = "the quota key is unlocked as soon as the guard is dropped"]
pub struct QuotaLockGuard {
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl QuotaLockGuard {
    /// The quota key this guard holds.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Debug for QuotaLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaLockGuard")
            .field("key", &self.key)
            .finish()
    }
}

impl Default for QuotaLockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl QuotaLockManager {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
            epoch: Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock_for(&self, key: &str) -> QuotaLockGuard {
        let now = self.now_ms();
        // The shard guard must be gone before we await the mutex.
        let mutex = {
            let entry = self
                .locks
                .entry(key.to_owned())
                .or_insert_with(|| KeyLock::new(now));
            entry.last_used_ms.store(now, Ordering::Relaxed);
            Arc::clone(&entry.mutex)
        };

        let guard = mutex.lock_owned().await;
        QuotaLockGuard {
            key: key.to_owned(),
            _guard: guard,
        }
    }

    /// Drop locks that nobody holds or waits on and that have not been
    /// requested for at least `max_idle`. Returns the number removed.
    ///
    /// Holders and waiters keep a clone of the mutex `Arc`, so a strong count
    /// of one means the map owns the only reference. The check runs under the
    /// shard write lock, which `lock_for` also needs, so a key cannot be
    /// re-acquired halfway through removal.
    pub fn prune_idle(&self, max_idle: Duration) -> usize {
        let now = self.now_ms();
        let max_idle_ms = max_idle.as_millis() as u64;
        let mut removed = 0usize;

        self.locks.retain(|_, entry| {
            let in_use = Arc::strong_count(&entry.mutex) > 1;
            let idle_ms = now.saturating_sub(entry.last_used_ms.load(Ordering::Relaxed));
            let keep = in_use || idle_ms < max_idle_ms;
            if !keep {
                removed += 1;
            }
            keep
        });

        if removed > 0 {
            tracing::debug!(removed, remaining = self.locks.len(), "Pruned idle quota locks");
        }
        removed
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Eligibility
// ---------------------------------------------------------------------------

/// Outcome of checking a quota key against the cost of one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    /// The key may pay for the submission.
    Granted { remaining: i32 },
    /// The key exists but an administrator disabled it.
    Disabled,
    /// The key has no uses left at all.
    Exhausted,
    /// The key has uses left, but fewer than the environment charges.
    Insufficient { required: i32, remaining: i32 },
}

impl QuotaDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted { .. })
    }

    /// Caller-facing explanation of the decision.
    pub fn message(&self) -> String {
        match self {
            Self::Granted { .. } => "Quota key is valid".to_string(),
            Self::Disabled => "Quota key is disabled".to_string(),
            Self::Exhausted => "Quota key has no remaining uses".to_string(),
            Self::Insufficient {
                required,
                remaining,
            } => format!(
                "Insufficient quota: {required} use(s) required, {remaining} remaining"
            ),
        }
    }
}

/// Decide whether a key with the given state can pay `cost` uses.
pub fn evaluate_quota(is_enabled: bool, remaining: i32, cost: i32) -> QuotaDecision {
    if !is_enabled {
        return QuotaDecision::Disabled;
    }
    if remaining <= 0 {
        return QuotaDecision::Exhausted;
    }
    if remaining < cost {
        return QuotaDecision::Insufficient {
            required: cost,
            remaining,
        };
    }
    QuotaDecision::Granted { remaining }
}

/// Standalone key check (no submission attached).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaCheck {
    pub valid: bool,
    pub remaining_uses: i32,
    pub message: String,
}

impl QuotaCheck {
    pub fn missing() -> Self {
        Self {
            valid: false,
            remaining_uses: 0,
            message: "Quota key does not exist".to_string(),
        }
    }

    /// Build a check result from a stored key, as if one use were requested.
    pub fn from_state(is_enabled: bool, remaining: i32) -> Self {
        let decision = evaluate_quota(is_enabled, remaining, 1);
        Self {
            valid: decision.is_granted(),
            remaining_uses: remaining.max(0),
            message: decision.message(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
