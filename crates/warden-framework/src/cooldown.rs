//! Per-(user, handler) cooldown tracking.
//!
//! Each entry holds the absolute instant at which the user may invoke the
//! handler again. A live entry is never re-armed by further attempts; the
//! caller is told how many whole seconds remain, rounded up.
//!
//! Entries are removed once their window passes, either lazily on the next
//! check for the same key or by a cleanup task scheduled when the entry is
//! armed. The runtime additionally calls [`CooldownTracker::purge_expired`]
//! on its maintenance tick, so an idle user leaves no residual state.
//!
//! All instants come from [`tokio::time`], which lets tests drive the
//! tracker with a paused clock.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::trace;

/// Longest cooldown a handler or the engine default may declare: 30 days.
pub const MAX_COOLDOWN_SECS: u64 = 30 * 24 * 60 * 60;

type CooldownKey = (String, String);
type Entries = Mutex<HashMap<CooldownKey, Instant>>;

/// Result of [`CooldownTracker::check_and_arm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownStatus {
    /// The invocation may proceed; a new window was armed if the cooldown is
    /// non-zero.
    Ready,
    /// A window is still open.
    Active {
        /// Whole seconds until the window closes, rounded up. Always ≥ 1.
        remaining_secs: u64,
    },
}

impl CooldownStatus {
    /// Returns `true` if the invocation is blocked.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }
}

/// Shared cooldown map. Cloning yields another handle to the same map.
#[derive(Debug, Clone, Default)]
pub struct CooldownTracker {
    entries: Arc<Entries>,
}

impl CooldownTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks the window for `(user, handler)` and arms a new one if none is
    /// open.
    ///
    /// The read and the write happen under one lock, so two concurrent
    /// invocations by the same user can never both pass. Windows longer than
    /// [`MAX_COOLDOWN_SECS`] are clamped to it.
    pub fn check_and_arm(&self, user: &str, handler: &str, cooldown_secs: u64) -> CooldownStatus {
        if cooldown_secs == 0 {
            return CooldownStatus::Ready;
        }

        let now = Instant::now();
        let key = (user.to_string(), handler.to_string());
        let mut entries = self.entries.lock();

        if let Some(&expiry) = entries.get(&key) {
            if now < expiry {
                return CooldownStatus::Active {
                    remaining_secs: ceil_secs(expiry - now),
                };
            }
            entries.remove(&key);
        }

        let expiry = now + Duration::from_secs(cooldown_secs.min(MAX_COOLDOWN_SECS));
        entries.insert(key.clone(), expiry);
        drop(entries);

        trace!(user, handler, cooldown_secs, "Cooldown armed");
        self.schedule_cleanup(key, expiry);
        CooldownStatus::Ready
    }

    /// Removes every cooldown belonging to `user`. Returns how many were
    /// removed.
    pub fn clear_user(&self, user: &str) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(u, _), _| u != user);
        before - entries.len()
    }

    /// Number of windows that are still open.
    pub fn active_count(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().values().filter(|&&e| e > now).count()
    }

    /// Drops every entry whose window has passed. Returns how many were
    /// dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, expiry| *expiry > now);
        before - entries.len()
    }

    fn schedule_cleanup(&self, key: CooldownKey, expiry: Instant) {
        // Outside a runtime the entry is evicted lazily or by `purge_expired`.
        let Ok(handle) = Handle::try_current() else {
            return;
        };
        let entries: Weak<Entries> = Arc::downgrade(&self.entries);
        handle.spawn(async move {
            tokio::time::sleep_until(expiry).await;
            if let Some(entries) = entries.upgrade() {
                let mut entries = entries.lock();
                // A newer window may have been armed for the same key.
                if entries.get(&key).is_some_and(|e| *e <= Instant::now()) {
                    entries.remove(&key);
                }
            }
        });
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}
