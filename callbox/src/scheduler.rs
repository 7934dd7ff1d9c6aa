//! Dispatch pacing: debounce windows and per-key rate limits.
//!
//! The [`RateClock`] remembers when each key last finalized and turns a call's
//! debounce window and minimum spacing into an effective delay. A
//! [`DispatchGate`] holds the resulting deadline for one shared operation;
//! callers that attach to it before dispatch push the deadline out, which
//! makes debounce trailing over all identical calls.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use callbox_core::RequestKey;
use dashmap::DashMap;
use tokio::time::{Instant, sleep_until};
use tracing::trace;

// Roughly thirty years; stands in for "never" when a duration overflows.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// The instant `delay` from now, saturating at a far-future instant.
pub fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay).unwrap_or_else(|| now + FAR_FUTURE)
}

/// Last finalize instant per key.
#[derive(Clone, Debug, Default)]
pub struct RateClock {
    last: Arc<DashMap<RequestKey, Instant>>,
}

impl RateClock {
    /// Creates an empty clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay a call must wait before dispatch.
    ///
    /// `max(debounce, rate_limit - (now - last_finalize))`, where a key that
    /// never finalized imposes no spacing.
    pub fn effective_delay(
        &self,
        key: &RequestKey,
        debounce: Option<Duration>,
        rate_limit: Option<Duration>,
    ) -> Duration {
        let debounce = debounce.unwrap_or_default();
        let spacing = match (rate_limit, self.last.get(key)) {
            (Some(limit), Some(last)) if !limit.is_zero() => {
                limit.saturating_sub(Instant::now().saturating_duration_since(*last))
            }
            _ => Duration::ZERO,
        };
        debounce.max(spacing)
    }

    /// Records that `key` finalized now.
    pub fn mark(&self, key: &RequestKey) {
        self.last.insert(key.clone(), Instant::now());
    }

    /// Last finalize instant of `key`.
    pub fn last(&self, key: &RequestKey) -> Option<Instant> {
        self.last.get(key).map(|last| *last)
    }
}

/// Movable dispatch deadline of one operation.
#[derive(Clone, Debug)]
pub struct DispatchGate {
    deadline: Arc<Mutex<Instant>>,
}

impl DispatchGate {
    /// Gate that opens `delay` from now.
    pub fn after(delay: Duration) -> Self {
        Self {
            deadline: Arc::new(Mutex::new(deadline_after(delay))),
        }
    }

    /// Current deadline.
    pub fn deadline(&self) -> Instant {
        *self.deadline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pushes the deadline to at least `delay` from now. Never moves it earlier.
    pub fn extend(&self, delay: Duration) {
        let target = deadline_after(delay);
        let mut deadline = self.deadline.lock().unwrap_or_else(PoisonError::into_inner);
        if target > *deadline {
            trace!(delay = ?delay, "dispatch deadline extended");
            *deadline = target;
        }
    }

    /// Waits until the deadline passes without having been extended.
    pub async fn wait(&self) {
        loop {
            let deadline = self.deadline();
            if deadline <= Instant::now() {
                return;
            }
            sleep_until(deadline).await;
            if self.deadline() == deadline {
                return;
            }
        }
    }
}
