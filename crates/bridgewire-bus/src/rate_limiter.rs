//! # Rate Limiter
//!
//! Fixed-window inbound throttling, one counter per sender, attached to a bridge.
//!
//! ## State machine (per sender)
//!
//! ```text
//! Idle(count, window_start)
//!   on message: if now - window_start >= window -> count = 0, window_start = now
//!               count += 1
//!               count <= ceiling -> accept
//!               count >  ceiling -> Overflow: ask the handler, reject unless it allows
//! ```

use bridgewire_types::Sender;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// What an overflow handler wants done with the offending message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowDecision {
    /// Drop the message. No subscriber sees it.
    Reject,
    /// Let it through anyway.
    Allow,
}

/// Called with the sender and its count in the current window.
pub type OverflowHandler = Arc<dyn Fn(&Sender, u32) -> OverflowDecision + Send + Sync>;

/// Ceiling, window length and overflow handler for one bridge.
#[derive(Clone)]
pub struct RateLimitPolicy {
    max_per_window: u32,
    window: Duration,
    on_overflow: Option<OverflowHandler>,
}

impl RateLimitPolicy {
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            on_overflow: None,
        }
    }

    /// Install the overflow handler. Without one, overflowing messages are rejected.
    #[must_use]
    pub fn on_overflow(
        mut self,
        handler: impl Fn(&Sender, u32) -> OverflowDecision + Send + Sync + 'static,
    ) -> Self {
        self.on_overflow = Some(Arc::new(handler));
        self
    }

    pub fn max_per_window(&self) -> u32 {
        self.max_per_window
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

impl fmt::Debug for RateLimitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitPolicy")
            .field("max_per_window", &self.max_per_window)
            .field("window", &self.window)
            .field("on_overflow", &self.on_overflow.is_some())
            .finish()
    }
}

/// Counter for one (bridge, sender) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitState {
    pub count: u32,
    pub window_start: Instant,
}

impl RateLimitState {
    pub(crate) fn new(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
        }
    }

    /// Roll the window if it has elapsed, then count one message.
    pub(crate) fn record(&mut self, now: Instant, window: Duration) -> u32 {
        if now.saturating_duration_since(self.window_start) >= window {
            self.count = 0;
            self.window_start = now;
        }
        self.count = self.count.saturating_add(1);
        self.count
    }
}

/// Outcome of [`RateLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateVerdict {
    /// Within the ceiling.
    Accept,
    /// Over the ceiling, let through by the handler.
    AllowedOverflow { count: u32 },
    /// Over the ceiling and dropped.
    Reject { count: u32 },
}

impl RateVerdict {
    pub fn is_accepted(self) -> bool {
        !matches!(self, RateVerdict::Reject { .. })
    }
}

/// Per-sender counters under one policy.
pub struct RateLimiter {
    policy: RateLimitPolicy,
    states: Mutex<HashMap<Sender, RateLimitState>>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Count one inbound message from `sender` at `now`.
    ///
    /// The counter update completes before the overflow handler runs; the
    /// handler is never called with the lock held.
    pub fn check(&self, sender: &Sender, now: Instant) -> RateVerdict {
        let count = {
            let mut states = self.states.lock();
            states
                .entry(*sender)
                .or_insert_with(|| RateLimitState::new(now))
                .record(now, self.policy.window)
        };

        if count <= self.policy.max_per_window {
            return RateVerdict::Accept;
        }

        let decision = match &self.policy.on_overflow {
            Some(handler) => handler(sender, count),
            None => OverflowDecision::Reject,
        };

        match decision {
            OverflowDecision::Allow => RateVerdict::AllowedOverflow { count },
            OverflowDecision::Reject => RateVerdict::Reject { count },
        }
    }

    /// Current state for a sender, if it has ever sent.
    pub fn state(&self, sender: &Sender) -> Option<RateLimitState> {
        self.states.lock().get(sender).copied()
    }

    /// Drop a sender's counter.
    pub fn forget(&self, sender: &Sender) {
        self.states.lock().remove(sender);
    }

    pub fn tracked_senders(&self) -> usize {
        self.states.lock().len()
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("policy", &self.policy)
            .field("tracked_senders", &self.tracked_senders())
            .finish()
    }
}
