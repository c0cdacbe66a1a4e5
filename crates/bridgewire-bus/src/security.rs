//! # Security Validator
//!
//! Hub-side screening of raw inbound traffic, applied before any bridge sees a
//! message. Three checks run in order:
//!
//! 1. **Volume**: a sender's aggregate message count across every channel
//!    (control traffic included) exceeds the global ceiling for the window.
//! 2. **Malformed shape**: the raw data is not an argument list.
//! 3. **Type mismatch**: the decoded payload does not satisfy the
//!    [`TypeContract`] declared for that channel.
//!
//! The first failing check drops the message and fires the hook installed for
//! that category, if any. Hooks exist for side effects only; they cannot
//! rescue the message.

use crate::rate_limiter::RateLimitState;
use bridgewire_telemetry::{drop_reason, record_drop};
use bridgewire_types::{Payload, PeerId, Sender, TypeContract};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

pub type ViolationHook = Arc<dyn Fn(&PeerId) + Send + Sync>;
pub type VolumeHook = Arc<dyn Fn(&PeerId, u32) + Send + Sync>;

// =============================================================================
// HOOKS
// =============================================================================

/// Violation categories, one hook slot each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationKind {
    MalformedShape,
    TypeMismatch,
    VolumeOverflow,
}

impl ViolationKind {
    fn drop_reason(self) -> &'static str {
        match self {
            ViolationKind::MalformedShape => drop_reason::MALFORMED_SHAPE,
            ViolationKind::TypeMismatch => drop_reason::TYPE_MISMATCH,
            ViolationKind::VolumeOverflow => drop_reason::VOLUME_OVERFLOW,
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ViolationKind::MalformedShape => "malformed-shape",
            ViolationKind::TypeMismatch => "type-mismatch",
            ViolationKind::VolumeOverflow => "volume-overflow",
        })
    }
}

/// A handler for one violation category.
#[derive(Clone)]
pub enum SecurityHook {
    MalformedShape(ViolationHook),
    TypeMismatch(ViolationHook),
    /// Receives the sender's count in the current volume window.
    VolumeOverflow(VolumeHook),
}

impl SecurityHook {
    pub fn malformed_shape(hook: impl Fn(&PeerId) + Send + Sync + 'static) -> Self {
        SecurityHook::MalformedShape(Arc::new(hook))
    }

    pub fn type_mismatch(hook: impl Fn(&PeerId) + Send + Sync + 'static) -> Self {
        SecurityHook::TypeMismatch(Arc::new(hook))
    }

    pub fn volume_overflow(hook: impl Fn(&PeerId, u32) + Send + Sync + 'static) -> Self {
        SecurityHook::VolumeOverflow(Arc::new(hook))
    }

    pub fn kind(&self) -> ViolationKind {
        match self {
            SecurityHook::MalformedShape(_) => ViolationKind::MalformedShape,
            SecurityHook::TypeMismatch(_) => ViolationKind::TypeMismatch,
            SecurityHook::VolumeOverflow(_) => ViolationKind::VolumeOverflow,
        }
    }
}

impl fmt::Debug for SecurityHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecurityHook({})", self.kind())
    }
}

enum Fired {
    Peer(ViolationHook),
    Volume(VolumeHook),
}

#[derive(Default)]
struct HookSlots {
    malformed_shape: Option<ViolationHook>,
    type_mismatch: Option<ViolationHook>,
    volume_overflow: Option<VolumeHook>,
}

// =============================================================================
// VALIDATOR
// =============================================================================

/// Hook slots, per-channel type contracts and per-sender volume counters.
pub struct SecurityValidator {
    volume_ceiling: u32,
    volume_window: Duration,
    hooks: RwLock<HookSlots>,
    contracts: RwLock<HashMap<String, TypeContract>>,
    volume: Mutex<HashMap<PeerId, RateLimitState>>,
}

impl SecurityValidator {
    pub fn new(volume_ceiling: u32, volume_window: Duration) -> Self {
        Self {
            volume_ceiling,
            volume_window,
            hooks: RwLock::new(HookSlots::default()),
            contracts: RwLock::new(HashMap::new()),
            volume: Mutex::new(HashMap::new()),
        }
    }

    /// Install a hook, replacing the previous one of the same category.
    pub fn install(&self, hook: SecurityHook) {
        let kind = hook.kind();
        let mut slots = self.hooks.write();
        match hook {
            SecurityHook::MalformedShape(h) => slots.malformed_shape = Some(h),
            SecurityHook::TypeMismatch(h) => slots.type_mismatch = Some(h),
            SecurityHook::VolumeOverflow(h) => slots.volume_overflow = Some(h),
        }
        debug!(category = %kind, "Security hook installed");
    }

    /// Declare the argument types expected on a channel. Replaces any earlier contract.
    pub fn expect_types(&self, channel: &str, contract: TypeContract) {
        self.contracts.write().insert(channel.to_string(), contract);
    }

    pub fn contract(&self, channel: &str) -> Option<TypeContract> {
        self.contracts.read().get(channel).cloned()
    }

    /// Screen one raw inbound message.
    ///
    /// `channel` is the resolved channel name, or `None` for control traffic.
    /// Returns the decoded payload if every check passes.
    pub fn screen(
        &self,
        sender: &Sender,
        channel: Option<&str>,
        raw: Value,
        now: Instant,
    ) -> Option<Payload> {
        let Some(peer) = sender.peer() else {
            return Payload::from_raw(raw).ok();
        };

        let count = {
            let mut volume = self.volume.lock();
            volume
                .entry(peer)
                .or_insert_with(|| RateLimitState::new(now))
                .record(now, self.volume_window)
        };
        if count > self.volume_ceiling {
            self.violation(ViolationKind::VolumeOverflow, &peer, count, channel);
            return None;
        }

        let payload = match Payload::from_raw(raw) {
            Ok(payload) => payload,
            Err(_) => {
                self.violation(ViolationKind::MalformedShape, &peer, count, channel);
                return None;
            }
        };

        if let Some(name) = channel {
            let mismatched = self
                .contracts
                .read()
                .get(name)
                .is_some_and(|contract| !contract.matches(&payload));
            if mismatched {
                self.violation(ViolationKind::TypeMismatch, &peer, count, channel);
                return None;
            }
        }

        Some(payload)
    }

    /// Forget a departed peer's volume counter.
    pub fn forget(&self, peer: &PeerId) {
        self.volume.lock().remove(peer);
    }

    fn violation(&self, kind: ViolationKind, peer: &PeerId, count: u32, channel: Option<&str>) {
        record_drop(kind.drop_reason());

        let fired = {
            let slots = self.hooks.read();
            match kind {
                ViolationKind::MalformedShape => slots.malformed_shape.clone().map(Fired::Peer),
                ViolationKind::TypeMismatch => slots.type_mismatch.clone().map(Fired::Peer),
                ViolationKind::VolumeOverflow => slots.volume_overflow.clone().map(Fired::Volume),
            }
        };

        match fired {
            Some(hook) => {
                info!(
                    sender = %peer,
                    category = %kind,
                    channel = channel.unwrap_or("<control>"),
                    count,
                    "Inbound message dropped by security hook"
                );
                match hook {
                    Fired::Peer(hook) => hook(peer),
                    Fired::Volume(hook) => hook(peer, count),
                }
            }
            None => {
                debug!(
                    sender = %peer,
                    category = %kind,
                    channel = channel.unwrap_or("<control>"),
                    "Inbound message dropped, no hook installed"
                );
            }
        }
    }
}

impl fmt::Debug for SecurityValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityValidator")
            .field("volume_ceiling", &self.volume_ceiling)
            .field("volume_window", &self.volume_window)
            .field("contracts", &self.contracts.read().len())
            .finish()
    }
}
