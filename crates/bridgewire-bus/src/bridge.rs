//! # Bridge
//!
//! A named pub/sub channel bound to one registry token.
//!
//! Every `Endpoint::bridge` call builds a fresh bridge, even for a name that
//! already has one. Bridges on the same name share the wire token but keep
//! their own subscribers, middleware and rate limit.
//!
//! ## Inbound path (per accepted message)
//!
//! ```text
//! rate limit (per sender) -> inbound middleware -> subscribers, in registration order
//! ```
//!
//! ## Outbound path
//!
//! ```text
//! publish(target, payload) -> outbound middleware -> transport.enqueue(target, token, payload)
//! ```
//!
//! After [`Bridge::destroy`] every operation returns [`BridgeError::Destroyed`].

use crate::endpoint::EndpointShared;
use crate::middleware::{InboundPipeline, OutboundPipeline};
use crate::rate_limiter::{OverflowDecision, RateLimitPolicy, RateLimiter, RateVerdict};
use crate::subscriber::{InboundStream, SubscriberSet, Subscription, SubscriptionGuard};
use bridgewire_telemetry::{
    drop_reason, log_channel_event, metric_inc, record_drop, time_histogram, BRIDGES_ACTIVE,
    DELIVERY_DURATION, MESSAGES_PUBLISHED,
};
use bridgewire_types::{BridgeError, Identifier, Payload, Sender, Target, Token};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

struct BridgeState {
    token: Token,
    outbound: OutboundPipeline,
    inbound: InboundPipeline,
    rate_limiter: Option<Arc<RateLimiter>>,
}

pub(crate) struct BridgeInner {
    name: String,
    endpoint: Arc<EndpointShared>,
    /// `None` once destroyed.
    state: RwLock<Option<BridgeState>>,
    subscribers: Arc<Mutex<SubscriberSet>>,
}

impl BridgeInner {
    pub(crate) fn new(name: &str, token: Token, endpoint: Arc<EndpointShared>) -> Arc<Self> {
        BRIDGES_ACTIVE.inc();
        log_channel_event!(debug, endpoint.role(), "Bridge created", name, token = %token);
        Arc::new(Self {
            name: name.to_string(),
            endpoint,
            state: RwLock::new(Some(BridgeState {
                token,
                outbound: OutboundPipeline::default(),
                inbound: InboundPipeline::default(),
                rate_limiter: None,
            })),
            subscribers: Arc::new(Mutex::new(SubscriberSet::default())),
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    fn destroyed(&self) -> BridgeError {
        BridgeError::Destroyed {
            channel: self.name.clone(),
        }
    }

    fn read<R>(&self, f: impl FnOnce(&BridgeState) -> R) -> Result<R, BridgeError> {
        self.state
            .read()
            .as_ref()
            .map(f)
            .ok_or_else(|| self.destroyed())
    }

    fn write<R>(&self, f: impl FnOnce(&mut BridgeState) -> R) -> Result<R, BridgeError> {
        self.state
            .write()
            .as_mut()
            .map(f)
            .ok_or_else(|| self.destroyed())
    }

    /// Switch a degraded bridge to the compact token once it is known.
    pub(crate) fn upgrade(&self, compact: &Token) {
        let mut state = self.state.write();
        if let Some(state) = state.as_mut() {
            if state.token.as_str() == self.name && state.token != *compact {
                debug!(channel = %self.name, token = %compact, "Bridge upgraded to compact token");
                state.token = compact.clone();
            }
        }
    }

    pub(crate) fn forget_sender(&self, sender: &Sender) {
        if let Ok(Some(limiter)) = self.read(|s| s.rate_limiter.clone()) {
            limiter.forget(sender);
        }
    }

    /// Run one accepted inbound message through rate limit, middleware and fan-out.
    pub(crate) fn deliver(&self, sender: Sender, payload: Payload) {
        let Ok((limiter, inbound)) = self.read(|s| (s.rate_limiter.clone(), s.inbound.clone()))
        else {
            return;
        };
        let _timer = time_histogram!(DELIVERY_DURATION);

        if let Some(limiter) = limiter {
            match limiter.check(&sender, Instant::now()) {
                RateVerdict::Accept => {}
                RateVerdict::AllowedOverflow { count } => {
                    debug!(
                        channel = %self.name,
                        sender = %sender,
                        count,
                        "Rate limit exceeded, overflow handler let the message through"
                    );
                }
                RateVerdict::Reject { count } => {
                    record_drop(drop_reason::RATE_LIMITED);
                    debug!(
                        channel = %self.name,
                        sender = %sender,
                        count,
                        "Rate limit exceeded, message dropped"
                    );
                    return;
                }
            }
        }

        let payload = inbound.run(&self.name, &sender, payload);
        SubscriberSet::fan_out(&self.subscribers, &sender, &payload);
    }
}

impl Drop for BridgeInner {
    fn drop(&mut self) {
        if self.state.get_mut().is_some() {
            BRIDGES_ACTIVE.dec();
        }
    }
}

/// Handle to a bridge. Clones refer to the same bridge.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl Bridge {
    pub(crate) fn from_inner(inner: Arc<BridgeInner>) -> Self {
        Self { inner }
    }

    /// Channel name. Available after destroy.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current wire token. Degraded peer bridges report the uncompressed name.
    pub fn token(&self) -> Result<Token, BridgeError> {
        self.inner.read(|s| s.token.clone())
    }

    pub fn identifier(&self) -> Result<Identifier, BridgeError> {
        Ok(Identifier::new(self.inner.name.clone(), self.token()?))
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.state.read().is_none()
    }

    pub fn subscriber_count(&self) -> Result<usize, BridgeError> {
        self.inner.read(|_| ())?;
        Ok(self.inner.subscribers.lock().len())
    }

    // =========================================================================
    // SUBSCRIBE
    // =========================================================================

    /// Register a callback for every accepted inbound message.
    pub fn connect(
        &self,
        callback: impl Fn(&Sender, &Payload) + Send + Sync + 'static,
    ) -> Result<Subscription, BridgeError> {
        self.subscribe(Arc::new(callback), false)
    }

    /// Register a callback for the next accepted inbound message only.
    pub fn once(
        &self,
        callback: impl Fn(&Sender, &Payload) + Send + Sync + 'static,
    ) -> Result<Subscription, BridgeError> {
        self.subscribe(Arc::new(callback), true)
    }

    fn subscribe(
        &self,
        callback: crate::subscriber::Callback,
        once: bool,
    ) -> Result<Subscription, BridgeError> {
        self.inner.read(|_| ())?;
        SubscriberSet::add(&self.inner.subscribers, callback, once)
            .ok_or_else(|| self.inner.destroyed())
    }

    /// Resolve with the next accepted inbound message.
    ///
    /// Dropping the future cancels the underlying subscription. Destroying the
    /// bridge while waiting resolves to [`BridgeError::Destroyed`].
    pub async fn wait(&self) -> Result<(Sender, Payload), BridgeError> {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let subscription = self.once(move |sender, payload| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send((*sender, payload.clone()));
            }
        })?;
        let _guard = SubscriptionGuard(subscription);

        rx.await.map_err(|_| self.inner.destroyed())
    }

    /// Accepted inbound messages as a stream. Ends when the bridge is destroyed.
    pub fn stream(&self) -> Result<InboundStream, BridgeError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.connect(move |sender, payload| {
            let _ = tx.send((*sender, payload.clone()));
        })?;
        Ok(InboundStream::new(
            UnboundedReceiverStream::new(rx),
            subscription,
        ))
    }

    // =========================================================================
    // PUBLISH
    // =========================================================================

    /// Send a payload. `()` and `None` become the empty payload.
    ///
    /// Fire-and-forget: nothing reports whether the message arrived.
    pub fn publish(&self, target: Target, payload: impl Into<Payload>) -> Result<(), BridgeError> {
        let (token, outbound) = self.inner.read(|s| (s.token.clone(), s.outbound.clone()))?;

        let role = self.inner.endpoint.role();
        if !target.allowed_from(role) {
            return Err(BridgeError::InvalidTarget { role, target });
        }

        let token = self.current_token(token);
        let payload = outbound.run(&self.inner.name, payload.into());

        self.inner.endpoint.enqueue(target, &token, payload);
        metric_inc!(MESSAGES_PUBLISHED);
        Ok(())
    }

    /// Upgrade a degraded token if the registry has learned the mapping since.
    fn current_token(&self, token: Token) -> Token {
        if token.as_str() != self.inner.name {
            return token;
        }
        match self.inner.endpoint.compact_token(&self.inner.name) {
            Some(compact) if compact != token => {
                self.inner.endpoint.wire(&compact);
                self.inner.upgrade(&compact);
                compact
            }
            _ => token,
        }
    }

    // =========================================================================
    // CONFIGURATION
    // =========================================================================

    /// Throttle inbound messages per sender over the configured default window.
    pub fn set_rate_limit(
        &self,
        max_per_window: u32,
        on_overflow: impl Fn(&Sender, u32) -> OverflowDecision + Send + Sync + 'static,
    ) -> Result<(), BridgeError> {
        let window = self.inner.endpoint.config().rate_limit_window;
        self.set_rate_limit_policy(
            RateLimitPolicy::new(max_per_window, window).on_overflow(on_overflow),
        )
    }

    /// Install a rate limit policy. Existing counters are discarded.
    pub fn set_rate_limit_policy(&self, policy: RateLimitPolicy) -> Result<(), BridgeError> {
        debug!(channel = %self.inner.name, ?policy, "Rate limit set");
        self.inner
            .write(|s| s.rate_limiter = Some(Arc::new(RateLimiter::new(policy))))
    }

    pub fn clear_rate_limit(&self) -> Result<(), BridgeError> {
        self.inner.write(|s| s.rate_limiter = None)
    }

    /// Replace the outbound chain.
    pub fn set_outbound_middleware(
        &self,
        pipeline: impl Into<OutboundPipeline>,
    ) -> Result<(), BridgeError> {
        let pipeline = pipeline.into();
        self.inner.write(|s| s.outbound = pipeline)
    }

    /// Replace the inbound chain.
    pub fn set_inbound_middleware(
        &self,
        pipeline: impl Into<InboundPipeline>,
    ) -> Result<(), BridgeError> {
        let pipeline = pipeline.into();
        self.inner.write(|s| s.inbound = pipeline)
    }

    /// Tear down the bridge: subscribers, middleware and rate limit state are
    /// released, pending waits fail and streams end.
    pub fn destroy(&self) -> Result<(), BridgeError> {
        let taken = self.inner.state.write().take();
        if taken.is_none() {
            return Err(self.inner.destroyed());
        }

        self.inner.subscribers.lock().close();
        self.inner.endpoint.detach(&self.inner);
        BRIDGES_ACTIVE.dec();

        log_channel_event!(
            debug,
            self.inner.endpoint.role(),
            "Bridge destroyed",
            self.inner.name
        );
        Ok(())
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("name", &self.inner.name)
            .field("token", &self.token().ok())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
