//! # Subscriptions
//!
//! Subscriber bookkeeping for a bridge, the cancellable [`Subscription`]
//! handle, and the [`InboundStream`] adapter.
//!
//! Fan-out works on a snapshot of the subscriber list taken when a message
//! arrives, and no lock is held while a callback runs. A callback may
//! therefore cancel itself or any other subscription, or connect new ones.
//! Subscriptions cancelled mid fan-out are skipped when their turn comes;
//! subscriptions added mid fan-out first see the next message.

use bridgewire_telemetry::{metric_inc, MESSAGES_DELIVERED};
use bridgewire_types::{Payload, Sender};
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;

/// Subscriber callback: `(sender, payload)`.
pub type Callback = Arc<dyn Fn(&Sender, &Payload) + Send + Sync>;

pub(crate) struct SubscriberEntry {
    id: u64,
    active: Arc<AtomicBool>,
    once: bool,
    callback: Callback,
}

impl SubscriberEntry {
    /// Claim this entry for one delivery. A `once` entry can be claimed a single time.
    fn claim(&self) -> bool {
        if self.once {
            self.active
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        } else {
            self.active.load(Ordering::Acquire)
        }
    }
}

/// Live subscribers of one bridge, in registration order.
#[derive(Default)]
pub(crate) struct SubscriberSet {
    next_id: u64,
    entries: Vec<Arc<SubscriberEntry>>,
    closed: bool,
}

impl SubscriberSet {
    /// Register a callback. `None` once the set has been closed.
    pub(crate) fn add(
        set: &Arc<Mutex<SubscriberSet>>,
        callback: Callback,
        once: bool,
    ) -> Option<Subscription> {
        let mut guard = set.lock();
        if guard.is_closed() {
            return None;
        }

        guard.next_id += 1;
        let id = guard.next_id;
        let active = Arc::new(AtomicBool::new(true));
        guard.entries.push(Arc::new(SubscriberEntry {
            id,
            active: active.clone(),
            once,
            callback,
        }));

        Some(Subscription {
            id,
            active,
            set: Arc::downgrade(set),
        })
    }

    fn remove(&mut self, id: u64) {
        self.entries.retain(|entry| entry.id != id);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    /// Deactivate and release every subscriber. Further `add` calls fail.
    ///
    /// Releasing the callbacks drops any channel senders they own, which ends
    /// pending waits and streams.
    pub(crate) fn close(&mut self) {
        self.closed = true;
        for entry in self.entries.drain(..) {
            entry.active.store(false, Ordering::Release);
        }
    }

    /// Deliver one message to every live subscriber in registration order.
    /// Returns how many callbacks ran.
    pub(crate) fn fan_out(set: &Mutex<SubscriberSet>, sender: &Sender, payload: &Payload) -> usize {
        let snapshot = set.lock().entries.clone();
        let mut delivered = 0;

        for entry in snapshot {
            if !entry.claim() {
                continue;
            }
            if entry.once {
                set.lock().remove(entry.id);
            }

            (entry.callback)(sender, payload);
            metric_inc!(MESSAGES_DELIVERED);
            delivered += 1;
        }

        delivered
    }
}

/// Handle to one registered callback.
///
/// Dropping the handle does not cancel the subscription; call
/// [`Subscription::cancel`].
#[derive(Debug, Clone)]
pub struct Subscription {
    id: u64,
    active: Arc<AtomicBool>,
    set: Weak<Mutex<SubscriberSet>>,
}

impl Subscription {
    /// Stop receiving messages. Takes effect immediately, including from inside
    /// the subscription's own callback. Idempotent.
    pub fn cancel(&self) {
        self.active.store(false, Ordering::Release);
        if let Some(set) = self.set.upgrade() {
            set.lock().remove(self.id);
        }
    }

    /// False once cancelled, fired (for `once`), or the bridge was destroyed.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Cancels the wrapped subscription when dropped.
pub(crate) struct SubscriptionGuard(pub(crate) Subscription);

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Stream of `(sender, payload)` accepted by a bridge.
///
/// Ends when the bridge is destroyed. Dropping the stream cancels its subscription.
pub struct InboundStream {
    inner: UnboundedReceiverStream<(Sender, Payload)>,
    subscription: Subscription,
}

impl InboundStream {
    pub(crate) fn new(
        inner: UnboundedReceiverStream<(Sender, Payload)>,
        subscription: Subscription,
    ) -> Self {
        Self {
            inner,
            subscription,
        }
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }
}

impl Stream for InboundStream {
    type Item = (Sender, Payload);

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for InboundStream {
    fn drop(&mut self) {
        self.subscription.cancel();
    }
}
