//! # Loopback Transport
//!
//! In-memory network connecting one hub and any number of peers, for tests.
//!
//! Delivery is FIFO and runs synchronously inside `enqueue`, but never
//! re-entrantly: a message enqueued from inside a handler is queued and
//! delivered after the current handler returns. [`LoopbackNetwork::hold`]
//! parks all traffic until [`LoopbackNetwork::release`].
//!
//! Endpoints are identified by [`Sender`]: `Sender::Hub` for the hub and
//! `Sender::Peer(id)` for each peer.

use crate::transport::{RawHandler, Transport};
use bridgewire_types::{Payload, PeerId, Sender, Target, Token};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// One message as it crossed the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct WireFrame {
    pub from: Sender,
    pub target: Target,
    pub token: Token,
    pub payload: Value,
}

struct Delivery {
    to: Sender,
    from: Sender,
    token: Token,
    raw: Value,
}

#[derive(Default)]
struct NetworkState {
    handlers: HashMap<(Sender, Token), RawHandler>,
    announced: Vec<(Sender, Token)>,
    peers: Vec<PeerId>,
    queue: VecDeque<Delivery>,
    log: Vec<WireFrame>,
    held: bool,
    draining: bool,
}

#[derive(Default)]
struct NetworkInner {
    state: Mutex<NetworkState>,
}

impl NetworkInner {
    fn push(&self, delivery: Delivery) {
        self.state.lock().queue.push_back(delivery);
        self.drain();
    }

    fn drain(&self) {
        {
            let mut state = self.state.lock();
            if state.draining || state.held {
                return;
            }
            state.draining = true;
        }

        loop {
            let (delivery, handler) = {
                let mut state = self.state.lock();
                let next = if state.held {
                    None
                } else {
                    state.queue.pop_front()
                };
                match next {
                    Some(delivery) => {
                        let handler = state
                            .handlers
                            .get(&(delivery.to, delivery.token.clone()))
                            .cloned();
                        (delivery, handler)
                    }
                    None => {
                        state.draining = false;
                        return;
                    }
                }
            };

            match handler {
                Some(handler) => handler(delivery.from, delivery.raw),
                None => debug!(
                    to = %delivery.to,
                    token = %delivery.token,
                    "Loopback discarded message with no handler"
                ),
            }
        }
    }
}

/// The in-memory network.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    inner: Arc<NetworkInner>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport for the hub endpoint.
    pub fn hub_transport(&self) -> LoopbackTransport {
        LoopbackTransport {
            network: self.inner.clone(),
            node: Sender::Hub,
        }
    }

    /// Attach a new peer and return its identity and transport.
    pub fn add_peer(&self) -> (PeerId, LoopbackTransport) {
        let peer = PeerId::random();
        self.inner.state.lock().peers.push(peer);
        (
            peer,
            LoopbackTransport {
                network: self.inner.clone(),
                node: Sender::Peer(peer),
            },
        )
    }

    /// Detach a peer. Its handlers are removed and it receives nothing further.
    pub fn remove_peer(&self, peer: PeerId) {
        let mut state = self.inner.state.lock();
        state.peers.retain(|p| *p != peer);
        state
            .handlers
            .retain(|(node, _), _| *node != Sender::Peer(peer));
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.inner.state.lock().peers.clone()
    }

    /// Park all traffic.
    pub fn hold(&self) {
        self.inner.state.lock().held = true;
    }

    /// Resume traffic and deliver everything parked.
    pub fn release(&self) {
        self.inner.state.lock().held = false;
        self.inner.drain();
    }

    /// Messages parked in the queue.
    pub fn pending(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Deliver arbitrary raw data from `peer` to the hub on `token`.
    pub fn inject(&self, peer: PeerId, token: impl Into<Token>, raw: Value) {
        let token = token.into();
        self.inner.state.lock().log.push(WireFrame {
            from: Sender::Peer(peer),
            target: Target::Hub,
            token: token.clone(),
            payload: raw.clone(),
        });
        self.inner.push(Delivery {
            to: Sender::Hub,
            from: Sender::Peer(peer),
            token,
            raw,
        });
    }

    /// Every `announce_identifier` call, in order.
    pub fn announced(&self) -> Vec<(Sender, Token)> {
        self.inner.state.lock().announced.clone()
    }

    /// Every enqueued or injected message, in order.
    pub fn wire_log(&self) -> Vec<WireFrame> {
        self.inner.state.lock().log.clone()
    }
}

/// One endpoint's view of the [`LoopbackNetwork`].
#[derive(Clone)]
pub struct LoopbackTransport {
    network: Arc<NetworkInner>,
    node: Sender,
}

impl LoopbackTransport {
    pub fn node(&self) -> Sender {
        self.node
    }
}

impl Transport for LoopbackTransport {
    fn announce_identifier(&self, token: &Token) {
        self.network
            .state
            .lock()
            .announced
            .push((self.node, token.clone()));
    }

    fn on_message(&self, token: &Token, handler: RawHandler) {
        self.network
            .state
            .lock()
            .handlers
            .insert((self.node, token.clone()), handler);
    }

    fn enqueue(&self, target: Target, token: &Token, payload: Payload) {
        let raw = payload.into_raw();
        {
            let mut state = self.network.state.lock();
            state.log.push(WireFrame {
                from: self.node,
                target: target.clone(),
                token: token.clone(),
                payload: raw.clone(),
            });

            let recipients: Vec<Sender> = match self.node {
                Sender::Hub => state
                    .peers
                    .iter()
                    .filter(|peer| target.includes(peer))
                    .map(|peer| Sender::Peer(*peer))
                    .collect(),
                Sender::Peer(_) if target == Target::Hub => vec![Sender::Hub],
                Sender::Peer(_) => Vec::new(),
            };

            for to in recipients {
                state.queue.push_back(Delivery {
                    to,
                    from: self.node,
                    token: token.clone(),
                    raw: raw.clone(),
                });
            }
        }
        self.network.drain();
    }
}
